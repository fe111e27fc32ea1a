// src/fetch/session.rs
use anyhow::{anyhow, Context, Result};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::{Browser, BrowserConfig, Element, Page};
use futures::StreamExt;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{sleep, Instant},
};
use tracing::{debug, info, instrument, trace, warn};

use super::locators::{self, Locator, Presence};
use super::page::flash_message;
use crate::config::PortalConfig;
use crate::error::ReportError;

const IS_VISIBLE_JS: &str =
    "function() { return !!(this.offsetWidth || this.offsetHeight || this.getClientRects().length); }";
const CLEAR_VALUE_JS: &str =
    "function() { this.value = ''; this.dispatchEvent(new Event('input', { bubbles: true })); }";

/// A running browser with one page, downloading silently into `download_dir`.
pub struct Session {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    download_dir: PathBuf,
    login_url: String,
    element_timeout: Duration,
    poll_interval: Duration,
}

impl Session {
    /// Launch the browser. `download_dir` is created if needed.
    #[instrument(level = "info", skip_all, fields(dir = %download_dir.as_ref().display()))]
    pub async fn open(download_dir: impl AsRef<Path>, portal: &PortalConfig) -> Result<Self> {
        let download_dir = download_dir.as_ref();
        fs::create_dir_all(download_dir)
            .with_context(|| format!("creating download dir {}", download_dir.display()))?;
        // the browser resolves relative paths against its own cwd
        let download_dir = download_dir
            .canonicalize()
            .with_context(|| format!("resolving {}", download_dir.display()))?;

        let mut builder = BrowserConfig::builder().request_timeout(portal.element_timeout() * 3);
        if !portal.headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("building browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("launching browser")?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    trace!(error = %e, "browser event");
                }
            }
        });

        let behaviour = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(download_dir.to_string_lossy().to_string())
            .build()
            .map_err(|e| anyhow!("building download behaviour: {e}"))?;
        browser
            .execute(behaviour)
            .await
            .context("enabling silent downloads")?;

        let page = browser
            .new_page("about:blank")
            .await
            .context("opening browser page")?;

        info!(dir = %download_dir.display(), "browser ready");
        Ok(Self {
            browser,
            page,
            handler,
            download_dir,
            login_url: portal.login_url.clone(),
            element_timeout: portal.element_timeout(),
            poll_interval: portal.poll_interval(),
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Sign in and wait for the dashboard. On failure the portal's own message,
    /// if it shows one, is attached to the error.
    #[instrument(level = "info", skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        self.page
            .goto(self.login_url.as_str())
            .await
            .with_context(|| format!("opening {}", self.login_url))?;

        self.type_into(&locators::USERNAME, username).await?;
        self.type_into(&locators::PASSWORD, password).await?;
        self.click(&locators::SUBMIT).await?;

        match self.wait(&locators::LOGGED_IN).await {
            Ok(_) => {
                info!("login successful");
                Ok(())
            }
            Err(e) => match self.page.content().await.ok().as_deref().and_then(flash_message) {
                Some(message) => Err(e.context(format!("portal says: {message}"))),
                None => Err(e),
            },
        }
    }

    /// Poll until `locator` resolves, up to the element timeout.
    pub async fn wait(&self, locator: &Locator) -> Result<Element> {
        let start = Instant::now();
        loop {
            match self.locate(locator).await {
                Ok(Some(el)) => {
                    debug!(%locator, elapsed = ?start.elapsed(), "found");
                    return Ok(el);
                }
                Ok(None) => {}
                Err(e) => trace!(%locator, error = %e, "lookup failed"),
            }
            if start.elapsed() >= self.element_timeout {
                return Err(ReportError::ElementTimeout {
                    locator: locator.to_string(),
                    timeout: self.element_timeout,
                }
                .into());
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn locate(&self, locator: &Locator) -> Result<Option<Element>> {
        let mut matches = self.page.find_elements(locator.css).await?;
        if matches.len() <= locator.nth {
            return Ok(None);
        }
        let mut element = matches.swap_remove(locator.nth);
        if let Some(css) = locator.descendant {
            element = match element.find_element(css).await {
                Ok(inner) => inner,
                Err(_) => return Ok(None),
            };
        }
        if locator.presence == Presence::Visible && !is_visible(&element).await? {
            return Ok(None);
        }
        Ok(Some(element))
    }

    pub async fn click(&self, locator: &Locator) -> Result<()> {
        let element = self.wait(locator).await?;
        element
            .scroll_into_view()
            .await
            .with_context(|| format!("scrolling to {locator}"))?;
        element
            .click()
            .await
            .with_context(|| format!("clicking {locator}"))?;
        Ok(())
    }

    /// Clear the field and type `text` into it.
    pub async fn type_into(&self, locator: &Locator, text: &str) -> Result<()> {
        let element = self.wait(locator).await?;
        element
            .click()
            .await
            .with_context(|| format!("focusing {locator}"))?;
        element
            .call_js_fn(CLEAR_VALUE_JS, false)
            .await
            .with_context(|| format!("clearing {locator}"))?;
        element
            .type_str(text)
            .await
            .with_context(|| format!("typing into {locator}"))?;
        Ok(())
    }

    /// Shut the browser down. Always call this, whatever happened in between.
    #[instrument(level = "info", skip_all)]
    pub async fn close(mut self) -> Result<()> {
        let closed = self.browser.close().await.context("closing browser");
        if let Err(e) = self.browser.wait().await {
            warn!(error = %e, "waiting for browser process");
        }
        self.handler.abort();
        closed?;
        info!("browser closed");
        Ok(())
    }
}

async fn is_visible(element: &Element) -> Result<bool> {
    let ret = element.call_js_fn(IS_VISIBLE_JS, false).await?;
    Ok(ret
        .result
        .value
        .as_ref()
        .and_then(|v| v.as_bool())
        .unwrap_or(false))
}
