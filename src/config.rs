use anyhow::{bail, Context, Result};
use lettre::message::Mailbox;
use serde::Deserialize;
use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;

use crate::error::ReportError;

/// Environment variable naming the config file when no argument is given.
pub const CONFIG_ENV: &str = "DMSREPORT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "dmsreport.yaml";
/// Set to `1`/`true` to run even if today's report was already delivered.
pub const FORCE_ENV: &str = "DMSREPORT_FORCE";

pub const PORTAL_PASSWORD_ENV: &str = "DMS_PORTAL_PASSWORD";
pub const SMTP_PASSWORD_ENV: &str = "DMS_SMTP_APP_PASSWORD";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub portal: PortalConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    pub mail: MailConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortalConfig {
    #[serde(default = "PortalConfig::default_login_url")]
    pub login_url: String,
    pub username: String,
    #[serde(default = "PortalConfig::default_headless")]
    pub headless: bool,
    /// Upper bound on waiting for any single page element.
    #[serde(default = "PortalConfig::default_element_timeout_secs")]
    pub element_timeout_secs: u64,
    #[serde(default = "PortalConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl PortalConfig {
    fn default_login_url() -> String {
        "https://dms.mytvs.in/tvsfit/users/login".to_string()
    }

    fn default_headless() -> bool {
        true
    }

    fn default_element_timeout_secs() -> u64 {
        10
    }

    fn default_poll_interval_ms() -> u64 {
        250
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.element_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PathsConfig {
    pub download_dir: PathBuf,
    pub output_dir: PathBuf,
    pub history_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            output_dir: PathBuf::from("output"),
            history_dir: PathBuf::from("history"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DownloadConfig {
    /// How long one report may take to appear and settle in the download dir.
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            poll_interval_ms: 1_000,
        }
    }
}

impl DownloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MailConfig {
    #[serde(default = "MailConfig::default_relay")]
    pub relay: String,
    #[serde(default = "MailConfig::default_port")]
    pub port: u16,
    pub sender: String,
    pub recipient: String,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default = "MailConfig::default_subject")]
    pub subject: String,
    #[serde(default = "MailConfig::default_body")]
    pub body: String,
}

impl MailConfig {
    fn default_relay() -> String {
        "smtp.gmail.com".to_string()
    }

    fn default_port() -> u16 {
        587
    }

    fn default_subject() -> String {
        "Merged Excel File".to_string()
    }

    fn default_body() -> String {
        "Hello,\n\nPlease find the merged Excel file attached.\n\nBest regards,\nYour Name"
            .to_string()
    }
}

impl Config {
    /// Config path: first CLI argument, then `$DMSREPORT_CONFIG`, then `dmsreport.yaml`.
    pub fn path_from_args(mut args: impl Iterator<Item = String>) -> PathBuf {
        args.next()
            .or_else(|| env::var(CONFIG_ENV).ok())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("loading config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(text).context("parsing YAML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        Url::parse(&self.portal.login_url)
            .with_context(|| format!("portal.login_url {:?}", self.portal.login_url))?;
        if self.portal.username.trim().is_empty() {
            bail!("portal.username must not be empty");
        }
        if self.portal.poll_interval() >= self.portal.element_timeout() {
            bail!("portal.poll_interval_ms must be shorter than portal.element_timeout_secs");
        }
        if self.download.poll_interval() >= self.download.timeout() {
            bail!("download.poll_interval_ms must be shorter than download.timeout_secs");
        }
        for (field, addr) in [("mail.sender", &self.mail.sender), ("mail.recipient", &self.mail.recipient)]
            .into_iter()
            .chain(self.mail.cc.iter().map(|c| ("mail.cc", c)))
        {
            addr.parse::<Mailbox>()
                .with_context(|| format!("{field}: invalid address {addr:?}"))?;
        }
        Ok(())
    }
}

/// Passwords, only ever read from the environment.
#[derive(Clone)]
pub struct Secrets {
    pub portal_password: String,
    pub smtp_app_password: String,
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("portal_password", &"<redacted>")
            .field("smtp_app_password", &"<redacted>")
            .finish()
    }
}

impl Secrets {
    pub fn from_env() -> Result<Self, ReportError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ReportError> {
        Ok(Self {
            portal_password: secret_from(&lookup, PORTAL_PASSWORD_ENV)?,
            smtp_app_password: secret_from(&lookup, SMTP_PASSWORD_ENV)?,
        })
    }
}

/// A single secret from the environment; empty counts as unset.
pub fn secret_from_env(name: &'static str) -> Result<String, ReportError> {
    secret_from(&|n: &str| env::var(n).ok(), name)
}

fn secret_from(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ReportError> {
    lookup(name)
        .filter(|v| !v.is_empty())
        .ok_or(ReportError::MissingSecret { name })
}

/// Whether `$DMSREPORT_FORCE` asks to ignore the delivery ledger.
pub fn force_from_env() -> bool {
    env::var(FORCE_ENV)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
portal:
  username: K01068
mail:
  sender: reports@example.com
  recipient: manager@example.com
  cc:
    - a@example.com
    - b@example.com
"#;

    #[test]
    fn minimal_config_fills_defaults() -> Result<()> {
        let c = Config::from_yaml(MINIMAL)?;
        assert_eq!(c.portal.login_url, "https://dms.mytvs.in/tvsfit/users/login");
        assert!(c.portal.headless);
        assert_eq!(c.portal.element_timeout(), Duration::from_secs(10));
        assert_eq!(c.paths.download_dir, PathBuf::from("downloads"));
        assert_eq!(c.download.timeout(), Duration::from_secs(120));
        assert_eq!(c.mail.relay, "smtp.gmail.com");
        assert_eq!(c.mail.port, 587);
        assert_eq!(c.mail.subject, "Merged Excel File");
        assert_eq!(c.mail.cc.len(), 2);
        assert!(c.mail.body.ends_with("Best regards,\nYour Name"));
        Ok(())
    }

    #[test]
    fn overrides_are_read() -> Result<()> {
        let yaml = r#"
portal:
  login_url: https://portal.test/login
  username: u
  headless: false
  element_timeout_secs: 30
paths:
  download_dir: /tmp/dl
download:
  timeout_secs: 60
  poll_interval_ms: 500
mail:
  relay: smtp.test
  port: 2525
  sender: s@test.com
  recipient: r@test.com
"#;
        let c = Config::from_yaml(yaml)?;
        assert!(!c.portal.headless);
        assert_eq!(c.paths.download_dir, PathBuf::from("/tmp/dl"));
        assert_eq!(c.paths.output_dir, PathBuf::from("output"));
        assert_eq!(c.download.poll_interval(), Duration::from_millis(500));
        assert_eq!(c.mail.port, 2525);
        assert!(c.mail.cc.is_empty());
        Ok(())
    }

    #[test]
    fn passwords_are_not_accepted_in_the_file() {
        let yaml = format!("{MINIMAL}\n  password: hunter2\n");
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn bad_address_is_rejected() {
        let yaml = MINIMAL.replace("b@example.com", "not an address");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(format!("{err:#}").contains("mail.cc"));
    }

    #[test]
    fn bad_login_url_is_rejected() {
        let yaml = MINIMAL.replace(
            "portal:\n",
            "portal:\n  login_url: not a url\n",
        );
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn secrets_require_both_variables() {
        let mut vars = HashMap::new();
        vars.insert(PORTAL_PASSWORD_ENV, "p".to_string());
        let err = Secrets::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(
            err,
            ReportError::MissingSecret {
                name: SMTP_PASSWORD_ENV
            }
        ));

        vars.insert(SMTP_PASSWORD_ENV, "s".to_string());
        let secrets = Secrets::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(secrets.portal_password, "p");
        let shown = format!("{secrets:?}");
        assert!(shown.contains("<redacted>"));
        assert!(!shown.contains("\"s\""));
    }

    #[test]
    fn empty_secret_counts_as_missing() {
        let err = Secrets::from_lookup(|_| Some(String::new())).unwrap_err();
        assert!(matches!(err, ReportError::MissingSecret { name: PORTAL_PASSWORD_ENV }));
    }

    #[test]
    fn path_from_first_argument() {
        let p = Config::path_from_args(vec!["custom.yaml".to_string()].into_iter());
        assert_eq!(p, PathBuf::from("custom.yaml"));
    }
}
