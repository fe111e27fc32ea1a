// src/fetch/reports.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::{debug, info, instrument};

use super::downloads::{set_aside_stale, wait_for_download};
use super::locators;
use super::page::option_labels;
use super::session::Session;
use super::window::ReportWindow;
use crate::config::DownloadConfig;
use crate::process::Division;

/// One report as it landed in the download directory.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedReport {
    pub division: Division,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}

/// Open the sales report, set `window`, and download the FOCO then the COCO report.
#[instrument(level = "info", skip_all, fields(window = %window))]
pub async fn download_reports(
    session: &Session,
    window: ReportWindow,
    download: &DownloadConfig,
) -> Result<Vec<DownloadedReport>> {
    set_aside_stale(session.download_dir())?;

    session.click(&locators::REPORTS_MENU).await?;
    session.click(&locators::REPORT_LINK).await?;

    session.click(&locators::DATE_RANGE).await?;
    session
        .type_into(&locators::RANGE_START, &window.start_text())
        .await?;
    session
        .type_into(&locators::RANGE_END, &window.end_text())
        .await?;
    session.click(&locators::APPLY_RANGE).await?;

    let mut reports = Vec::with_capacity(Division::ALL.len());
    reports.push(trigger_download(session, Division::Foco, download).await?);

    session.click(&locators::DIVISION_SELECT).await?;
    if let Ok(html) = session.page().content().await {
        debug!(options = ?option_labels(&html), "division options");
    }
    session.click(&locators::SECOND_DIVISION).await?;
    reports.push(trigger_download(session, Division::Coco, download).await?);

    info!(count = reports.len(), "reports downloaded");
    Ok(reports)
}

async fn trigger_download(
    session: &Session,
    division: Division,
    download: &DownloadConfig,
) -> Result<DownloadedReport> {
    let path = session.download_dir().join(division.download_name());
    let started = Utc::now();
    session.click(&locators::DOWNLOAD).await?;
    let size_bytes = wait_for_download(&path, download.timeout(), download.poll_interval())
        .await
        .with_context(|| format!("downloading {division} report"))?;
    Ok(DownloadedReport {
        division,
        path,
        size_bytes,
        started,
        finished: Utc::now(),
    })
}
