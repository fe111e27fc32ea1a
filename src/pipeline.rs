// src/pipeline.rs
//
// Runs the stages in order and stops at the first failure.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};
use tracing::{error, info, instrument, warn};

use crate::{
    config::{Config, MailConfig, Secrets},
    fetch::{download_reports, DownloadedReport, ReportWindow, Session},
    history::{DeliveredRow, DownloadedRow, Ledger},
    notify::{send_report, MailTransport, SmtpRelay},
    process::{
        dated_name, insert_division_column, merge_tables, rename_downloaded_files, Division,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Login,
    Download,
    Rename,
    Process,
    Merge,
    Notify,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Login,
        Stage::Download,
        Stage::Rename,
        Stage::Process,
        Stage::Merge,
        Stage::Notify,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Login => "login",
            Stage::Download => "download",
            Stage::Rename => "rename",
            Stage::Process => "process",
            Stage::Merge => "merge",
            Stage::Notify => "notify",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Succeeded,
    /// The error chain, rendered.
    Failed(String),
    Skipped,
}

/// Per-stage outcomes of one run, in stage order.
#[derive(Debug, Default)]
pub struct RunReport {
    outcomes: Vec<(Stage, StageOutcome)>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record how `stage` went and pass its value on if it succeeded.
    pub fn record<T>(&mut self, stage: Stage, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => {
                info!(%stage, "stage succeeded");
                self.outcomes.push((stage, StageOutcome::Succeeded));
                Some(value)
            }
            Err(e) => {
                let reason = format!("{e:#}");
                error!(%stage, error = %reason, "stage failed");
                self.outcomes.push((stage, StageOutcome::Failed(reason)));
                None
            }
        }
    }

    /// Mark every stage without an outcome as skipped.
    pub fn finish(mut self) -> Self {
        for stage in Stage::ALL {
            if self.outcome(stage).is_none() {
                self.outcomes.push((stage, StageOutcome::Skipped));
            }
        }
        self.outcomes
            .sort_by_key(|(s, _)| Stage::ALL.iter().position(|x| x == s));
        self
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.outcomes
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, o)| o)
    }

    pub fn outcomes(&self) -> &[(Stage, StageOutcome)] {
        &self.outcomes
    }

    /// The first failed stage and its reason.
    pub fn failure(&self) -> Option<(Stage, &str)> {
        self.outcomes.iter().find_map(|(s, o)| match o {
            StageOutcome::Failed(reason) => Some((*s, reason.as_str())),
            _ => None,
        })
    }
}

/// Where stages 4 and 5 write for a given day.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub foco: PathBuf,
    pub coco: PathBuf,
    pub merged: PathBuf,
}

impl OutputPaths {
    pub fn new(output_dir: impl AsRef<Path>, day: NaiveDate) -> Self {
        let dir = output_dir.as_ref();
        let date = day.format("%Y-%m-%d");
        Self {
            foco: dir.join(format!("{}_Processed_{date}.xlsx", Division::Foco)),
            coco: dir.join(format!("{}_Processed_{date}.xlsx", Division::Coco)),
            merged: dir.join(format!("Merged_COCO_FOCO_{date}.xlsx")),
        }
    }

    pub fn processed(&self, division: Division) -> &Path {
        match division {
            Division::Foco => &self.foco,
            Division::Coco => &self.coco,
        }
    }

    pub fn merged_name(&self) -> String {
        self.merged
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Run every stage for `today`.
///
/// Fails only if the ledger, relay or working directories cannot be prepared; stage
/// failures are reported in the returned [`RunReport`].
#[instrument(level = "info", skip_all, fields(today = %today, force = force))]
pub async fn run(
    config: &Config,
    secrets: &Secrets,
    today: NaiveDate,
    force: bool,
) -> Result<RunReport> {
    for dir in [
        &config.paths.download_dir,
        &config.paths.output_dir,
        &config.paths.history_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let ledger = Ledger::open(&config.paths.history_dir)?;
    let relay = SmtpRelay::new(&config.mail, &secrets.smtp_app_password)?;
    let outputs = OutputPaths::new(&config.paths.output_dir, today);

    let mut report = RunReport::new();
    if !force && ledger.delivered.get(&outputs.merged_name()) {
        info!(
            merged = %outputs.merged_name(),
            "already delivered today; set DMSREPORT_FORCE=1 to send again"
        );
        return Ok(report.finish());
    }

    let window = ReportWindow::for_day(today);
    info!(%window, "report window");

    let Some(downloads) = acquire(config, secrets, window, &mut report).await else {
        return Ok(report.finish());
    };

    let renamed = report.record(
        Stage::Rename,
        rename_downloaded_files(&config.paths.download_dir, today)
            .and_then(|r| r.require().map_err(Into::into)),
    );
    let Some((foco, coco)) = renamed else {
        return Ok(report.finish());
    };
    record_downloads(&ledger, &downloads, today);

    if let Some(row) = deliver(&config.mail, &outputs, &foco, &coco, &relay, &mut report).await {
        if let Err(e) = ledger.delivered.add(&row) {
            warn!(error = %e, "could not record delivery");
        }
    }
    Ok(report.finish())
}

/// Stages 1 and 2. The browser is closed whatever happens.
async fn acquire(
    config: &Config,
    secrets: &Secrets,
    window: ReportWindow,
    report: &mut RunReport,
) -> Option<Vec<DownloadedReport>> {
    let session = report.record(Stage::Login, open_and_login(config, secrets).await)?;
    let downloads = report.record(
        Stage::Download,
        download_reports(&session, window, &config.download).await,
    );
    close_quietly(session).await;
    downloads
}

async fn open_and_login(config: &Config, secrets: &Secrets) -> Result<Session> {
    let session = Session::open(&config.paths.download_dir, &config.portal).await?;
    match session
        .login(&config.portal.username, &secrets.portal_password)
        .await
    {
        Ok(()) => Ok(session),
        Err(e) => {
            close_quietly(session).await;
            Err(e)
        }
    }
}

async fn close_quietly(session: Session) {
    if let Err(e) = session.close().await {
        warn!(error = %e, "closing browser");
    }
}

fn record_downloads(ledger: &Ledger, downloads: &[DownloadedReport], today: NaiveDate) {
    for d in downloads {
        let row = DownloadedRow {
            filename: dated_name(d.division, today),
            division: d.division.to_string(),
            size_bytes: d.size_bytes,
            download_start: d.started,
            download_end: d.finished,
        };
        if let Err(e) = ledger.downloaded.add(&row) {
            warn!(error = %e, file = %row.filename, "could not record download");
        }
    }
}

/// Stages 4 and 5: tag each report with its division, merge COCO then FOCO,
/// and mail the merged file.
pub async fn deliver<T: MailTransport>(
    mail: &MailConfig,
    outputs: &OutputPaths,
    foco: &Path,
    coco: &Path,
    transport: &T,
    report: &mut RunReport,
) -> Option<DeliveredRow> {
    report.record(Stage::Process, process_both(outputs, foco, coco))?;

    let rows = report.record(
        Stage::Merge,
        merge_tables(&outputs.coco, &outputs.foco, &outputs.merged),
    )?;

    let receipt = report.record(
        Stage::Notify,
        send_report(transport, mail, &outputs.merged).await,
    )?;

    Some(DeliveredRow {
        filename: receipt.filename,
        rows: rows as u64,
        recipients: receipt.recipients.len() as u32,
        size_bytes: receipt.size_bytes,
        sent_at: Utc::now(),
    })
}

fn process_both(outputs: &OutputPaths, foco: &Path, coco: &Path) -> Result<()> {
    for (division, input) in [(Division::Foco, foco), (Division::Coco, coco)] {
        insert_division_column(input, division.label(), outputs.processed(division))
            .with_context(|| format!("processing {division} report"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::tests::{mail_config, RecordingTransport};
    use crate::process::{Cell, Table, DIVISION_COLUMN};
    use anyhow::anyhow;
    use tempfile::tempdir;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 15).unwrap()
    }

    fn write_report(path: &Path, branches: &[&str]) -> Result<()> {
        let mut t = Table::new(vec!["Invoice".into(), "Branch".into(), "Amount".into()]);
        for (i, b) in branches.iter().enumerate() {
            t.push_row(vec![
                Cell::text(format!("INV-{i}")),
                Cell::text(*b),
                Cell::Number(100.0 + i as f64),
            ]);
        }
        t.save(path)
    }

    #[test]
    fn report_fills_skipped_stages_in_order() {
        let mut report = RunReport::new();
        assert_eq!(report.record(Stage::Login, Ok(1)), Some(1));
        assert_eq!(
            report.record::<()>(Stage::Download, Err(anyhow!("portal went away"))),
            None
        );
        let report = report.finish();

        let stages: Vec<Stage> = report.outcomes().iter().map(|(s, _)| *s).collect();
        assert_eq!(stages, Stage::ALL.to_vec());
        assert_eq!(report.outcome(Stage::Rename), Some(&StageOutcome::Skipped));
        assert_eq!(
            report.failure(),
            Some((Stage::Download, "portal went away"))
        );
    }

    #[test]
    fn output_names_carry_date() {
        let out = OutputPaths::new("out", day());
        assert_eq!(out.foco, PathBuf::from("out/FOCO_Processed_2024-12-15.xlsx"));
        assert_eq!(out.coco, PathBuf::from("out/COCO_Processed_2024-12-15.xlsx"));
        assert_eq!(out.merged_name(), "Merged_COCO_FOCO_2024-12-15.xlsx");
    }

    #[tokio::test]
    async fn process_merge_and_notify() -> Result<()> {
        let dir = tempdir()?;
        let foco = dir.path().join("FOCO_2024-12-15.xlsx");
        let coco = dir.path().join("COCO_2024-12-15.xlsx");
        write_report(&foco, &["Chennai", "Madurai", "Salem"])?;
        write_report(&coco, &["Hosur", "Vellore"])?;

        let outputs = OutputPaths::new(dir.path().join("out"), day());
        let transport = RecordingTransport::default();
        let mut report = RunReport::new();

        let row = deliver(&mail_config(), &outputs, &foco, &coco, &transport, &mut report)
            .await
            .ok_or_else(|| anyhow!("delivery failed: {:?}", report.failure()))?;
        let report = report.finish();

        assert_eq!(report.outcome(Stage::Notify), Some(&StageOutcome::Succeeded));
        assert_eq!(report.outcome(Stage::Login), Some(&StageOutcome::Skipped));
        assert_eq!(row.rows, 5);
        assert_eq!(row.recipients, 3);
        assert_eq!(row.filename, "Merged_COCO_FOCO_2024-12-15.xlsx");

        let merged = Table::load(&outputs.merged)?;
        assert_eq!(merged.headers, vec!["Invoice", "Branch", DIVISION_COLUMN, "Amount"]);
        let labels: Vec<_> = merged
            .column(DIVISION_COLUMN)
            .unwrap()
            .into_iter()
            .map(|c| c.as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(labels, vec!["COCO", "COCO", "FOCO", "FOCO", "FOCO"]);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].attachment.content, fs::read(&outputs.merged)?);
        Ok(())
    }

    #[tokio::test]
    async fn missing_branch_stops_before_mail() -> Result<()> {
        let dir = tempdir()?;
        let foco = dir.path().join("FOCO_2024-12-15.xlsx");
        let coco = dir.path().join("COCO_2024-12-15.xlsx");
        write_report(&foco, &["Chennai"])?;
        let mut bad = Table::new(vec!["Invoice".into(), "Amount".into()]);
        bad.push_row(vec![Cell::text("INV-0"), Cell::Number(1.0)]);
        bad.save(&coco)?;

        let outputs = OutputPaths::new(dir.path().join("out"), day());
        let transport = RecordingTransport::default();
        let mut report = RunReport::new();

        let row = deliver(&mail_config(), &outputs, &foco, &coco, &transport, &mut report).await;
        let report = report.finish();

        assert!(row.is_none());
        let (stage, reason) = report.failure().unwrap();
        assert_eq!(stage, Stage::Process);
        assert!(reason.contains("Branch"), "{reason}");
        assert_eq!(report.outcome(Stage::Notify), Some(&StageOutcome::Skipped));
        assert!(!outputs.merged.exists());
        assert!(transport.sent.lock().unwrap().is_empty());
        Ok(())
    }

    fn local_config(root: &Path) -> Result<Config> {
        let yaml = format!(
            r#"
portal:
  login_url: http://127.0.0.1:9/login
  username: K01068
  element_timeout_secs: 1
  poll_interval_ms: 100
paths:
  download_dir: '{root}/downloads'
  output_dir: '{root}/output'
  history_dir: '{root}/history'
mail:
  relay: smtp.example.com
  sender: reports@example.com
  recipient: r@example.com
"#,
            root = root.display()
        );
        Config::from_yaml(&yaml)
    }

    fn secrets() -> Secrets {
        Secrets {
            portal_password: "portal".into(),
            smtp_app_password: "smtp".into(),
        }
    }

    fn mark_delivered(config: &Config) -> Result<()> {
        let ledger = Ledger::open(&config.paths.history_dir)?;
        ledger.delivered.add(&DeliveredRow {
            filename: OutputPaths::new(&config.paths.output_dir, day()).merged_name(),
            rows: 5,
            recipients: 1,
            size_bytes: 1024,
            sent_at: Utc::now(),
        })?;
        Ok(())
    }

    #[tokio::test]
    async fn already_delivered_day_is_skipped() -> Result<()> {
        let dir = tempdir()?;
        let config = local_config(dir.path())?;
        mark_delivered(&config)?;

        let report = run(&config, &secrets(), day(), false).await?;

        assert!(report.failure().is_none());
        assert_eq!(report.outcomes().len(), Stage::ALL.len());
        assert!(report
            .outcomes()
            .iter()
            .all(|(_, o)| *o == StageOutcome::Skipped));
        Ok(())
    }

    #[tokio::test]
    async fn force_runs_even_when_already_delivered() -> Result<()> {
        let dir = tempdir()?;
        let config = local_config(dir.path())?;
        mark_delivered(&config)?;

        let report = run(&config, &secrets(), day(), true).await?;

        // nothing answers on the portal address, so the run stops at login
        assert!(matches!(
            report.outcome(Stage::Login),
            Some(StageOutcome::Failed(_))
        ));
        assert_eq!(report.outcome(Stage::Download), Some(&StageOutcome::Skipped));
        assert_eq!(report.outcome(Stage::Notify), Some(&StageOutcome::Skipped));
        Ok(())
    }
}
