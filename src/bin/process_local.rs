//! process_local: tag, merge and mail two reports that are already on disk.
//!
//! Usage: `process_local <FOCO.xlsx> <COCO.xlsx> [config.yaml]`
//!
//! Skips the browser entirely. The SMTP app password still comes from
//! `DMS_SMTP_APP_PASSWORD`; the delivery is recorded in the ledger.

use anyhow::{bail, Result};
use chrono::Local;
use dmsreport::{
    config::{secret_from_env, Config, SMTP_PASSWORD_ENV},
    history::Ledger,
    notify::SmtpRelay,
    pipeline::{deliver, OutputPaths, RunReport},
};
use std::{env, path::PathBuf, process::exit};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    let mut args = env::args().skip(1);
    let (Some(foco), Some(coco)) = (args.next(), args.next()) else {
        eprintln!("Usage: process_local <FOCO.xlsx> <COCO.xlsx> [config.yaml]");
        exit(1);
    };
    let (foco, coco) = (PathBuf::from(foco), PathBuf::from(coco));
    for p in [&foco, &coco] {
        if !p.is_file() {
            bail!("{} does not exist", p.display());
        }
    }

    let config = Config::load(Config::path_from_args(args))?;
    let app_password = secret_from_env(SMTP_PASSWORD_ENV)?;
    let relay = SmtpRelay::new(&config.mail, &app_password)?;
    let ledger = Ledger::open(&config.paths.history_dir)?;
    let outputs = OutputPaths::new(&config.paths.output_dir, Local::now().date_naive());

    let mut report = RunReport::new();
    let delivered = deliver(&config.mail, &outputs, &foco, &coco, &relay, &mut report).await;
    let report = report.finish();

    if let Some(row) = delivered {
        info!(file = %row.filename, rows = row.rows, "delivered");
        if let Err(e) = ledger.delivered.add(&row) {
            warn!(error = %e, "could not record delivery");
        }
    }
    if let Some((stage, reason)) = report.failure() {
        bail!("{stage} stage failed: {reason}");
    }
    Ok(())
}
