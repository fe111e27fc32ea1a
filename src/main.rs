use anyhow::{bail, Result};
use chrono::Local;
use dmsreport::{
    config::{force_from_env, Config, Secrets},
    pipeline::{self, StageOutcome},
};
use std::env;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    // ─── 2) config + secrets, before any stage runs ──────────────────
    let config_path = Config::path_from_args(env::args().skip(1));
    let config = Config::load(&config_path)?;
    let secrets = Secrets::from_env()?;
    let force = force_from_env();
    info!(config = %config_path.display(), force, "configuration loaded");

    // ─── 3) run the stages ───────────────────────────────────────────
    let today = Local::now().date_naive();
    let report = pipeline::run(&config, &secrets, today, force).await?;

    for (stage, outcome) in report.outcomes() {
        match outcome {
            StageOutcome::Failed(reason) => warn!(%stage, %reason, "failed"),
            other => info!(%stage, outcome = ?other),
        }
    }

    if let Some((stage, reason)) = report.failure() {
        bail!("{stage} stage failed: {reason}");
    }
    info!("all done");
    Ok(())
}
