use anyhow::{Context, Result};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, instrument, warn};

use super::division::Division;
use crate::error::ReportError;

/// What happened to one division's download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameOutcome {
    Renamed { from: PathBuf, to: PathBuf },
    /// No fresh download, but today's renamed file is already there.
    AlreadyPresent { path: PathBuf },
    Missing { expected: PathBuf },
}

impl RenameOutcome {
    /// Path of the usable report, if there is one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            RenameOutcome::Renamed { to, .. } => Some(to),
            RenameOutcome::AlreadyPresent { path } => Some(path),
            RenameOutcome::Missing { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamedReports {
    pub foco: RenameOutcome,
    pub coco: RenameOutcome,
}

impl RenamedReports {
    pub fn get(&self, division: Division) -> &RenameOutcome {
        match division {
            Division::Foco => &self.foco,
            Division::Coco => &self.coco,
        }
    }

    /// Both report paths as `(foco, coco)`, or the first division that is missing.
    pub fn require(&self) -> Result<(PathBuf, PathBuf), ReportError> {
        let path_of = |division: Division| match self.get(division) {
            RenameOutcome::Renamed { to, .. } | RenameOutcome::AlreadyPresent { path: to } => {
                Ok(to.clone())
            }
            RenameOutcome::Missing { expected } => Err(ReportError::MissingReport {
                division,
                expected: expected.clone(),
            }),
        };
        Ok((path_of(Division::Foco)?, path_of(Division::Coco)?))
    }
}

/// `FOCO_2024-03-15.xlsx` style name for a division's report on `day`.
pub fn dated_name(division: Division, day: NaiveDate) -> String {
    format!("{}_{}.xlsx", division.label(), day.format("%Y-%m-%d"))
}

static DATED_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(FOCO|COCO)_(\d{4}-\d{2}-\d{2})(?:\.xlsx)?$").expect("valid regex")
});

/// Inverse of [`dated_name`]: the division and day encoded in a file name.
pub fn parse_dated_name(file_name: &str) -> Option<(Division, NaiveDate)> {
    let caps = DATED_NAME.captures(file_name)?;
    let division = Division::from_label(&caps[1])?;
    let day = NaiveDate::parse_from_str(&caps[2], "%Y-%m-%d").ok()?;
    Some((division, day))
}

/// Rename the two portal downloads in `download_dir` to date- and division-stamped names.
#[instrument(level = "info", skip_all, fields(dir = %download_dir.as_ref().display(), today = %today))]
pub fn rename_downloaded_files(
    download_dir: impl AsRef<Path>,
    today: NaiveDate,
) -> Result<RenamedReports> {
    let dir = download_dir.as_ref();
    let foco = rename_one(dir, Division::Foco, today)?;
    let coco = rename_one(dir, Division::Coco, today)?;
    Ok(RenamedReports { foco, coco })
}

fn rename_one(dir: &Path, division: Division, today: NaiveDate) -> Result<RenameOutcome> {
    let source = dir.join(division.download_name());
    let target = dir.join(dated_name(division, today));

    if source.is_file() {
        if target.exists() {
            warn!(target = %target.display(), "replacing earlier report from today");
        }
        fs::rename(&source, &target).with_context(|| {
            format!("renaming {} to {}", source.display(), target.display())
        })?;
        info!(from = %source.display(), to = %target.display(), "renamed");
        return Ok(RenameOutcome::Renamed {
            from: source,
            to: target,
        });
    }

    if target.is_file() {
        info!(path = %target.display(), "no new download; reusing today's file");
        return Ok(RenameOutcome::AlreadyPresent { path: target });
    }

    warn!(expected = %source.display(), %division, "download not found");
    Ok(RenameOutcome::Missing { expected: source })
}
