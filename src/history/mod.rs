// src/history/mod.rs

use anyhow::{Context, Result};
use serde::Serialize;
use std::{fs, path::PathBuf, sync::Arc};

pub mod delivered;
pub mod downloaded;
pub mod table_history;

pub use delivered::DeliveredRow;
pub use downloaded::DownloadedRow;
pub use table_history::{HistoryRow, TableHistory};

/// What the ledger knows about one file name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FileStatus {
    pub downloaded: bool,
    pub delivered: bool,
}

/// The run ledger: what was downloaded and what was mailed.
pub struct Ledger {
    pub downloaded: Arc<TableHistory<DownloadedRow>>,
    pub delivered: Arc<TableHistory<DeliveredRow>>,
}

impl Ledger {
    /// Open both tables under `history_dir`, creating it if needed.
    pub fn open(history_dir: impl Into<PathBuf>) -> Result<Self> {
        let history_dir = history_dir.into();
        fs::create_dir_all(&history_dir)
            .with_context(|| format!("creating history directory {:?}", &history_dir))?;
        Ok(Self {
            downloaded: TableHistory::new_downloaded(&history_dir)?,
            delivered: TableHistory::new_delivered(&history_dir)?,
        })
    }

    /// Look `file_name` up in both tables, e.g. `FOCO_2024-12-15.xlsx`
    /// or `Merged_COCO_FOCO_2024-12-15.xlsx`.
    pub fn status(&self, file_name: &str) -> FileStatus {
        FileStatus {
            downloaded: self.downloaded.get(file_name),
            delivered: self.delivered.get(file_name),
        }
    }
}
