use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path};
use tracing::{info, instrument};

use super::table::{Cell, Table};
use crate::error::ReportError;

/// Column the division label is placed next to.
pub const ANCHOR_COLUMN: &str = "Branch";
/// Name of the inserted column.
pub const DIVISION_COLUMN: &str = "Division";

/// Business division a downloaded report belongs to.
///
/// The portal hands them out in a fixed order: the first download is FOCO, the
/// second (after switching the selector) is COCO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Division {
    Foco,
    Coco,
}

impl Division {
    /// Download order.
    pub const ALL: [Division; 2] = [Division::Foco, Division::Coco];

    pub fn label(&self) -> &'static str {
        match self {
            Division::Foco => "FOCO",
            Division::Coco => "COCO",
        }
    }

    /// File name the browser gives this division's download.
    pub fn download_name(&self) -> &'static str {
        match self {
            Division::Foco => "Sales_Gross_Margin.xlsx",
            Division::Coco => "Sales_Gross_Margin (1).xlsx",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "FOCO" => Some(Division::Foco),
            "COCO" => Some(Division::Coco),
            _ => None,
        }
    }
}

impl fmt::Display for Division {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Load `file_path`, add a `Division` column right of `Branch` holding `label`
/// on every row, and write the result to `output_path`. Returns the row count.
///
/// Nothing is written when `Branch` is missing.
#[instrument(level = "info", skip_all, fields(input = %file_path.as_ref().display(), label = %label))]
pub fn insert_division_column(
    file_path: impl AsRef<Path>,
    label: &str,
    output_path: impl AsRef<Path>,
) -> Result<usize> {
    let file_path = file_path.as_ref();
    let output_path = output_path.as_ref();

    let mut table = Table::load(file_path)?;
    if table
        .insert_column_after(ANCHOR_COLUMN, DIVISION_COLUMN, Cell::text(label))
        .is_none()
    {
        return Err(ReportError::MissingColumn {
            column: ANCHOR_COLUMN.to_string(),
            path: file_path.to_path_buf(),
        }
        .into());
    }

    table.save(output_path)?;
    info!(
        output = %output_path.display(),
        rows = table.num_rows(),
        "processed file saved"
    );
    Ok(table.num_rows())
}
