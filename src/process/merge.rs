use anyhow::Result;
use std::path::Path;
use tracing::{info, instrument, warn};

use super::table::Table;

/// Concatenate the rows of `path_a` then `path_b` into `output_path`.
/// Returns the merged row count.
#[instrument(level = "info", skip_all, fields(a = %path_a.as_ref().display(), b = %path_b.as_ref().display()))]
pub fn merge_tables(
    path_a: impl AsRef<Path>,
    path_b: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
) -> Result<usize> {
    let output_path = output_path.as_ref();
    let mut merged = Table::load(path_a.as_ref())?;
    let other = Table::load(path_b.as_ref())?;

    if merged.headers != other.headers {
        warn!(
            a = ?merged.headers,
            b = ?other.headers,
            "report headers differ; aligning by column name"
        );
    }
    let (rows_a, rows_b) = (merged.num_rows(), other.num_rows());
    merged.append(other);

    merged.save(output_path)?;
    info!(
        output = %output_path.display(),
        rows_a,
        rows_b,
        rows = merged.num_rows(),
        "merged file saved"
    );
    Ok(merged.num_rows())
}
