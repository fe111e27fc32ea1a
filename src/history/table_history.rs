use anyhow::{anyhow, Context, Result};
use arrow::{
    array::{ArrayRef, StringArray},
    datatypes::Schema as ArrowSchema,
    record_batch::RecordBatch,
};
use chrono::{NaiveDate, Utc};
use glob::{glob, Pattern};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use std::{
    collections::HashSet,
    fs::{self, File},
    io::BufWriter,
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};
use tracing::debug;

/// A row in a ledger table.
/// - Defines its Arrow schema and single-row arrays for writes.
/// - `KEY_COLUMN` holds the dedupe key that `unique_key` returns.
pub trait HistoryRow: Sized {
    /// Partition date for hive partitioning
    fn partition_date(&self) -> NaiveDate;
    fn schema() -> ArrowSchema;
    /// Column arrays matching `schema()`, one element each
    fn to_arrays(&self) -> Vec<ArrayRef>;
    fn unique_key(&self) -> String;
    /// Index of the Utf8 key column in the schema
    const KEY_COLUMN: usize;

    /// Read the dedupe key back out of a stored batch.
    fn extract_key(batch: &RecordBatch, row: usize) -> Result<String> {
        let arr = batch
            .column(Self::KEY_COLUMN)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| anyhow!("key column {} is not Utf8", Self::KEY_COLUMN))?;
        Ok(arr.value(row).to_string())
    }
}

/// Hive-partitioned table of single-row Parquet files:
/// `<base>/<table>/date=YYYYMMDD/<key>---<ts>.parquet`.
pub struct TableHistory<R: HistoryRow> {
    base_dir: PathBuf,
    table: String,
    schema: Arc<ArrowSchema>,
    seen: Mutex<HashSet<String>>,
    _marker: PhantomData<R>,
}

impl<R: HistoryRow> TableHistory<R> {
    /// Open the table, creating its directory, and load every stored key.
    pub fn new(base_dir: impl Into<PathBuf>, table: &str) -> Result<Arc<Self>> {
        let base_dir = base_dir.into();
        let table_dir = base_dir.join(table);
        fs::create_dir_all(&table_dir)
            .with_context(|| format!("could not create `{}`", table_dir.display()))?;

        let mut seen = HashSet::new();
        let pattern = format!(
            "{}/date=*/*.parquet",
            Pattern::escape(&table_dir.to_string_lossy())
        );
        for entry in glob(&pattern)? {
            let path = entry?;
            for key in read_keys::<R>(&path)? {
                seen.insert(key);
            }
        }
        debug!(table, keys = seen.len(), "loaded ledger");

        Ok(Arc::new(Self {
            base_dir,
            table: table.to_string(),
            schema: Arc::new(R::schema()),
            seen: Mutex::new(seen),
            _marker: PhantomData,
        }))
    }

    /// Append `row` unless its key is already recorded. Returns whether it was written.
    pub fn add(&self, row: &R) -> Result<bool> {
        let key = row.unique_key();
        {
            let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
            if !seen.insert(key.clone()) {
                return Ok(false);
            }
        }

        let partition = format!("date={}", row.partition_date().format("%Y%m%d"));
        let dir = self.base_dir.join(&self.table).join(partition);
        fs::create_dir_all(&dir)?;

        let ts = Utc::now().timestamp_micros();
        let fname = format!("{}---{}.parquet", key, ts);
        let tmp = dir.join(format!("{}.tmp", fname));
        let final_path = dir.join(&fname);

        let file = File::create(&tmp)
            .with_context(|| format!("creating ledger file {}", tmp.display()))?;
        let mut writer = ArrowWriter::try_new(BufWriter::new(file), self.schema.clone(), None)?;
        let batch = RecordBatch::try_new(self.schema.clone(), row.to_arrays())
            .context("building ledger record batch")?;
        writer.write(&batch)?;
        writer.close()?;
        fs::rename(&tmp, &final_path)?;
        Ok(true)
    }

    /// Whether a row with this key has been recorded
    pub fn get(&self, key: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}

fn read_keys<R: HistoryRow>(path: &Path) -> Result<Vec<String>> {
    let file =
        File::open(path).with_context(|| format!("failed to open `{}`", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
        .with_batch_size(1024)
        .build()?;
    let mut keys = Vec::new();
    for batch in reader {
        let batch = batch?;
        for i in 0..batch.num_rows() {
            keys.push(R::extract_key(&batch, i)?);
        }
    }
    Ok(keys)
}

// ----- Tests -----
#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::delivered::DeliveredRow;
    use chrono::Utc;
    use tempfile::tempdir;

    fn row(name: &str) -> DeliveredRow {
        DeliveredRow {
            filename: name.to_string(),
            rows: 12,
            recipients: 3,
            size_bytes: 4096,
            sent_at: Utc::now(),
        }
    }

    fn parquet_files(base: &Path) -> usize {
        glob(&format!("{}/delivered/date=*/*.parquet", base.display()))
            .unwrap()
            .filter_map(Result::ok)
            .count()
    }

    #[test]
    fn test_add_and_get() {
        let tmp = tempdir().unwrap();
        let hist = TableHistory::<DeliveredRow>::new_delivered(tmp.path()).unwrap();
        let r = row("Merged_COCO_FOCO_2024-12-15.xlsx");

        assert!(!hist.get(&r.unique_key()));
        assert!(hist.add(&r).unwrap());
        assert!(hist.get(&r.unique_key()));
        assert_eq!(parquet_files(tmp.path()), 1);
    }

    #[test]
    fn test_deduplication() {
        let tmp = tempdir().unwrap();
        let hist = TableHistory::<DeliveredRow>::new_delivered(tmp.path()).unwrap();
        let r = row("Merged_COCO_FOCO_2024-12-16.xlsx");

        assert!(hist.add(&r).unwrap());
        assert!(!hist.add(&r).unwrap());
        assert_eq!(parquet_files(tmp.path()), 1);
    }

    #[test]
    fn test_persistence_across_restarts() {
        let tmp = tempdir().unwrap();
        let key = {
            let hist = TableHistory::<DeliveredRow>::new_delivered(tmp.path()).unwrap();
            let r = row("Merged_COCO_FOCO_2024-12-17.xlsx");
            hist.add(&r).unwrap();
            r.unique_key()
        };

        let reopened = TableHistory::<DeliveredRow>::new_delivered(tmp.path()).unwrap();
        assert!(reopened.get(&key));
        assert!(!reopened.get("Merged_COCO_FOCO_2024-12-18.xlsx"));
    }
}
