use anyhow::Result;
use arrow::{
    array::{ArrayRef, StringArray, TimestampMicrosecondArray, UInt32Array, UInt64Array},
    datatypes::{DataType as ArrowDataType, Field, Schema as ArrowSchema, TimeUnit},
};
use chrono::{DateTime, NaiveDate, Utc};
use std::{path::PathBuf, sync::Arc};

use crate::history::table_history::{HistoryRow, TableHistory};

/// A merged report that was handed to the mail relay.
pub struct DeliveredRow {
    pub filename: String,
    pub rows: u64,
    pub recipients: u32,
    pub size_bytes: u64,
    pub sent_at: DateTime<Utc>,
}

impl HistoryRow for DeliveredRow {
    const KEY_COLUMN: usize = 0;

    fn partition_date(&self) -> NaiveDate {
        self.sent_at.date_naive()
    }

    fn schema() -> ArrowSchema {
        ArrowSchema::new(vec![
            Field::new("filename", ArrowDataType::Utf8, false),
            Field::new("rows", ArrowDataType::UInt64, false),
            Field::new("recipients", ArrowDataType::UInt32, false),
            Field::new("size_bytes", ArrowDataType::UInt64, false),
            Field::new(
                "sent_at",
                ArrowDataType::Timestamp(TimeUnit::Microsecond, None),
                false,
            ),
        ])
    }

    fn to_arrays(&self) -> Vec<ArrayRef> {
        vec![
            Arc::new(StringArray::from(vec![self.filename.clone()])),
            Arc::new(UInt64Array::from(vec![self.rows])),
            Arc::new(UInt32Array::from(vec![self.recipients])),
            Arc::new(UInt64Array::from(vec![self.size_bytes])),
            Arc::new(TimestampMicrosecondArray::from(vec![self
                .sent_at
                .timestamp_micros()])),
        ]
    }

    fn unique_key(&self) -> String {
        self.filename.clone()
    }
}

impl TableHistory<DeliveredRow> {
    pub fn new_delivered(base: impl Into<PathBuf>) -> Result<Arc<Self>> {
        TableHistory::new(base, "delivered")
    }
}
