// src/process/mod.rs
pub mod division;
pub mod merge;
pub mod rename;
pub mod table;

pub use division::{insert_division_column, Division, ANCHOR_COLUMN, DIVISION_COLUMN};
pub use merge::merge_tables;
pub use rename::{dated_name, parse_dated_name, rename_downloaded_files, RenameOutcome, RenamedReports};
pub use table::{Cell, Table};
