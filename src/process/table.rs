use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use rust_xlsxwriter::{Format, Workbook};
use std::path::Path;
use tracing::{debug, trace};

use crate::error::ReportError;

/// Number format applied to date-time cells on write.
const DATETIME_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

/// One spreadsheet cell, reduced to the value types a report carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Int(i64),
    Bool(bool),
    /// Excel serial date-time.
    DateTime(f64),
}

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&Data> for Cell {
    fn from(value: &Data) -> Self {
        match value {
            Data::Empty => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Int(*i),
            Data::Bool(b) => Cell::Bool(*b),
            Data::DateTime(dt) => Cell::DateTime(dt.as_f64()),
            // ISO date/duration strings and #N/A style errors keep their text form
            other => Cell::Text(other.to_string()),
        }
    }
}

/// A worksheet held in memory: one header row plus data rows of equal width.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Append a row, padding or truncating it to the header width.
    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.headers.len(), Cell::Empty);
        self.rows.push(row);
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.headers.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// All cells of the named column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&Cell>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// Insert `name` immediately right of `anchor`, filling every row with `fill`.
    /// Returns the new column's index, or `None` when `anchor` is absent.
    pub fn insert_column_after(&mut self, anchor: &str, name: &str, fill: Cell) -> Option<usize> {
        let at = self.column_index(anchor)? + 1;
        self.headers.insert(at, name.to_string());
        for row in &mut self.rows {
            row.insert(at, fill.clone());
        }
        Some(at)
    }

    /// Append `other`'s rows after ours, aligning columns by header name.
    /// A name that repeats (blank headers included) is matched occurrence by
    /// occurrence. Headers only `other` has are added at the end; missing
    /// cells stay empty. Returns the number of columns that had to be added.
    pub fn append(&mut self, other: Table) -> usize {
        let before = self.headers.len();
        if self.headers == other.headers {
            self.rows.extend(other.rows);
            return 0;
        }

        let mut mapping = Vec::with_capacity(other.headers.len());
        for (i, header) in other.headers.iter().enumerate() {
            let occurrence = other.headers[..i].iter().filter(|h| *h == header).count();
            let idx = match self.nth_column_index(header, occurrence) {
                Some(idx) => idx,
                None => {
                    self.headers.push(header.clone());
                    for row in &mut self.rows {
                        row.push(Cell::Empty);
                    }
                    self.headers.len() - 1
                }
            };
            mapping.push(idx);
        }

        let width = self.headers.len();
        for row in other.rows {
            let mut aligned = vec![Cell::Empty; width];
            for (cell, &idx) in row.into_iter().zip(&mapping) {
                aligned[idx] = cell;
            }
            self.rows.push(aligned);
        }
        width - before
    }

    fn nth_column_index(&self, name: &str, n: usize) -> Option<usize> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(_, h)| *h == name)
            .nth(n)
            .map(|(i, _)| i)
    }

    /// Read the first worksheet of `path`; its first row is the header.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut workbook = open_workbook_auto(path)
            .with_context(|| format!("opening workbook {}", path.display()))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| ReportError::EmptyWorkbook {
                path: path.to_path_buf(),
            })?
            .with_context(|| format!("reading first worksheet of {}", path.display()))?;

        let mut rows = range.rows();
        let header = rows.next().ok_or_else(|| ReportError::EmptyWorkbook {
            path: path.to_path_buf(),
        })?;
        let headers = header
            .iter()
            .map(|cell| match cell {
                Data::String(s) => s.trim().to_string(),
                Data::Empty => String::new(),
                other => other.to_string(),
            })
            .collect();

        let mut table = Table::new(headers);
        for row in rows {
            table.push_row(row.iter().map(Cell::from).collect());
        }
        debug!(
            path = %path.display(),
            rows = table.num_rows(),
            columns = table.num_columns(),
            "loaded table"
        );
        Ok(table)
    }

    /// Write the table as a single-sheet workbook; no index column is written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let mut workbook = Workbook::new();
        let header_format = Format::new().set_bold();
        let datetime_format = Format::new().set_num_format(DATETIME_FORMAT);
        let sheet = workbook.add_worksheet();

        for (c, header) in self.headers.iter().enumerate() {
            let col = u16::try_from(c).context("too many columns for a worksheet")?;
            sheet.write_string_with_format(0, col, header, &header_format)?;
        }

        for (r, row) in self.rows.iter().enumerate() {
            let row_num = u32::try_from(r + 1).context("too many rows for a worksheet")?;
            for (c, cell) in row.iter().enumerate() {
                let col = u16::try_from(c).context("too many columns for a worksheet")?;
                match cell {
                    Cell::Empty => {}
                    Cell::Text(s) => {
                        sheet.write_string(row_num, col, s)?;
                    }
                    Cell::Number(f) => {
                        sheet.write_number(row_num, col, *f)?;
                    }
                    Cell::Int(i) => {
                        sheet.write_number(row_num, col, *i as f64)?;
                    }
                    Cell::Bool(b) => {
                        sheet.write_boolean(row_num, col, *b)?;
                    }
                    Cell::DateTime(serial) => {
                        sheet.write_number_with_format(row_num, col, *serial, &datetime_format)?;
                    }
                }
            }
        }

        workbook
            .save(path)
            .with_context(|| format!("writing workbook {}", path.display()))?;
        trace!(path = %path.display(), rows = self.num_rows(), "saved table");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Table {
        let mut t = Table::new(vec!["Date".into(), "Branch".into(), "Sales".into()]);
        t.push_row(vec![
            Cell::DateTime(45366.0),
            Cell::text("Chennai"),
            Cell::Number(1250.5),
        ]);
        t.push_row(vec![Cell::DateTime(45367.0), Cell::text("Madurai"), Cell::Int(90)]);
        t
    }

    #[test]
    fn insert_after_anchor_keeps_other_columns_in_order() {
        let mut t = sample();
        let idx = t.insert_column_after("Branch", "Division", Cell::text("FOCO"));
        assert_eq!(idx, Some(2));
        assert_eq!(t.headers, vec!["Date", "Branch", "Division", "Sales"]);
        assert_eq!(t.num_rows(), 2);
        assert!(t.rows.iter().all(|r| r[2] == Cell::text("FOCO")));
        assert_eq!(t.rows[0][3], Cell::Number(1250.5));
    }

    #[test]
    fn insert_after_missing_anchor_leaves_table_alone() {
        let mut t = sample();
        let before = t.clone();
        assert_eq!(t.insert_column_after("Region", "Division", Cell::Empty), None);
        assert_eq!(t, before);
    }

    #[test]
    fn append_aligns_by_header_and_adds_new_columns() {
        let mut a = sample();
        let mut b = Table::new(vec!["Branch".into(), "Date".into(), "Margin".into()]);
        b.push_row(vec![Cell::text("Salem"), Cell::DateTime(45368.0), Cell::Number(3.5)]);

        let added = a.append(b);
        assert_eq!(added, 1);
        assert_eq!(a.headers, vec!["Date", "Branch", "Sales", "Margin"]);
        assert_eq!(a.num_rows(), 3);
        assert_eq!(a.rows[0][3], Cell::Empty);
        assert_eq!(
            a.rows[2],
            vec![
                Cell::DateTime(45368.0),
                Cell::text("Salem"),
                Cell::Empty,
                Cell::Number(3.5)
            ]
        );
    }

    fn with_blank_headers(label: &str) -> Table {
        let mut t = Table::new(vec!["Branch".into(), "".into(), "Qty".into(), "".into()]);
        t.push_row(vec![
            Cell::text(label),
            Cell::text(format!("{label}-note1")),
            Cell::Number(1.0),
            Cell::text(format!("{label}-note2")),
        ]);
        t
    }

    #[test]
    fn append_keeps_repeated_blank_headers_apart() {
        let mut a = with_blank_headers("COCO");
        let added = a.append(with_blank_headers("FOCO"));
        assert_eq!(added, 0);
        assert_eq!(a.headers, vec!["Branch", "", "Qty", ""]);
        assert_eq!(
            a.rows[1],
            vec![
                Cell::text("FOCO"),
                Cell::text("FOCO-note1"),
                Cell::Number(1.0),
                Cell::text("FOCO-note2")
            ]
        );
    }

    #[test]
    fn append_matches_repeated_headers_by_occurrence() {
        let mut a = with_blank_headers("COCO");
        let mut b = Table::new(vec!["".into(), "Qty".into(), "".into(), "Branch".into(), "".into()]);
        b.push_row(vec![
            Cell::text("n1"),
            Cell::Number(2.0),
            Cell::text("n2"),
            Cell::text("FOCO"),
            Cell::text("n3"),
        ]);

        let added = a.append(b);
        assert_eq!(added, 1);
        assert_eq!(a.headers, vec!["Branch", "", "Qty", "", ""]);
        assert_eq!(a.rows[0][4], Cell::Empty);
        assert_eq!(
            a.rows[1],
            vec![
                Cell::text("FOCO"),
                Cell::text("n1"),
                Cell::Number(2.0),
                Cell::text("n2"),
                Cell::text("n3")
            ]
        );
    }

    #[test]
    fn push_row_pads_short_rows() {
        let mut t = Table::new(vec!["a".into(), "b".into()]);
        t.push_row(vec![Cell::Int(1)]);
        assert_eq!(t.rows[0], vec![Cell::Int(1), Cell::Empty]);
    }

    #[test]
    fn save_then_load_preserves_headers_and_values() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("t.xlsx");
        let t = sample();
        t.save(&path)?;

        let back = Table::load(&path)?;
        assert_eq!(back.headers, t.headers);
        assert_eq!(back.num_rows(), 2);
        assert_eq!(back.rows[0][1], Cell::text("Chennai"));
        assert_eq!(back.rows[0][2], Cell::Number(1250.5));
        assert!(matches!(back.rows[1][2], Cell::Number(n) if n == 90.0) || back.rows[1][2] == Cell::Int(90));
        Ok(())
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(Table::load(dir.path().join("nope.xlsx")).is_err());
    }
}
