use chrono::{Datelike, Days, NaiveDate};
use std::fmt;

/// Format the portal's date-range picker expects.
pub const PICKER_FORMAT: &str = "%d-%m-%Y";

/// Date range requested from the portal: first of the current month through yesterday.
///
/// On the first day of a month `end` falls in the previous month, so `start` is
/// after `end`. The portal is asked for exactly that; nothing here corrects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ReportWindow {
    pub fn for_day(today: NaiveDate) -> Self {
        let start = today - Days::new(u64::from(today.day0()));
        let end = today - Days::new(1);
        Self { start, end }
    }

    pub fn start_text(&self) -> String {
        self.start.format(PICKER_FORMAT).to_string()
    }

    pub fn end_text(&self) -> String {
        self.end.format(PICKER_FORMAT).to_string()
    }
}

impl fmt::Display for ReportWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.start_text(), self.end_text())
    }
}
