use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::process::Division;

/// Named failures the pipeline reports instead of letting a bad value flow downstream.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("{division} report not found (expected {})", expected.display())]
    MissingReport {
        division: Division,
        expected: PathBuf,
    },

    #[error("column \"{column}\" not found in {}", path.display())]
    MissingColumn { column: String, path: PathBuf },

    #[error("workbook {} has no worksheet with a header row", path.display())]
    EmptyWorkbook { path: PathBuf },

    #[error("timed out after {timeout:?} waiting for element \"{locator}\"")]
    ElementTimeout { locator: String, timeout: Duration },

    #[error("timed out after {timeout:?} waiting for download {}", path.display())]
    DownloadTimeout { path: PathBuf, timeout: Duration },

    #[error("environment variable {name} must be set")]
    MissingSecret { name: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_report_names_division_and_path() {
        let e = ReportError::MissingReport {
            division: Division::Coco,
            expected: PathBuf::from("dl/Sales_Gross_Margin (1).xlsx"),
        };
        assert_eq!(
            e.to_string(),
            "COCO report not found (expected dl/Sales_Gross_Margin (1).xlsx)"
        );
    }

    #[test]
    fn missing_column_display() {
        let e = ReportError::MissingColumn {
            column: "Branch".to_string(),
            path: PathBuf::from("a.xlsx"),
        };
        assert_eq!(e.to_string(), r#"column "Branch" not found in a.xlsx"#);
    }

    #[test]
    fn missing_secret_display() {
        let e = ReportError::MissingSecret {
            name: "DMS_PORTAL_PASSWORD",
        };
        assert_eq!(
            e.to_string(),
            "environment variable DMS_PORTAL_PASSWORD must be set"
        );
    }
}
