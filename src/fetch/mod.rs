// src/fetch/mod.rs
//
// Everything that talks to the dealer portal through the browser.

pub mod downloads;
pub mod locators;
pub mod page;
pub mod reports;
pub mod session;
pub mod window;

pub use reports::{download_reports, DownloadedReport};
pub use session::Session;
pub use window::ReportWindow;
