pub mod config;
pub mod error;
pub mod fetch;
pub mod history;
pub mod notify;
pub mod pipeline;
pub mod process;
