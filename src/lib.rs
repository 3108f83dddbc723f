//! Passive logger of workstation activity. A background daemon records which application has
//! focus, which website is open in the browser, idle periods and diffs of changed source files.
//! Everything stays in local json record files which the cli can summarize.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod utils;
pub mod window_api;
