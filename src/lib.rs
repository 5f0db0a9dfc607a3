#![forbid(unsafe_code)]

pub mod app;
pub mod catalog;
pub mod chapter_key;
pub mod cli;
pub mod commands;
pub mod config;
pub mod fetch;
pub mod formats;
pub mod logging;
pub mod mirror;
pub mod publish;
pub mod retry;
pub mod scrape;
pub mod source_url;
pub mod store;
pub mod sweep;
pub mod sync;
