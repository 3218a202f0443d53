//! deploybot library
//!
//! Sequential deployment pipeline (fetch, install, start, verify) exposed
//! over HTTP, with best-effort AI diagnosis and push notifications.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod http;
pub mod logs;
pub mod models;
pub mod server;
pub mod storage;
pub mod utils;
