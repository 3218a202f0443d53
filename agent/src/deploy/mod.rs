//! Deployment pipeline

pub mod command;
pub mod git;
pub mod install;
pub mod locks;
pub mod pipeline;
pub mod probe;
pub mod report;
pub mod service;
pub mod stages;
