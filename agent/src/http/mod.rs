//! Outbound HTTP collaborators

pub mod client;
pub mod diagnosis;
pub mod notify;
