//! Process configuration
//!
//! Settings that are fixed for the lifetime of the process. Live,
//! observer-editable settings are [`crate::options`].

mod config;

pub use config::{Config, WebConfig};
