//! # gov_app
//!
//! Configuration, logging and service wiring shared by governance binaries

pub mod config_loader;
pub mod services;
pub mod tracing_setup;
