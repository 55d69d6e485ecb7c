//! Publish monitor - measures how long a publish takes to become visible
//! on every read endpoint and notification feed of every environment.

pub mod config;
pub mod environments;
pub mod error;
pub mod events;
pub mod feeds;
pub mod http;
pub mod monitoring;
pub mod orchestrator;
pub mod sink;
pub mod validation;

pub use config::Config;
pub use orchestrator::Orchestrator;
