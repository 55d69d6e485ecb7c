//! Shared tracing setup for the publish monitor binaries.

mod subscriber;

pub use subscriber::{LogFormat, init_tracing, parse_level};
pub use tracing::level_filters::LevelFilter;
