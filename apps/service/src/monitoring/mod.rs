/// Monitoring engine module - decides when a publish is visible everywhere
///
/// This module is responsible for:
/// - Probing read endpoints and notification feeds for a publish
/// - Scheduling one timed polling loop per check and environment
/// - Recognising superseded publishes
/// - Keeping the recent outcome history
pub mod checker;
pub mod executor;
pub mod history;
pub mod rule;
pub mod scheduler;
pub mod types;

pub use executor::CheckExecutor;
pub use history::History;
pub use scheduler::{MetricSink, Scheduler};
pub use types::{CheckKind, CheckOutcome, Interval, OutcomeRecord, PublishAttempt, PublishMetric};
