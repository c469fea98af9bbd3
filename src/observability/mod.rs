pub mod turn_stats;

use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::session::{TurnOutcome, TurnStatus};
use self::turn_stats::TurnStats;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (TRACE, DEBUG, INFO, ERROR)
pub fn init_tracing(log_level: &str) {
    let level = log_level.to_uppercase();

    if level == "DISABLED" {
        return;
    }

    let tracing_level = match level.as_str() {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    };

    let filter = EnvFilter::try_new(tracing_level).unwrap_or_else(|_| EnvFilter::new("INFO"));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Log a one-line summary of a settled turn.
pub fn log_turn_complete(thread_id: &str, outcome: &TurnOutcome, duration: Duration) {
    let stats = TurnStats::from_message(&outcome.message);
    let status = match &outcome.status {
        TurnStatus::Finished => "finished",
        TurnStatus::Cancelled => "cancelled",
        TurnStatus::Failed(_) => "failed",
    };
    tracing::info!(
        thread_id = thread_id,
        message_id = %outcome.message.id,
        status = status,
        text_parts = stats.text_parts,
        text_bytes = stats.text_bytes,
        tool_calls = stats.tool_calls,
        tools_complete = stats.complete,
        tools_error = stats.errored,
        tools_open = stats.calling,
        duration_seconds = duration.as_secs_f64(),
        "turn completed"
    );
}
