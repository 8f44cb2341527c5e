//! Container teardown timing constants.

/// Minimum delay `syncingShutdown` waits between `SIGTERM`/`sync` and the
/// follow-up `SIGKILL`/`sync`. Exposed as a parameter by callers that need a
/// different value; this is the default (see DESIGN.md Open Question).
pub const SYNCING_SHUTDOWN_DELAY: std::time::Duration = std::time::Duration::from_millis(10);

/// Default grace period `stop` waits for init to exit after `SIGTERM`
/// before escalating to `SIGKILL`.
pub const STOP_GRACE_PERIOD: std::time::Duration = std::time::Duration::from_secs(5);
