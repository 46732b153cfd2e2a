use std::path::PathBuf;

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Application-level constants
pub const APP_NAME: &str = "Adhera";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when RUST_LOG is unset.
pub fn default_log_filter() -> String {
    "info".to_string()
}

/// Get the application data directory
/// ~/Adhera/ on all platforms (user-visible, per design requirement)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("Adhera")
}

/// Default location of the engine database file.
pub fn default_database_path() -> PathBuf {
    app_data_dir().join("adhera.db")
}

/// Adherence policy knobs. These are deployment configuration, not
/// structure: the state machine reads them, it never hard-codes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnginePolicy {
    /// Minutes after the scheduled moment during which a taken dose
    /// still counts as on-time.
    pub grace_minutes: i64,
    /// Minutes a snooze defers a pending dose.
    pub snooze_interval_minutes: i64,
    /// Maximum snoozes per dose event.
    pub max_snoozes: u32,
    /// Rolling lookahead of the schedule compiler, in days.
    pub horizon_days: i64,
    /// Reminder length assumed for imported records without a range.
    pub default_course_days: i64,
    /// How many recent events the full overview returns.
    pub recent_events_limit: u32,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            grace_minutes: 30,
            snooze_interval_minutes: 10,
            max_snoozes: 3,
            horizon_days: 14,
            default_course_days: 30,
            recent_events_limit: 20,
        }
    }
}

impl EnginePolicy {
    pub fn grace_window(&self) -> Duration {
        Duration::minutes(self.grace_minutes)
    }

    pub fn snooze_interval(&self) -> Duration {
        Duration::minutes(self.snooze_interval_minutes)
    }
}
