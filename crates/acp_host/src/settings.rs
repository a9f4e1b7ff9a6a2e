use std::env;
use std::time::Duration;

pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(50);

pub const VERBOSE_ENV: &str = "ACP_VERBOSE";
pub const TIMING_ENV: &str = "ACP_TIMING";
pub const BATCHING_ENV: &str = "ACP_BATCHING";
pub const BATCH_MS_ENV: &str = "ACP_BATCH_MS";

/// Runtime knobs for the host engine, defaulted from the environment and
/// overridable through the client builder.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Per-frame debug logging (`ACP_VERBOSE=1`).
    pub verbose: bool,
    /// Structured timing metrics for requests and prompt turns
    /// (`ACP_TIMING=1`).
    pub timing: bool,
    /// Coalesce streaming updates into batched deliveries; `ACP_BATCHING=0`
    /// disables.
    pub batching: bool,
    /// Batch window (`ACP_BATCH_MS`, milliseconds).
    pub batch_window: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            verbose: false,
            timing: false,
            batching: true,
            batch_window: DEFAULT_BATCH_WINDOW,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();
        if lookup(VERBOSE_ENV).as_deref() == Some("1") {
            settings.verbose = true;
        }
        if lookup(TIMING_ENV).as_deref() == Some("1") {
            settings.timing = true;
        }
        if lookup(BATCHING_ENV).as_deref() == Some("0") {
            settings.batching = false;
        }
        if let Some(ms) = lookup(BATCH_MS_ENV).and_then(|v| v.trim().parse::<u64>().ok()) {
            settings.batch_window = Duration::from_millis(ms);
        }
        settings
    }
}
