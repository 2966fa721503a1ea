//! Configuration for the sync client.

use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Server URL, informational for transports that need it.
    pub server_url: String,
    /// Status-poll behavior while the server processes an upload.
    pub poll: PollConfig,
    /// Iteration cap for the download changes loop.
    pub changes_loop_cap: u32,
}

impl SyncConfig {
    /// Creates a configuration for the given server.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            poll: PollConfig::default(),
            changes_loop_cap: 200,
        }
    }

    /// Sets the status-poll configuration.
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Sets the download changes loop cap.
    pub fn with_changes_loop_cap(mut self, cap: u32) -> Self {
        self.changes_loop_cap = cap;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Configuration for the upload-status poller.
///
/// The poll ends either when the attempt budget runs out or when the
/// overall deadline passes, whichever comes first.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Maximum number of status requests.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Overall deadline for the whole poll.
    pub deadline: Option<Duration>,
}

impl PollConfig {
    /// Creates a poll configuration with the given attempt budget.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            deadline: Some(Duration::from_secs(60)),
        }
    }

    /// A configuration that checks once and gives up.
    pub fn single_shot() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            deadline: None,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the overall deadline; `None` disables it.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Delay to wait before the given attempt (0-indexed). The first
    /// attempt runs immediately.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new(60)
    }
}
