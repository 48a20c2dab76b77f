use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection settings for the SQLite record store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub max_connections: u32,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl StoreConfig {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_connections: 8,
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }
}

/// What the client does with an optimistic message bubble when the server
/// refuses the send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendFailurePolicy {
    /// Leave the bubble in the transcript, flagged as failed.
    #[default]
    KeepOptimistic,
    /// Remove the bubble again.
    RollBack,
}

/// Polling cadence and teardown settings for the client synchronizer.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub friend_list_interval: Duration,
    pub request_interval: Duration,
    pub conversation_interval: Duration,
    /// Upper bound on waiting for the cycles to stop during teardown.
    pub shutdown_timeout: Duration,
    pub send_failure_policy: SendFailurePolicy,
}

impl SyncConfig {
    pub fn with_friend_list_interval(mut self, interval: Duration) -> Self {
        self.friend_list_interval = interval;
        self
    }

    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.request_interval = interval;
        self
    }

    pub fn with_conversation_interval(mut self, interval: Duration) -> Self {
        self.conversation_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_send_failure_policy(mut self, policy: SendFailurePolicy) -> Self {
        self.send_failure_policy = policy;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            friend_list_interval: Duration::from_millis(2_000),
            request_interval: Duration::from_millis(20_000),
            conversation_interval: Duration::from_millis(2_000),
            shutdown_timeout: Duration::from_secs(2),
            send_failure_policy: SendFailurePolicy::default(),
        }
    }
}
