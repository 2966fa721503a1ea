//! Configuration for the sync server.

use std::path::PathBuf;

/// Configuration for a sync server instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory holding per-session subdirectories.
    pub sessions_dir: PathBuf,
    /// Maximum rows per table in one `load_changes` batch.
    pub batch_size: usize,
    /// Run the merge on the request thread instead of a background
    /// job. The client-visible contract (accept, then poll) is the
    /// same; tests use this for determinism.
    pub inline_merge: bool,
    /// User label for session directory names until an auth layer
    /// provides a real one.
    pub session_user: String,
}

impl ServerConfig {
    /// Creates a configuration rooted at the given sessions directory.
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
            batch_size: 100,
            inline_merge: false,
            session_user: "user".into(),
        }
    }

    /// Sets the `load_changes` batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Makes the merge run inline with the upload request.
    pub fn with_inline_merge(mut self, inline: bool) -> Self {
        self.inline_merge = inline;
        self
    }

    /// Sets the user label used in session directory names.
    pub fn with_session_user(mut self, user: impl Into<String>) -> Self {
        self.session_user = user.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let config = ServerConfig::new("/tmp/sessions")
            .with_batch_size(10)
            .with_inline_merge(true)
            .with_session_user("alice");
        assert_eq!(config.sessions_dir, PathBuf::from("/tmp/sessions"));
        assert_eq!(config.batch_size, 10);
        assert!(config.inline_merge);
        assert_eq!(config.session_user, "alice");
    }
}
