//! Server-side session directories.
//!
//! One directory per upload session, named `{timestamp}_{user}`. The
//! input snapshot and result artifacts are each written to a temporary
//! name and atomically renamed, so a concurrent status poll never
//! observes a half-written file.

use std::fs;
use std::path::{Path, PathBuf};

use rowsync_protocol::{ChangeSet, SessionError, SessionStatus, Timestamp, TranslationMap, UniqueConflicts};
use serde::Serialize;
use tracing::debug;

use crate::error::{ServerError, ServerResult};

const CHANGES_FILE: &str = "changes.json";
const TRANSLATIONS_FILE: &str = "translated-ids.json";
const CONFLICTS_FILE: &str = "unique-conflicts.json";
const ERROR_FILE: &str = "error.json";

/// Replaces anything outside `[A-Za-z0-9_.-]` so a user label is safe
/// as a path component.
fn sanitize(user: &str) -> String {
    user.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// One session's directory on the server filesystem.
pub struct SessionDir {
    path: PathBuf,
    name: String,
}

impl SessionDir {
    /// Creates the directory for a new session and writes the input
    /// snapshot into it.
    pub fn create(
        root: &Path,
        sync_timestamp: Timestamp,
        user: &str,
        changes: &ChangeSet,
    ) -> ServerResult<Self> {
        let name = format!("{sync_timestamp}_{}", sanitize(user));
        let path = root.join(&name);
        fs::create_dir_all(&path)?;
        let dir = Self { path, name };
        dir.write_atomic(CHANGES_FILE, changes)?;
        debug!(dir = %dir.name, "session directory created");
        Ok(dir)
    }

    /// Opens an existing session directory by name.
    pub fn open(root: &Path, name: &str) -> ServerResult<Self> {
        // Names come in over the wire; never let them traverse out of
        // the sessions root.
        if name.is_empty() || name.contains('/') || name.contains("..") {
            return Err(ServerError::InvalidRequest(format!(
                "bad session name: {name}"
            )));
        }
        let path = root.join(name);
        if !path.is_dir() {
            return Err(ServerError::UnknownSession(name.to_string()));
        }
        Ok(Self {
            path,
            name: name.to_string(),
        })
    }

    /// The directory name reported to the client.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Filesystem path of the directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads back the uploaded change-set.
    pub fn read_changes(&self) -> ServerResult<ChangeSet> {
        let raw = fs::read(self.path.join(CHANGES_FILE))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Writes the success artifacts.
    pub fn write_results(
        &self,
        translations: &TranslationMap,
        conflicts: &UniqueConflicts,
    ) -> ServerResult<()> {
        self.write_atomic(TRANSLATIONS_FILE, translations)?;
        self.write_atomic(CONFLICTS_FILE, conflicts)?;
        Ok(())
    }

    /// Writes the failure artifact.
    pub fn write_error(&self, message: &str) -> ServerResult<()> {
        self.write_atomic(
            ERROR_FILE,
            &SessionError {
                message: message.to_string(),
            },
        )
    }

    /// Assembles the status a poller sees from whichever artifacts
    /// exist so far.
    pub fn status(&self) -> ServerResult<SessionStatus> {
        let error_path = self.path.join(ERROR_FILE);
        if error_path.is_file() {
            let error: SessionError = serde_json::from_slice(&fs::read(error_path)?)?;
            return Ok(SessionStatus {
                finished: true,
                translated_ids: None,
                unique_conflicts: None,
                error: Some(error),
            });
        }
        let translations_path = self.path.join(TRANSLATIONS_FILE);
        let conflicts_path = self.path.join(CONFLICTS_FILE);
        if translations_path.is_file() && conflicts_path.is_file() {
            let translated_ids: TranslationMap =
                serde_json::from_slice(&fs::read(translations_path)?)?;
            let unique_conflicts: UniqueConflicts =
                serde_json::from_slice(&fs::read(conflicts_path)?)?;
            return Ok(SessionStatus::finished(translated_ids, unique_conflicts));
        }
        Ok(SessionStatus::pending())
    }

    /// Removes the directory and everything in it.
    pub fn remove(self) -> ServerResult<()> {
        fs::remove_dir_all(&self.path)?;
        debug!(dir = %self.name, "session directory removed");
        Ok(())
    }

    /// Serializes `value` to `{file}.out`, then renames it into place.
    fn write_atomic<V: Serialize>(&self, file: &str, value: &V) -> ServerResult<()> {
        let tmp = self.path.join(format!("{file}.out"));
        let target = self.path.join(file);
        fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        fs::rename(&tmp, &target)?;
        Ok(())
    }
}
