//! CLI command implementations.

pub mod clean;
pub mod merge;
pub mod show;
pub mod status;

use rowsync_server::SessionDir;
use std::path::Path;

/// Opens a session directory given its filesystem path.
pub fn open_session(path: &Path) -> Result<SessionDir, Box<dyn std::error::Error>> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| format!("not a session directory: {}", path.display()))?;
    let root = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(SessionDir::open(root, name)?)
}
