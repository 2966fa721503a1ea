//! Status command implementation.

use std::path::Path;

/// Runs the status command.
pub fn run(dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let session = super::open_session(dir)?;
    let status = session.status()?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
