//! Clean command implementation.

use rowsync_server::SessionDir;
use std::fs;
use std::path::Path;

/// Runs the clean command. Removes finished session directories under
/// `root`; with `all`, unfinished ones go too.
pub fn run(root: &Path, all: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut removed = 0;
    let mut kept = 0;

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(String::from) else {
            continue;
        };
        let Ok(session) = SessionDir::open(root, &name) else {
            continue;
        };
        let finished = session.status().map(|s| s.finished).unwrap_or(false);
        if finished || all {
            session.remove()?;
            println!("removed {name}");
            removed += 1;
        } else {
            kept += 1;
        }
    }

    println!("{removed} sessions removed, {kept} kept");
    Ok(())
}
