//! Show command implementation.

use serde_json::json;
use std::path::Path;

/// Runs the show command.
pub fn run(dir: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let session = super::open_session(dir)?;
    let changes = session.read_changes()?;

    match format {
        "json" => {
            let summary: Vec<_> = changes
                .iter()
                .map(|(table, tc)| {
                    json!({
                        "table": table,
                        "inserts": tc.inserts.len(),
                        "updates": tc.updates.len(),
                        "deletes": tc.deletes.len(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        "text" => {
            println!("Session {}", session.name());
            if changes.is_empty() {
                println!("  (empty change-set)");
            }
            for (table, tc) in &changes {
                println!(
                    "  {}: {} inserts, {} updates, {} deletes",
                    table,
                    tc.inserts.len(),
                    tc.updates.len(),
                    tc.deletes.len()
                );
                for del in &tc.deletes {
                    match del.last_modified {
                        Some(ts) => println!("    delete ref {} (version {})", del.ref_, ts),
                        None => println!("    delete ref {} (never synced)", del.ref_),
                    }
                }
            }
        }
        other => return Err(format!("unknown format: {other}").into()),
    }
    Ok(())
}
