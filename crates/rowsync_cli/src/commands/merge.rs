//! Merge command implementation.
//!
//! Replays a session directory's change-set against a freshly seeded
//! in-memory store. Useful for reproducing a failed merge away from
//! production: feed it the schema, a data snapshot and the session
//! directory, and inspect the artifacts it writes back.

use rowsync_store::{MemoryStorage, Schema, Storage};
use rowsync_server::MergeEngine;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Runs the merge command.
pub fn run(
    dir: &Path,
    schema_path: &Path,
    data_path: Option<&Path>,
    timestamp: Option<i64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = super::open_session(dir)?;
    let schema: Schema = serde_json::from_slice(&fs::read(schema_path)?)?;
    let store = Arc::new(MemoryStorage::new(schema));

    if let Some(path) = data_path {
        seed(store.as_ref(), path)?;
    }

    let sync_timestamp = match timestamp {
        Some(ts) => ts,
        None => session
            .name()
            .split('_')
            .next()
            .and_then(|prefix| prefix.parse().ok())
            .ok_or("session name carries no timestamp; pass --timestamp")?,
    };

    let changes = session.read_changes()?;
    info!(dir = session.name(), sync_timestamp, "replaying merge");

    match MergeEngine::new(store).apply(&changes, sync_timestamp) {
        Ok((translations, conflicts)) => {
            session.write_results(&translations, &conflicts)?;
            let pairs: usize = translations.values().map(|m| m.len()).sum();
            let collisions: usize = conflicts.values().map(|r| r.len()).sum();
            println!("✓ Merge finished: {pairs} translations, {collisions} unique conflicts");
            Ok(())
        }
        Err(err) => {
            session.write_error(&err.to_string())?;
            println!("✗ Merge failed: {err}");
            Err(err.into())
        }
    }
}

/// Loads a JSON object mapping table names (shadow tables included) to
/// row arrays. Loading runs with referential integrity off so the file
/// does not have to be ordered.
fn seed(store: &dyn Storage, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let data: BTreeMap<String, Vec<Value>> = serde_json::from_slice(&fs::read(path)?)?;
    store.set_referential_integrity(false)?;
    let result = (|| -> Result<(), Box<dyn std::error::Error>> {
        for (table, rows) in &data {
            for value in rows {
                let row = value
                    .as_object()
                    .ok_or_else(|| format!("row in '{table}' is not an object"))?;
                store.insert(table, row.clone())?;
            }
        }
        Ok(())
    })();
    store.set_referential_integrity(true)?;
    result
}
