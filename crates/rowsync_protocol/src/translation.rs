//! Merge results reported back to the client.

use crate::changes::{Ref, Row};
use std::collections::BTreeMap;

/// Primary-key translations for one table: client-assigned ref to
/// server-assigned ref. Serialized as a JSON object, so keys become
/// strings on the wire (`{"-1": 42}`).
pub type TableTranslations = BTreeMap<Ref, Ref>;

/// All translations produced by one merge session.
///
/// Produced once per session by the merge engine; consumed by server-side
/// FK repair and the client-side ref rewrite, never persisted beyond the
/// session directory.
pub type TranslationMap = BTreeMap<String, TableTranslations>;

/// Existing server rows that blocked an insert, per table.
///
/// The client overwrites its local copy with the canonical server row.
pub type UniqueConflicts = BTreeMap<String, Vec<Row>>;

/// Returns a table's translations ordered by descending new ref.
///
/// Rewriting in this order keeps a rewrite from colliding with a ref
/// that a later pair still has to move away from.
pub fn ordered_translations(translations: &TableTranslations) -> Vec<(Ref, Ref)> {
    let mut pairs: Vec<(Ref, Ref)> = translations.iter().map(|(f, t)| (*f, *t)).collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1));
    pairs
}
