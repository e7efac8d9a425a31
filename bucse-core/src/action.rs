//! Action model & codec (spec §3.1, §4.4, §6.3).
//!
//! An `Action` is an immutable event record. It is the sole unit ever
//! appended to the repository's event log, and the sole thing the
//! reconciler applies to the in-memory projection.

use serde::{Deserialize, Serialize};

pub const MAX_STORAGE_NAME_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    AddFile,
    EditFile,
    RemoveFile,
    AddDirectory,
    RemoveDirectory,
}

impl ActionKind {
    pub fn is_file_kind(self) -> bool {
        matches!(self, ActionKind::AddFile | ActionKind::EditFile)
    }
}

/// An immutable event record (spec §3.1).
///
/// `content` is empty and `size`/`blockSize` are zero for directory and
/// remove actions; for `AddFile`/`EditFile`, `content.len() ==
/// ceil(size / blockSize)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub time: i64,
    #[serde(rename = "action")]
    pub kind: ActionKind,
    pub path: String,
    #[serde(default)]
    pub content: Vec<String>,
    #[serde(default)]
    pub size: i64,
    #[serde(default, rename = "blockSize")]
    pub block_size: i64,
}

impl Action {
    pub fn new_file(
        time: i64,
        kind: ActionKind,
        path: impl Into<String>,
        content: Vec<String>,
        size: i64,
        block_size: i64,
    ) -> Self {
        debug_assert!(kind.is_file_kind());
        Action {
            time,
            kind,
            path: path.into(),
            content,
            size,
            block_size,
        }
    }

    pub fn new_dir(time: i64, kind: ActionKind, path: impl Into<String>) -> Self {
        debug_assert!(matches!(
            kind,
            ActionKind::AddDirectory | ActionKind::RemoveDirectory
        ));
        Action {
            time,
            kind,
            path: path.into(),
            content: Vec::new(),
            size: 0,
            block_size: 0,
        }
    }

    pub fn new_remove_file(time: i64, path: impl Into<String>) -> Self {
        Action {
            time,
            kind: ActionKind::RemoveFile,
            path: path.into(),
            content: Vec::new(),
            size: 0,
            block_size: 0,
        }
    }
}

/// Ascending-by-time comparison used to sort `actionsPending` (spec §4.4).
/// Ties are broken by stable sort order (insertion order is preserved),
/// which is what makes equal-timestamp writes resolve last-writer-wins.
pub fn cmp_by_time(a: &Action, b: &Action) -> std::cmp::Ordering {
    a.time.cmp(&b.time)
}

/// Serializes a batch of actions as the singleton-or-batched JSON array
/// format described in spec §6.3. Local writers always emit a single
/// action per file (spec §4.7.3 step 8), but the format allows batching.
pub fn serialize_actions(actions: &[Action]) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(actions)
}

/// Parses a JSON array of action objects. Per spec §4.4, elements with an
/// unrecognized `action` kind are discarded (logged, not propagated as an
/// error) rather than failing the whole batch.
pub fn parse_actions(bytes: &[u8]) -> Result<Vec<Action>, serde_json::Error> {
    let values: Vec<serde_json::Value> = serde_json::from_slice(bytes)?;
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        match serde_json::from_value::<Action>(value) {
            Ok(action) => out.push(action),
            Err(err) => {
                tracing::warn!(error = %err, "discarding action with unrecognized kind");
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_file_action() {
        let a = Action::new_file(
            1_700_000_000_000_000,
            ActionKind::AddFile,
            "dir/file.txt",
            vec!["a".repeat(40), "b".repeat(40)],
            900,
            512,
        );
        let bytes = serialize_actions(std::slice::from_ref(&a)).unwrap();
        let parsed = parse_actions(&bytes).unwrap();
        assert_eq!(parsed, vec![a]);
    }

    #[test]
    fn round_trip_dir_action() {
        let a = Action::new_dir(42, ActionKind::AddDirectory, "d");
        let bytes = serialize_actions(std::slice::from_ref(&a)).unwrap();
        let parsed = parse_actions(&bytes).unwrap();
        assert_eq!(parsed, vec![a]);
    }

    #[test]
    fn unknown_kind_is_dropped_not_fatal() {
        let json = br#"[
            {"time": 1, "action": "addFile", "path": "a", "content": [], "size": 0, "blockSize": 0},
            {"time": 2, "action": "bogusKind", "path": "b", "content": [], "size": 0, "blockSize": 0}
        ]"#;
        let parsed = parse_actions(json).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].path, "a");
    }

    #[test]
    fn ascending_time_sort_is_stable() {
        let mut actions = vec![
            Action::new_remove_file(5, "x"),
            Action::new_remove_file(5, "y"),
            Action::new_remove_file(1, "z"),
        ];
        actions.sort_by(cmp_by_time);
        assert_eq!(actions[0].path, "z");
        assert_eq!(actions[1].path, "x");
        assert_eq!(actions[2].path, "y");
    }
}
