//! Reconciler (spec §4.6, C6): owns the append-only action log and its
//! staging area, ingests batches from the object store, detects
//! out-of-order (undo/redo) arrivals, and replays them into a `Projection`.

use crate::action::{cmp_by_time, parse_actions, Action, ActionKind};
use crate::error::{BucseError, Result};
use crate::projection::Projection;

/// The ordered, already-applied action log plus the staging area for
/// batches still being ingested (spec §4.6 `actions`/`actionsPending`).
pub struct Reconciler {
    /// All actions applied to `projection`, in ascending time order.
    applied: Vec<Action>,
    /// Actions received but not yet folded into `applied` + `projection`
    /// because more of the same batch was still arriving.
    pending: Vec<Action>,
    projection: Projection,
    /// Repository creation time (control blob's `time`, spec §6.2), used to
    /// seed the root directory's atime/mtime and to re-seed a fresh
    /// `Projection` on full replay.
    created_at: i64,
}

impl Reconciler {
    pub fn new(created_at: i64) -> Self {
        Reconciler {
            applied: Vec::new(),
            pending: Vec::new(),
            projection: Projection::new(created_at),
            created_at,
        }
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn projection_mut(&mut self) -> &mut Projection {
        &mut self.projection
    }

    pub fn applied_actions(&self) -> &[Action] {
        &self.applied
    }

    /// Stages a decrypted action-file payload. Call with `more_in_batch` as
    /// reported by the object store; when `false`, the staged batch is
    /// sorted and folded in (spec §4.6 step 3).
    pub fn ingest(&mut self, bytes: &[u8], more_in_batch: bool) -> Result<()> {
        let parsed = parse_actions(bytes).map_err(|e| BucseError::MalformedAction(e.to_string()))?;
        self.pending.extend(parsed);
        if !more_in_batch {
            self.flush_pending()?;
        }
        Ok(())
    }

    /// Folds all staged actions into the log, in time order. If any staged
    /// action is older than the last applied action, the whole log is
    /// replayed from scratch against a fresh projection (spec §4.6 "out of
    /// order arrival" / §9 open question: replay-from-scratch is simpler
    /// and cheap enough at bucse's scale than point-in-time undo/redo).
    fn flush_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let out_of_order = self
            .applied
            .last()
            .map(|last| self.pending.iter().any(|a| a.time < last.time))
            .unwrap_or(false);
        let new_count = self.pending.len();

        self.applied.append(&mut self.pending);
        self.applied.sort_by(cmp_by_time);

        if out_of_order {
            self.replay_all()
        } else {
            // No existing action is newer than any staged one, so sorting
            // only orders within the newly appended tail.
            let start = self.applied.len() - new_count;
            self.apply_range(start)
        }
    }

    /// Rebuilds the projection from an empty state by replaying the whole
    /// log (spec §4.6 undo/redo posture).
    fn replay_all(&mut self) -> Result<()> {
        self.projection = Projection::new(self.created_at);
        self.apply_range(0)
    }

    fn apply_range(&mut self, start: usize) -> Result<()> {
        for i in start..self.applied.len() {
            apply_one(&mut self.projection, &self.applied[i]);
        }
        Ok(())
    }
}

/// Applies a single action to the projection, following spec §4.6's
/// "precondition checks are best-effort" posture: apply errors are logged
/// and the action is skipped rather than aborting the whole replay, since
/// divergent peers must still converge eventually.
fn apply_one(projection: &mut Projection, action: &Action) {
    let result = match action.kind {
        ActionKind::AddDirectory => {
            let (parent, leaf) = match projection.resolve_containing_dir(&action.path) {
                Ok(v) => v,
                Err(e) => return log_skip(action, e),
            };
            projection.insert_dir(parent, leaf, action.time).map(|_| ())
        }
        // Spec §4.6 apply-semantics table: a replayed/remote RemoveDirectory
        // recursively frees the subtree, unlike the local `rmdir` call site
        // (ops.rs), which enforces POSIX's empty-directory precondition.
        ActionKind::RemoveDirectory => projection
            .resolve_dir(&action.path)
            .and_then(|id| projection.remove_recursive(id)),
        ActionKind::AddFile => {
            let (parent, leaf) = match projection.resolve_containing_dir(&action.path) {
                Ok(v) => v,
                Err(e) => return log_skip(action, e),
            };
            projection
                .insert_file(
                    parent,
                    leaf,
                    action.content.clone(),
                    action.size,
                    action.block_size,
                    action.time,
                )
                .map(|_| ())
        }
        ActionKind::EditFile => match projection.resolve_file(&action.path) {
            Ok(id) => {
                if let Ok(f) = projection.file_mut(id) {
                    f.content = action.content.clone();
                    f.size = action.size;
                    f.block_size = action.block_size;
                    f.mtime = action.time;
                }
                Ok(())
            }
            Err(e) => Err(e),
        },
        ActionKind::RemoveFile => projection
            .resolve_file(&action.path)
            .and_then(|id| projection.remove(id)),
    };
    if let Err(e) = result {
        log_skip(action, e);
    }
}

fn log_skip(action: &Action, err: BucseError) {
    tracing::warn!(path = %action.path, kind = ?action.kind, error = %err, "dropping unapplicable action during replay");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::serialize_actions;

    fn add_dir(time: i64, path: &str) -> Action {
        Action::new_dir(time, ActionKind::AddDirectory, path.to_string())
    }

    fn add_file(time: i64, path: &str, content: Vec<&str>, size: i64) -> Action {
        Action::new_file(
            time,
            ActionKind::AddFile,
            path.to_string(),
            content.into_iter().map(String::from).collect(),
            size,
            4096,
        )
    }

    #[test]
    fn ingest_single_batch_applies_in_order() {
        let mut r = Reconciler::new(0);
        let actions = vec![add_dir(1, "docs"), add_file(2, "docs/a.txt", vec!["b1"], 3)];
        let bytes = serialize_actions(&actions).unwrap();
        r.ingest(&bytes, false).unwrap();

        assert!(r.projection().resolve_dir("docs").is_ok());
        assert!(r.projection().resolve_file("docs/a.txt").is_ok());
    }

    #[test]
    fn multi_part_batch_waits_for_last_part() {
        let mut r = Reconciler::new(0);
        let first = serialize_actions(&[add_dir(1, "docs")]).unwrap();
        r.ingest(&first, true).unwrap();
        assert!(r.projection().resolve_dir("docs").is_err());

        let second = serialize_actions(&[add_file(2, "docs/a.txt", vec![], 0)]).unwrap();
        r.ingest(&second, false).unwrap();
        assert!(r.projection().resolve_dir("docs").is_ok());
        assert!(r.projection().resolve_file("docs/a.txt").is_ok());
    }

    #[test]
    fn out_of_order_arrival_triggers_full_replay() {
        let mut r = Reconciler::new(0);
        r.ingest(&serialize_actions(&[add_dir(10, "docs")]).unwrap(), false)
            .unwrap();
        r.ingest(
            &serialize_actions(&[add_dir(5, "early")]).unwrap(),
            false,
        )
        .unwrap();

        assert!(r.projection().resolve_dir("docs").is_ok());
        assert!(r.projection().resolve_dir("early").is_ok());
        assert_eq!(r.applied_actions()[0].path, "early");
    }

    #[test]
    fn unresolvable_action_is_skipped_not_fatal() {
        let mut r = Reconciler::new(0);
        let actions = vec![add_file(1, "nope/a.txt", vec![], 0)];
        r.ingest(&serialize_actions(&actions).unwrap(), false)
            .unwrap();
        assert!(r.projection().resolve_file("nope/a.txt").is_err());
    }

    #[test]
    fn remove_directory_recursively_frees_nonempty_subtree_on_apply() {
        // spec §4.6 apply-semantics table: RemoveDirectory on a replayed
        // action recursively frees, unlike the emptiness-checked local
        // `rmdir`. A RemoveDirectory for "docs" must clear "docs/a.txt" too.
        let mut r = Reconciler::new(0);
        let actions = vec![
            add_dir(1, "docs"),
            add_file(2, "docs/a.txt", vec!["b1"], 3),
            Action::new_dir(3, ActionKind::RemoveDirectory, "docs".to_string()),
        ];
        r.ingest(&serialize_actions(&actions).unwrap(), false)
            .unwrap();
        assert!(r.projection().resolve_dir("docs").is_err());
        assert!(r.projection().resolve_file("docs/a.txt").is_err());
    }

    #[test]
    fn directory_rename_survives_full_replay() {
        // A directory rename must emit per-child actions (spec §4.7.5), not
        // just a pair of directory-level add/remove actions — otherwise
        // replaying the log from scratch loses the children (spec §8.1.7
        // replay idempotence).
        let mut r = Reconciler::new(0);
        let actions = vec![
            add_dir(1, "d"),
            add_file(1, "d/file.txt", vec!["b1"], 3),
            add_dir(2, "e"),
            add_file(2, "e/file.txt", vec!["b1"], 3),
            Action::new_dir(2, ActionKind::RemoveDirectory, "d".to_string()),
        ];
        r.ingest(&serialize_actions(&actions).unwrap(), false)
            .unwrap();
        assert!(r.projection().resolve_dir("d").is_err());
        assert!(r.projection().resolve_file("e/file.txt").is_ok());
    }
}
