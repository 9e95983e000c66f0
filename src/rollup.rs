//! Streaming rollup aggregation
//!
//! Consumes one completion record per walked directory and emits exactly
//! one recursive rollup per directory, as soon as that directory and all
//! of its descendants have completed. Children are folded into parents as
//! they arrive, so only directories whose aggregation is still pending are
//! held in memory - never the whole tree.
//!
//! Because the walk is concurrent, a child directory may complete before
//! its parent's completion record is observed. Such contributions are
//! parked in an orphan bucket keyed by the parent id and folded in when
//! the parent's own record shows up.

use crate::cancel::CancelToken;
use crate::entry::{DirCompletion, Rollup};
use crate::error::PipelineError;
use crossbeam_channel::{select, Receiver, Sender};
use std::collections::HashMap;
use tracing::debug;

/// Contributions from children that completed before their parent
#[derive(Debug, Default)]
struct OrphanBucket {
    total_size: i64,
    total_blocks: i64,
    total_files: i64,
    total_dirs: i64,
    count: i64,
}

/// Per-directory aggregation state
#[derive(Debug)]
struct Pending {
    partial: Rollup,
    parent_id: i64,
    expected: i64,
    completed: i64,
}

/// Streaming bottom-up rollup aggregator
#[derive(Debug, Default)]
pub struct Aggregator {
    pending: HashMap<i64, Pending>,
    orphans: HashMap<i64, OrphanBucket>,
}

/// Internal send outcome: cancellation stops the fold without error
enum FoldOutcome {
    Continue,
    Cancelled,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume completion records until the input closes, emitting rollups.
    ///
    /// Fails with an incomplete-aggregation error if the input closes while
    /// directories are still pending (a walker bug), unless the pipeline
    /// was cancelled.
    pub fn run(
        mut self,
        input: Receiver<DirCompletion>,
        output: Sender<Rollup>,
        cancel: CancelToken,
    ) -> Result<(), PipelineError> {
        loop {
            select! {
                recv(cancel.observer()) -> _ => return Ok(()),
                recv(input) -> msg => match msg {
                    Ok(completion) => {
                        if let FoldOutcome::Cancelled = self.handle(completion, &output, &cancel) {
                            return Ok(());
                        }
                    }
                    Err(_) => {
                        if cancel.is_cancelled() {
                            return Ok(());
                        }
                        if !self.pending.is_empty() {
                            return Err(PipelineError::IncompleteAggregation {
                                pending: self.pending.len(),
                            });
                        }
                        debug!(orphans = self.orphans.len(), "aggregation complete");
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Process one completion record, cascading emissions upward while
    /// directories reach their expected child count.
    fn handle(
        &mut self,
        completion: DirCompletion,
        output: &Sender<Rollup>,
        cancel: &CancelToken,
    ) -> FoldOutcome {
        let dir_id = completion.dir_id;

        let mut state = Pending {
            partial: Rollup {
                dir_id,
                total_size: completion.file_size,
                total_blocks: completion.file_blocks,
                total_files: completion.file_count,
                total_dirs: 0,
            },
            parent_id: completion.parent_id,
            expected: completion.child_dirs,
            completed: 0,
        };

        // Fold in children that completed before this record arrived
        if let Some(orphan) = self.orphans.remove(&dir_id) {
            state.partial.total_size += orphan.total_size;
            state.partial.total_blocks += orphan.total_blocks;
            state.partial.total_files += orphan.total_files;
            state.partial.total_dirs += orphan.total_dirs;
            state.completed += orphan.count;
        }

        if state.completed >= state.expected {
            self.emit_and_cascade(state, output, cancel)
        } else {
            self.pending.insert(dir_id, state);
            FoldOutcome::Continue
        }
    }

    fn emit_and_cascade(
        &mut self,
        mut state: Pending,
        output: &Sender<Rollup>,
        cancel: &CancelToken,
    ) -> FoldOutcome {
        loop {
            let rollup = state.partial;
            let parent_id = state.parent_id;

            let sent = select! {
                send(output, rollup) -> res => res.is_ok(),
                recv(cancel.observer()) -> _ => false,
            };
            if !sent {
                return FoldOutcome::Cancelled;
            }

            // The root's parent is 0; nothing above it to fold into.
            if parent_id == 0 {
                return FoldOutcome::Continue;
            }

            if let Some(parent) = self.pending.get_mut(&parent_id) {
                parent.partial.total_size += rollup.total_size;
                parent.partial.total_blocks += rollup.total_blocks;
                parent.partial.total_files += rollup.total_files;
                parent.partial.total_dirs += rollup.total_dirs + 1;
                parent.completed += 1;
                if parent.completed < parent.expected {
                    return FoldOutcome::Continue;
                }
                state = self.pending.remove(&parent_id).expect("parent state exists");
                continue;
            }

            // Parent's completion not seen yet; park this contribution
            let orphan = self.orphans.entry(parent_id).or_default();
            orphan.total_size += rollup.total_size;
            orphan.total_blocks += rollup.total_blocks;
            orphan.total_files += rollup.total_files;
            orphan.total_dirs += rollup.total_dirs + 1;
            orphan.count += 1;
            return FoldOutcome::Continue;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::collections::HashMap;
    use std::thread;

    fn completion(
        dir_id: i64,
        parent_id: i64,
        size: i64,
        blocks: i64,
        files: i64,
        child_dirs: i64,
    ) -> DirCompletion {
        DirCompletion {
            dir_id,
            parent_id,
            file_size: size,
            file_blocks: blocks,
            file_count: files,
            child_dirs,
        }
    }

    fn run_aggregator(completions: Vec<DirCompletion>) -> Result<HashMap<i64, Rollup>, PipelineError> {
        let (in_tx, in_rx) = bounded(completions.len().max(1));
        let (out_tx, out_rx) = bounded(completions.len().max(1));

        for c in completions {
            in_tx.send(c).unwrap();
        }
        drop(in_tx);

        let handle = thread::spawn(move || {
            Aggregator::new().run(in_rx, out_tx, CancelToken::new())
        });

        let mut rollups = HashMap::new();
        for r in out_rx {
            assert!(
                rollups.insert(r.dir_id, r).is_none(),
                "duplicate rollup for dir {}",
                r.dir_id
            );
        }

        handle.join().unwrap().map(|()| rollups)
    }

    #[test]
    fn test_streaming_rollups() {
        let rollups = run_aggregator(vec![
            completion(1, 0, 10, 10, 1, 2),
            completion(2, 1, 5, 5, 1, 0),
            completion(3, 1, 0, 0, 0, 0),
        ])
        .unwrap();

        let root = rollups[&1];
        assert_eq!(
            (root.total_size, root.total_blocks, root.total_files, root.total_dirs),
            (15, 15, 2, 2)
        );

        let sub = rollups[&2];
        assert_eq!(
            (sub.total_size, sub.total_blocks, sub.total_files, sub.total_dirs),
            (5, 5, 1, 0)
        );

        let empty = rollups[&3];
        assert_eq!(
            (empty.total_size, empty.total_blocks, empty.total_files, empty.total_dirs),
            (0, 0, 0, 0)
        );
    }

    #[test]
    fn test_child_before_parent_uses_orphan_bucket() {
        // Leaf 3 completes before its parent 2 is even announced
        let rollups = run_aggregator(vec![
            completion(3, 2, 7, 512, 1, 0),
            completion(2, 1, 0, 0, 0, 1),
            completion(1, 0, 1, 512, 1, 1),
        ])
        .unwrap();

        let mid = rollups[&2];
        assert_eq!(
            (mid.total_size, mid.total_blocks, mid.total_files, mid.total_dirs),
            (7, 512, 1, 1)
        );

        let root = rollups[&1];
        assert_eq!(
            (root.total_size, root.total_blocks, root.total_files, root.total_dirs),
            (8, 1024, 2, 2)
        );
    }

    #[test]
    fn test_order_independence() {
        // Every ordering of a 4-dir tree where no constraint exists
        // between completions must yield identical rollups.
        let records = [
            completion(1, 0, 0, 0, 0, 2),
            completion(2, 1, 10, 512, 1, 1),
            completion(3, 1, 0, 0, 0, 0),
            completion(4, 2, 20, 1024, 2, 0),
        ];

        let permutations: &[[usize; 4]] = &[
            [0, 1, 2, 3],
            [3, 2, 1, 0],
            [1, 3, 0, 2],
            [2, 0, 3, 1],
            [3, 0, 1, 2],
        ];

        let mut reference: Option<HashMap<i64, Rollup>> = None;
        for perm in permutations {
            let ordered: Vec<_> = perm.iter().map(|&i| records[i]).collect();
            let rollups = run_aggregator(ordered).unwrap();
            assert_eq!(rollups.len(), 4);
            match &reference {
                None => reference = Some(rollups),
                Some(expected) => assert_eq!(&rollups, expected),
            }
        }

        let rollups = reference.unwrap();
        let root = rollups[&1];
        assert_eq!(
            (root.total_size, root.total_blocks, root.total_files, root.total_dirs),
            (30, 1536, 3, 3)
        );
    }

    #[test]
    fn test_unreadable_directory_produces_zero_rollup() {
        // Directory 2 failed readdir: zero contributions, zero expected children
        let rollups = run_aggregator(vec![
            completion(1, 0, 5, 512, 1, 1),
            completion(2, 1, 0, 0, 0, 0),
        ])
        .unwrap();

        assert_eq!(rollups[&2], Rollup { dir_id: 2, ..Default::default() });
        let root = rollups[&1];
        assert_eq!(
            (root.total_size, root.total_files, root.total_dirs),
            (5, 1, 1)
        );
    }

    #[test]
    fn test_incomplete_aggregation_fails() {
        // Root expects 2 children but only one ever completes
        let err = run_aggregator(vec![
            completion(1, 0, 0, 0, 0, 2),
            completion(2, 1, 0, 0, 0, 0),
        ])
        .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::IncompleteAggregation { pending: 1 }
        ));
    }

    #[test]
    fn test_cancellation_stops_cleanly() {
        let (in_tx, in_rx) = bounded::<DirCompletion>(4);
        let (out_tx, _out_rx) = bounded(4);
        let cancel = CancelToken::new();

        let agg_cancel = cancel.clone();
        let handle = thread::spawn(move || Aggregator::new().run(in_rx, out_tx, agg_cancel));

        in_tx.send(completion(1, 0, 0, 0, 0, 5)).unwrap();
        cancel.cancel();
        drop(in_tx);

        // Pending directories remain, but cancellation is not an error
        assert!(handle.join().unwrap().is_ok());
    }
}
