pub mod policy;
pub mod store;
pub mod transfer;

use crate::engine::{FileInfo, FileMeta, StorageEngine};
use crate::error::{Result, SyncError};
use policy::{resolve, transfer_bytes, Resolution, Strategy};
use serde::Serialize;
use std::cmp::Ordering as CmpOrdering;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use store::{DiffKind, DiffStore, FileDifference};

/// Aggregate cost of the current diff: bytes and files to move, excluding
/// Ignore-resolved entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareTotals {
    pub total_bytes: u64,
    pub total_count: u64,
}

/// Running sync state, pushed to the caller after every applied file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub bytes_transferred: u64,
    pub transferred_count: u64,
}

/// One compare-then-sync session over a source/destination engine pair.
///
/// All work is cooperative: one compare or one sync runs at a time (the
/// `&mut self` receivers enforce this within a session; don't share an
/// engine pair across sessions). Cancellation is a flag checked once per
/// node, so an in-flight file finishes before a stop takes effect.
pub struct SyncSession {
    source: Option<Arc<dyn StorageEngine>>,
    destination: Option<Arc<dyn StorageEngine>>,
    ignored_folders: Vec<String>,
    strategy: Strategy,
    stop: Arc<AtomicBool>,
    store: DiffStore,
    total_bytes: u64,
    total_count: u64,
    bytes_transferred: u64,
    transferred_count: u64,
}

impl SyncSession {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            source: None,
            destination: None,
            ignored_folders: Vec::new(),
            strategy,
            stop: Arc::new(AtomicBool::new(false)),
            store: DiffStore::new(),
            total_bytes: 0,
            total_count: 0,
            bytes_transferred: 0,
            transferred_count: 0,
        }
    }

    pub fn set_source(&mut self, engine: Option<Arc<dyn StorageEngine>>) {
        self.source = engine;
    }

    pub fn set_destination(&mut self, engine: Option<Arc<dyn StorageEngine>>) {
        self.destination = engine;
    }

    pub fn set_ignored_folders(&mut self, folders: Vec<String>) {
        self.ignored_folders = folders;
    }

    /// Shared stop flag, for wiring up ctrl-c or a UI cancel button
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    #[allow(dead_code)] // The CLI cancels through stop_flag; used in tests
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn totals(&self) -> CompareTotals {
        CompareTotals {
            total_bytes: self.total_bytes,
            total_count: self.total_count,
        }
    }

    pub fn progress(&self) -> SyncProgress {
        SyncProgress {
            bytes_transferred: self.bytes_transferred,
            transferred_count: self.transferred_count,
        }
    }

    /// Live diff entries still awaiting sync
    pub fn remaining(&self) -> usize {
        self.store.len()
    }

    /// Live children of a diff node (None = top level), for lazy tree
    /// rendering
    pub fn children(&self, parent_id: Option<&str>) -> Vec<&FileDifference> {
        self.store.children(parent_id)
    }

    #[allow(dead_code)] // Used in tests
    pub fn all_nodes(&self) -> impl Iterator<Item = &FileDifference> + '_ {
        self.store.all()
    }

    /// Reachability check for both sides; cheap, never errors
    pub async fn validate(&self) -> (bool, bool) {
        let source_ok = match &self.source {
            Some(engine) => engine.validate().await,
            None => false,
        };
        let dest_ok = match &self.destination {
            Some(engine) => engine.validate().await,
            None => false,
        };
        (source_ok, dest_ok)
    }

    /// Walk both trees and rebuild the diff store.
    ///
    /// Iterative over an explicit stack: depth is unbounded and the walk is
    /// cancelable between pops. A canceled compare keeps whatever partial
    /// diff it produced. Engines are disconnected on every exit path.
    pub async fn compare(&mut self) -> Result<CompareTotals> {
        if self.source.is_none() && self.destination.is_none() {
            return Err(SyncError::EngineMissing { side: "source" });
        }

        self.store.clear();
        self.total_bytes = 0;
        self.total_count = 0;

        let result = self.compare_walk().await;
        self.disconnect_engines().await;
        if self.stop.swap(false, Ordering::SeqCst) {
            tracing::info!("Compare canceled, partial diff retained");
        }
        result?;

        tracing::info!(
            "Compare done: {} entries, {} files, {} bytes",
            self.store.len(),
            self.total_count,
            self.total_bytes
        );
        Ok(self.totals())
    }

    async fn compare_walk(&mut self) -> Result<()> {
        let mut stack = vec![self.synthetic_root()];

        while !self.stop.load(Ordering::SeqCst) {
            let Some(item) = stack.pop() else { break };

            if item.is_dir {
                self.compare_directory(&item, &mut stack).await?;
            } else if item.resolution != Some(Resolution::Ignore) {
                self.total_count += 1;
            }

            self.prune_dangling(item.parent_id.as_deref());
            self.total_bytes += item.transfer_bytes;
            self.store.add(item);
        }

        if !self.stop.load(Ordering::SeqCst) {
            // The trailing chain (synthetic root included) never sees a
            // later sibling, so sweep it here
            self.prune_dangling(None);
        }
        Ok(())
    }

    /// Root pair with an empty relative path on each configured side
    fn synthetic_root(&self) -> FileDifference {
        let side = |present: bool| {
            present.then(|| FileInfo {
                file_name: String::new(),
                relative_path: String::new(),
                is_dir: true,
                size: 0,
                modified: UNIX_EPOCH,
                meta: FileMeta {
                    atime: UNIX_EPOCH,
                    mtime: UNIX_EPOCH,
                    mode: 0o755,
                    size: 0,
                },
            })
        };
        FileDifference {
            id: String::new(),
            parent_id: None,
            file_name: String::new(),
            is_dir: true,
            kind: DiffKind::Conflict,
            resolution: None,
            source: side(self.source.is_some()),
            destination: side(self.destination.is_some()),
            transfer_bytes: 0,
        }
    }

    /// List both sides of a directory pair, match children by
    /// (kind, name), drop equal files, and push the rest for processing
    async fn compare_directory(
        &mut self,
        item: &FileDifference,
        stack: &mut Vec<FileDifference>,
    ) -> Result<()> {
        let mut source_list = Vec::new();
        let mut dest_list = Vec::new();

        if let (Some(engine), Some(info)) = (&self.source, &item.source) {
            source_list = engine
                .list(&info.relative_path, &self.ignored_folders)
                .await?;
        }
        if let (Some(engine), Some(info)) = (&self.destination, &item.destination) {
            dest_list = engine
                .list(&info.relative_path, &self.ignored_folders)
                .await?;
        }

        type Pair = (Option<FileInfo>, Option<FileInfo>);
        let mut pairs: HashMap<(bool, String), Pair> = HashMap::new();
        for file in source_list {
            pairs.insert((file.is_dir, file.file_name.clone()), (Some(file), None));
        }
        for file in dest_list {
            match pairs.entry((file.is_dir, file.file_name.clone())) {
                Entry::Occupied(mut slot) => {
                    let same_size = slot.get().0.as_ref().map(|s| s.size) == Some(file.size);
                    if !file.is_dir && same_size {
                        // Equal by name and size: no diff node. Directory
                        // pairs always descend.
                        slot.remove();
                    } else {
                        slot.get_mut().1 = Some(file);
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert((None, Some(file)));
                }
            }
        }

        let mut children: Vec<(bool, String, Pair)> = pairs
            .into_iter()
            .map(|((is_dir, name), pair)| (is_dir, name, pair))
            .collect();

        // Directories last, names descending: the LIFO stack then yields a
        // stable files-first, alphabetical visitation order
        children.sort_by(|a, b| {
            if a.0 != b.0 {
                return if a.0 {
                    CmpOrdering::Greater
                } else {
                    CmpOrdering::Less
                };
            }
            b.1.cmp(&a.1)
        });

        for (is_dir, name, (source, dest)) in children {
            let Some(base) = source.as_ref().or(dest.as_ref()) else {
                continue;
            };
            let relative_path = base.relative_path.clone();

            let kind = match (&source, &dest) {
                (Some(_), None) => DiffKind::OnlySource,
                (None, Some(_)) => DiffKind::OnlyDest,
                _ => DiffKind::Conflict,
            };
            let resolution =
                (!is_dir).then(|| resolve(self.strategy, source.is_some(), dest.is_some()));
            let bytes = resolution
                .map(|r| transfer_bytes(r, source.as_ref(), dest.as_ref()))
                .unwrap_or(0);

            stack.push(FileDifference {
                id: FileDifference::make_id(is_dir, &relative_path),
                parent_id: (!item.id.is_empty()).then(|| item.id.clone()),
                file_name: name,
                is_dir,
                kind,
                resolution,
                source,
                destination: dest,
                transfer_bytes: bytes,
            });
        }

        Ok(())
    }

    /// Remove the trailing run of directory nodes that acquired no live
    /// children. `incoming_parent` shields the directory that is about to
    /// receive the current item.
    fn prune_dangling(&mut self, incoming_parent: Option<&str>) {
        loop {
            let Some(last) = self.store.last() else { break };
            if !last.is_dir {
                break;
            }
            if incoming_parent == Some(last.id.as_str()) {
                break;
            }
            if !self.store.children(Some(&last.id)).is_empty() {
                break;
            }
            let id = last.id.clone();
            self.store.remove(&id);
        }
    }

    /// Re-apply the policy to every file node under a new strategy.
    ///
    /// Nodes are never added or removed here; only resolutions, byte costs,
    /// and the aggregates change. One pass over the store.
    pub fn set_strategy(&mut self, strategy: Strategy) -> CompareTotals {
        self.strategy = strategy;

        let mut total_bytes = 0u64;
        let mut total_count = 0u64;
        self.store.for_each_live_mut(|node| {
            if node.is_dir {
                return;
            }
            let resolution = resolve(strategy, node.source.is_some(), node.destination.is_some());
            node.resolution = Some(resolution);
            node.transfer_bytes =
                transfer_bytes(resolution, node.source.as_ref(), node.destination.as_ref());
            total_bytes += node.transfer_bytes;
            if resolution != Resolution::Ignore {
                total_count += 1;
            }
        });

        self.total_bytes = total_bytes;
        self.total_count = total_count;
        self.totals()
    }

    /// Override one node's resolution; aggregates move by the delta only
    pub fn set_resolution(&mut self, id: &str, resolution: Resolution) -> Result<CompareTotals> {
        let node = self
            .store
            .get_mut(id)
            .ok_or_else(|| SyncError::NodeNotFound { id: id.to_string() })?;

        let old_bytes = node.transfer_bytes;
        let old_counted = !node.is_dir && node.resolution != Some(Resolution::Ignore);

        node.resolution = Some(resolution);
        node.transfer_bytes = if node.is_dir {
            0
        } else {
            transfer_bytes(resolution, node.source.as_ref(), node.destination.as_ref())
        };

        let new_bytes = node.transfer_bytes;
        let new_counted = !node.is_dir && resolution != Resolution::Ignore;

        self.total_bytes = self.total_bytes - old_bytes + new_bytes;
        match (old_counted, new_counted) {
            (true, false) => self.total_count -= 1,
            (false, true) => self.total_count += 1,
            _ => {}
        }
        Ok(self.totals())
    }

    /// Drain the diff store, applying each node's resolution.
    ///
    /// Entries are applied newest-first (children before their directories)
    /// and removed as they land; a failure aborts the run and leaves the
    /// failing node plus everything unprocessed in the store for a resumed
    /// run. Engines are disconnected on every exit path, canceled included.
    pub async fn sync(
        &mut self,
        mut on_progress: impl FnMut(SyncProgress),
    ) -> Result<SyncProgress> {
        self.bytes_transferred = 0;
        self.transferred_count = 0;

        let result = self.sync_drain(&mut on_progress).await;
        self.disconnect_engines().await;
        if self.stop.swap(false, Ordering::SeqCst) {
            tracing::info!("Sync canceled, {} entries remain", self.store.len());
        }
        result?;
        Ok(self.progress())
    }

    async fn sync_drain(&mut self, on_progress: &mut impl FnMut(SyncProgress)) -> Result<()> {
        let source = self
            .source
            .clone()
            .ok_or(SyncError::EngineMissing { side: "source" })?;
        let destination = self
            .destination
            .clone()
            .ok_or(SyncError::EngineMissing { side: "destination" })?;

        while !self.stop.load(Ordering::SeqCst) {
            let Some(node) = self.store.last().cloned() else {
                break;
            };

            if !node.is_dir {
                apply_node(&source, &destination, &node).await?;
                if node.resolution != Some(Resolution::Ignore) {
                    self.bytes_transferred += node.transfer_bytes;
                    self.transferred_count += 1;
                    on_progress(self.progress());
                }
            }

            self.store.remove(&node.id);
        }
        Ok(())
    }

    async fn disconnect_engines(&self) {
        if let Some(engine) = &self.source {
            engine.disconnect().await;
        }
        if let Some(engine) = &self.destination {
            engine.disconnect().await;
        }
    }
}

/// Apply one file node: delete the side being replaced, then stream the
/// authoritative copy across. Only file nodes move bytes.
async fn apply_node(
    source: &Arc<dyn StorageEngine>,
    destination: &Arc<dyn StorageEngine>,
    node: &FileDifference,
) -> Result<()> {
    match node.resolution {
        Some(Resolution::ToLeft) => {
            if let Some(info) = &node.source {
                source.remove_file(&info.relative_path).await?;
            }
            if let Some(info) = &node.destination {
                transfer::transfer_file(destination, source, &info.relative_path).await?;
            }
            Ok(())
        }
        Some(Resolution::ToRight) => {
            if let Some(info) = &node.destination {
                destination.remove_file(&info.relative_path).await?;
            }
            if let Some(info) = &node.source {
                transfer::transfer_file(source, destination, &info.relative_path).await?;
            }
            Ok(())
        }
        Some(Resolution::Ignore) | None => Ok(()),
    }
}
