//! Block index snapshot storage.
//!
//! A snapshot is a durable, named, position-tagged serialization of the
//! block index. On startup the indexer recovers the most recent snapshot and
//! rescans only the log tail instead of the whole history.

use crate::error::{CoreError, CoreResult};
use crate::index::BlockIndex;
use crate::types::Position;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Durable storage for block index snapshots.
pub trait SnapshotStore: Send {
    /// Starts a new snapshot tagged with `position`.
    ///
    /// The snapshot becomes visible to [`SnapshotStore::latest`] only after
    /// the writer's `commit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be staged.
    fn create(&self, name: &str, position: Position) -> CoreResult<Box<dyn SnapshotWriter>>;

    /// Returns a reader for the most recent committed snapshot under `name`,
    /// or `None` if no snapshot exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot store cannot be listed.
    fn latest(&self, name: &str) -> CoreResult<Option<Box<dyn SnapshotReader>>>;
}

/// Write side of one in-progress snapshot.
pub trait SnapshotWriter: Send {
    /// Stages the serialized index.
    ///
    /// # Errors
    ///
    /// Returns an error if the data cannot be staged.
    fn write(&mut self, index: &BlockIndex) -> CoreResult<()>;

    /// Atomically publishes the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be made durable; the
    /// snapshot is then not visible.
    fn commit(self: Box<Self>) -> CoreResult<()>;

    /// Discards the partial snapshot. Never fails.
    fn abort(self: Box<Self>);
}

/// Read side of one committed snapshot.
pub trait SnapshotReader: Send {
    /// The position the snapshot was tagged with.
    fn position(&self) -> Position;

    /// Restores the serialized index into `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot is unreadable or corrupted; `index`
    /// is left unchanged in that case.
    fn recover_into(&self, index: &mut BlockIndex) -> CoreResult<()>;
}

/// Decides when the indexer writes a snapshot.
pub trait SnapshotPolicy: Send {
    /// Returns whether a snapshot should be taken after indexing up to
    /// `position`. A `true` return arms the policy for the next interval.
    fn should_snapshot(&mut self, position: Position) -> bool;
}

/// Snapshots every `interval` indexed positions.
#[derive(Debug)]
pub struct PositionSnapshotPolicy {
    interval: u64,
    last_snapshot_position: Position,
}

impl PositionSnapshotPolicy {
    /// Creates a policy snapshotting every `interval` positions.
    #[must_use]
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            last_snapshot_position: 0,
        }
    }
}

impl SnapshotPolicy for PositionSnapshotPolicy {
    fn should_snapshot(&mut self, position: Position) -> bool {
        if position.saturating_sub(self.last_snapshot_position) >= self.interval {
            self.last_snapshot_position = position;
            true
        } else {
            false
        }
    }
}

const SNAPSHOT_SUFFIX: &str = ".snapshot";
const TMP_SUFFIX: &str = ".tmp";

/// File-based snapshot store.
///
/// Snapshots are written as `<name>-<position>.snapshot` files inside one
/// directory. A snapshot is staged under a `.tmp` suffix and renamed into
/// place on commit, so a crash mid-write never leaves a visible partial
/// snapshot. Committing removes older snapshots of the same name.
#[derive(Debug)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    /// Creates a store rooted at `dir`. The directory is created on the
    /// first snapshot.
    #[must_use]
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn file_name(name: &str, position: Position) -> String {
        format!("{name}-{position:020}{SNAPSHOT_SUFFIX}")
    }

    /// Parses `<name>-<position>.snapshot` and returns the position.
    fn parse_position(file_name: &str, name: &str) -> Option<Position> {
        let rest = file_name.strip_prefix(name)?.strip_prefix('-')?;
        rest.strip_suffix(SNAPSHOT_SUFFIX)?.parse().ok()
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn create(&self, name: &str, position: Position) -> CoreResult<Box<dyn SnapshotWriter>> {
        fs::create_dir_all(&self.dir)
            .map_err(|err| CoreError::snapshot_storage(format!("create snapshot dir: {err}")))?;
        let final_path = self.dir.join(Self::file_name(name, position));
        let tmp_path = self.dir.join(format!(
            "{}{TMP_SUFFIX}",
            Self::file_name(name, position)
        ));
        let file = fs::File::create(&tmp_path)
            .map_err(|err| CoreError::snapshot_storage(format!("stage snapshot: {err}")))?;
        Ok(Box::new(FileSnapshotWriter {
            dir: self.dir.clone(),
            name: name.to_string(),
            file: Some(file),
            tmp_path,
            final_path,
        }))
    }

    fn latest(&self, name: &str) -> CoreResult<Option<Box<dyn SnapshotReader>>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(CoreError::snapshot_storage(format!(
                    "list snapshot dir: {err}"
                )));
            }
        };

        let mut latest: Option<(Position, PathBuf)> = None;
        for entry in entries {
            let entry =
                entry.map_err(|err| CoreError::snapshot_storage(format!("list snapshot: {err}")))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(position) = Self::parse_position(file_name, name) else {
                continue;
            };
            if latest.as_ref().is_none_or(|(p, _)| position > *p) {
                latest = Some((position, entry.path()));
            }
        }

        Ok(latest.map(|(position, path)| {
            Box::new(FileSnapshotReader { position, path }) as Box<dyn SnapshotReader>
        }))
    }
}

struct FileSnapshotWriter {
    dir: PathBuf,
    name: String,
    file: Option<fs::File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
}

impl SnapshotWriter for FileSnapshotWriter {
    fn write(&mut self, index: &BlockIndex) -> CoreResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| CoreError::snapshot_storage("snapshot writer already finished"))?;
        file.write_all(&index.encode())
            .map_err(|err| CoreError::snapshot_storage(format!("write snapshot: {err}")))
    }

    fn commit(mut self: Box<Self>) -> CoreResult<()> {
        let file = self
            .file
            .take()
            .ok_or_else(|| CoreError::snapshot_storage("snapshot writer already finished"))?;
        file.sync_all()
            .map_err(|err| CoreError::snapshot_storage(format!("sync snapshot: {err}")))?;
        drop(file);
        fs::rename(&self.tmp_path, &self.final_path)
            .map_err(|err| CoreError::snapshot_storage(format!("publish snapshot: {err}")))?;

        // Best-effort cleanup of superseded snapshots.
        if let Ok(entries) = fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path == self.final_path {
                    continue;
                }
                let is_superseded = entry
                    .file_name()
                    .to_str()
                    .is_some_and(|n| FileSnapshotStore::parse_position(n, &self.name).is_some());
                if is_superseded {
                    let _ = fs::remove_file(path);
                }
            }
        }
        Ok(())
    }

    fn abort(mut self: Box<Self>) {
        self.file.take();
        let _ = fs::remove_file(&self.tmp_path);
    }
}

struct FileSnapshotReader {
    position: Position,
    path: PathBuf,
}

impl SnapshotReader for FileSnapshotReader {
    fn position(&self) -> Position {
        self.position
    }

    fn recover_into(&self, index: &mut BlockIndex) -> CoreResult<()> {
        let data = fs::read(&self.path)
            .map_err(|err| CoreError::snapshot_storage(format!("read snapshot: {err}")))?;
        *index = BlockIndex::decode(&data)?;
        Ok(())
    }
}

/// In-memory snapshot store for tests and ephemeral streams.
///
/// Clones share the same underlying store. Commits can be forced to fail
/// with [`InMemorySnapshotStore::fail_commits`] to exercise the indexer's
/// best-effort snapshot handling.
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotStore {
    inner: Arc<Mutex<InMemorySnapshots>>,
}

#[derive(Debug, Default)]
struct InMemorySnapshots {
    snapshots: HashMap<String, (Position, Vec<u8>)>,
    fail_commits: bool,
}

impl InMemorySnapshotStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent commit fail until called again with `false`.
    pub fn fail_commits(&self, fail: bool) {
        self.inner.lock().fail_commits = fail;
    }

    /// Returns the position tag of the committed snapshot under `name`.
    #[must_use]
    pub fn committed_position(&self, name: &str) -> Option<Position> {
        self.inner.lock().snapshots.get(name).map(|(p, _)| *p)
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn create(&self, name: &str, position: Position) -> CoreResult<Box<dyn SnapshotWriter>> {
        Ok(Box::new(InMemorySnapshotWriter {
            inner: Arc::clone(&self.inner),
            name: name.to_string(),
            position,
            staged: None,
        }))
    }

    fn latest(&self, name: &str) -> CoreResult<Option<Box<dyn SnapshotReader>>> {
        let inner = self.inner.lock();
        Ok(inner.snapshots.get(name).map(|(position, data)| {
            Box::new(InMemorySnapshotReader {
                position: *position,
                data: data.clone(),
            }) as Box<dyn SnapshotReader>
        }))
    }
}

struct InMemorySnapshotWriter {
    inner: Arc<Mutex<InMemorySnapshots>>,
    name: String,
    position: Position,
    staged: Option<Vec<u8>>,
}

impl SnapshotWriter for InMemorySnapshotWriter {
    fn write(&mut self, index: &BlockIndex) -> CoreResult<()> {
        self.staged = Some(index.encode());
        Ok(())
    }

    fn commit(self: Box<Self>) -> CoreResult<()> {
        let staged = self
            .staged
            .ok_or_else(|| CoreError::snapshot_storage("nothing staged for commit"))?;
        let mut inner = self.inner.lock();
        if inner.fail_commits {
            return Err(CoreError::snapshot_storage("injected commit failure"));
        }
        inner.snapshots.insert(self.name, (self.position, staged));
        Ok(())
    }

    fn abort(self: Box<Self>) {}
}

struct InMemorySnapshotReader {
    position: Position,
    data: Vec<u8>,
}

impl SnapshotReader for InMemorySnapshotReader {
    fn position(&self) -> Position {
        self.position
    }

    fn recover_into(&self, index: &mut BlockIndex) -> CoreResult<()> {
        *index = BlockIndex::decode(&self.data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_index() -> BlockIndex {
        let mut index = BlockIndex::new();
        index.append(10, 0);
        index.append(20, 100);
        index
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = InMemorySnapshotStore::new();
        assert!(store.latest("stream").unwrap().is_none());

        let mut writer = store.create("stream", 20).unwrap();
        writer.write(&sample_index()).unwrap();
        writer.commit().unwrap();

        let reader = store.latest("stream").unwrap().unwrap();
        assert_eq!(reader.position(), 20);

        let mut recovered = BlockIndex::new();
        reader.recover_into(&mut recovered).unwrap();
        assert_eq!(recovered, sample_index());
    }

    #[test]
    fn memory_store_aborted_snapshot_is_invisible() {
        let store = InMemorySnapshotStore::new();
        let mut writer = store.create("stream", 20).unwrap();
        writer.write(&sample_index()).unwrap();
        writer.abort();

        assert!(store.latest("stream").unwrap().is_none());
    }

    #[test]
    fn memory_store_injected_commit_failure() {
        let store = InMemorySnapshotStore::new();
        store.fail_commits(true);

        let mut writer = store.create("stream", 20).unwrap();
        writer.write(&sample_index()).unwrap();
        assert!(writer.commit().is_err());
        assert!(store.latest("stream").unwrap().is_none());
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());

        let mut writer = store.create("stream", 20).unwrap();
        writer.write(&sample_index()).unwrap();
        writer.commit().unwrap();

        let reader = store.latest("stream").unwrap().unwrap();
        assert_eq!(reader.position(), 20);

        let mut recovered = BlockIndex::new();
        reader.recover_into(&mut recovered).unwrap();
        assert_eq!(recovered, sample_index());
    }

    #[test]
    fn file_store_empty_dir_has_no_snapshot() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        assert!(store.latest("stream").unwrap().is_none());
    }

    #[test]
    fn file_store_commit_replaces_older_snapshot() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());

        let mut writer = store.create("stream", 20).unwrap();
        writer.write(&sample_index()).unwrap();
        writer.commit().unwrap();

        let mut newer = sample_index();
        newer.append(30, 200);
        let mut writer = store.create("stream", 30).unwrap();
        writer.write(&newer).unwrap();
        writer.commit().unwrap();

        let reader = store.latest("stream").unwrap().unwrap();
        assert_eq!(reader.position(), 30);

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn file_store_abort_leaves_no_visible_snapshot() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());

        let mut writer = store.create("stream", 20).unwrap();
        writer.write(&sample_index()).unwrap();
        writer.abort();

        assert!(store.latest("stream").unwrap().is_none());
    }

    #[test]
    fn file_store_ignores_other_stream_names() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());

        let mut writer = store.create("other", 50).unwrap();
        writer.write(&sample_index()).unwrap();
        writer.commit().unwrap();

        assert!(store.latest("stream").unwrap().is_none());
    }

    #[test]
    fn position_policy_fires_every_interval() {
        let mut policy = PositionSnapshotPolicy::new(100);
        assert!(!policy.should_snapshot(50));
        assert!(policy.should_snapshot(100));
        assert!(!policy.should_snapshot(150));
        assert!(policy.should_snapshot(205));
    }
}
