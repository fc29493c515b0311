//! Computes the operations that reconcile a client tree with a server tree.
//!
//! File identity is `(path, size, modification time)`; file content is never compared.
//! Directories are compared by presence only.

use {
    anyhow::{Result, ensure},
    blindbackup_protocol::{DateTimeUtc, FileEntry, Listing, RelativePath, normalize_time},
    chrono::TimeDelta,
    derive_more::Display,
    serde::{Deserialize, Serialize},
    std::{
        collections::{BTreeSet, HashSet},
        iter,
        time::Duration,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Side {
    #[display("server")]
    Server,
    #[display("client")]
    Client,
}

impl Side {
    #[must_use]
    #[inline]
    pub fn other(self) -> Self {
        match self {
            Self::Server => Self::Client,
            Self::Client => Self::Server,
        }
    }
}

/// Which side is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// The server becomes a mirror of the client.
    ToServer,
    /// The client becomes a mirror of the server.
    FromServer,
    /// Changes on either side are applied to the other one.
    Bidirectional,
}

/// When a one-way sync overwrites a destination file because of its modification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeCompare {
    /// The times differ by more than the tolerance.
    #[default]
    Changed,
    /// The source is newer by more than the tolerance.
    Newer,
    Ignore,
}

/// When a one-way sync overwrites a destination file because of its size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeCompare {
    /// The sizes differ.
    #[default]
    Changed,
    /// The source is bigger.
    Bigger,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Modification times closer than this are considered equal.
    pub mtime_tolerance: Duration,
    /// Whether asymmetric modes delete entries that only exist on the destination.
    pub mirror_deletes: bool,
    /// A file present on both sides is copied in asymmetric modes if either
    /// comparison says so. Bidirectional sync always uses the newer file.
    pub mtime_compare: TimeCompare,
    pub size_compare: SizeCompare,
}

impl Default for SyncOptions {
    #[inline]
    fn default() -> Self {
        Self {
            mtime_tolerance: Duration::from_secs(1),
            mirror_deletes: true,
            mtime_compare: TimeCompare::default(),
            size_compare: SizeCompare::default(),
        }
    }
}

impl SyncOptions {
    #[inline]
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.mtime_compare != TimeCompare::Ignore || self.size_compare != SizeCompare::Ignore,
            "modification time and size comparisons can't both be ignored"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOperation {
    /// Transfer the file at `path` to `to`. `source` is the entry on the other side.
    Copy {
        path: RelativePath,
        to: Side,
        source: FileEntry,
    },
    /// Remove a file or a directory from `side`.
    Delete {
        path: RelativePath,
        side: Side,
        is_dir: bool,
    },
    Mkdir {
        path: RelativePath,
        side: Side,
    },
}

impl SyncOperation {
    #[must_use]
    #[inline]
    pub fn path(&self) -> &RelativePath {
        match self {
            Self::Copy { path, .. } | Self::Delete { path, .. } | Self::Mkdir { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConflictReason {
    #[display("same modification time but different size")]
    SameTimeDifferentSize,
    #[display("file on one side, directory on the other")]
    KindMismatch,
    #[display("deleted on one side, modified on the other")]
    DeletedAndModified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub path: RelativePath,
    pub reason: ConflictReason,
}

/// Operations in execution order: deletes (deepest first), then
/// directory creation (shallowest first), then copies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub operations: Vec<SyncOperation>,
    pub conflicts: Vec<Conflict>,
}

impl SyncPlan {
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.conflicts.is_empty()
    }
}

/// Diffs two listings with default options and no baseline.
#[must_use]
#[inline]
pub fn diff(server: &Listing, client: &Listing, direction: SyncDirection) -> SyncPlan {
    SyncDiffEngine::new(SyncOptions::default()).diff(server, client, direction)
}

#[derive(Debug, Clone, Default)]
pub struct SyncDiffEngine<'a> {
    options: SyncOptions,
    baseline: Option<&'a Listing>,
}

impl<'a> SyncDiffEngine<'a> {
    #[must_use]
    #[inline]
    pub fn new(options: SyncOptions) -> Self {
        Self {
            options,
            baseline: None,
        }
    }

    /// Sets the listing both sides agreed on after the previous sync.
    /// Bidirectional sync only propagates deletions when it is available.
    #[must_use]
    #[inline]
    pub fn with_baseline(mut self, baseline: &'a Listing) -> Self {
        self.baseline = Some(baseline);
        self
    }

    #[must_use]
    #[inline]
    pub fn diff(&self, server: &Listing, client: &Listing, direction: SyncDirection) -> SyncPlan {
        let paths: BTreeSet<&RelativePath> = server.paths().chain(client.paths()).collect();
        let mut builder = PlanBuilder::default();
        for path in paths {
            if builder.is_inside_conflict(path) {
                continue;
            }
            let server_entry = server.get(path);
            let client_entry = client.get(path);
            match direction {
                SyncDirection::ToServer => {
                    self.mirror(&mut builder, path, client_entry, server_entry, Side::Server);
                }
                SyncDirection::FromServer => {
                    self.mirror(&mut builder, path, server_entry, client_entry, Side::Client);
                }
                SyncDirection::Bidirectional => {
                    self.merge(&mut builder, path, server_entry, client_entry);
                }
            }
        }
        builder.finish(server, client)
    }

    fn mirror(
        &self,
        builder: &mut PlanBuilder,
        path: &RelativePath,
        source: Option<&FileEntry>,
        destination: Option<&FileEntry>,
        to: Side,
    ) {
        match (source, destination) {
            (None, None) => {}
            (Some(source), None) => builder.create(source, to),
            (None, Some(destination)) => {
                if self.options.mirror_deletes {
                    builder.delete(destination, to);
                }
            }
            (Some(source), Some(destination)) => {
                if source.is_dir != destination.is_dir {
                    if self.options.mirror_deletes {
                        builder.delete(destination, to);
                        builder.create(source, to);
                    } else {
                        builder.conflict(path, ConflictReason::KindMismatch);
                    }
                } else if !source.is_dir && self.should_overwrite(source, destination) {
                    builder.create(source, to);
                }
            }
        }
    }

    fn merge(
        &self,
        builder: &mut PlanBuilder,
        path: &RelativePath,
        server: Option<&FileEntry>,
        client: Option<&FileEntry>,
    ) {
        match (server, client) {
            (None, None) => {}
            (Some(entry), None) => self.merge_one_sided(builder, path, entry, Side::Server),
            (None, Some(entry)) => self.merge_one_sided(builder, path, entry, Side::Client),
            (Some(server), Some(client)) => {
                if server.is_dir != client.is_dir {
                    builder.conflict(path, ConflictReason::KindMismatch);
                } else if server.is_dir || self.same_file(server, client) {
                    // In sync.
                } else if self.same_time(server.modified_at, client.modified_at) {
                    builder.conflict(path, ConflictReason::SameTimeDifferentSize);
                } else if server.modified_at > client.modified_at {
                    builder.create(server, Side::Client);
                } else {
                    builder.create(client, Side::Server);
                }
            }
        }
    }

    /// `entry` exists on `side` only: it's either new on `side`
    /// or deleted on the other side since the baseline.
    fn merge_one_sided(
        &self,
        builder: &mut PlanBuilder,
        path: &RelativePath,
        entry: &FileEntry,
        side: Side,
    ) {
        match self.baseline.and_then(|baseline| baseline.get(path)) {
            None => builder.create(entry, side.other()),
            Some(known) => {
                if self.same_entry(known, entry) {
                    builder.delete(entry, side);
                } else {
                    builder.conflict(path, ConflictReason::DeletedAndModified);
                }
            }
        }
    }

    fn same_time(&self, a: DateTimeUtc, b: DateTimeUtc) -> bool {
        let tolerance = TimeDelta::from_std(self.options.mtime_tolerance).unwrap_or(TimeDelta::MAX);
        let delta = normalize_time(a).signed_duration_since(normalize_time(b));
        delta.abs() <= tolerance
    }

    fn should_overwrite(&self, source: &FileEntry, destination: &FileEntry) -> bool {
        let time_says = match self.options.mtime_compare {
            TimeCompare::Changed => !self.same_time(source.modified_at, destination.modified_at),
            TimeCompare::Newer => {
                !self.same_time(source.modified_at, destination.modified_at)
                    && normalize_time(source.modified_at) > normalize_time(destination.modified_at)
            }
            TimeCompare::Ignore => false,
        };
        let size_says = match self.options.size_compare {
            SizeCompare::Changed => source.size != destination.size,
            SizeCompare::Bigger => source.size > destination.size,
            SizeCompare::Ignore => false,
        };
        time_says || size_says
    }

    fn same_file(&self, a: &FileEntry, b: &FileEntry) -> bool {
        a.size == b.size && self.same_time(a.modified_at, b.modified_at)
    }

    fn same_entry(&self, a: &FileEntry, b: &FileEntry) -> bool {
        a.is_dir == b.is_dir && (a.is_dir || self.same_file(a, b))
    }
}

/// Returns entries that are present and equal on both sides.
///
/// After a sync, this is the new baseline: paths whose operations
/// failed or conflicted are left out.
#[must_use]
#[inline]
pub fn agreed_listing(server: &Listing, client: &Listing, options: &SyncOptions) -> Listing {
    let engine = SyncDiffEngine::new(*options);
    client
        .iter()
        .filter(|entry| {
            server
                .get(&entry.path)
                .is_some_and(|other| engine.same_entry(entry, other))
        })
        .cloned()
        .collect()
}

#[derive(Default)]
struct PlanBuilder {
    deletes: Vec<(RelativePath, Side, bool)>,
    mkdirs: Vec<(RelativePath, Side)>,
    copies: Vec<(FileEntry, Side)>,
    conflicts: Vec<Conflict>,
}

impl PlanBuilder {
    fn create(&mut self, source: &FileEntry, to: Side) {
        if source.is_dir {
            self.mkdirs.push((source.path.clone(), to));
        } else {
            self.copies.push((source.clone(), to));
        }
    }

    fn delete(&mut self, entry: &FileEntry, side: Side) {
        self.deletes.push((entry.path.clone(), side, entry.is_dir));
    }

    fn conflict(&mut self, path: &RelativePath, reason: ConflictReason) {
        self.conflicts.push(Conflict {
            path: path.clone(),
            reason,
        });
    }

    fn is_inside_conflict(&self, path: &RelativePath) -> bool {
        self.conflicts
            .iter()
            .any(|conflict| path.starts_with(&conflict.path))
    }

    fn finish(self, server: &Listing, client: &Listing) -> SyncPlan {
        let Self {
            mut deletes,
            mut mkdirs,
            copies,
            conflicts,
        } = self;

        // A directory is only removed if everything inside it goes away too.
        let deleted: HashSet<(&RelativePath, Side)> = deletes
            .iter()
            .map(|(path, side, _)| (path, *side))
            .collect();
        let mut occupied = HashSet::new();
        if deletes.iter().any(|(_, _, is_dir)| *is_dir) {
            for (listing, side) in [(server, Side::Server), (client, Side::Client)] {
                for path in listing.paths() {
                    if !deleted.contains(&(path, side)) {
                        mark_ancestors(&mut occupied, path, side);
                    }
                }
            }
        }
        let kept: HashSet<(RelativePath, Side)> = deletes
            .iter()
            .filter(|(path, side, is_dir)| *is_dir && occupied.contains(&(path.clone(), *side)))
            .map(|(path, side, _)| (path.clone(), *side))
            .collect();
        deletes.retain(|(path, side, _)| !kept.contains(&(path.clone(), *side)));

        // A kept directory receiving new content has to exist on the receiving side.
        if !kept.is_empty() {
            let mut receiving = HashSet::new();
            for (path, side) in copies
                .iter()
                .map(|(entry, side)| (&entry.path, *side))
                .chain(mkdirs.iter().map(|(path, side)| (path, *side)))
            {
                mark_ancestors(&mut receiving, path, side);
            }
            for (path, side) in kept {
                let target = (path, side.other());
                if receiving.contains(&target) && !mkdirs.contains(&target) {
                    mkdirs.push(target);
                }
            }
        }

        deletes.sort_by(|(a, ..), (b, ..)| b.depth().cmp(&a.depth()).then_with(|| a.cmp(b)));
        mkdirs.sort_by(|(a, _), (b, _)| a.depth().cmp(&b.depth()).then_with(|| a.cmp(b)));

        let operations = deletes
            .into_iter()
            .map(|(path, side, is_dir)| SyncOperation::Delete { path, side, is_dir })
            .chain(
                mkdirs
                    .into_iter()
                    .map(|(path, side)| SyncOperation::Mkdir { path, side }),
            )
            .chain(copies.into_iter().map(|(source, to)| SyncOperation::Copy {
                path: source.path.clone(),
                to,
                source,
            }))
            .collect();
        SyncPlan {
            operations,
            conflicts,
        }
    }
}

/// Adds every directory containing `path` to `set`.
fn mark_ancestors(set: &mut HashSet<(RelativePath, Side)>, path: &RelativePath, side: Side) {
    for ancestor in iter::successors(path.parent(), RelativePath::parent) {
        if !set.insert((ancestor, side)) {
            // Its ancestors are already there.
            break;
        }
    }
}
