//! Entry handles and their metadata.

use std::time::{SystemTime, UNIX_EPOCH};

/// Directory bit of the mode word, in the top byte as 9P lays it out.
pub const DMDIR: u32 = 0x8000_0000;

/// Symlink bit of the mode word.
pub const DMSYMLINK: u32 = 0x0200_0000;

/// The closed set of entry kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

impl EntryKind {
    /// Default mode word for a freshly created entry of this kind.
    pub fn default_mode(self) -> u32 {
        match self {
            EntryKind::File => 0o644,
            EntryKind::Directory => DMDIR | 0o755,
            EntryKind::Symlink => DMSYMLINK | 0o777,
        }
    }
}

/// Metadata common to every entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Logical identifier, unique within one backend instance.
    pub id: u32,
    /// Base name; empty only for the root.
    pub name: String,
    pub kind: EntryKind,
    /// Byte length for files, 0 for directories and symlinks.
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub created_at: i64,
    pub modified_at: i64,
    pub accessed_at: i64,
    /// Permission and type word, 9P layout.
    pub mode: u32,
    pub owner: String,
    pub group: String,
}

impl Metadata {
    /// Fresh metadata for a new entry, stamped with the current time.
    pub fn new(id: u32, name: impl Into<String>, kind: EntryKind, owner: &str) -> Metadata {
        let now = unix_now();
        Metadata {
            id,
            name: name.into(),
            kind,
            size: 0,
            created_at: now,
            modified_at: now,
            accessed_at: now,
            mode: kind.default_mode(),
            owner: owner.to_owned(),
            group: owner.to_owned(),
        }
    }
}

/// Handle to an entry as returned by [`super::Vfs`] operations.
///
/// An entry is a snapshot: it records the metadata observed when the
/// operation ran, plus the parent link used by path reconstruction. A mount
/// multiplexer may stamp a prefix onto returned entries; the stamp is
/// write-once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub meta: Metadata,
    /// Logical id of the containing directory; 0 for the root.
    pub parent_id: u32,
    prefix: Option<String>,
}

impl Entry {
    pub fn new(meta: Metadata, parent_id: u32) -> Entry {
        Entry { meta, parent_id, prefix: None }
    }

    pub fn is_file(&self) -> bool {
        self.meta.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.meta.kind == EntryKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.meta.kind == EntryKind::Symlink
    }

    /// The mount prefix stamped by a multiplexer, if any.
    pub fn mount_prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Stamps the mount prefix. An already-stamped entry keeps its inner
    /// prefix behind the new one, so stacked multiplexers compose into one
    /// fully qualified prefix.
    pub fn stamp_prefix(mut self, prefix: &str) -> Entry {
        self.prefix = match self.prefix.take() {
            Some(inner) => Some(format!("{prefix}{inner}")),
            None => Some(prefix.to_owned()),
        };
        self
    }

    /// Replaces the stamp wholesale. Used when a multiplexer peels its own
    /// prefix off before delegating to the owning backend.
    pub(crate) fn with_prefix(mut self, prefix: Option<String>) -> Entry {
        self.prefix = prefix;
        self
    }
}

/// Current time as seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}
