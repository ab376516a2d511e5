//! The Virtual File System interface --- [`Vfs`] --- and its error taxonomy.

mod entry;
pub mod path;

use std::io;

use async_trait::async_trait;

pub use entry::{unix_now, Entry, EntryKind, Metadata, DMDIR, DMSYMLINK};

/// Result of [`Vfs`] operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Maximum length of a single path component.
pub const MAX_NAME_LEN: usize = 255;

/// Maximum length of paths passed into [`Vfs`] methods.
pub const MAX_PATH_LEN: usize = 1024;

/// [`Vfs`] errors.
///
/// The set is closed; every backend projects its internal failures onto
/// these kinds so callers and protocol adapters can match on them.
#[derive(Debug)]
pub enum Error {
    /// No entry at the given path, or a missing walk component.
    NotFound,
    /// The name is already taken in the target directory.
    AlreadyExists,
    /// A directory operation was attempted on a non-directory.
    NotDirectory,
    /// A file operation was attempted on a non-file.
    NotFile,
    /// A symlink operation was attempted on a non-symlink.
    NotSymlink,
    /// Directory removal was requested on a non-empty directory.
    NotEmpty,
    /// The operation is forbidden by mode bits or protocol state.
    Permission,
    /// Rename or move across different backends of a mount multiplexer.
    CrossMount,
    /// A malformed or unsupported metadata record was encountered.
    CorruptData,
    /// An underlying record store or host file system failure.
    Io(io::Error),
    /// Malformed input: empty name, relative path, same source and
    /// destination, and similar caller mistakes.
    Invalid,
}

impl Error {
    /// Stable taxonomy name, used verbatim in protocol error replies.
    pub fn name(&self) -> &'static str {
        match self {
            Error::NotFound => "NotFound",
            Error::AlreadyExists => "AlreadyExists",
            Error::NotDirectory => "NotDirectory",
            Error::NotFile => "NotFile",
            Error::NotSymlink => "NotSymlink",
            Error::NotEmpty => "NotEmpty",
            Error::Permission => "Permission",
            Error::CrossMount => "CrossMount",
            Error::CorruptData => "CorruptData",
            Error::Io(_) => "Io",
            Error::Invalid => "Invalid",
        }
    }

    /// Projects a host I/O failure onto the taxonomy.
    pub fn from_io(err: io::Error) -> Error {
        use io::ErrorKind::*;
        match err.kind() {
            NotFound => Error::NotFound,
            AlreadyExists => Error::AlreadyExists,
            PermissionDenied => Error::Permission,
            NotADirectory => Error::NotDirectory,
            IsADirectory => Error::NotFile,
            DirectoryNotEmpty => Error::NotEmpty,
            InvalidInput => Error::Invalid,
            _ => Error::Io(err),
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::Io(a), Error::Io(b)) => a.kind() == b.kind(),
            _ => self.name() == other.name(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(cause) => write!(f, "Io: {cause}"),
            other => f.write_str(other.name()),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(cause) => Some(cause),
            _ => None,
        }
    }
}

/// Virtual File System interface.
///
/// All paths are absolute and separator-normalised; [`path::normalize`]
/// defines the accepted grammar. Lookup is case-sensitive.
#[async_trait]
pub trait Vfs: Send + Sync {
    /// Returns the root directory entry.
    async fn root(&self) -> Result<Entry>;

    /// Resolves a path to its entry.
    async fn get(&self, path: &str) -> Result<Entry>;

    /// Reports whether a path resolves. Never fails; any error reads as `false`.
    async fn exists(&self, path: &str) -> bool {
        self.get(path).await.is_ok()
    }

    /// Creates an empty file. The parent must exist and be a directory.
    async fn file_create(&self, path: &str) -> Result<Entry>;

    /// Reads a whole file body and bumps its access time.
    async fn file_read(&self, path: &str) -> Result<Vec<u8>>;

    /// Replaces a file's content, creating the file if absent.
    async fn file_write(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Appends to a file's content, creating the file if absent.
    async fn file_concat(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Deletes a file.
    async fn file_delete(&self, path: &str) -> Result<()>;

    /// Creates an empty directory. The parent must exist.
    async fn dir_create(&self, path: &str) -> Result<Entry>;

    /// Lists a directory's entries in insertion order.
    async fn dir_list(&self, path: &str) -> Result<Vec<Entry>>;

    /// Deletes an empty directory.
    async fn dir_delete(&self, path: &str) -> Result<()>;

    /// Creates a symlink at `link` pointing at `target`. The target is
    /// stored unresolved.
    async fn link_create(&self, target: &str, link: &str) -> Result<Entry>;

    /// Reads a symlink's target string.
    async fn link_read(&self, path: &str) -> Result<String>;

    /// Deletes a symlink.
    async fn link_delete(&self, path: &str) -> Result<()>;

    /// Renames an entry within its parent directory.
    async fn rename(&self, old: &str, new: &str) -> Result<Entry>;

    /// Copies an entry. Directories copy deeply; file bodies are duplicated
    /// by value.
    async fn copy(&self, src: &str, dst: &str) -> Result<Entry>;

    /// Moves an entry, possibly across parent directories.
    async fn move_entry(&self, src: &str, dst: &str) -> Result<Entry>;

    /// Deletes an entry of any kind. The root cannot be deleted.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Returns the canonical absolute path of an entry.
    async fn get_path(&self, entry: &Entry) -> Result<String>;

    /// Releases backend resources.
    async fn destroy(&self) -> Result<()>;
}
