//! Local pass-through VFS.
//!
//! [`LocalFs`] maps VFS paths onto a host directory and delegates every
//! operation to the host file system. It exists mostly so a
//! [`crate::nestedfs::NestedFs`] can mount host-provided roots, and as the
//! reference backend in tests. Host failures project onto the common error
//! taxonomy via [`Error::from_io`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;

use crate::vfs::{path, Entry, EntryKind, Error, Metadata, Result, Vfs, DMDIR, DMSYMLINK};

const OWNER: &str = "local";

/// Logical id reserved for the mapped root directory.
const ROOT_ID: u32 = 1;

/// Host-directory pass-through backend.
pub struct LocalFs {
    root: PathBuf,
    table: Mutex<PathTable>,
}

/// Path to id bookkeeping. Ids are handed out lazily as paths are first
/// observed and stay stable until the entry is removed.
struct PathTable {
    next_id: u32,
    paths: HashMap<u32, String>,
    ids: HashMap<String, u32>,
}

impl PathTable {
    fn new() -> PathTable {
        let mut table =
            PathTable { next_id: ROOT_ID + 1, paths: HashMap::new(), ids: HashMap::new() };
        table.paths.insert(ROOT_ID, "/".to_owned());
        table.ids.insert("/".to_owned(), ROOT_ID);
        table
    }

    fn ensure(&mut self, vpath: &str) -> u32 {
        if let Some(id) = self.ids.get(vpath) {
            return *id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.paths.insert(id, vpath.to_owned());
        self.ids.insert(vpath.to_owned(), id);
        id
    }

    fn path_of(&self, id: u32) -> Option<String> {
        self.paths.get(&id).cloned()
    }

    /// Drops the path and everything beneath it.
    fn forget(&mut self, vpath: &str) {
        let prefix = format!("{vpath}/");
        let victims: Vec<u32> = self
            .paths
            .iter()
            .filter(|(_, p)| p.as_str() == vpath || p.starts_with(&prefix))
            .map(|(id, _)| *id)
            .collect();
        for id in victims {
            if let Some(p) = self.paths.remove(&id) {
                self.ids.remove(&p);
            }
        }
    }

    /// Rewrites the path of an entry and of all its descendants.
    fn rename(&mut self, old: &str, new: &str) {
        let old_prefix = format!("{old}/");
        let moves: Vec<(u32, String)> = self
            .paths
            .iter()
            .filter_map(|(id, p)| {
                if p.as_str() == old {
                    Some((*id, new.to_owned()))
                } else {
                    p.strip_prefix(&old_prefix).map(|rest| (*id, format!("{new}/{rest}")))
                }
            })
            .collect();
        for (id, updated) in moves {
            if let Some(previous) = self.paths.insert(id, updated.clone()) {
                self.ids.remove(&previous);
            }
            self.ids.insert(updated, id);
        }
    }
}

fn sys_secs(time: std::io::Result<SystemTime>) -> i64 {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

impl LocalFs {
    /// Creates a pass-through over `root`, canonicalising it when possible.
    pub fn new(root: impl Into<PathBuf>) -> LocalFs {
        let root = root.into();
        let root = root.canonicalize().unwrap_or(root);
        LocalFs { root, table: Mutex::new(PathTable::new()) }
    }

    fn host_path(&self, vpath: &str) -> PathBuf {
        if vpath == "/" {
            self.root.clone()
        } else {
            self.root.join(&vpath[1..])
        }
    }

    /// Builds an entry for a normalised path from host metadata.
    async fn entry_at(&self, vpath: &str) -> Result<Entry> {
        let meta = fs::symlink_metadata(self.host_path(vpath)).await.map_err(Error::from_io)?;

        let kind = if meta.is_dir() {
            EntryKind::Directory
        } else if meta.is_symlink() {
            EntryKind::Symlink
        } else {
            EntryKind::File
        };

        let (name, parent_id) = if vpath == "/" {
            (String::new(), 0)
        } else {
            let (parent, name) = path::parent_and_name(vpath)?;
            let mut table = self.table.lock().await;
            (name, table.ensure(&parent))
        };
        let id = self.table.lock().await.ensure(vpath);

        #[cfg(unix)]
        let perms = {
            use std::os::unix::fs::PermissionsExt;
            meta.permissions().mode() & 0o777
        };
        #[cfg(not(unix))]
        let perms = if meta.permissions().readonly() { 0o555 } else { 0o755 };

        let mode = match kind {
            EntryKind::Directory => DMDIR | perms,
            EntryKind::Symlink => DMSYMLINK | 0o777,
            EntryKind::File => perms,
        };

        Ok(Entry::new(
            Metadata {
                id,
                name,
                kind,
                size: if kind == EntryKind::File { meta.len() } else { 0 },
                created_at: sys_secs(meta.created()),
                modified_at: sys_secs(meta.modified()),
                accessed_at: sys_secs(meta.accessed()),
                mode,
                owner: OWNER.to_owned(),
                group: OWNER.to_owned(),
            },
            parent_id,
        ))
    }

    /// Verifies that the parent of `vpath` exists and is a directory.
    async fn check_parent(&self, vpath: &str) -> Result<()> {
        let (parent, _) = path::parent_and_name(vpath)?;
        let meta = fs::symlink_metadata(self.host_path(&parent)).await.map_err(Error::from_io)?;
        if !meta.is_dir() {
            return Err(Error::NotDirectory);
        }
        Ok(())
    }
}

#[async_trait]
impl Vfs for LocalFs {
    async fn root(&self) -> Result<Entry> {
        self.entry_at("/").await
    }

    async fn get(&self, p: &str) -> Result<Entry> {
        self.entry_at(&path::normalize(p)?).await
    }

    async fn file_create(&self, p: &str) -> Result<Entry> {
        let vpath = path::normalize(p)?;
        self.check_parent(&vpath).await?;
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.host_path(&vpath))
            .await
            .map_err(Error::from_io)?;
        self.entry_at(&vpath).await
    }

    async fn file_read(&self, p: &str) -> Result<Vec<u8>> {
        let vpath = path::normalize(p)?;
        let meta = fs::symlink_metadata(self.host_path(&vpath)).await.map_err(Error::from_io)?;
        if meta.is_dir() {
            return Err(Error::NotFile);
        }
        fs::read(self.host_path(&vpath)).await.map_err(Error::from_io)
    }

    async fn file_write(&self, p: &str, data: &[u8]) -> Result<()> {
        let vpath = path::normalize(p)?;
        self.check_parent(&vpath).await?;
        fs::write(self.host_path(&vpath), data).await.map_err(Error::from_io)
    }

    async fn file_concat(&self, p: &str, data: &[u8]) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        let vpath = path::normalize(p)?;
        self.check_parent(&vpath).await?;
        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.host_path(&vpath))
            .await
            .map_err(Error::from_io)?;
        file.write_all(data).await.map_err(Error::from_io)?;
        file.flush().await.map_err(Error::from_io)
    }

    async fn file_delete(&self, p: &str) -> Result<()> {
        let vpath = path::normalize(p)?;
        let meta = fs::symlink_metadata(self.host_path(&vpath)).await.map_err(Error::from_io)?;
        if meta.is_dir() {
            return Err(Error::NotFile);
        }
        fs::remove_file(self.host_path(&vpath)).await.map_err(Error::from_io)?;
        self.table.lock().await.forget(&vpath);
        Ok(())
    }

    async fn dir_create(&self, p: &str) -> Result<Entry> {
        let vpath = path::normalize(p)?;
        if vpath == "/" {
            return Err(Error::AlreadyExists);
        }
        self.check_parent(&vpath).await?;
        fs::create_dir(self.host_path(&vpath)).await.map_err(Error::from_io)?;
        self.entry_at(&vpath).await
    }

    async fn dir_list(&self, p: &str) -> Result<Vec<Entry>> {
        let vpath = path::normalize(p)?;
        let meta = fs::symlink_metadata(self.host_path(&vpath)).await.map_err(Error::from_io)?;
        if !meta.is_dir() {
            return Err(Error::NotDirectory);
        }

        let mut reader = fs::read_dir(self.host_path(&vpath)).await.map_err(Error::from_io)?;
        let mut names = Vec::new();
        while let Some(item) = reader.next_entry().await.map_err(Error::from_io)? {
            names.push(item.file_name().to_string_lossy().into_owned());
        }
        // Host readdir order is arbitrary; pin it down.
        names.sort();

        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            entries.push(self.entry_at(&path::join(&vpath, &name)).await?);
        }
        Ok(entries)
    }

    async fn dir_delete(&self, p: &str) -> Result<()> {
        let vpath = path::normalize(p)?;
        if vpath == "/" {
            return Err(Error::Invalid);
        }
        let meta = fs::symlink_metadata(self.host_path(&vpath)).await.map_err(Error::from_io)?;
        if !meta.is_dir() {
            return Err(Error::NotDirectory);
        }
        fs::remove_dir(self.host_path(&vpath)).await.map_err(Error::from_io)?;
        self.table.lock().await.forget(&vpath);
        Ok(())
    }

    async fn link_create(&self, target: &str, link: &str) -> Result<Entry> {
        let vpath = path::normalize(link)?;
        self.check_parent(&vpath).await?;
        fs::symlink(target, self.host_path(&vpath)).await.map_err(Error::from_io)?;
        self.entry_at(&vpath).await
    }

    async fn link_read(&self, p: &str) -> Result<String> {
        let vpath = path::normalize(p)?;
        let meta = fs::symlink_metadata(self.host_path(&vpath)).await.map_err(Error::from_io)?;
        if !meta.is_symlink() {
            return Err(Error::NotSymlink);
        }
        let target = fs::read_link(self.host_path(&vpath)).await.map_err(Error::from_io)?;
        Ok(target.to_string_lossy().into_owned())
    }

    async fn link_delete(&self, p: &str) -> Result<()> {
        let vpath = path::normalize(p)?;
        let meta = fs::symlink_metadata(self.host_path(&vpath)).await.map_err(Error::from_io)?;
        if !meta.is_symlink() {
            return Err(Error::NotSymlink);
        }
        fs::remove_file(self.host_path(&vpath)).await.map_err(Error::from_io)?;
        self.table.lock().await.forget(&vpath);
        Ok(())
    }

    async fn rename(&self, old: &str, new: &str) -> Result<Entry> {
        let old = path::normalize(old)?;
        let new = path::normalize(new)?;
        let (old_parent, _) = path::parent_and_name(&old)?;
        let (new_parent, _) = path::parent_and_name(&new)?;
        if old_parent != new_parent {
            return Err(Error::Invalid);
        }
        if fs::symlink_metadata(self.host_path(&new)).await.is_ok() {
            return Err(Error::AlreadyExists);
        }
        fs::rename(self.host_path(&old), self.host_path(&new))
            .await
            .map_err(Error::from_io)?;
        let mut table = self.table.lock().await;
        table.forget(&new);
        table.rename(&old, &new);
        drop(table);
        self.entry_at(&new).await
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<Entry> {
        let src = path::normalize(src)?;
        let dst = path::normalize(dst)?;
        if src == dst || src == "/" || dst.starts_with(&format!("{src}/")) {
            return Err(Error::Invalid);
        }
        if fs::symlink_metadata(self.host_path(&dst)).await.is_ok() {
            return Err(Error::AlreadyExists);
        }
        self.check_parent(&dst).await?;

        let mut work = vec![(src.clone(), dst.clone())];
        while let Some((from, to)) = work.pop() {
            let meta =
                fs::symlink_metadata(self.host_path(&from)).await.map_err(Error::from_io)?;
            if meta.is_dir() {
                fs::create_dir(self.host_path(&to)).await.map_err(Error::from_io)?;
                let mut reader =
                    fs::read_dir(self.host_path(&from)).await.map_err(Error::from_io)?;
                while let Some(item) = reader.next_entry().await.map_err(Error::from_io)? {
                    let name = item.file_name().to_string_lossy().into_owned();
                    work.push((path::join(&from, &name), path::join(&to, &name)));
                }
            } else if meta.is_symlink() {
                let target =
                    fs::read_link(self.host_path(&from)).await.map_err(Error::from_io)?;
                fs::symlink(target, self.host_path(&to)).await.map_err(Error::from_io)?;
            } else {
                fs::copy(self.host_path(&from), self.host_path(&to))
                    .await
                    .map_err(Error::from_io)?;
            }
        }
        self.entry_at(&dst).await
    }

    async fn move_entry(&self, src: &str, dst: &str) -> Result<Entry> {
        let src = path::normalize(src)?;
        let dst = path::normalize(dst)?;
        if src == dst || src == "/" || dst.starts_with(&format!("{src}/")) {
            return Err(Error::Invalid);
        }
        if fs::symlink_metadata(self.host_path(&dst)).await.is_ok() {
            return Err(Error::AlreadyExists);
        }
        self.check_parent(&dst).await?;
        fs::rename(self.host_path(&src), self.host_path(&dst))
            .await
            .map_err(Error::from_io)?;
        let mut table = self.table.lock().await;
        table.forget(&dst);
        table.rename(&src, &dst);
        drop(table);
        self.entry_at(&dst).await
    }

    async fn delete(&self, p: &str) -> Result<()> {
        let vpath = path::normalize(p)?;
        if vpath == "/" {
            return Err(Error::Invalid);
        }
        let meta = fs::symlink_metadata(self.host_path(&vpath)).await.map_err(Error::from_io)?;
        if meta.is_dir() {
            fs::remove_dir(self.host_path(&vpath)).await.map_err(Error::from_io)?;
        } else {
            fs::remove_file(self.host_path(&vpath)).await.map_err(Error::from_io)?;
        }
        self.table.lock().await.forget(&vpath);
        Ok(())
    }

    async fn get_path(&self, entry: &Entry) -> Result<String> {
        self.table.lock().await.path_of(entry.meta.id).ok_or(Error::NotFound)
    }

    async fn destroy(&self) -> Result<()> {
        let mut table = self.table.lock().await;
        *table = PathTable::new();
        Ok(())
    }
}
