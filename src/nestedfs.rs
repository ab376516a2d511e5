//! Nested mount multiplexer.
//!
//! [`NestedFs`] owns an insertion-ordered set of `prefix -> backend`
//! mounts and routes every operation to the backend with the longest
//! matching prefix. The root is answered by the multiplexer itself and
//! lists the mounts as directories. Entries coming back from a backend are
//! stamped with the winning prefix so their reported paths stay fully
//! qualified.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::vfs::{path, unix_now, Entry, EntryKind, Error, Metadata, Result, Vfs, DMDIR};

/// Logical id of the synthetic root.
const ROOT_ID: u32 = 0;

/// Logical id reported for synthesised resource-fork entries.
const FORK_ID: u32 = u32::MAX;

struct Mount {
    prefix: String,
    backend: Arc<dyn Vfs>,
}

/// Path-prefix multiplexer over other VFS backends.
pub struct NestedFs {
    created_at: i64,
    mounts: RwLock<Vec<Mount>>,
}

impl Default for NestedFs {
    fn default() -> Self {
        NestedFs::new()
    }
}

impl NestedFs {
    pub fn new() -> NestedFs {
        NestedFs { created_at: unix_now(), mounts: RwLock::new(Vec::new()) }
    }

    /// Registers a backend under an absolute prefix. The prefix must not be
    /// the root and must not already be mounted.
    pub async fn mount(&self, prefix: &str, backend: Arc<dyn Vfs>) -> Result<()> {
        let prefix = path::normalize(prefix)?;
        if prefix == "/" {
            return Err(Error::Invalid);
        }
        let mut mounts = self.mounts.write().await;
        if mounts.iter().any(|m| m.prefix == prefix) {
            return Err(Error::AlreadyExists);
        }
        debug!(%prefix, "mounted backend");
        mounts.push(Mount { prefix, backend });
        Ok(())
    }

    /// Registered prefixes, in mount order.
    pub async fn mount_prefixes(&self) -> Vec<String> {
        self.mounts.read().await.iter().map(|m| m.prefix.clone()).collect()
    }

    /// Picks the backend owning `vpath`: the longest prefix that either
    /// equals the path or is followed in it by a separator. Returns the
    /// prefix, the backend, and the backend-relative remainder.
    async fn route(&self, vpath: &str) -> Result<(String, Arc<dyn Vfs>, String)> {
        let mounts = self.mounts.read().await;
        let mut best: Option<&Mount> = None;
        for mount in mounts.iter() {
            let matches = vpath == mount.prefix
                || vpath.starts_with(&mount.prefix)
                    && vpath.as_bytes().get(mount.prefix.len()) == Some(&b'/');
            if matches && best.is_none_or(|b| mount.prefix.len() > b.prefix.len()) {
                best = Some(mount);
            }
        }
        let mount = best.ok_or(Error::NotFound)?;
        let rest = &vpath[mount.prefix.len()..];
        let rel = if rest.is_empty() { "/".to_owned() } else { rest.to_owned() };
        Ok((mount.prefix.clone(), Arc::clone(&mount.backend), rel))
    }

    fn root_entry(&self) -> Entry {
        let mut meta = Metadata::new(ROOT_ID, "", EntryKind::Directory, "nested");
        meta.created_at = self.created_at;
        meta.modified_at = self.created_at;
        meta.accessed_at = self.created_at;
        Entry::new(meta, 0)
    }

    fn fork_entry(name: &str) -> Entry {
        let mut meta = Metadata::new(FORK_ID, name, EntryKind::File, "nested");
        meta.mode = 0o444;
        Entry::new(meta, ROOT_ID)
    }
}

/// True when the final component names a macOS resource fork. Such paths
/// read as present-but-empty without consulting any backend.
fn is_resource_fork(vpath: &str) -> bool {
    vpath.rsplit('/').next().is_some_and(|name| name.starts_with("._"))
}

#[async_trait]
impl Vfs for NestedFs {
    async fn root(&self) -> Result<Entry> {
        Ok(self.root_entry())
    }

    async fn get(&self, p: &str) -> Result<Entry> {
        let vpath = path::normalize(p)?;
        if vpath == "/" {
            return Ok(self.root_entry());
        }
        if is_resource_fork(&vpath) {
            let (_, name) = path::parent_and_name(&vpath)?;
            return Ok(Self::fork_entry(&name));
        }
        let (prefix, backend, rel) = self.route(&vpath).await?;
        Ok(backend.get(&rel).await?.stamp_prefix(&prefix))
    }

    async fn exists(&self, p: &str) -> bool {
        let Ok(vpath) = path::normalize(p) else { return false };
        if vpath == "/" || is_resource_fork(&vpath) {
            return true;
        }
        match self.route(&vpath).await {
            Ok((_, backend, rel)) => backend.exists(&rel).await,
            Err(_) => false,
        }
    }

    async fn file_create(&self, p: &str) -> Result<Entry> {
        let vpath = path::normalize(p)?;
        if vpath == "/" {
            return Err(Error::Invalid);
        }
        let (prefix, backend, rel) = self.route(&vpath).await?;
        Ok(backend.file_create(&rel).await?.stamp_prefix(&prefix))
    }

    async fn file_read(&self, p: &str) -> Result<Vec<u8>> {
        let vpath = path::normalize(p)?;
        if vpath == "/" {
            return Err(Error::NotFile);
        }
        if is_resource_fork(&vpath) {
            return Ok(Vec::new());
        }
        let (_, backend, rel) = self.route(&vpath).await?;
        backend.file_read(&rel).await
    }

    async fn file_write(&self, p: &str, data: &[u8]) -> Result<()> {
        let vpath = path::normalize(p)?;
        if vpath == "/" {
            return Err(Error::NotFile);
        }
        let (_, backend, rel) = self.route(&vpath).await?;
        backend.file_write(&rel, data).await
    }

    async fn file_concat(&self, p: &str, data: &[u8]) -> Result<()> {
        let vpath = path::normalize(p)?;
        if vpath == "/" {
            return Err(Error::NotFile);
        }
        let (_, backend, rel) = self.route(&vpath).await?;
        backend.file_concat(&rel, data).await
    }

    async fn file_delete(&self, p: &str) -> Result<()> {
        let vpath = path::normalize(p)?;
        if vpath == "/" {
            return Err(Error::Invalid);
        }
        let (_, backend, rel) = self.route(&vpath).await?;
        backend.file_delete(&rel).await
    }

    async fn dir_create(&self, p: &str) -> Result<Entry> {
        let vpath = path::normalize(p)?;
        if vpath == "/" {
            return Err(Error::AlreadyExists);
        }
        let (prefix, backend, rel) = self.route(&vpath).await?;
        Ok(backend.dir_create(&rel).await?.stamp_prefix(&prefix))
    }

    async fn dir_list(&self, p: &str) -> Result<Vec<Entry>> {
        let vpath = path::normalize(p)?;
        if vpath == "/" {
            let mounts = self.mounts.read().await;
            let mut entries = Vec::with_capacity(mounts.len());
            for (index, mount) in mounts.iter().enumerate() {
                let mut meta = Metadata::new(
                    index as u32 + 1,
                    &mount.prefix[1..],
                    EntryKind::Directory,
                    "nested",
                );
                meta.mode = DMDIR | 0o755;
                meta.created_at = self.created_at;
                entries.push(Entry::new(meta, ROOT_ID));
            }
            return Ok(entries);
        }
        let (prefix, backend, rel) = self.route(&vpath).await?;
        let listed = backend.dir_list(&rel).await?;
        Ok(listed.into_iter().map(|e| e.stamp_prefix(&prefix)).collect())
    }

    async fn dir_delete(&self, p: &str) -> Result<()> {
        let vpath = path::normalize(p)?;
        if vpath == "/" {
            return Err(Error::Invalid);
        }
        let (_, backend, rel) = self.route(&vpath).await?;
        backend.dir_delete(&rel).await
    }

    async fn link_create(&self, target: &str, link: &str) -> Result<Entry> {
        let vpath = path::normalize(link)?;
        if vpath == "/" {
            return Err(Error::Invalid);
        }
        let (prefix, backend, rel) = self.route(&vpath).await?;
        Ok(backend.link_create(target, &rel).await?.stamp_prefix(&prefix))
    }

    async fn link_read(&self, p: &str) -> Result<String> {
        let vpath = path::normalize(p)?;
        if vpath == "/" {
            return Err(Error::NotSymlink);
        }
        let (_, backend, rel) = self.route(&vpath).await?;
        backend.link_read(&rel).await
    }

    async fn link_delete(&self, p: &str) -> Result<()> {
        let vpath = path::normalize(p)?;
        if vpath == "/" {
            return Err(Error::Invalid);
        }
        let (_, backend, rel) = self.route(&vpath).await?;
        backend.link_delete(&rel).await
    }

    async fn rename(&self, old: &str, new: &str) -> Result<Entry> {
        let old = path::normalize(old)?;
        let new = path::normalize(new)?;
        if old == "/" || new == "/" {
            return Err(Error::Invalid);
        }
        let (old_prefix, backend, old_rel) = self.route(&old).await?;
        let (new_prefix, _, new_rel) = self.route(&new).await?;
        if old_prefix != new_prefix {
            return Err(Error::CrossMount);
        }
        Ok(backend.rename(&old_rel, &new_rel).await?.stamp_prefix(&old_prefix))
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<Entry> {
        let src = path::normalize(src)?;
        let dst = path::normalize(dst)?;
        if src == dst {
            return Err(Error::Invalid);
        }
        if src == "/" || dst == "/" {
            return Err(Error::Invalid);
        }
        let (src_prefix, src_fs, src_rel) = self.route(&src).await?;
        let (dst_prefix, dst_fs, dst_rel) = self.route(&dst).await?;
        if src_prefix == dst_prefix {
            return Ok(src_fs.copy(&src_rel, &dst_rel).await?.stamp_prefix(&src_prefix));
        }

        // Different backends: replay the tree through reads and writes.
        if dst_fs.exists(&dst_rel).await {
            return Err(Error::AlreadyExists);
        }
        let mut work = VecDeque::from([(src_rel, dst_rel.clone())]);
        while let Some((from, to)) = work.pop_front() {
            let entry = src_fs.get(&from).await?;
            if entry.is_dir() {
                dst_fs.dir_create(&to).await?;
                for child in src_fs.dir_list(&from).await? {
                    // Walk in listing order so the destination keeps it.
                    work.push_back((
                        path::join(&from, &child.meta.name),
                        path::join(&to, &child.meta.name),
                    ));
                }
            } else if entry.is_symlink() {
                let target = src_fs.link_read(&from).await?;
                dst_fs.link_create(&target, &to).await?;
            } else {
                let body = src_fs.file_read(&from).await?;
                dst_fs.file_write(&to, &body).await?;
            }
        }
        Ok(dst_fs.get(&dst_rel).await?.stamp_prefix(&dst_prefix))
    }

    async fn move_entry(&self, src: &str, dst: &str) -> Result<Entry> {
        let src = path::normalize(src)?;
        let dst = path::normalize(dst)?;
        if src == "/" || dst == "/" {
            return Err(Error::Invalid);
        }
        let (src_prefix, backend, src_rel) = self.route(&src).await?;
        let (dst_prefix, _, dst_rel) = self.route(&dst).await?;
        if src_prefix != dst_prefix {
            return Err(Error::CrossMount);
        }
        Ok(backend.move_entry(&src_rel, &dst_rel).await?.stamp_prefix(&src_prefix))
    }

    async fn delete(&self, p: &str) -> Result<()> {
        let vpath = path::normalize(p)?;
        if vpath == "/" {
            return Err(Error::Invalid);
        }
        let (_, backend, rel) = self.route(&vpath).await?;
        backend.delete(&rel).await
    }

    async fn get_path(&self, entry: &Entry) -> Result<String> {
        let Some(stamp) = entry.mount_prefix() else {
            // Synthetic entries the multiplexer produced itself.
            if entry.meta.id == ROOT_ID && entry.meta.name.is_empty() {
                return Ok("/".to_owned());
            }
            return Ok(format!("/{}", entry.meta.name));
        };
        let (prefix, backend, rest) = self.route(stamp).await?;
        let inner_prefix = if rest == "/" { None } else { Some(rest) };
        let inner = entry.clone().with_prefix(inner_prefix);
        let inner_path = backend.get_path(&inner).await?;
        if inner_path == "/" {
            Ok(prefix)
        } else {
            Ok(format!("{prefix}{inner_path}"))
        }
    }

    async fn destroy(&self) -> Result<()> {
        let mounts = self.mounts.read().await;
        for mount in mounts.iter() {
            mount.backend.destroy().await?;
        }
        Ok(())
    }
}
