//! Database-backed VFS.
//!
//! [`DbFs`] keeps the entry tree in a metadata record store and file bodies
//! in a separate data record store, split into chunks of at most
//! [`CHUNK_SIZE`](crate::codec::CHUNK_SIZE) bytes. Logical entry ids are
//! assigned by the backend itself; an id-indirection table maps them onto
//! whatever ids the record stores hand out, so a store may re-place records
//! without disturbing the tree.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::codec::{self, Record, Tail, CHUNK_SIZE};
use crate::store::RecordStore;
use crate::vfs::{path, unix_now, Entry, EntryKind, Error, Metadata, Result, Vfs};

/// Owner and group recorded on entries this backend creates.
const OWNER: &str = "ninefs";

/// Persistent chunked-store VFS backend.
pub struct DbFs {
    meta: Arc<dyn RecordStore>,
    data: Arc<dyn RecordStore>,
    state: RwLock<State>,
}

/// In-memory bookkeeping guarded by the instance lock.
struct State {
    /// Logical id to record-store id.
    table: HashMap<u32, u32>,
    next_id: u32,
    root_id: u32,
}

impl DbFs {
    /// Opens a store pair, resuming a previously written tree or
    /// bootstrapping a fresh root directory.
    pub async fn open(meta: Arc<dyn RecordStore>, data: Arc<dyn RecordStore>) -> Result<DbFs> {
        let mut table = HashMap::new();
        let mut root_id = 0u32;
        let mut max_id = 0u32;

        for store_id in meta.ids().await.map_err(Error::Io)? {
            let bytes = meta.get(store_id).await.map_err(Error::Io)?;
            let record = codec::decode(&bytes)?;
            if record.parent_id == 0 {
                root_id = record.meta.id;
            }
            max_id = max_id.max(record.meta.id);
            table.insert(record.meta.id, store_id);
        }

        let fs = DbFs {
            meta,
            data,
            state: RwLock::new(State { table, next_id: max_id + 1, root_id }),
        };

        if root_id == 0 {
            let mut state = fs.state.write().await;
            let id = alloc_id(&mut state);
            let root = Record {
                meta: Metadata::new(id, "", EntryKind::Directory, OWNER),
                parent_id: 0,
                tail: Tail::Directory { children: Vec::new() },
            };
            fs.save_new(&mut state, &root).await?;
            state.root_id = id;
            debug!(root_id = id, "bootstrapped fresh tree");
        } else {
            let entries = fs.state.read().await.table.len();
            debug!(root_id, entries, "resumed tree");
        }

        Ok(fs)
    }

    /// Loads the record behind a logical id.
    async fn load(&self, state: &State, id: u32) -> Result<Record> {
        let store_id = *state.table.get(&id).ok_or(Error::NotFound)?;
        let bytes = self.meta.get(store_id).await.map_err(Error::Io)?;
        codec::decode(&bytes)
    }

    /// Persists a brand-new record and registers it in the id table.
    async fn save_new(&self, state: &mut State, record: &Record) -> Result<()> {
        let mut buf = Vec::new();
        codec::encode(&mut buf, record).map_err(Error::Io)?;
        let store_id = self.meta.set(&buf).await.map_err(Error::Io)?;
        state.table.insert(record.meta.id, store_id);
        Ok(())
    }

    /// Rewrites an already-registered record in place.
    async fn save(&self, state: &State, record: &Record) -> Result<()> {
        let store_id = *state.table.get(&record.meta.id).ok_or(Error::NotFound)?;
        let mut buf = Vec::new();
        codec::encode(&mut buf, record).map_err(Error::Io)?;
        self.meta.update(store_id, &buf).await.map_err(Error::Io)
    }

    /// Scans a directory for a child by name.
    async fn find_child(
        &self,
        state: &State,
        dir: &Record,
        name: &str,
    ) -> Result<Option<Record>> {
        for child_id in dir.children() {
            let child = self.load(state, *child_id).await?;
            if child.meta.name == name {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    /// Walks a normalised path from the root.
    async fn resolve(&self, state: &State, path: &str) -> Result<Record> {
        let normalized = path::normalize(path)?;
        let mut current = self.load(state, state.root_id).await?;
        for component in path::split(&normalized) {
            if current.meta.kind != EntryKind::Directory {
                return Err(Error::NotDirectory);
            }
            current = self.find_child(state, &current, component).await?.ok_or(Error::NotFound)?;
        }
        Ok(current)
    }

    /// Resolves the parent directory of `path` together with the base name.
    async fn resolve_parent(&self, state: &State, p: &str) -> Result<(Record, String)> {
        let (parent_path, name) = path::parent_and_name(p)?;
        let parent = self.resolve(state, &parent_path).await?;
        if parent.meta.kind != EntryKind::Directory {
            return Err(Error::NotDirectory);
        }
        Ok((parent, name))
    }

    /// Creates a child under `path`'s parent. The caller picks the tail.
    async fn create_entry(&self, state: &mut State, p: &str, tail: Tail) -> Result<Record> {
        let (mut parent, name) = self.resolve_parent(state, p).await?;
        if self.find_child(state, &parent, &name).await?.is_some() {
            return Err(Error::AlreadyExists);
        }
        let id = alloc_id(state);
        let record = Record {
            meta: Metadata::new(id, name, tail.kind(), OWNER),
            parent_id: parent.meta.id,
            tail,
        };
        self.save_new(state, &record).await?;
        parent.children_mut()?.push(id);
        parent.meta.modified_at = unix_now();
        self.save(state, &parent).await?;
        Ok(record)
    }

    /// Stores `data` as fresh chunk records and returns their ids in order.
    async fn store_chunks(&self, data: &[u8]) -> Result<Vec<u32>> {
        let mut ids = Vec::with_capacity(data.len().div_ceil(CHUNK_SIZE).max(1));
        for segment in data.chunks(CHUNK_SIZE) {
            ids.push(self.data.set(segment).await.map_err(Error::Io)?);
        }
        Ok(ids)
    }

    async fn delete_chunks(&self, ids: &[u32]) -> Result<()> {
        for id in ids {
            self.data.delete(*id).await.map_err(Error::Io)?;
        }
        Ok(())
    }

    /// Resolves `path` to a file record, creating an empty one if the path
    /// does not exist yet.
    async fn file_for_write(&self, state: &mut State, p: &str) -> Result<Record> {
        match self.resolve(state, p).await {
            Ok(record) if record.meta.kind == EntryKind::File => Ok(record),
            Ok(_) => Err(Error::NotFile),
            Err(Error::NotFound) => {
                self.create_entry(state, p, Tail::File { chunk_ids: Vec::new() }).await
            }
            Err(err) => Err(err),
        }
    }

    /// Removes the entry at `path`, checking its kind when one is expected.
    async fn remove(&self, p: &str, expect: Option<EntryKind>) -> Result<()> {
        let mut state = self.state.write().await;
        let normalized = path::normalize(p)?;
        if normalized == "/" {
            return Err(Error::Invalid);
        }
        let (mut parent, name) = self.resolve_parent(&state, &normalized).await?;
        let child = self.find_child(&state, &parent, &name).await?.ok_or(Error::NotFound)?;
        match expect {
            Some(kind) if child.meta.kind != kind => {
                return Err(kind_mismatch(kind));
            }
            _ => {}
        }
        if child.meta.kind == EntryKind::Directory && !child.children().is_empty() {
            return Err(Error::NotEmpty);
        }

        if let Tail::File { chunk_ids } = &child.tail {
            self.delete_chunks(chunk_ids).await?;
        }
        let child_store = *state.table.get(&child.meta.id).ok_or(Error::NotFound)?;
        self.meta.delete(child_store).await.map_err(Error::Io)?;

        parent.children_mut()?.retain(|id| *id != child.meta.id);
        parent.meta.modified_at = unix_now();
        self.save(&state, &parent).await?;

        // The table entry is removed last, after the record it points at.
        state.table.remove(&child.meta.id);
        Ok(())
    }

    /// Copies one node, duplicating file chunks by value. Directories start
    /// out empty; the caller walks their children separately.
    async fn copy_node(
        &self,
        state: &mut State,
        source: &Record,
        new_parent: u32,
        new_name: &str,
    ) -> Result<Record> {
        let tail = match &source.tail {
            Tail::Directory { .. } => Tail::Directory { children: Vec::new() },
            Tail::Symlink { target } => Tail::Symlink { target: target.clone() },
            Tail::File { chunk_ids } => {
                let mut copied = Vec::with_capacity(chunk_ids.len());
                for chunk in chunk_ids {
                    let bytes = self.data.get(*chunk).await.map_err(Error::Io)?;
                    copied.push(self.data.set(&bytes).await.map_err(Error::Io)?);
                }
                Tail::File { chunk_ids: copied }
            }
        };
        let id = alloc_id(state);
        let mut meta = source.meta.clone();
        meta.id = id;
        meta.name = new_name.to_owned();
        let record = Record { meta, parent_id: new_parent, tail };
        self.save_new(state, &record).await?;
        Ok(record)
    }

    /// Appends `child` to a directory's child list.
    async fn append_child(&self, state: &State, dir_id: u32, child: u32) -> Result<()> {
        let mut dir = self.load(state, dir_id).await?;
        dir.children_mut()?.push(child);
        dir.meta.modified_at = unix_now();
        self.save(state, &dir).await
    }
}

fn alloc_id(state: &mut State) -> u32 {
    let id = state.next_id;
    state.next_id += 1;
    id
}

fn kind_mismatch(expected: EntryKind) -> Error {
    match expected {
        EntryKind::File => Error::NotFile,
        EntryKind::Directory => Error::NotDirectory,
        EntryKind::Symlink => Error::NotSymlink,
    }
}

#[async_trait]
impl Vfs for DbFs {
    async fn root(&self) -> Result<Entry> {
        let state = self.state.read().await;
        Ok(self.load(&state, state.root_id).await?.entry())
    }

    async fn get(&self, p: &str) -> Result<Entry> {
        let state = self.state.read().await;
        Ok(self.resolve(&state, p).await?.entry())
    }

    async fn file_create(&self, p: &str) -> Result<Entry> {
        let mut state = self.state.write().await;
        Ok(self.create_entry(&mut state, p, Tail::File { chunk_ids: Vec::new() }).await?.entry())
    }

    async fn file_read(&self, p: &str) -> Result<Vec<u8>> {
        let state = self.state.read().await;
        let mut record = self.resolve(&state, p).await?;
        let chunk_ids = record.chunk_ids()?.to_vec();
        let mut body = Vec::with_capacity(record.meta.size as usize);
        for chunk in chunk_ids {
            body.extend_from_slice(&self.data.get(chunk).await.map_err(Error::Io)?);
        }
        record.meta.accessed_at = unix_now();
        self.save(&state, &record).await?;
        Ok(body)
    }

    async fn file_write(&self, p: &str, data: &[u8]) -> Result<()> {
        let mut state = self.state.write().await;
        let mut record = self.file_for_write(&mut state, p).await?;
        let old_chunks = record.chunk_ids()?.to_vec();
        self.delete_chunks(&old_chunks).await?;
        record.tail = Tail::File { chunk_ids: self.store_chunks(data).await? };
        record.meta.size = data.len() as u64;
        record.meta.modified_at = unix_now();
        self.save(&state, &record).await
    }

    async fn file_concat(&self, p: &str, data: &[u8]) -> Result<()> {
        let mut state = self.state.write().await;
        let mut record = self.file_for_write(&mut state, p).await?;
        let appended = self.store_chunks(data).await?;
        match &mut record.tail {
            Tail::File { chunk_ids } => chunk_ids.extend(appended),
            _ => return Err(Error::NotFile),
        }
        record.meta.size += data.len() as u64;
        record.meta.modified_at = unix_now();
        self.save(&state, &record).await
    }

    async fn file_delete(&self, p: &str) -> Result<()> {
        self.remove(p, Some(EntryKind::File)).await
    }

    async fn dir_create(&self, p: &str) -> Result<Entry> {
        let mut state = self.state.write().await;
        Ok(self
            .create_entry(&mut state, p, Tail::Directory { children: Vec::new() })
            .await?
            .entry())
    }

    async fn dir_list(&self, p: &str) -> Result<Vec<Entry>> {
        let state = self.state.read().await;
        let dir = self.resolve(&state, p).await?;
        if dir.meta.kind != EntryKind::Directory {
            return Err(Error::NotDirectory);
        }
        let mut entries = Vec::with_capacity(dir.children().len());
        for child_id in dir.children() {
            entries.push(self.load(&state, *child_id).await?.entry());
        }
        Ok(entries)
    }

    async fn dir_delete(&self, p: &str) -> Result<()> {
        self.remove(p, Some(EntryKind::Directory)).await
    }

    async fn link_create(&self, target: &str, link: &str) -> Result<Entry> {
        let mut state = self.state.write().await;
        let tail = Tail::Symlink { target: target.to_owned() };
        Ok(self.create_entry(&mut state, link, tail).await?.entry())
    }

    async fn link_read(&self, p: &str) -> Result<String> {
        let state = self.state.read().await;
        let record = self.resolve(&state, p).await?;
        match record.tail {
            Tail::Symlink { target } => Ok(target),
            _ => Err(Error::NotSymlink),
        }
    }

    async fn link_delete(&self, p: &str) -> Result<()> {
        self.remove(p, Some(EntryKind::Symlink)).await
    }

    async fn rename(&self, old: &str, new: &str) -> Result<Entry> {
        let mut state = self.state.write().await;
        let (old_parent, old_name) = path::parent_and_name(old)?;
        let (new_parent, new_name) = path::parent_and_name(new)?;
        if old_parent != new_parent {
            return Err(Error::Invalid);
        }
        let parent = self.resolve(&state, &old_parent).await?;
        if self.find_child(&state, &parent, &new_name).await?.is_some() {
            return Err(Error::AlreadyExists);
        }
        let mut child =
            self.find_child(&state, &parent, &old_name).await?.ok_or(Error::NotFound)?;
        child.meta.name = new_name;
        child.meta.modified_at = unix_now();
        self.save(&state, &child).await?;
        Ok(child.entry())
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<Entry> {
        let mut state = self.state.write().await;
        let src = path::normalize(src)?;
        let dst = path::normalize(dst)?;
        if src == dst {
            return Err(Error::Invalid);
        }
        if src == "/" || dst.starts_with(&format!("{src}/")) {
            // A tree cannot be copied beneath itself.
            return Err(Error::Invalid);
        }
        let source = self.resolve(&state, &src).await?;
        let (mut dst_parent, dst_name) = self.resolve_parent(&state, &dst).await?;
        if self.find_child(&state, &dst_parent, &dst_name).await?.is_some() {
            return Err(Error::AlreadyExists);
        }

        let top = self.copy_node(&mut state, &source, dst_parent.meta.id, &dst_name).await?;
        dst_parent.children_mut()?.push(top.meta.id);
        dst_parent.meta.modified_at = unix_now();
        self.save(&state, &dst_parent).await?;

        // Breadth-first duplication preserves each directory's child order.
        let mut queue: VecDeque<(u32, u32)> =
            source.children().iter().map(|c| (*c, top.meta.id)).collect();
        while let Some((src_child_id, new_parent_id)) = queue.pop_front() {
            let src_child = self.load(&state, src_child_id).await?;
            let copied = self
                .copy_node(&mut state, &src_child, new_parent_id, &src_child.meta.name)
                .await?;
            self.append_child(&state, new_parent_id, copied.meta.id).await?;
            for grandchild in src_child.children() {
                queue.push_back((*grandchild, copied.meta.id));
            }
        }
        Ok(top.entry())
    }

    async fn move_entry(&self, src: &str, dst: &str) -> Result<Entry> {
        let mut state = self.state.write().await;
        let src = path::normalize(src)?;
        let dst = path::normalize(dst)?;
        if src == dst || src == "/" {
            return Err(Error::Invalid);
        }
        if dst.starts_with(&format!("{src}/")) {
            // A directory cannot move under itself.
            return Err(Error::Invalid);
        }
        let (src_parent_path, src_name) = path::parent_and_name(&src)?;
        let (dst_parent_path, dst_name) = path::parent_and_name(&dst)?;

        let mut src_parent = self.resolve(&state, &src_parent_path).await?;
        let mut child =
            self.find_child(&state, &src_parent, &src_name).await?.ok_or(Error::NotFound)?;

        if src_parent_path == dst_parent_path {
            if self.find_child(&state, &src_parent, &dst_name).await?.is_some() {
                return Err(Error::AlreadyExists);
            }
            child.meta.name = dst_name;
            child.meta.modified_at = unix_now();
            self.save(&state, &child).await?;
            return Ok(child.entry());
        }

        let mut dst_parent = self.resolve(&state, &dst_parent_path).await?;
        if dst_parent.meta.kind != EntryKind::Directory {
            return Err(Error::NotDirectory);
        }
        if self.find_child(&state, &dst_parent, &dst_name).await?.is_some() {
            return Err(Error::AlreadyExists);
        }

        src_parent.children_mut()?.retain(|id| *id != child.meta.id);
        src_parent.meta.modified_at = unix_now();
        self.save(&state, &src_parent).await?;

        dst_parent.children_mut()?.push(child.meta.id);
        dst_parent.meta.modified_at = unix_now();
        self.save(&state, &dst_parent).await?;

        child.parent_id = dst_parent.meta.id;
        child.meta.name = dst_name;
        child.meta.modified_at = unix_now();
        self.save(&state, &child).await?;
        Ok(child.entry())
    }

    async fn delete(&self, p: &str) -> Result<()> {
        self.remove(p, None).await
    }

    async fn get_path(&self, entry: &Entry) -> Result<String> {
        let state = self.state.read().await;
        let mut current = self.load(&state, entry.meta.id).await?;
        let mut names = Vec::new();
        let mut hops = state.table.len() + 1;
        while current.meta.id != state.root_id {
            names.push(current.meta.name.clone());
            current = self.load(&state, current.parent_id).await?;
            hops -= 1;
            if hops == 0 {
                return Err(Error::CorruptData);
            }
        }
        if names.is_empty() {
            return Ok("/".to_owned());
        }
        names.reverse();
        Ok(format!("/{}", names.join("/")))
    }

    async fn destroy(&self) -> Result<()> {
        let mut state = self.state.write().await;
        debug!(entries = state.table.len(), "releasing tree state");
        state.table.clear();
        state.root_id = 0;
        Ok(())
    }
}
