//! Per-connection protocol state and dispatch.
//!
//! The session owns the fid table: every client-chosen fid maps onto the
//! path accumulated by its walks plus a snapshot of the entry found there.
//! Requests arrive already parsed, are executed against the VFS one at a
//! time, and leave as replies for the stream writer. Fid state follows
//! `free -> attached -> opened -> free`; walking away from an opened fid
//! is refused.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::vfs::{path, Entry, Error, Vfs, DMDIR};

use super::messages::{ReplySender, RequestReceiver};
use super::wire::{
    Qid, Rmessage, Stat, Tmessage, MAX_MSIZE, MAX_WALK_ELEMENTS, OREAD, OTRUNC, OWRITE, QTDIR,
    QTFILE, QTSYMLINK, VERSION, VERSION_UNKNOWN,
};

type HandleResult = Result<Rmessage, String>;

/// One entry handle held on behalf of the client.
struct Fid {
    path: String,
    entry: Entry,
    open: Option<OpenFid>,
}

/// Open-mode state of a fid, plus the streaming cursor for directories.
struct OpenFid {
    mode: u8,
    dir: Option<DirStream>,
}

/// Directory read cursor: the pre-serialised stat sequence, the next entry
/// to hand out, and the byte offset the client is expected to ask for.
struct DirStream {
    stats: Vec<Vec<u8>>,
    next: usize,
    offset: u64,
}

/// Executes requests for a single connection.
pub struct SessionTask {
    vfs: Arc<dyn Vfs>,
    requests: RequestReceiver,
    replies: ReplySender,
    fids: HashMap<u32, Fid>,
    msize: u32,
    uname: String,
}

impl SessionTask {
    pub fn spawn(
        vfs: Arc<dyn Vfs>,
        requests: RequestReceiver,
        replies: ReplySender,
    ) -> JoinHandle<()> {
        tokio::spawn(
            Self {
                vfs,
                requests,
                replies,
                fids: HashMap::new(),
                msize: MAX_MSIZE,
                uname: String::new(),
            }
            .run(),
        )
    }

    async fn run(mut self) {
        while let Some((tag, message)) = self.requests.recv().await {
            let sent = match self.handle(message).await {
                Ok(reply) => self.replies.send(tag, reply),
                Err(ename) => self.replies.send_error(tag, &ename),
            };
            if sent.is_err() {
                break;
            }
        }
    }

    async fn handle(&mut self, message: Tmessage) -> HandleResult {
        match message {
            Tmessage::Version { msize, version } => self.version(msize, &version),
            Tmessage::Auth { .. } => Err("authentication not required".to_owned()),
            Tmessage::Attach { fid, uname, .. } => self.attach(fid, uname).await,
            Tmessage::Flush { .. } => Ok(Rmessage::Flush),
            Tmessage::Walk { fid, newfid, names } => self.walk(fid, newfid, &names).await,
            Tmessage::Open { fid, mode } => self.open(fid, mode).await,
            Tmessage::Create { fid, name, perm, mode } => {
                self.create(fid, &name, perm, mode).await
            }
            Tmessage::Read { fid, offset, count } => self.read(fid, offset, count).await,
            Tmessage::Write { fid, offset, data } => self.write(fid, offset, &data).await,
            Tmessage::Clunk { fid } => self.clunk(fid),
            Tmessage::Remove { fid } => self.remove(fid).await,
            Tmessage::Stat { fid } => self.stat(fid).await,
            Tmessage::Wstat { fid, stat } => self.wstat(fid, stat).await,
            Tmessage::Unknown { mtype } => Err(format!("unsupported message type {mtype}")),
        }
    }

    fn version(&mut self, msize: u32, version: &str) -> HandleResult {
        // A version request resets the connection: all fids are clunked.
        self.fids.clear();
        self.msize = msize.min(MAX_MSIZE);
        let negotiated = if version == VERSION { VERSION } else { VERSION_UNKNOWN };
        Ok(Rmessage::Version { msize: self.msize, version: negotiated.to_owned() })
    }

    async fn attach(&mut self, fid: u32, uname: String) -> HandleResult {
        if self.fids.contains_key(&fid) {
            return Err("fid already in use".to_owned());
        }
        let entry = self.vfs.root().await.map_err(reject)?;
        debug!(fid, uname = %uname, "attached");
        self.uname = uname;
        let qid = qid_of(&entry);
        self.fids.insert(fid, Fid { path: "/".to_owned(), entry, open: None });
        Ok(Rmessage::Attach { qid })
    }

    async fn walk(&mut self, fid: u32, newfid: u32, names: &[String]) -> HandleResult {
        let (mut cur_path, mut cur_entry) = {
            let source = self.fids.get(&fid).ok_or("unknown fid")?;
            if source.open.is_some() {
                return Err("cannot walk from an open fid".to_owned());
            }
            (source.path.clone(), source.entry.clone())
        };
        if newfid != fid && self.fids.contains_key(&newfid) {
            return Err("fid already in use".to_owned());
        }
        if names.len() > MAX_WALK_ELEMENTS {
            return Err("too many walk elements".to_owned());
        }

        let mut qids = Vec::with_capacity(names.len());
        let mut failure = None;
        for name in names {
            if !cur_entry.is_dir() {
                failure = Some(Error::NotDirectory.name().to_owned());
                break;
            }
            let next_path = if name == ".." {
                parent_of(&cur_path)
            } else {
                if path::validate_name(name).is_err() {
                    failure = Some(Error::Invalid.name().to_owned());
                    break;
                }
                path::join(&cur_path, name)
            };
            match self.vfs.get(&next_path).await {
                Ok(entry) => {
                    qids.push(qid_of(&entry));
                    cur_path = next_path;
                    cur_entry = entry;
                }
                Err(err) => {
                    failure = Some(reject(err));
                    break;
                }
            }
        }

        if qids.len() == names.len() {
            self.fids.insert(newfid, Fid { path: cur_path, entry: cur_entry, open: None });
            Ok(Rmessage::Walk { qids })
        } else if qids.is_empty() {
            Err(failure.unwrap_or_else(|| Error::NotFound.name().to_owned()))
        } else {
            // Partial success: report how far we got, bind nothing.
            Ok(Rmessage::Walk { qids })
        }
    }

    async fn open(&mut self, fid: u32, mode: u8) -> HandleResult {
        let (fid_path, already_open) = {
            let held = self.fids.get(&fid).ok_or("unknown fid")?;
            (held.path.clone(), held.open.is_some())
        };
        if already_open {
            return Err("fid already open".to_owned());
        }

        let mut entry = self.refresh(fid, &fid_path).await?;
        let access = mode & 0x03;
        if entry.is_dir() && access != OREAD {
            return Err(Error::Permission.name().to_owned());
        }
        if wants_write(access) && entry.meta.mode & 0o222 == 0 {
            // Mode bits are projected, not enforced.
            warn!(path = %fid_path, mode, "write open against read-only mode bits");
        }
        if mode & OTRUNC != 0 && entry.is_file() {
            self.vfs.file_write(&fid_path, &[]).await.map_err(reject)?;
            entry = self.refresh(fid, &fid_path).await?;
        }

        let qid = qid_of(&entry);
        if let Some(held) = self.fids.get_mut(&fid) {
            held.entry = entry;
            held.open = Some(OpenFid { mode, dir: None });
        }
        Ok(Rmessage::Open { qid, iounit: 0 })
    }

    async fn create(&mut self, fid: u32, name: &str, perm: u32, mode: u8) -> HandleResult {
        let (dir_path, is_dir, already_open) = {
            let held = self.fids.get(&fid).ok_or("unknown fid")?;
            (held.path.clone(), held.entry.is_dir(), held.open.is_some())
        };
        if !is_dir {
            return Err(Error::NotDirectory.name().to_owned());
        }
        if already_open {
            return Err("fid already open".to_owned());
        }
        path::validate_name(name).map_err(reject)?;

        let new_path = path::join(&dir_path, name);
        let entry = if perm & DMDIR != 0 {
            self.vfs.dir_create(&new_path).await.map_err(reject)?
        } else {
            self.vfs.file_create(&new_path).await.map_err(reject)?
        };

        let qid = qid_of(&entry);
        if let Some(held) = self.fids.get_mut(&fid) {
            held.path = new_path;
            held.entry = entry;
            held.open = Some(OpenFid { mode, dir: None });
        }
        Ok(Rmessage::Create { qid, iounit: 0 })
    }

    async fn read(&mut self, fid: u32, offset: u64, count: u32) -> HandleResult {
        let (fid_path, is_dir, access, dir_offset) = {
            let held = self.fids.get(&fid).ok_or("unknown fid")?;
            let open = held.open.as_ref().ok_or("fid not open")?;
            (
                held.path.clone(),
                held.entry.is_dir(),
                open.mode & 0x03,
                open.dir.as_ref().map(|d| d.offset),
            )
        };
        if access == OWRITE {
            return Err(Error::Permission.name().to_owned());
        }
        let count = count.min(self.msize.saturating_sub(24)) as usize;

        if !is_dir {
            let body = match self.vfs.file_read(&fid_path).await {
                Ok(body) => body,
                Err(Error::NotFound) => {
                    self.fids.remove(&fid);
                    return Err(Error::NotFound.name().to_owned());
                }
                Err(err) => return Err(reject(err)),
            };
            let start = (offset as usize).min(body.len());
            let end = (start + count).min(body.len());
            return Ok(Rmessage::Read { data: body[start..end].to_vec() });
        }

        // Directory content is the serialised stat sequence of its
        // children; reads must resume at the cursor or restart at zero.
        let mut stream = if offset == 0 {
            let children = self.vfs.dir_list(&fid_path).await.map_err(reject)?;
            let mut stats = Vec::with_capacity(children.len());
            for child in &children {
                let stat = self.stat_of(child, &child.meta.name);
                stats.push(
                    super::wire::encode_stat(&stat).map_err(|_| "unencodable stat".to_owned())?,
                );
            }
            DirStream { stats, next: 0, offset: 0 }
        } else {
            match dir_offset {
                Some(at) if at == offset => {
                    let held = self.fids.get_mut(&fid).ok_or("unknown fid")?;
                    let open = held.open.as_mut().ok_or("fid not open")?;
                    open.dir.take().ok_or("directory cursor lost")?
                }
                _ => return Err("invalid directory read offset".to_owned()),
            }
        };

        let mut data = Vec::new();
        while stream.next < stream.stats.len() {
            let stat = &stream.stats[stream.next];
            if data.len() + stat.len() > count {
                break;
            }
            data.extend_from_slice(stat);
            stream.next += 1;
        }
        stream.offset = offset + data.len() as u64;

        if let Some(held) = self.fids.get_mut(&fid) {
            if let Some(open) = held.open.as_mut() {
                open.dir = Some(stream);
            }
        }
        Ok(Rmessage::Read { data })
    }

    async fn write(&mut self, fid: u32, offset: u64, data: &[u8]) -> HandleResult {
        let (fid_path, is_dir, access) = {
            let held = self.fids.get(&fid).ok_or("unknown fid")?;
            let open = held.open.as_ref().ok_or("fid not open")?;
            (held.path.clone(), held.entry.is_dir(), open.mode & 0x03)
        };
        if is_dir {
            return Err(Error::NotFile.name().to_owned());
        }
        if !wants_write(access) {
            return Err(Error::Permission.name().to_owned());
        }

        let current = self.refresh(fid, &fid_path).await?;
        if offset == current.meta.size {
            self.vfs.file_concat(&fid_path, data).await.map_err(reject)?;
        } else {
            let mut body = self.vfs.file_read(&fid_path).await.map_err(reject)?;
            let end = offset as usize + data.len();
            if body.len() < end {
                body.resize(end, 0);
            }
            body[offset as usize..end].copy_from_slice(data);
            self.vfs.file_write(&fid_path, &body).await.map_err(reject)?;
        }
        Ok(Rmessage::Write { count: data.len() as u32 })
    }

    fn clunk(&mut self, fid: u32) -> HandleResult {
        self.fids.remove(&fid).ok_or("unknown fid")?;
        Ok(Rmessage::Clunk)
    }

    async fn remove(&mut self, fid: u32) -> HandleResult {
        // The fid is clunked whether or not the removal succeeds.
        let held = self.fids.remove(&fid).ok_or("unknown fid")?;
        self.vfs.delete(&held.path).await.map_err(reject)?;
        Ok(Rmessage::Remove)
    }

    async fn stat(&mut self, fid: u32) -> HandleResult {
        let fid_path = self.fids.get(&fid).ok_or("unknown fid")?.path.clone();
        let entry = self.refresh(fid, &fid_path).await?;
        let name = if fid_path == "/" { "/" } else { entry.meta.name.as_str() };
        let stat = self.stat_of(&entry, name);
        Ok(Rmessage::Stat { stat })
    }

    async fn wstat(&mut self, fid: u32, stat: Stat) -> HandleResult {
        let fid_path = self.fids.get(&fid).ok_or("unknown fid")?.path.clone();
        let entry = self.refresh(fid, &fid_path).await?;

        if stat.is_sync_only() {
            return Ok(Rmessage::Wstat);
        }

        let untouched = stat.kind == u16::MAX
            && stat.dev == u32::MAX
            && stat.mode == u32::MAX
            && stat.atime == u32::MAX
            && stat.mtime == u32::MAX
            && stat.length == u64::MAX
            && stat.uid.is_empty()
            && stat.gid.is_empty()
            && stat.muid.is_empty();
        if !untouched {
            return Err(Error::Permission.name().to_owned());
        }
        if stat.name == entry.meta.name {
            return Ok(Rmessage::Wstat);
        }

        let new_path = path::join(&parent_of(&fid_path), &stat.name);
        let renamed = self.vfs.rename(&fid_path, &new_path).await.map_err(reject)?;
        if let Some(held) = self.fids.get_mut(&fid) {
            held.path = new_path;
            held.entry = renamed;
        }
        Ok(Rmessage::Wstat)
    }

    /// Re-resolves a fid's entry. A vanished entry clunks the fid.
    async fn refresh(&mut self, fid: u32, fid_path: &str) -> Result<Entry, String> {
        match self.vfs.get(fid_path).await {
            Ok(entry) => Ok(entry),
            Err(Error::NotFound) => {
                self.fids.remove(&fid);
                Err(Error::NotFound.name().to_owned())
            }
            Err(err) => Err(reject(err)),
        }
    }

    fn stat_of(&self, entry: &Entry, name: &str) -> Stat {
        Stat {
            kind: 0,
            dev: 0,
            qid: qid_of(entry),
            mode: entry.meta.mode,
            atime: entry.meta.accessed_at as u32,
            mtime: entry.meta.modified_at as u32,
            length: if entry.is_file() { entry.meta.size } else { 0 },
            name: name.to_owned(),
            uid: entry.meta.owner.clone(),
            gid: entry.meta.group.clone(),
            muid: if self.uname.is_empty() {
                entry.meta.owner.clone()
            } else {
                self.uname.clone()
            },
        }
    }
}

/// Derives the 13-byte qid: the kind bits plus the logical id widened to
/// 64 bits, stable across opens of the same entry.
fn qid_of(entry: &Entry) -> Qid {
    let kind = if entry.is_dir() {
        QTDIR
    } else if entry.is_symlink() {
        QTSYMLINK
    } else {
        QTFILE
    };
    Qid { kind, version: entry.meta.modified_at as u32, path: entry.meta.id as u64 }
}

fn wants_write(access: u8) -> bool {
    access == OWRITE || access == super::wire::ORDWR
}

fn parent_of(p: &str) -> String {
    match path::parent_and_name(p) {
        Ok((parent, _)) => parent,
        Err(_) => "/".to_owned(),
    }
}

fn reject(err: Error) -> String {
    err.name().to_owned()
}
