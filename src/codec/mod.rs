//! Version-tagged binary codec for metadata records.
//!
//! Every entry persists as one little-endian record: a version byte, a kind
//! tag, the common metadata block, the parent id, and a kind-specific tail
//! (child ids for directories, chunk ids for files, the target string for
//! symlinks). Chunk payloads are opaque byte strings and never pass through
//! this module.


use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::vfs::{Entry, EntryKind, Error, Metadata, Result};

/// Current record format version.
pub const VERSION: u8 = 1;

/// Upper bound for newly written file chunks, in bytes.
pub const CHUNK_SIZE: usize = 64 * 1024;

const KIND_FILE: u8 = 1;
const KIND_DIR: u8 = 2;
const KIND_SYMLINK: u8 = 3;

/// Kind-specific payload of a persisted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tail {
    /// Chunk record ids, in body order.
    File { chunk_ids: Vec<u32> },
    /// Child logical ids, in insertion order.
    Directory { children: Vec<u32> },
    /// Unresolved link target.
    Symlink { target: String },
}

impl Tail {
    pub fn kind(&self) -> EntryKind {
        match self {
            Tail::File { .. } => EntryKind::File,
            Tail::Directory { .. } => EntryKind::Directory,
            Tail::Symlink { .. } => EntryKind::Symlink,
        }
    }
}

/// The persisted form of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub meta: Metadata,
    /// Logical id of the containing directory; 0 for the root.
    pub parent_id: u32,
    pub tail: Tail,
}

impl Record {
    /// Public handle view of this record.
    pub fn entry(&self) -> Entry {
        Entry::new(self.meta.clone(), self.parent_id)
    }

    /// Children of a directory record.
    pub fn children(&self) -> &[u32] {
        match &self.tail {
            Tail::Directory { children } => children,
            _ => &[],
        }
    }

    /// Mutable children of a directory record, or [`Error::NotDirectory`].
    pub fn children_mut(&mut self) -> Result<&mut Vec<u32>> {
        match &mut self.tail {
            Tail::Directory { children } => Ok(children),
            _ => Err(Error::NotDirectory),
        }
    }

    /// Chunk ids of a file record, or [`Error::NotFile`].
    pub fn chunk_ids(&self) -> Result<&[u32]> {
        match &self.tail {
            Tail::File { chunk_ids } => Ok(chunk_ids),
            _ => Err(Error::NotFile),
        }
    }
}

fn kind_byte(kind: EntryKind) -> u8 {
    match kind {
        EntryKind::File => KIND_FILE,
        EntryKind::Directory => KIND_DIR,
        EntryKind::Symlink => KIND_SYMLINK,
    }
}

fn kind_of_byte(byte: u8) -> Result<EntryKind> {
    match byte {
        KIND_FILE => Ok(EntryKind::File),
        KIND_DIR => Ok(EntryKind::Directory),
        KIND_SYMLINK => Ok(EntryKind::Symlink),
        _ => Err(Error::CorruptData),
    }
}

/// Serialises a record into `dest`.
pub fn encode(dest: &mut impl Write, record: &Record) -> io::Result<()> {
    dest.write_u8(VERSION)?;
    dest.write_u8(kind_byte(record.tail.kind()))?;
    dest.write_u32::<LittleEndian>(record.meta.id)?;
    write_string(dest, &record.meta.name)?;
    dest.write_u8(kind_byte(record.meta.kind))?;
    dest.write_u64::<LittleEndian>(record.meta.size)?;
    dest.write_i64::<LittleEndian>(record.meta.created_at)?;
    dest.write_i64::<LittleEndian>(record.meta.modified_at)?;
    dest.write_i64::<LittleEndian>(record.meta.accessed_at)?;
    dest.write_u32::<LittleEndian>(record.meta.mode)?;
    write_string(dest, &record.meta.owner)?;
    write_string(dest, &record.meta.group)?;
    dest.write_u32::<LittleEndian>(record.parent_id)?;
    match &record.tail {
        Tail::File { chunk_ids } => write_id_list(dest, chunk_ids),
        Tail::Directory { children } => write_id_list(dest, children),
        Tail::Symlink { target } => write_string(dest, target),
    }
}

/// Deserialises a record, rejecting malformed buffers with
/// [`Error::CorruptData`].
pub fn decode(buf: &[u8]) -> Result<Record> {
    let mut src = Cursor::new(buf);
    let version = read_u8(&mut src)?;
    if version != VERSION {
        return Err(Error::CorruptData);
    }
    let tail_kind = kind_of_byte(read_u8(&mut src)?)?;

    let id = read_u32(&mut src)?;
    let name = read_string(&mut src)?;
    let kind = kind_of_byte(read_u8(&mut src)?)?;
    if kind != tail_kind {
        return Err(Error::CorruptData);
    }
    let size = read_u64(&mut src)?;
    let created_at = read_i64(&mut src)?;
    let modified_at = read_i64(&mut src)?;
    let accessed_at = read_i64(&mut src)?;
    let mode = read_u32(&mut src)?;
    let owner = read_string(&mut src)?;
    let group = read_string(&mut src)?;
    let parent_id = read_u32(&mut src)?;

    let tail = match tail_kind {
        EntryKind::File => Tail::File { chunk_ids: read_id_list(&mut src)? },
        EntryKind::Directory => Tail::Directory { children: read_id_list(&mut src)? },
        EntryKind::Symlink => Tail::Symlink { target: read_string(&mut src)? },
    };

    if src.position() != buf.len() as u64 {
        return Err(Error::CorruptData);
    }

    let meta = Metadata {
        id,
        name,
        kind,
        size,
        created_at,
        modified_at,
        accessed_at,
        mode,
        owner,
        group,
    };
    Ok(Record { meta, parent_id, tail })
}

fn write_string(dest: &mut impl Write, value: &str) -> io::Result<()> {
    let len: u16 = value
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string exceeds u16 length"))?;
    dest.write_u16::<LittleEndian>(len)?;
    dest.write_all(value.as_bytes())
}

fn write_id_list(dest: &mut impl Write, ids: &[u32]) -> io::Result<()> {
    let count: u16 = ids
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "id list exceeds u16 length"))?;
    dest.write_u16::<LittleEndian>(count)?;
    for id in ids {
        dest.write_u32::<LittleEndian>(*id)?;
    }
    Ok(())
}

fn read_u8(src: &mut impl Read) -> Result<u8> {
    src.read_u8().map_err(|_| Error::CorruptData)
}

fn read_u32(src: &mut impl Read) -> Result<u32> {
    src.read_u32::<LittleEndian>().map_err(|_| Error::CorruptData)
}

fn read_u64(src: &mut impl Read) -> Result<u64> {
    src.read_u64::<LittleEndian>().map_err(|_| Error::CorruptData)
}

fn read_i64(src: &mut impl Read) -> Result<i64> {
    src.read_i64::<LittleEndian>().map_err(|_| Error::CorruptData)
}

fn read_string(src: &mut Cursor<&[u8]>) -> Result<String> {
    let len = src.read_u16::<LittleEndian>().map_err(|_| Error::CorruptData)? as usize;
    let mut bytes = vec![0u8; len];
    src.read_exact(&mut bytes).map_err(|_| Error::CorruptData)?;
    String::from_utf8(bytes).map_err(|_| Error::CorruptData)
}

fn read_id_list(src: &mut Cursor<&[u8]>) -> Result<Vec<u32>> {
    let count = src.read_u16::<LittleEndian>().map_err(|_| Error::CorruptData)? as usize;
    // A count can claim more ids than the buffer holds; size the allocation
    // by what is actually left.
    let remaining = src.get_ref().len().saturating_sub(src.position() as usize);
    if count * 4 > remaining {
        return Err(Error::CorruptData);
    }
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        ids.push(read_u32(src)?);
    }
    Ok(ids)
}
