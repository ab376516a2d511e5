//! 9P2000 wire codec.
//!
//! Little-endian messages behind a `size[4] type[1] tag[2]` header; strings
//! are a u16 length followed by UTF-8 bytes, qids are 13 bytes, stat
//! structures use the canonical layout with a leading size field. This
//! module parses T-messages out of a received frame body and serialises
//! R-messages into complete frames; it holds no connection state.

use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Tag value used by `Tversion`.
pub const NOTAG: u16 = 0xffff;

/// Fid value meaning "no fid", e.g. an unused auth fid.
pub const NOFID: u32 = 0xffff_ffff;

/// Largest frame the server accepts or advertises.
pub const MAX_MSIZE: u32 = 1024 * 1024;

/// Protocol version string this server speaks.
pub const VERSION: &str = "9P2000";

/// Reply to a version negotiation that failed.
pub const VERSION_UNKNOWN: &str = "unknown";

/// Qid type bit for directories.
pub const QTDIR: u8 = 0x80;
/// Qid type bit for symlinks.
pub const QTSYMLINK: u8 = 0x02;
/// Qid type of a plain file.
pub const QTFILE: u8 = 0x00;

/// Open for reading.
pub const OREAD: u8 = 0;
/// Open for writing.
pub const OWRITE: u8 = 1;
/// Open for reading and writing.
pub const ORDWR: u8 = 2;
/// Open for execution; treated as a read.
pub const OEXEC: u8 = 3;
/// Truncate on open.
pub const OTRUNC: u8 = 0x10;

/// Most walk elements a single `Twalk` may carry.
pub const MAX_WALK_ELEMENTS: usize = 16;

pub const TVERSION: u8 = 100;
pub const RVERSION: u8 = 101;
pub const TAUTH: u8 = 102;
pub const RAUTH: u8 = 103;
pub const TATTACH: u8 = 104;
pub const RATTACH: u8 = 105;
pub const RERROR: u8 = 107;
pub const TFLUSH: u8 = 108;
pub const RFLUSH: u8 = 109;
pub const TWALK: u8 = 110;
pub const RWALK: u8 = 111;
pub const TOPEN: u8 = 112;
pub const ROPEN: u8 = 113;
pub const TCREATE: u8 = 114;
pub const RCREATE: u8 = 115;
pub const TREAD: u8 = 116;
pub const RREAD: u8 = 117;
pub const TWRITE: u8 = 118;
pub const RWRITE: u8 = 119;
pub const TCLUNK: u8 = 120;
pub const RCLUNK: u8 = 121;
pub const TREMOVE: u8 = 122;
pub const RREMOVE: u8 = 123;
pub const TSTAT: u8 = 124;
pub const RSTAT: u8 = 125;
pub const TWSTAT: u8 = 126;
pub const RWSTAT: u8 = 127;

/// Result of wire parsing with error type [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Wire-level failures. Protocol-level mistakes (bad fids, kind
/// mismatches) are not errors here; they become `Rerror` replies.
#[derive(Debug)]
pub enum Error {
    /// The frame ended before the message did.
    Io(io::Error),
    /// A counted string held invalid UTF-8.
    BadString(std::string::FromUtf8Error),
    /// The frame size field is shorter than a header or past the limit.
    BadFrameSize(u32),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(cause) => write!(f, "short or unreadable frame: {cause}"),
            Error::BadString(cause) => write!(f, "bad string: {cause}"),
            Error::BadFrameSize(size) => write!(f, "unacceptable frame size {size}"),
        }
    }
}

impl std::error::Error for Error {}

/// The 13-byte server-unique identifier of a file system entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Qid {
    pub kind: u8,
    pub version: u32,
    pub path: u64,
}

/// A 9P stat structure.
///
/// `u16::MAX`, `u32::MAX`, `u64::MAX` and empty strings mean "do not
/// change" in a `Twstat` and are filled with real values in an `Rstat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub kind: u16,
    pub dev: u32,
    pub qid: Qid,
    pub mode: u32,
    pub atime: u32,
    pub mtime: u32,
    pub length: u64,
    pub name: String,
    pub uid: String,
    pub gid: String,
    pub muid: String,
}

impl Stat {
    /// True when every field carries its "do not change" value.
    pub fn is_sync_only(&self) -> bool {
        self.kind == u16::MAX
            && self.dev == u32::MAX
            && self.mode == u32::MAX
            && self.atime == u32::MAX
            && self.mtime == u32::MAX
            && self.length == u64::MAX
            && self.name.is_empty()
            && self.uid.is_empty()
            && self.gid.is_empty()
            && self.muid.is_empty()
    }
}

/// Requests this server understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tmessage {
    Version { msize: u32, version: String },
    Auth { afid: u32, uname: String, aname: String },
    Attach { fid: u32, afid: u32, uname: String, aname: String },
    Flush { oldtag: u16 },
    Walk { fid: u32, newfid: u32, names: Vec<String> },
    Open { fid: u32, mode: u8 },
    Create { fid: u32, name: String, perm: u32, mode: u8 },
    Read { fid: u32, offset: u64, count: u32 },
    Write { fid: u32, offset: u64, data: Vec<u8> },
    Clunk { fid: u32 },
    Remove { fid: u32 },
    Stat { fid: u32 },
    Wstat { fid: u32, stat: Stat },
    /// Anything else; answered with `Rerror`.
    Unknown { mtype: u8 },
}

/// Replies this server produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rmessage {
    Version { msize: u32, version: String },
    Attach { qid: Qid },
    Error { ename: String },
    Flush,
    Walk { qids: Vec<Qid> },
    Open { qid: Qid, iounit: u32 },
    Create { qid: Qid, iounit: u32 },
    Read { data: Vec<u8> },
    Write { count: u32 },
    Clunk,
    Remove,
    Stat { stat: Stat },
    Wstat,
}

/// Parses one frame body (everything after the size field) into a tag and
/// a request.
pub fn parse_message(body: &[u8]) -> Result<(u16, Tmessage)> {
    let mut src = Cursor::new(body);
    let mtype = read_u8(&mut src)?;
    let tag = read_u16(&mut src)?;
    let message = match mtype {
        TVERSION => {
            Tmessage::Version { msize: read_u32(&mut src)?, version: read_string(&mut src)? }
        }
        TAUTH => Tmessage::Auth {
            afid: read_u32(&mut src)?,
            uname: read_string(&mut src)?,
            aname: read_string(&mut src)?,
        },
        TATTACH => Tmessage::Attach {
            fid: read_u32(&mut src)?,
            afid: read_u32(&mut src)?,
            uname: read_string(&mut src)?,
            aname: read_string(&mut src)?,
        },
        TFLUSH => Tmessage::Flush { oldtag: read_u16(&mut src)? },
        TWALK => {
            let fid = read_u32(&mut src)?;
            let newfid = read_u32(&mut src)?;
            let count = read_u16(&mut src)? as usize;
            let mut names = Vec::with_capacity(count.min(MAX_WALK_ELEMENTS));
            for _ in 0..count {
                names.push(read_string(&mut src)?);
            }
            Tmessage::Walk { fid, newfid, names }
        }
        TOPEN => Tmessage::Open { fid: read_u32(&mut src)?, mode: read_u8(&mut src)? },
        TCREATE => Tmessage::Create {
            fid: read_u32(&mut src)?,
            name: read_string(&mut src)?,
            perm: read_u32(&mut src)?,
            mode: read_u8(&mut src)?,
        },
        TREAD => Tmessage::Read {
            fid: read_u32(&mut src)?,
            offset: read_u64(&mut src)?,
            count: read_u32(&mut src)?,
        },
        TWRITE => {
            let fid = read_u32(&mut src)?;
            let offset = read_u64(&mut src)?;
            let count = read_u32(&mut src)? as usize;
            let mut data = vec![0u8; count];
            src.read_exact(&mut data).map_err(Error::Io)?;
            Tmessage::Write { fid, offset, data }
        }
        TCLUNK => Tmessage::Clunk { fid: read_u32(&mut src)? },
        TREMOVE => Tmessage::Remove { fid: read_u32(&mut src)? },
        TSTAT => Tmessage::Stat { fid: read_u32(&mut src)? },
        TWSTAT => {
            let fid = read_u32(&mut src)?;
            // Twstat wraps the stat in an extra length field.
            let _nstat = read_u16(&mut src)?;
            Tmessage::Wstat { fid, stat: read_stat(&mut src)? }
        }
        other => Tmessage::Unknown { mtype: other },
    };
    Ok((tag, message))
}

/// Serialises a reply into a complete frame, size field included.
pub fn encode_message(tag: u16, message: &Rmessage) -> io::Result<Vec<u8>> {
    let mut body = Vec::with_capacity(32);
    match message {
        Rmessage::Version { msize, version } => {
            body.write_u8(RVERSION)?;
            body.write_u16::<LittleEndian>(tag)?;
            body.write_u32::<LittleEndian>(*msize)?;
            write_string(&mut body, version)?;
        }
        Rmessage::Attach { qid } => {
            body.write_u8(RATTACH)?;
            body.write_u16::<LittleEndian>(tag)?;
            write_qid(&mut body, qid)?;
        }
        Rmessage::Error { ename } => {
            body.write_u8(RERROR)?;
            body.write_u16::<LittleEndian>(tag)?;
            write_string(&mut body, ename)?;
        }
        Rmessage::Flush => {
            body.write_u8(RFLUSH)?;
            body.write_u16::<LittleEndian>(tag)?;
        }
        Rmessage::Walk { qids } => {
            body.write_u8(RWALK)?;
            body.write_u16::<LittleEndian>(tag)?;
            body.write_u16::<LittleEndian>(qids.len() as u16)?;
            for qid in qids {
                write_qid(&mut body, qid)?;
            }
        }
        Rmessage::Open { qid, iounit } => {
            body.write_u8(ROPEN)?;
            body.write_u16::<LittleEndian>(tag)?;
            write_qid(&mut body, qid)?;
            body.write_u32::<LittleEndian>(*iounit)?;
        }
        Rmessage::Create { qid, iounit } => {
            body.write_u8(RCREATE)?;
            body.write_u16::<LittleEndian>(tag)?;
            write_qid(&mut body, qid)?;
            body.write_u32::<LittleEndian>(*iounit)?;
        }
        Rmessage::Read { data } => {
            body.write_u8(RREAD)?;
            body.write_u16::<LittleEndian>(tag)?;
            body.write_u32::<LittleEndian>(data.len() as u32)?;
            body.write_all(data)?;
        }
        Rmessage::Write { count } => {
            body.write_u8(RWRITE)?;
            body.write_u16::<LittleEndian>(tag)?;
            body.write_u32::<LittleEndian>(*count)?;
        }
        Rmessage::Clunk => {
            body.write_u8(RCLUNK)?;
            body.write_u16::<LittleEndian>(tag)?;
        }
        Rmessage::Remove => {
            body.write_u8(RREMOVE)?;
            body.write_u16::<LittleEndian>(tag)?;
        }
        Rmessage::Stat { stat } => {
            body.write_u8(RSTAT)?;
            body.write_u16::<LittleEndian>(tag)?;
            let encoded = encode_stat(stat)?;
            // Rstat wraps the stat in an extra length field.
            body.write_u16::<LittleEndian>(encoded.len() as u16)?;
            body.write_all(&encoded)?;
        }
        Rmessage::Wstat => {
            body.write_u8(RWSTAT)?;
            body.write_u16::<LittleEndian>(tag)?;
        }
    }

    let mut frame = Vec::with_capacity(body.len() + 4);
    frame.write_u32::<LittleEndian>(body.len() as u32 + 4)?;
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Serialises one stat structure, leading size field included.
pub fn encode_stat(stat: &Stat) -> io::Result<Vec<u8>> {
    let strings = stat.name.len() + stat.uid.len() + stat.gid.len() + stat.muid.len();
    let size = 2 + 4 + 13 + 4 + 4 + 4 + 8 + 4 * 2 + strings;
    let mut out = Vec::with_capacity(size + 2);
    out.write_u16::<LittleEndian>(size as u16)?;
    out.write_u16::<LittleEndian>(stat.kind)?;
    out.write_u32::<LittleEndian>(stat.dev)?;
    write_qid(&mut out, &stat.qid)?;
    out.write_u32::<LittleEndian>(stat.mode)?;
    out.write_u32::<LittleEndian>(stat.atime)?;
    out.write_u32::<LittleEndian>(stat.mtime)?;
    out.write_u64::<LittleEndian>(stat.length)?;
    write_string(&mut out, &stat.name)?;
    write_string(&mut out, &stat.uid)?;
    write_string(&mut out, &stat.gid)?;
    write_string(&mut out, &stat.muid)?;
    Ok(out)
}

/// Parses one stat structure, consuming its leading size field.
pub fn read_stat(src: &mut Cursor<&[u8]>) -> Result<Stat> {
    let _size = read_u16(src)?;
    Ok(Stat {
        kind: read_u16(src)?,
        dev: read_u32(src)?,
        qid: read_qid(src)?,
        mode: read_u32(src)?,
        atime: read_u32(src)?,
        mtime: read_u32(src)?,
        length: read_u64(src)?,
        name: read_string(src)?,
        uid: read_string(src)?,
        gid: read_string(src)?,
        muid: read_string(src)?,
    })
}

fn read_u8(src: &mut impl Read) -> Result<u8> {
    src.read_u8().map_err(Error::Io)
}

fn read_u16(src: &mut impl Read) -> Result<u16> {
    src.read_u16::<LittleEndian>().map_err(Error::Io)
}

fn read_u32(src: &mut impl Read) -> Result<u32> {
    src.read_u32::<LittleEndian>().map_err(Error::Io)
}

fn read_u64(src: &mut impl Read) -> Result<u64> {
    src.read_u64::<LittleEndian>().map_err(Error::Io)
}

fn read_string(src: &mut impl Read) -> Result<String> {
    let len = read_u16(src)? as usize;
    let mut bytes = vec![0u8; len];
    src.read_exact(&mut bytes).map_err(Error::Io)?;
    String::from_utf8(bytes).map_err(Error::BadString)
}

fn read_qid(src: &mut impl Read) -> Result<Qid> {
    Ok(Qid { kind: read_u8(src)?, version: read_u32(src)?, path: read_u64(src)? })
}

fn write_string(dest: &mut impl Write, value: &str) -> io::Result<()> {
    let len: u16 = value
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string exceeds u16 length"))?;
    dest.write_u16::<LittleEndian>(len)?;
    dest.write_all(value.as_bytes())
}

fn write_qid(dest: &mut impl Write, qid: &Qid) -> io::Result<()> {
    dest.write_u8(qid.kind)?;
    dest.write_u32::<LittleEndian>(qid.version)?;
    dest.write_u64::<LittleEndian>(qid.path)
}
