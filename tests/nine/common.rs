//! A minimal hand-rolled 9P2000 client for exercising the server.

use std::net::SocketAddr;
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use ninefs::dbfs::DbFs;
use ninefs::nine;
use ninefs::nine::wire::{NOFID, NOTAG, RATTACH, RERROR, RVERSION};
use ninefs::store::MemoryStore;
use ninefs::vfs::Vfs;

/// Spawns a server over a fresh chunked-store backend and returns its
/// address plus a handle on the backend for out-of-band setup.
pub async fn start_server() -> (SocketAddr, Arc<dyn Vfs>) {
    let fs: Arc<dyn Vfs> = Arc::new(
        DbFs::open(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
            .await
            .expect("open backend"),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(nine::serve(listener, fs.clone()));
    (addr, fs)
}

/// One reply frame, split into its header fields and the remaining body.
pub struct Reply {
    pub mtype: u8,
    pub tag: u16,
    pub body: Vec<u8>,
}

impl Reply {
    /// Asserts this is an `Rerror` and returns its message.
    pub fn expect_error(&self) -> String {
        assert_eq!(self.mtype, RERROR, "expected Rerror, got type {}", self.mtype);
        read_string(&self.body, 0).0
    }

    /// Asserts this reply has the given type.
    pub fn expect_type(&self, mtype: u8) -> &Reply {
        assert_eq!(
            self.mtype, mtype,
            "expected type {mtype} for tag {}, got {} (body {:?})",
            self.tag, self.mtype, self.body
        );
        self
    }
}

/// Reads a counted string at `at`, returning it and the following offset.
pub fn read_string(body: &[u8], at: usize) -> (String, usize) {
    let len = u16::from_le_bytes(body[at..at + 2].try_into().unwrap()) as usize;
    let text = String::from_utf8(body[at + 2..at + 2 + len].to_vec()).unwrap();
    (text, at + 2 + len)
}

/// A decoded qid.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Qid {
    pub kind: u8,
    pub version: u32,
    pub path: u64,
}

pub fn read_qid(body: &[u8], at: usize) -> (Qid, usize) {
    let kind = body[at];
    let version = u32::from_le_bytes(body[at + 1..at + 5].try_into().unwrap());
    let path = u64::from_le_bytes(body[at + 5..at + 13].try_into().unwrap());
    (Qid { kind, version, path }, at + 13)
}

pub struct Client {
    stream: TcpStream,
    next_tag: u16,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Client {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Client { stream, next_tag: 1 }
    }

    /// Connects and runs version and attach, leaving fid 0 at the root.
    pub async fn attached(addr: SocketAddr) -> Client {
        let mut client = Client::connect(addr).await;
        client.version(8192).await.expect_type(RVERSION);
        client.attach(0, "tester").await.expect_type(RATTACH);
        client
    }

    async fn rpc(&mut self, mtype: u8, tag: u16, body: &[u8]) -> Reply {
        let mut frame = Vec::with_capacity(body.len() + 7);
        WriteBytesExt::write_u32::<LittleEndian>(&mut frame, body.len() as u32 + 7).unwrap();
        WriteBytesExt::write_u8(&mut frame, mtype).unwrap();
        WriteBytesExt::write_u16::<LittleEndian>(&mut frame, tag).unwrap();
        frame.extend_from_slice(body);
        self.stream.write_all(&frame).await.expect("send request");

        let mut size_buf = [0u8; 4];
        self.stream.read_exact(&mut size_buf).await.expect("read reply size");
        let size = u32::from_le_bytes(size_buf) as usize;
        let mut rest = vec![0u8; size - 4];
        self.stream.read_exact(&mut rest).await.expect("read reply body");

        let reply_tag = u16::from_le_bytes(rest[1..3].try_into().unwrap());
        assert_eq!(reply_tag, tag, "reply tag mismatch");
        Reply { mtype: rest[0], tag: reply_tag, body: rest[3..].to_vec() }
    }

    fn tag(&mut self) -> u16 {
        let tag = self.next_tag;
        self.next_tag += 1;
        tag
    }

    pub async fn version(&mut self, msize: u32) -> Reply {
        let mut body = Vec::new();
        WriteBytesExt::write_u32::<LittleEndian>(&mut body, msize).unwrap();
        write_string(&mut body, "9P2000");
        self.rpc(100, NOTAG, &body).await
    }

    pub async fn attach(&mut self, fid: u32, uname: &str) -> Reply {
        let mut body = Vec::new();
        WriteBytesExt::write_u32::<LittleEndian>(&mut body, fid).unwrap();
        WriteBytesExt::write_u32::<LittleEndian>(&mut body, NOFID).unwrap();
        write_string(&mut body, uname);
        write_string(&mut body, "");
        let tag = self.tag();
        self.rpc(104, tag, &body).await
    }

    pub async fn walk(&mut self, fid: u32, newfid: u32, names: &[&str]) -> Reply {
        let mut body = Vec::new();
        WriteBytesExt::write_u32::<LittleEndian>(&mut body, fid).unwrap();
        WriteBytesExt::write_u32::<LittleEndian>(&mut body, newfid).unwrap();
        WriteBytesExt::write_u16::<LittleEndian>(&mut body, names.len() as u16).unwrap();
        for name in names {
            write_string(&mut body, name);
        }
        let tag = self.tag();
        self.rpc(110, tag, &body).await
    }

    pub async fn open(&mut self, fid: u32, mode: u8) -> Reply {
        let mut body = Vec::new();
        WriteBytesExt::write_u32::<LittleEndian>(&mut body, fid).unwrap();
        WriteBytesExt::write_u8(&mut body, mode).unwrap();
        let tag = self.tag();
        self.rpc(112, tag, &body).await
    }

    pub async fn create(&mut self, fid: u32, name: &str, perm: u32, mode: u8) -> Reply {
        let mut body = Vec::new();
        WriteBytesExt::write_u32::<LittleEndian>(&mut body, fid).unwrap();
        write_string(&mut body, name);
        WriteBytesExt::write_u32::<LittleEndian>(&mut body, perm).unwrap();
        WriteBytesExt::write_u8(&mut body, mode).unwrap();
        let tag = self.tag();
        self.rpc(114, tag, &body).await
    }

    pub async fn read(&mut self, fid: u32, offset: u64, count: u32) -> Reply {
        let mut body = Vec::new();
        WriteBytesExt::write_u32::<LittleEndian>(&mut body, fid).unwrap();
        WriteBytesExt::write_u64::<LittleEndian>(&mut body, offset).unwrap();
        WriteBytesExt::write_u32::<LittleEndian>(&mut body, count).unwrap();
        let tag = self.tag();
        self.rpc(116, tag, &body).await
    }

    /// Reads through fid and asserts success, returning the data.
    pub async fn read_ok(&mut self, fid: u32, offset: u64, count: u32) -> Vec<u8> {
        let reply = self.read(fid, offset, count).await;
        reply.expect_type(117);
        let len = u32::from_le_bytes(reply.body[..4].try_into().unwrap()) as usize;
        reply.body[4..4 + len].to_vec()
    }

    pub async fn write(&mut self, fid: u32, offset: u64, data: &[u8]) -> Reply {
        let mut body = Vec::new();
        WriteBytesExt::write_u32::<LittleEndian>(&mut body, fid).unwrap();
        WriteBytesExt::write_u64::<LittleEndian>(&mut body, offset).unwrap();
        WriteBytesExt::write_u32::<LittleEndian>(&mut body, data.len() as u32).unwrap();
        body.extend_from_slice(data);
        let tag = self.tag();
        self.rpc(118, tag, &body).await
    }

    pub async fn clunk(&mut self, fid: u32) -> Reply {
        let mut body = Vec::new();
        WriteBytesExt::write_u32::<LittleEndian>(&mut body, fid).unwrap();
        let tag = self.tag();
        self.rpc(120, tag, &body).await
    }

    pub async fn remove(&mut self, fid: u32) -> Reply {
        let mut body = Vec::new();
        WriteBytesExt::write_u32::<LittleEndian>(&mut body, fid).unwrap();
        let tag = self.tag();
        self.rpc(122, tag, &body).await
    }

    pub async fn stat(&mut self, fid: u32) -> Reply {
        let mut body = Vec::new();
        WriteBytesExt::write_u32::<LittleEndian>(&mut body, fid).unwrap();
        let tag = self.tag();
        self.rpc(124, tag, &body).await
    }

    /// Sends a `Twstat` renaming the entry and leaving every other field
    /// untouched.
    pub async fn wstat_rename(&mut self, fid: u32, name: &str) -> Reply {
        self.wstat(fid, name, u32::MAX, u64::MAX).await
    }

    pub async fn wstat(&mut self, fid: u32, name: &str, mode: u32, length: u64) -> Reply {
        let mut stat = Vec::new();
        WriteBytesExt::write_u16::<LittleEndian>(&mut stat, u16::MAX).unwrap();
        WriteBytesExt::write_u32::<LittleEndian>(&mut stat, u32::MAX).unwrap();
        WriteBytesExt::write_u8(&mut stat, 0xff).unwrap();
        WriteBytesExt::write_u32::<LittleEndian>(&mut stat, u32::MAX).unwrap();
        WriteBytesExt::write_u64::<LittleEndian>(&mut stat, u64::MAX).unwrap();
        WriteBytesExt::write_u32::<LittleEndian>(&mut stat, mode).unwrap();
        WriteBytesExt::write_u32::<LittleEndian>(&mut stat, u32::MAX).unwrap();
        WriteBytesExt::write_u32::<LittleEndian>(&mut stat, u32::MAX).unwrap();
        WriteBytesExt::write_u64::<LittleEndian>(&mut stat, length).unwrap();
        write_string(&mut stat, name);
        write_string(&mut stat, "");
        write_string(&mut stat, "");
        write_string(&mut stat, "");

        let mut body = Vec::new();
        WriteBytesExt::write_u32::<LittleEndian>(&mut body, fid).unwrap();
        WriteBytesExt::write_u16::<LittleEndian>(&mut body, stat.len() as u16 + 2).unwrap();
        WriteBytesExt::write_u16::<LittleEndian>(&mut body, stat.len() as u16).unwrap();
        body.extend_from_slice(&stat);
        let tag = self.tag();
        self.rpc(126, tag, &body).await
    }
}

pub fn write_string(dest: &mut Vec<u8>, value: &str) {
    WriteBytesExt::write_u16::<LittleEndian>(dest, value.len() as u16).unwrap();
    dest.extend_from_slice(value.as_bytes());
}
