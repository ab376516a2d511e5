use ninefs::nine::wire::{
    OREAD, ORDWR, OWRITE, QTDIR, RCLUNK, RCREATE, ROPEN, RREMOVE, RVERSION, RWALK, RWRITE,
    VERSION,
};
use ninefs::vfs::{Vfs as _, DMDIR};

use crate::common::{read_qid, read_string, Client, start_server};

#[tokio::test]
async fn version_negotiates_down() {
    let (addr, _) = start_server().await;
    let mut client = Client::connect(addr).await;

    let reply = client.version(8192).await;
    reply.expect_type(RVERSION);
    let msize = u32::from_le_bytes(reply.body[..4].try_into().unwrap());
    assert_eq!(msize, 8192);
    let (version, _) = read_string(&reply.body, 4);
    assert_eq!(version, VERSION);
}

#[tokio::test]
async fn attach_yields_a_directory_qid() {
    let (addr, _) = start_server().await;
    let mut client = Client::connect(addr).await;
    client.version(8192).await.expect_type(RVERSION);

    let reply = client.attach(0, "tester").await;
    reply.expect_type(105);
    let (qid, _) = read_qid(&reply.body, 0);
    assert_ne!(qid.kind & QTDIR, 0);
}

#[tokio::test]
async fn walk_to_a_file_reports_its_logical_id() {
    let (addr, fs) = start_server().await;
    fs.dir_create("/docs").await.unwrap();
    fs.file_write("/docs/readme", b"hello").await.unwrap();
    let expected_id = fs.get("/docs/readme").await.unwrap().meta.id;

    let mut client = Client::attached(addr).await;
    let reply = client.walk(0, 1, &["docs", "readme"]).await;
    reply.expect_type(RWALK);
    let count = u16::from_le_bytes(reply.body[..2].try_into().unwrap());
    assert_eq!(count, 2);
    let (dir_qid, at) = read_qid(&reply.body, 2);
    assert_ne!(dir_qid.kind & QTDIR, 0);
    let (file_qid, _) = read_qid(&reply.body, at);
    assert_eq!(file_qid.kind, 0);
    assert_eq!(file_qid.path, expected_id as u64);

    client.open(1, OREAD).await.expect_type(ROPEN);
    assert_eq!(client.read_ok(1, 0, 4096).await, b"hello");
}

#[tokio::test]
async fn failed_walk_leaves_the_source_fid_usable() {
    let (addr, fs) = start_server().await;
    fs.dir_create("/docs").await.unwrap();

    let mut client = Client::attached(addr).await;
    let error = client.walk(0, 1, &["ghost"]).await.expect_error();
    assert_eq!(error, "NotFound");

    // Fid 0 is still the root and fid 1 was never bound.
    client.walk(0, 1, &["docs"]).await.expect_type(RWALK);
}

#[tokio::test]
async fn partial_walk_reports_the_prefix() {
    let (addr, fs) = start_server().await;
    fs.dir_create("/docs").await.unwrap();

    let mut client = Client::attached(addr).await;
    let reply = client.walk(0, 1, &["docs", "ghost"]).await;
    reply.expect_type(RWALK);
    let count = u16::from_le_bytes(reply.body[..2].try_into().unwrap());
    assert_eq!(count, 1);

    // Partial success binds nothing; fid 1 stays free.
    client.walk(0, 1, &["docs"]).await.expect_type(RWALK);
}

#[tokio::test]
async fn walk_from_an_open_fid_is_refused() {
    let (addr, fs) = start_server().await;
    fs.dir_create("/docs").await.unwrap();

    let mut client = Client::attached(addr).await;
    client.walk(0, 1, &["docs"]).await.expect_type(RWALK);
    client.open(1, OREAD).await.expect_type(ROPEN);
    client.walk(1, 2, &[]).await.expect_error();
}

#[tokio::test]
async fn create_write_read_round_trip() {
    let (addr, fs) = start_server().await;
    fs.dir_create("/work").await.unwrap();

    let mut client = Client::attached(addr).await;
    client.walk(0, 1, &["work"]).await.expect_type(RWALK);
    client.create(1, "notes.txt", 0o644, ORDWR).await.expect_type(RCREATE);

    let reply = client.write(1, 0, b"first line").await;
    reply.expect_type(RWRITE);
    assert_eq!(u32::from_le_bytes(reply.body[..4].try_into().unwrap()), 10);

    assert_eq!(client.read_ok(1, 0, 4096).await, b"first line");
    assert_eq!(fs.file_read("/work/notes.txt").await.unwrap(), b"first line");
}

#[tokio::test]
async fn create_with_the_directory_bit_makes_a_directory() {
    let (addr, fs) = start_server().await;
    let mut client = Client::attached(addr).await;

    let reply = client.create(0, "subdir", DMDIR | 0o755, OREAD).await;
    reply.expect_type(RCREATE);
    let (qid, _) = read_qid(&reply.body, 0);
    assert_ne!(qid.kind & QTDIR, 0);
    assert!(fs.get("/subdir").await.unwrap().is_dir());
}

#[tokio::test]
async fn offset_writes_extend_and_overwrite() {
    let (addr, fs) = start_server().await;
    fs.file_write("/f", b"0123456789").await.unwrap();

    let mut client = Client::attached(addr).await;
    client.walk(0, 1, &["f"]).await.expect_type(RWALK);
    client.open(1, OWRITE).await.expect_type(ROPEN);

    // Overwrite in the middle.
    client.write(1, 2, b"XX").await.expect_type(RWRITE);
    assert_eq!(fs.file_read("/f").await.unwrap(), b"01XX456789");

    // Append at the end.
    client.write(1, 10, b"ab").await.expect_type(RWRITE);
    assert_eq!(fs.file_read("/f").await.unwrap(), b"01XX456789ab");

    // Write past the end leaves a zero gap.
    client.write(1, 14, b"z").await.expect_type(RWRITE);
    assert_eq!(fs.file_read("/f").await.unwrap(), b"01XX456789ab\0\0z");
}

#[tokio::test]
async fn reads_on_a_write_only_fid_are_refused() {
    let (addr, fs) = start_server().await;
    fs.file_write("/f", b"secret").await.unwrap();

    let mut client = Client::attached(addr).await;
    client.walk(0, 1, &["f"]).await.expect_type(RWALK);
    client.open(1, OWRITE).await.expect_type(ROPEN);
    assert_eq!(client.read(1, 0, 16).await.expect_error(), "Permission");
}

#[tokio::test]
async fn remove_via_fid_deletes_and_clunks() {
    let (addr, fs) = start_server().await;
    fs.dir_create("/tmp").await.unwrap();
    fs.file_create("/tmp/victim").await.unwrap();

    let mut client = Client::attached(addr).await;
    client.walk(0, 1, &["tmp", "victim"]).await.expect_type(RWALK);
    client.remove(1).await.expect_type(RREMOVE);

    assert!(!fs.exists("/tmp/victim").await);
    assert_eq!(client.walk(0, 2, &["tmp", "victim"]).await.expect_error(), "NotFound");
    // The fid is gone too.
    client.clunk(1).await.expect_error();
}

#[tokio::test]
async fn clunk_releases_the_fid() {
    let (addr, _) = start_server().await;
    let mut client = Client::attached(addr).await;
    client.walk(0, 1, &[]).await.expect_type(RWALK);
    client.clunk(1).await.expect_type(RCLUNK);
    client.clunk(1).await.expect_error();
}

#[tokio::test]
async fn auth_is_not_required() {
    let (addr, _) = start_server().await;
    let mut client = Client::attached(addr).await;
    // Walking to a fresh fid and clunking twice proves the session is
    // serving requests without any auth handshake.
    client.walk(0, 7, &[]).await.expect_type(RWALK);
    client.clunk(7).await.expect_type(RCLUNK);
}
