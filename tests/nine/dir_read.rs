use ninefs::nine::wire::{OREAD, ROPEN, RWALK};
use ninefs::vfs::Vfs as _;

use crate::common::{read_qid, read_string, Client, start_server};

/// Decodes a serialised stat sequence into entry names.
fn stat_names(data: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    let mut at = 0;
    while at < data.len() {
        let size = u16::from_le_bytes(data[at..at + 2].try_into().unwrap()) as usize;
        let stat = &data[at + 2..at + 2 + size];
        // Skip type[2] dev[4] qid[13] mode[4] atime[4] mtime[4] length[8].
        let (name, _) = read_string(stat, 39);
        names.push(name);
        at += 2 + size;
    }
    names
}

#[tokio::test]
async fn directory_reads_stream_stats() {
    let (addr, fs) = start_server().await;
    for name in ["alpha", "beta", "gamma"] {
        fs.file_create(&format!("/{name}")).await.unwrap();
    }

    let mut client = Client::attached(addr).await;
    client.open(0, OREAD).await.expect_type(ROPEN);

    let data = client.read_ok(0, 0, 8192).await;
    assert_eq!(stat_names(&data), vec!["alpha", "beta", "gamma"]);

    // The cursor is exhausted.
    let tail = client.read_ok(0, data.len() as u64, 8192).await;
    assert!(tail.is_empty());
}

#[tokio::test]
async fn short_reads_paginate_without_splitting_stats() {
    let (addr, fs) = start_server().await;
    for name in ["one", "two", "three", "four"] {
        fs.file_create(&format!("/{name}")).await.unwrap();
    }

    let mut client = Client::attached(addr).await;
    client.open(0, OREAD).await.expect_type(ROPEN);

    let mut names = Vec::new();
    let mut offset = 0u64;
    loop {
        // Enough for roughly one stat at a time.
        let data = client.read_ok(0, offset, 80).await;
        if data.is_empty() {
            break;
        }
        names.extend(stat_names(&data));
        offset += data.len() as u64;
    }
    assert_eq!(names, vec!["one", "two", "three", "four"]);
}

#[tokio::test]
async fn rewinding_to_zero_restarts_the_listing() {
    let (addr, fs) = start_server().await;
    fs.file_create("/only").await.unwrap();

    let mut client = Client::attached(addr).await;
    client.open(0, OREAD).await.expect_type(ROPEN);

    let first = client.read_ok(0, 0, 8192).await;
    let again = client.read_ok(0, 0, 8192).await;
    assert_eq!(stat_names(&first), stat_names(&again));
}

#[tokio::test]
async fn off_cursor_directory_reads_are_rejected() {
    let (addr, fs) = start_server().await;
    fs.file_create("/only").await.unwrap();

    let mut client = Client::attached(addr).await;
    client.open(0, OREAD).await.expect_type(ROPEN);
    client.read_ok(0, 0, 8192).await;

    client.read(0, 7, 8192).await.expect_error();
}

#[tokio::test]
async fn listing_reflects_directory_contents() {
    let (addr, fs) = start_server().await;
    fs.dir_create("/mixed").await.unwrap();
    fs.dir_create("/mixed/sub").await.unwrap();
    fs.file_create("/mixed/plain").await.unwrap();

    let mut client = Client::attached(addr).await;
    client.walk(0, 1, &["mixed"]).await.expect_type(RWALK);
    client.open(1, OREAD).await.expect_type(ROPEN);

    let data = client.read_ok(1, 0, 8192).await;
    assert_eq!(stat_names(&data), vec!["sub", "plain"]);

    // The first stat describes a directory.
    let (qid, _) = read_qid(&data, 2 + 2 + 4);
    assert_ne!(qid.kind & 0x80, 0);
}
