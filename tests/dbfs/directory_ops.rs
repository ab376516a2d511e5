use ninefs::vfs::{Error, Vfs as _};

use crate::common::Fixture;

#[tokio::test]
async fn duplicate_create_fails_once() {
    let fixture = Fixture::new().await;
    fixture.fs.dir_create("/p").await.expect("first create succeeds");
    assert_eq!(fixture.fs.dir_create("/p").await.unwrap_err(), Error::AlreadyExists);
    assert!(fixture.fs.exists("/p").await);
}

#[tokio::test]
async fn listing_preserves_insertion_order() {
    let fixture = Fixture::new().await;
    let fs = &fixture.fs;
    fs.dir_create("/d").await.unwrap();
    for name in ["zeta", "alpha", "midway"] {
        fs.file_create(&format!("/d/{name}")).await.unwrap();
    }

    let names: Vec<String> =
        fs.dir_list("/d").await.unwrap().into_iter().map(|e| e.meta.name).collect();
    assert_eq!(names, vec!["zeta", "alpha", "midway"]);
}

#[tokio::test]
async fn removal_compacts_the_order() {
    let fixture = Fixture::new().await;
    let fs = &fixture.fs;
    fs.dir_create("/d").await.unwrap();
    for name in ["a", "b", "c"] {
        fs.file_create(&format!("/d/{name}")).await.unwrap();
    }
    fs.file_delete("/d/b").await.unwrap();

    let names: Vec<String> =
        fs.dir_list("/d").await.unwrap().into_iter().map(|e| e.meta.name).collect();
    assert_eq!(names, vec!["a", "c"]);
}

#[tokio::test]
async fn non_empty_directory_refuses_deletion() {
    let fixture = Fixture::new().await;
    let fs = &fixture.fs;
    fs.dir_create("/keep").await.unwrap();
    fs.file_create("/keep/inner").await.unwrap();

    assert_eq!(fs.dir_delete("/keep").await.unwrap_err(), Error::NotEmpty);
    assert!(fs.exists("/keep").await);
    assert!(fs.exists("/keep/inner").await);
}

#[tokio::test]
async fn root_cannot_be_deleted() {
    let fixture = Fixture::new().await;
    assert_eq!(fixture.fs.delete("/").await.unwrap_err(), Error::Invalid);
    assert_eq!(fixture.fs.dir_delete("/").await.unwrap_err(), Error::Invalid);
}

#[tokio::test]
async fn file_in_path_is_not_a_directory() {
    let fixture = Fixture::new().await;
    fixture.fs.file_create("/plain").await.unwrap();
    assert_eq!(
        fixture.fs.file_create("/plain/below").await.unwrap_err(),
        Error::NotDirectory
    );
    assert_eq!(fixture.fs.dir_list("/plain").await.unwrap_err(), Error::NotDirectory);
}

#[tokio::test]
async fn dir_delete_rejects_files() {
    let fixture = Fixture::new().await;
    fixture.fs.file_create("/f").await.unwrap();
    assert_eq!(fixture.fs.dir_delete("/f").await.unwrap_err(), Error::NotDirectory);
}

#[tokio::test]
async fn deleting_a_file_drops_its_chunks() {
    let fixture = Fixture::new().await;
    fixture.fs.file_write("/victim", &vec![7u8; 100_000]).await.unwrap();
    assert_eq!(fixture.chunk_lengths().await.len(), 2);

    fixture.fs.file_delete("/victim").await.unwrap();
    assert!(fixture.chunk_lengths().await.is_empty());
    // Only the root record remains.
    assert_eq!(fixture.record_count().await, 1);
}

#[tokio::test]
async fn racing_creates_of_one_name_serialise() {
    use std::sync::Arc;

    use ninefs::dbfs::DbFs;
    use ninefs::store::MemoryStore;

    let fs = Arc::new(
        DbFs::open(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
            .await
            .expect("open"),
    );

    let left = { let fs = fs.clone(); tokio::spawn(async move { fs.dir_create("/same").await }) };
    let right = { let fs = fs.clone(); tokio::spawn(async move { fs.dir_create("/same").await }) };
    let (left, right) = (left.await.expect("join"), right.await.expect("join"));

    assert!(left.is_ok() != right.is_ok(), "exactly one create may win");
    let loser = if left.is_ok() { right } else { left };
    assert_eq!(loser.unwrap_err(), Error::AlreadyExists);
    assert_eq!(fs.dir_list("/").await.unwrap().len(), 1);
}

#[tokio::test]
async fn ids_are_unique_and_never_reused() {
    let fixture = Fixture::new().await;
    let fs = &fixture.fs;
    let first = fs.file_create("/one").await.unwrap().meta.id;
    fs.file_delete("/one").await.unwrap();
    let second = fs.file_create("/two").await.unwrap().meta.id;
    assert_ne!(first, second);
}
