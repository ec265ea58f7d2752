mod common;

use common::{mixed_archive, write_archive, Method, ZipBuilder};

use xzip::fs::catalog::EntryKind;
use xzip::fs::{ArchiveCatalog, ROOT_INO};
use xzip::{Exploder, XzipError};

async fn exploded_pair() -> (tempfile::TempDir, Vec<u8>, Vec<u8>) {
    let dir = tempfile::tempdir().unwrap();
    let a = mixed_archive();
    let b = ZipBuilder::new()
        .entry("docs/readme.txt", b"read me, read me, read me, read me", Method::Deflated)
        .entry("other.txt", b"something else entirely", Method::Stored)
        .build();
    let a_path = write_archive(dir.path(), "a.zip", &a);
    let b_path = write_archive(dir.path(), "b.zip", &b);

    let exploder = Exploder::new(&dir.path().join("store"), 1);
    for result in exploder.explode_all(&[a_path, b_path]).await {
        result.1.unwrap();
    }
    (dir, a, b)
}

#[tokio::test]
async fn test_listing_and_full_read() {
    let (dir, a, b) = exploded_pair().await;
    let catalog = ArchiveCatalog::new(&dir.path().join("store"), 1);

    let listing = catalog.list().await.unwrap();
    let names: Vec<_> = listing.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["a.zip", "b.zip"]);

    let attr = catalog.lookup("a.zip").await.unwrap();
    assert_eq!(attr.kind, EntryKind::File);
    assert_eq!(attr.size, a.len() as u64);
    assert_eq!(attr.perm & 0o222, 0);
    assert_eq!(catalog.read(attr.ino, 0, a.len() + 100).await.unwrap(), a);

    let b_ino = listing[1].ino;
    assert_eq!(catalog.read(b_ino, 0, b.len()).await.unwrap(), b);
}

#[tokio::test]
async fn test_concurrent_reads() {
    let (dir, a, _) = exploded_pair().await;
    let catalog = std::sync::Arc::new(ArchiveCatalog::new(&dir.path().join("store"), 1));
    let ino = catalog.lookup("a.zip").await.unwrap().ino;
    let fh = catalog.open(ino).await.unwrap();

    let mut tasks = Vec::new();
    for offset in (0..a.len()).step_by(257) {
        let catalog = catalog.clone();
        tasks.push(tokio::spawn(async move {
            (offset, catalog.read(ino, offset as u64, 1000).await.unwrap())
        }));
    }
    for task in tasks {
        let (offset, data) = task.await.unwrap();
        let end = (offset + 1000).min(a.len());
        assert_eq!(data, &a[offset..end]);
    }
    catalog.release(fh);
}

#[tokio::test]
async fn test_missing_blob_fails_only_reads_that_need_it() {
    let (dir, a, b) = exploded_pair().await;
    let root = dir.path().join("store");
    let catalog = ArchiveCatalog::new(&root, 1);
    let a_ino = catalog.lookup("a.zip").await.unwrap().ino;
    let b_ino = catalog.lookup("b.zip").await.unwrap().ino;

    // remove a blob only a.zip references
    let b_blobs = catalog
        .archive(b_ino)
        .await
        .unwrap()
        .descriptor()
        .referenced_blobs();
    let archive = catalog.archive(a_ino).await.unwrap();
    let only_a = archive
        .descriptor()
        .referenced_blobs()
        .into_iter()
        .find(|h| !b_blobs.contains(h))
        .unwrap();
    std::fs::remove_file(archive.store().blob_path(&only_a)).unwrap();

    let err = catalog.read(a_ino, 0, a.len()).await.unwrap_err();
    assert!(matches!(err, XzipError::BlobNotFound { .. }));
    assert_eq!(err.to_errno(), libc::EIO);

    // the archive itself stays usable for other reads, and so does its neighbour
    assert_eq!(catalog.read(a_ino, 0, 4).await.unwrap(), b"PK\x03\x04");
    assert_eq!(catalog.read(b_ino, 0, b.len()).await.unwrap(), b);
}

#[tokio::test]
async fn test_root_and_unknown_names() {
    let (dir, _, _) = exploded_pair().await;
    let catalog = ArchiveCatalog::new(&dir.path().join("store"), 1);

    let root = catalog.attr(ROOT_INO).await.unwrap();
    assert_eq!(root.kind, EntryKind::Directory);

    for name in ["c.zip", "a.zip.dir", "../a.zip", ""] {
        let err = catalog.lookup(name).await.unwrap_err();
        assert_eq!(err.to_errno(), libc::ENOENT, "{:?}", name);
    }
}

#[tokio::test]
async fn test_depth_mismatch_fails_fast() {
    let (dir, _, _) = exploded_pair().await;
    let catalog = ArchiveCatalog::new(&dir.path().join("store"), 0);

    // still listed, but unreadable
    assert_eq!(catalog.list().await.unwrap().len(), 2);
    let err = catalog.lookup("a.zip").await.unwrap_err();
    assert!(matches!(err, XzipError::Unreadable { .. }));
}
