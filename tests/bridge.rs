use std::fs;
use std::path::Path;

use zipkit::{BridgeEvent, ErrorKind, ZipBridge, ZipReader};

fn docs_tree(root: &Path) -> std::path::PathBuf {
    let docs = root.join("docs");
    fs::create_dir_all(docs.join("sub")).unwrap();
    fs::write(docs.join("a.txt"), b"hello world\n").unwrap();
    fs::write(docs.join("sub").join("b.txt"), b"").unwrap();
    docs
}

fn uri(path: &Path) -> String {
    format!("file://{}", path.display())
}

async fn collect(mut handle: zipkit::OperationHandle) -> Vec<BridgeEvent> {
    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        events.push(event);
    }
    events
}

/// Progress events, then exactly one terminal event at the very end.
fn assert_well_formed(events: &[BridgeEvent]) {
    let (last, rest) = events.split_last().expect("no events");
    assert!(last.is_terminal(), "last event {last:?}");
    assert!(rest.iter().all(BridgeEvent::keep_callback));
}

#[tokio::test]
async fn zip_then_unzip_through_bridge() {
    let temp_dir = tempfile::Builder::new()
        .prefix("zipkit-test-bridge-")
        .tempdir()
        .expect("Failed to create temp dir");
    let docs = docs_tree(temp_dir.path());
    let archive = temp_dir.path().join("docs.zip");
    let out = temp_dir.path().join("out");
    let bridge = ZipBridge::default();

    let events = collect(bridge.zip(&uri(&docs), &uri(&archive), "s3cret")).await;
    assert_well_formed(&events);
    assert_eq!(events.last(), Some(&BridgeEvent::Success));

    let reader = ZipReader::open(&archive).await.unwrap();
    assert!(reader.is_encrypted());
    let names: Vec<_> = reader.entries().iter().map(|e| e.file_name.as_str()).collect();
    assert_eq!(names, ["a.txt", "sub/", "sub/b.txt"]);

    let events = collect(bridge.unzip(&uri(&archive), &uri(&out), "s3cret")).await;
    assert_well_formed(&events);
    assert_eq!(events.last(), Some(&BridgeEvent::Success));

    let progress: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            BridgeEvent::Progress(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0].loaded <= w[1].loaded));
    let final_progress = progress.last().unwrap();
    assert_eq!(final_progress.loaded, final_progress.total);
    assert_eq!(final_progress.total, reader.total_compressed_size());

    assert_eq!(fs::read(out.join("a.txt")).unwrap(), b"hello world\n");
    assert!(out.join("sub").join("b.txt").is_file());
}

#[tokio::test]
async fn unzip_creates_output_directory() {
    let temp_dir = tempfile::tempdir().unwrap();
    let docs = docs_tree(temp_dir.path());
    let archive = temp_dir.path().join("docs.zip");
    let out = temp_dir.path().join("deep").join("er").join("out");
    let bridge = ZipBridge::default();

    bridge
        .zip(docs.to_str().unwrap(), archive.to_str().unwrap(), "")
        .wait()
        .await
        .unwrap();
    bridge
        .unzip(archive.to_str().unwrap(), out.to_str().unwrap(), "")
        .wait()
        .await
        .unwrap();

    assert!(out.join("a.txt").is_file());
}

#[tokio::test]
async fn missing_password_is_reported() {
    let temp_dir = tempfile::tempdir().unwrap();
    let docs = docs_tree(temp_dir.path());
    let archive = temp_dir.path().join("docs.zip");
    let out = temp_dir.path().join("out");
    let bridge = ZipBridge::default();

    bridge
        .zip(&uri(&docs), &uri(&archive), "pw")
        .wait()
        .await
        .unwrap();

    let err = bridge
        .unzip(&uri(&archive), &uri(&out), "")
        .wait()
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadPassword);
    assert!(!out.join("a.txt").exists());
}

#[tokio::test]
async fn missing_source_is_not_found() {
    let temp_dir = tempfile::tempdir().unwrap();
    let bridge = ZipBridge::default();

    let events = collect(bridge.unzip(
        &uri(&temp_dir.path().join("absent.zip")),
        &uri(&temp_dir.path().join("out")),
        "",
    ))
    .await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        BridgeEvent::Error(err) => {
            assert_eq!(err.kind, ErrorKind::NotFound);
            assert_eq!(err.message, "Zip file does not exist");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn uncreatable_output_is_reported() {
    let temp_dir = tempfile::tempdir().unwrap();
    let docs = docs_tree(temp_dir.path());
    let archive = temp_dir.path().join("docs.zip");
    let bridge = ZipBridge::default();
    bridge
        .zip(&uri(&docs), &uri(&archive), "")
        .wait()
        .await
        .unwrap();

    // A regular file cannot hold a directory.
    let blocker = temp_dir.path().join("blocker");
    fs::write(&blocker, b"x").unwrap();

    let err = bridge
        .unzip(&uri(&archive), &uri(&blocker.join("out")), "")
        .wait()
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::DirectoryCreation);
    assert_eq!(err.message, "Could not create output directory");
}

#[tokio::test]
async fn zip_of_missing_folder_fails_once() {
    let temp_dir = tempfile::tempdir().unwrap();
    let archive = temp_dir.path().join("never.zip");
    let bridge = ZipBridge::default();

    let events = collect(bridge.zip(
        &uri(&temp_dir.path().join("no-such-dir")),
        &uri(&archive),
        "",
    ))
    .await;

    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], BridgeEvent::Error(e) if e.kind == ErrorKind::NotFound));
    assert!(!archive.exists());
}

#[tokio::test]
async fn cancelled_unzip_reports_cancellation() {
    let temp_dir = tempfile::tempdir().unwrap();
    let docs = docs_tree(temp_dir.path());
    let archive = temp_dir.path().join("docs.zip");
    let out = temp_dir.path().join("out");
    let bridge = ZipBridge::default();
    bridge
        .zip(&uri(&docs), &uri(&archive), "")
        .wait()
        .await
        .unwrap();

    // The single-threaded test runtime does not start the task before the
    // first await, so the cancel always lands before the first entry.
    let handle = bridge.unzip(&uri(&archive), &uri(&out), "");
    handle.cancel();
    let err = handle.wait().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert!(!out.join("a.txt").exists());
}

#[tokio::test]
async fn cancelled_zip_leaves_no_archive() {
    let temp_dir = tempfile::tempdir().unwrap();
    let docs = docs_tree(temp_dir.path());
    let archive = temp_dir.path().join("docs.zip");
    let bridge = ZipBridge::default();

    let handle = bridge.zip(&uri(&docs), &uri(&archive), "");
    handle.cancel();
    let err = handle.wait().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert!(!archive.exists());
}
