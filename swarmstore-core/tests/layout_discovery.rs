use std::fs;
use std::sync::Arc;

use swarmstore_core::diagnostics::{RecordingDiagnostics, StoreEvent};
use swarmstore_core::manifest::SENTINEL;
use swarmstore_core::oracle::UnknownSize;
use swarmstore_core::{ContentStore, LayoutState, StorageError, StoreConfig};

// 30-byte header + "a.txt 10\n" + "bb 20\n" = 45 bytes; content is 45 + 10 + 20.
fn manifest_45() -> Vec<u8> {
    let m = format!("{SENTINEL} 45\na.txt 10\nbb 20\n").into_bytes();
    assert_eq!(m.len(), 45);
    m
}

// Self-sized manifest with arbitrary (possibly hostile) body lines.
fn raw_manifest(body: &str) -> Vec<u8> {
    let mut n = SENTINEL.len() + 2 + body.len() + 1;
    loop {
        let next = SENTINEL.len() + 2 + body.len() + n.to_string().len();
        if next == n {
            break;
        }
        n = next;
    }
    format!("{SENTINEL} {n}\n{body}").into_bytes()
}

#[test]
fn manifest_in_two_chunks_then_spanning_write() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join("swarm");
    let mut store = ContentStore::open(&root, StoreConfig::default()).unwrap();
    assert_eq!(store.state(), LayoutState::Unknown);

    let m = manifest_45();
    assert_eq!(store.write(&m[..30], 0).unwrap(), 30);
    assert_eq!(store.state(), LayoutState::ManifestSizeKnown);
    assert_eq!(store.manifest_size(), Some(45));

    assert_eq!(store.write(&m[30..], 30).unwrap(), 15);
    assert_eq!(store.state(), LayoutState::ManifestComplete);
    let spans: Vec<(String, u64, u64)> = store
        .slices()
        .iter()
        .map(|s| (s.manifest_path().to_string(), s.start(), s.end()))
        .collect();
    assert_eq!(
        spans,
        vec![
            (SENTINEL.to_string(), 0, 44),
            ("a.txt".to_string(), 45, 54),
            ("bb".to_string(), 55, 74),
        ]
    );
    assert_eq!(store.content_len(), Some(75));

    // 50..60 straddles a.txt[5..10] and bb[0..5]
    assert_eq!(store.write(b"0123456789", 50).unwrap(), 10);
    let a = fs::read(td.path().join("a.txt")).unwrap();
    assert_eq!(&a[..5], &[0u8; 5]);
    assert_eq!(&a[5..], b"01234");
    assert_eq!(fs::read(td.path().join("bb")).unwrap(), b"56789");
    // the manifest blob itself lives at the root path
    assert_eq!(fs::read(&root).unwrap(), m);
}

#[test]
fn manifest_and_data_in_one_write() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join("swarm");
    let mut store = ContentStore::open(&root, StoreConfig::default()).unwrap();

    let mut all = manifest_45();
    all.extend_from_slice(b"AAAAAAAAAA");
    all.extend_from_slice(&[b'B'; 20]);
    assert_eq!(store.write(&all, 0).unwrap(), 75);
    assert_eq!(store.state(), LayoutState::ManifestComplete);
    assert_eq!(fs::read(td.path().join("a.txt")).unwrap(), b"AAAAAAAAAA");
    assert_eq!(fs::read(td.path().join("bb")).unwrap(), vec![b'B'; 20]);

    let mut back = vec![0u8; 75];
    assert_eq!(store.read(&mut back, 0).unwrap(), 75);
    assert_eq!(back, all);
}

#[test]
fn plain_first_write_selects_single_file() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join("movie.bin");
    let mut store = ContentStore::open(&root, StoreConfig::default()).unwrap();

    assert_eq!(store.write(b"hello world", 0).unwrap(), 11);
    assert_eq!(store.state(), LayoutState::SingleFile);
    assert!(store.slices().is_empty());
    assert_eq!(store.write(b"!", 20).unwrap(), 1);

    let mut buf = [0u8; 32];
    assert_eq!(store.read(&mut buf, 0).unwrap(), 21);
    assert_eq!(&buf[..11], b"hello world");
    assert_eq!(buf[20], b'!');
    assert_eq!(fs::read(&root).unwrap().len(), 21);
}

#[test]
fn first_write_away_from_zero_is_rejected() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join("swarm");
    let mut store = ContentStore::open(&root, StoreConfig::default()).unwrap();

    let err = store.write(b"data", 1024).expect_err("offset must be 0");
    assert!(matches!(err, StorageError::InvalidArgument(_)), "{err}");
    assert_eq!(store.state(), LayoutState::Unknown);
    assert!(!root.exists());

    let mut buf = [0u8; 4];
    let err = store.read(&mut buf, 0).expect_err("nothing to read yet");
    assert!(matches!(err, StorageError::InvalidArgument(_)));
}

#[test]
fn sentinel_without_size_is_rejected() {
    let td = tempfile::tempdir().unwrap();
    let mut store = ContentStore::open(td.path().join("swarm"), StoreConfig::default()).unwrap();
    let err = store.write(format!("{SENTINEL} lots\n").as_bytes(), 0).unwrap_err();
    assert!(matches!(err, StorageError::InvalidArgument(_)), "{err}");
    assert_eq!(store.state(), LayoutState::Unknown);
}

#[test]
fn oversized_manifest_header_is_rejected() {
    let td = tempfile::tempdir().unwrap();
    let cfg = StoreConfig { max_manifest_size: 1024, ..StoreConfig::default() };
    let mut store = ContentStore::open(td.path().join("swarm"), cfg).unwrap();
    let err = store.write(format!("{SENTINEL} 999999999\n").as_bytes(), 0).unwrap_err();
    assert!(matches!(err, StorageError::InvalidArgument(_)), "{err}");
}

#[test]
fn data_before_manifest_completes_is_rejected() {
    let td = tempfile::tempdir().unwrap();
    let mut store = ContentStore::open(td.path().join("swarm"), StoreConfig::default()).unwrap();
    let m = manifest_45();
    store.write(&m[..30], 0).unwrap();
    let err = store.write(b"early", 60).unwrap_err();
    assert!(matches!(err, StorageError::InvalidArgument(_)), "{err}");
    assert_eq!(store.state(), LayoutState::ManifestSizeKnown);

    // the partial manifest can be read back meanwhile
    let mut head = [0u8; 30];
    assert_eq!(store.read(&mut head, 0).unwrap(), 30);
    assert_eq!(&head[..], &m[..30]);
}

#[test]
fn existing_manifest_on_disk_is_seeded() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join(SENTINEL);
    fs::write(&root, manifest_45()).unwrap();
    fs::write(td.path().join("a.txt"), b"aaaaaaaaaa").unwrap();
    fs::write(td.path().join("bb"), vec![b'b'; 20]).unwrap();

    let store = ContentStore::open(&root, StoreConfig::default()).unwrap();
    assert_eq!(store.state(), LayoutState::ManifestComplete);
    assert_eq!(store.slices().len(), 3);

    let mut buf = vec![0u8; 75];
    assert_eq!(store.read(&mut buf, 0).unwrap(), 75);
    assert_eq!(&buf[..45], &manifest_45()[..]);
    assert_eq!(&buf[45..55], b"aaaaaaaaaa");
    assert_eq!(&buf[55..], &[b'b'; 20][..]);
}

#[test]
fn existing_plain_file_is_single_file() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join("data.iso");
    fs::write(&root, vec![7u8; 4096]).unwrap();

    let store = ContentStore::open(&root, StoreConfig::default()).unwrap();
    assert_eq!(store.state(), LayoutState::SingleFile);
    assert_eq!(store.reserved_size().unwrap(), 4096);
    let mut buf = [0u8; 8];
    assert_eq!(store.read(&mut buf, 4092).unwrap(), 4);
}

#[test]
fn blob_length_on_disk_beats_first_line() {
    // header claims 40 but the blob on disk is 45 bytes long
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join(SENTINEL);
    let blob = format!("{SENTINEL} 40\na.txt 10\nbb 20\n").into_bytes();
    assert_eq!(blob.len(), 45);
    fs::write(&root, &blob).unwrap();

    let store = ContentStore::open(&root, StoreConfig::default()).unwrap();
    assert_eq!(store.manifest_size(), Some(45));
    assert_eq!(store.slices()[1].start(), 45);
    assert_eq!(store.slices()[2].start(), 55);
}

#[test]
fn blob_length_on_disk_beats_overstated_first_line() {
    // header claims 50 but the blob on disk is 45 bytes long
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join(SENTINEL);
    let blob = format!("{SENTINEL} 50\na.txt 10\nbb 20\n").into_bytes();
    assert_eq!(blob.len(), 45);
    fs::write(&root, &blob).unwrap();
    fs::write(td.path().join("a.txt"), [b'a'; 10]).unwrap();
    fs::write(td.path().join("bb"), [b'b'; 20]).unwrap();

    let store = ContentStore::open(&root, StoreConfig::default()).unwrap();
    assert_eq!(store.state(), LayoutState::ManifestComplete);
    assert_eq!(store.manifest_size(), Some(45));
    assert_eq!(store.slices().len(), 3);
    assert_eq!(store.slices()[0].end(), 44);
    assert_eq!(store.slices()[1].start(), 45);
    assert_eq!(store.slices()[2].start(), 55);

    let mut buf = [0u8; 4];
    assert_eq!(store.read(&mut buf, 53).unwrap(), 4);
    assert_eq!(&buf, b"aabb");
}

#[test]
fn truncated_manifest_on_disk_is_parsed_as_is() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join("swarm");
    let m = manifest_45();
    // cut inside "a.txt 10", leaving a line with no size field
    fs::write(&root, &m[..35]).unwrap();

    let err = ContentStore::open(&root, StoreConfig::default()).err().unwrap();
    assert!(matches!(err, StorageError::ManifestInvalid(_)), "{err}");
}

#[test]
fn failed_tail_after_manifest_leaves_layout_resolved() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join("swarm");
    let mut store = ContentStore::open(&root, StoreConfig::default()).unwrap();

    // manifest plus 31 data bytes: one more than the 30 the layout holds
    let mut buf = manifest_45();
    buf.extend_from_slice(&[7u8; 31]);
    let err = store.write(&buf, 0).unwrap_err();
    assert!(matches!(err, StorageError::InvalidArgument(_)), "{err}");

    assert_eq!(store.state(), LayoutState::ManifestComplete);
    assert_eq!(fs::read(&root).unwrap(), manifest_45());
    assert_eq!(fs::metadata(td.path().join("a.txt")).unwrap().len(), 0);

    // resending only the data completes the swarm
    assert_eq!(store.write(&buf[45..75], 45).unwrap(), 30);
    assert_eq!(fs::read(td.path().join("bb")).unwrap(), vec![7u8; 20]);
}

#[test]
fn traversal_in_manifest_fails_the_whole_layout() {
    let td = tempfile::tempdir().unwrap();
    let dl = td.path().join("dl");
    fs::create_dir(&dl).unwrap();
    let root = dl.join("swarm");
    let rec = RecordingDiagnostics::shared();
    let mut store =
        ContentStore::open_with(&root, StoreConfig::default(), Box::new(UnknownSize), rec.clone())
            .unwrap();

    let blob = raw_manifest("ok.txt 4\n../escape 10\n");
    let err = store.write(&blob, 0).unwrap_err();
    assert!(matches!(err, StorageError::ManifestInvalid(_)), "{err}");
    assert_eq!(store.state(), LayoutState::Invalid);
    // nothing from the manifest was materialised
    assert!(!dl.join("ok.txt").exists());
    assert!(!td.path().join("escape").exists());

    let err = store.write(b"x", blob.len() as u64).unwrap_err();
    assert!(matches!(err, StorageError::ManifestInvalid(_)));
    assert!(rec.events().iter().any(|e| matches!(e, StoreEvent::Failed { .. })));
}

#[test]
fn absolute_path_in_manifest_is_rejected() {
    let td = tempfile::tempdir().unwrap();
    let mut store = ContentStore::open(td.path().join("swarm"), StoreConfig::default()).unwrap();
    let err = store.write(&raw_manifest("/etc/passwd 10\n"), 0).unwrap_err();
    assert!(matches!(err, StorageError::ManifestInvalid(_)), "{err}");
}

#[test]
fn nested_entry_creates_directories() {
    let td = tempfile::tempdir().unwrap();
    let mut store = ContentStore::open(td.path().join("swarm"), StoreConfig::default()).unwrap();
    let blob = raw_manifest("a/b/c 10\n");
    store.write(&blob, 0).unwrap();
    assert_eq!(store.state(), LayoutState::ManifestComplete);
    assert!(td.path().join("a").join("b").is_dir());
    assert!(td.path().join("a").join("b").join("c").is_file());

    store.write(b"0123456789", blob.len() as u64).unwrap();
    assert_eq!(fs::read(td.path().join("a/b/c")).unwrap(), b"0123456789");
}

#[test]
fn blocked_directory_leaves_slice_inert() {
    let td = tempfile::tempdir().unwrap();
    // a regular file where a directory is needed
    fs::write(td.path().join("a"), b"in the way").unwrap();
    let rec = RecordingDiagnostics::shared();
    let mut store = ContentStore::open_with(
        td.path().join("swarm"),
        StoreConfig::default(),
        Box::new(UnknownSize),
        rec.clone(),
    )
    .unwrap();
    let blob = raw_manifest("a/b 5\nz 5\n");
    let m = blob.len() as u64;
    store.write(&blob, 0).unwrap();
    assert_eq!(store.state(), LayoutState::ManifestComplete);
    assert!(!store.slices()[1].is_open());
    assert!(store.slices()[2].is_open());

    let err = store.write(b"xxxxx", m).unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)), "{err}");
    assert_eq!(store.write(b"zzzzz", m + 5).unwrap(), 5);
    assert!(rec
        .events()
        .iter()
        .any(|e| matches!(e, StoreEvent::SliceUnavailable { path, .. } if path == "a/b")));
}

#[test]
fn entry_may_not_alias_the_manifest() {
    let td = tempfile::tempdir().unwrap();
    let mut store = ContentStore::open(td.path().join("swarm"), StoreConfig::default()).unwrap();
    let err = store.write(&raw_manifest("swarm 10\n"), 0).unwrap_err();
    assert!(matches!(err, StorageError::ManifestInvalid(_)), "{err}");
}

#[test]
fn layout_events_are_reported() {
    let td = tempfile::tempdir().unwrap();
    let rec: Arc<RecordingDiagnostics> = RecordingDiagnostics::shared();
    let mut store = ContentStore::open_with(
        td.path().join("swarm"),
        StoreConfig::default(),
        Box::new(UnknownSize),
        rec.clone(),
    )
    .unwrap();
    store.write(&manifest_45(), 0).unwrap();

    let events = rec.events();
    assert!(events.contains(&StoreEvent::ManifestHeader { declared_size: 45 }));
    assert!(events.contains(&StoreEvent::LayoutDetected { layout: LayoutState::ManifestComplete }));
    assert!(events.contains(&StoreEvent::SliceCreated {
        path: "bb".to_string(),
        start: 55,
        size: 20
    }));
}
