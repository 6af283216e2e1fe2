use std::fs;
use std::path::{Path, PathBuf};

use swarmstore_core::path_safety::{
    check_manifest_path, resolve_entry, to_host_relative, to_manifest_path, PathPolicy,
};

#[cfg(target_family = "unix")]
fn symlink_dir<P: AsRef<Path>, Q: AsRef<Path>>(src: P, dst: Q) -> std::io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[test]
fn manifest_paths_checked() {
    assert!(check_manifest_path("a/b/c").is_ok());
    assert!(check_manifest_path("with space/file name.txt").is_ok());
    assert!(check_manifest_path("/etc/passwd").is_err());
    assert!(check_manifest_path("../x").is_err());
    assert!(check_manifest_path("a/..").is_err());
    assert!(check_manifest_path("").is_err());
    assert!(check_manifest_path("./").is_err());
    assert!(check_manifest_path("nul\0byte").is_err());
}

#[test]
fn host_translation_round_trips() {
    let host = to_host_relative("a/b/c.txt");
    assert_eq!(host, PathBuf::from("a").join("b").join("c.txt"));
    assert_eq!(to_manifest_path(&host).as_deref(), Some("a/b/c.txt"));
    assert_eq!(to_host_relative("a//b/./c"), PathBuf::from("a").join("b").join("c"));
    assert_eq!(to_manifest_path(Path::new("../x")), None);
}

#[test]
fn resolve_stays_under_base() {
    let tmp = tempfile::tempdir().unwrap();
    let p = resolve_entry(tmp.path(), "x/y.bin", PathPolicy::default()).unwrap();
    assert_eq!(p, tmp.path().join("x").join("y.bin"));
    // base does not exist yet: nothing to follow
    let missing = tmp.path().join("later");
    let p = resolve_entry(&missing, "f", PathPolicy { follow_symlinks: true }).unwrap();
    assert_eq!(p, missing.join("f"));
}

#[cfg(target_family = "unix")]
#[test]
fn symlink_rejected_by_default_allowed_when_contained() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    fs::create_dir_all(root.join("target")).unwrap();
    symlink_dir(root.join("target"), root.join("safe")).unwrap();

    let err = resolve_entry(&root, "safe/file.txt", PathPolicy::default())
        .expect_err("expected error");
    assert!(err.to_string().contains("symlink"), "unexpected error: {err}");

    let policy = PathPolicy { follow_symlinks: true };
    let p = resolve_entry(&root, "safe/file.txt", policy).unwrap();
    assert_eq!(p, root.join("safe").join("file.txt"));
}

#[cfg(target_family = "unix")]
#[test]
fn symlink_escape_blocked_even_when_following() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    fs::create_dir_all(&root).unwrap();
    // root/evil -> parent of root
    symlink_dir(tmp.path(), root.join("evil")).unwrap();

    let policy = PathPolicy { follow_symlinks: true };
    let err = resolve_entry(&root, "evil/outside.txt", policy).expect_err("expected escape error");
    assert!(err.to_string().contains("escapes root"), "{err}");
}
