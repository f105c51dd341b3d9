use std::fs;

use kcfp::{canonicalize_or_current, sha256_file};
use tempfile::tempdir;

#[test]
fn canonicalize_or_current_returns_cwd_for_dot() {
    let cwd = std::env::current_dir().expect("cwd");
    assert_eq!(canonicalize_or_current(".").expect("canonicalize"), cwd);
}

#[test]
fn canonicalize_or_current_resolves_existing_path() {
    let tmp = tempdir().expect("tempdir");
    let image = tmp.path().join("vmlinux");
    fs::write(&image, b"kernel").expect("write image");

    let result = canonicalize_or_current(image.to_str().expect("utf-8 path")).expect("canonicalize");
    assert_eq!(result, image.canonicalize().expect("canonicalize image"));
}

#[test]
fn canonicalize_or_current_joins_missing_relative_path() {
    let cwd = std::env::current_dir().expect("cwd");
    let result = canonicalize_or_current("no-such-dir/vmlinux.instr").expect("canonicalize");
    assert_eq!(result, cwd.join("no-such-dir/vmlinux.instr"));
}

#[test]
fn sha256_of_known_contents() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("abc");
    fs::write(&path, b"abc").expect("write");
    assert_eq!(
        sha256_file(&path).expect("hash"),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn sha256_of_missing_file_is_an_error() {
    let tmp = tempdir().expect("tempdir");
    let err = sha256_file(&tmp.path().join("absent")).expect_err("missing file");
    assert!(err.to_string().contains("Failed to open image for hashing"));
}
