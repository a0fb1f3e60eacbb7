//! Unit tests for archive extraction.

use super::*;
use crate::test_utils::{build_tgz_archive, build_zip_archive, server_archive_entries};
use rstest::{fixture, rstest};

const STEM: &str = "mongodb-linux-x86_64-4.2.0";

#[fixture]
fn scratch() -> tempfile::TempDir {
    tempfile::tempdir().expect("temp dir")
}

fn linux_entry() -> EntryPoint {
    EntryPoint::server(OperatingSystem::Linux)
}

#[rstest]
fn extracts_tgz_and_marks_executable(scratch: tempfile::TempDir) {
    let archive = scratch.path().join("server.tgz");
    build_tgz_archive(&archive, &server_archive_entries(STEM, "mongod", b"binary"))
        .expect("build archive");
    let dest = scratch.path().join("out");

    let files = DefaultExtractor
        .extract(&archive, &dest, &linux_entry())
        .expect("extract");

    assert_eq!(files.root(), dest.as_path());
    assert_eq!(files.executable(), dest.join(STEM).join("bin").join("mongod"));
    assert_eq!(files.auxiliary().len(), 2);
    assert!(dest.join(COMPLETION_MARKER).is_file());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(files.executable()).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o111, 0o111, "executable bits not set: {mode:o}");
    }
}

#[rstest]
fn extracts_zip_archives(scratch: tempfile::TempDir) {
    let archive = scratch.path().join("server.zip");
    let stem = "mongodb-windows-x86_64-4.2.0";
    build_zip_archive(&archive, &server_archive_entries(stem, "mongod.exe", b"binary"))
        .expect("build archive");
    let dest = scratch.path().join("out");

    let files = DefaultExtractor
        .extract(&archive, &dest, &EntryPoint::server(OperatingSystem::Windows))
        .expect("extract");

    assert!(files.executable().ends_with("bin/mongod.exe"));
    assert_eq!(fs::read(files.executable()).expect("read"), b"binary");
}

#[rstest]
fn detects_format_from_magic_bytes(scratch: tempfile::TempDir) {
    let archive = scratch.path().join("download.partial");
    build_tgz_archive(&archive, &server_archive_entries(STEM, "mongod", b"binary"))
        .expect("build archive");

    let files = DefaultExtractor
        .extract(&archive, &scratch.path().join("out"), &linux_entry())
        .expect("extract");
    assert!(files.executable().is_file());
}

#[rstest]
fn missing_entry_point_fails_after_full_unpack(scratch: tempfile::TempDir) {
    let archive = scratch.path().join("server.tgz");
    let entries = vec![(format!("{STEM}/bin/mongos"), b"router".to_vec())];
    build_tgz_archive(&archive, &entries).expect("build archive");
    let dest = scratch.path().join("out");

    let err = DefaultExtractor
        .extract(&archive, &dest, &linux_entry())
        .expect_err("no entry point");

    assert!(
        matches!(err, ExtractionError::EntryPointNotFound { ref expected } if expected == "mongod")
    );
    assert!(dest.join(STEM).join("bin").join("mongos").is_file());
    assert!(!dest.join(COMPLETION_MARKER).exists());
}

#[rstest]
fn executable_outside_bin_is_not_an_entry_point(scratch: tempfile::TempDir) {
    let archive = scratch.path().join("server.tgz");
    let entries = vec![(format!("{STEM}/mongod"), b"binary".to_vec())];
    build_tgz_archive(&archive, &entries).expect("build archive");

    let result = DefaultExtractor.extract(&archive, &scratch.path().join("out"), &linux_entry());
    assert!(matches!(result, Err(ExtractionError::EntryPointNotFound { .. })));
}

#[rstest]
fn reextraction_is_a_no_op_when_marker_present(scratch: tempfile::TempDir) {
    let archive = scratch.path().join("server.tgz");
    build_tgz_archive(&archive, &server_archive_entries(STEM, "mongod", b"binary"))
        .expect("build archive");
    let dest = scratch.path().join("out");
    let first = DefaultExtractor
        .extract(&archive, &dest, &linux_entry())
        .expect("first extract");

    // The archive is gone; a second extraction must rely on the marker alone.
    fs::remove_file(&archive).expect("remove archive");
    let second = DefaultExtractor
        .extract(&archive, &dest, &linux_entry())
        .expect("second extract");

    assert_eq!(first, second);
}

#[rstest]
fn empty_archive_is_rejected(scratch: tempfile::TempDir) {
    let archive = scratch.path().join("empty.tgz");
    build_tgz_archive(&archive, &[]).expect("build archive");

    let result = DefaultExtractor.extract(&archive, &scratch.path().join("out"), &linux_entry());
    assert!(matches!(result, Err(ExtractionError::EmptyArchive)));
}

#[rstest]
fn unknown_format_is_rejected(scratch: tempfile::TempDir) {
    let archive = scratch.path().join("download.bin");
    fs::write(&archive, b"not an archive").expect("write");

    let result = DefaultExtractor.extract(&archive, &scratch.path().join("out"), &linux_entry());
    assert!(matches!(result, Err(ExtractionError::UnsupportedFormat { .. })));
}

#[rstest]
#[case::parent_dir("../escape.txt")]
#[case::nested_parent("foo/../../escape.txt")]
#[case::absolute("/etc/passwd")]
fn rejects_path_traversal(#[case] bad_path: &str) {
    let result = validate_entry_path(Path::new(bad_path));
    assert!(
        matches!(result, Err(ExtractionError::PathTraversal { .. })),
        "expected PathTraversal for {bad_path}"
    );
}

#[test]
fn accepts_normal_paths() {
    assert!(validate_entry_path(Path::new("mongodb/bin/mongod")).is_ok());
}

#[rstest]
#[case::bin("pkg/bin/mongod", true)]
#[case::nested_bin("a/b/bin/mongod", true)]
#[case::top_level("mongod", false)]
#[case::wrong_dir("pkg/lib/mongod", false)]
#[case::wrong_name("pkg/bin/mongos", false)]
fn entry_point_matching(#[case] path: &str, #[case] expected: bool) {
    assert_eq!(linux_entry().matches(Path::new(path)), expected);
}

#[rstest]
fn load_completed_without_marker_is_none(scratch: tempfile::TempDir) {
    assert!(
        ExtractedFileSet::load_completed(scratch.path())
            .expect("load")
            .is_none()
    );
}
