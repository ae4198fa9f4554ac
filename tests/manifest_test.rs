// tests/manifest_test.rs

//! End-to-end transit manifest scenarios

use solbuild::{Error, TransitManifest};
use std::fs;

const GOOD_HEADER: &str = r#"
[manifest]
version = "1.0"
target = "unstable"

[[file]]
path = "nano-7.2-5-1-x86_64.eopkg"
sha256 = "6b86b273ff34fce19d6b804eff5a3f5747ada4eaa22f1d49c01e52ddb7875b4b"
"#;

#[test]
fn test_decode_valid_manifest() {
    let manifest = TransitManifest::decode(GOOD_HEADER).unwrap();
    assert_eq!(manifest.manifest.target, "unstable");
    assert_eq!(manifest.file.len(), 1);
}

#[test]
fn test_version_two_is_rejected() {
    let tampered = GOOD_HEADER.replace("\"1.0\"", "\"2.0\"");
    match TransitManifest::decode(&tampered) {
        Err(Error::ManifestInvalid { reason }) => assert_eq!(reason, "version"),
        other => panic!("expected ManifestInvalid{{version}}, got {other:?}"),
    }
}

#[test]
fn test_checksum_mismatch_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let pkg = dir.path().join("nano-7.2-5-1-x86_64.eopkg");
    fs::write(&pkg, b"eopkg payload bytes").unwrap();

    let mut manifest = TransitManifest::new("unstable");
    manifest.add_file(&pkg).unwrap();
    let tram = dir.path().join("nano-7.2-5.tram");
    manifest.write(&tram).unwrap();

    // Valid header, correct digest: loads fine
    TransitManifest::from_file(&tram).unwrap();

    // Same header, different payload: must fail with the mismatch error
    fs::write(&pkg, b"different payload").unwrap();
    match TransitManifest::from_file(&tram) {
        Err(Error::ManifestChecksumMismatch {
            path,
            expected,
            actual,
        }) => {
            assert_eq!(path, "nano-7.2-5-1-x86_64.eopkg");
            assert_ne!(expected, actual);
        }
        other => panic!("expected ManifestChecksumMismatch, got {other:?}"),
    }
}

#[test]
fn test_round_trip_preserves_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let pkg = dir.path().join("pkg-1.0-1-1-x86_64.eopkg");
    fs::write(&pkg, b"payload").unwrap();

    let mut manifest = TransitManifest::new("shannon");
    manifest.add_file(&pkg).unwrap();

    let encoded = manifest.encode().unwrap();
    let decoded = TransitManifest::decode(&encoded).unwrap();
    assert_eq!(decoded, manifest);
}
