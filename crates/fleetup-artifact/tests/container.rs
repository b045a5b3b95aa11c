// crates/fleetup-artifact/tests/container.rs
// ============================================================================
// Module: Artifact Container Tests
// Description: Parser structure, bounds, and signed-flag coverage.
// Purpose: Pin single-pass parsing behaviour over well- and ill-formed input.
// Dependencies: fleetup-artifact, tokio
// ============================================================================

use std::io::Cursor;

use time::OffsetDateTime;

use fleetup_artifact::ArtifactBuilder;
use fleetup_artifact::FORMAT_NAME;
use fleetup_artifact::FORMAT_VERSION;
use fleetup_artifact::ParseError;
use fleetup_artifact::PayloadFile;
use fleetup_artifact::UpdateBuilder;
use fleetup_artifact::parse;

fn date(unix: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(unix).expect("timestamp")
}

fn rootfs_artifact() -> ArtifactBuilder {
    ArtifactBuilder::new("release-1", &["qemu", "rpi3"]).update(UpdateBuilder {
        type_info: "rootfs-image".to_string(),
        files: vec![PayloadFile {
            name: "rootfs.ext4".to_string(),
            date: date(1_700_000_000),
            bytes: vec![0xAB; 4096],
        }],
    })
}

#[tokio::test]
async fn parses_unsigned_artifact() {
    let bytes = rootfs_artifact().into_bytes().expect("serialize");
    let meta = parse(Cursor::new(bytes)).await.expect("parse");
    assert_eq!(meta.name, "release-1");
    assert_eq!(meta.device_types_compatible, vec!["qemu", "rpi3"]);
    assert_eq!(meta.info.format, FORMAT_NAME);
    assert_eq!(meta.info.version, FORMAT_VERSION);
    assert!(!meta.signed);
    assert_eq!(meta.updates.len(), 1);
    assert_eq!(meta.updates[0].type_info, "rootfs-image");
    assert_eq!(meta.updates[0].files.len(), 1);
    let file = &meta.updates[0].files[0];
    assert_eq!(file.name, "rootfs.ext4");
    assert_eq!(file.size, 4096);
    assert_eq!(file.date, date(1_700_000_000));
}

#[tokio::test]
async fn signature_block_sets_signed_flag_only() {
    let bytes = rootfs_artifact()
        .signed_with(vec![0x5A; 256])
        .into_bytes()
        .expect("serialize");
    let meta = parse(Cursor::new(bytes)).await.expect("parse");
    assert!(meta.signed);
}

#[tokio::test]
async fn rejects_bad_magic() {
    let mut bytes = rootfs_artifact().into_bytes().expect("serialize");
    bytes[0] = b'X';
    let err = parse(Cursor::new(bytes)).await.expect_err("bad magic");
    assert!(matches!(err, ParseError::Malformed(_)));
}

#[tokio::test]
async fn rejects_unknown_version() {
    let mut bytes = rootfs_artifact().into_bytes().expect("serialize");
    bytes[4 .. 8].copy_from_slice(&99u32.to_le_bytes());
    let err = parse(Cursor::new(bytes)).await.expect_err("future version");
    assert!(matches!(err, ParseError::UnsupportedVersion(99)));
}

#[tokio::test]
async fn rejects_truncated_payload() {
    let mut bytes = rootfs_artifact().into_bytes().expect("serialize");
    bytes.truncate(bytes.len() - 1024);
    let err = parse(Cursor::new(bytes)).await.expect_err("truncated");
    assert!(matches!(err, ParseError::Malformed(_)));
}

#[tokio::test]
async fn rejects_corrupted_payload_checksum() {
    let mut bytes = rootfs_artifact().into_bytes().expect("serialize");
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    let err = parse(Cursor::new(bytes)).await.expect_err("checksum mismatch");
    match err {
        ParseError::Malformed(message) => assert!(message.contains("checksum")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn rejects_empty_device_type_set() {
    let builder = ArtifactBuilder::new("release-1", &[]);
    let bytes = builder.into_bytes().expect("serialize");
    let err = parse(Cursor::new(bytes)).await.expect_err("no device types");
    assert!(matches!(err, ParseError::Malformed(_)));
}

#[tokio::test]
async fn accepts_meta_only_update_without_files() {
    let builder = ArtifactBuilder::new("release-1", &["qemu"]).update(UpdateBuilder {
        type_info: "bootloader-config".to_string(),
        files: Vec::new(),
    });
    let bytes = builder.into_bytes().expect("serialize");
    let meta = parse(Cursor::new(bytes)).await.expect("parse");
    assert_eq!(meta.updates.len(), 1);
    assert!(meta.updates[0].files.is_empty());
}

#[tokio::test]
async fn rejects_trailing_garbage_tag() {
    let mut bytes = rootfs_artifact().into_bytes().expect("serialize");
    bytes.push(0x7F);
    bytes.extend_from_slice(&0u64.to_le_bytes());
    let err = parse(Cursor::new(bytes)).await.expect_err("unknown tag");
    assert!(matches!(err, ParseError::Malformed(_)));
}
