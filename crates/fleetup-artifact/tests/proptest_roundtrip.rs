// crates/fleetup-artifact/tests/proptest_roundtrip.rs
// ============================================================================
// Module: Artifact Round-Trip Property
// Description: parse ∘ serialize is identity on artifact metadata.
// Purpose: Pin the wire format against arbitrary metadata shapes.
// Dependencies: fleetup-artifact, proptest, tokio
// ============================================================================

use std::io::Cursor;

use proptest::prelude::*;
use time::OffsetDateTime;

use fleetup_artifact::ArtifactBuilder;
use fleetup_artifact::PayloadFile;
use fleetup_artifact::UpdateBuilder;
use fleetup_artifact::parse;

/// Name strategy: non-empty printable identifiers.
fn name_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9._-]{1,32}"
}

/// Device-type set strategy: one to four distinct types.
fn device_types_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("[a-z0-9-]{1,16}", 1 .. 4)
        .prop_map(|set| set.into_iter().collect())
}

/// File strategy: small payloads with second-precision dates.
fn file_strategy() -> impl Strategy<Value = (String, i64, Vec<u8>)> {
    (
        "[a-z0-9.]{1,24}",
        1_500_000_000i64 .. 1_900_000_000i64,
        prop::collection::vec(any::<u8>(), 0 .. 512),
    )
}

/// Update strategy: a type tag plus up to three files.
fn update_strategy() -> impl Strategy<Value = (String, Vec<(String, i64, Vec<u8>)>)> {
    ("[a-z-]{1,24}", prop::collection::vec(file_strategy(), 0 .. 3))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn metadata_survives_serialize_then_parse(
        name in name_strategy(),
        device_types in device_types_strategy(),
        updates in prop::collection::vec(update_strategy(), 0 .. 4),
        signed in any::<bool>(),
    ) {
        let mut builder = ArtifactBuilder::new(
            name.clone(),
            &device_types.iter().map(String::as_str).collect::<Vec<_>>(),
        );
        for (type_info, files) in &updates {
            builder = builder.update(UpdateBuilder {
                type_info: type_info.clone(),
                files: files
                    .iter()
                    .map(|(file_name, unix, bytes)| PayloadFile {
                        name: file_name.clone(),
                        date: OffsetDateTime::from_unix_timestamp(*unix)
                            .expect("in-range timestamp"),
                        bytes: bytes.clone(),
                    })
                    .collect(),
            });
        }
        if signed {
            builder = builder.signed_with(vec![0xCC; 64]);
        }

        let bytes = builder.into_bytes().expect("serialize");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        let meta = runtime.block_on(parse(Cursor::new(bytes))).expect("parse");

        prop_assert_eq!(meta.name, name);
        prop_assert_eq!(meta.device_types_compatible, device_types);
        prop_assert_eq!(meta.signed, signed);
        prop_assert_eq!(meta.updates.len(), updates.len());
        for (parsed, (type_info, files)) in meta.updates.iter().zip(updates.iter()) {
            prop_assert_eq!(&parsed.type_info, type_info);
            prop_assert_eq!(parsed.files.len(), files.len());
            for (parsed_file, (file_name, unix, bytes)) in
                parsed.files.iter().zip(files.iter())
            {
                prop_assert_eq!(&parsed_file.name, file_name);
                prop_assert_eq!(parsed_file.size, bytes.len() as u64);
                prop_assert_eq!(
                    parsed_file.date,
                    OffsetDateTime::from_unix_timestamp(*unix).expect("in-range timestamp")
                );
            }
        }
    }
}
