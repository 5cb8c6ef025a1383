use std::collections::BTreeSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use fasc_storage::{
    DigitalObject, ErrorKind, FileSystemStorage, Payload, Storage, StorageConfig,
};
use fasc_types::{md5_hex, PayloadType, Properties, RESERVED_METADATA_PID};
use proptest::prelude::*;
use walkdir::WalkDir;

const OID: &str = "e292378c5b38b0d5a4aba11fd40e7151";
const DC_XML: &[u8] = b"<dc><title>test</title></dc>";

fn open_store(home: &Path) -> FileSystemStorage {
    FileSystemStorage::with_root(home).unwrap()
}

fn files_under(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

// ---------------------------------------------------------------------------
// End-to-end scenario
// ---------------------------------------------------------------------------

#[test]
fn eprints_record_lifecycle() {
    assert_eq!(md5_hex("oai:eprints.usq.edu.au:318"), OID);
    let home = tempfile::tempdir().unwrap();
    let storage = open_store(home.path());

    let mut object = storage.create_object(OID).unwrap();
    let payload = object.create_stored_payload("oai_dc", DC_XML).unwrap();
    payload.set_label("Dublin Core Metadata");
    object.close().unwrap();

    let dir = home.path().join("e2/92/37").join(OID);
    assert!(dir.join("oai_dc").is_file());
    assert!(dir.join(RESERVED_METADATA_PID).is_file());
    assert_eq!(fs::read(dir.join("oai_dc")).unwrap(), DC_XML);

    let mut object = storage.get_object(OID).unwrap();
    assert_eq!(object.payload_id_list(), BTreeSet::from(["oai_dc".to_string()]));
    assert_eq!(object.get_payload("oai_dc").unwrap().label(), Some("Dublin Core Metadata"));

    object.remove_payload("oai_dc").unwrap();
    assert!(object.payload_id_list().is_empty());

    storage.remove_object(OID).unwrap();
    let err = storage.get_object(OID).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ---------------------------------------------------------------------------
// Store-level properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn object_path_is_deterministic(oid in "[0-9a-zA-Z_-]{7,40}") {
        let home = tempfile::tempdir().unwrap();
        let storage = open_store(home.path());
        let expected = home.path()
            .join(&oid[0..2])
            .join(&oid[2..4])
            .join(&oid[4..6])
            .join(&oid);
        prop_assert_eq!(storage.object_path(&oid).unwrap(), expected.clone());

        let object = storage.create_object(&oid).unwrap();
        prop_assert_eq!(object.path(), expected.as_path());
        prop_assert_eq!(storage.object_path(&oid).unwrap(), expected);
    }

    #[test]
    fn cold_scan_finds_every_object(oids in proptest::collection::btree_set("[0-9a-f]{8,32}", 0..12)) {
        let home = tempfile::tempdir().unwrap();
        {
            let storage = open_store(home.path());
            for oid in &oids {
                storage.create_object(oid).unwrap().close().unwrap();
            }
            prop_assert_eq!(&storage.object_id_list(), &oids);
        }
        let restarted = open_store(home.path());
        prop_assert_eq!(restarted.object_id_list(), oids);
    }
}

#[test]
fn create_close_get_round_trip() {
    let home = tempfile::tempdir().unwrap();
    let storage = open_store(home.path());

    let mut object = storage.create_object(OID).unwrap();
    object.create_stored_payload("oai_dc", DC_XML).unwrap();
    object.create_stored_payload("preview.html", &b"<html></html>"[..]).unwrap();
    let meta = object.metadata().unwrap();
    meta.set("render-pending", "true");
    meta.set("title", "Caf\u{e9} \u{2603}");
    let before: Properties = meta.clone();
    object.close().unwrap();

    let mut again = storage.get_object(OID).unwrap();
    assert_eq!(again.id(), OID);
    assert_eq!(again.payload_id_list(), object.payload_id_list());
    assert_eq!(again.source_id(), Some("oai_dc"));
    let after = again.metadata().unwrap();
    for (key, value) in before.iter() {
        assert_eq!(after.get(key), Some(value), "metadata key {key}");
    }
}

#[test]
fn duplicate_create_rejected() {
    let home = tempfile::tempdir().unwrap();
    let storage = open_store(home.path());
    storage.create_object(OID).unwrap().close().unwrap();

    let err = storage.create_object(OID).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    storage.remove_object(OID).unwrap();
    assert!(storage.create_object(OID).is_ok());
}

#[test]
fn payload_lifecycle() {
    let home = tempfile::tempdir().unwrap();
    let storage = open_store(home.path());
    let mut object = storage.create_object(OID).unwrap();
    object.create_stored_payload("other", &b"x"[..]).unwrap();

    let dc = object.create_stored_payload("DC", DC_XML).unwrap();
    dc.set_label("Dublin Core Metadata");
    assert_eq!(object.get_payload("DC").unwrap().label(), Some("Dublin Core Metadata"));

    let before = object.payload_id_list().len();
    object.remove_payload("DC").unwrap();
    let after = object.payload_id_list();
    assert!(!after.contains("DC"));
    assert_eq!(after.len(), before - 1);

    let err = object.remove_payload("DC").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn multi_payload_isolation() {
    let home = tempfile::tempdir().unwrap();
    let storage = open_store(home.path());
    let mut object = storage.create_object(OID).unwrap();
    object.create_stored_payload("sample.odt", &b"odt bytes"[..]).unwrap();
    object
        .create_stored_payload("images/diagram.png", &b"\x89PNG\r\n\x1a\npng bytes"[..])
        .unwrap();
    assert_eq!(object.payload_id_list().len(), 2);

    object.remove_payload("sample.odt").unwrap();
    let png = object.get_payload("images/diagram.png").unwrap();
    assert_eq!(png.read_to_vec().unwrap(), b"\x89PNG\r\n\x1a\npng bytes");
    assert_eq!(png.content_type(), Some("image/png"));
    assert_eq!(png.payload_type(), Some(PayloadType::Enrichment));
}

#[test]
fn nested_payload_survives_restart() {
    let home = tempfile::tempdir().unwrap();
    {
        let storage = open_store(home.path());
        let mut object = storage.create_object(OID).unwrap();
        object
            .create_stored_payload("images/2024/diagram.png", &b"\x89PNG\r\n\x1a\n"[..])
            .unwrap();
        object.close().unwrap();
    }

    let storage = open_store(home.path());
    let mut object = storage.get_object(OID).unwrap();
    assert!(object.has_payload("images/2024/diagram.png"));
    assert!(object.has_payload("images\\2024\\diagram.png"));
    let payload = object.get_payload("images/2024/diagram.png").unwrap();
    assert_eq!(payload.id(), "images/2024/diagram.png");
    assert_eq!(payload.payload_type(), Some(PayloadType::Source));
    assert_eq!(payload.read_to_vec().unwrap(), b"\x89PNG\r\n\x1a\n");
}

#[test]
fn full_removal_is_complete() {
    let home = tempfile::tempdir().unwrap();
    let storage = open_store(home.path());
    let mut object = storage.create_object(OID).unwrap();
    object.create_stored_payload("a", &b"1"[..]).unwrap();
    object.create_stored_payload("deep/er/b", &b"2"[..]).unwrap();
    object.metadata().unwrap().set("k", "v");
    object.close().unwrap();

    let dir = storage.object_path(OID).unwrap();
    storage.remove_object(OID).unwrap();
    assert!(!dir.exists());
    assert!(files_under(home.path()).is_empty());
    assert_eq!(storage.get_object(OID).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(storage.remove_object(OID).unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn short_oid_rejected_without_io() {
    let home = tempfile::tempdir().unwrap();
    let root = home.path().join("root");
    let storage = open_store(&root);
    for oid in ["abc", "abcdef", ""] {
        let err = storage.create_object(oid).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidIdentifier, "{oid:?}");
    }
    assert!(fs::read_dir(&root).unwrap().next().is_none());
}

#[test]
fn dot_oids_never_escape_the_root() {
    let home = tempfile::tempdir().unwrap();
    let root = home.path().join("a").join("b").join("store");
    let storage = open_store(&root);
    for oid in ["..abcde", "ab..cdef", "......."] {
        let err = storage.create_object(oid).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidIdentifier, "{oid:?}");
        assert_eq!(storage.remove_object(oid).unwrap_err().kind(), ErrorKind::InvalidIdentifier);
        assert!(storage.object_path(oid).is_err());
    }
    let outside: Vec<_> = fs::read_dir(home.path().join("a"))
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name())
        .collect();
    assert_eq!(outside, vec![std::ffi::OsString::from("b")]);
    assert_eq!(files_under(home.path()).len(), 0);
}

// ---------------------------------------------------------------------------
// Payload behaviour
// ---------------------------------------------------------------------------

#[test]
fn unsafe_pids_never_escape_the_object() {
    let home = tempfile::tempdir().unwrap();
    let storage = open_store(home.path());
    let mut object = storage.create_object(OID).unwrap();
    for pid in ["../escape", "/abs", "a/../../b", "x.meta", RESERVED_METADATA_PID] {
        let err = object.create_stored_payload(pid, &b"x"[..]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidIdentifier, "{pid}");
    }
    assert!(object.payload_id_list().is_empty());
    assert_eq!(files_under(home.path()).len(), 1);
}

#[test]
fn closing_payload_invalidates_open_streams() {
    let home = tempfile::tempdir().unwrap();
    let storage = open_store(home.path());
    let mut object = storage.create_object(OID).unwrap();
    let payload = object.create_stored_payload("DC", DC_XML).unwrap();

    let mut stream = payload.open().unwrap();
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).unwrap();
    assert_eq!(&head, b"<dc>");

    payload.close().unwrap();
    payload.close().unwrap();
    assert!(stream.is_closed());
    assert!(stream.read(&mut head).is_err());

    // A fresh stream still works after close.
    assert_eq!(payload.read_to_vec().unwrap(), DC_XML);
}

#[test]
fn linked_payload_follows_external_file() {
    let home = tempfile::tempdir().unwrap();
    let external = tempfile::tempdir().unwrap();
    let target = external.path().join("sample.txt");
    fs::write(&target, b"external bytes").unwrap();

    let storage = open_store(home.path());
    let mut object = storage.create_object(OID).unwrap();
    let payload = object.create_linked_payload("sample.txt", &target).unwrap();
    assert!(payload.is_linked());
    assert_eq!(payload.size(), Some(14));
    assert_eq!(payload.content_type(), Some("text/plain"));
    assert_eq!(payload.read_to_vec().unwrap(), b"external bytes");
    assert_eq!(
        fs::read_to_string(payload.data_file()).unwrap(),
        target.to_str().unwrap()
    );
    object.close().unwrap();

    fs::remove_file(&target).unwrap();
    let mut object = storage.get_object(OID).unwrap();
    let payload = object.get_payload("sample.txt").unwrap();
    assert!(payload.is_linked());
    assert_eq!(payload.open().unwrap_err().kind(), ErrorKind::NotFound);

    let payload = object.update_payload("sample.txt", &b"now stored"[..]).unwrap();
    assert!(!payload.is_linked());
    assert_eq!(payload.read_to_vec().unwrap(), b"now stored");
}

#[test]
fn descriptor_changes_persist_after_close() {
    let home = tempfile::tempdir().unwrap();
    let storage = open_store(home.path());
    let mut object = storage.create_object(OID).unwrap();
    object.create_stored_payload("oai_dc", DC_XML).unwrap();
    object.create_stored_payload("thumb.jpg", &b"\xff\xd8\xff\xe0"[..]).unwrap();
    {
        let thumb = object.get_payload("thumb.jpg").unwrap();
        thumb.set_type(PayloadType::Thumbnail);
        thumb.set_label("Thumbnail");
    }
    object.close().unwrap();

    let mut object = storage.get_object(OID).unwrap();
    let thumb = object.get_payload("thumb.jpg").unwrap();
    assert_eq!(thumb.payload_type(), Some(PayloadType::Thumbnail));
    assert_eq!(thumb.label(), Some("Thumbnail"));
    assert_eq!(thumb.content_type(), Some("image/jpeg"));
}

#[test]
fn store_built_from_config_uses_namespace() {
    let home = tempfile::tempdir().unwrap();
    let config = StorageConfig::new(home.path(), "fascinator@usq.edu.au");
    let storage = FileSystemStorage::new(&config).unwrap();
    storage.create_object(OID).unwrap();
    assert!(home
        .path()
        .join("df0cfea9cc1c43f40d6d5c669bcbd1db/e2/92/37")
        .join(OID)
        .is_dir());
}
