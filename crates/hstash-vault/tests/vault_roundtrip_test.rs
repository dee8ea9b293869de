//! Upload/download through the full vault pipeline: checksum, seal, store,
//! fetch, open, re-verify.

mod common;

use common::{documents, harness, pw, OLD_PASSWORD};
use hstash_core::error::FILE_UNAVAILABLE;
use hstash_core::{HstashError, KeyMode};
use hstash_crypto::checksum;
use hstash_storage::ObjectStore;

#[tokio::test]
async fn roundtrip_every_document_both_modes() {
    for mode in [KeyMode::Envelope, KeyMode::Direct] {
        let h = harness(mode);
        h.vault.enroll("alice", &pw(OLD_PASSWORD)).await.unwrap();

        for (name, contents) in documents() {
            let record = h
                .vault
                .upload("alice", &pw(OLD_PASSWORD), &name, &contents)
                .await
                .unwrap();

            assert_eq!(record.checksum, checksum(&contents));
            assert_eq!(record.plaintext_len, contents.len() as u64);
            assert_eq!(record.key_mode(), mode);

            let stored = h.objects.get(&record.object_name).await.unwrap();
            assert!(stored.len() >= contents.len());
            assert!(
                !stored.windows(14).any(|w| w == b"patient record"),
                "plaintext must not reach the object store"
            );

            let back = h
                .vault
                .download("alice", &pw(OLD_PASSWORD), &record.object_name)
                .await
                .unwrap();
            assert_eq!(back, contents);
        }
    }
}

#[tokio::test]
async fn empty_file_roundtrip() {
    let h = harness(KeyMode::Envelope);
    h.vault.enroll("alice", &pw(OLD_PASSWORD)).await.unwrap();

    let record = h
        .vault
        .upload("alice", &pw(OLD_PASSWORD), "empty.txt", b"")
        .await
        .unwrap();
    let back = h
        .vault
        .download("alice", &pw(OLD_PASSWORD), &record.object_name)
        .await
        .unwrap();
    assert!(back.is_empty());
}

#[tokio::test]
async fn same_file_twice_stores_different_ciphertexts() {
    let h = harness(KeyMode::Direct);
    h.vault.enroll("alice", &pw(OLD_PASSWORD)).await.unwrap();

    let a = h
        .vault
        .upload("alice", &pw(OLD_PASSWORD), "x.txt", b"identical")
        .await
        .unwrap();
    let b = h
        .vault
        .upload("alice", &pw(OLD_PASSWORD), "x.txt", b"identical")
        .await
        .unwrap();

    assert_ne!(a.object_name, b.object_name);
    assert_eq!(a.checksum, b.checksum);
    assert_ne!(
        h.objects.get(&a.object_name).await.unwrap(),
        h.objects.get(&b.object_name).await.unwrap()
    );
}

#[tokio::test]
async fn flipped_byte_fails_authentication() {
    for mode in [KeyMode::Envelope, KeyMode::Direct] {
        let h = harness(mode);
        h.vault.enroll("alice", &pw(OLD_PASSWORD)).await.unwrap();
        let record = h
            .vault
            .upload("alice", &pw(OLD_PASSWORD), "mri.dcm", b"DICM imaging payload")
            .await
            .unwrap();

        let mut blob = h.objects.get(&record.object_name).await.unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        h.objects.put(&record.object_name, blob).await.unwrap();

        let err = h
            .vault
            .download("alice", &pw(OLD_PASSWORD), &record.object_name)
            .await
            .unwrap_err();
        assert!(matches!(err, HstashError::AuthenticationFailure));
        assert_eq!(err.user_message(), FILE_UNAVAILABLE);
        assert!(!err.is_retryable());
    }
}

#[tokio::test]
async fn wrong_password_never_yields_plaintext() {
    let h = harness(KeyMode::Envelope);
    h.vault.enroll("alice", &pw(OLD_PASSWORD)).await.unwrap();
    let record = h
        .vault
        .upload("alice", &pw(OLD_PASSWORD), "note.txt", b"allergies: penicillin")
        .await
        .unwrap();

    for guess in ["abc12345!", "Abc12345", "Abc12345!!", ""] {
        let result = h
            .vault
            .download("alice", &pw(guess), &record.object_name)
            .await;
        assert!(matches!(result, Err(HstashError::AuthenticationFailure)));
    }
}

#[tokio::test]
async fn storage_outage_is_retryable_and_hidden() {
    let h = harness(KeyMode::Envelope);
    h.vault.enroll("alice", &pw(OLD_PASSWORD)).await.unwrap();
    h.objects.fail_after(0);

    let err = h
        .vault
        .upload("alice", &pw(OLD_PASSWORD), "a.txt", b"data")
        .await
        .unwrap_err();
    assert!(matches!(err, HstashError::StorageUnavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(err.user_message(), FILE_UNAVAILABLE);
    assert!(h.vault.list("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn filesystem_backend_holds_only_ciphertext() {
    use hstash_core::config::{StorageBackend, StorageConfig};
    use hstash_storage::{build_operator, OpendalStore};
    use hstash_vault::{MemoryKeyStore, MemoryRecordStore, Vault};
    use std::sync::Arc;

    let dir = tempfile::tempdir().unwrap();
    let cfg = StorageConfig {
        backend: StorageBackend::Fs,
        root: dir.path().to_path_buf(),
        ..Default::default()
    };
    let op = build_operator(&cfg, None).unwrap();
    let vault = Vault::new(
        Arc::new(OpendalStore::new(op)),
        Arc::new(MemoryKeyStore::new()),
        Arc::new(MemoryRecordStore::new()),
        common::settings(KeyMode::Envelope),
    );
    vault.enroll("alice", &pw(OLD_PASSWORD)).await.unwrap();

    let record = vault
        .upload("alice", &pw(OLD_PASSWORD), "ecg.csv", b"t,mv\n0,0.12\n1,0.98\n")
        .await
        .unwrap();

    let on_disk = std::fs::read(dir.path().join(&record.object_name)).unwrap();
    assert!(!on_disk.windows(4).any(|w| w == b"t,mv"));
    assert_eq!(
        vault
            .download("alice", &pw(OLD_PASSWORD), &record.object_name)
            .await
            .unwrap(),
        b"t,mv\n0,0.12\n1,0.98\n"
    );
}
