//! CAS transfer tests
//!
//! Chunked uploads and verified downloads against the in-memory byte-stream
//! server, including progress reporting and digest integrity.

use std::fs;
use std::sync::Arc;

use attestation_crafter::casclient::{
    progress_channel, CancelToken, CasClient, ClientConfig, InMemoryCas, ProgressRenderer,
};
use cas_protocol::{Digest, ResourceName, DEFAULT_CHUNK_SIZE};
use tempfile::TempDir;

const TEN_MIB: usize = 10 * 1024 * 1024;

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// =============================================================================
// Uploads
// =============================================================================

#[test]
fn test_ten_mib_upload_frames_and_progress() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("image.tar");
    let data = payload(TEN_MIB);
    fs::write(&path, &data).unwrap();

    let cas = InMemoryCas::new();
    // Room for every event so none are dropped.
    let (reporter, events) = progress_channel(64);
    let client = CasClient::new(Arc::new(cas.clone()), ClientConfig::default())
        .with_progress(reporter);

    let result = client.upload_path(&path).unwrap();
    drop(client);

    let expected = Digest::of_bytes(&data);
    assert_eq!(result.digest, expected.to_string());
    assert_eq!(result.size, TEN_MIB as u64);
    assert_eq!(result.committed_size, TEN_MIB as u64);

    let frames = cas.frames();
    assert_eq!(frames.len(), 11);
    let resource = ResourceName::new("image.tar", &expected.to_string())
        .unwrap()
        .encode()
        .unwrap();
    for (i, frame) in frames[..10].iter().enumerate() {
        assert_eq!(frame.resource_name, resource);
        assert_eq!(frame.write_offset, (i * DEFAULT_CHUNK_SIZE) as u64);
        assert_eq!(frame.data_len, DEFAULT_CHUNK_SIZE);
        assert!(!frame.finish_write);
    }
    assert_eq!(frames[10].data_len, 0);
    assert!(frames[10].finish_write);
    assert_eq!(frames[10].write_offset, TEN_MIB as u64);

    let processed: Vec<u64> = events.try_iter().map(|s| s.processed_bytes).collect();
    assert_eq!(processed.len(), 10);
    assert!(processed.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(processed.last().copied(), Some(TEN_MIB as u64));

    assert_eq!(cas.get(&expected.to_string()).unwrap(), data);
}

#[test]
fn test_progress_renderer_draws_upload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("blob.bin");
    fs::write(&path, payload(4096)).unwrap();

    let (reporter, events) = progress_channel(16);
    let cancel = CancelToken::new();
    let renderer = ProgressRenderer::spawn(events, Vec::new(), cancel.clone());

    let client = CasClient::new(Arc::new(InMemoryCas::new()), ClientConfig { chunk_size: 1024 })
        .with_progress(reporter);
    client.upload_path(&path).unwrap();
    drop(client);

    assert_eq!(renderer.join(), 4);
}

#[test]
fn test_existing_blob_short_circuits() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("blob.bin");
    let data = payload(8192);
    fs::write(&path, &data).unwrap();

    let cas = InMemoryCas::new();
    cas.insert("blob.bin", &data);

    let client = CasClient::new(Arc::new(cas.clone()), ClientConfig { chunk_size: 1024 });
    let result = client.upload_path(&path).unwrap();

    assert_eq!(result.committed_size, 8192);
    assert!(cas.frames().len() < 8);
}

// =============================================================================
// Downloads
// =============================================================================

#[test]
fn test_download_round_trip_verifies_digest() {
    let cas = InMemoryCas::new().with_read_chunk_size(1000);
    let data = payload(5000);
    let digest = cas.insert("report.sarif", &data);

    let client = CasClient::new(Arc::new(cas), ClientConfig::default());
    let mut out = Vec::new();
    let result = client.download_verified(&mut out, &digest).unwrap();

    assert_eq!(out, data);
    assert_eq!(result.digest, digest);
    assert_eq!(result.bytes, 5000);
}

#[test]
fn test_corrupted_download_is_rejected_and_not_kept() {
    let cas = InMemoryCas::new();
    let digest = cas.insert("report.sarif", &payload(2048));
    cas.set_corrupt_reads(true);

    let dir = TempDir::new().unwrap();
    let client = CasClient::new(Arc::new(cas), ClientConfig::default());
    let err = client.download_to_dir(dir.path(), &digest, None).unwrap_err();

    assert!(err.is_digest_mismatch());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_download_to_dir_uses_stored_filename() {
    let cas = InMemoryCas::new();
    let data = payload(300);
    let digest = cas.insert("junit.xml", &data);

    let dir = TempDir::new().unwrap();
    let client = CasClient::new(Arc::new(cas), ClientConfig::default());
    let path = client.download_to_dir(dir.path(), &digest, None).unwrap();

    assert_eq!(path, dir.path().join("junit.xml"));
    assert_eq!(fs::read(path).unwrap(), data);
}
