use bytes::Bytes;
use object_store::memory::InMemory;
use splitstore_core::ContentHash;
use splitstore_core::config::RetryConfig;
use splitstore_storage::GcsBackend;
use std::sync::Arc;

/// SHA-256 of data as lowercase hex.
#[allow(dead_code)]
pub fn sha256_hex(data: &[u8]) -> String {
    ContentHash::compute(data).to_hex()
}

/// Deterministic pseudo-random bytes; the same seed yields the same output.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let bytes = state.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }

    Bytes::from(data)
}

/// GCS backend over an in-process object store.
#[allow(dead_code)]
pub fn gcs_in_memory() -> GcsBackend {
    GcsBackend::with_store(
        Arc::new(InMemory::new()),
        "contract-tests",
        Some("contract".to_string()),
        RetryConfig::no_retry(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_bytes_deterministic() {
        assert_eq!(seeded_bytes(42, 1000), seeded_bytes(42, 1000));
        assert_ne!(seeded_bytes(42, 1000), seeded_bytes(43, 1000));
    }
}
