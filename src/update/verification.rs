//! SHA-256 verification of downloaded update payloads.

use crate::core::ServiceError;
use anyhow::Result;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Computes and checks payload digests.
pub struct ChecksumVerifier;

impl ChecksumVerifier {
    /// Digest of `payload` in `sha256:<hex>` form.
    pub fn compute_sha256(payload: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(payload);
        let result = hasher.finalize();

        format!("sha256:{result:x}")
    }

    /// Check `payload` against `expected`.
    ///
    /// `expected` may carry the `sha256:` prefix or be bare hex, in any case.
    pub fn verify(payload: &[u8], expected: &str) -> Result<()> {
        let actual = Self::compute_sha256(payload);
        let expected_hex = expected.trim();
        let expected_hex = expected_hex.strip_prefix("sha256:").unwrap_or(expected_hex);
        debug!(target: "update", "Verifying payload checksum against {expected_hex}");

        if !actual.trim_start_matches("sha256:").eq_ignore_ascii_case(expected_hex) {
            return Err(ServiceError::ChecksumMismatch {
                expected: expected.to_string(),
                actual,
            }
            .into());
        }

        info!(target: "update", "Checksum verification successful");
        Ok(())
    }
}
