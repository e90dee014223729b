//! SHA256 digest utilities for stored image archives

use sha2::{Digest, Sha256};
use std::io::{self, Read, Write};

/// Utilities for working with SHA256 digests
pub struct DigestUtils;

impl DigestUtils {
    /// Validate SHA256 hex string (64 characters, all hex)
    pub fn is_valid_sha256_hex(digest: &str) -> bool {
        digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())
    }

    /// Validate full digest format (sha256:xxxxx)
    pub fn is_valid_docker_digest(digest: &str) -> bool {
        digest
            .strip_prefix("sha256:")
            .is_some_and(Self::is_valid_sha256_hex)
    }

    /// Copy `reader` into `writer`, returning the byte count and the full digest
    pub fn copy_with_digest<R: Read, W: Write>(reader: &mut R, writer: &mut W) -> io::Result<(u64, String)> {
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 64 * 1024];
        let mut total = 0u64;

        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            writer.write_all(&buffer[..n])?;
            total += n as u64;
        }

        Ok((total, format!("sha256:{}", hex::encode(hasher.finalize()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_digest() {
        let (n, digest) = DigestUtils::copy_with_digest(&mut io::empty(), &mut io::sink()).unwrap();
        assert_eq!(n, 0);
        assert_eq!(
            digest,
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_copy_with_digest_matches_direct_digest() {
        let data = vec![7u8; 200 * 1024];
        let mut out = Vec::new();
        let (n, digest) = DigestUtils::copy_with_digest(&mut data.as_slice(), &mut out).unwrap();
        assert_eq!(n, data.len() as u64);
        assert_eq!(out, data);
        assert_eq!(digest, format!("sha256:{}", hex::encode(Sha256::digest(&data))));
        assert!(DigestUtils::is_valid_docker_digest(&digest));
        assert!(!DigestUtils::is_valid_docker_digest("sha256:xyz"));
    }
}
