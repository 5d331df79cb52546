use crate::config::HashAlgorithm;
use crate::error::{Result, RyddeError};
use md5::{Digest, Md5};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const BUFFER_SIZE: usize = 8192;

/// Computes the content hash of a file with the configured algorithm
///
/// Uses streaming implementation for memory efficiency with large files.
/// Reads the file in 8KB chunks to minimize memory usage.
pub fn hash_file<P: AsRef<Path>>(path: P, algorithm: HashAlgorithm) -> Result<String> {
    match algorithm {
        HashAlgorithm::Md5 => hash_file_md5(path),
        HashAlgorithm::Blake3 => hash_file_blake3(path),
    }
}

fn hash_file_md5<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|_| RyddeError::FileNotFound(path.to_path_buf()))?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut hasher = Md5::new();
    let mut buffer = [0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    let result = hasher.finalize();
    Ok(format!("{:x}", result))
}

fn hash_file_blake3<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|_| RyddeError::FileNotFound(path.to_path_buf()))?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

/// Sentinel aggregate hash for empty folders: the algorithm's empty-input
/// digest. Fixed across runs, distinct per algorithm.
pub fn empty_digest(algorithm: HashAlgorithm) -> String {
    match algorithm {
        HashAlgorithm::Md5 => format!("{:x}", Md5::new().finalize()),
        HashAlgorithm::Blake3 => blake3::Hasher::new().finalize().to_hex().to_string(),
    }
}

/// Aggregate folder hash over `(relative_name, child_hash)` pairs.
///
/// The pairs are sorted before hashing, so the result depends only on the
/// multiset of children and not on directory listing order. Renames change
/// the hash; content moves between equally-named children do too.
pub fn aggregate_hash(children: &[(String, String)], algorithm: HashAlgorithm) -> String {
    if children.is_empty() {
        return empty_digest(algorithm);
    }

    let mut sorted: Vec<&(String, String)> = children.iter().collect();
    sorted.sort();

    match algorithm {
        HashAlgorithm::Md5 => {
            let mut hasher = Md5::new();
            for (name, hash) in sorted {
                hasher.update(name.as_bytes());
                hasher.update([0u8]);
                hasher.update(hash.as_bytes());
                hasher.update([b'\n']);
            }
            format!("{:x}", hasher.finalize())
        }
        HashAlgorithm::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            for (name, hash) in sorted {
                hasher.update(name.as_bytes());
                hasher.update(&[0u8]);
                hasher.update(hash.as_bytes());
                hasher.update(&[b'\n']);
            }
            hasher.finalize().to_hex().to_string()
        }
    }
}

/// Verifies that a file matches an expected hash
///
/// The algorithm is inferred from the hash length (32 hex chars for md5,
/// 64 for blake3).
pub fn verify_hash<P: AsRef<Path>>(path: P, expected_hash: &str) -> Result<()> {
    let path = path.as_ref();
    let actual_hash = if expected_hash.len() == 32 {
        hash_file_md5(path)?
    } else if expected_hash.len() == 64 {
        hash_file_blake3(path)?
    } else {
        return Err(RyddeError::Config(format!(
            "Invalid hash length: {}",
            expected_hash.len()
        )));
    };

    if actual_hash.eq_ignore_ascii_case(expected_hash) {
        Ok(())
    } else {
        Err(RyddeError::HashMismatch {
            expected: expected_hash.to_string(),
            actual: actual_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_hash_file_md5_known() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"hello world").unwrap();
        temp_file.flush().unwrap();

        let hash = hash_file(temp_file.path(), HashAlgorithm::Md5).unwrap();
        assert_eq!(hash, "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn test_hash_file_blake3_known() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"hello world").unwrap();
        temp_file.flush().unwrap();

        let hash = hash_file(temp_file.path(), HashAlgorithm::Blake3).unwrap();
        assert_eq!(
            hash,
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
    }

    #[test]
    fn test_empty_digest_is_stable() {
        assert_eq!(
            empty_digest(HashAlgorithm::Md5),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(empty_digest(HashAlgorithm::Md5), empty_digest(HashAlgorithm::Md5));
        assert_ne!(
            empty_digest(HashAlgorithm::Md5),
            empty_digest(HashAlgorithm::Blake3)
        );
    }

    #[test]
    fn test_aggregate_empty_folder_sentinel() {
        assert_eq!(
            aggregate_hash(&[], HashAlgorithm::Blake3),
            empty_digest(HashAlgorithm::Blake3)
        );
    }

    #[test]
    fn test_aggregate_sensitive_to_rename() {
        let a = aggregate_hash(
            &[("a.txt".to_string(), "h1".to_string())],
            HashAlgorithm::Blake3,
        );
        let b = aggregate_hash(
            &[("b.txt".to_string(), "h1".to_string())],
            HashAlgorithm::Blake3,
        );
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_hash_mismatch() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"hello world").unwrap();
        temp_file.flush().unwrap();

        verify_hash(temp_file.path(), "5eb63bbbe01eeed093cb22bb8f5acdc3").unwrap();

        let result = verify_hash(temp_file.path(), "00000000000000000000000000000000");
        assert!(matches!(result.unwrap_err(), RyddeError::HashMismatch { .. }));
    }

    proptest! {
        /// Permuting the children never changes the aggregate hash.
        #[test]
        fn prop_aggregate_order_independent(
            mut children in proptest::collection::vec(
                ("[a-z]{1,8}", "[0-9a-f]{8}"),
                0..12,
            ),
            seed in any::<u64>(),
        ) {
            let baseline = aggregate_hash(&children, HashAlgorithm::Blake3);

            // Cheap deterministic shuffle.
            let len = children.len();
            if len > 1 {
                for i in 0..len {
                    let j = ((seed as usize).wrapping_mul(31).wrapping_add(i * 7)) % len;
                    children.swap(i, j);
                }
            }

            prop_assert_eq!(aggregate_hash(&children, HashAlgorithm::Blake3), baseline);
        }
    }
}
