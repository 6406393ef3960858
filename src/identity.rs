//! Content hashing and deterministic point identity.
//!
//! A document's identity (`doc_id`) is the SHA-256 of its bytes, so renaming
//! or re-uploading the same file resolves to the same id. Point ids are
//! UUIDv5 digests of `(book_name, page_number, text)`: re-embedding the same
//! chunk can only ever overwrite the existing point, never duplicate it.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use uuid::Uuid;

const HASH_BLOCK_SIZE: usize = 4096;

/// Compute the stable `doc_id` for a source file by hashing its full byte
/// stream in fixed-size blocks.
pub fn doc_id(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut block = [0u8; HASH_BLOCK_SIZE];

    loop {
        let read = file.read(&mut block)?;
        if read == 0 {
            break;
        }
        hasher.update(&block[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the deterministic point id for a chunk.
///
/// Same `(book_name, page_number, text)` always yields the same id.
pub fn point_id(book_name: &str, page_number: u32, text: &str) -> String {
    let unique_content = format!("{book_name}_{page_number}_{text}");
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, unique_content.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn doc_id_ignores_file_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = dir.path().join("original.pdf");
        let second = dir.path().join("renamed copy.pdf");
        for path in [&first, &second] {
            let mut file = File::create(path).expect("create");
            file.write_all(b"identical bytes").expect("write");
        }

        assert_eq!(
            doc_id(&first).expect("hash"),
            doc_id(&second).expect("hash")
        );
    }

    #[test]
    fn doc_id_detects_content_change() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = dir.path().join("a.pdf");
        let second = dir.path().join("b.pdf");
        std::fs::write(&first, b"one").expect("write");
        std::fs::write(&second, b"two").expect("write");

        assert_ne!(
            doc_id(&first).expect("hash"),
            doc_id(&second).expect("hash")
        );
    }

    #[test]
    fn point_id_is_a_pure_function() {
        let a = point_id("Gray's Anatomy", 12, "The femur is the longest bone.");
        let b = point_id("Gray's Anatomy", 12, "The femur is the longest bone.");
        assert_eq!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn point_id_varies_with_each_component() {
        let base = point_id("book", 1, "text");
        assert_ne!(base, point_id("other", 1, "text"));
        assert_ne!(base, point_id("book", 2, "text"));
        assert_ne!(base, point_id("book", 1, "other"));
    }
}
