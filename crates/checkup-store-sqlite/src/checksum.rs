//! Artifact checksums: lowercase hex SHA-256 over the exact stored bytes.

use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String { hex::encode(Sha256::digest(bytes)) }

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn known_digest() {
    assert_eq!(
      sha256_hex(b"abc"),
      "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
  }

  #[test]
  fn single_byte_change_is_detected() {
    assert_ne!(sha256_hex(b"{\"a\":1}"), sha256_hex(b"{\"a\":2}"));
  }
}
