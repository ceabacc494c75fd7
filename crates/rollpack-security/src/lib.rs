mod checksum;
mod signature;

pub use checksum::{sha256_file_hex, verify_sha256_file};
pub use ed25519_dalek::VerifyingKey as CatalogKey;
pub use signature::{parse_public_key_hex, verify_catalog_signature};
