//! Content digest and signature attachment.
//!
//! Signing itself belongs to an external collaborator behind [`Signer`].
//! The store only provides a deterministic digest of its references:
//!
//! ```text
//! for each reference path, sorted:
//!     [path bytes][0x00][blake3(rows): 32 bytes]
//! ```
//!
//! Each row enters the hash as `[len: u64 LE][bytes]`.

use crate::container::AttrValue;
use crate::error::{Result, StoreError};
use crate::store::header::Header;
use crate::store::{RecordStore, USERDATA};

pub const SIGNATURE_ATTR: &str = "signature";

pub trait Signer: Send + Sync {
    fn sign(&self, digest: &[u8]) -> Result<Vec<u8>>;
    fn verify(&self, digest: &[u8], signature: &[u8]) -> Result<bool>;
}

/// Symmetric signer over a blake3 keyed hash.
#[derive(Clone)]
pub struct KeyedHashSigner {
    key: [u8; 32],
}

impl KeyedHashSigner {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }
}

impl Signer for KeyedHashSigner {
    fn sign(&self, digest: &[u8]) -> Result<Vec<u8>> {
        Ok(blake3::keyed_hash(&self.key, digest).as_bytes().to_vec())
    }

    fn verify(&self, digest: &[u8], signature: &[u8]) -> Result<bool> {
        let expected = blake3::keyed_hash(&self.key, digest);
        let Ok(given) = <[u8; 32]>::try_from(signature) else {
            return Ok(false);
        };
        // blake3::Hash equality is constant-time
        Ok(expected == blake3::Hash::from(given))
    }
}

impl RecordStore {
    /// Ordered (path, content hash) concatenation over every reference.
    pub fn content_digest(&self) -> Result<Vec<u8>> {
        let inner = self.lock()?;
        let container = inner.container()?;
        let header = Header::scan(container);
        let mut out = Vec::new();
        for path in header.paths(&[]) {
            let mut hasher = blake3::Hasher::new();
            for row in container.rows(&path)? {
                hasher.update(&(row.len() as u64).to_le_bytes());
                hasher.update(row);
            }
            out.extend_from_slice(path.as_bytes());
            out.push(0);
            out.extend_from_slice(hasher.finalize().as_bytes());
        }
        Ok(out)
    }

    /// Sign the current content and store the signature on `/userdata`.
    pub fn sign(&self, signer: &dyn Signer) -> Result<()> {
        let digest = self.content_digest()?;
        let signature = signer.sign(&digest)?;
        self.set_attribute(USERDATA, SIGNATURE_ATTR, signature)?;
        tracing::debug!(path = %self.path().display(), "record signed");
        Ok(())
    }

    pub fn is_signed(&self) -> Result<bool> {
        Ok(self.get_attribute(USERDATA, SIGNATURE_ATTR)?.is_some())
    }

    /// Check the stored signature against the current content. Unsigned
    /// records do not verify.
    pub fn verify(&self, signer: &dyn Signer) -> Result<bool> {
        let signature = match self.get_attribute(USERDATA, SIGNATURE_ATTR)? {
            Some(AttrValue::Bytes(bytes)) => bytes,
            Some(_) => return Err(StoreError::Signature("signature attribute is not binary".into())),
            None => return Ok(false),
        };
        signer.verify(&self.content_digest()?, &signature)
    }
}
