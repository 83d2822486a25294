use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of a byte slice, returning a lowercase hex string.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Incremental SHA-256 over a sequence of text fields.
///
/// Each field is length-prefixed so `["ab", "c"]` and `["a", "bc"]` hash differently.
#[derive(Default)]
pub struct FieldHasher {
    inner: Sha256,
}

impl FieldHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(&mut self, value: &str) -> &mut Self {
        self.inner.update((value.len() as u64).to_le_bytes());
        self.inner.update(value.as_bytes());
        self
    }

    pub fn finish(self) -> String {
        format!("{:x}", self.inner.finalize())
    }
}
