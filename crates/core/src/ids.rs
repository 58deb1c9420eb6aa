use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies a resource (and the document wrapping it) for its whole
/// lifetime, across all replicas. Assigned by the client at creation time.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(Uuid);

impl ResourceId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId({})", &self.0.to_string()[..8])
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one revision of a document within its revision tree.
///
/// A revision id is the pair of the revision's generation (depth in the
/// tree, root = 1) and a blake3 digest over the parent digest and the
/// serialized document body. The derived `Ord` (generation first, digest
/// second) is the total order used for deterministic winner election among
/// conflicting leaf revisions: every replica elects the same winner without
/// coordination.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RevisionId {
    generation: u32,
    digest: [u8; 32],
}

impl RevisionId {
    /// Revision id for the root revision of a new document.
    pub fn root(body: &[u8]) -> Self {
        Self::derive(1, None, body)
    }

    /// Revision id for a successor of `parent`.
    pub fn child(parent: &RevisionId, body: &[u8]) -> Self {
        Self::derive(parent.generation + 1, Some(parent), body)
    }

    fn derive(generation: u32, parent: Option<&RevisionId>, body: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        if let Some(parent) = parent {
            hasher.update(&parent.to_bytes());
        }
        hasher.update(body);
        Self {
            generation,
            digest: *hasher.finalize().as_bytes(),
        }
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// 36-byte encoding: 4 bytes generation (big-endian) then the digest.
    /// Byte order equals `Ord` order, so blob comparisons in sqlite agree
    /// with in-memory comparisons.
    pub fn to_bytes(&self) -> [u8; 36] {
        let mut buf = [0u8; 36];
        buf[..4].copy_from_slice(&self.generation.to_be_bytes());
        buf[4..].copy_from_slice(&self.digest);
        buf
    }

    pub fn from_bytes(bytes: &[u8; 36]) -> Self {
        let generation = u32::from_be_bytes(bytes[..4].try_into().unwrap());
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&bytes[4..]);
        Self { generation, digest }
    }
}

impl fmt::Debug for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RevisionId({}-{:02x}{:02x}{:02x}{:02x})",
            self.generation, self.digest[0], self.digest[1], self.digest[2], self.digest[3]
        )
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-", self.generation)?;
        for byte in &self.digest[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_ids_are_deterministic() {
        let a = RevisionId::root(b"body");
        let b = RevisionId::root(b"body");
        assert_eq!(a, b);
        assert_ne!(a, RevisionId::root(b"other"));
    }

    #[test]
    fn child_revisions_increase_generation() {
        let root = RevisionId::root(b"body");
        let child = RevisionId::child(&root, b"body2");
        assert_eq!(child.generation(), 2);
        assert!(child > root);
    }

    #[test]
    fn byte_encoding_roundtrip_preserves_order() {
        let root = RevisionId::root(b"x");
        let a = RevisionId::child(&root, b"a");
        let b = RevisionId::child(&root, b"b");
        assert_eq!(RevisionId::from_bytes(&a.to_bytes()), a);
        assert_eq!(a.to_bytes().cmp(&b.to_bytes()), a.cmp(&b));
    }
}
