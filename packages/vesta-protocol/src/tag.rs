//! 128-bit content fingerprint shared by the evaluator and the cache wire
//! protocol.
//!
//! `Tag` is the wire representation of a fingerprint: every value, path, and
//! cache key the evaluator produces eventually collapses to one of these.
//! Two combination rules are provided because the evaluator needs both:
//!
//! - [`Tag::extend`] is order-preserving (extending by `a` then `b` differs
//!   from `b` then `a`). Used for arc sequences, where position matters.
//! - [`Tag::combine_unordered`] is commutative. Used when folding together a
//!   set of child tags (e.g. the elements of a binding) where insertion order
//!   should not affect the resulting fingerprint.

use std::fmt;

use derive_more::Debug;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Width of a [`Tag`] in bytes (128 bits).
pub const TAG_BYTES: usize = 16;

/// A 128-bit content fingerprint.
///
/// Wire/disk form is a fixed 16-byte array in network (big-endian) byte
/// order, as specified by the evaluator's pickle format.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[debug("{}", self.to_hex())]
pub struct Tag([u8; TAG_BYTES]);

impl Tag {
    /// The fingerprint of the empty input; also the identity for
    /// [`Tag::combine_unordered`].
    pub const ZERO: Tag = Tag([0u8; TAG_BYTES]);

    /// Fingerprint a raw buffer from scratch.
    pub fn of(bytes: impl AsRef<[u8]>) -> Tag {
        Tag::ZERO.extend(bytes)
    }

    /// Extend this fingerprint with more bytes. Order-preserving: the
    /// sequence of `extend` calls is part of the resulting hash, so
    /// `a.extend(x).extend(y) != a.extend(y).extend(x)` in general.
    pub fn extend(&self, bytes: impl AsRef<[u8]>) -> Tag {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.0);
        hasher.update(bytes.as_ref());
        Tag::from_hash(hasher.finalize())
    }

    /// Combine two tags sequentially, as if the second had been produced by
    /// extending a stream that started with the first. This is how composite
    /// values (closures, which fingerprint `H(expr) + H(context)`) are built
    /// up incrementally without re-hashing from scratch.
    pub fn combine_raw(a: &Tag, b: &Tag) -> Tag {
        a.extend(b.0)
    }

    /// Fold another tag into this one in a way that does not depend on call
    /// order: `a.combine_unordered(b) == b.combine_unordered(a)`, and folding
    /// a set of tags via repeated calls gives the same result regardless of
    /// iteration order. Used for container fingerprints where element order
    /// is not itself an observable dependency (e.g. `DPaths` set membership).
    pub fn combine_unordered(&self, other: &Tag) -> Tag {
        let a = u128::from_be_bytes(self.0);
        let b = u128::from_be_bytes(other.0);
        Tag(a.wrapping_add(b).to_be_bytes())
    }

    /// Fold a set of tags into one, order-insensitively. Empty input yields
    /// [`Tag::ZERO`].
    pub fn fold_unordered(tags: impl IntoIterator<Item = Tag>) -> Tag {
        tags.into_iter()
            .fold(Tag::ZERO, |acc, t| acc.combine_unordered(&t))
    }

    /// View the raw bytes (network byte order).
    pub fn as_bytes(&self) -> &[u8; TAG_BYTES] {
        &self.0
    }

    /// Build a tag from raw bytes previously produced by [`Tag::as_bytes`].
    pub fn from_raw(bytes: [u8; TAG_BYTES]) -> Tag {
        Tag(bytes)
    }

    /// Parse a tag from a big-endian byte slice of exactly [`TAG_BYTES`] bytes.
    pub fn from_slice(bytes: &[u8]) -> color_eyre::Result<Tag> {
        use color_eyre::eyre::ensure;
        ensure!(
            bytes.len() == TAG_BYTES,
            "expected {TAG_BYTES} bytes, got {}",
            bytes.len()
        );
        let mut raw = [0u8; TAG_BYTES];
        raw.copy_from_slice(bytes);
        Ok(Tag(raw))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex: impl AsRef<str>) -> color_eyre::Result<Tag> {
        let bytes = hex::decode(hex.as_ref())?;
        Tag::from_slice(&bytes)
    }

    fn from_hash(hash: blake3::Hash) -> Tag {
        let mut raw = [0u8; TAG_BYTES];
        raw.copy_from_slice(&hash.as_bytes()[..TAG_BYTES]);
        Tag(raw)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Tag {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        Tag::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn extend_is_order_sensitive() {
        let base = Tag::of(b"root");
        let ab = base.extend(b"a").extend(b"b");
        let ba = base.extend(b"b").extend(b"a");
        assert_ne!(ab, ba);
    }

    #[test]
    fn combine_unordered_is_commutative() {
        let a = Tag::of(b"a");
        let b = Tag::of(b"b");
        let c = Tag::of(b"c");
        assert_eq!(a.combine_unordered(&b), b.combine_unordered(&a));

        let left_to_right = Tag::fold_unordered([a, b, c]);
        let shuffled = Tag::fold_unordered([c, a, b]);
        assert_eq!(left_to_right, shuffled);
    }

    #[test]
    fn fold_unordered_empty_is_zero() {
        assert_eq!(Tag::fold_unordered(std::iter::empty()), Tag::ZERO);
    }

    #[test]
    fn hex_round_trip() {
        let tag = Tag::of(b"hello world");
        let hex = tag.to_hex();
        assert_eq!(Tag::from_hex(&hex).unwrap(), tag);
    }

    #[test]
    fn deterministic() {
        assert_eq!(Tag::of(b"same"), Tag::of(b"same"));
        assert_ne!(Tag::of(b"same"), Tag::of(b"different"));
    }
}
