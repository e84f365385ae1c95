//! Fingerprint helpers layered over [`vesta_protocol::Tag`].
//!
//! The wire-level combination rules live in `vesta-protocol` since both the
//! evaluator and the cache protocol need them; this module adds the
//! evaluator-specific conveniences for fingerprinting the handful of
//! primitive Rust types `Value` is built from.

pub use vesta_protocol::Tag;

/// Salt distinguishing the discriminant space of each `Value` variant, so
/// that e.g. `Integer(0)` and `Boolean(false)` never collide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VariantSalt {
    Boolean = 0,
    Integer = 1,
    Text = 2,
    List = 3,
    Binding = 4,
    Closure = 5,
    Model = 6,
    Primitive = 7,
    Error = 8,
    Fp = 9,
    Unbound = 10,
}

/// Start a fingerprint for a `Value` variant: every variant's fingerprint
/// begins by extending [`Tag::ZERO`] with its salt byte, so no two variants
/// can produce the same tag from coincidentally identical payload bytes.
pub fn variant_tag(salt: VariantSalt) -> Tag {
    Tag::ZERO.extend([salt as u8])
}

pub fn tag_of_bool(b: bool) -> Tag {
    variant_tag(VariantSalt::Boolean).extend([b as u8])
}

pub fn tag_of_i32(n: i32) -> Tag {
    variant_tag(VariantSalt::Integer).extend(n.to_be_bytes())
}

pub fn tag_of_bytes(bytes: &[u8]) -> Tag {
    variant_tag(VariantSalt::Text).extend(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_dont_collide() {
        assert_ne!(tag_of_bool(false), tag_of_i32(0));
    }

    #[test]
    fn integers_are_distinct() {
        assert_ne!(tag_of_i32(1), tag_of_i32(2));
    }
}
