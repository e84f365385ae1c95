//! Text values: an immutable byte string (source text is not necessarily
//! UTF-8 in the original evaluator, so this wraps raw bytes rather than
//! `String`).

use std::fmt;

use crate::fp::{variant_tag, Tag, VariantSalt};

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Text(Vec<u8>);

impl Text {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Text(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn fingerprint(&self) -> Tag {
        variant_tag(VariantSalt::Text).extend(&self.0)
    }
}

impl From<&str> for Text {
    fn from(s: &str) -> Self {
        Text(s.as_bytes().to_vec())
    }
}

impl From<String> for Text {
    fn from(s: String) -> Self {
        Text(s.into_bytes())
    }
}

impl fmt::Debug for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) => write!(f, "Text({s:?})"),
            None => write!(f, "Text({:?})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_bytes_same_fingerprint() {
        let a = Text::from("hello");
        let b = Text::from("hello".to_string());
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn differing_bytes_differ() {
        assert_ne!(Text::from("a").fingerprint(), Text::from("b").fingerprint());
    }
}
