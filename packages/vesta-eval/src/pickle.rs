//! The pickle format: a compact binary encoding of a [`Value`] plus the
//! [`DPaths`] observed while constructing it, used to ship cache entries and
//! repository trees over the wire.
//!
//! Grounded on `examples/original_source/progs/vestaeval/Pickle.H`, which
//! versions its wire format (this port keeps that convention: a 4-byte
//! big-endian version header, bumped whenever the tag layout below changes)
//! and de-duplicates path arcs via a shared prefix table rather than
//! repeating common directory prefixes in every entry.

use std::collections::HashMap;

use color_eyre::eyre::{ensure, eyre, Result};

use crate::deppath::{Arc, DepPath, PathKind};
use crate::dpaths::DPaths;
use crate::value::{Binding, Text, Value, ValueList};

/// Bumped whenever the tag layout changes; a pickle whose header doesn't
/// match is rejected rather than guessed at.
pub const PICKLE_VERSION: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum Tag {
    Boolean = 0,
    Integer = 1,
    Text = 2,
    List = 3,
    Binding = 4,
    Primitive = 7,
    Error = 8,
    Fp = 9,
    Unbound = 10,
}

impl Tag {
    fn from_byte(b: u8) -> Result<Self> {
        Ok(match b {
            0 => Tag::Boolean,
            1 => Tag::Integer,
            2 => Tag::Text,
            3 => Tag::List,
            4 => Tag::Binding,
            7 => Tag::Primitive,
            8 => Tag::Error,
            9 => Tag::Fp,
            10 => Tag::Unbound,
            other => return Err(eyre!("unknown pickle tag byte {other}")),
        })
    }
}

/// A shared table of previously-seen path arcs, written once and referenced
/// by index thereafter — the same trick `hurry`'s cargo fingerprint rewriter
/// uses for repeated path components, adapted here to dependency-path arcs.
#[derive(Default)]
struct PrefixTbl {
    arcs: Vec<Arc>,
    index: HashMap<Arc, u32>,
}

impl PrefixTbl {
    fn intern(&mut self, arc: &Arc) -> u32 {
        if let Some(&i) = self.index.get(arc) {
            return i;
        }
        let i = self.arcs.len() as u32;
        self.arcs.push(arc.clone());
        self.index.insert(arc.clone(), i);
        i
    }

    fn get(&self, index: u32) -> Result<&Arc> {
        self.arcs
            .get(index as usize)
            .ok_or_else(|| eyre!("prefix table overflow: index {index} out of range"))
    }
}

/// Resolves a dependency path's *current* value against whatever context a
/// cache entry is being replayed into. A pickle never carries the value it
/// observed when written — only the path and its kind — so a hit is exactly
/// as sensitive to that value changing as a fresh computation would have
/// been; trusting bytes written by an earlier process invocation would let a
/// stale observation outlive the thing it was supposed to track.
pub trait DepResolver {
    fn resolve(&self, path: &DepPath) -> Option<Value>;
}

/// Encode `value` and its dependency set as a pickle byte string.
pub fn pickle(value: &Value, deps: &DPaths) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(PICKLE_VERSION.to_be_bytes());

    let mut prefix_tbl = PrefixTbl::default();
    let mut body = Vec::new();
    write_value(&mut body, value, &mut prefix_tbl);
    write_deps(&mut body, deps, &mut prefix_tbl);

    write_prefix_tbl(&mut out, &prefix_tbl);
    out.extend(body);
    out
}

/// Decode a pickle produced by [`pickle`]. Each dependency's value is
/// re-resolved against `resolver` rather than read back from the bytes —
/// see [`DepResolver`].
pub fn unpickle<R: DepResolver + ?Sized>(bytes: &[u8], resolver: &R) -> Result<(Value, DPaths)> {
    ensure!(bytes.len() >= 4, "pickle too short for version header");
    let version = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
    ensure!(
        version == PICKLE_VERSION,
        "pickle version mismatch: expected {PICKLE_VERSION}, found {version}"
    );

    let mut cursor = Cursor::new(&bytes[4..]);
    let prefix_tbl = read_prefix_tbl(&mut cursor)?;
    let value = read_value(&mut cursor, &prefix_tbl)?;
    let deps = read_deps(&mut cursor, &prefix_tbl, resolver)?;
    ensure!(
        cursor.pos == cursor.bytes.len(),
        "pickle has {} trailing byte(s) after decoding",
        cursor.bytes.len() - cursor.pos
    );
    Ok((value, deps))
}

fn write_prefix_tbl(out: &mut Vec<u8>, tbl: &PrefixTbl) {
    out.extend((tbl.arcs.len() as u32).to_be_bytes());
    for arc in &tbl.arcs {
        write_arc_literal(out, arc);
    }
}

fn read_prefix_tbl(cursor: &mut Cursor<'_>) -> Result<PrefixTbl> {
    let count = cursor.read_u32()?;
    let mut tbl = PrefixTbl::default();
    for _ in 0..count {
        let arc = read_arc_literal(cursor)?;
        tbl.intern(&arc);
    }
    Ok(tbl)
}

fn write_arc_literal(out: &mut Vec<u8>, arc: &Arc) {
    match arc {
        Arc::Name(s) => {
            out.push(0);
            out.extend((s.len() as u32).to_be_bytes());
            out.extend(s.as_bytes());
        }
        Arc::Index(i) => {
            out.push(1);
            out.extend(i.to_be_bytes());
        }
    }
}

fn read_arc_literal(cursor: &mut Cursor<'_>) -> Result<Arc> {
    match cursor.read_u8()? {
        0 => {
            let len = cursor.read_u32()? as usize;
            let bytes = cursor.read_bytes(len)?;
            Ok(Arc::name(
                String::from_utf8(bytes.to_vec()).map_err(|e| eyre!("invalid utf8 arc: {e}"))?,
            ))
        }
        1 => Ok(Arc::Index(cursor.read_u32()?)),
        other => Err(eyre!("unknown arc tag {other}")),
    }
}

fn write_value(out: &mut Vec<u8>, value: &Value, prefix_tbl: &mut PrefixTbl) {
    match value {
        Value::Boolean(b) => {
            out.push(Tag::Boolean as u8);
            out.push(*b as u8);
        }
        Value::Integer(n) => {
            out.push(Tag::Integer as u8);
            out.extend(n.to_be_bytes());
        }
        Value::Text(t) => {
            out.push(Tag::Text as u8);
            out.extend((t.as_bytes().len() as u32).to_be_bytes());
            out.extend(t.as_bytes());
        }
        Value::List(list) => {
            out.push(Tag::List as u8);
            out.extend((list.len() as u32).to_be_bytes());
            for item in list.items() {
                write_value(out, item, prefix_tbl);
            }
        }
        Value::Binding(binding) => {
            out.push(Tag::Binding as u8);
            out.extend((binding.len() as u32).to_be_bytes());
            for (name, v) in binding.entries() {
                prefix_tbl.intern(&Arc::name(name.clone()));
                out.extend((name.len() as u32).to_be_bytes());
                out.extend(name.as_bytes());
                write_value(out, v, prefix_tbl);
            }
        }
        Value::Primitive(name) => {
            out.push(Tag::Primitive as u8);
            out.extend((name.len() as u32).to_be_bytes());
            out.extend(name.as_bytes());
        }
        Value::Error(e) => {
            out.push(Tag::Error as u8);
            out.extend((e.message.len() as u32).to_be_bytes());
            out.extend(e.message.as_bytes());
        }
        Value::Fp(tag) => {
            out.push(Tag::Fp as u8);
            out.extend(tag.as_bytes());
        }
        Value::Unbound => out.push(Tag::Unbound as u8),
        // Closures and models carry a captured environment that can't be
        // shipped over the wire on its own; a cache entry only ever stores
        // the *result* of applying one, never the closure itself.
        Value::Closure(_) | Value::Model(_) => out.push(Tag::Unbound as u8),
    }
}

fn read_value(cursor: &mut Cursor<'_>, prefix_tbl: &PrefixTbl) -> Result<Value> {
    let tag = Tag::from_byte(cursor.read_u8()?)?;
    Ok(match tag {
        Tag::Boolean => Value::Boolean(cursor.read_u8()? != 0),
        Tag::Integer => Value::Integer(cursor.read_i32()?),
        Tag::Text => {
            let len = cursor.read_u32()? as usize;
            Value::Text(Text::new(cursor.read_bytes(len)?.to_vec()))
        }
        Tag::List => {
            let len = cursor.read_u32()?;
            let mut list = ValueList::new();
            for _ in 0..len {
                list.push(read_value(cursor, prefix_tbl)?, false);
            }
            Value::List(list)
        }
        Tag::Binding => {
            let len = cursor.read_u32()?;
            let mut binding = Binding::new();
            for _ in 0..len {
                let name_len = cursor.read_u32()? as usize;
                let name =
                    String::from_utf8(cursor.read_bytes(name_len)?.to_vec()).map_err(|e| eyre!(e))?;
                let value = read_value(cursor, prefix_tbl)?;
                binding.insert(name, value, false);
            }
            Value::Binding(binding)
        }
        Tag::Primitive => {
            let len = cursor.read_u32()? as usize;
            Value::Primitive(String::from_utf8(cursor.read_bytes(len)?.to_vec()).map_err(|e| eyre!(e))?)
        }
        Tag::Error => {
            let len = cursor.read_u32()? as usize;
            let message =
                String::from_utf8(cursor.read_bytes(len)?.to_vec()).map_err(|e| eyre!(e))?;
            Value::error(message)
        }
        Tag::Fp => {
            let bytes = cursor.read_bytes(16)?;
            Value::Fp(crate::fp::Tag::from_slice(bytes)?)
        }
        Tag::Unbound => Value::Unbound,
    })
}

/// Writes only each dependency's path, never the value it was observed to
/// hold — see [`DepResolver`].
fn write_deps(out: &mut Vec<u8>, deps: &DPaths, prefix_tbl: &mut PrefixTbl) {
    out.extend((deps.len() as u32).to_be_bytes());
    for (path, _value) in deps.iter() {
        out.push(path_kind_byte(path.kind));
        out.extend((path.arcs().len() as u32).to_be_bytes());
        for arc in path.arcs() {
            let index = prefix_tbl.intern(arc);
            out.extend(index.to_be_bytes());
        }
    }
}

fn read_deps<R: DepResolver + ?Sized>(
    cursor: &mut Cursor<'_>,
    prefix_tbl: &PrefixTbl,
    resolver: &R,
) -> Result<DPaths> {
    let count = cursor.read_u32()?;
    let mut deps = DPaths::empty();
    for _ in 0..count {
        let kind = path_kind_from_byte(cursor.read_u8()?)?;
        let arc_count = cursor.read_u32()?;
        let mut arcs = Vec::with_capacity(arc_count as usize);
        for _ in 0..arc_count {
            let index = cursor.read_u32()?;
            arcs.push(prefix_tbl.get(index)?.clone());
        }
        let path = DepPath::from_arcs(arcs, kind);
        let value = resolver.resolve(&path).unwrap_or(Value::Unbound);
        deps.put(path, value);
    }
    Ok(deps)
}

fn path_kind_byte(kind: PathKind) -> u8 {
    match kind {
        PathKind::Norm => 0,
        PathKind::Bang => 1,
        PathKind::Type => 2,
        PathKind::ListLen => 3,
        PathKind::BindingLen => 4,
        PathKind::Expr => 5,
        PathKind::Dummy => 6,
    }
}

fn path_kind_from_byte(b: u8) -> Result<PathKind> {
    Ok(match b {
        0 => PathKind::Norm,
        1 => PathKind::Bang,
        2 => PathKind::Type,
        3 => PathKind::ListLen,
        4 => PathKind::BindingLen,
        5 => PathKind::Expr,
        6 => PathKind::Dummy,
        other => return Err(eyre!("unknown path kind byte {other}")),
    })
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        ensure!(
            self.pos + len <= self.bytes.len(),
            "pickle truncated: wanted {len} bytes at offset {}",
            self.pos
        );
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deppath::Arc;

    /// Resolves every path to a fixed value, standing in for a live `Context`
    /// in tests that don't care what a dep currently observes.
    struct FixedResolver(Value);

    impl DepResolver for FixedResolver {
        fn resolve(&self, _path: &DepPath) -> Option<Value> {
            Some(self.0.clone())
        }
    }

    struct NullResolver;

    impl DepResolver for NullResolver {
        fn resolve(&self, _path: &DepPath) -> Option<Value> {
            None
        }
    }

    #[test]
    fn scalar_round_trips() {
        let value = Value::Integer(42);
        let deps = DPaths::empty();
        let bytes = pickle(&value, &deps);
        let (decoded, decoded_deps) = unpickle(&bytes, &NullResolver).unwrap();
        assert_eq!(decoded, value);
        assert!(decoded_deps.is_empty());
    }

    #[test]
    fn composite_value_with_deps_round_trips() {
        let mut binding = Binding::new();
        binding.insert("a", Value::Integer(1), false);
        binding.insert("b", Value::text("hi"), false);
        let value = Value::Binding(binding);

        let mut deps = DPaths::empty();
        deps.put(
            DepPath::singleton(Arc::name("a"), PathKind::Norm),
            Value::Integer(1),
        );

        let bytes = pickle(&value, &deps);
        let (decoded, decoded_deps) = unpickle(&bytes, &FixedResolver(Value::Integer(1))).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(decoded_deps.len(), 1);
        assert!(decoded_deps.contains(&DepPath::singleton(Arc::name("a"), PathKind::Norm)));
    }

    #[test]
    fn dep_value_is_reresolved_not_read_from_bytes() {
        let mut deps = DPaths::empty();
        deps.put(
            DepPath::singleton(Arc::name("a"), PathKind::Norm),
            Value::Integer(1),
        );
        let bytes = pickle(&Value::Boolean(true), &deps);

        let (_, decoded_deps) = unpickle(&bytes, &FixedResolver(Value::Integer(99))).unwrap();
        let path = DepPath::singleton(Arc::name("a"), PathKind::Norm);
        assert_eq!(decoded_deps.get(&path), Some(&Value::Integer(99)));
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut bytes = pickle(&Value::Boolean(true), &DPaths::empty());
        bytes[3] = 0;
        assert!(unpickle(&bytes, &NullResolver).is_err());
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = pickle(&Value::Integer(1), &DPaths::empty());
        bytes.push(0xff);
        assert!(unpickle(&bytes, &NullResolver).is_err());
    }

    #[test]
    fn truncated_body_is_rejected() {
        let bytes = pickle(&Value::text("hello"), &DPaths::empty());
        let truncated = &bytes[..bytes.len() - 1];
        assert!(unpickle(truncated, &NullResolver).is_err());
    }
}
