//! Deterministic attribute digests
//!
//! Digests are 32-bit XXH32 over the raw little-endian bytes of a value. Composite values are hashed by chaining: the digest of
//! one part becomes the seed of the next, so element order matters.
//!
//! Floats are hashed by bit pattern, not by value: `0.0` and `-0.0` produce
//! different digests, and two NaNs with different payloads do too.

use xxhash_rust::xxh32::xxh32;

use crate::value::{AColor, AttrValue, Color, Matrix, PluginRef, Transform, Vector};

/// Seed used for attribute digests and for the start of a description fold
pub const DEFAULT_SEED: u32 = 42;

/// 32-bit content fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Digest(pub u32);

impl Digest {
    /// Digest that `Unknown` values collapse to
    pub const SENTINEL: Digest = Digest(0);

    pub fn seed() -> Self {
        Self(DEFAULT_SEED)
    }

    /// Chain another digest into this one
    pub fn fold(self, next: Digest) -> Digest {
        Digest(xxh32(&next.0.to_le_bytes(), self.0))
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Values with a fixed raw byte layout
trait RawBytes {
    fn write_bytes(&self, out: &mut Vec<u8>);
}

impl RawBytes for i32 {
    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl RawBytes for f32 {
    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_bits().to_le_bytes());
    }
}

impl RawBytes for Vector {
    fn write_bytes(&self, out: &mut Vec<u8>) {
        self.x.write_bytes(out);
        self.y.write_bytes(out);
        self.z.write_bytes(out);
    }
}

impl RawBytes for Color {
    fn write_bytes(&self, out: &mut Vec<u8>) {
        self.r.write_bytes(out);
        self.g.write_bytes(out);
        self.b.write_bytes(out);
    }
}

impl RawBytes for AColor {
    fn write_bytes(&self, out: &mut Vec<u8>) {
        self.r.write_bytes(out);
        self.g.write_bytes(out);
        self.b.write_bytes(out);
        self.a.write_bytes(out);
    }
}

impl RawBytes for Matrix {
    fn write_bytes(&self, out: &mut Vec<u8>) {
        self.v0.write_bytes(out);
        self.v1.write_bytes(out);
        self.v2.write_bytes(out);
    }
}

impl RawBytes for Transform {
    fn write_bytes(&self, out: &mut Vec<u8>) {
        self.matrix.write_bytes(out);
        self.offset.write_bytes(out);
    }
}

impl<T: RawBytes> RawBytes for [T] {
    fn write_bytes(&self, out: &mut Vec<u8>) {
        for item in self {
            item.write_bytes(out);
        }
    }
}

fn raw_digest<T: RawBytes + ?Sized>(value: &T, seed: u32) -> u32 {
    let mut buf = Vec::new();
    value.write_bytes(&mut buf);
    xxh32(&buf, seed)
}

fn str_digest(value: &str, seed: u32) -> u32 {
    xxh32(value.as_bytes(), seed)
}

fn plugin_digest(value: &PluginRef, seed: u32) -> u32 {
    let hash = str_digest(&value.plugin, seed);
    match &value.output {
        Some(output) if !output.is_empty() => str_digest(output, hash),
        _ => hash,
    }
}

/// Digest of a single attribute value, chained from `seed`
pub fn digest(value: &AttrValue, seed: u32) -> Digest {
    let hash = match value {
        AttrValue::Unknown => return Digest::SENTINEL,
        AttrValue::Int(v) => raw_digest(v, seed),
        AttrValue::Float(v) => raw_digest(v, seed),
        AttrValue::String(v) => str_digest(v, seed),
        AttrValue::Color(v) => raw_digest(v, seed),
        AttrValue::AColor(v) => raw_digest(v, seed),
        AttrValue::Vector(v) => raw_digest(v, seed),
        AttrValue::Transform(v) => raw_digest(v, seed),
        AttrValue::Matrix(v) => raw_digest(v, seed),
        AttrValue::Plugin(v) => plugin_digest(v, seed),
        AttrValue::ListInt(v) => raw_digest(v.as_slice(), seed),
        AttrValue::ListFloat(v) => raw_digest(v.as_slice(), seed),
        AttrValue::ListVector(v) => raw_digest(v.as_slice(), seed),
        AttrValue::ListColor(v) => raw_digest(v.as_slice(), seed),
        AttrValue::ListString(v) => v.iter().fold(seed, |hash, item| str_digest(item, hash)),
        AttrValue::ListPlugin(v) => v.iter().fold(seed, |hash, item| plugin_digest(item, hash)),
        AttrValue::MapChannels(channels) => channels.iter().fold(seed, |hash, (name, channel)| {
            let hash = str_digest(name, hash);
            let hash = raw_digest(channel.faces.as_slice(), hash);
            raw_digest(channel.vertices.as_slice(), hash)
        }),
        AttrValue::Instancer(instancer) => {
            let hash = raw_digest(&instancer.frame, seed);
            instancer.items.iter().fold(hash, |hash, item| {
                let hash = raw_digest(&item.tm, hash);
                let hash = raw_digest(&item.vel, hash);
                let hash = raw_digest(&item.index, hash);
                plugin_digest(&item.node, hash)
            })
        }
    };
    Digest(hash)
}

/// Digest of an attribute name with the default seed
pub fn name_digest(name: &str) -> Digest {
    Digest(str_digest(name, DEFAULT_SEED))
}

/// Digest of an attribute value with the default seed
pub fn attr_digest(value: &AttrValue) -> Digest {
    digest(value, DEFAULT_SEED)
}
