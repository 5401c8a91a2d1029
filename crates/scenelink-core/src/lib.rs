//! scenelink Core - Attribute values, digests, and the plugin diff cache
//!
//! This crate provides the foundational types for the scenelink system:
//! - A closed attribute value model for plugin descriptions
//! - Deterministic seeded digests over any attribute value
//! - A name-keyed cache that detects which plugins and attributes changed
//! - Export/render frame sequencing for animation runs

pub mod cache;
pub mod frames;
pub mod hash;
pub mod plugin;
pub mod value;

pub use cache::{CacheError, Comparison, PluginCache};
pub use frames::{AnimationMode, FramePair, FrameSequence};
pub use hash::{attr_digest, digest, name_digest, Digest, DEFAULT_SEED};
pub use plugin::{PluginAttr, PluginDesc};
pub use value::{
    AColor, AttrValue, Color, InstanceItem, Instancer, MapChannel, Matrix, PluginRef, Transform,
    Vector,
};
