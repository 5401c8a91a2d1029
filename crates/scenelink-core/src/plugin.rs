//! Plugin descriptions: the unit of scene state handed to the exporter

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::hash::{attr_digest, Digest};
use crate::value::{AttrValue, PluginRef};

/// Plugin kinds that carry geometry
const GEOMETRY_PREFIX: &str = "Geom";

/// Plugin kinds that describe the view/camera
const VIEW_KINDS: &[&str] = &[
    "RenderView",
    "CameraPhysical",
    "CameraDefault",
    "SettingsCamera",
    "SettingsCameraDof",
    "SettingsMotionBlur",
];

/// An attribute value together with the scene time it was sampled at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginAttr {
    pub value: AttrValue,
    #[serde(default)]
    pub time: f32,
}

impl PluginAttr {
    pub fn new(value: impl Into<AttrValue>, time: f32) -> Self {
        Self {
            value: value.into(),
            time,
        }
    }

    pub fn digest(&self) -> Digest {
        attr_digest(&self.value)
    }
}

/// Description of one plugin instance
///
/// Attributes are kept sorted by name so enumeration (and therefore the
/// folded description digest) is the same on every run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PluginDesc {
    /// Unique plugin name
    pub name: String,
    /// Plugin type, e.g. "Node" or "GeomStaticMesh"
    pub kind: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, PluginAttr>,
}

impl PluginDesc {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            attrs: BTreeMap::new(),
        }
    }

    /// Same name and kind, no attributes
    pub fn empty_like(&self) -> Self {
        Self::new(self.name.clone(), self.kind.clone())
    }

    /// Add or replace an attribute sampled at time 0
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> &mut Self {
        self.add_at(name, value, 0.0)
    }

    /// Add or replace an attribute sampled at `time`
    pub fn add_at(
        &mut self,
        name: impl Into<String>,
        value: impl Into<AttrValue>,
        time: f32,
    ) -> &mut Self {
        self.attrs.insert(name.into(), PluginAttr::new(value, time));
        self
    }

    /// Builder-style variant of [`PluginDesc::add`]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.add(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&PluginAttr> {
        self.attrs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// A description without a kind can't be created on the renderer
    pub fn is_valid(&self) -> bool {
        !self.kind.is_empty()
    }

    pub fn is_geometry(&self) -> bool {
        self.kind.starts_with(GEOMETRY_PREFIX)
    }

    pub fn is_view(&self) -> bool {
        VIEW_KINDS.contains(&self.kind.as_str())
    }

    /// Handle other plugins use to reference this one
    pub fn plugin_ref(&self) -> PluginRef {
        PluginRef::new(self.name.clone())
    }

    /// Attributes of `self` that also exist in `filter` but hold a different value
    pub fn diff_against(&self, filter: &PluginDesc) -> PluginDesc {
        let mut result = self.empty_like();
        for (name, attr) in &self.attrs {
            if let Some(other) = filter.get(name) {
                if attr.digest() != other.digest() {
                    result.attrs.insert(name.clone(), attr.clone());
                }
            }
        }
        result
    }
}
