//! Scene producers: where plugin descriptions come from
//!
//! The exporter never walks a host scene graph itself; it asks a
//! [`SceneProducer`] for entity names and a fresh description of each one at
//! the current export time. [`SceneFile`] is the producer used by the CLI: a
//! TOML file listing plugins with base attribute values and step keyframes.

use scenelink_core::{AttrValue, PluginDesc, PluginRef};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum SceneError {
    #[error("Failed to read scene {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse scene: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Plugin {0} is defined more than once")]
    DuplicateName(String),
    #[error("Default material {0} is not defined in the scene")]
    MissingMaterial(String),
}

/// Source of plugin descriptions
pub trait SceneProducer {
    /// Names of all entities, in export order
    fn entities(&self) -> Vec<String>;

    /// Description of `name` sampled at `time`, or `None` if the entity
    /// doesn't exist at that time
    fn describe(&self, name: &str, time: f32) -> Option<PluginDesc>;

    /// Material assigned to nodes that don't name one
    fn default_material(&self) -> Option<PluginRef>;
}

/// Attribute value that takes effect from `frame` onward
#[derive(Debug, Clone, Deserialize)]
pub struct Keyframe {
    pub frame: f32,
    pub attr: String,
    pub value: AttrValue,
}

/// One plugin in a scene file
#[derive(Debug, Clone, Deserialize)]
pub struct EntitySpec {
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, AttrValue>,
    #[serde(default, rename = "key")]
    pub keys: Vec<Keyframe>,
    /// The entity disappears from this frame on
    #[serde(default)]
    pub until: Option<f32>,
}

impl EntitySpec {
    fn sample(&self, time: f32) -> PluginDesc {
        let animated: HashSet<&str> = self.keys.iter().map(|k| k.attr.as_str()).collect();

        let mut desc = PluginDesc::new(self.name.clone(), self.kind.clone());
        for (name, value) in &self.attrs {
            let at = if animated.contains(name.as_str()) { time } else { 0.0 };
            desc.add_at(name.clone(), value.clone(), at);
        }
        // Keys are sorted by frame, so the last one applied wins
        for key in self.keys.iter().filter(|k| k.frame <= time) {
            desc.add_at(key.attr.clone(), key.value.clone(), time);
        }
        desc
    }
}

/// TOML scene description
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SceneFile {
    #[serde(default)]
    pub default_material: Option<String>,
    #[serde(default, rename = "plugin")]
    pub plugins: Vec<EntitySpec>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl SceneFile {
    /// Load and validate a scene file
    pub fn load(path: &Path) -> Result<Self, SceneError> {
        let content = std::fs::read_to_string(path).map_err(|source| SceneError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let scene = Self::parse(&content)?;
        info!(
            path = %path.display(),
            plugins = scene.plugins.len(),
            "Loaded scene"
        );
        Ok(scene)
    }

    /// Parse and validate scene text
    pub fn parse(content: &str) -> Result<Self, SceneError> {
        let mut scene: SceneFile = toml::from_str(content)?;

        for (i, plugin) in scene.plugins.iter_mut().enumerate() {
            if scene.index.insert(plugin.name.clone(), i).is_some() {
                return Err(SceneError::DuplicateName(plugin.name.clone()));
            }
            plugin.keys.sort_by(|a, b| a.frame.total_cmp(&b.frame));
        }

        if let Some(material) = &scene.default_material {
            if !scene.index.contains_key(material) {
                return Err(SceneError::MissingMaterial(material.clone()));
            }
        }

        debug!(plugins = scene.plugins.len(), "Parsed scene");
        Ok(scene)
    }

    pub fn get(&self, name: &str) -> Option<&EntitySpec> {
        self.index.get(name).map(|&i| &self.plugins[i])
    }
}

impl SceneProducer for SceneFile {
    fn entities(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name.clone()).collect()
    }

    fn describe(&self, name: &str, time: f32) -> Option<PluginDesc> {
        let entity = self.get(name)?;
        if entity.until.is_some_and(|until| time >= until) {
            return None;
        }
        Some(entity.sample(time))
    }

    fn default_material(&self) -> Option<PluginRef> {
        self.default_material.as_deref().map(PluginRef::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenelink_core::Vector;
    use std::io::Write;

    const BOX_SCENE: &str = r#"
default_material = "DefaultMtl"

[[plugin]]
name = "DefaultMtl"
kind = "MtlSingleBRDF"

[[plugin]]
name = "Box"
kind = "Node"
attrs.material = { String = "Mtl1" }
attrs.visible = { Int = 1 }

[[plugin.key]]
frame = 2.0
attr = "material"
value = { String = "Mtl2" }

[[plugin]]
name = "Light"
kind = "LightOmni"
attrs.position = { Vector = { x = 0.0, y = 5.0, z = 0.0 } }
until = 3.0
"#;

    #[test]
    fn test_entities_in_file_order() {
        let scene = SceneFile::parse(BOX_SCENE).unwrap();
        assert_eq!(scene.entities(), vec!["DefaultMtl", "Box", "Light"]);
        assert_eq!(scene.default_material(), Some(PluginRef::new("DefaultMtl")));
    }

    #[test]
    fn test_step_keyframes() {
        let scene = SceneFile::parse(BOX_SCENE).unwrap();

        let frame1 = scene.describe("Box", 1.0).unwrap();
        assert_eq!(frame1.kind, "Node");
        assert_eq!(frame1.get("material").unwrap().value, AttrValue::from("Mtl1"));
        assert_eq!(frame1.get("material").unwrap().time, 1.0);
        assert_eq!(frame1.get("visible").unwrap().time, 0.0);

        let frame2 = scene.describe("Box", 2.0).unwrap();
        assert_eq!(frame2.get("material").unwrap().value, AttrValue::from("Mtl2"));
        assert_eq!(frame2.get("visible"), frame1.get("visible"));
    }

    #[test]
    fn test_entity_disappears() {
        let scene = SceneFile::parse(BOX_SCENE).unwrap();
        let light = scene.describe("Light", 2.0).unwrap();
        assert_eq!(
            light.get("position").unwrap().value,
            AttrValue::from(Vector::new(0.0, 5.0, 0.0))
        );
        assert!(scene.describe("Light", 3.0).is_none());
        assert!(scene.describe("Missing", 1.0).is_none());
    }

    #[test]
    fn test_validation() {
        let duplicate = "[[plugin]]\nname = \"A\"\nkind = \"Node\"\n[[plugin]]\nname = \"A\"\nkind = \"Node\"\n";
        assert!(matches!(
            SceneFile::parse(duplicate),
            Err(SceneError::DuplicateName(name)) if name == "A"
        ));

        let missing = "default_material = \"Nope\"\n";
        assert!(matches!(
            SceneFile::parse(missing),
            Err(SceneError::MissingMaterial(_))
        ));

        assert!(matches!(
            SceneFile::parse("[[plugin]]\nkind = \"Node\"\n"),
            Err(SceneError::Parse(_))
        ));
    }

    #[test]
    fn test_empty_kind_is_loaded() {
        let scene = SceneFile::parse("[[plugin]]\nname = \"Broken\"\n").unwrap();
        assert!(!scene.describe("Broken", 1.0).unwrap().is_valid());
    }

    #[test]
    fn test_load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BOX_SCENE.as_bytes()).unwrap();
        let scene = SceneFile::load(file.path()).unwrap();
        assert_eq!(scene.plugins.len(), 3);

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SceneFile::load(&dir.path().join("missing.toml")),
            Err(SceneError::Io { .. })
        ));
    }
}
