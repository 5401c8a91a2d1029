//! Attribute values carried by plugin descriptions
//!
//! The value model is closed: every kind the renderer understands has its own
//! variant, and lists are split per element kind so a list can never mix
//! element types.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// RGB color
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }
}

/// RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl AColor {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

/// 3D vector
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// 3x3 matrix stored as three column vectors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub v0: Vector,
    pub v1: Vector,
    pub v2: Vector,
}

impl Matrix {
    pub const fn identity() -> Self {
        Self {
            v0: Vector::new(1.0, 0.0, 0.0),
            v1: Vector::new(0.0, 1.0, 0.0),
            v2: Vector::new(0.0, 0.0, 1.0),
        }
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Self::identity()
    }
}

/// Affine transform: rotation/scale matrix plus translation
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform {
    pub matrix: Matrix,
    pub offset: Vector,
}

impl Transform {
    pub const fn identity() -> Self {
        Self {
            matrix: Matrix::identity(),
            offset: Vector::new(0.0, 0.0, 0.0),
        }
    }

    pub const fn translation(offset: Vector) -> Self {
        Self {
            matrix: Matrix::identity(),
            offset,
        }
    }
}

/// Reference to another plugin, optionally to one of its output sockets
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PluginRef {
    pub plugin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl PluginRef {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            output: None,
        }
    }

    pub fn with_output(plugin: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            output: Some(output.into()),
        }
    }

    /// A handle that points nowhere; returned when an export was rejected
    pub fn is_empty(&self) -> bool {
        self.plugin.is_empty()
    }
}

/// One UV/color channel of a mesh
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MapChannel {
    pub faces: Vec<i32>,
    pub vertices: Vec<Vector>,
}

/// A single instance emitted by an instancer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceItem {
    pub index: i32,
    pub tm: Transform,
    pub vel: Transform,
    pub node: PluginRef,
}

/// Instancer payload: every instance alive at `frame`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Instancer {
    pub frame: i32,
    pub items: Vec<InstanceItem>,
}

/// A typed attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    /// Placeholder for values the producer could not resolve; never sent
    Unknown,
    Int(i32),
    Float(f32),
    String(String),
    Color(Color),
    AColor(AColor),
    Vector(Vector),
    Transform(Transform),
    Matrix(Matrix),
    Plugin(PluginRef),
    ListInt(Vec<i32>),
    ListFloat(Vec<f32>),
    ListVector(Vec<Vector>),
    ListColor(Vec<Color>),
    ListString(Vec<String>),
    ListPlugin(Vec<PluginRef>),
    /// Channel name -> channel data, in insertion order
    MapChannels(IndexMap<String, MapChannel>),
    Instancer(Instancer),
}

impl AttrValue {
    /// Short type name used in log output
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Color(_) => "color",
            Self::AColor(_) => "acolor",
            Self::Vector(_) => "vector",
            Self::Transform(_) => "transform",
            Self::Matrix(_) => "matrix",
            Self::Plugin(_) => "plugin",
            Self::ListInt(_) => "list<int>",
            Self::ListFloat(_) => "list<float>",
            Self::ListVector(_) => "list<vector>",
            Self::ListColor(_) => "list<color>",
            Self::ListString(_) => "list<string>",
            Self::ListPlugin(_) => "list<plugin>",
            Self::MapChannels(_) => "map_channels",
            Self::Instancer(_) => "instancer",
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<f32> for AttrValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Color> for AttrValue {
    fn from(v: Color) -> Self {
        Self::Color(v)
    }
}

impl From<AColor> for AttrValue {
    fn from(v: AColor) -> Self {
        Self::AColor(v)
    }
}

impl From<Vector> for AttrValue {
    fn from(v: Vector) -> Self {
        Self::Vector(v)
    }
}

impl From<Transform> for AttrValue {
    fn from(v: Transform) -> Self {
        Self::Transform(v)
    }
}

impl From<Matrix> for AttrValue {
    fn from(v: Matrix) -> Self {
        Self::Matrix(v)
    }
}

impl From<PluginRef> for AttrValue {
    fn from(v: PluginRef) -> Self {
        Self::Plugin(v)
    }
}

impl From<Instancer> for AttrValue {
    fn from(v: Instancer) -> Self {
        Self::Instancer(v)
    }
}
