//! Value-level type definitions shared by the parser, type inference,
//! compiler and execution engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// GLSL type of a node port or uniform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GlslType {
    Float,
    Int,
    UInt,
    Bool,
    Vec2,
    Vec3,
    Vec4,
    UVec2,
    UVec3,
    UVec4,
    Mat2,
    Mat3,
    Mat4,
    #[serde(rename = "sampler2D")]
    Sampler2D,
    SamplerCube,
    /// Fixed-size array of a scalar/vector element type.
    Array(Box<GlslType>, u32),
}

impl GlslType {
    /// Map a GLSL source token to a type, e.g. `"vec3"` -> `Vec3`.
    /// Array suffixes are handled by the signature parser, not here.
    pub fn from_token(token: &str) -> Option<GlslType> {
        Some(match token {
            "float" => GlslType::Float,
            "int" => GlslType::Int,
            "uint" => GlslType::UInt,
            "bool" => GlslType::Bool,
            "vec2" => GlslType::Vec2,
            "vec3" => GlslType::Vec3,
            "vec4" => GlslType::Vec4,
            "uvec2" => GlslType::UVec2,
            "uvec3" => GlslType::UVec3,
            "uvec4" => GlslType::UVec4,
            "mat2" => GlslType::Mat2,
            "mat3" => GlslType::Mat3,
            "mat4" => GlslType::Mat4,
            "sampler2D" => GlslType::Sampler2D,
            "samplerCube" => GlslType::SamplerCube,
            _ => return None,
        })
    }

    /// GLSL source spelling of this type.
    pub fn glsl(&self) -> String {
        match self {
            GlslType::Float => "float".to_string(),
            GlslType::Int => "int".to_string(),
            GlslType::UInt => "uint".to_string(),
            GlslType::Bool => "bool".to_string(),
            GlslType::Vec2 => "vec2".to_string(),
            GlslType::Vec3 => "vec3".to_string(),
            GlslType::Vec4 => "vec4".to_string(),
            GlslType::UVec2 => "uvec2".to_string(),
            GlslType::UVec3 => "uvec3".to_string(),
            GlslType::UVec4 => "uvec4".to_string(),
            GlslType::Mat2 => "mat2".to_string(),
            GlslType::Mat3 => "mat3".to_string(),
            GlslType::Mat4 => "mat4".to_string(),
            GlslType::Sampler2D => "sampler2D".to_string(),
            GlslType::SamplerCube => "samplerCube".to_string(),
            GlslType::Array(elem, n) => format!("{}[{}]", elem.glsl(), n),
        }
    }

    pub fn is_sampler(&self) -> bool {
        matches!(self, GlslType::Sampler2D | GlslType::SamplerCube)
    }

    /// Component count within the implicit-cast family of scalar/vector
    /// values that graph edges may carry across mismatched ports; `None`
    /// for everything outside it.
    fn numeric_components(&self) -> Option<u8> {
        match self {
            GlslType::Float | GlslType::Int => Some(1),
            GlslType::Vec2 => Some(2),
            GlslType::Vec3 => Some(3),
            GlslType::Vec4 => Some(4),
            _ => None,
        }
    }
}

/// Whether an edge carrying `from` may legally feed a port of type `to`.
///
/// Rules, in order:
/// - identical types always connect;
/// - any producer may feed a texture slot (this is how multi-pass chaining
///   works: the upstream node's rendered output is sampled);
/// - within the numeric scalar/vector family {float, int, vec2..vec4},
///   widening casts only: the target must have at least as many components
///   as the source (the compiler materializes the splat). Narrowing would
///   silently drop channels, so a vec3 output never feeds a float port.
///
/// Everything else (bool, uint, matrices, arrays, cross-family) is refused
/// and the edge gets pruned on the next inference tick.
pub fn can_cast(from: &GlslType, to: &GlslType) -> bool {
    if from == to {
        return true;
    }
    if to.is_sampler() {
        return true;
    }
    match (from.numeric_components(), to.numeric_components()) {
        (Some(f), Some(t)) => f <= t,
        _ => false,
    }
}

/// A typed uniform value. One variant per declared GLSL type, so invalid
/// shapes are unrepresentable at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    UInt(u32),
    Bool(bool),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    UVec2([u32; 2]),
    UVec3([u32; 3]),
    UVec4([u32; 4]),
    Mat2([f32; 4]),
    Mat3([f32; 9]),
    Mat4([f32; 16]),
    FloatArray(Vec<f32>),
    IntArray(Vec<i32>),
    Vec2Array(Vec<[f32; 2]>),
    Vec3Array(Vec<[f32; 3]>),
    Vec4Array(Vec<[f32; 4]>),
    /// Texture slot contents for unconnected sampler inputs.
    Texture(TextureSource),
}

impl UniformValue {
    /// Type-appropriate default used when an overload switch exposes a new
    /// input port.
    pub fn default_for(ty: &GlslType) -> UniformValue {
        match ty {
            GlslType::Float => UniformValue::Float(0.0),
            GlslType::Int => UniformValue::Int(0),
            GlslType::UInt => UniformValue::UInt(0),
            GlslType::Bool => UniformValue::Bool(false),
            GlslType::Vec2 => UniformValue::Vec2([0.0; 2]),
            GlslType::Vec3 => UniformValue::Vec3([0.0; 3]),
            GlslType::Vec4 => UniformValue::Vec4([0.0, 0.0, 0.0, 1.0]),
            GlslType::UVec2 => UniformValue::UVec2([0; 2]),
            GlslType::UVec3 => UniformValue::UVec3([0; 3]),
            GlslType::UVec4 => UniformValue::UVec4([0; 4]),
            GlslType::Mat2 => UniformValue::Mat2([1.0, 0.0, 0.0, 1.0]),
            GlslType::Mat3 => {
                UniformValue::Mat3([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
            }
            GlslType::Mat4 => {
                let mut m = [0.0; 16];
                m[0] = 1.0;
                m[5] = 1.0;
                m[10] = 1.0;
                m[15] = 1.0;
                UniformValue::Mat4(m)
            }
            GlslType::Sampler2D | GlslType::SamplerCube => {
                UniformValue::Texture(TextureSource::Builtin("black".to_string()))
            }
            GlslType::Array(elem, n) => match elem.as_ref() {
                GlslType::Int => UniformValue::IntArray(vec![0; *n as usize]),
                GlslType::Vec2 => UniformValue::Vec2Array(vec![[0.0; 2]; *n as usize]),
                GlslType::Vec3 => UniformValue::Vec3Array(vec![[0.0; 3]; *n as usize]),
                GlslType::Vec4 => UniformValue::Vec4Array(vec![[0.0; 4]; *n as usize]),
                _ => UniformValue::FloatArray(vec![0.0; *n as usize]),
            },
        }
    }

    /// The declared type this value satisfies, if it maps to exactly one.
    pub fn glsl_type(&self) -> Option<GlslType> {
        Some(match self {
            UniformValue::Float(_) => GlslType::Float,
            UniformValue::Int(_) => GlslType::Int,
            UniformValue::UInt(_) => GlslType::UInt,
            UniformValue::Bool(_) => GlslType::Bool,
            UniformValue::Vec2(_) => GlslType::Vec2,
            UniformValue::Vec3(_) => GlslType::Vec3,
            UniformValue::Vec4(_) => GlslType::Vec4,
            UniformValue::UVec2(_) => GlslType::UVec2,
            UniformValue::UVec3(_) => GlslType::UVec3,
            UniformValue::UVec4(_) => GlslType::UVec4,
            UniformValue::Mat2(_) => GlslType::Mat2,
            UniformValue::Mat3(_) => GlslType::Mat3,
            UniformValue::Mat4(_) => GlslType::Mat4,
            _ => return None,
        })
    }
}

/// Where a sampler uniform gets its pixels from, resolved once at compile
/// time from the editor's `scheme://id` string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum TextureSource {
    /// Another node's rendered output.
    NodeOutput(String),
    /// The previous frame's output of a self-feedback node (the active
    /// half of its ping-pong pair).
    FeedbackSlot(String),
    /// A user-uploaded bitmap resolved through the asset store.
    Asset(String),
    /// A built-in bitmap (`white`, `black`, `checker`).
    Builtin(String),
    /// An externally-driven dynamic buffer (simulation state, video frame).
    Dynamic(String),
}

impl TextureSource {
    pub fn id(&self) -> &str {
        match self {
            TextureSource::NodeOutput(id)
            | TextureSource::FeedbackSlot(id)
            | TextureSource::Asset(id)
            | TextureSource::Builtin(id)
            | TextureSource::Dynamic(id) => id,
        }
    }
}

impl FromStr for TextureSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((scheme, id)) = s.split_once("://") else {
            anyhow::bail!("texture reference missing scheme: {s}");
        };
        if id.is_empty() {
            anyhow::bail!("texture reference missing id: {s}");
        }
        Ok(match scheme {
            "node" => TextureSource::NodeOutput(id.to_string()),
            "feedback" => TextureSource::FeedbackSlot(id.to_string()),
            "asset" => TextureSource::Asset(id.to_string()),
            "builtin" => TextureSource::Builtin(id.to_string()),
            "dynamic" => TextureSource::Dynamic(id.to_string()),
            other => anyhow::bail!("unknown texture reference scheme: {other}"),
        })
    }
}

impl fmt::Display for TextureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (scheme, id) = match self {
            TextureSource::NodeOutput(id) => ("node", id),
            TextureSource::FeedbackSlot(id) => ("feedback", id),
            TextureSource::Asset(id) => ("asset", id),
            TextureSource::Builtin(id) => ("builtin", id),
            TextureSource::Dynamic(id) => ("dynamic", id),
        };
        write!(f, "{scheme}://{id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cast_matrix_widens_but_never_narrows() {
        let family = [
            (GlslType::Float, 1u8),
            (GlslType::Int, 1),
            (GlslType::Vec2, 2),
            (GlslType::Vec3, 3),
            (GlslType::Vec4, 4),
        ];
        for (a, na) in &family {
            for (b, nb) in &family {
                assert_eq!(can_cast(a, b), na <= nb, "{:?} -> {:?}", a, b);
            }
        }
        assert!(!can_cast(&GlslType::Vec3, &GlslType::Float));
        assert!(can_cast(&GlslType::Float, &GlslType::Vec3));
    }

    #[test]
    fn cast_matrix_rejects_non_numeric_mismatches() {
        assert!(!can_cast(&GlslType::Vec3, &GlslType::Mat3));
        assert!(!can_cast(&GlslType::Bool, &GlslType::Float));
        assert!(!can_cast(&GlslType::Float, &GlslType::UInt));
        assert!(!can_cast(
            &GlslType::Array(Box::new(GlslType::Float), 4),
            &GlslType::Float
        ));
    }

    #[test]
    fn anything_feeds_a_texture_slot() {
        assert!(can_cast(&GlslType::Vec4, &GlslType::Sampler2D));
        assert!(can_cast(&GlslType::Float, &GlslType::Sampler2D));
        assert!(can_cast(&GlslType::Mat4, &GlslType::SamplerCube));
    }

    #[test]
    fn texture_source_roundtrips_through_string_form() {
        let refs = [
            "node://blur_1",
            "feedback://sim_2",
            "asset://photo.png",
            "builtin://checker",
            "dynamic://camera",
        ];
        for s in refs {
            let parsed: TextureSource = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        assert!("blur_1".parse::<TextureSource>().is_err());
        assert!("node://".parse::<TextureSource>().is_err());
    }

    #[test]
    fn default_values_match_their_types() {
        assert_eq!(
            UniformValue::default_for(&GlslType::Vec4),
            UniformValue::Vec4([0.0, 0.0, 0.0, 1.0])
        );
        assert_eq!(
            UniformValue::default_for(&GlslType::Mat2).glsl_type(),
            Some(GlslType::Mat2)
        );
    }
}
