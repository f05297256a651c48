//! Engine value kinds and operators
//!
//! Discriminants match the engine's numeric tags exactly; they travel
//! across the boundary as `u32`.

use core::fmt;

/// Machine word stored in frame slots and handle storage
pub type Word = usize;

pub const WORD_SIZE: usize = core::mem::size_of::<Word>();

/// Closed set of engine value kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum VariantType {
    Nil = 0,
    Bool,
    Int,
    Float,
    String,
    Vector2,
    Vector2i,
    Rect2,
    Rect2i,
    Vector3,
    Vector3i,
    Transform2D,
    Vector4,
    Vector4i,
    Plane,
    Quaternion,
    Aabb,
    Basis,
    Transform3D,
    Projection,
    Color,
    StringName,
    NodePath,
    Rid,
    Object,
    Callable,
    Signal,
    Dictionary,
    Array,
    PackedByteArray,
    PackedInt32Array,
    PackedInt64Array,
    PackedFloat32Array,
    PackedFloat64Array,
    PackedStringArray,
    PackedVector2Array,
    PackedVector3Array,
    PackedColorArray,
}

impl VariantType {
    pub const COUNT: usize = 38;

    pub const ALL: [VariantType; Self::COUNT] = [
        Self::Nil,
        Self::Bool,
        Self::Int,
        Self::Float,
        Self::String,
        Self::Vector2,
        Self::Vector2i,
        Self::Rect2,
        Self::Rect2i,
        Self::Vector3,
        Self::Vector3i,
        Self::Transform2D,
        Self::Vector4,
        Self::Vector4i,
        Self::Plane,
        Self::Quaternion,
        Self::Aabb,
        Self::Basis,
        Self::Transform3D,
        Self::Projection,
        Self::Color,
        Self::StringName,
        Self::NodePath,
        Self::Rid,
        Self::Object,
        Self::Callable,
        Self::Signal,
        Self::Dictionary,
        Self::Array,
        Self::PackedByteArray,
        Self::PackedInt32Array,
        Self::PackedInt64Array,
        Self::PackedFloat32Array,
        Self::PackedFloat64Array,
        Self::PackedStringArray,
        Self::PackedVector2Array,
        Self::PackedVector3Array,
        Self::PackedColorArray,
    ];

    /// Decode a discriminant read from native memory
    #[inline]
    pub fn from_tag(tag: u32) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    #[inline]
    pub const fn tag(self) -> u32 {
        self as u32
    }

    /// Dense index into per-kind tables
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Canonical engine name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nil => "Nil",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "String",
            Self::Vector2 => "Vector2",
            Self::Vector2i => "Vector2i",
            Self::Rect2 => "Rect2",
            Self::Rect2i => "Rect2i",
            Self::Vector3 => "Vector3",
            Self::Vector3i => "Vector3i",
            Self::Transform2D => "Transform2D",
            Self::Vector4 => "Vector4",
            Self::Vector4i => "Vector4i",
            Self::Plane => "Plane",
            Self::Quaternion => "Quaternion",
            Self::Aabb => "AABB",
            Self::Basis => "Basis",
            Self::Transform3D => "Transform3D",
            Self::Projection => "Projection",
            Self::Color => "Color",
            Self::StringName => "StringName",
            Self::NodePath => "NodePath",
            Self::Rid => "RID",
            Self::Object => "Object",
            Self::Callable => "Callable",
            Self::Signal => "Signal",
            Self::Dictionary => "Dictionary",
            Self::Array => "Array",
            Self::PackedByteArray => "PackedByteArray",
            Self::PackedInt32Array => "PackedInt32Array",
            Self::PackedInt64Array => "PackedInt64Array",
            Self::PackedFloat32Array => "PackedFloat32Array",
            Self::PackedFloat64Array => "PackedFloat64Array",
            Self::PackedStringArray => "PackedStringArray",
            Self::PackedVector2Array => "PackedVector2Array",
            Self::PackedVector3Array => "PackedVector3Array",
            Self::PackedColorArray => "PackedColorArray",
        }
    }

    /// Size in bytes of the value outside a Variant (single precision build)
    pub const fn size(self) -> usize {
        match self {
            Self::Nil => 0,
            Self::Bool => 1,
            Self::Int | Self::Float => 8,
            Self::Vector2 | Self::Vector2i => 8,
            Self::Vector3 | Self::Vector3i => 12,
            Self::Rect2 | Self::Rect2i => 16,
            Self::Vector4 | Self::Vector4i | Self::Plane | Self::Quaternion | Self::Color => 16,
            Self::Transform2D | Self::Aabb => 24,
            Self::Basis => 36,
            Self::Transform3D => 48,
            Self::Projection => 64,
            Self::String
            | Self::StringName
            | Self::NodePath
            | Self::Rid
            | Self::Object
            | Self::Dictionary
            | Self::Array => 8,
            Self::Callable | Self::Signal => 16,
            Self::PackedByteArray
            | Self::PackedInt32Array
            | Self::PackedInt64Array
            | Self::PackedFloat32Array
            | Self::PackedFloat64Array
            | Self::PackedStringArray
            | Self::PackedVector2Array
            | Self::PackedVector3Array
            | Self::PackedColorArray => 16,
        }
    }

    /// Storage shape in machine words when held directly in a handle
    #[inline]
    pub const fn storage_words(self) -> usize {
        (self.size() + WORD_SIZE - 1) / WORD_SIZE
    }

    /// Payload does not fit the two inline Variant words
    #[inline]
    pub const fn is_boxed(self) -> bool {
        self.size() > 2 * WORD_SIZE
    }

    /// Plain bits; dropping them needs no native destructor
    pub const fn is_trivial(self) -> bool {
        !matches!(
            self,
            Self::String
                | Self::StringName
                | Self::NodePath
                | Self::Callable
                | Self::Signal
                | Self::Dictionary
                | Self::Array
                | Self::PackedByteArray
                | Self::PackedInt32Array
                | Self::PackedInt64Array
                | Self::PackedFloat32Array
                | Self::PackedFloat64Array
                | Self::PackedStringArray
                | Self::PackedVector2Array
                | Self::PackedVector3Array
                | Self::PackedColorArray
        )
    }

    /// Kinds the engine can iterate over
    pub const fn is_iterable(self) -> bool {
        matches!(
            self,
            Self::Int
                | Self::Float
                | Self::String
                | Self::Dictionary
                | Self::Array
                | Self::Object
                | Self::PackedByteArray
                | Self::PackedInt32Array
                | Self::PackedInt64Array
                | Self::PackedFloat32Array
                | Self::PackedFloat64Array
                | Self::PackedStringArray
                | Self::PackedVector2Array
                | Self::PackedVector3Array
                | Self::PackedColorArray
        )
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Engine operators, tags as the native evaluator expects them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum Operator {
    Equal = 0,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Negate,
    Positive,
    Module,
    Power,
    ShiftLeft,
    ShiftRight,
    BitAnd,
    BitOr,
    BitXor,
    BitNegate,
    LogicalAnd,
    LogicalOr,
    LogicalXor,
    LogicalNegate,
    In,
}

impl Operator {
    pub const COUNT: usize = 25;

    pub const ALL: [Operator; Self::COUNT] = [
        Self::Equal,
        Self::NotEqual,
        Self::Less,
        Self::LessEqual,
        Self::Greater,
        Self::GreaterEqual,
        Self::Add,
        Self::Subtract,
        Self::Multiply,
        Self::Divide,
        Self::Negate,
        Self::Positive,
        Self::Module,
        Self::Power,
        Self::ShiftLeft,
        Self::ShiftRight,
        Self::BitAnd,
        Self::BitOr,
        Self::BitXor,
        Self::BitNegate,
        Self::LogicalAnd,
        Self::LogicalOr,
        Self::LogicalXor,
        Self::LogicalNegate,
        Self::In,
    ];

    #[inline]
    pub fn from_tag(tag: u32) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    #[inline]
    pub const fn tag(self) -> u32 {
        self as u32
    }

    /// Name used in engine metadata
    pub const fn name(self) -> &'static str {
        match self {
            Self::Equal => "Equals",
            Self::NotEqual => "NotEqual",
            Self::Less => "Less",
            Self::LessEqual => "LessEqual",
            Self::Greater => "Greater",
            Self::GreaterEqual => "GreaterEqual",
            Self::Add => "Add",
            Self::Subtract => "Subtract",
            Self::Multiply => "Multiply",
            Self::Divide => "Divide",
            Self::Negate => "Negate",
            Self::Positive => "Positive",
            Self::Module => "Module",
            Self::Power => "Power",
            Self::ShiftLeft => "ShiftLeft",
            Self::ShiftRight => "ShiftRight",
            Self::BitAnd => "BitAnd",
            Self::BitOr => "BitOr",
            Self::BitXor => "BitXor",
            Self::BitNegate => "BitNegate",
            Self::LogicalAnd => "And",
            Self::LogicalOr => "Or",
            Self::LogicalXor => "Xor",
            Self::LogicalNegate => "Not",
            Self::In => "In",
        }
    }

    /// Operators taking no right operand
    #[inline]
    pub const fn is_unary(self) -> bool {
        matches!(
            self,
            Self::Negate | Self::Positive | Self::BitNegate | Self::LogicalNegate
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
