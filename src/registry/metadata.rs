//! Engine introspection metadata, as much of it as the registry reads

use serde::Deserialize;

/// Top level of the engine's API dump
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiMetadata {
    #[serde(default)]
    pub header: Option<Header>,
    #[serde(default)]
    pub builtin_class_sizes: Vec<BuildSizes>,
    #[serde(default)]
    pub builtin_classes: Vec<BuiltinClass>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub version_major: u32,
    #[serde(default)]
    pub version_minor: u32,
    #[serde(default)]
    pub version_patch: u32,
    #[serde(default)]
    pub version_full_name: String,
}

/// Builtin sizes for one build configuration (`float_64`, `double_32`, ...)
#[derive(Debug, Clone, Deserialize)]
pub struct BuildSizes {
    pub build_configuration: String,
    #[serde(default)]
    pub sizes: Vec<ClassSize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassSize {
    pub name: String,
    pub size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuiltinClass {
    pub name: String,
    #[serde(default)]
    pub is_keyed: bool,
    #[serde(default)]
    pub indexing_return_type: Option<String>,
    #[serde(default)]
    pub operators: Vec<OperatorSignature>,
}

/// One operator overload; no `right_type` means unary
#[derive(Debug, Clone, Deserialize)]
pub struct OperatorSignature {
    pub name: String,
    #[serde(default)]
    pub right_type: Option<String>,
    pub return_type: String,
}
