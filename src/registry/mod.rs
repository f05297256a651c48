//! Type/operator registry - engine names to internal tags
//!
//! Design: name lookups run over closed, lazily built tables; nothing past
//! registry construction compares strings. A [`Registry`] is built once per
//! API instance and carries the dense per-kind dispatch table plus, when
//! engine metadata is supplied, the operator signatures it reports.
//!
//! Unknown names are configuration errors: the registry refuses to build
//! rather than deferring the mismatch to call time.

mod metadata;


pub use metadata::{ApiMetadata, BuildSizes, BuiltinClass, ClassSize, Header, OperatorSignature};

use crate::error::{Error, Result};
use crate::variant::{Operator, VariantRaw, VariantType};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, error, info};

/// Size table checked against the binding's layouts
pub const BUILD_CONFIGURATION: &str = "float_64";

/// Metadata name meaning "any kind"
const ANY_TYPE: &str = "Variant";

static TYPE_NAMES: Lazy<HashMap<&'static str, VariantType>> = Lazy::new(|| {
    let mut names: HashMap<_, _> = VariantType::ALL.iter().map(|&ty| (ty.name(), ty)).collect();
    names.insert("Bool", VariantType::Bool);
    names.insert("Int", VariantType::Int);
    names.insert("Float", VariantType::Float);
    names
});

static OPERATOR_NAMES: Lazy<HashMap<&'static str, Operator>> = Lazy::new(|| {
    let mut names: HashMap<_, _> = Operator::ALL.iter().map(|&op| (op.name(), op)).collect();
    // Symbolic spellings used by the engine's API dump
    for (symbol, op) in [
        ("==", Operator::Equal),
        ("!=", Operator::NotEqual),
        ("<", Operator::Less),
        ("<=", Operator::LessEqual),
        (">", Operator::Greater),
        (">=", Operator::GreaterEqual),
        ("+", Operator::Add),
        ("-", Operator::Subtract),
        ("*", Operator::Multiply),
        ("/", Operator::Divide),
        ("unary-", Operator::Negate),
        ("unary+", Operator::Positive),
        ("%", Operator::Module),
        ("**", Operator::Power),
        ("<<", Operator::ShiftLeft),
        (">>", Operator::ShiftRight),
        ("&", Operator::BitAnd),
        ("|", Operator::BitOr),
        ("^", Operator::BitXor),
        ("~", Operator::BitNegate),
        ("and", Operator::LogicalAnd),
        ("or", Operator::LogicalOr),
        ("xor", Operator::LogicalXor),
        ("not", Operator::LogicalNegate),
        ("in", Operator::In),
    ] {
        names.insert(symbol, op);
    }
    names
});

/// Engine type name to discriminant
pub fn resolve_type(name: &str) -> Result<VariantType> {
    TYPE_NAMES.get(name).copied().ok_or_else(|| {
        error!(target: "registry", name, "unknown engine type");
        Error::UnknownType(name.to_owned())
    })
}

/// Engine operator name to operator tag
pub fn resolve_operator(name: &str) -> Result<Operator> {
    OPERATOR_NAMES.get(name).copied().ok_or_else(|| {
        error!(target: "registry", name, "unknown engine operator");
        Error::UnknownOperator(name.to_owned())
    })
}

/// Dispatch entry for one kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeEntry {
    pub ty: VariantType,
    pub name: &'static str,
    /// Bytes outside a Variant
    pub size: usize,
    /// Storage shape when held directly in a handle
    pub words: usize,
    /// No native destructor needed
    pub trivial: bool,
    /// Payload lives behind a pointer inside a Variant
    pub boxed: bool,
    pub iterable: bool,
}

impl TypeEntry {
    const fn of(ty: VariantType) -> Self {
        Self {
            ty,
            name: ty.name(),
            size: ty.size(),
            words: ty.storage_words(),
            trivial: ty.is_trivial(),
            boxed: ty.is_boxed(),
            iterable: ty.is_iterable(),
        }
    }
}

/// Either a specific kind or any kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Kind(VariantType),
    Any,
}

impl TypeRef {
    fn parse(name: &str) -> Result<Self> {
        if name == ANY_TYPE {
            Ok(Self::Any)
        } else {
            resolve_type(name).map(Self::Kind)
        }
    }
}

type OperatorKey = (Operator, VariantType, Option<TypeRef>);

/// Per-instance dispatch tables
pub struct Registry {
    types: [TypeEntry; VariantType::COUNT],
    operators: HashMap<OperatorKey, TypeRef>,
    version: Option<String>,
}

impl Registry {
    /// Dispatch table for the closed kind set, no operator signatures
    pub fn closed() -> Self {
        let mut types = [TypeEntry::of(VariantType::Nil); VariantType::COUNT];
        for ty in VariantType::ALL {
            types[ty.index()] = TypeEntry::of(ty);
        }
        Self {
            types,
            operators: HashMap::new(),
            version: None,
        }
    }

    /// Resolve every name in the engine metadata, failing on the first
    /// unknown one or on a size the binding's layouts disagree with
    pub fn from_metadata(metadata: &ApiMetadata) -> Result<Self> {
        let mut registry = Self::closed();
        registry.version = metadata
            .header
            .as_ref()
            .map(|header| header.version_full_name.clone())
            .filter(|name| !name.is_empty());

        if let Some(build) = metadata
            .builtin_class_sizes
            .iter()
            .find(|build| build.build_configuration == BUILD_CONFIGURATION)
        {
            for class in &build.sizes {
                registry.check_size(class)?;
            }
        }

        for class in &metadata.builtin_classes {
            let left = resolve_type(&class.name)?;
            for signature in &class.operators {
                let op = resolve_operator(&signature.name)?;
                let right = signature
                    .right_type
                    .as_deref()
                    .map(TypeRef::parse)
                    .transpose()?;
                let result = TypeRef::parse(&signature.return_type)?;
                registry.operators.insert((op, left, right), result);
            }
        }

        info!(
            target: "registry",
            version = registry.version.as_deref().unwrap_or("unknown"),
            classes = metadata.builtin_classes.len(),
            operators = registry.operators.len(),
            "registry built from engine metadata"
        );
        Ok(registry)
    }

    pub fn from_metadata_json(json: &str) -> Result<Self> {
        let metadata: ApiMetadata = serde_json::from_str(json)?;
        Self::from_metadata(&metadata)
    }

    /// Read and resolve a metadata file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(target: "registry", path = %path.display(), "loading engine metadata");
        let json = std::fs::read_to_string(path)?;
        Self::from_metadata_json(&json)
    }

    fn check_size(&self, class: &ClassSize) -> Result<()> {
        let expected = if class.name == ANY_TYPE {
            core::mem::size_of::<VariantRaw>()
        } else {
            self.entry(resolve_type(&class.name)?).size
        };
        if class.size != expected {
            error!(
                target: "registry",
                name = %class.name,
                expected,
                found = class.size,
                "builtin layout mismatch"
            );
            return Err(Error::LayoutMismatch {
                name: class.name.clone(),
                expected,
                found: class.size,
            });
        }
        Ok(())
    }

    #[inline]
    pub fn entry(&self, ty: VariantType) -> &TypeEntry {
        &self.types[ty.index()]
    }

    pub fn types(&self) -> &[TypeEntry] {
        &self.types
    }

    pub fn resolve_type(&self, name: &str) -> Result<&TypeEntry> {
        resolve_type(name).map(|ty| self.entry(ty))
    }

    pub fn resolve_operator(&self, name: &str) -> Result<Operator> {
        resolve_operator(name)
    }

    /// Result kind the engine reports for `left op right`
    ///
    /// An exact right-hand kind wins over an any-kind signature. `None` when
    /// the metadata lists no such overload.
    pub fn operator_result(
        &self,
        op: Operator,
        left: VariantType,
        right: Option<VariantType>,
    ) -> Option<TypeRef> {
        match right {
            None => self.operators.get(&(op, left, None)).copied(),
            Some(right) => self
                .operators
                .get(&(op, left, Some(TypeRef::Kind(right))))
                .or_else(|| self.operators.get(&(op, left, Some(TypeRef::Any))))
                .copied(),
        }
    }

    pub fn operator_count(&self) -> usize {
        self.operators.len()
    }

    /// Engine version named in the metadata header
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::closed()
    }
}

impl core::fmt::Debug for Registry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registry")
            .field("version", &self.version)
            .field("types", &self.types.len())
            .field("operators", &self.operators.len())
            .finish()
    }
}
