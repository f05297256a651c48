//! Builtin engine kinds that can be held directly in a [`Handle`](super::Handle)
//!
//! Storage shapes follow the engine's 64-bit layout: strings, names, paths,
//! arrays and dictionaries are one pointer; callables, signals and packed
//! arrays are two words.

use super::{Builtin, Kind, Release};
use crate::variant::VariantType;

macro_rules! builtin_kinds {
    ($($(#[$meta:meta])* $name:ident => $ty:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug)]
            pub enum $name {}

            impl Kind for $name {
                const WORDS: usize = VariantType::$ty.storage_words();
                const RELEASE: Release = Release::Builtin(VariantType::$ty);
            }

            impl Builtin for $name {
                const TYPE: VariantType = VariantType::$ty;
            }
        )*
    };
}

builtin_kinds! {
    /// Engine string (not a Rust `String`)
    GString => String,
    StringName => StringName,
    NodePath => NodePath,
    Callable => Callable,
    Signal => Signal,
    Dictionary => Dictionary,
    Array => Array,
    PackedByteArray => PackedByteArray,
    PackedInt32Array => PackedInt32Array,
    PackedInt64Array => PackedInt64Array,
    PackedFloat32Array => PackedFloat32Array,
    PackedFloat64Array => PackedFloat64Array,
    PackedStringArray => PackedStringArray,
    PackedVector2Array => PackedVector2Array,
    PackedVector3Array => PackedVector3Array,
    PackedColorArray => PackedColorArray,
}
