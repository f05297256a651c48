//! Plain values that convert to and from a Variant
//!
//! Conversion always goes through the engine's from/to-type entries for
//! the value's kind; the bytes handed over are the value's own layout.

use super::geometry::*;
use super::types::VariantType;

/// Value with a fixed engine kind and a plain, copyable layout
///
/// # Safety
/// `Self` must be `#[repr(C)]` (or a primitive) with exactly the layout the
/// engine uses for `TYPE`, and every bit pattern the engine writes for
/// `TYPE` must be a valid `Self`.
pub unsafe trait VariantValue: Copy + Default + 'static {
    const TYPE: VariantType;
}

macro_rules! variant_values {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            unsafe impl VariantValue for $ty {
                const TYPE: VariantType = VariantType::$kind;
            }
        )*
    };
}

variant_values! {
    bool => Bool,
    i64 => Int,
    f64 => Float,
    Vector2 => Vector2,
    Vector2i => Vector2i,
    Rect2 => Rect2,
    Rect2i => Rect2i,
    Vector3 => Vector3,
    Vector3i => Vector3i,
    Transform2D => Transform2D,
    Vector4 => Vector4,
    Vector4i => Vector4i,
    Plane => Plane,
    Quaternion => Quaternion,
    Aabb => Aabb,
    Basis => Basis,
    Transform3D => Transform3D,
    Projection => Projection,
    Color => Color,
    Rid => Rid,
}

#[inline]
pub(crate) fn as_bytes<T: VariantValue>(value: &T) -> &[u8] {
    // SAFETY: VariantValue types are plain data of size_of::<T>() bytes
    unsafe {
        core::slice::from_raw_parts(value as *const T as *const u8, core::mem::size_of::<T>())
    }
}

#[inline]
pub(crate) fn as_bytes_mut<T: VariantValue>(value: &mut T) -> &mut [u8] {
    // SAFETY: as above; the engine writes a valid T per the trait contract
    unsafe {
        core::slice::from_raw_parts_mut(value as *mut T as *mut u8, core::mem::size_of::<T>())
    }
}
