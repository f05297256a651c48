//! C function table adapter
//!
//! `NativeInterface` is the subset of engine entry points this crate calls;
//! the host fills it in from whatever the engine exposes.
//! `FfiEngine` resolves every per-kind entry (from/to-type converters, the
//! default and copy constructors, the destructor) once at construction, so
//! a call never goes through a lookup function.

use super::{Allocator, Engine};
use crate::variant::{Operator, VariantRaw, VariantType, Word};
use core::ffi::c_void;
use core::ptr::{self, NonNull};
use tracing::{debug, trace};

pub type VariantPtr = *mut c_void;
pub type ConstVariantPtr = *const c_void;
pub type TypePtr = *mut c_void;

/// `dst` Variant from a `src` value of the converter's kind
pub type VariantFromTypeFn = unsafe extern "C" fn(dst: VariantPtr, src: TypePtr);
/// `dst` value from a `src` Variant of the converter's kind
pub type TypeFromVariantFn = unsafe extern "C" fn(dst: TypePtr, src: VariantPtr);
pub type PtrConstructorFn = unsafe extern "C" fn(base: TypePtr, args: *const *const c_void);
pub type PtrDestructorFn = unsafe extern "C" fn(base: TypePtr);

/// Engine entry points, filled in by the host before building an [`FfiEngine`]
#[repr(C)]
pub struct NativeInterface {
    pub mem_alloc: unsafe extern "C" fn(size: usize) -> *mut c_void,
    pub mem_free: unsafe extern "C" fn(ptr: *mut c_void),

    pub variant_new_copy: unsafe extern "C" fn(dst: VariantPtr, src: ConstVariantPtr),
    pub variant_new_nil: unsafe extern "C" fn(dst: VariantPtr),
    pub variant_destroy: unsafe extern "C" fn(value: VariantPtr),
    pub variant_evaluate: unsafe extern "C" fn(
        op: u32,
        a: ConstVariantPtr,
        b: ConstVariantPtr,
        ret: VariantPtr,
        valid: *mut u8,
    ),
    pub variant_hash: unsafe extern "C" fn(value: ConstVariantPtr) -> i64,
    pub variant_booleanize: unsafe extern "C" fn(value: ConstVariantPtr) -> u8,
    pub variant_iter_init:
        unsafe extern "C" fn(src: ConstVariantPtr, iter: VariantPtr, valid: *mut u8) -> u8,
    pub variant_iter_next:
        unsafe extern "C" fn(src: ConstVariantPtr, iter: VariantPtr, valid: *mut u8) -> u8,
    pub variant_iter_get: unsafe extern "C" fn(
        src: ConstVariantPtr,
        iter: VariantPtr,
        ret: VariantPtr,
        valid: *mut u8,
    ),

    pub get_variant_from_type_constructor:
        unsafe extern "C" fn(ty: u32) -> Option<VariantFromTypeFn>,
    pub get_variant_to_type_constructor: unsafe extern "C" fn(ty: u32) -> Option<TypeFromVariantFn>,
    pub get_ptr_constructor:
        unsafe extern "C" fn(ty: u32, constructor: i32) -> Option<PtrConstructorFn>,
    pub get_ptr_destructor: unsafe extern "C" fn(ty: u32) -> Option<PtrDestructorFn>,
}

/// Constructor indices every builtin kind exposes
const DEFAULT_CONSTRUCTOR: i32 = 0;
const COPY_CONSTRUCTOR: i32 = 1;

/// Scratch space for one plain value (the largest is a Projection)
type ValueBuf = [u64; 8];

#[derive(Clone, Copy, Default)]
struct KindFns {
    from_type: Option<VariantFromTypeFn>,
    to_type: Option<TypeFromVariantFn>,
    construct: Option<PtrConstructorFn>,
    copy: Option<PtrConstructorFn>,
    destroy: Option<PtrDestructorFn>,
}

/// [`Engine`] backed by a native function table
pub struct FfiEngine {
    interface: &'static NativeInterface,
    kinds: [KindFns; VariantType::COUNT],
}

// SAFETY: the table is immutable and the engine's entry points are
// callable from any thread that holds the values involved
unsafe impl Send for FfiEngine {}
unsafe impl Sync for FfiEngine {}

impl FfiEngine {
    /// # Safety
    /// Every function in `interface` must be valid for the process lifetime
    /// and implement the engine ABI.
    pub unsafe fn new(interface: &'static NativeInterface) -> Self {
        let mut kinds = [KindFns::default(); VariantType::COUNT];
        for ty in VariantType::ALL.into_iter().skip(1) {
            let tag = ty.tag();
            let fns = &mut kinds[ty.index()];
            fns.from_type = (interface.get_variant_from_type_constructor)(tag);
            fns.to_type = (interface.get_variant_to_type_constructor)(tag);
            fns.construct = (interface.get_ptr_constructor)(tag, DEFAULT_CONSTRUCTOR);
            fns.copy = (interface.get_ptr_constructor)(tag, COPY_CONSTRUCTOR);
            if !ty.is_trivial() {
                fns.destroy = (interface.get_ptr_destructor)(tag);
            }
        }
        let resolved = kinds.iter().filter(|fns| fns.from_type.is_some()).count();
        debug!(target: "api", resolved, "native function table cached");
        Self { interface, kinds }
    }

    #[inline]
    fn kind(&self, ty: VariantType) -> &KindFns {
        &self.kinds[ty.index()]
    }
}

impl Engine for FfiEngine {
    fn variant_new_nil(&self) -> VariantRaw {
        let mut raw = VariantRaw::nil();
        // SAFETY: raw is a writable Variant-sized buffer
        unsafe { (self.interface.variant_new_nil)(raw.as_mut_ptr().cast()) };
        raw
    }

    fn variant_copy(&self, src: &VariantRaw) -> VariantRaw {
        let mut dst = VariantRaw::nil();
        // SAFETY: src is a live Variant, dst a writable buffer
        unsafe { (self.interface.variant_new_copy)(dst.as_mut_ptr().cast(), src.as_ptr().cast()) };
        dst
    }

    fn variant_destroy(&self, value: &mut VariantRaw) {
        // SAFETY: value is a live Variant owned by the caller
        unsafe { (self.interface.variant_destroy)(value.as_mut_ptr().cast()) };
        *value = VariantRaw::nil();
    }

    fn variant_construct(&self, ty: VariantType) -> Option<VariantRaw> {
        if ty == VariantType::Nil {
            return Some(self.variant_new_nil());
        }
        let fns = self.kind(ty);
        let (construct, from_type) = (fns.construct?, fns.from_type?);
        let mut value: ValueBuf = [0; 8];
        let mut raw = VariantRaw::nil();
        // SAFETY: value is large and aligned enough for any builtin kind;
        // the temporary is destroyed once the Variant holds its own copy
        unsafe {
            construct(value.as_mut_ptr().cast(), ptr::null());
            from_type(raw.as_mut_ptr().cast(), value.as_mut_ptr().cast());
            if let Some(destroy) = fns.destroy {
                destroy(value.as_mut_ptr().cast());
            }
        }
        Some(raw)
    }

    fn variant_from_type(&self, ty: VariantType, value: &[u8]) -> Option<VariantRaw> {
        let from_type = self.kind(ty).from_type?;
        let mut buf: ValueBuf = [0; 8];
        let len = value.len().min(core::mem::size_of::<ValueBuf>());
        let mut raw = VariantRaw::nil();
        // SAFETY: buf holds a copy of the value bytes for the converter to read
        unsafe {
            ptr::copy_nonoverlapping(value.as_ptr(), buf.as_mut_ptr().cast::<u8>(), len);
            from_type(raw.as_mut_ptr().cast(), buf.as_mut_ptr().cast());
        }
        Some(raw)
    }

    fn variant_to_type(&self, ty: VariantType, src: &VariantRaw, out: &mut [u8]) -> bool {
        let Some(to_type) = self.kind(ty).to_type else {
            return false;
        };
        let mut buf: ValueBuf = [0; 8];
        let mut src = *src;
        let len = out.len().min(core::mem::size_of::<ValueBuf>());
        // SAFETY: converter writes at most one value of `ty` into buf; src
        // is a bitwise copy the converter only reads
        unsafe {
            to_type(buf.as_mut_ptr().cast(), src.as_mut_ptr().cast());
            ptr::copy_nonoverlapping(buf.as_ptr().cast::<u8>(), out.as_mut_ptr(), len);
        }
        true
    }

    fn variant_evaluate(
        &self,
        op: Operator,
        left: &VariantRaw,
        right: &VariantRaw,
    ) -> Option<VariantRaw> {
        let mut ret = VariantRaw::nil();
        let mut valid = 0u8;
        // SAFETY: operands are live Variants, ret a writable buffer
        unsafe {
            (self.interface.variant_evaluate)(
                op.tag(),
                left.as_ptr().cast(),
                right.as_ptr().cast(),
                ret.as_mut_ptr().cast(),
                &mut valid,
            )
        };
        trace!(target: "api", %op, valid, "native evaluate");
        (valid != 0).then_some(ret)
    }

    fn variant_hash(&self, value: &VariantRaw) -> i64 {
        // SAFETY: value is a live Variant
        unsafe { (self.interface.variant_hash)(value.as_ptr().cast()) }
    }

    fn variant_booleanize(&self, value: &VariantRaw) -> bool {
        // SAFETY: value is a live Variant
        unsafe { (self.interface.variant_booleanize)(value.as_ptr().cast()) != 0 }
    }

    fn iter_init(&self, src: &VariantRaw, cursor: &mut VariantRaw) -> Option<bool> {
        let mut valid = 0u8;
        // SAFETY: src is live, cursor a writable Variant buffer
        let more = unsafe {
            (self.interface.variant_iter_init)(src.as_ptr().cast(), cursor.as_mut_ptr().cast(), &mut valid)
        };
        (valid != 0).then_some(more != 0)
    }

    fn iter_next(&self, src: &VariantRaw, cursor: &mut VariantRaw) -> Option<bool> {
        let mut valid = 0u8;
        // SAFETY: as in `iter_init`, cursor was initialised by it
        let more = unsafe {
            (self.interface.variant_iter_next)(src.as_ptr().cast(), cursor.as_mut_ptr().cast(), &mut valid)
        };
        (valid != 0).then_some(more != 0)
    }

    fn iter_get(&self, src: &VariantRaw, cursor: &mut VariantRaw) -> Option<VariantRaw> {
        let mut valid = 0u8;
        let mut ret = VariantRaw::nil();
        // SAFETY: as in `iter_next`; ret is a writable Variant buffer
        unsafe {
            (self.interface.variant_iter_get)(
                src.as_ptr().cast(),
                cursor.as_mut_ptr().cast(),
                ret.as_mut_ptr().cast(),
                &mut valid,
            )
        };
        (valid != 0).then_some(ret)
    }

    fn builtin_construct(&self, ty: VariantType, dst: &mut [Word]) -> bool {
        let Some(construct) = self.kind(ty).construct else {
            return false;
        };
        // SAFETY: dst has the storage shape of `ty`
        unsafe { construct(dst.as_mut_ptr().cast(), ptr::null()) };
        true
    }

    fn builtin_copy(&self, ty: VariantType, src: &[Word], dst: &mut [Word]) -> bool {
        let Some(copy) = self.kind(ty).copy else {
            return false;
        };
        let args = [src.as_ptr() as *const c_void];
        // SAFETY: src is a live `ty` value, dst has its storage shape
        unsafe { copy(dst.as_mut_ptr().cast(), args.as_ptr()) };
        true
    }

    fn builtin_destroy(&self, ty: VariantType, value: &mut [Word]) {
        if let Some(destroy) = self.kind(ty).destroy {
            // SAFETY: value is a live `ty` value owned by the caller
            unsafe { destroy(value.as_mut_ptr().cast()) };
        }
    }
}

/// [`Allocator`] backed by the engine's memory hooks
pub struct NativeAllocator {
    interface: &'static NativeInterface,
}

// SAFETY: the engine allocator is thread-safe
unsafe impl Send for NativeAllocator {}
unsafe impl Sync for NativeAllocator {}

impl NativeAllocator {
    /// # Safety
    /// `mem_alloc`/`mem_free` must be valid for the process lifetime.
    pub unsafe fn new(interface: &'static NativeInterface) -> Self {
        Self { interface }
    }
}

impl Allocator for NativeAllocator {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        // SAFETY: mem_alloc accepts any size
        NonNull::new(unsafe { (self.interface.mem_alloc)(size) }.cast())
    }

    unsafe fn free(&self, ptr: NonNull<u8>, _size: usize) {
        (self.interface.mem_free)(ptr.as_ptr().cast())
    }
}
