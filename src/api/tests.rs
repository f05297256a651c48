//! API instance tests
//!
//! - Calls through frames with the mock engine
//! - Misuse policy and release dispatch
//! - Native table adapter over fake C entry points

use super::native::*;
use super::*;
use crate::handle::kinds::{GString, PackedInt32Array};
use crate::handle::Handle;
use crate::testing::{mock_api, CountingAllocator, MockEngine};
use std::sync::atomic::{AtomicUsize, Ordering};

// ===== Calls =====

/// Adds the Int payloads of every Variant argument
unsafe extern "C" fn sum_variants(
    _instance: *mut c_void,
    args: *const *const c_void,
    argc: i64,
    ret: *mut c_void,
) {
    let mut total: i64 = 0;
    for i in 0..argc as usize {
        let raw = &*(*args.add(i) as *const VariantRaw);
        total += raw.payload_word() as i64;
    }
    let mut out = VariantRaw::tagged(VariantType::Int);
    out.set_payload_word(total as Word);
    *(ret as *mut VariantRaw) = out;
}

unsafe extern "C" fn multiply_words(
    _instance: *mut c_void,
    args: *const *const c_void,
    argc: i64,
    ret: *mut c_void,
) {
    let mut product: Word = 1;
    for i in 0..argc as usize {
        product *= *(*args.add(i) as *const Word);
    }
    *(ret as *mut Word) = product;
}

#[test]
fn call_variant_passes_references() {
    let setup = mock_api(MisusePolicy::Error);
    let lifetime = Lifetime::new(&setup.api);
    let a = Variant::new(&lifetime, 40i64).unwrap();
    let b = Variant::new(&lifetime, 2i64).unwrap();

    let frames_before = setup.allocator.outstanding();
    // SAFETY: sum_variants reads Int Variants and writes one back
    let sum = unsafe {
        setup
            .api
            .call_variant(&lifetime, sum_variants, core::ptr::null_mut(), &[&a, &b])
    }
    .unwrap();
    assert_eq!(sum.to::<i64>().unwrap(), 42);
    assert_eq!(sum.lifetime_id(), lifetime.id());
    assert_eq!(setup.allocator.outstanding(), frames_before);
}

#[test]
fn call_variant_rejects_foreign_arguments() {
    let home = mock_api(MisusePolicy::Error);
    let other = mock_api(MisusePolicy::Error);
    let lifetime = Lifetime::new(&home.api);
    let foreign_lifetime = Lifetime::new(&other.api);
    let foreign = Variant::new(&foreign_lifetime, 1i64).unwrap();

    // SAFETY: rejected before the call is made
    let err = unsafe {
        home.api
            .call_variant(&lifetime, sum_variants, core::ptr::null_mut(), &[&foreign])
    }
    .unwrap_err();
    assert!(matches!(err, Error::ForeignApi));
}

#[test]
fn call_words_round_trips() {
    let setup = mock_api(MisusePolicy::Error);
    // SAFETY: multiply_words reads argc word slots
    let product =
        unsafe { setup.api.call_words(multiply_words, core::ptr::null_mut(), &[2, 3, 7]) }
            .unwrap();
    assert_eq!(product, 42);

    let args = [1; MAX_ARGS + 1];
    // SAFETY: rejected before the call is made
    let err = unsafe { setup.api.call_words(multiply_words, core::ptr::null_mut(), &args) }
        .unwrap_err();
    assert!(matches!(err, Error::TooManyArgs { got: 17, .. }));
}

// ===== Policy and release =====

#[test]
fn misuse_returns_error_by_default() {
    let setup = mock_api(MisusePolicy::Error);
    assert_eq!(setup.api.misuse_policy(), MisusePolicy::Error);
    assert!(matches!(setup.api.misuse(Error::Released), Error::Released));
}

#[test]
#[should_panic(expected = "different API instance")]
fn misuse_panics_under_panic_policy() {
    let setup = mock_api(MisusePolicy::Panic);
    setup.api.misuse(Error::ForeignApi);
}

#[test]
fn release_dispatches_by_kind() {
    let setup = mock_api(MisusePolicy::Error);
    let lifetime = Lifetime::new(&setup.api);
    Handle::<GString>::construct(&lifetime).unwrap();
    Handle::<PackedInt32Array>::construct(&lifetime).unwrap();
    setup.engine.new_array(&lifetime, &[4]).unwrap();
    assert_eq!(setup.engine.live_objects(), 3);
    lifetime.end();
    assert_eq!(setup.engine.live_objects(), 0);
}

#[test]
fn builder_defaults() {
    let allocator = Arc::new(CountingAllocator::new());
    let engine = Arc::new(MockEngine::new(allocator.clone()));
    let api = Api::builder(engine).build();
    assert_eq!(api.misuse_policy(), MisusePolicy::Error);
    assert_eq!(api.registry().operator_count(), 0);
    // frames come from the system allocator, not the counting one
    let frame = api.new_frame().unwrap();
    drop(frame);
    assert_eq!(allocator.total(), 0);
}

#[test]
fn system_allocator_is_aligned() {
    let allocator = SystemAllocator;
    for size in [0, 1, 24, 4096] {
        let ptr = allocator.allocate(size).unwrap();
        assert_eq!(ptr.as_ptr() as usize % SystemAllocator::ALIGN, 0);
        // SAFETY: allocated just above with the same size
        unsafe { allocator.free(ptr, size) };
    }
}

// ===== Native table =====
//
// Fake engine: Int is the only kind with converters and constructors;
// Variants are plain bits, destroy calls are counted.

static DESTROYED: AtomicUsize = AtomicUsize::new(0);
static PTR_DESTROYED: AtomicUsize = AtomicUsize::new(0);
static ALLOCATED: AtomicUsize = AtomicUsize::new(0);

/// Size header in front of every block so `mem_free` can rebuild the layout
const HEADER: usize = 16;

unsafe extern "C" fn fake_mem_alloc(size: usize) -> *mut c_void {
    let layout = std::alloc::Layout::from_size_align_unchecked(size + HEADER, HEADER);
    let base = std::alloc::alloc(layout);
    *(base as *mut usize) = size;
    ALLOCATED.fetch_add(1, Ordering::SeqCst);
    base.add(HEADER) as *mut c_void
}

unsafe extern "C" fn fake_mem_free(ptr: *mut c_void) {
    let base = (ptr as *mut u8).sub(HEADER);
    let size = *(base as *const usize);
    std::alloc::dealloc(
        base,
        std::alloc::Layout::from_size_align_unchecked(size + HEADER, HEADER),
    );
    ALLOCATED.fetch_sub(1, Ordering::SeqCst);
}

unsafe extern "C" fn fake_new_copy(dst: VariantPtr, src: ConstVariantPtr) {
    *(dst as *mut VariantRaw) = *(src as *const VariantRaw);
}

unsafe extern "C" fn fake_new_nil(dst: VariantPtr) {
    *(dst as *mut VariantRaw) = VariantRaw::nil();
}

unsafe extern "C" fn fake_destroy(_value: VariantPtr) {
    DESTROYED.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn fake_evaluate(
    op: u32,
    a: ConstVariantPtr,
    b: ConstVariantPtr,
    ret: VariantPtr,
    valid: *mut u8,
) {
    let (a, b) = (&*(a as *const VariantRaw), &*(b as *const VariantRaw));
    if op == Operator::Add.tag() && a.ty() == Some(VariantType::Int) && b.ty() == a.ty() {
        let mut out = VariantRaw::tagged(VariantType::Int);
        out.set_payload_word(a.payload_word() + b.payload_word());
        *(ret as *mut VariantRaw) = out;
        *valid = 1;
    } else {
        *valid = 0;
    }
}

unsafe extern "C" fn fake_hash(value: ConstVariantPtr) -> i64 {
    (*(value as *const VariantRaw)).payload_word() as i64 * 31
}

unsafe extern "C" fn fake_booleanize(value: ConstVariantPtr) -> u8 {
    ((*(value as *const VariantRaw)).payload_word() != 0) as u8
}

unsafe extern "C" fn fake_iter_init(_src: ConstVariantPtr, _iter: VariantPtr, valid: *mut u8) -> u8 {
    *valid = 0;
    0
}

unsafe extern "C" fn fake_iter_next(_src: ConstVariantPtr, _iter: VariantPtr, valid: *mut u8) -> u8 {
    *valid = 0;
    0
}

unsafe extern "C" fn fake_iter_get(
    _src: ConstVariantPtr,
    _iter: VariantPtr,
    _ret: VariantPtr,
    valid: *mut u8,
) {
    *valid = 0;
}

unsafe extern "C" fn int_from_type(dst: VariantPtr, src: TypePtr) {
    let mut raw = VariantRaw::tagged(VariantType::Int);
    raw.set_payload_word(*(src as *const Word));
    *(dst as *mut VariantRaw) = raw;
}

unsafe extern "C" fn int_to_type(dst: TypePtr, src: VariantPtr) {
    *(dst as *mut Word) = (*(src as *const VariantRaw)).payload_word();
}

unsafe extern "C" fn int_construct(base: TypePtr, _args: *const *const c_void) {
    *(base as *mut Word) = 0;
}

unsafe extern "C" fn string_construct(base: TypePtr, _args: *const *const c_void) {
    *(base as *mut Word) = 0x5157;
}

unsafe extern "C" fn string_copy(base: TypePtr, args: *const *const c_void) {
    *(base as *mut Word) = *(*args as *const Word) + 1;
}

unsafe extern "C" fn string_destroy(_base: TypePtr) {
    PTR_DESTROYED.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn fake_from_type(ty: u32) -> Option<VariantFromTypeFn> {
    (ty == VariantType::Int.tag()).then_some(int_from_type as VariantFromTypeFn)
}

unsafe extern "C" fn fake_to_type(ty: u32) -> Option<TypeFromVariantFn> {
    (ty == VariantType::Int.tag()).then_some(int_to_type as TypeFromVariantFn)
}

unsafe extern "C" fn fake_ptr_constructor(ty: u32, index: i32) -> Option<PtrConstructorFn> {
    match (VariantType::from_tag(ty)?, index) {
        (VariantType::Int, 0) => Some(int_construct as PtrConstructorFn),
        (VariantType::String, 0) => Some(string_construct as PtrConstructorFn),
        (VariantType::String, 1) => Some(string_copy as PtrConstructorFn),
        _ => None,
    }
}

unsafe extern "C" fn fake_ptr_destructor(ty: u32) -> Option<PtrDestructorFn> {
    (ty == VariantType::String.tag()).then_some(string_destroy as PtrDestructorFn)
}

static INTERFACE: NativeInterface = NativeInterface {
    mem_alloc: fake_mem_alloc,
    mem_free: fake_mem_free,
    variant_new_copy: fake_new_copy,
    variant_new_nil: fake_new_nil,
    variant_destroy: fake_destroy,
    variant_evaluate: fake_evaluate,
    variant_hash: fake_hash,
    variant_booleanize: fake_booleanize,
    variant_iter_init: fake_iter_init,
    variant_iter_next: fake_iter_next,
    variant_iter_get: fake_iter_get,
    get_variant_from_type_constructor: fake_from_type,
    get_variant_to_type_constructor: fake_to_type,
    get_ptr_constructor: fake_ptr_constructor,
    get_ptr_destructor: fake_ptr_destructor,
};

fn ffi_api() -> Arc<Api> {
    // SAFETY: INTERFACE is a static table of valid fakes
    let (engine, allocator) = unsafe { (FfiEngine::new(&INTERFACE), NativeAllocator::new(&INTERFACE)) };
    Api::builder(Arc::new(engine))
        .allocator(Arc::new(allocator))
        .build()
}

#[test]
fn ffi_engine_converts_through_cached_entries() {
    let api = ffi_api();
    let lifetime = Lifetime::new(&api);
    let v = Variant::new(&lifetime, 1234i64).unwrap();
    assert_eq!(v.ty().unwrap(), VariantType::Int);
    assert_eq!(v.to::<i64>().unwrap(), 1234);
    assert_eq!(v.hash().unwrap(), 1234 * 31);
    assert!(v.booleanize().unwrap());

    let zero = Variant::construct(&lifetime, VariantType::Int).unwrap();
    assert_eq!(zero.to::<i64>().unwrap(), 0);

    assert!(matches!(
        Variant::new(&lifetime, 1.0f64),
        Err(Error::ConstructionFailed(VariantType::Float))
    ));
}

#[test]
fn ffi_engine_evaluates_and_destroys() {
    let api = ffi_api();
    let lifetime = Lifetime::new(&api);
    let a = Variant::new(&lifetime, 20i64).unwrap();
    let b = Variant::new(&lifetime, 22i64).unwrap();
    let sum = a.evaluate(Operator::Add, Some(&b), &lifetime).unwrap();
    assert_eq!(sum.to::<i64>().unwrap(), 42);
    assert!(a.evaluate(Operator::Less, Some(&b), &lifetime).is_err());

    let before = DESTROYED.load(Ordering::SeqCst);
    assert_eq!(lifetime.end(), 3);
    assert!(DESTROYED.load(Ordering::SeqCst) >= before + 3);
}

#[test]
fn ffi_engine_builtin_lifecycle() {
    let api = ffi_api();
    let lifetime = Lifetime::new(&api);
    let string = Handle::<GString>::construct(&lifetime).unwrap();
    assert_eq!(string.storage().unwrap().words(), &[0x5157]);
    let copy = string.retain(&lifetime).unwrap();
    assert_eq!(copy.storage().unwrap().words(), &[0x5158]);

    let before = PTR_DESTROYED.load(Ordering::SeqCst);
    copy.free().unwrap();
    string.free().unwrap();
    assert_eq!(PTR_DESTROYED.load(Ordering::SeqCst), before + 2);

    assert!(matches!(
        Handle::<PackedInt32Array>::construct(&lifetime),
        Err(Error::ConstructionFailed(VariantType::PackedInt32Array))
    ));
}

#[test]
fn ffi_engine_reports_invalid_iteration() {
    let api = ffi_api();
    let lifetime = Lifetime::new(&api);
    let v = Variant::new(&lifetime, 3i64).unwrap();
    let mut iter = v.iter().unwrap();
    assert!(matches!(iter.next(), Err(Error::IteratorInvalidated)));
}

#[test]
fn native_allocator_backs_frames() {
    let api = ffi_api();
    let before = ALLOCATED.load(Ordering::SeqCst);
    let mut frame = api.new_frame().unwrap();
    assert_eq!(ALLOCATED.load(Ordering::SeqCst), before + 1);
    frame.set(0, 6);
    assert_eq!(frame.read(0), 6);
    frame.free();
    assert_eq!(ALLOCATED.load(Ordering::SeqCst), before);
}
