//! In-process stand-ins for the native side
//!
//! `CountingAllocator` tracks outstanding allocations so leak and
//! double-free checks reduce to one counter. `MockEngine` implements the
//! engine table on top of any allocator:
//!
//! - heap kinds (strings, arrays, dictionaries, callables, packed arrays)
//!   are refcounted objects holding a list of integers; a Variant keeps the
//!   object pointer in its first payload word, builtin storage in word 0
//! - large math kinds (Transform2D, AABB, Basis, Transform3D, Projection)
//!   live in allocator blocks behind the payload pointer
//! - everything else is inline payload bits

use crate::api::{Allocator, Api, Engine, SystemAllocator};
use crate::config::MisusePolicy;
use crate::error::Result;
use crate::lifetime::Lifetime;
use crate::variant::{Operator, Variant, VariantRaw, VariantType, Word, WORD_SIZE};
use core::ptr::NonNull;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;

/// System allocator that counts what is still outstanding
#[derive(Debug, Default)]
pub struct CountingAllocator {
    inner: SystemAllocator,
    outstanding: AtomicIsize,
    total: AtomicUsize,
    failing: AtomicBool,
}

impl CountingAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocations not yet freed
    pub fn outstanding(&self) -> isize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Allocations ever made
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Make every following allocation fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Allocator for CountingAllocator {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        if self.failing.load(Ordering::SeqCst) {
            return None;
        }
        let ptr = self.inner.allocate(size)?;
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        Some(ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        self.inner.free(ptr, size);
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MockObject {
    refs: AtomicUsize,
    items: Mutex<Vec<i64>>,
}

const OBJECT_SIZE: usize = core::mem::size_of::<MockObject>();

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }
}

/// Engine table implemented in Rust for tests and benches
pub struct MockEngine {
    allocator: Arc<dyn Allocator>,
    live: AtomicIsize,
    destroyed_ints: Mutex<Vec<i64>>,
}

impl MockEngine {
    pub fn new(allocator: Arc<dyn Allocator>) -> Self {
        Self {
            allocator,
            live: AtomicIsize::new(0),
            destroyed_ints: Mutex::new(Vec::new()),
        }
    }

    /// Fresh Array Variant holding `items`
    pub fn array(&self, items: &[i64]) -> VariantRaw {
        match self.new_object(items.to_vec()) {
            Some(word) => heap_raw(VariantType::Array, word),
            None => VariantRaw::nil(),
        }
    }

    /// Array Variant owned by `lifetime`
    pub fn new_array(&self, lifetime: &Lifetime, items: &[i64]) -> Result<Variant> {
        let raw = self.array(items);
        // SAFETY: fresh value nobody else owns
        unsafe { Variant::from_raw(lifetime, raw) }
    }

    /// Elements of a heap-kind Variant
    pub fn items(&self, raw: &VariantRaw) -> Option<Vec<i64>> {
        let ty = raw.ty()?;
        if ty.is_trivial() {
            return None;
        }
        object(raw.payload_word()).map(|obj| obj.items.lock().clone())
    }

    pub fn push(&self, raw: &VariantRaw, item: i64) {
        if let Some(obj) = self.heap_object(raw) {
            obj.items.lock().push(item);
        }
    }

    pub fn truncate(&self, raw: &VariantRaw, len: usize) {
        if let Some(obj) = self.heap_object(raw) {
            obj.items.lock().truncate(len);
        }
    }

    /// Reference count of the object behind a heap value (Variant payload
    /// word or builtin storage word 0)
    pub fn refcount(&self, word: Word) -> usize {
        object(word).map_or(0, |obj| obj.refs.load(Ordering::SeqCst))
    }

    /// Heap objects not yet destroyed
    pub fn live_objects(&self) -> isize {
        self.live.load(Ordering::SeqCst)
    }

    /// Int Variants destroyed so far, in order
    pub fn destroyed_ints(&self) -> Vec<i64> {
        self.destroyed_ints.lock().clone()
    }

    fn heap_object(&self, raw: &VariantRaw) -> Option<&MockObject> {
        match raw.ty() {
            Some(ty) if !ty.is_trivial() => object(raw.payload_word()),
            _ => None,
        }
    }

    fn new_object(&self, items: Vec<i64>) -> Option<Word> {
        let block = self.allocator.allocate(OBJECT_SIZE)?;
        let ptr = block.as_ptr() as *mut MockObject;
        // SAFETY: block is OBJECT_SIZE bytes and 16-byte aligned
        unsafe {
            ptr.write(MockObject {
                refs: AtomicUsize::new(1),
                items: Mutex::new(items),
            })
        };
        self.live.fetch_add(1, Ordering::SeqCst);
        Some(ptr as Word)
    }

    fn retain_object(&self, word: Word) {
        if let Some(obj) = object(word) {
            obj.refs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn release_object(&self, word: Word) {
        let Some(obj) = object(word) else {
            return;
        };
        if obj.refs.fetch_sub(1, Ordering::SeqCst) == 1 {
            let ptr = word as *mut MockObject;
            // SAFETY: last reference; the object was written by new_object
            unsafe {
                core::ptr::drop_in_place(ptr);
                self.allocator
                    .free(NonNull::new_unchecked(ptr as *mut u8), OBJECT_SIZE);
            }
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn new_block(&self, bytes: &[u8], size: usize) -> Option<Word> {
        let block = self.allocator.allocate(size)?;
        let len = bytes.len().min(size);
        // SAFETY: block holds `size` bytes
        unsafe {
            core::ptr::write_bytes(block.as_ptr(), 0, size);
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), block.as_ptr(), len);
        }
        Some(block.as_ptr() as Word)
    }

    fn free_block(&self, word: Word, size: usize) {
        if let Some(ptr) = NonNull::new(word as *mut u8) {
            // SAFETY: block came from new_block with the same size
            unsafe { self.allocator.free(ptr, size) };
        }
    }

    fn block_bytes(&self, word: Word, size: usize) -> &[u8] {
        if word == 0 {
            return &[];
        }
        // SAFETY: live block of `size` bytes from new_block
        unsafe { core::slice::from_raw_parts(word as *const u8, size) }
    }

    fn same(&self, left: &VariantRaw, right: &VariantRaw) -> bool {
        let (Some(lt), Some(rt)) = (left.ty(), right.ty()) else {
            return false;
        };
        if lt != rt {
            return false;
        }
        if !lt.is_trivial() {
            return self.items(left) == self.items(right);
        }
        if lt.is_boxed() {
            return self.block_bytes(left.payload_word(), lt.size())
                == self.block_bytes(right.payload_word(), rt.size());
        }
        left.payload() == right.payload()
    }

    fn len_of(&self, src: &VariantRaw) -> Option<i64> {
        match src.ty()? {
            VariantType::Int => Some(int_of(src)),
            ty if is_array_like(ty) => self.items(src).map(|items| items.len() as i64),
            _ => None,
        }
    }

    fn concat(&self, left: &VariantRaw, right: &VariantRaw) -> Option<VariantRaw> {
        let mut items = self.items(left)?;
        items.extend(self.items(right)?);
        self.new_object(items)
            .map(|word| heap_raw(VariantType::Array, word))
    }
}

impl Engine for MockEngine {
    fn variant_copy(&self, src: &VariantRaw) -> VariantRaw {
        let Some(ty) = src.ty() else {
            return VariantRaw::nil();
        };
        if !ty.is_trivial() {
            self.retain_object(src.payload_word());
            return *src;
        }
        if ty.is_boxed() {
            let bytes = self.block_bytes(src.payload_word(), ty.size()).to_vec();
            return match self.new_block(&bytes, ty.size()) {
                Some(word) => heap_raw(ty, word),
                None => VariantRaw::nil(),
            };
        }
        *src
    }

    fn variant_destroy(&self, value: &mut VariantRaw) {
        match value.ty() {
            Some(VariantType::Int) => self.destroyed_ints.lock().push(int_of(value)),
            Some(ty) if !ty.is_trivial() => self.release_object(value.payload_word()),
            Some(ty) if ty.is_boxed() => self.free_block(value.payload_word(), ty.size()),
            _ => {}
        }
        *value = VariantRaw::nil();
    }

    fn variant_construct(&self, ty: VariantType) -> Option<VariantRaw> {
        if !ty.is_trivial() {
            return self.new_object(Vec::new()).map(|word| heap_raw(ty, word));
        }
        if ty.is_boxed() {
            return self.new_block(&[], ty.size()).map(|word| heap_raw(ty, word));
        }
        Some(VariantRaw::tagged(ty))
    }

    fn variant_from_type(&self, ty: VariantType, value: &[u8]) -> Option<VariantRaw> {
        if ty == VariantType::Nil {
            return Some(VariantRaw::nil());
        }
        if !ty.is_trivial() {
            let word = Word::from_ne_bytes(value.get(..WORD_SIZE)?.try_into().ok()?);
            self.retain_object(word);
            return Some(heap_raw(ty, word));
        }
        if ty.is_boxed() {
            return self.new_block(value, ty.size()).map(|word| heap_raw(ty, word));
        }
        if value.len() > VariantRaw::PAYLOAD_BYTES {
            return None;
        }
        let mut raw = VariantRaw::tagged(ty);
        raw.payload_mut()[..value.len()].copy_from_slice(value);
        Some(raw)
    }

    fn variant_to_type(&self, ty: VariantType, src: &VariantRaw, out: &mut [u8]) -> bool {
        if src.ty() != Some(ty) {
            return false;
        }
        if !ty.is_trivial() {
            if out.len() < WORD_SIZE {
                return false;
            }
            self.retain_object(src.payload_word());
            out[..WORD_SIZE].copy_from_slice(&src.payload_word().to_ne_bytes());
            return true;
        }
        let bytes = if ty.is_boxed() {
            self.block_bytes(src.payload_word(), ty.size())
        } else {
            src.payload()
        };
        let len = out.len().min(bytes.len());
        out[..len].copy_from_slice(&bytes[..len]);
        true
    }

    fn variant_evaluate(
        &self,
        op: Operator,
        left: &VariantRaw,
        right: &VariantRaw,
    ) -> Option<VariantRaw> {
        match op {
            Operator::LogicalNegate => return Some(boolean(!self.variant_booleanize(left))),
            Operator::LogicalAnd => {
                return Some(boolean(
                    self.variant_booleanize(left) && self.variant_booleanize(right),
                ))
            }
            Operator::LogicalOr => {
                return Some(boolean(
                    self.variant_booleanize(left) || self.variant_booleanize(right),
                ))
            }
            Operator::LogicalXor => {
                return Some(boolean(
                    self.variant_booleanize(left) != self.variant_booleanize(right),
                ))
            }
            _ => {}
        }

        if op.is_unary() {
            return match (op, num(left)?) {
                (Operator::Negate, Num::Int(v)) => Some(int(v.wrapping_neg())),
                (Operator::Negate, Num::Float(v)) => Some(float(-v)),
                (Operator::Positive, _) => Some(*left),
                (Operator::BitNegate, Num::Int(v)) => Some(int(!v)),
                _ => None,
            };
        }

        if let (Some(a), Some(b)) = (num(left), num(right)) {
            return numeric(op, a, b);
        }

        let (lt, rt) = (left.ty()?, right.ty()?);
        match op {
            Operator::Equal => Some(boolean(self.same(left, right))),
            Operator::NotEqual => Some(boolean(!self.same(left, right))),
            Operator::Add if lt == VariantType::Array && rt == VariantType::Array => {
                self.concat(left, right)
            }
            Operator::In if lt == VariantType::Int && is_array_like(rt) => {
                let needle = int_of(left);
                self.items(right)
                    .map(|items| boolean(items.contains(&needle)))
            }
            _ => None,
        }
    }

    fn variant_hash(&self, value: &VariantRaw) -> i64 {
        let Some(ty) = value.ty() else {
            return 0;
        };
        let words: Vec<u64> = if !ty.is_trivial() {
            self.items(value)
                .unwrap_or_default()
                .into_iter()
                .map(|v| v as u64)
                .collect()
        } else if ty.is_boxed() {
            self.block_bytes(value.payload_word(), ty.size())
                .iter()
                .map(|&b| b as u64)
                .collect()
        } else {
            vec![value.payload_word() as u64, value.words()[2] as u64]
        };
        // FNV-1a over the words, seeded with the kind
        let hash = words
            .into_iter()
            .fold(0xcbf2_9ce4_8422_2325 ^ ty.tag() as u64, |acc, word| {
                (acc ^ word).wrapping_mul(0x0100_0000_01b3)
            });
        hash as i64
    }

    fn variant_booleanize(&self, value: &VariantRaw) -> bool {
        match value.ty() {
            None | Some(VariantType::Nil) => false,
            Some(VariantType::Bool) => value.payload_word() & 0xff != 0,
            Some(VariantType::Int) => int_of(value) != 0,
            Some(VariantType::Float) => float_of(value) != 0.0,
            Some(ty) if !ty.is_trivial() => self.items(value).map_or(false, |items| !items.is_empty()),
            Some(ty) if ty.is_boxed() => self
                .block_bytes(value.payload_word(), ty.size())
                .iter()
                .any(|&b| b != 0),
            Some(_) => value.payload().iter().any(|&b| b != 0),
        }
    }

    fn iter_init(&self, src: &VariantRaw, cursor: &mut VariantRaw) -> Option<bool> {
        let len = self.len_of(src)?;
        if len <= 0 {
            return Some(false);
        }
        *cursor = int(0);
        Some(true)
    }

    fn iter_next(&self, src: &VariantRaw, cursor: &mut VariantRaw) -> Option<bool> {
        if cursor.ty() != Some(VariantType::Int) {
            return None;
        }
        let len = self.len_of(src)?;
        let next = int_of(cursor) + 1;
        if next < len {
            *cursor = int(next);
            Some(true)
        } else {
            Some(false)
        }
    }

    fn iter_get(&self, src: &VariantRaw, cursor: &mut VariantRaw) -> Option<VariantRaw> {
        if cursor.ty() != Some(VariantType::Int) {
            return None;
        }
        let index = int_of(cursor);
        match src.ty()? {
            VariantType::Int => (index < int_of(src)).then(|| int(index)),
            ty if is_array_like(ty) => {
                let items = self.items(src)?;
                usize::try_from(index)
                    .ok()
                    .and_then(|i| items.get(i))
                    .map(|&item| int(item))
            }
            _ => None,
        }
    }

    fn builtin_construct(&self, ty: VariantType, dst: &mut [Word]) -> bool {
        dst.fill(0);
        if ty.is_trivial() {
            return true;
        }
        match (self.new_object(Vec::new()), dst.first_mut()) {
            (Some(word), Some(slot)) => {
                *slot = word;
                true
            }
            (Some(word), None) => {
                self.release_object(word);
                false
            }
            (None, _) => false,
        }
    }

    fn builtin_copy(&self, ty: VariantType, src: &[Word], dst: &mut [Word]) -> bool {
        if src.len() != dst.len() {
            return false;
        }
        if !ty.is_trivial() {
            if let Some(&word) = src.first() {
                self.retain_object(word);
            }
        }
        dst.copy_from_slice(src);
        true
    }

    fn builtin_destroy(&self, ty: VariantType, value: &mut [Word]) {
        if !ty.is_trivial() {
            if let Some(&word) = value.first() {
                self.release_object(word);
            }
        }
        value.fill(0);
    }
}

/// An [`Api`] wired to a [`MockEngine`] over a [`CountingAllocator`]
pub struct MockSetup {
    pub api: Arc<Api>,
    pub allocator: Arc<CountingAllocator>,
    pub engine: Arc<MockEngine>,
}

pub fn mock_api(misuse: MisusePolicy) -> MockSetup {
    let allocator = Arc::new(CountingAllocator::new());
    let engine = Arc::new(MockEngine::new(allocator.clone()));
    let api = Api::builder(engine.clone())
        .allocator(allocator.clone())
        .misuse(misuse)
        .build();
    MockSetup {
        api,
        allocator,
        engine,
    }
}

fn object<'a>(word: Word) -> Option<&'a MockObject> {
    // SAFETY: heap words only ever hold pointers written by new_object
    unsafe { (word as *const MockObject).as_ref() }
}

fn is_array_like(ty: VariantType) -> bool {
    ty == VariantType::Array || (ty.is_iterable() && ty.tag() >= VariantType::PackedByteArray.tag())
}

fn heap_raw(ty: VariantType, word: Word) -> VariantRaw {
    let mut raw = VariantRaw::tagged(ty);
    raw.set_payload_word(word);
    raw
}

fn int(value: i64) -> VariantRaw {
    let mut raw = VariantRaw::tagged(VariantType::Int);
    raw.set_payload_word(value as Word);
    raw
}

fn float(value: f64) -> VariantRaw {
    let mut raw = VariantRaw::tagged(VariantType::Float);
    raw.set_payload_word(value.to_bits() as Word);
    raw
}

fn boolean(value: bool) -> VariantRaw {
    let mut raw = VariantRaw::tagged(VariantType::Bool);
    raw.set_payload_word(value as Word);
    raw
}

fn int_of(raw: &VariantRaw) -> i64 {
    raw.payload_word() as i64
}

fn float_of(raw: &VariantRaw) -> f64 {
    f64::from_bits(raw.payload_word() as u64)
}

fn num(raw: &VariantRaw) -> Option<Num> {
    match raw.ty()? {
        VariantType::Int => Some(Num::Int(int_of(raw))),
        VariantType::Float => Some(Num::Float(float_of(raw))),
        _ => None,
    }
}

fn numeric(op: Operator, a: Num, b: Num) -> Option<VariantRaw> {
    if let (Num::Int(a), Num::Int(b)) = (a, b) {
        return match op {
            Operator::Add => Some(int(a.wrapping_add(b))),
            Operator::Subtract => Some(int(a.wrapping_sub(b))),
            Operator::Multiply => Some(int(a.wrapping_mul(b))),
            Operator::Divide => (b != 0).then(|| int(a.wrapping_div(b))),
            Operator::Module => (b != 0).then(|| int(a.wrapping_rem(b))),
            Operator::Power => u32::try_from(b).ok().map(|exp| int(a.wrapping_pow(exp))),
            Operator::ShiftLeft => u32::try_from(b)
                .ok()
                .filter(|&s| s < 64)
                .map(|s| int(a << s)),
            Operator::ShiftRight => u32::try_from(b)
                .ok()
                .filter(|&s| s < 64)
                .map(|s| int(a >> s)),
            Operator::BitAnd => Some(int(a & b)),
            Operator::BitOr => Some(int(a | b)),
            Operator::BitXor => Some(int(a ^ b)),
            Operator::Equal => Some(boolean(a == b)),
            Operator::NotEqual => Some(boolean(a != b)),
            Operator::Less => Some(boolean(a < b)),
            Operator::LessEqual => Some(boolean(a <= b)),
            Operator::Greater => Some(boolean(a > b)),
            Operator::GreaterEqual => Some(boolean(a >= b)),
            _ => None,
        };
    }

    let (a, b) = (a.as_f64(), b.as_f64());
    match op {
        Operator::Add => Some(float(a + b)),
        Operator::Subtract => Some(float(a - b)),
        Operator::Multiply => Some(float(a * b)),
        Operator::Divide => Some(float(a / b)),
        Operator::Power => Some(float(a.powf(b))),
        Operator::Equal => Some(boolean(a == b)),
        Operator::NotEqual => Some(boolean(a != b)),
        Operator::Less => Some(boolean(a < b)),
        Operator::LessEqual => Some(boolean(a <= b)),
        Operator::Greater => Some(boolean(a > b)),
        Operator::GreaterEqual => Some(boolean(a >= b)),
        _ => None,
    }
}
