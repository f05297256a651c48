//! Variant - dynamically typed engine value
//!
//! Design: `VariantRaw` is the exact 3-word layout the engine reads and
//! writes; `Variant` is an ownership handle to one such value, bound to a
//! [`Lifetime`]. Every behaviour (copy, destroy, conversion, operators,
//! iteration) is dispatched to the engine by discriminant.
//!
//! Layout (64-bit):
//! ```text
//! word 0: u32 discriminant + padding
//! word 1..2: inline payload (<= 16 bytes) or pointer to engine-held payload
//! ```

mod convert;
mod geometry;
mod iter;
mod types;


pub use convert::VariantValue;
pub use geometry::*;
pub use iter::{Iter, IterState};
pub use types::{Operator, VariantType, Word, WORD_SIZE};

use crate::api::Api;
use crate::error::{Error, Result};
use crate::handle::{Handle, Kind, Release};
use crate::lifetime::Lifetime;
use std::sync::Arc;
use tracing::{error, trace};

/// Raw engine Variant bits
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct VariantRaw {
    words: [Word; 3],
}

const _: () = assert!(core::mem::size_of::<VariantRaw>() == 3 * WORD_SIZE);

impl VariantRaw {
    pub const WORDS: usize = 3;
    pub const PAYLOAD_BYTES: usize = 2 * WORD_SIZE;

    #[inline]
    pub const fn nil() -> Self {
        Self { words: [0; 3] }
    }

    /// Zero payload tagged with `ty`
    #[inline]
    pub fn tagged(ty: VariantType) -> Self {
        let mut raw = Self::nil();
        raw.set_tag(ty.tag());
        raw
    }

    #[inline]
    pub const fn from_words(words: [Word; 3]) -> Self {
        Self { words }
    }

    #[inline]
    pub const fn words(&self) -> [Word; 3] {
        self.words
    }

    /// Discriminant as stored, possibly not a known kind
    #[inline]
    pub fn tag(&self) -> u32 {
        // SAFETY: word 0 is at least 4 bytes and suitably aligned for u32
        unsafe { *(self.words.as_ptr() as *const u32) }
    }

    #[inline]
    pub fn set_tag(&mut self, tag: u32) {
        self.words[0] = 0;
        // SAFETY: as in `tag`
        unsafe { *(self.words.as_mut_ptr() as *mut u32) = tag }
    }

    #[inline]
    pub fn ty(&self) -> Option<VariantType> {
        VariantType::from_tag(self.tag())
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        // SAFETY: words 1 and 2 are contiguous initialised memory
        unsafe {
            core::slice::from_raw_parts(
                self.words.as_ptr().add(1) as *const u8,
                Self::PAYLOAD_BYTES,
            )
        }
    }

    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `payload`
        unsafe {
            core::slice::from_raw_parts_mut(
                self.words.as_mut_ptr().add(1) as *mut u8,
                Self::PAYLOAD_BYTES,
            )
        }
    }

    /// First payload word, used for pointers into engine memory
    #[inline]
    pub const fn payload_word(&self) -> Word {
        self.words[1]
    }

    #[inline]
    pub fn set_payload_word(&mut self, word: Word) {
        self.words[1] = word;
    }

    #[inline]
    pub fn as_ptr(&self) -> *const VariantRaw {
        self
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut VariantRaw {
        self
    }
}

impl core::fmt::Debug for VariantRaw {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.ty() {
            Some(ty) => write!(f, "VariantRaw({ty}, {:#x}, {:#x})", self.words[1], self.words[2]),
            None => write!(f, "VariantRaw(<tag {}>)", self.tag()),
        }
    }
}

/// Handle kind for Variant storage: 3 words, destroyed as a Variant
pub(crate) enum VariantSlot {}

impl Kind for VariantSlot {
    const WORDS: usize = VariantRaw::WORDS;
    const RELEASE: Release = Release::Variant;
}

/// Variant owned by a [`Lifetime`]
pub struct Variant {
    handle: Handle<VariantSlot>,
}

impl Variant {
    /// Take ownership of Variant bits produced by the engine
    ///
    /// If the lifetime has already ended the value is destroyed right away
    /// and the error is returned.
    ///
    /// # Safety
    /// `raw` must be a live engine Variant not owned by anything else.
    pub unsafe fn from_raw(lifetime: &Lifetime, raw: VariantRaw) -> Result<Self> {
        let handle = Handle::from_raw(lifetime, &raw.words)?;
        Ok(Self { handle })
    }

    pub fn nil(lifetime: &Lifetime) -> Result<Self> {
        let raw = lifetime.api().engine().variant_new_nil();
        // SAFETY: fresh value from the engine
        unsafe { Self::from_raw(lifetime, raw) }
    }

    /// Convert a plain value through the engine's from-type entry
    pub fn new<T: VariantValue>(lifetime: &Lifetime, value: T) -> Result<Self> {
        let raw = lifetime
            .api()
            .engine()
            .variant_from_type(T::TYPE, convert::as_bytes(&value))
            .ok_or(Error::ConstructionFailed(T::TYPE))?;
        trace!(target: "variant", ty = %T::TYPE, "variant from value");
        // SAFETY: fresh value from the engine
        unsafe { Self::from_raw(lifetime, raw) }
    }

    /// Default value of `ty`
    pub fn construct(lifetime: &Lifetime, ty: VariantType) -> Result<Self> {
        let raw = lifetime
            .api()
            .engine()
            .variant_construct(ty)
            .ok_or(Error::ConstructionFailed(ty))?;
        // SAFETY: fresh value from the engine
        unsafe { Self::from_raw(lifetime, raw) }
    }

    /// Wrap a builtin handle's value in a new Variant (the handle is kept)
    pub fn from_builtin<K: crate::handle::Builtin>(
        lifetime: &Lifetime,
        value: &Handle<K>,
    ) -> Result<Self> {
        value.api().ensure_same(lifetime.api())?;
        let storage = value.storage()?;
        let bytes = storage.as_bytes();
        let raw = lifetime
            .api()
            .engine()
            .variant_from_type(K::TYPE, &bytes[..K::TYPE.size()])
            .ok_or(Error::ConstructionFailed(K::TYPE))?;
        // SAFETY: fresh value from the engine
        unsafe { Self::from_raw(lifetime, raw) }
    }

    #[inline]
    pub fn api(&self) -> &Arc<Api> {
        self.handle.api()
    }

    #[inline]
    pub fn lifetime_id(&self) -> u64 {
        self.handle.lifetime_id()
    }

    /// Current bits; `Released` once the owning lifetime ended
    pub fn raw(&self) -> Result<VariantRaw> {
        let storage = self.handle.storage()?;
        Ok(VariantRaw::from_words(storage.variant_words()))
    }

    pub fn ty(&self) -> Result<VariantType> {
        let raw = self.raw()?;
        raw.ty().ok_or_else(|| {
            error!(target: "variant", tag = raw.tag(), "variant carries an unknown discriminant");
            Error::InvalidTag(raw.tag())
        })
    }

    /// Checked conversion to a plain value
    pub fn to<T: VariantValue>(&self) -> Result<T> {
        let raw = self.raw()?;
        let found = raw.ty().ok_or(Error::InvalidTag(raw.tag()))?;
        if found != T::TYPE {
            return Err(Error::TypeMismatch {
                expected: T::TYPE,
                found,
            });
        }
        let mut out = T::default();
        if !self
            .api()
            .engine()
            .variant_to_type(T::TYPE, &raw, convert::as_bytes_mut(&mut out))
        {
            return Err(Error::ConstructionFailed(T::TYPE));
        }
        Ok(out)
    }

    /// Engine-side copy into `lifetime` (refcounted kinds share payload)
    pub fn copy(&self, lifetime: &Lifetime) -> Result<Variant> {
        self.api().ensure_same(lifetime.api())?;
        let raw = self.raw()?;
        let copy = self.api().engine().variant_copy(&raw);
        // SAFETY: fresh value from the engine
        unsafe { Self::from_raw(lifetime, copy) }
    }

    /// Evaluate `self op rhs` on the engine; `rhs` is ignored for unary operators
    pub fn evaluate(
        &self,
        op: Operator,
        rhs: Option<&Variant>,
        lifetime: &Lifetime,
    ) -> Result<Variant> {
        self.api().ensure_same(lifetime.api())?;
        let raw = self.evaluate_raw(op, rhs)?;
        // SAFETY: fresh value from the engine
        unsafe { Self::from_raw(lifetime, raw) }
    }

    fn evaluate_raw(&self, op: Operator, rhs: Option<&Variant>) -> Result<VariantRaw> {
        let left = self.raw()?;
        let right = match rhs {
            Some(rhs) if !op.is_unary() => {
                self.api().ensure_same(rhs.api())?;
                rhs.raw()?
            }
            _ => VariantRaw::nil(),
        };
        trace!(target: "variant", %op, left = ?left.ty(), right = ?right.ty(), "evaluate");
        self.api()
            .engine()
            .variant_evaluate(op, &left, &right)
            .ok_or_else(|| Error::InvalidOperation {
                op,
                left: left.ty().unwrap_or(VariantType::Nil),
                right: right.ty().unwrap_or(VariantType::Nil),
            })
    }

    fn evaluate_bool(&self, op: Operator, rhs: &Variant) -> Result<bool> {
        let mut result = self.evaluate_raw(op, Some(rhs))?;
        let engine = self.api().engine();
        let truth = engine.variant_booleanize(&result);
        engine.variant_destroy(&mut result);
        Ok(truth)
    }

    pub fn equals(&self, other: &Variant) -> Result<bool> {
        self.evaluate_bool(Operator::Equal, other)
    }

    pub fn less(&self, other: &Variant) -> Result<bool> {
        self.evaluate_bool(Operator::Less, other)
    }

    pub fn booleanize(&self) -> Result<bool> {
        let raw = self.raw()?;
        Ok(self.api().engine().variant_booleanize(&raw))
    }

    pub fn hash(&self) -> Result<i64> {
        let raw = self.raw()?;
        Ok(self.api().engine().variant_hash(&raw))
    }

    /// Iterate a container-like Variant
    pub fn iter(&self) -> Result<Iter<'_>> {
        let ty = self.ty()?;
        trace!(target: "variant", %ty, "iterator created");
        Ok(Iter::new(self))
    }

    /// Move ownership into another lifetime of the same API instance
    pub fn transfer_to(&mut self, lifetime: &Lifetime) -> Result<()> {
        self.handle.transfer_to(lifetime)
    }

    /// Destroy through the engine and detach from the owning lifetime
    pub fn free(self) -> Result<()> {
        self.handle.free()
    }
}

impl core::fmt::Debug for Variant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.handle.peek() {
            Some(storage) => f
                .debug_tuple("Variant")
                .field(&VariantRaw::from_words(storage.variant_words()))
                .finish(),
            None => f.write_str("Variant(<released>)"),
        }
    }
}
