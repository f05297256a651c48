//! API instance - the injected engine function table
//!
//! Design: everything native goes through two traits. `Allocator` hands out
//! raw memory (frames live there), `Engine` implements the Variant and
//! builtin operations by discriminant. An [`Api`] bundles both with the
//! [`Registry`] and the misuse policy, is built once per engine and shared
//! by `Arc`; nothing in the crate reaches for a global.

pub mod native;

#[cfg(test)]
mod tests;

use crate::config::MisusePolicy;
use crate::error::{Error, Result};
use crate::frame::{CallFrame, NativeCall, MAX_ARGS};
use crate::handle::Release;
use crate::lifetime::{Entry, Lifetime};
use crate::registry::Registry;
use crate::variant::{Operator, Variant, VariantRaw, VariantType, Word};
use core::ffi::c_void;
use core::ptr::NonNull;
use smallvec::SmallVec;
use std::alloc::Layout;
use std::sync::Arc;
use tracing::{info, trace, warn};

/// Raw memory provider for frames and engine-side buffers
pub trait Allocator: Send + Sync {
    /// `None` when the request cannot be satisfied
    fn allocate(&self, size: usize) -> Option<NonNull<u8>>;

    /// # Safety
    /// `ptr` must come from `allocate` on this allocator with the same `size`.
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize);
}

/// Engine operations, dispatched by discriminant
///
/// Variant values are passed as [`VariantRaw`] bits. Operations returning
/// a fresh Variant hand ownership to the caller, who must eventually pass
/// it to `variant_destroy` (handles and lifetimes do this).
pub trait Engine: Send + Sync {
    fn variant_new_nil(&self) -> VariantRaw {
        VariantRaw::nil()
    }

    fn variant_copy(&self, src: &VariantRaw) -> VariantRaw;

    /// Release the payload; `value` is nil afterwards
    fn variant_destroy(&self, value: &mut VariantRaw);

    /// Default value of `ty`
    fn variant_construct(&self, ty: VariantType) -> Option<VariantRaw>;

    /// Wrap the plain bytes of a `ty` value
    fn variant_from_type(&self, ty: VariantType, value: &[u8]) -> Option<VariantRaw>;

    /// Write the plain bytes of a `ty` Variant into `out`
    fn variant_to_type(&self, ty: VariantType, src: &VariantRaw, out: &mut [u8]) -> bool;

    /// `None` when the combination is invalid
    fn variant_evaluate(
        &self,
        op: Operator,
        left: &VariantRaw,
        right: &VariantRaw,
    ) -> Option<VariantRaw>;

    fn variant_hash(&self, value: &VariantRaw) -> i64;

    fn variant_booleanize(&self, value: &VariantRaw) -> bool;

    /// Position `cursor` on the first element: `Some(false)` when empty,
    /// `None` when `src` cannot be iterated
    fn iter_init(&self, src: &VariantRaw, cursor: &mut VariantRaw) -> Option<bool>;

    fn iter_next(&self, src: &VariantRaw, cursor: &mut VariantRaw) -> Option<bool>;

    fn iter_get(&self, src: &VariantRaw, cursor: &mut VariantRaw) -> Option<VariantRaw>;

    /// Default-construct a builtin value into `dst`
    fn builtin_construct(&self, ty: VariantType, dst: &mut [Word]) -> bool;

    /// Copy-construct `src` into `dst`
    fn builtin_copy(&self, ty: VariantType, src: &[Word], dst: &mut [Word]) -> bool;

    fn builtin_destroy(&self, ty: VariantType, value: &mut [Word]);
}

/// Process allocator with 16-byte alignment
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl SystemAllocator {
    pub const ALIGN: usize = 16;

    fn layout(size: usize) -> Option<Layout> {
        Layout::from_size_align(size.max(1), Self::ALIGN).ok()
    }
}

impl Allocator for SystemAllocator {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let layout = Self::layout(size)?;
        // SAFETY: layout has non-zero size
        NonNull::new(unsafe { std::alloc::alloc(layout) })
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        if let Some(layout) = Self::layout(size) {
            std::alloc::dealloc(ptr.as_ptr(), layout);
        }
    }
}

/// One engine connection: allocator, engine table, registry, misuse policy
pub struct Api {
    allocator: Arc<dyn Allocator>,
    engine: Arc<dyn Engine>,
    registry: Registry,
    misuse: MisusePolicy,
}

impl Api {
    pub fn builder(engine: Arc<dyn Engine>) -> ApiBuilder {
        ApiBuilder {
            engine,
            allocator: Arc::new(SystemAllocator),
            registry: None,
            misuse: MisusePolicy::default(),
        }
    }

    #[inline]
    pub fn allocator(&self) -> &dyn Allocator {
        &*self.allocator
    }

    #[inline]
    pub fn engine(&self) -> &dyn Engine {
        &*self.engine
    }

    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[inline]
    pub fn misuse_policy(&self) -> MisusePolicy {
        self.misuse
    }

    /// Fresh zeroed frame from this instance's allocator
    pub fn new_frame(&self) -> Result<CallFrame<'_>> {
        CallFrame::new(self)
    }

    /// Report a usage error under the configured policy
    ///
    /// Returns the error for propagation; under `MisusePolicy::Panic` it
    /// panics instead.
    pub fn misuse(&self, err: Error) -> Error {
        warn!(target: "api", error = %err, "handle misuse");
        if self.misuse == MisusePolicy::Panic {
            panic!("{err}");
        }
        err
    }

    /// `ForeignApi` (under the misuse policy) unless `other` is this instance
    pub(crate) fn ensure_same(&self, other: &Arc<Api>) -> Result<()> {
        if core::ptr::eq(Arc::as_ptr(other), self) {
            Ok(())
        } else {
            Err(self.misuse(Error::ForeignApi))
        }
    }

    /// Destroy one owned value through its kind's destructor
    pub(crate) fn release(&self, entry: &mut Entry) {
        match entry.release {
            Release::Variant => {
                let mut raw = VariantRaw::from_words(entry.storage.variant_words());
                self.engine.variant_destroy(&mut raw);
            }
            Release::Builtin(ty) => {
                if !self.registry.entry(ty).trivial {
                    self.engine.builtin_destroy(ty, entry.storage.words_mut());
                }
            }
        }
        trace!(target: "handle", release = ?entry.release, "value released");
    }

    /// Call a native method taking Variants by reference and returning one
    ///
    /// # Safety
    /// `f` must follow the frame calling convention, take `args.len()`
    /// Variant arguments and write a Variant into the return area.
    pub unsafe fn call_variant(
        &self,
        lifetime: &Lifetime,
        f: NativeCall,
        instance: *mut c_void,
        args: &[&Variant],
    ) -> Result<Variant> {
        if args.len() > MAX_ARGS {
            return Err(Error::TooManyArgs {
                got: args.len(),
                capacity: MAX_ARGS,
            });
        }
        self.ensure_same(lifetime.api())?;

        let mut raws: SmallVec<[VariantRaw; 8]> = SmallVec::with_capacity(args.len());
        for arg in args {
            self.ensure_same(arg.api())?;
            raws.push(arg.raw()?);
        }

        let mut frame = self.new_frame()?;
        for (i, raw) in raws.iter().enumerate() {
            frame.set_ref(i, raw.as_ptr() as *const c_void);
        }
        frame.call(f, instance, raws.len())?;
        let ret = frame.ret_variant();
        frame.free();

        Variant::from_raw(lifetime, ret)
    }

    /// Call a native method with word-sized arguments and a word result
    ///
    /// # Safety
    /// `f` must follow the frame calling convention and accept `args` as
    /// the bit patterns of its parameters.
    pub unsafe fn call_words(
        &self,
        f: NativeCall,
        instance: *mut c_void,
        args: &[Word],
    ) -> Result<Word> {
        if args.len() > MAX_ARGS {
            return Err(Error::TooManyArgs {
                got: args.len(),
                capacity: MAX_ARGS,
            });
        }
        let mut frame = self.new_frame()?;
        for (i, &word) in args.iter().enumerate() {
            frame.set(i, word);
        }
        frame.call(f, instance, args.len())?;
        Ok(frame.ret_word())
    }
}

impl core::fmt::Debug for Api {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Api")
            .field("registry", &self.registry)
            .field("misuse", &self.misuse)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Api`]
pub struct ApiBuilder {
    engine: Arc<dyn Engine>,
    allocator: Arc<dyn Allocator>,
    registry: Option<Registry>,
    misuse: MisusePolicy,
}

impl ApiBuilder {
    pub fn allocator(mut self, allocator: Arc<dyn Allocator>) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn misuse(mut self, policy: MisusePolicy) -> Self {
        self.misuse = policy;
        self
    }

    pub fn build(self) -> Arc<Api> {
        let registry = self.registry.unwrap_or_else(Registry::closed);
        info!(
            target: "api",
            operators = registry.operator_count(),
            version = registry.version().unwrap_or("unknown"),
            misuse = ?self.misuse,
            "api instance ready"
        );
        Arc::new(Api {
            allocator: self.allocator,
            engine: self.engine,
            registry,
            misuse: self.misuse,
        })
    }
}
