//! Call frames - argument packing for one cross-boundary call
//!
//! Design: one allocation from the API allocator holds the pointer array,
//! the word slots and the return area. Pointer `i` addresses slot `i`
//! unless `set_ref` redirects it to caller-owned storage (multi-word values
//! such as Variants travel by reference).
//!
//! Layout:
//! ```text
//! [ptr 0 .. ptr 15][slot 0 .. slot 15][ret 0 .. ret 2]
//! ```


use crate::api::Api;
use crate::error::{Error, Result};
use crate::variant::{VariantRaw, Word};
use core::ffi::c_void;
use core::ptr::{addr_of_mut, NonNull};
use tracing::trace;

/// Argument capacity of one frame
pub const MAX_ARGS: usize = 16;

/// Words in the return area (one Variant)
pub const RET_WORDS: usize = 3;

/// Native entry point using the frame calling convention
pub type NativeCall = unsafe extern "C" fn(
    instance: *mut c_void,
    args: *const *const c_void,
    argc: i64,
    ret: *mut c_void,
);

#[repr(C)]
struct FrameLayout {
    ptrs: [*const c_void; MAX_ARGS],
    slots: [Word; MAX_ARGS],
    ret: [Word; RET_WORDS],
}

const FRAME_SIZE: usize = core::mem::size_of::<FrameLayout>();
const FRAME_ALIGN: usize = core::mem::align_of::<FrameLayout>();

/// Fixed-capacity argument buffer, freed on drop
pub struct CallFrame<'a> {
    api: &'a Api,
    raw: NonNull<FrameLayout>,
}

impl<'a> CallFrame<'a> {
    pub fn new(api: &'a Api) -> Result<Self> {
        let block = api
            .allocator()
            .allocate(FRAME_SIZE)
            .ok_or(Error::OutOfMemory { size: FRAME_SIZE })?;

        let addr = block.as_ptr() as usize;
        if addr % FRAME_ALIGN != 0 {
            // SAFETY: block came from this allocator with FRAME_SIZE
            unsafe { api.allocator().free(block, FRAME_SIZE) };
            return Err(Error::Misaligned {
                addr,
                align: FRAME_ALIGN,
            });
        }

        let raw = block.cast::<FrameLayout>();
        // SAFETY: block is FRAME_SIZE bytes, aligned for FrameLayout, and
        // every field is plain data for which zero is valid
        unsafe {
            core::ptr::write_bytes(block.as_ptr(), 0, FRAME_SIZE);
            let base = raw.as_ptr();
            let ptrs = addr_of_mut!((*base).ptrs) as *mut *const c_void;
            let slots = addr_of_mut!((*base).slots) as *mut Word;
            for i in 0..MAX_ARGS {
                *ptrs.add(i) = slots.add(i) as *const c_void;
            }
        }

        trace!(target: "frame", addr, size = FRAME_SIZE, "frame allocated");
        Ok(Self { api, raw })
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        MAX_ARGS
    }

    #[inline]
    fn layout(&self) -> &FrameLayout {
        // SAFETY: raw is a live, initialised FrameLayout owned by self
        unsafe { self.raw.as_ref() }
    }

    #[inline]
    fn layout_mut(&mut self) -> &mut FrameLayout {
        // SAFETY: as in `layout`, and &mut self is unique
        unsafe { self.raw.as_mut() }
    }

    #[inline]
    fn check(index: usize) -> Result<()> {
        if index < MAX_ARGS {
            Ok(())
        } else {
            Err(Error::SlotOutOfRange {
                index,
                capacity: MAX_ARGS,
            })
        }
    }

    /// Point argument `index` back at its own slot and return the slot
    #[inline]
    fn slot_mut(&mut self, index: usize) -> &mut Word {
        let layout = self.layout_mut();
        layout.ptrs[index] = &layout.slots[index] as *const Word as *const c_void;
        &mut layout.slots[index]
    }

    /// Write the bit pattern of argument `index`
    ///
    /// Undoes an earlier `set_ref` on the same index.
    ///
    /// # Panics
    /// When `index >= MAX_ARGS`.
    #[inline]
    pub fn set(&mut self, index: usize, word: Word) {
        assert!(
            index < MAX_ARGS,
            "frame slot {index} out of range (capacity {MAX_ARGS})"
        );
        *self.slot_mut(index) = word;
    }

    pub fn try_set(&mut self, index: usize, word: Word) -> Result<()> {
        Self::check(index)?;
        *self.slot_mut(index) = word;
        Ok(())
    }

    /// Bit pattern of argument `index`
    ///
    /// # Panics
    /// When `index >= MAX_ARGS`.
    #[inline]
    pub fn read(&self, index: usize) -> Word {
        assert!(
            index < MAX_ARGS,
            "frame slot {index} out of range (capacity {MAX_ARGS})"
        );
        self.layout().slots[index]
    }

    pub fn try_read(&self, index: usize) -> Result<Word> {
        Self::check(index)?;
        Ok(self.layout().slots[index])
    }

    /// Address of slot `index`; argument `index` points at it afterwards
    ///
    /// # Panics
    /// When `index >= MAX_ARGS`.
    pub fn get(&mut self, index: usize) -> *mut Word {
        assert!(
            index < MAX_ARGS,
            "frame slot {index} out of range (capacity {MAX_ARGS})"
        );
        self.slot_mut(index)
    }

    /// Point argument `index` at caller-owned storage
    ///
    /// # Safety
    /// `ptr` must stay valid until the native call made with this frame
    /// returns.
    pub unsafe fn set_ref(&mut self, index: usize, ptr: *const c_void) {
        assert!(
            index < MAX_ARGS,
            "frame slot {index} out of range (capacity {MAX_ARGS})"
        );
        self.layout_mut().ptrs[index] = ptr;
    }

    /// Base of the argument pointer array
    #[inline]
    pub fn args(&self) -> *const *const c_void {
        self.layout().ptrs.as_ptr()
    }

    /// Return area, large enough for a Variant
    #[inline]
    pub fn ret(&mut self) -> *mut c_void {
        self.layout_mut().ret.as_mut_ptr() as *mut c_void
    }

    #[inline]
    pub fn ret_word(&self) -> Word {
        self.layout().ret[0]
    }

    #[inline]
    pub fn ret_variant(&self) -> VariantRaw {
        VariantRaw::from_words(self.layout().ret)
    }

    /// Invoke `f` with the first `argc` arguments
    ///
    /// # Safety
    /// `f` must follow the frame calling convention, `instance` must be
    /// what it expects, and the slots must hold valid arguments for it.
    pub unsafe fn call(&mut self, f: NativeCall, instance: *mut c_void, argc: usize) -> Result<()> {
        if argc > MAX_ARGS {
            return Err(Error::TooManyArgs {
                got: argc,
                capacity: MAX_ARGS,
            });
        }
        trace!(target: "frame", argc, "native call");
        let ret = self.ret();
        f(instance, self.args(), argc as i64, ret);
        Ok(())
    }

    /// Return the memory to the allocator
    pub fn free(self) {
        drop(self)
    }
}

impl Drop for CallFrame<'_> {
    fn drop(&mut self) {
        // SAFETY: raw was allocated in `new` with FRAME_SIZE
        unsafe { self.api.allocator().free(self.raw.cast(), FRAME_SIZE) };
        trace!(target: "frame", addr = self.raw.as_ptr() as usize, "frame freed");
    }
}

impl core::fmt::Debug for CallFrame<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CallFrame")
            .field("addr", &self.raw.as_ptr())
            .field("slots", &self.layout().slots)
            .field("ret", &self.layout().ret)
            .finish()
    }
}
