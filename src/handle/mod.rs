//! Ownership handles - engine values bound to an API instance and a lifetime
//!
//! Design: a handle is a move-only key into its [`Lifetime`]'s entry table.
//! The lifetime holds the raw words and releases whatever is still live
//! when it ends; `free` releases one value early. Handles carry no
//! destructor logic: the kind's [`Release`] entry selects the engine call.
//!
//! Dropping a handle without `free` leaves the value to its lifetime.

pub mod kinds;


use crate::api::Api;
use crate::error::{Error, Result};
use crate::lifetime::{Entry, Lifetime, Scope};
use crate::variant::{VariantType, Word, WORD_SIZE};
use core::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

/// Largest storage shape a handle can hold (a Variant)
pub const MAX_WORDS: usize = 3;

/// How the engine destroys a value of some kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Full Variant, destroyed by the engine's variant destructor
    Variant,
    /// Builtin value of the given kind, destroyed by that kind's destructor
    Builtin(VariantType),
}

/// Logical kind and storage shape of a handle
pub trait Kind: 'static {
    /// Storage shape in machine words (1..=3)
    const WORDS: usize;
    const RELEASE: Release;
}

/// Kinds held directly as builtin engine values
pub trait Builtin: Kind {
    const TYPE: VariantType;
}

/// Raw words of a handle, padded to [`MAX_WORDS`]
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Storage {
    words: [Word; MAX_WORDS],
    len: u8,
}

impl Storage {
    /// Copy `words`; `None` when longer than [`MAX_WORDS`]
    pub fn from_slice(words: &[Word]) -> Option<Self> {
        if words.len() > MAX_WORDS {
            return None;
        }
        let mut storage = Self {
            words: [0; MAX_WORDS],
            len: words.len() as u8,
        };
        storage.words[..words.len()].copy_from_slice(words);
        Some(storage)
    }

    #[inline]
    pub fn zeroed(len: usize) -> Self {
        debug_assert!(len <= MAX_WORDS);
        Self {
            words: [0; MAX_WORDS],
            len: len.min(MAX_WORDS) as u8,
        }
    }

    #[inline]
    pub fn words(&self) -> &[Word] {
        &self.words[..self.len as usize]
    }

    #[inline]
    pub fn words_mut(&mut self) -> &mut [Word] {
        &mut self.words[..self.len as usize]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub(crate) fn variant_words(&self) -> [Word; MAX_WORDS] {
        self.words
    }

    /// Storage bytes in native order
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `words` is initialised plain memory
        unsafe {
            core::slice::from_raw_parts(
                self.words.as_ptr() as *const u8,
                self.len as usize * WORD_SIZE,
            )
        }
    }
}

impl core::fmt::Debug for Storage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list()
            .entries(self.words().iter().map(|w| format!("{w:#x}")))
            .finish()
    }
}

/// Engine value owned by exactly one [`Lifetime`]
pub struct Handle<K: Kind> {
    scope: Arc<Scope>,
    key: usize,
    _kind: PhantomData<fn() -> K>,
}

impl<K: Kind> Handle<K> {
    /// Take ownership of raw words produced by a native call
    ///
    /// If `lifetime` has ended the value is destroyed and the error returned.
    ///
    /// # Safety
    /// `words` must be a live value of kind `K` not owned by anything else.
    pub unsafe fn from_raw(lifetime: &Lifetime, words: &[Word]) -> Result<Self> {
        let storage = Storage::from_slice(words)
            .filter(|_| words.len() == K::WORDS)
            .ok_or_else(|| {
                lifetime.api().misuse(Error::StorageShape {
                    kind: release_kind(K::RELEASE),
                    expected: K::WORDS,
                    got: words.len(),
                })
            })?;
        Self::bind(lifetime, storage)
    }

    /// Bind freshly produced storage to `lifetime`
    ///
    /// When the lifetime refuses it the value is destroyed through its
    /// kind's destructor before the error is reported.
    pub(crate) fn bind(lifetime: &Lifetime, storage: Storage) -> Result<Self> {
        let scope = lifetime.scope();
        let mut entry = Entry::new(K::RELEASE, storage);
        match scope.insert(entry) {
            Ok(key) => {
                trace!(
                    target: "handle",
                    lifetime = scope.id(),
                    key,
                    release = ?K::RELEASE,
                    "handle bound"
                );
                Ok(Self {
                    scope: Arc::clone(scope),
                    key,
                    _kind: PhantomData,
                })
            }
            Err(err) => {
                scope.api().release(&mut entry);
                Err(scope.api().misuse(err))
            }
        }
    }

    #[inline]
    pub fn api(&self) -> &Arc<Api> {
        self.scope.api()
    }

    #[inline]
    pub fn lifetime_id(&self) -> u64 {
        self.scope.id()
    }

    /// Raw words; `Released` once freed by the owning lifetime
    pub fn storage(&self) -> Result<Storage> {
        self.scope
            .get(self.key)
            .map(|entry| entry.storage)
            .map_err(|err| self.api().misuse(err))
    }

    /// Raw words without reporting misuse
    pub(crate) fn peek(&self) -> Option<Storage> {
        self.scope.get(self.key).ok().map(|entry| entry.storage)
    }

    /// Move ownership into `lifetime`
    pub fn transfer_to(&mut self, lifetime: &Lifetime) -> Result<()> {
        let target = lifetime.scope();
        if Arc::ptr_eq(&self.scope, target) {
            return Ok(());
        }
        if !Arc::ptr_eq(self.scope.api(), target.api()) {
            return Err(self.api().misuse(Error::ForeignApi));
        }

        let mut entry = self.scope.remove(self.key).map_err(|err| self.api().misuse(err))?;
        match target.insert(entry) {
            Ok(key) => {
                trace!(
                    target: "handle",
                    from = self.scope.id(),
                    to = target.id(),
                    "handle transferred"
                );
                self.scope = Arc::clone(target);
                self.key = key;
                Ok(())
            }
            Err(err) => {
                match self.scope.insert(entry) {
                    Ok(key) => self.key = key,
                    Err(_) => self.scope.api().release(&mut entry),
                }
                Err(self.api().misuse(err))
            }
        }
    }

    /// Release now through the kind's destructor and detach from the lifetime
    ///
    /// Freeing after the owning lifetime ended is `Released`; the value was
    /// already destroyed by the lifetime and is not destroyed twice.
    pub fn free(self) -> Result<()> {
        let mut entry = self.scope.remove(self.key).map_err(|err| self.api().misuse(err))?;
        self.api().release(&mut entry);
        trace!(target: "handle", lifetime = self.scope.id(), key = self.key, "handle freed");
        Ok(())
    }

    /// Detach without destroying, handing ownership of the raw words back
    pub fn into_raw(self) -> Result<Storage> {
        self.scope
            .remove(self.key)
            .map(|entry| entry.storage)
            .map_err(|err| self.api().misuse(err))
    }
}

impl<K: Builtin> Handle<K> {
    /// Default value of `K` built by the engine
    pub fn construct(lifetime: &Lifetime) -> Result<Self> {
        let mut storage = Storage::zeroed(K::WORDS);
        if !lifetime
            .api()
            .engine()
            .builtin_construct(K::TYPE, storage.words_mut())
        {
            return Err(Error::ConstructionFailed(K::TYPE));
        }
        Self::bind(lifetime, storage)
    }

    /// Engine-side copy into `lifetime`; refcounted kinds gain a reference
    pub fn retain(&self, lifetime: &Lifetime) -> Result<Self> {
        self.api().ensure_same(lifetime.api())?;
        let source = self.storage()?;
        let mut copy = Storage::zeroed(K::WORDS);
        if !self
            .api()
            .engine()
            .builtin_copy(K::TYPE, source.words(), copy.words_mut())
        {
            return Err(Error::ConstructionFailed(K::TYPE));
        }
        Self::bind(lifetime, copy)
    }

    #[inline]
    pub fn kind(&self) -> VariantType {
        K::TYPE
    }
}

impl<K: Kind> core::fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Handle")
            .field("release", &K::RELEASE)
            .field("lifetime", &self.scope.id())
            .field("key", &self.key)
            .finish()
    }
}

fn release_kind(release: Release) -> VariantType {
    match release {
        Release::Variant => VariantType::Nil,
        Release::Builtin(ty) => ty,
    }
}
