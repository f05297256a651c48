//! Stateful iteration over container-like Variants
//!
//! The engine owns iteration semantics: the cursor is itself a Variant the
//! engine initialises, advances and reads from.

use super::{Variant, VariantRaw};
use crate::error::{Error, Result};
use crate::lifetime::Lifetime;
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterState {
    /// `next` not called yet
    Unstarted,
    /// Cursor sits on an element
    Positioned,
    /// Past the last element
    Exhausted,
    /// The engine reported a failure
    Invalid,
}

/// Iterator borrowing its source and owning its cursor
pub struct Iter<'a> {
    source: &'a Variant,
    cursor: VariantRaw,
    state: IterState,
}

impl<'a> Iter<'a> {
    pub(crate) fn new(source: &'a Variant) -> Self {
        Self {
            source,
            cursor: VariantRaw::nil(),
            state: IterState::Unstarted,
        }
    }

    #[inline]
    pub fn state(&self) -> IterState {
        self.state
    }

    /// Advance; `Ok(false)` once exhausted
    pub fn next(&mut self) -> Result<bool> {
        let src = self.source.raw()?;
        let engine = self.source.api().engine();
        let step = match self.state {
            IterState::Unstarted => engine.iter_init(&src, &mut self.cursor),
            IterState::Positioned => engine.iter_next(&src, &mut self.cursor),
            IterState::Exhausted => return Ok(false),
            IterState::Invalid => return Err(Error::IteratorInvalidated),
        };

        match step {
            Some(true) => {
                self.state = IterState::Positioned;
                Ok(true)
            }
            Some(false) => {
                trace!(target: "variant", "iterator exhausted");
                self.state = IterState::Exhausted;
                Ok(false)
            }
            None => {
                warn!(target: "variant", source = ?src.ty(), "iterator invalidated");
                self.state = IterState::Invalid;
                Err(Error::IteratorInvalidated)
            }
        }
    }

    /// Element under the cursor, owned by `lifetime`
    pub fn value(&mut self, lifetime: &Lifetime) -> Result<Variant> {
        match self.state {
            IterState::Positioned => {}
            IterState::Invalid => return Err(Error::IteratorInvalidated),
            IterState::Unstarted | IterState::Exhausted => {
                return Err(self.source.api().misuse(Error::IteratorNotPositioned))
            }
        }

        self.source.api().ensure_same(lifetime.api())?;
        let src = self.source.raw()?;
        match self
            .source
            .api()
            .engine()
            .iter_get(&src, &mut self.cursor)
        {
            // SAFETY: fresh value from the engine
            Some(raw) => unsafe { Variant::from_raw(lifetime, raw) },
            None => {
                warn!(target: "variant", source = ?src.ty(), "iterator value unavailable");
                self.state = IterState::Invalid;
                Err(Error::IteratorInvalidated)
            }
        }
    }
}

impl Drop for Iter<'_> {
    fn drop(&mut self) {
        if self.state != IterState::Unstarted {
            self.source.api().engine().variant_destroy(&mut self.cursor);
        }
    }
}

impl core::fmt::Debug for Iter<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Iter")
            .field("state", &self.state)
            .field("cursor", &self.cursor)
            .finish()
    }
}
