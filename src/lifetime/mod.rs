//! Lifetime arenas - scoped, exhaustive release of engine values
//!
//! Design: each lifetime owns an entry table (slab with a vacancy list).
//! Handles are keys into it. Ending the lifetime ends its children first,
//! then releases every entry still present; entries freed individually
//! are already gone, so nothing is released twice.
//!
//! A lifetime ends on `end` or on drop, whichever comes first.

#[cfg(test)]
mod tests;

use crate::api::Api;
use crate::error::{Error, Result};
use crate::handle::{Release, Storage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

static NEXT_LIFETIME_ID: AtomicU64 = AtomicU64::new(1);

/// One owned value: what to release and how
#[derive(Debug, Clone, Copy)]
pub(crate) struct Entry {
    pub(crate) release: Release,
    pub(crate) storage: Storage,
}

impl Entry {
    #[inline]
    pub(crate) fn new(release: Release, storage: Storage) -> Self {
        Self { release, storage }
    }
}

#[derive(Default)]
struct ScopeState {
    entries: Vec<Option<Entry>>,
    vacant: Vec<usize>,
    children: Vec<Weak<Scope>>,
    live: usize,
    ended: bool,
}

/// Shared state behind a [`Lifetime`] and its handles
pub(crate) struct Scope {
    id: u64,
    depth: usize,
    api: Arc<Api>,
    state: Mutex<ScopeState>,
}

impl Scope {
    fn new(api: Arc<Api>, depth: usize) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_LIFETIME_ID.fetch_add(1, Ordering::Relaxed),
            depth,
            api,
            state: Mutex::new(ScopeState::default()),
        })
    }

    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn api(&self) -> &Arc<Api> {
        &self.api
    }

    pub(crate) fn insert(&self, entry: Entry) -> Result<usize> {
        let mut state = self.state.lock();
        if state.ended {
            return Err(Error::LifetimeEnded(self.id));
        }
        let key = match state.vacant.pop() {
            Some(key) => {
                state.entries[key] = Some(entry);
                key
            }
            None => {
                state.entries.push(Some(entry));
                state.entries.len() - 1
            }
        };
        state.live += 1;
        Ok(key)
    }

    pub(crate) fn get(&self, key: usize) -> Result<Entry> {
        let state = self.state.lock();
        state
            .entries
            .get(key)
            .copied()
            .flatten()
            .ok_or(Error::Released)
    }

    pub(crate) fn remove(&self, key: usize) -> Result<Entry> {
        let mut state = self.state.lock();
        let entry = state
            .entries
            .get_mut(key)
            .and_then(Option::take)
            .ok_or(Error::Released)?;
        state.vacant.push(key);
        state.live -= 1;
        Ok(entry)
    }

    fn nest(self: &Arc<Self>) -> Result<Arc<Scope>> {
        let mut state = self.state.lock();
        if state.ended {
            return Err(Error::LifetimeEnded(self.id));
        }
        let child = Scope::new(Arc::clone(&self.api), self.depth + 1);
        state.children.retain(|c| c.strong_count() > 0);
        state.children.push(Arc::downgrade(&child));
        Ok(child)
    }

    fn live(&self) -> usize {
        self.state.lock().live
    }

    fn is_ended(&self) -> bool {
        self.state.lock().ended
    }

    /// End children, then release every live entry; returns values released
    fn end(&self) -> usize {
        let (children, entries) = {
            let mut state = self.state.lock();
            if state.ended {
                return 0;
            }
            state.ended = true;
            state.live = 0;
            state.vacant.clear();
            (
                std::mem::take(&mut state.children),
                std::mem::take(&mut state.entries),
            )
        };

        let mut released = children
            .iter()
            .filter_map(Weak::upgrade)
            .map(|child| child.end())
            .sum::<usize>();

        for mut entry in entries.into_iter().flatten() {
            self.api.release(&mut entry);
            released += 1;
        }

        debug!(
            target: "lifetime",
            id = self.id,
            depth = self.depth,
            released,
            "lifetime ended"
        );
        released
    }
}

/// Scope that owns engine values and releases them no later than its end
pub struct Lifetime {
    scope: Arc<Scope>,
}

impl Lifetime {
    /// Top-level lifetime bound to `api`
    pub fn new(api: &Arc<Api>) -> Self {
        let scope = Scope::new(Arc::clone(api), 0);
        trace!(target: "lifetime", id = scope.id, "lifetime started");
        Self { scope }
    }

    /// Child lifetime, ended no later than `self`
    pub fn nest(&self) -> Result<Lifetime> {
        let scope = self.scope.nest().map_err(|err| self.api().misuse(err))?;
        trace!(
            target: "lifetime",
            id = scope.id,
            parent = self.scope.id,
            depth = scope.depth,
            "nested lifetime started"
        );
        Ok(Self { scope })
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.scope.id
    }

    /// Nesting depth, 0 for a top-level lifetime
    #[inline]
    pub fn depth(&self) -> usize {
        self.scope.depth
    }

    #[inline]
    pub fn api(&self) -> &Arc<Api> {
        &self.scope.api
    }

    /// Values still owned
    pub fn len(&self) -> usize {
        self.scope.live()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once this lifetime or an ancestor has ended
    pub fn is_ended(&self) -> bool {
        self.scope.is_ended()
    }

    /// Release everything still owned, children first; returns the count
    pub fn end(self) -> usize {
        self.scope.end()
    }

    #[inline]
    pub(crate) fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }
}

impl Drop for Lifetime {
    fn drop(&mut self) {
        self.scope.end();
    }
}

impl core::fmt::Debug for Lifetime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Lifetime")
            .field("id", &self.scope.id)
            .field("depth", &self.scope.depth)
            .field("live", &self.len())
            .finish()
    }
}
