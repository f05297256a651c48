//! gdmarshal - marshaling core for a native engine binding
//!
//! Host calls cross the C boundary through a [`CallFrame`]; every value the
//! engine hands back is bound to the [`Api`] that produced it and to a
//! [`Lifetime`] that destroys it no later than its own end. [`Variant`]
//! carries any of the engine's 38 value kinds and dispatches every
//! behaviour to the engine by discriminant.

pub mod api;
pub mod config;
pub mod error;
pub mod frame;
pub mod handle;
pub mod lifetime;
pub mod logging;
pub mod registry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod variant;

pub use api::{Allocator, Api, ApiBuilder, Engine, SystemAllocator};
pub use config::{Config, MisusePolicy};
pub use error::{Error, ErrorClass, Result};
pub use frame::{CallFrame, NativeCall, MAX_ARGS};
pub use handle::{Builtin, Handle, Kind, Storage};
pub use lifetime::Lifetime;
pub use registry::{resolve_operator, resolve_type, Registry, TypeEntry};
pub use variant::{Iter, IterState, Operator, Variant, VariantRaw, VariantType, VariantValue};

use std::sync::Arc;
use tracing::info;

/// Build the API instance described by `config`
///
/// Loads engine metadata into the registry when configured; an unknown
/// name or a layout mismatch there aborts initialisation.
pub fn init(
    config: &Config,
    engine: Arc<dyn Engine>,
    allocator: Arc<dyn Allocator>,
) -> Result<Arc<Api>> {
    let registry = match &config.registry.metadata {
        Some(path) => Registry::load(path)?,
        None => Registry::closed(),
    };
    info!(
        target: "api",
        metadata = ?config.registry.metadata,
        misuse = ?config.handles.misuse,
        "initialising marshaling core"
    );
    Ok(Api::builder(engine)
        .allocator(allocator)
        .registry(registry)
        .misuse(config.handles.misuse)
        .build())
}
