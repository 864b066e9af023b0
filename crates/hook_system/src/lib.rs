//! # Hook System
//!
//! Runtime method interception for long-lived objects, plus the registry
//! used to find those objects by class name and instance id.
//!
//! ## Components
//!
//! * [`InstanceRegistry`] - process-wide directory from `(class name,
//!   instance id)` to a live object. Entries are weak.
//! * [`InjectionEngine`] - wraps named methods of an object with ordered
//!   `before`, `after` and `around` callbacks, and unwinds them losslessly.
//!
//! The two are independent: the registry is only how extension code finds
//! the objects it hands to the engine.
//!
//! ## Making an object interceptable
//!
//! Implement [`Injectable`] for a type that owns a [`MethodTable`], usually
//! through [`impl_injectable!`]. Calls routed through the table with
//! [`InjectableExt::invoke`] (or `<dyn Injectable>::invoke`) pass through any
//! installed interception chain.
//!
//! ## Failure policy
//!
//! Every callback runs isolated: errors and panics from callbacks are logged
//! with `tracing` and never reach the caller, and never stop other callbacks
//! or the original method. Errors and panics of the original method itself
//! propagate unchanged.
//!
//! ## Process-wide instances
//!
//! [`registry()`] and [`engine()`] return the shared instances used by the
//! console. Tests and embedders can build their own with `new()`.

pub mod context;
mod dispatch;
pub mod engine;
pub mod error;
pub mod method;
pub mod registry;

pub use context::{
    reject, AfterContext, AroundContext, CallContext, Callback, InjectionKind, DEFAULT_PRIORITY,
};
pub use engine::{InjectionEngine, InjectionPoint};
pub use error::{HookError, InjectError, MethodError};
pub use method::{
    same_method, string_arg, Args, Injectable, InjectableExt, MethodFn, MethodResult, MethodTable,
    PendingReply, Reply, TargetId,
};
pub use registry::{InstanceRegistry, DEFAULT_INSTANCE_ID};

use once_cell::sync::Lazy;
use std::sync::Arc;

static REGISTRY: Lazy<Arc<InstanceRegistry>> = Lazy::new(|| Arc::new(InstanceRegistry::new()));
static ENGINE: Lazy<Arc<InjectionEngine>> = Lazy::new(|| Arc::new(InjectionEngine::new()));

/// The process-wide instance registry.
pub fn registry() -> Arc<InstanceRegistry> {
    REGISTRY.clone()
}

/// The process-wide interception engine.
pub fn engine() -> Arc<InjectionEngine> {
    ENGINE.clone()
}
