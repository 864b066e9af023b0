//! The interception engine.
//!
//! The engine keeps a side-table keyed by `(object identity, method name)`.
//! The first interception on a key captures the method currently installed
//! in the object's [`MethodTable`] as the *original* and installs a
//! dispatcher in its place. Later interceptions on the same key only extend
//! the point list the dispatcher reads on every call. When the last point is
//! removed the original is put back and forgotten.
//!
//! # Examples
//!
//! ```rust
//! use hook_system::{impl_injectable, Callback, InjectionEngine, InjectableExt, MethodTable, Reply};
//! use serde_json::json;
//!
//! struct Echo {
//!     methods: MethodTable,
//! }
//! impl_injectable!(Echo, "Echo", methods);
//!
//! let echo = Echo {
//!     methods: MethodTable::new().with_method::<Echo, _>("echo", |_, args| {
//!         Ok(Reply::ready(args.first().cloned().unwrap_or_default()))
//!     }),
//! };
//!
//! let engine = InjectionEngine::new();
//! let shout = Callback::around(|ctx| {
//!     let reply = ctx.proceed()?;
//!     Ok(reply.map(|v| json!(v.as_str().unwrap_or_default().to_uppercase())))
//! });
//! engine.inject(&echo, "echo", shout.clone(), 10).unwrap();
//!
//! let reply = echo.invoke("echo", vec![json!("hi")]).unwrap();
//! assert_eq!(reply.as_ready(), Some(&json!("HI")));
//!
//! engine.remove_injection(&echo, "echo", &shout);
//! let reply = echo.invoke("echo", vec![json!("hi")]).unwrap();
//! assert_eq!(reply.as_ready(), Some(&json!("hi")));
//! ```

use crate::context::{Callback, InjectionKind};
use crate::dispatch::{dispatcher, DispatchState};
use crate::error::InjectError;
use crate::method::{Injectable, MethodFn, TargetId, WeakMethodTable};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// One registered interception callback.
#[derive(Clone)]
pub struct InjectionPoint {
    target: TargetId,
    class_name: String,
    method: String,
    callback: Callback,
    priority: i32,
}

impl InjectionPoint {
    pub fn target(&self) -> TargetId {
        self.target
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn callback(&self) -> &Callback {
        &self.callback
    }

    pub fn kind(&self) -> InjectionKind {
        self.callback.kind()
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }
}

impl fmt::Debug for InjectionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionPoint")
            .field("target", &self.target)
            .field("class_name", &self.class_name)
            .field("method", &self.method)
            .field("kind", &self.kind())
            .field("priority", &self.priority)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SlotKey {
    target: TargetId,
    method: String,
}

impl SlotKey {
    fn new(target: TargetId, method: &str) -> Self {
        Self {
            target,
            method: method.to_string(),
        }
    }
}

struct Slot {
    state: Arc<DispatchState>,
    dispatcher: MethodFn,
    table: WeakMethodTable,
}

/// Wraps object methods with ordered before/after/around callbacks.
pub struct InjectionEngine {
    slots: Mutex<HashMap<SlotKey, Slot>>,
}

impl InjectionEngine {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Attaches `callback` to `method` on `target`.
    ///
    /// # Errors
    ///
    /// [`InjectError::InvalidTarget`] if `target` has no such method. Engine
    /// state is left untouched in that case.
    pub fn inject(
        &self,
        target: &dyn Injectable,
        method: &str,
        callback: Callback,
        priority: i32,
    ) -> Result<(), InjectError> {
        let table = target.methods();
        let key = SlotKey::new(table.id(), method);
        let kind = callback.kind();
        let point = InjectionPoint {
            target: table.id(),
            class_name: target.kind().to_string(),
            method: method.to_string(),
            callback,
            priority,
        };

        let mut slots = self.slots.lock();
        Self::evict_dropped(&mut slots);
        if let Some(slot) = slots.get(&key) {
            slot.state.push(point);
            // Put the dispatcher back if something restored the bare original.
            if table.install_if(method, &slot.state.original, slot.dispatcher.clone()) {
                debug!(class = %target.kind(), method, "reinstalled dispatcher");
            }
            debug!(class = %target.kind(), target = %table.id(), method, %kind, priority, "added interception");
            return Ok(());
        }

        let original = table.get(method).ok_or_else(|| InjectError::InvalidTarget {
            class: target.kind().to_string(),
            method: method.to_string(),
        })?;

        let state = Arc::new(DispatchState::new(
            target.kind().to_string(),
            method.to_string(),
            original,
        ));
        state.push(point);
        let installed = dispatcher(state.clone());
        table.install(method, installed.clone());
        slots.insert(
            key,
            Slot {
                state,
                dispatcher: installed,
                table: table.downgrade(),
            },
        );

        debug!(class = %target.kind(), target = %table.id(), method, %kind, priority, "wrapped method");
        Ok(())
    }

    /// Removes the point carrying `callback`. Returns whether one was found.
    ///
    /// Removing the last point of a key restores the original method.
    pub fn remove_injection(&self, target: &dyn Injectable, method: &str, callback: &Callback) -> bool {
        let key = SlotKey::new(target.identity(), method);
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get(&key) else {
            return false;
        };
        if !slot.state.remove(callback) {
            return false;
        }
        debug!(class = %target.kind(), method, "removed interception");

        if slot.state.is_empty() {
            if let Some(slot) = slots.remove(&key) {
                Self::restore(&slot);
            }
        }
        true
    }

    /// Bulk removal.
    ///
    /// | target | method | clears |
    /// |--------|--------|--------|
    /// | some   | some   | that method of that target |
    /// | some   | none   | every method of that target |
    /// | none   | some   | that method on every target |
    /// | none   | none   | everything |
    pub fn clear_injections(&self, target: Option<&dyn Injectable>, method: Option<&str>) -> usize {
        match (target, method) {
            (Some(target), Some(method)) => self.clear_method(target, method),
            (Some(target), None) => self.clear_target(target),
            (None, Some(method)) => self.clear_where(|key| key.method == method),
            (None, None) => self.clear_all(),
        }
    }

    /// Clears one key. Returns the number of points removed.
    pub fn clear_method(&self, target: &dyn Injectable, method: &str) -> usize {
        let key = SlotKey::new(target.identity(), method);
        let removed = self.slots.lock().remove(&key);
        match removed {
            Some(slot) => {
                let count = slot.state.snapshot().len();
                Self::restore(&slot);
                count
            }
            None => 0,
        }
    }

    /// Clears every method of `target`.
    pub fn clear_target(&self, target: &dyn Injectable) -> usize {
        let id = target.identity();
        self.clear_where(|key| key.target == id)
    }

    /// Restores every wrapped method and drops all state.
    pub fn clear_all(&self) -> usize {
        self.clear_where(|_| true)
    }

    fn clear_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&SlotKey) -> bool,
    {
        let removed: Vec<Slot> = {
            let mut slots = self.slots.lock();
            let keys: Vec<SlotKey> = slots.keys().filter(|key| predicate(key)).cloned().collect();
            keys.iter().filter_map(|key| slots.remove(key)).collect()
        };

        let mut count = 0;
        for slot in &removed {
            count += slot.state.snapshot().len();
            Self::restore(slot);
        }
        count
    }

    /// Points on one key, in dispatch order.
    pub fn get_injections(&self, target: &dyn Injectable, method: &str) -> Vec<InjectionPoint> {
        let key = SlotKey::new(target.identity(), method);
        self.slots
            .lock()
            .get(&key)
            .map(|slot| slot.state.snapshot().as_ref().clone())
            .unwrap_or_default()
    }

    pub fn has_injections(&self, target: &dyn Injectable, method: &str) -> bool {
        let key = SlotKey::new(target.identity(), method);
        self.slots
            .lock()
            .get(&key)
            .map(|slot| !slot.state.is_empty())
            .unwrap_or(false)
    }

    /// Every point on every key, grouped by class, target and method.
    pub fn list_injections(&self) -> Vec<InjectionPoint> {
        let mut slots = self.slots.lock();
        Self::evict_dropped(&mut slots);
        let mut snapshots: Vec<(SlotKey, String, Arc<Vec<InjectionPoint>>)> = slots
            .iter()
            .map(|(key, slot)| (key.clone(), slot.state.class_name.clone(), slot.state.snapshot()))
            .collect();
        drop(slots);
        snapshots.sort_by(|a, b| {
            (&a.1, a.0.target, &a.0.method).cmp(&(&b.1, b.0.target, &b.0.method))
        });
        snapshots
            .into_iter()
            .flat_map(|(_, _, points)| points.as_ref().clone())
            .collect()
    }

    /// Number of `(object, method)` keys currently wrapped.
    pub fn wrapped_count(&self) -> usize {
        let mut slots = self.slots.lock();
        Self::evict_dropped(&mut slots);
        slots.len()
    }

    /// Forgets keys whose object has been dropped. Returns how many went.
    pub fn prune(&self) -> usize {
        Self::evict_dropped(&mut self.slots.lock())
    }

    fn evict_dropped(slots: &mut HashMap<SlotKey, Slot>) -> usize {
        let before = slots.len();
        slots.retain(|_, slot| slot.table.is_alive());
        let evicted = before - slots.len();
        if evicted > 0 {
            debug!(evicted, "forgot interceptions of dropped targets");
        }
        evicted
    }

    fn restore(slot: &Slot) {
        let Some(table) = slot.table.upgrade() else {
            debug!(method = %slot.state.method, "target dropped before restore");
            return;
        };
        let method = slot.state.method.as_str();
        if !table.install_if(method, &slot.dispatcher, slot.state.original.clone()) {
            // Another layer was installed on top of ours and captured our
            // dispatcher; it stays as an empty pass-through to the original.
            warn!(
                class = %slot.state.class_name,
                method,
                "method was rewrapped elsewhere; leaving pass-through dispatcher in place"
            );
        } else {
            debug!(class = %slot.state.class_name, method, "restored original method");
        }
    }
}

impl Default for InjectionEngine {
    fn default() -> Self {
        Self::new()
    }
}
