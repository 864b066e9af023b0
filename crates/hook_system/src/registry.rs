//! Directory of live interceptable objects by `(class name, instance id)`.
//!
//! The registry does not own what it lists: entries are weak references, so
//! dropping an entry never drops the object and an object dropped without
//! being unregistered simply stops showing up in lookups.

use crate::method::Injectable;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Instance id used when the caller has none of its own.
pub const DEFAULT_INSTANCE_ID: &str = "default";

type InstanceMap = IndexMap<String, Weak<dyn Injectable>>;

/// Maps `(class name, instance id)` to live objects.
pub struct InstanceRegistry {
    classes: RwLock<IndexMap<String, InstanceMap>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self {
            classes: RwLock::new(IndexMap::new()),
        }
    }

    /// Registers `object` under its kind and `id`, replacing any object
    /// already registered at that key.
    pub fn register<T: Injectable>(&self, object: &Arc<T>, id: &str) {
        let object: Arc<dyn Injectable> = object.clone();
        self.register_dyn(&object, id);
    }

    pub fn register_dyn(&self, object: &Arc<dyn Injectable>, id: &str) {
        let class_name = object.kind().to_string();
        debug!(class = %class_name, id, "registered instance");
        self.classes
            .write()
            .entry(class_name)
            .or_default()
            .insert(id.to_string(), Arc::downgrade(object));
    }

    /// Removes the entry at `(class_name, id)` if there is one.
    pub fn unregister(&self, class_name: &str, id: &str) {
        let mut classes = self.classes.write();
        let Some(instances) = classes.get_mut(class_name) else {
            return;
        };
        if instances.shift_remove(id).is_some() {
            debug!(class = %class_name, id, "unregistered instance");
        }
        if instances.is_empty() {
            classes.shift_remove(class_name);
        }
    }

    pub fn get_instance(&self, class_name: &str, id: &str) -> Option<Arc<dyn Injectable>> {
        self.classes
            .read()
            .get(class_name)
            .and_then(|instances| instances.get(id))
            .and_then(Weak::upgrade)
    }

    /// Live objects of `class_name` in registration order.
    pub fn get_instances(&self, class_name: &str) -> Vec<Arc<dyn Injectable>> {
        self.classes
            .read()
            .get(class_name)
            .map(|instances| instances.values().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }

    /// Ids of the live objects of `class_name` in registration order.
    pub fn get_instance_ids(&self, class_name: &str) -> Vec<String> {
        self.classes
            .read()
            .get(class_name)
            .map(|instances| {
                instances
                    .iter()
                    .filter(|(_, weak)| weak.strong_count() > 0)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Classes with at least one live instance.
    pub fn get_all_classes(&self) -> Vec<String> {
        self.classes
            .read()
            .iter()
            .filter(|(_, instances)| instances.values().any(|weak| weak.strong_count() > 0))
            .map(|(class_name, _)| class_name.clone())
            .collect()
    }

    pub fn is_injectable(&self, class_name: &str) -> bool {
        self.classes
            .read()
            .get(class_name)
            .map(|instances| instances.values().any(|weak| weak.strong_count() > 0))
            .unwrap_or(false)
    }

    /// Drops entries whose objects are gone. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let mut classes = self.classes.write();
        let mut dropped = 0;
        for instances in classes.values_mut() {
            let before = instances.len();
            instances.retain(|_, weak| weak.strong_count() > 0);
            dropped += before - instances.len();
        }
        classes.retain(|_, instances| !instances.is_empty());
        dropped
    }

    pub fn clear(&self) {
        self.classes.write().clear();
    }
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
