//! Interceptable objects and their per-instance method tables.
//!
//! An object takes part in interception by implementing [`Injectable`]: it
//! declares a stable kind tag and owns a [`MethodTable`]. The table is a
//! side-table of named method values; the engine swaps entries in it, so
//! wrapping a method on one instance never affects another instance of the
//! same type.

use crate::error::MethodError;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::RwLock;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Positional method arguments.
pub type Args = Vec<Value>;

/// Outcome of a method call.
pub type MethodResult = Result<Reply, MethodError>;

/// A callable method value stored in a [`MethodTable`].
///
/// The first parameter is the receiver the call was made on.
pub type MethodFn = Arc<dyn Fn(&dyn Injectable, Args) -> MethodResult + Send + Sync>;

/// A pending reply that every observer of a call can await.
pub type PendingReply = Shared<BoxFuture<'static, Result<Value, MethodError>>>;

/// Returns true when both handles point at the same method value.
pub fn same_method(a: &MethodFn, b: &MethodFn) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

/// The value produced by a method.
///
/// Asynchronous methods return [`Reply::Pending`]. Interception forwards
/// pending replies untouched; awaiting them is the caller's business.
#[derive(Clone)]
pub enum Reply {
    Ready(Value),
    Pending(PendingReply),
}

impl Reply {
    pub fn ready(value: impl Into<Value>) -> Self {
        Self::Ready(value.into())
    }

    /// A reply carrying `null`.
    pub fn unit() -> Self {
        Self::Ready(Value::Null)
    }

    /// Wraps a future as a pending reply.
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value, MethodError>> + Send + 'static,
    {
        Self::Pending(future.boxed().shared())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// The value of a ready reply.
    pub fn as_ready(&self) -> Option<&Value> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Pending(_) => None,
        }
    }

    /// Waits for the reply's value.
    pub async fn resolve(self) -> Result<Value, MethodError> {
        match self {
            Self::Ready(value) => Ok(value),
            Self::Pending(pending) => pending.await,
        }
    }

    /// Transforms the value, now if ready or once the pending reply settles.
    pub fn map<F>(self, f: F) -> Self
    where
        F: FnOnce(Value) -> Value + Send + 'static,
    {
        match self {
            Self::Ready(value) => Self::Ready(f(value)),
            Self::Pending(pending) => Self::pending(async move { pending.await.map(f) }),
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Self::Ready(value)
    }
}

/// Process-unique identity of an interceptable object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetId(u64);

impl TargetId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An object whose methods can be looked up and intercepted by name.
///
/// # Examples
///
/// ```rust
/// use hook_system::{Injectable, InjectableExt, MethodTable, Reply};
/// use std::any::Any;
///
/// struct Counter {
///     methods: MethodTable,
/// }
///
/// impl Counter {
///     fn new() -> Self {
///         let methods = MethodTable::new()
///             .with_method::<Counter, _>("double", |_, args| {
///                 let n = args.first().and_then(|v| v.as_i64()).unwrap_or(0);
///                 Ok(Reply::ready(n * 2))
///             });
///         Self { methods }
///     }
/// }
///
/// impl Injectable for Counter {
///     fn kind(&self) -> &str { "Counter" }
///     fn methods(&self) -> &MethodTable { &self.methods }
///     fn as_any(&self) -> &dyn Any { self }
/// }
///
/// let counter = Counter::new();
/// let reply = counter.invoke("double", vec![21.into()]).unwrap();
/// assert_eq!(reply.as_ready(), Some(&serde_json::json!(42)));
/// ```
pub trait Injectable: Any + Send + Sync {
    /// Stable class name used as the registry key.
    fn kind(&self) -> &str;

    /// The object's method table.
    fn methods(&self) -> &MethodTable;

    fn as_any(&self) -> &dyn Any;
}

impl<'a> dyn Injectable + 'a {
    /// Calls a method through the table, interceptions included.
    pub fn invoke(&self, method: &str, args: Args) -> MethodResult {
        self.methods().invoke(self, method, args)
    }

    pub fn identity(&self) -> TargetId {
        self.methods().id()
    }

    pub fn downcast_ref<T: Injectable>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// [`Injectable::invoke`]-style calls on concrete types.
pub trait InjectableExt: Injectable + Sized {
    fn invoke(&self, method: &str, args: Args) -> MethodResult {
        self.methods().invoke(self, method, args)
    }

    fn identity(&self) -> TargetId {
        self.methods().id()
    }
}

impl<T: Injectable> InjectableExt for T {}

struct TableInner {
    id: TargetId,
    slots: RwLock<HashMap<String, MethodFn>>,
}

/// Named method slots owned by one object.
///
/// Cloning the table yields another handle to the same slots.
#[derive(Clone)]
pub struct MethodTable {
    inner: Arc<TableInner>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TableInner {
                id: TargetId::next(),
                slots: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    /// Defines (or redefines) a method whose receiver is a `T`.
    ///
    /// Invoking the method on a receiver of another type yields
    /// [`MethodError::ReceiverMismatch`].
    pub fn define<T, F>(&self, name: &str, method: F)
    where
        T: Injectable,
        F: Fn(&T, Args) -> MethodResult + Send + Sync + 'static,
    {
        let method_name = name.to_string();
        let wrapped: MethodFn = Arc::new(move |receiver: &dyn Injectable, args: Args| {
            match receiver.downcast_ref::<T>() {
                Some(this) => method(this, args),
                None => Err(MethodError::ReceiverMismatch {
                    method: method_name.clone(),
                    expected: std::any::type_name::<T>(),
                }),
            }
        });
        self.inner.slots.write().insert(name.to_string(), wrapped);
    }

    /// Builder form of [`MethodTable::define`].
    pub fn with_method<T, F>(self, name: &str, method: F) -> Self
    where
        T: Injectable,
        F: Fn(&T, Args) -> MethodResult + Send + Sync + 'static,
    {
        self.define::<T, F>(name, method);
        self
    }

    /// Defines a method from a raw method value.
    pub fn define_raw(&self, name: &str, method: MethodFn) {
        self.inner.slots.write().insert(name.to_string(), method);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.slots.read().contains_key(name)
    }

    /// The currently installed method value.
    pub fn get(&self, name: &str) -> Option<MethodFn> {
        self.inner.slots.read().get(name).cloned()
    }

    /// Method names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.slots.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Calls `name` with `receiver` as the receiver.
    ///
    /// The slot lock is released before the method runs, so a method may
    /// freely call back into its own table.
    pub fn invoke(&self, receiver: &dyn Injectable, name: &str, args: Args) -> MethodResult {
        let method = self.get(name).ok_or_else(|| MethodError::UnknownMethod {
            class: receiver.kind().to_string(),
            method: name.to_string(),
        })?;
        method(receiver, args)
    }

    /// Replaces the installed method, returning the previous one.
    pub(crate) fn install(&self, name: &str, method: MethodFn) -> Option<MethodFn> {
        self.inner.slots.write().insert(name.to_string(), method)
    }

    /// Swaps in `replacement` only if `expected` is currently installed.
    pub(crate) fn install_if(&self, name: &str, expected: &MethodFn, replacement: MethodFn) -> bool {
        let mut slots = self.inner.slots.write();
        match slots.get(name) {
            Some(current) if same_method(current, expected) => {
                slots.insert(name.to_string(), replacement);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn downgrade(&self) -> WeakMethodTable {
        WeakMethodTable {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl Default for MethodTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("id", &self.inner.id)
            .field("methods", &self.names())
            .finish()
    }
}

/// A table handle that does not keep the object's slots alive.
#[derive(Clone)]
pub(crate) struct WeakMethodTable {
    inner: Weak<TableInner>,
}

impl WeakMethodTable {
    pub(crate) fn upgrade(&self) -> Option<MethodTable> {
        self.inner.upgrade().map(|inner| MethodTable { inner })
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

/// Reads a string argument at `index`.
pub fn string_arg<'a>(method: &str, args: &'a [Value], index: usize) -> Result<&'a str, MethodError> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(other) => Err(MethodError::invalid_arguments(
            method,
            format!("argument {index} must be a string, got {other}"),
        )),
        None => Err(MethodError::invalid_arguments(
            method,
            format!("missing argument {index}"),
        )),
    }
}

/// Implements [`Injectable`] for a type holding a [`MethodTable`] field.
///
/// ```rust
/// use hook_system::{impl_injectable, MethodTable};
///
/// struct Lamp {
///     methods: MethodTable,
/// }
///
/// impl_injectable!(Lamp, "Lamp", methods);
/// ```
#[macro_export]
macro_rules! impl_injectable {
    ($type:ty, $kind:expr, $field:ident) => {
        impl $crate::Injectable for $type {
            fn kind(&self) -> &str {
                $kind
            }

            fn methods(&self) -> &$crate::MethodTable {
                &self.$field
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Greeter {
        name: String,
        methods: MethodTable,
    }

    impl_injectable!(Greeter, "Greeter", methods);

    impl Greeter {
        fn new(name: &str) -> Self {
            let methods = MethodTable::new().with_method::<Greeter, _>("greet", |this, args| {
                let whom = string_arg("greet", &args, 0)?;
                Ok(Reply::ready(format!("{} greets {}", this.name, whom)))
            });
            Self {
                name: name.to_string(),
                methods,
            }
        }
    }

    struct Stranger {
        methods: MethodTable,
    }

    impl_injectable!(Stranger, "Stranger", methods);

    #[test]
    fn test_invoke_defined_method() {
        let greeter = Greeter::new("ada");
        let reply = greeter.invoke("greet", vec![json!("bob")]).unwrap();
        assert_eq!(reply.as_ready(), Some(&json!("ada greets bob")));
    }

    #[test]
    fn test_unknown_method() {
        let greeter = Greeter::new("ada");
        let err = greeter.invoke("wave", vec![]).unwrap_err();
        assert_eq!(
            err,
            MethodError::UnknownMethod {
                class: "Greeter".to_string(),
                method: "wave".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_argument_type() {
        let greeter = Greeter::new("ada");
        let err = greeter.invoke("greet", vec![json!(7)]).unwrap_err();
        assert!(matches!(err, MethodError::InvalidArguments { .. }));
    }

    #[test]
    fn test_receiver_mismatch() {
        let greeter = Greeter::new("ada");
        let stranger = Stranger {
            methods: MethodTable::new(),
        };
        let greet = greeter.methods.get("greet").unwrap();
        let err = greet(&stranger as &dyn Injectable, vec![json!("bob")]).unwrap_err();
        assert!(matches!(err, MethodError::ReceiverMismatch { .. }));
    }

    #[test]
    fn test_tables_have_distinct_identities() {
        let a = Greeter::new("a");
        let b = Greeter::new("b");
        assert_ne!(a.identity(), b.identity());
        assert_eq!(a.methods.clone().id(), a.identity());
    }

    #[test]
    fn test_install_if_only_swaps_expected() {
        let greeter = Greeter::new("ada");
        let original = greeter.methods.get("greet").unwrap();
        let replacement: MethodFn = Arc::new(|_: &dyn Injectable, _: Args| Ok(Reply::unit()));
        let other: MethodFn = Arc::new(|_: &dyn Injectable, _: Args| Ok(Reply::unit()));

        assert!(!greeter.methods.install_if("greet", &other, replacement.clone()));
        assert!(greeter.methods.install_if("greet", &original, replacement.clone()));
        assert!(same_method(&greeter.methods.get("greet").unwrap(), &replacement));
    }

    #[tokio::test]
    async fn test_pending_reply_map_and_resolve() {
        let reply = Reply::pending(async { Ok(json!(2)) }).map(|v| json!(v.as_i64().unwrap() + 1));
        assert!(reply.is_pending());
        let observer = reply.clone();
        assert_eq!(reply.resolve().await.unwrap(), json!(3));
        assert_eq!(observer.resolve().await.unwrap(), json!(3));
    }
}
