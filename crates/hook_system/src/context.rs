//! Interception callbacks and the contexts they receive.

use crate::error::{HookError, MethodError};
use crate::method::{Args, Injectable, MethodResult, Reply};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;

/// Priority given to interceptions when the caller has no preference.
pub const DEFAULT_PRIORITY: i32 = 10;

/// Where in the call lifecycle a callback runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InjectionKind {
    Before,
    After,
    #[default]
    Around,
}

impl InjectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
            Self::Around => "around",
        }
    }
}

impl fmt::Display for InjectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InjectionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "before" => Ok(Self::Before),
            "after" => Ok(Self::After),
            "around" => Ok(Self::Around),
            other => Err(format!("unknown injection kind: {other}")),
        }
    }
}

/// What `before` callbacks see.
pub struct CallContext<'a> {
    pub target: &'a dyn Injectable,
    pub method: &'a str,
    pub args: &'a [Value],
}

/// What `after` callbacks see.
pub struct AfterContext<'a> {
    pub target: &'a dyn Injectable,
    pub method: &'a str,
    pub args: &'a [Value],
    /// The call's result, possibly still pending.
    pub result: &'a Reply,
}

/// What `around` callbacks see.
///
/// The callback decides whether and how the rest of the chain runs: call
/// [`proceed`](Self::proceed) to continue with the current arguments,
/// [`proceed_with`](Self::proceed_with) to substitute them, or return a value
/// without proceeding to short-circuit the call.
pub struct AroundContext<'a> {
    pub target: &'a dyn Injectable,
    pub method: &'a str,
    pub args: Args,
    next: &'a dyn Fn(Args) -> MethodResult,
    unwound: &'a Cell<bool>,
}

impl<'a> AroundContext<'a> {
    pub(crate) fn new(
        target: &'a dyn Injectable,
        method: &'a str,
        args: Args,
        next: &'a dyn Fn(Args) -> MethodResult,
        unwound: &'a Cell<bool>,
    ) -> Self {
        Self {
            target,
            method,
            args,
            next,
            unwound,
        }
    }

    /// Runs the inner chain with the current arguments.
    pub fn proceed(&self) -> MethodResult {
        self.proceed_with(self.args.clone())
    }

    /// Runs the inner chain with replacement arguments.
    pub fn proceed_with(&self, args: Args) -> MethodResult {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.next)(args))) {
            Ok(result) => result,
            Err(payload) => {
                // An inner panic belongs to the method, not to this callback.
                self.unwound.set(true);
                panic::resume_unwind(payload)
            }
        }
    }
}

pub type BeforeFn = Arc<dyn Fn(&CallContext<'_>) -> anyhow::Result<()> + Send + Sync>;
pub type AfterFn = Arc<dyn Fn(&AfterContext<'_>) -> anyhow::Result<()> + Send + Sync>;
pub type AroundFn = Arc<dyn Fn(AroundContext<'_>) -> Result<Reply, HookError> + Send + Sync>;

/// An interception callback; the variant decides its kind.
///
/// Callbacks are compared by identity: clones of one `Callback` are the same
/// callback, two separately built callbacks never are.
#[derive(Clone)]
pub enum Callback {
    Before(BeforeFn),
    After(AfterFn),
    Around(AroundFn),
}

impl Callback {
    /// An `around` callback, the default kind.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(AroundContext<'_>) -> Result<Reply, HookError> + Send + Sync + 'static,
    {
        Self::around(f)
    }

    pub fn before<F>(f: F) -> Self
    where
        F: Fn(&CallContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::Before(Arc::new(f))
    }

    pub fn after<F>(f: F) -> Self
    where
        F: Fn(&AfterContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::After(Arc::new(f))
    }

    pub fn around<F>(f: F) -> Self
    where
        F: Fn(AroundContext<'_>) -> Result<Reply, HookError> + Send + Sync + 'static,
    {
        Self::Around(Arc::new(f))
    }

    pub fn kind(&self) -> InjectionKind {
        match self {
            Self::Before(_) => InjectionKind::Before,
            Self::After(_) => InjectionKind::After,
            Self::Around(_) => InjectionKind::Around,
        }
    }

    /// True when `other` is this same callback.
    pub fn same_as(&self, other: &Callback) -> bool {
        self.data_ptr() == other.data_ptr()
    }

    fn data_ptr(&self) -> *const () {
        match self {
            Self::Before(f) => Arc::as_ptr(f).cast::<()>(),
            Self::After(f) => Arc::as_ptr(f).cast::<()>(),
            Self::Around(f) => Arc::as_ptr(f).cast::<()>(),
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback::{}({:p})", self.kind(), self.data_ptr())
    }
}

/// Convenience: an `around` result that fails the call with `error`.
pub fn reject(error: MethodError) -> Result<Reply, HookError> {
    Err(HookError::Method(error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("before".parse::<InjectionKind>(), Ok(InjectionKind::Before));
        assert_eq!("AFTER".parse::<InjectionKind>(), Ok(InjectionKind::After));
        assert!("sideways".parse::<InjectionKind>().is_err());
        assert_eq!(InjectionKind::default(), InjectionKind::Around);
    }

    #[test]
    fn test_callback_identity() {
        let a = Callback::before(|_| Ok(()));
        let b = Callback::before(|_| Ok(()));
        assert!(a.same_as(&a.clone()));
        assert!(!a.same_as(&b));
        assert_eq!(Callback::new(|ctx| ctx.proceed().map_err(Into::into)).kind(), InjectionKind::Around);
    }
}
