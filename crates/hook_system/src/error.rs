//! Error types for the hook system.

use thiserror::Error;

/// Errors raised by a method invocation.
///
/// These travel through pending replies, which are shared between every
/// observer of a call, so the type is `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MethodError {
    /// The target has no method with this name.
    #[error("{class} has no method `{method}`")]
    UnknownMethod { class: String, method: String },
    /// A method was invoked with a receiver of the wrong concrete type.
    #[error("receiver of `{method}` is not a {expected}")]
    ReceiverMismatch {
        method: String,
        expected: &'static str,
    },
    /// The arguments did not match what the method expects.
    #[error("invalid arguments for `{method}`: {reason}")]
    InvalidArguments { method: String, reason: String },
    /// The method ran and failed.
    #[error("{0}")]
    Failed(String),
}

impl MethodError {
    /// Shorthand for [`MethodError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Shorthand for [`MethodError::InvalidArguments`].
    pub fn invalid_arguments(method: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors returned by [`InjectionEngine::inject`](crate::InjectionEngine::inject).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InjectError {
    /// The named method does not exist on the target, so there is nothing
    /// to intercept.
    #[error("cannot intercept `{method}` on {class}: no such method")]
    InvalidTarget { class: String, method: String },
}

/// Failure outcome of an `around` callback.
///
/// `Method` is the call's own error and propagates to the caller, which is
/// what `?` on [`AroundContext::proceed`](crate::AroundContext::proceed)
/// produces. `Callback` means the callback itself broke; the dispatcher logs
/// it and skips that layer.
#[derive(Debug, Error)]
pub enum HookError {
    #[error(transparent)]
    Method(#[from] MethodError),
    #[error(transparent)]
    Callback(#[from] anyhow::Error),
}

impl HookError {
    /// Builds a [`HookError::Callback`] from a message.
    pub fn callback(message: impl std::fmt::Display) -> Self {
        Self::Callback(anyhow::anyhow!("{message}"))
    }
}
