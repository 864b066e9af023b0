//! The dispatcher installed in place of an intercepted method.

use crate::context::{AfterContext, AroundContext, CallContext, Callback, InjectionKind};
use crate::engine::InjectionPoint;
use crate::error::HookError;
use crate::method::{Args, Injectable, MethodFn, MethodResult};
use parking_lot::RwLock;
use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Live interception state of one `(object, method)` key.
pub(crate) struct DispatchState {
    pub(crate) class_name: String,
    pub(crate) method: String,
    pub(crate) original: MethodFn,
    points: RwLock<Arc<Vec<InjectionPoint>>>,
}

impl DispatchState {
    pub(crate) fn new(class_name: String, method: String, original: MethodFn) -> Self {
        Self {
            class_name,
            method,
            original,
            points: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// The current point list. Mutations replace the list, so a snapshot
    /// stays stable for as long as it is held.
    pub(crate) fn snapshot(&self) -> Arc<Vec<InjectionPoint>> {
        self.points.read().clone()
    }

    /// Appends a point and re-sorts by descending priority. The sort is
    /// stable, so equal priorities keep insertion order.
    pub(crate) fn push(&self, point: InjectionPoint) {
        let mut points = self.points.write();
        let mut next = Vec::with_capacity(points.len() + 1);
        next.extend(points.iter().cloned());
        next.push(point);
        next.sort_by(|a, b| b.priority().cmp(&a.priority()));
        *points = Arc::new(next);
    }

    /// Removes the first point carrying `callback`.
    pub(crate) fn remove(&self, callback: &Callback) -> bool {
        let mut points = self.points.write();
        let Some(index) = points.iter().position(|p| p.callback().same_as(callback)) else {
            return false;
        };
        let mut next = (**points).clone();
        next.remove(index);
        *points = Arc::new(next);
        true
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.points.read().is_empty()
    }

    pub(crate) fn dispatch(&self, receiver: &dyn Injectable, args: Args) -> MethodResult {
        let points = self.snapshot();
        if points.is_empty() {
            return (self.original)(receiver, args);
        }

        let mut before = Vec::new();
        let mut after = Vec::new();
        let mut around = Vec::new();
        for point in points.iter() {
            match point.callback() {
                Callback::Before(_) => before.push(point),
                Callback::After(_) => after.push(point),
                Callback::Around(_) => around.push(point),
            }
        }

        for point in &before {
            if let Callback::Before(callback) = point.callback() {
                let ctx = CallContext {
                    target: receiver,
                    method: &self.method,
                    args: &args,
                };
                self.isolate(point, || callback(&ctx));
            }
        }

        // Errors from the method itself reach the caller untouched and skip
        // the `after` callbacks.
        let result = if around.is_empty() {
            (self.original)(receiver, args.clone())?
        } else {
            self.run_around(&around, receiver, args.clone())?
        };

        for point in &after {
            if let Callback::After(callback) = point.callback() {
                let ctx = AfterContext {
                    target: receiver,
                    method: &self.method,
                    args: &args,
                    result: &result,
                };
                self.isolate(point, || callback(&ctx));
            }
        }

        Ok(result)
    }

    /// Runs `layers[0]` around the rest of the chain; the innermost link is
    /// the original method.
    fn run_around(
        &self,
        layers: &[&InjectionPoint],
        receiver: &dyn Injectable,
        args: Args,
    ) -> MethodResult {
        let Some((point, inner)) = layers.split_first() else {
            return (self.original)(receiver, args);
        };
        let Callback::Around(callback) = point.callback() else {
            return self.run_around(inner, receiver, args);
        };

        let next = |forwarded: Args| self.run_around(inner, receiver, forwarded);
        let unwound = Cell::new(false);
        let ctx = AroundContext::new(receiver, &self.method, args.clone(), &next, &unwound);

        match panic::catch_unwind(AssertUnwindSafe(|| callback(ctx))) {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(HookError::Method(error))) => Err(error),
            Ok(Err(HookError::Callback(error))) => {
                self.report(point, &error.to_string(), "interception callback failed; skipping layer");
                self.run_around(inner, receiver, args)
            }
            Err(payload) => {
                if unwound.get() {
                    panic::resume_unwind(payload);
                }
                self.report(point, &panic_message(&*payload), "interception callback panicked; skipping layer");
                self.run_around(inner, receiver, args)
            }
        }
    }

    /// Runs a before/after callback, logging and swallowing any failure.
    fn isolate<F>(&self, point: &InjectionPoint, f: F)
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(())) => {}
            Ok(Err(error)) => self.report(point, &error.to_string(), "interception callback failed"),
            Err(payload) => {
                self.report(point, &panic_message(&*payload), "interception callback panicked")
            }
        }
    }

    fn report(&self, point: &InjectionPoint, error: &str, message: &str) {
        let kind: InjectionKind = point.kind();
        warn!(
            class = %self.class_name,
            method = %self.method,
            kind = %kind,
            priority = point.priority(),
            error = %error,
            "{}",
            message
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Builds the method value installed in place of an intercepted method.
pub(crate) fn dispatcher(state: Arc<DispatchState>) -> MethodFn {
    Arc::new(move |receiver: &dyn Injectable, args: Args| state.dispatch(receiver, args))
}
