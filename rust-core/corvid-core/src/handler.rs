//! # Route Handlers
//!
//! Plain closures are adapted into one uniform [`Handler`] shape when a route
//! is registered:
//!
//! ```text
//! || "Hello World!"
//! |a: i64, b: i64| (a + b).to_string()
//! |req: &Request, count: i64| ...
//! Handler::from_async(|req, params| async move { ... })
//! ```
//!
//! Each closure argument is a [`FromParam`] type and is filled from the
//! route's captures in pattern order. The argument list is checked against
//! the pattern once, at registration, so a call never sees a capture of the
//! wrong kind.

use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::{HandlerResult, IntoResponse};
use crate::types::{ParamType, ParamValue, Params};
use futures_util::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type HandlerFn = dyn Fn(Request, Params) -> BoxFuture<'static, HandlerResult> + Send + Sync;

/// Type-erased route handler
#[derive(Clone)]
pub struct Handler {
    inner: Arc<HandlerFn>,
    /// Declared argument kinds; `None` accepts any capture list
    signature: Option<Vec<ArgSpec>>,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

impl Handler {
    /// Wrap an async function of the request and its raw captures
    ///
    /// The captures are not checked against the route pattern.
    pub fn from_async<F, Fut, R>(f: F) -> Self
    where
        F: Fn(Request, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse,
    {
        Self {
            inner: Arc::new(move |req, params| {
                let fut = f(req, params);
                async move { fut.await.into_response() }.boxed()
            }),
            signature: None,
        }
    }

    /// Wrap a synchronous body with a fixed argument list
    ///
    /// `f` runs inside the returned future so a panic surfaces when the
    /// future is polled.
    fn from_sync<F>(signature: Vec<ArgSpec>, f: F) -> Self
    where
        F: Fn(Request, Params) -> HandlerResult + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self {
            inner: Arc::new(move |req, params| {
                let f = Arc::clone(&f);
                async move { f(req, params) }.boxed()
            }),
            signature: Some(signature),
        }
    }

    /// Invoke the handler
    pub fn call(&self, req: Request, params: Params) -> BoxFuture<'static, HandlerResult> {
        (self.inner)(req, params)
    }

    /// Number of captures the handler takes, when declared
    #[must_use]
    pub fn arity(&self) -> Option<usize> {
        self.signature.as_ref().map(Vec::len)
    }

    /// Check the handler's arguments against a pattern's capture types
    ///
    /// # Errors
    ///
    /// Returns `Error::HandlerMismatch` when the argument count differs or
    /// an argument cannot hold the capture at its position.
    pub fn check(&self, pattern: &str, captures: &[ParamType]) -> Result<()> {
        let Some(signature) = &self.signature else {
            return Ok(());
        };
        let mismatch = |reason: String| Error::HandlerMismatch {
            pattern: pattern.to_string(),
            reason,
        };

        if signature.len() != captures.len() {
            return Err(mismatch(format!(
                "pattern has {} captures, handler takes {}",
                captures.len(),
                signature.len()
            )));
        }
        for (idx, (arg, capture)) in signature.iter().zip(captures).enumerate() {
            if !(arg.accepts)(*capture) {
                return Err(mismatch(format!(
                    "argument {idx} is {} but the capture is {capture}",
                    arg.type_name
                )));
            }
        }
        Ok(())
    }
}

/// Declared kind of one handler argument
#[derive(Clone, Copy)]
pub struct ArgSpec {
    type_name: &'static str,
    accepts: fn(ParamType) -> bool,
}

impl ArgSpec {
    fn of<T: FromParam>() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            accepts: T::accepts,
        }
    }
}

impl fmt::Debug for ArgSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

/// Types a route capture can be converted into
pub trait FromParam: Sized + Send + 'static {
    /// Whether a capture of `param_type` can feed this type
    fn accepts(param_type: ParamType) -> bool;

    /// Convert a captured value
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedRequest` when the value does not fit.
    fn from_param(value: ParamValue) -> Result<Self>;
}

fn wrong_kind(expected: &str, value: &ParamValue) -> Error {
    Error::malformed(format!("expected {expected} capture, got {value}"))
}

impl FromParam for i64 {
    fn accepts(param_type: ParamType) -> bool {
        param_type == ParamType::Int
    }

    fn from_param(value: ParamValue) -> Result<Self> {
        value.as_int().ok_or_else(|| wrong_kind("int", &value))
    }
}

impl FromParam for i32 {
    fn accepts(param_type: ParamType) -> bool {
        param_type == ParamType::Int
    }

    fn from_param(value: ParamValue) -> Result<Self> {
        let wide = i64::from_param(value)?;
        Self::try_from(wide).map_err(|_| Error::malformed(format!("{wide} out of range for i32")))
    }
}

impl FromParam for u64 {
    fn accepts(param_type: ParamType) -> bool {
        param_type == ParamType::Uint
    }

    fn from_param(value: ParamValue) -> Result<Self> {
        value.as_uint().ok_or_else(|| wrong_kind("uint", &value))
    }
}

impl FromParam for u32 {
    fn accepts(param_type: ParamType) -> bool {
        param_type == ParamType::Uint
    }

    fn from_param(value: ParamValue) -> Result<Self> {
        let wide = u64::from_param(value)?;
        Self::try_from(wide).map_err(|_| Error::malformed(format!("{wide} out of range for u32")))
    }
}

impl FromParam for f64 {
    fn accepts(param_type: ParamType) -> bool {
        param_type == ParamType::Double
    }

    fn from_param(value: ParamValue) -> Result<Self> {
        value.as_float().ok_or_else(|| wrong_kind("double", &value))
    }
}

impl FromParam for String {
    fn accepts(param_type: ParamType) -> bool {
        matches!(param_type, ParamType::String | ParamType::Path)
    }

    fn from_param(value: ParamValue) -> Result<Self> {
        match value {
            ParamValue::String(s) => Ok(s),
            other => Err(wrong_kind("string", &other)),
        }
    }
}

impl FromParam for ParamValue {
    fn accepts(_: ParamType) -> bool {
        true
    }

    fn from_param(value: ParamValue) -> Result<Self> {
        Ok(value)
    }
}

fn next_arg<T: FromParam>(values: &mut impl Iterator<Item = ParamValue>) -> Result<T> {
    let value = values
        .next()
        .ok_or_else(|| Error::malformed("missing path capture"))?;
    T::from_param(value)
}

/// Marker for closures taking only captures
#[derive(Debug)]
pub enum Plain {}

/// Marker for closures taking `&Request` before the captures
#[derive(Debug)]
pub enum WithRequest {}

/// Conversion of a closure into a [`Handler`]
///
/// `Args` only disambiguates the blanket impls and is inferred.
pub trait IntoHandler<Args>: Send + Sync + 'static {
    /// Build the uniform handler
    fn into_handler(self) -> Handler;
}

impl IntoHandler<()> for Handler {
    fn into_handler(self) -> Handler {
        self
    }
}

macro_rules! impl_into_handler {
    ($($arg:ident),*) => {
        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, R, $($arg,)*> IntoHandler<(Plain, ($($arg,)*))> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: IntoResponse,
            $($arg: FromParam,)*
        {
            fn into_handler(self) -> Handler {
                Handler::from_sync(vec![$(ArgSpec::of::<$arg>()),*], move |_req, params| {
                    let mut values = params.into_vec().into_iter();
                    $(let $arg = next_arg::<$arg>(&mut values)?;)*
                    self($($arg),*).into_response()
                })
            }
        }

        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, R, $($arg,)*> IntoHandler<(WithRequest, ($($arg,)*))> for F
        where
            F: Fn(&Request, $($arg),*) -> R + Send + Sync + 'static,
            R: IntoResponse,
            $($arg: FromParam,)*
        {
            fn into_handler(self) -> Handler {
                Handler::from_sync(vec![$(ArgSpec::of::<$arg>()),*], move |req, params| {
                    let mut values = params.into_vec().into_iter();
                    $(let $arg = next_arg::<$arg>(&mut values)?;)*
                    self(&req, $($arg),*).into_response()
                })
            }
        }
    };
}

impl_into_handler!();
impl_into_handler!(T1);
impl_into_handler!(T1, T2);
impl_into_handler!(T1, T2, T3);
impl_into_handler!(T1, T2, T3, T4);
impl_into_handler!(T1, T2, T3, T4, T5);
