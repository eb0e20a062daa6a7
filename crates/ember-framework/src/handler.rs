//! Handler system.
//!
//! Handlers are plain functions or closures. Their arguments are extracted
//! with [`FromRequest`] and their result is converted with
//! [`IntoResponseValue`], similar to Axum's handler system:
//!
//! ```rust,ignore
//! fn index() -> &'static str {
//!     "hello"
//! }
//!
//! fn user(Path(id): Path<u64>) -> Result<Json<User>, Error> {
//!     load_user(id).map(Json).ok_or_else(Error::not_found)
//! }
//! ```

use std::sync::Arc;

use ember_core::{Error, IntoResponseValue, ResponseValue};

use crate::context::RequestContext;
use crate::extractor::FromRequest;

/// The core trait for request handlers.
///
/// Implemented for functions taking 0-12 [`FromRequest`] arguments and
/// returning any [`IntoResponseValue`].
pub trait Handler<T>: Clone + Send + Sync + 'static {
    fn call(&self, ctx: &RequestContext) -> Result<ResponseValue, Error>;
}

/// A type-erased handler stored in the application's endpoint table.
pub type BoxedHandler = Arc<dyn Fn(&RequestContext) -> Result<ResponseValue, Error> + Send + Sync>;

/// Converts a handler function into a boxed handler.
pub fn into_handler<H, T>(handler: H) -> BoxedHandler
where
    H: Handler<T>,
    T: 'static,
{
    Arc::new(move |ctx| handler.call(ctx))
}

/// The default endpoint name for a handler: its function name.
///
/// Closures have no usable name and yield `None`.
pub(crate) fn handler_name<H>() -> Option<&'static str> {
    let full = std::any::type_name::<H>();
    if full.contains("{{closure}}") {
        return None;
    }
    let path = full.split('<').next().unwrap_or(full);
    path.rsplit("::").next()
}

macro_rules! impl_handler {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case, unused_variables)]
        impl<F, Res, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: Fn($($ty,)*) -> Res + Clone + Send + Sync + 'static,
            Res: IntoResponseValue,
            $( $ty: FromRequest + 'static, )*
        {
            fn call(&self, ctx: &RequestContext) -> Result<ResponseValue, Error> {
                $(
                    let $ty = $ty::from_request(ctx)?;
                )*
                (self)($($ty,)*).into_response_value()
            }
        }
    };
}

impl_handler!();
impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
impl_handler!(T1, T2, T3, T4, T5);
impl_handler!(T1, T2, T3, T4, T5, T6);
impl_handler!(T1, T2, T3, T4, T5, T6, T7);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12);
