//! # Ember Core
//!
//! Value types shared by every layer of the Ember web framework.
//!
//! This crate has no notion of applications or routing. It provides:
//!
//! - **Requests and responses**: [`Request`] and the canonical [`Response`]
//! - **Handler results**: the closed [`ResponseValue`] sum type and the
//!   [`IntoResponseValue`] conversion trait
//! - **Normalization**: [`Normalizer`], a total function from [`ResponseValue`]
//!   to [`Response`]
//! - **Errors**: the [`ErrorClass`] taxonomy, [`Error`], and stack and shape errors
//! - **Context storage**: the per-thread [`LocalStack`] and the typed [`Namespace`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use ember_core::{IntoResponseValue, Normalizer};
//!
//! let value = ("created", 201).into_response_value()?;
//! let response = Normalizer::default().normalize(value)?;
//! assert_eq!(response.status(), 201);
//! ```

pub mod error;
pub mod namespace;
pub mod normalize;
pub mod request;
pub mod response;
pub mod stack;
pub mod value;

pub use error::{
    BoxError, ContextError, ContextResult, Error, ErrorClass, ResponseShapeError,
};
pub use namespace::Namespace;
pub use normalize::{Normalizer, parse_status};
pub use request::Request;
pub use response::Response;
pub use stack::LocalStack;
pub use value::{
    HeaderList, IntoHeaderList, IntoPairTail, IntoResponseValue, IntoStatus, ResponseAdapter,
    ResponseValue, Status, StatusOrHeaders,
};

pub use bytes::Bytes;
pub use http::{HeaderMap, Method, StatusCode};

/// Prelude for common imports.
pub mod prelude {
    pub use super::{
        Error, ErrorClass, IntoResponseValue, Method, Request, Response, ResponseValue, StatusCode,
    };
}
