use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::StatusCode;
use serde::Serialize;

use crate::error::ResponseShapeError;
use crate::response::Response;
use crate::value::{HeaderList, ResponseValue, Status, StatusOrHeaders};

pub const DEFAULT_MIMETYPE: &str = "text/html; charset=utf-8";
pub const JSON_MIMETYPE: &str = "application/json";

/// Turns handler results into canonical [`Response`]s.
///
/// Normalization is total over [`ResponseValue`]: every variant either
/// produces a response or a [`ResponseShapeError`].
#[derive(Debug, Clone)]
pub struct Normalizer {
    default_mimetype: String,
    json_mimetype: String,
    pretty_json: bool,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            default_mimetype: DEFAULT_MIMETYPE.to_string(),
            json_mimetype: JSON_MIMETYPE.to_string(),
            pretty_json: false,
        }
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content type for text and byte bodies.
    pub fn default_mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.default_mimetype = mimetype.into();
        self
    }

    /// Content type for mapping bodies.
    pub fn json_mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.json_mimetype = mimetype.into();
        self
    }

    pub fn pretty_json(mut self, pretty: bool) -> Self {
        self.pretty_json = pretty;
        self
    }

    /// Normalizes a handler result.
    pub fn normalize(&self, value: ResponseValue) -> Result<Response, ResponseShapeError> {
        match value {
            ResponseValue::Pair(body, StatusOrHeaders::Status(status)) => {
                let mut response = self.normalize_body(*body)?;
                apply_status(&mut response, status)?;
                Ok(response)
            }
            ResponseValue::Pair(body, StatusOrHeaders::Headers(headers)) => {
                let mut response = self.normalize_body(*body)?;
                extend_headers(&mut response, headers)?;
                Ok(response)
            }
            ResponseValue::Triple(body, status, headers) => {
                let mut response = self.normalize_body(*body)?;
                apply_status(&mut response, status)?;
                extend_headers(&mut response, headers)?;
                Ok(response)
            }
            other => self.normalize_body(other),
        }
    }

    /// Renders any serializable value with the configured JSON settings.
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) -> Result<Response, ResponseShapeError> {
        let mut body = if self.pretty_json {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        }
        .map_err(|err| ResponseShapeError::Json(err.to_string()))?;
        body.push(b'\n');
        Ok(self.with_content_type(Bytes::from(body), &self.json_mimetype))
    }

    fn normalize_body(&self, value: ResponseValue) -> Result<Response, ResponseShapeError> {
        match value {
            ResponseValue::Empty => Err(ResponseShapeError::Empty),
            ResponseValue::Response(response) => Ok(response),
            ResponseValue::Text(text) => {
                Ok(self.with_content_type(Bytes::from(text), &self.default_mimetype))
            }
            ResponseValue::Bytes(bytes) => Ok(self.with_content_type(bytes, &self.default_mimetype)),
            ResponseValue::Mapping(map) => self.json(&map),
            ResponseValue::List(list) => self.json(&list),
            ResponseValue::Adapted(adapter) => adapter.adapt(),
            ResponseValue::Pair(..) | ResponseValue::Triple(..) => Err(
                ResponseShapeError::Unsupported("a tuple cannot be the body of another tuple".into()),
            ),
        }
    }

    fn with_content_type(&self, body: Bytes, mimetype: &str) -> Response {
        let mut response = Response::new(StatusCode::OK).with_body(body);
        if let Ok(value) = HeaderValue::from_str(mimetype) {
            response.headers_mut().insert(CONTENT_TYPE, value);
        }
        response
    }
}

/// Parses a status given as a code or as a line such as `"404 Not Found"`.
pub fn parse_status(status: &Status) -> Result<StatusCode, ResponseShapeError> {
    let code = match status {
        Status::Code(code) => Some(*code),
        Status::Line(line) => {
            let digits: String = line
                .trim_start()
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            digits.parse::<u16>().ok()
        }
    };
    code.and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| {
            ResponseShapeError::InvalidStatus(match status {
                Status::Code(code) => code.to_string(),
                Status::Line(line) => line.clone(),
            })
        })
}

fn apply_status(response: &mut Response, status: Status) -> Result<(), ResponseShapeError> {
    response.set_status(parse_status(&status)?);
    Ok(())
}

/// Merges `headers` into the response. A name given here replaces any value
/// already present under that name; repeated names within `headers` are all
/// kept.
fn extend_headers(response: &mut Response, headers: HeaderList) -> Result<(), ResponseShapeError> {
    let mut replaced: Vec<HeaderName> = Vec::new();
    for (name, value) in headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|err| ResponseShapeError::InvalidHeader {
                name: name.clone(),
                reason: err.to_string(),
            })?;
        let header_value =
            HeaderValue::from_str(&value).map_err(|err| ResponseShapeError::InvalidHeader {
                name: name.clone(),
                reason: err.to_string(),
            })?;
        if replaced.contains(&header_name) {
            response.headers_mut().append(header_name, header_value);
        } else {
            response.headers_mut().insert(header_name.clone(), header_value);
            replaced.push(header_name);
        }
    }
    Ok(())
}
