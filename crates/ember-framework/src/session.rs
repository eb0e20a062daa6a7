//! Session storage seam.
//!
//! The engine opens a session when a request context is pushed and asks the
//! interface to save it once the response has been post-processed. Cookie
//! serialization is left to implementors.

use serde_json::{Map, Value};

use ember_core::{Error, Request, Response};

use crate::app::Application;

/// Per-request session data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    data: Map<String, Value>,
    modified: bool,
    new: bool,
    null: bool,
}

impl Session {
    /// A fresh session with no stored data.
    pub fn new() -> Self {
        Self {
            new: true,
            ..Self::default()
        }
    }

    /// A session loaded from storage.
    pub fn from_data(data: Map<String, Value>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// A placeholder used when no session could be opened.
    pub fn null() -> Self {
        Self {
            null: true,
            ..Self::default()
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.modified = true;
        self.data.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.data.remove(key);
        if removed.is_some() {
            self.modified = true;
        }
        removed
    }

    pub fn clear(&mut self) {
        if !self.data.is_empty() {
            self.modified = true;
        }
        self.data.clear();
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn is_new(&self) -> bool {
        self.new
    }

    pub fn is_null(&self) -> bool {
        self.null
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Opens and persists sessions for an application.
pub trait SessionInterface: Send + Sync + 'static {
    /// Loads the session for `request`. `None` means a null session is used.
    fn open_session(&self, app: &Application, request: &Request) -> Option<Session>;

    /// Returns `true` when there is nothing to persist for `session`.
    fn is_empty(&self, session: &Session) -> bool {
        session.is_null() || (session.is_empty() && !session.is_modified())
    }

    /// Writes the session onto the outgoing response.
    fn save_session(
        &self,
        app: &Application,
        session: &Session,
        response: &mut Response,
    ) -> Result<(), Error>;
}

/// The default interface: every request gets a null session and nothing is saved.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSessionInterface;

impl SessionInterface for NullSessionInterface {
    fn open_session(&self, _app: &Application, _request: &Request) -> Option<Session> {
        None
    }

    fn save_session(
        &self,
        _app: &Application,
        _session: &Session,
        _response: &mut Response,
    ) -> Result<(), Error> {
        Ok(())
    }
}
