//! Collaborator interfaces towards the hosting proxy tool.
//!
//! The crate never talks to a concrete proxy product directly. Everything it
//! needs from the host (replaying a request, scope checks, traffic history,
//! preference and per-project storage) is expressed as a small trait here,
//! implemented by the embedding extension. In-memory implementations are
//! provided for tests and for embedders that run without a host.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;
use url::Url;

use crate::analyzer::request::{CaptureRequest, CaptureResponse};

/// Error surfaced by a replay transport when the upstream returned nothing.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Synchronous replay primitive. One call, one request, no retries.
pub trait ReplayTransport: Send + Sync {
    fn send(&self, request: &CaptureRequest) -> Result<CaptureResponse, TransportError>;
}

/// Host scope check used by the passive domain filter.
pub trait ScopeCheck: Send + Sync {
    fn is_in_scope(&self, url: &Url) -> bool;
}

/// Scope check that treats every URL as in scope.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScopeAll;

impl ScopeCheck for ScopeAll {
    fn is_in_scope(&self, _url: &Url) -> bool {
        true
    }
}

/// One entry of the host's captured traffic history.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub request: CaptureRequest,
    pub response: Option<CaptureResponse>,
}

/// Read access to the host's persisted traffic history.
pub trait TrafficHistory: Send + Sync {
    fn entries(&self) -> Vec<HistoryEntry>;
}

/// Host preference storage, typed by string/int/bool.
pub trait Preferences: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;
    fn set_string(&self, key: &str, value: &str);
    fn get_int(&self, key: &str) -> Option<i64>;
    fn set_int(&self, key: &str, value: i64);
    fn get_bool(&self, key: &str) -> Option<bool>;
    fn set_bool(&self, key: &str, value: bool);
}

/// Per-project persistence. Used only for solver verdict rows.
pub trait ProjectData: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;
    fn set_string(&self, key: &str, value: &str);
    fn get_int(&self, key: &str) -> Option<i64>;
    fn set_int(&self, key: &str, value: i64);
}

#[derive(Debug, Clone)]
enum PrefValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

/// In-memory `Preferences` implementation.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<HashMap<String, PrefValue>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Preferences for MemoryPreferences {
    fn get_string(&self, key: &str) -> Option<String> {
        match self.values.lock().expect("preferences lock poisoned").get(key) {
            Some(PrefValue::Str(value)) => Some(value.clone()),
            _ => None,
        }
    }

    fn set_string(&self, key: &str, value: &str) {
        self.values
            .lock()
            .expect("preferences lock poisoned")
            .insert(key.to_string(), PrefValue::Str(value.to_string()));
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        match self.values.lock().expect("preferences lock poisoned").get(key) {
            Some(PrefValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    fn set_int(&self, key: &str, value: i64) {
        self.values
            .lock()
            .expect("preferences lock poisoned")
            .insert(key.to_string(), PrefValue::Int(value));
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.lock().expect("preferences lock poisoned").get(key) {
            Some(PrefValue::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    fn set_bool(&self, key: &str, value: bool) {
        self.values
            .lock()
            .expect("preferences lock poisoned")
            .insert(key.to_string(), PrefValue::Bool(value));
    }
}

/// In-memory `ProjectData` implementation.
#[derive(Debug, Default)]
pub struct MemoryProjectData {
    values: Mutex<HashMap<String, PrefValue>>,
}

impl MemoryProjectData {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectData for MemoryProjectData {
    fn get_string(&self, key: &str) -> Option<String> {
        match self.values.lock().expect("project data lock poisoned").get(key) {
            Some(PrefValue::Str(value)) => Some(value.clone()),
            _ => None,
        }
    }

    fn set_string(&self, key: &str, value: &str) {
        self.values
            .lock()
            .expect("project data lock poisoned")
            .insert(key.to_string(), PrefValue::Str(value.to_string()));
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        match self.values.lock().expect("project data lock poisoned").get(key) {
            Some(PrefValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    fn set_int(&self, key: &str, value: i64) {
        self.values
            .lock()
            .expect("project data lock poisoned")
            .insert(key.to_string(), PrefValue::Int(value));
    }
}
