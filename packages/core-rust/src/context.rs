use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use serde_json::{Map, Value};

use crate::types::Principal;

/// Per-request record made ambiently available by [`crate::store`].
///
/// Created once at request entry, mutated only by code running inside the
/// request's scope, dropped when the scope exits.
#[derive(Debug, Clone)]
pub struct ContextRecord {
    /// Trace identifier, unique per request.
    pub trace_id: String,
    /// Request identifier; equals `trace_id` unless the caller supplied one.
    pub request_id: String,
    /// Creation instant, used to compute elapsed duration.
    pub timestamp: Instant,
    /// Wall-clock creation time for logging.
    pub started_at: SystemTime,
    pub method: Option<String>,
    pub url: Option<String>,
    pub client_address: Option<String>,
    pub user_agent: Option<String>,
    /// Authenticated principal, if one has been established.
    pub principal: Option<Arc<Principal>>,
    /// Denormalized from `principal`.
    pub user_id: Option<String>,
    /// Denormalized from `principal`.
    pub roles: Vec<String>,
    /// Open extension point.
    pub extension: Map<String, Value>,
    /// Whether the request has been cancelled. Mirrors the owning
    /// [`crate::RequestContext`]'s token whenever the record is read through
    /// it, and never reverts once set.
    pub cancelled: bool,
}

impl ContextRecord {
    #[must_use]
    pub fn new(trace_id: impl Into<String>) -> Self {
        let trace_id = trace_id.into();
        Self {
            request_id: trace_id.clone(),
            trace_id,
            timestamp: Instant::now(),
            started_at: SystemTime::now(),
            method: None,
            url: None,
            client_address: None,
            user_agent: None,
            principal: None,
            user_id: None,
            roles: Vec::new(),
            extension: Map::new(),
            cancelled: false,
        }
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_client_address(mut self, addr: impl Into<String>) -> Self {
        self.client_address = Some(addr.into());
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    #[must_use]
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.set_principal(Arc::new(principal));
        self
    }

    /// Attaches the principal and denormalizes `user_id` and `roles`.
    pub fn set_principal(&mut self, principal: Arc<Principal>) {
        self.user_id = Some(principal.id.clone());
        self.roles = principal.role_list();
        self.principal = Some(principal);
    }

    /// Time since the record was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.timestamp.elapsed()
    }

    /// Reads a field by key. Absent optional fields read as `None`.
    #[must_use]
    pub fn get(&self, key: &ContextKey) -> Option<Value> {
        let text = |v: &Option<String>| v.clone().map(Value::String);
        match key {
            ContextKey::TraceId => Some(Value::String(self.trace_id.clone())),
            ContextKey::RequestId => Some(Value::String(self.request_id.clone())),
            ContextKey::Method => text(&self.method),
            ContextKey::Url => text(&self.url),
            ContextKey::ClientAddress => text(&self.client_address),
            ContextKey::UserAgent => text(&self.user_agent),
            ContextKey::UserId => text(&self.user_id),
            ContextKey::Roles => Some(Value::Array(
                self.roles.iter().cloned().map(Value::String).collect(),
            )),
            ContextKey::Cancelled => Some(Value::Bool(self.cancelled)),
            ContextKey::Extension(name) => self.extension.get(name).cloned(),
        }
    }

    /// Writes a field by key.
    ///
    /// String fields accept a string or `null` (which clears optional
    /// fields); `Roles` accepts an array of strings. Values of the wrong
    /// shape are ignored and `false` is returned. `Cancelled` is read-only:
    /// cancel through [`crate::RequestContext::cancel`].
    pub fn set(&mut self, key: ContextKey, value: Value) -> bool {
        fn optional(slot: &mut Option<String>, value: Value) -> bool {
            match value {
                Value::String(s) => {
                    *slot = Some(s);
                    true
                }
                Value::Null => {
                    *slot = None;
                    true
                }
                _ => false,
            }
        }

        match key {
            ContextKey::TraceId => match value {
                Value::String(s) => {
                    self.trace_id = s;
                    true
                }
                _ => false,
            },
            ContextKey::RequestId => match value {
                Value::String(s) => {
                    self.request_id = s;
                    true
                }
                _ => false,
            },
            ContextKey::Method => optional(&mut self.method, value),
            ContextKey::Url => optional(&mut self.url, value),
            ContextKey::ClientAddress => optional(&mut self.client_address, value),
            ContextKey::UserAgent => optional(&mut self.user_agent, value),
            ContextKey::UserId => optional(&mut self.user_id, value),
            ContextKey::Roles => match value {
                Value::Array(items) => {
                    let roles: Option<Vec<String>> = items
                        .into_iter()
                        .map(|v| match v {
                            Value::String(s) => Some(s),
                            _ => None,
                        })
                        .collect();
                    match roles {
                        Some(roles) => {
                            self.roles = roles;
                            true
                        }
                        None => false,
                    }
                }
                _ => false,
            },
            ContextKey::Cancelled => false,
            ContextKey::Extension(name) => {
                self.extension.insert(name, value);
                true
            }
        }
    }
}

/// Addressable field of a [`ContextRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextKey {
    TraceId,
    RequestId,
    Method,
    Url,
    ClientAddress,
    UserAgent,
    UserId,
    Roles,
    /// Read-only.
    Cancelled,
    /// Any other name addresses the extension map.
    Extension(String),
}

impl From<&str> for ContextKey {
    fn from(name: &str) -> Self {
        match name {
            "traceId" | "trace_id" => Self::TraceId,
            "requestId" | "request_id" => Self::RequestId,
            "method" => Self::Method,
            "url" => Self::Url,
            "clientAddress" | "client_address" | "ip" => Self::ClientAddress,
            "userAgent" | "user_agent" => Self::UserAgent,
            "userId" | "user_id" => Self::UserId,
            "roles" => Self::Roles,
            "cancelled" => Self::Cancelled,
            other => Self::Extension(other.to_string()),
        }
    }
}

impl From<String> for ContextKey {
    fn from(name: String) -> Self {
        match Self::from(name.as_str()) {
            Self::Extension(_) => Self::Extension(name),
            key => key,
        }
    }
}
