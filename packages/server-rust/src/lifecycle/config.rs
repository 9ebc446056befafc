//! Lifecycle coordinator configuration.

use std::fmt;
use std::sync::Arc;

use ambit_core::{ContextRecord, Principal};
use http::{HeaderMap, Method, Uri};

use super::trace_id::default_trace_id;

/// Generates a trace identifier for each inbound request.
pub type TraceIdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Synchronous, request-only principal extraction (no I/O).
pub type UserExtractor = Arc<dyn Fn(&RequestInfo) -> Option<Principal> + Send + Sync>;

/// Invoked with the context record and the request it belongs to.
pub type ContextCallback = Arc<dyn Fn(&ContextRecord, &RequestInfo) + Send + Sync>;

/// Transport view of an inbound request handed to extractors and callbacks.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl RequestInfo {
    /// Header value as a string, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Options recognised by [`super::RequestContextLayer`].
///
/// Every callback is optional. Cloning shares the callbacks.
#[derive(Clone)]
pub struct LifecycleConfig {
    /// Trace id generator. Defaults to [`default_trace_id`].
    pub generate_trace_id: TraceIdGenerator,
    /// Cancel the context when the client disconnects. Defaults to `true`.
    pub enable_cancellation: bool,
    pub extract_user: Option<UserExtractor>,
    /// Fires exactly once per request, inside the request's scope.
    pub on_context_created: Option<ContextCallback>,
    /// Fires exactly once per request, whatever the outcome.
    pub on_context_destroyed: Option<ContextCallback>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            generate_trace_id: Arc::new(default_trace_id),
            enable_cancellation: true,
            extract_user: None,
            on_context_created: None,
            on_context_destroyed: None,
        }
    }
}

impl LifecycleConfig {
    #[must_use]
    pub fn with_trace_id_generator(
        mut self,
        generate: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.generate_trace_id = Arc::new(generate);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, enabled: bool) -> Self {
        self.enable_cancellation = enabled;
        self
    }

    #[must_use]
    pub fn with_user_extractor(
        mut self,
        extract: impl Fn(&RequestInfo) -> Option<Principal> + Send + Sync + 'static,
    ) -> Self {
        self.extract_user = Some(Arc::new(extract));
        self
    }

    #[must_use]
    pub fn on_created(
        mut self,
        callback: impl Fn(&ContextRecord, &RequestInfo) + Send + Sync + 'static,
    ) -> Self {
        self.on_context_created = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn on_destroyed(
        mut self,
        callback: impl Fn(&ContextRecord, &RequestInfo) + Send + Sync + 'static,
    ) -> Self {
        self.on_context_destroyed = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for LifecycleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleConfig")
            .field("enable_cancellation", &self.enable_cancellation)
            .field("extract_user", &self.extract_user.is_some())
            .field("on_context_created", &self.on_context_created.is_some())
            .field("on_context_destroyed", &self.on_context_destroyed.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_config_defaults() {
        let config = LifecycleConfig::default();
        assert!(config.enable_cancellation);
        assert!(config.extract_user.is_none());
        assert!(config.on_context_created.is_none());
        assert!(config.on_context_destroyed.is_none());
        assert!(!(config.generate_trace_id)().is_empty());
    }

    #[test]
    fn builder_replaces_generator() {
        let config = LifecycleConfig::default()
            .with_trace_id_generator(|| "fixed".to_string())
            .with_cancellation(false);
        assert_eq!((config.generate_trace_id)(), "fixed");
        assert!(!config.enable_cancellation);
    }

    #[test]
    fn request_info_reads_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", "curl/8".parse().unwrap());
        let info = RequestInfo {
            method: Method::GET,
            uri: "/x".parse().unwrap(),
            headers,
        };
        assert_eq!(info.header("user-agent"), Some("curl/8"));
        assert!(info.header("x-missing").is_none());
    }
}
