//! Request lifecycle coordination.
//!
//! - [`config`]: Lifecycle options (trace id generator, callbacks, eager principal extraction)
//! - [`layer`]: Tower layer creating, scoping, and tearing down one context per request
//! - [`disconnect`]: Transport disconnect signal consumed by the layer
//! - [`live`]: Live context counting for health reporting
//! - [`trace_id`]: Default trace id generator

pub mod config;
pub mod disconnect;
pub mod layer;
pub mod live;
pub mod trace_id;

pub use config::{ContextCallback, LifecycleConfig, RequestInfo, TraceIdGenerator, UserExtractor};
pub use disconnect::DisconnectSignal;
pub use layer::{RequestContextLayer, RequestContextService, RESPONSE_TIME_HEADER, TRACE_ID_HEADER};
pub use live::{LiveContexts, LiveGuard};
pub use trace_id::default_trace_id;
