//! Ambient, request-scoped context store.
//!
//! The active [`RequestContext`] is held in tokio task-local storage, so it
//! travels with the future being polled rather than with the worker thread.
//! Every continuation of a request's future sees that request's context,
//! even when unrelated requests are interleaved on the same worker between
//! suspension and resumption.
//!
//! Access outside any scope is not an error: reads return `None`, writes
//! and cancellation are no-ops.
//!
//! ```ignore
//! use ambit_core::{store, ContextRecord};
//!
//! store::run(ContextRecord::new("trace-1"), async {
//!     store::set("tenant", "acme".into());
//!     downstream().await;
//!     assert_eq!(store::get("traceId"), Some("trace-1".into()));
//! })
//! .await;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::futures::TaskLocalFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::{ContextKey, ContextRecord};
use crate::types::Principal;

tokio::task_local! {
    static CURRENT: RequestContext;
}

// ---------------------------------------------------------------------------
// RequestContext
// ---------------------------------------------------------------------------

/// Live handle to one request's [`ContextRecord`].
///
/// Cloning is cheap and every clone refers to the same record. The
/// cancellation flag is a [`CancellationToken`], so it is monotonic by
/// construction: once cancelled it never reverts.
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<Inner>,
}

struct Inner {
    record: Mutex<ContextRecord>,
    cancellation: CancellationToken,
}

impl RequestContext {
    #[must_use]
    pub fn new(record: ContextRecord) -> Self {
        let cancellation = CancellationToken::new();
        if record.cancelled {
            cancellation.cancel();
        }
        Self {
            inner: Arc::new(Inner {
                record: Mutex::new(record),
                cancellation,
            }),
        }
    }

    /// Runs `f` with shared access to the record.
    ///
    /// `f` runs under the record lock, which is not reentrant: it must not
    /// touch this context again (through this handle, a clone, or the
    /// `store` free functions). Use [`Self::snapshot`] for anything longer.
    pub fn with<R>(&self, f: impl FnOnce(&ContextRecord) -> R) -> R {
        let mut record = self.inner.record.lock();
        record.cancelled = self.inner.cancellation.is_cancelled();
        f(&record)
    }

    /// Runs `f` with exclusive access to the record.
    ///
    /// Same locking rule as [`Self::with`]. Setting `cancelled` to true
    /// cancels the context; clearing it has no effect.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut ContextRecord) -> R) -> R {
        let mut record = self.inner.record.lock();
        record.cancelled = self.inner.cancellation.is_cancelled();
        let out = f(&mut record);
        if record.cancelled {
            self.inner.cancellation.cancel();
        } else {
            record.cancelled = self.inner.cancellation.is_cancelled();
        }
        out
    }

    /// Copy of the record as it is now.
    #[must_use]
    pub fn snapshot(&self) -> ContextRecord {
        self.with(Clone::clone)
    }

    #[must_use]
    pub fn trace_id(&self) -> String {
        self.with(|r| r.trace_id.clone())
    }

    #[must_use]
    pub fn request_id(&self) -> String {
        self.with(|r| r.request_id.clone())
    }

    #[must_use]
    pub fn principal(&self) -> Option<Arc<Principal>> {
        self.with(|r| r.principal.clone())
    }

    #[must_use]
    pub fn user_id(&self) -> Option<String> {
        self.with(|r| r.user_id.clone())
    }

    #[must_use]
    pub fn roles(&self) -> Vec<String> {
        self.with(|r| r.roles.clone())
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.with(ContextRecord::elapsed)
    }

    #[must_use]
    pub fn get(&self, key: impl Into<ContextKey>) -> Option<Value> {
        let key = key.into();
        self.with(|r| r.get(&key))
    }

    /// Writes a field; returns false if the value has the wrong shape.
    pub fn set(&self, key: impl Into<ContextKey>, value: Value) -> bool {
        let key = key.into();
        self.with_mut(|r| r.set(key, value))
    }

    /// Attaches the principal and denormalizes `user_id` and `roles`.
    pub fn set_principal(&self, principal: Arc<Principal>) {
        self.with_mut(|r| r.set_principal(principal));
    }

    /// Flags the request as cancelled. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancellation.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }

    /// Resolves once the request is cancelled.
    ///
    /// Cancellation is cooperative; this lets long-running work `select!` on
    /// it instead of polling [`Self::is_cancelled`].
    pub async fn cancelled(&self) {
        self.inner.cancellation.cancelled().await;
    }

    /// A token cancelled together with this context, for handing to
    /// downstream clients that take a [`CancellationToken`].
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.inner.cancellation.child_token()
    }

    /// Returns true if both handles refer to the same record.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.inner.record.lock();
        f.debug_struct("RequestContext")
            .field("trace_id", &record.trace_id)
            .field("request_id", &record.request_id)
            .field("user_id", &record.user_id)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Scopes
// ---------------------------------------------------------------------------

/// Runs `future` with a fresh context built from `record`.
///
/// Every poll of `future` observes the new context; the previously active
/// context (if any) is restored between polls and after completion.
pub fn run<F: Future>(record: ContextRecord, future: F) -> TaskLocalFuture<RequestContext, F> {
    scope(RequestContext::new(record), future)
}

/// Runs `future` with an existing context handle as the active context.
pub fn scope<F: Future>(ctx: RequestContext, future: F) -> TaskLocalFuture<RequestContext, F> {
    CURRENT.scope(ctx, future)
}

/// Synchronous counterpart of [`run`].
pub fn run_sync<R>(record: ContextRecord, f: impl FnOnce() -> R) -> R {
    CURRENT.sync_scope(RequestContext::new(record), f)
}

/// Spawns `future` on the runtime, carrying the caller's context into it.
///
/// Tokio task-locals are not inherited by spawned tasks; use this instead of
/// `tokio::spawn` for background work that belongs to the current request.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match current() {
        Some(ctx) => tokio::spawn(scope(ctx, future)),
        None => tokio::spawn(future),
    }
}

// ---------------------------------------------------------------------------
// Ambient accessors
// ---------------------------------------------------------------------------

/// The active context, or `None` outside any scope.
#[must_use]
pub fn current() -> Option<RequestContext> {
    CURRENT.try_with(Clone::clone).ok()
}

#[must_use]
pub fn get(key: impl Into<ContextKey>) -> Option<Value> {
    current().and_then(|ctx| ctx.get(key))
}

/// Writes a field on the active context. Returns false outside a scope.
pub fn set(key: impl Into<ContextKey>, value: Value) -> bool {
    current().is_some_and(|ctx| ctx.set(key, value))
}

/// Cancels the active context. No-op outside a scope.
pub fn cancel() {
    if let Some(ctx) = current() {
        ctx.cancel();
    }
}

/// Cancellation flag of the active context; false outside a scope.
#[must_use]
pub fn is_cancelled() -> bool {
    current().is_some_and(|ctx| ctx.is_cancelled())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    #[test]
    fn access_outside_scope_is_absent() {
        assert!(current().is_none());
        assert!(get("traceId").is_none());
        assert!(!set("tenant", json!("acme")));
        cancel();
        assert!(!is_cancelled());
    }

    #[tokio::test]
    async fn run_exposes_record_to_nested_calls() {
        async fn deep() -> Option<Value> {
            tokio::task::yield_now().await;
            get("traceId")
        }

        let seen = run(ContextRecord::new("t-1"), deep()).await;
        assert_eq!(seen, Some(json!("t-1")));
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn set_mutates_live_record() {
        run(ContextRecord::new("t-1"), async {
            assert!(set("tenant", json!("acme")));
            let ctx = current().unwrap();
            assert_eq!(ctx.get("tenant"), Some(json!("acme")));
            assert_eq!(ctx.snapshot().extension["tenant"], json!("acme"));
        })
        .await;
    }

    #[tokio::test]
    async fn nested_run_restores_parent() {
        run(ContextRecord::new("outer"), async {
            let inner = run(ContextRecord::new("inner"), async {
                tokio::task::yield_now().await;
                get("traceId")
            })
            .await;
            assert_eq!(inner, Some(json!("inner")));
            assert_eq!(get("traceId"), Some(json!("outer")));
        })
        .await;
    }

    #[test]
    fn run_sync_scopes_closure() {
        let seen = run_sync(ContextRecord::new("sync"), || get("traceId"));
        assert_eq!(seen, Some(json!("sync")));
        assert!(current().is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn interleaved_requests_never_observe_each_other() {
        let mut handles = Vec::new();
        for i in 0..32u64 {
            handles.push(tokio::spawn(run(
                ContextRecord::new(format!("req-{i}")),
                async move {
                    let mine = current().unwrap();
                    for step in 0..10u64 {
                        tokio::time::sleep(Duration::from_millis((i * 7 + step) % 5)).await;
                        let now = current().unwrap();
                        assert!(RequestContext::ptr_eq(&mine, &now));
                        assert_eq!(now.trace_id(), format!("req-{i}"));
                    }
                },
            )));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn isolation_holds_across_worker_threads() {
        let mut handles = Vec::new();
        for i in 0..64 {
            handles.push(tokio::spawn(run(ContextRecord::new(format!("mt-{i}")), async move {
                for _ in 0..5 {
                    tokio::task::yield_now().await;
                    set("counter", json!(i));
                    tokio::task::yield_now().await;
                    assert_eq!(get("counter"), Some(json!(i)));
                    assert_eq!(get("traceId"), Some(json!(format!("mt-{i}"))));
                }
            })));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_monotonic() {
        run(ContextRecord::new("t-1"), async {
            assert!(!is_cancelled());
            cancel();
            assert!(is_cancelled());
            cancel();
            assert!(is_cancelled());
            tokio::task::yield_now().await;
            assert!(is_cancelled());
        })
        .await;
    }

    #[tokio::test]
    async fn snapshot_reflects_cancellation() {
        let ctx = RequestContext::new(ContextRecord::new("t-1"));
        assert!(!ctx.snapshot().cancelled);

        ctx.cancel();
        assert!(ctx.snapshot().cancelled);
        assert_eq!(ctx.get("cancelled"), Some(json!(true)));

        ctx.with_mut(|r| r.cancelled = false);
        assert!(ctx.is_cancelled());
        assert!(ctx.snapshot().cancelled);
    }

    #[tokio::test]
    async fn cancelled_record_starts_a_cancelled_context() {
        let mut record = ContextRecord::new("t-1");
        record.cancelled = true;
        let ctx = RequestContext::new(record);
        assert!(ctx.is_cancelled());

        let fresh = RequestContext::new(ContextRecord::new("t-2"));
        fresh.with_mut(|r| r.cancelled = true);
        assert!(fresh.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_cancel() {
        let ctx = RequestContext::new(ContextRecord::new("t-1"));
        let child = ctx.child_token();
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.cancelled().await })
        };
        ctx.cancel();
        waiter.await.unwrap();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn spawn_carries_context_but_tokio_spawn_does_not() {
        run(ContextRecord::new("parent"), async {
            let carried = spawn(async { get("traceId") }).await.unwrap();
            assert_eq!(carried, Some(json!("parent")));

            let plain = tokio::spawn(async { get("traceId") }).await.unwrap();
            assert!(plain.is_none());
        })
        .await;
    }

    #[tokio::test]
    async fn spawned_task_shares_live_record() {
        run(ContextRecord::new("parent"), async {
            spawn(async {
                set("from_child", json!(true));
                cancel();
            })
            .await
            .unwrap();
            assert_eq!(get("from_child"), Some(json!(true)));
            assert!(is_cancelled());
        })
        .await;
    }
}
