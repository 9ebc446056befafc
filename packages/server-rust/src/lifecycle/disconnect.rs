//! Transport-level disconnect signal.
//!
//! A transport that can observe client disconnects or aborts independently
//! of the response future inserts a [`DisconnectSignal`] into the request
//! extensions and triggers it when the client goes away. The lifecycle
//! layer subscribes while the request runs and drops the subscription on
//! completion.

use tokio_util::sync::CancellationToken;

/// One-way "client went away" signal shared between transport and lifecycle.
#[derive(Debug, Clone, Default)]
pub struct DisconnectSignal {
    token: CancellationToken,
}

impl DisconnectSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal. Later calls are no-ops.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal fires.
    pub async fn fired(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_wakes_subscribers() {
        let signal = DisconnectSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.fired().await })
        };
        assert!(!signal.is_triggered());
        signal.trigger();
        signal.trigger();
        waiter.await.unwrap();
        assert!(signal.is_triggered());
    }
}
