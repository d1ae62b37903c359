//! Event registration and dispatch.
//!
//! The host owns an `EventHub`; listeners register handlers through
//! `subscribe` and stay registered while their `Subscription` lives.
//! `dispatch` never propagates a handler failure: errors and panics are
//! logged and counted so the host event loop keeps running.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use farm_core::JobId;
use tracing::{debug, error};

/// Events the balancer reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FarmEvent {
    /// A job entered the active set.
    JobSubmitted(JobId),
    /// Periodic maintenance tick.
    HouseCleaning,
}

impl FarmEvent {
    pub fn name(&self) -> &'static str {
        match self {
            FarmEvent::JobSubmitted(_) => "job_submitted",
            FarmEvent::HouseCleaning => "house_cleaning",
        }
    }
}

type Handler = Arc<dyn Fn(&FarmEvent) -> anyhow::Result<()> + Send + Sync>;

struct Registration {
    name: String,
    handler: Handler,
}

#[derive(Default)]
struct HubInner {
    next_id: AtomicU64,
    handlers: RwLock<BTreeMap<u64, Registration>>,
}

impl HubInner {
    fn remove(&self, id: u64) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handlers.remove(&id).is_some()
    }
}

/// Outcome of delivering one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Registry of event handlers, cheap to clone and share.
#[derive(Clone, Default)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Dropping the returned `Subscription` removes it.
    pub fn subscribe<F>(&self, name: &str, handler: F) -> Subscription
    where
        F: Fn(&FarmEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let registration = Registration {
            name: name.to_string(),
            handler: Arc::new(handler),
        };
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, registration);
        debug!(handler = name, id, "event handler subscribed");

        Subscription {
            id,
            name: name.to_string(),
            hub: Arc::downgrade(&self.inner),
        }
    }

    pub fn handler_count(&self) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Deliver `event` to every registered handler, in registration order.
    pub fn dispatch(&self, event: &FarmEvent) -> DispatchReport {
        // Snapshot the handlers so none runs under the lock.
        let handlers: Vec<(String, Handler)> = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .map(|r| (r.name.clone(), Arc::clone(&r.handler)))
            .collect();

        let mut report = DispatchReport::default();
        for (name, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    error!(handler = %name, event = event.name(), error = %e, "event handler failed");
                    report.failed += 1;
                }
                Err(_) => {
                    error!(handler = %name, event = event.name(), "event handler panicked");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

/// Keeps a handler registered; unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    id: u64,
    name: String,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the handler now.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade()
            && hub.remove(self.id)
        {
            debug!(handler = %self.name, id = self.id, "event handler unsubscribed");
        }
    }
}
