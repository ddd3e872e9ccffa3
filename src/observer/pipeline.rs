// Post-write observer pipeline. Observers run on their own tasks so a write
// never waits for, or fails because of, its hooks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::Instrument;

use crate::config::CONFIG;
use crate::observer::context::LifecycleEvent;
use crate::observer::error::ObserverError;
use crate::observer::traits::{ObserverBox, ObserverRing};

/// Observer tasks spawned for one event.
#[derive(Debug, Default)]
pub struct DispatchHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl DispatchHandle {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for every observer of the event to finish.
    pub async fn join(self) {
        join_all(self.tasks).await;
    }
}

/// Count of observer tasks still running, with a wakeup when it hits zero.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

/// Decrements the in-flight count when an observer task ends, panics included.
struct InFlightGuard(Arc<InFlight>);

impl InFlightGuard {
    fn enter(in_flight: &Arc<InFlight>) -> Self {
        in_flight.count.fetch_add(1, Ordering::AcqRel);
        Self(in_flight.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

pub struct ObserverPipeline {
    // Observer registry by ring
    observers: HashMap<ObserverRing, Vec<ObserverBox>>,
    enabled: bool,
    in_flight: Arc<InFlight>,
}

impl ObserverPipeline {
    pub fn new() -> Self {
        Self {
            observers: HashMap::new(),
            enabled: CONFIG.hooks.enabled,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn register_observer(&mut self, observer: ObserverBox) {
        let ring = observer.ring();
        let name = observer.name();
        let ring_observers = self.observers.entry(ring).or_default();
        ring_observers.push(observer);
        ring_observers.sort_by_key(ObserverBox::priority);

        tracing::debug!("Registered observer '{}' for ring {:?}", name, ring);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.values().map(Vec::len).sum()
    }

    /// Spawns every applicable observer for `event` and returns immediately.
    /// Outside a tokio runtime the event is dropped with a warning.
    pub fn dispatch(&self, event: LifecycleEvent) -> DispatchHandle {
        if !self.enabled {
            return DispatchHandle::default();
        }
        let applicable: Vec<ObserverBox> = ObserverRing::all()
            .iter()
            .filter_map(|ring| self.observers.get(ring))
            .flatten()
            .filter(|o| o.applies_to(&event))
            .cloned()
            .collect();
        if applicable.is_empty() {
            return DispatchHandle::default();
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!("No async runtime; skipping hooks for {} {:?}", event.entity, event.operation);
                return DispatchHandle::default();
            }
        };

        tracing::debug!(
            "Dispatching {} observers: operation={:?}, entity={}, target={}",
            applicable.len(), event.operation, event.entity, event.target
        );

        let event = Arc::new(event);
        let tasks: Vec<JoinHandle<()>> = applicable
            .into_iter()
            .map(|observer| {
                let event = event.clone();
                let span = tracing::info_span!(
                    "observer",
                    name = observer.name(),
                    tenant = event.ctx.tenant().map(|t| t.as_str()).unwrap_or(""),
                    request_id = %event.ctx.request_id(),
                );
                let guard = InFlightGuard::enter(&self.in_flight);
                runtime.spawn(
                    async move {
                        let _guard = guard;
                        run_observer(observer, event).await;
                    }
                    .instrument(span),
                )
            })
            .collect();

        DispatchHandle { tasks }
    }

    /// Waits until no observer task is running. Used on shutdown and by
    /// tests that assert on hook side effects.
    pub async fn drain(&self) {
        loop {
            let idle = self.in_flight.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if self.in_flight.count.load(Ordering::Acquire) == 0 {
                return;
            }
            idle.await;
        }
    }
}

impl Default for ObserverPipeline {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_observer(observer: ObserverBox, event: Arc<LifecycleEvent>) {
    let started = Instant::now();
    let result = timeout(observer.timeout(), observer.execute(&event)).await;
    let elapsed = started.elapsed();

    match result {
        Ok(Ok(())) => {
            tracing::debug!("Observer: {} completed successfully in {:?}", observer.name(), elapsed);
        }
        Ok(Err(error)) => {
            tracing::error!("Observer: {} failed in {:?}: {}", observer.name(), elapsed, error);
        }
        Err(_timeout) => {
            let error = ObserverError::TimeoutError(format!(
                "Observer {} timed out after {:?}",
                observer.name(),
                observer.timeout()
            ));
            tracing::error!("{}", error);
        }
    }
}
