//! Event subscribers and the registry that fans accepted events out to them.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::Result;
use crate::event::{EventEnvelope, EventKind};
use crate::jobs::BuildJob;
use crate::security::SecurityContext;

/// Handler for one or more event kinds.
///
/// Per-job filtering is up to the subscriber; the registry only matches on
/// event kind and calls [`EventSubscriber::on_event`] once per delivery.
pub trait EventSubscriber: Send + Sync {
    fn name(&self) -> &str;

    fn events(&self) -> &[EventKind];

    /// Whether this subscriber would act on behalf of `job`.
    fn is_applicable(&self, job: &dyn BuildJob) -> bool;

    /// `ctx` starts out anonymous; subscribers that need the whole job
    /// registry elevate it themselves.
    fn on_event(&self, ctx: &mut SecurityContext, event: EventKind, payload: &str) -> Result<()>;

    fn is_interested_in(&self, event: EventKind) -> bool {
        self.events().contains(&event)
    }
}

/// Outcome of fanning one event out.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: Vec<String>,
}

#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: Vec<Arc<dyn EventSubscriber>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.register(subscriber);
        self
    }

    pub fn register(&mut self, subscriber: Arc<dyn EventSubscriber>) {
        debug!(subscriber = subscriber.name(), events = ?subscriber.events(), "Registered subscriber");
        self.subscribers.push(subscriber);
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn interested_in(&self, event: EventKind) -> impl Iterator<Item = &Arc<dyn EventSubscriber>> {
        self.subscribers
            .iter()
            .filter(move |s| s.is_interested_in(event))
    }

    /// Subscribers that would act on behalf of `job` for some event.
    pub fn applicable_to<'a>(
        &'a self,
        job: &'a dyn BuildJob,
    ) -> impl Iterator<Item = &'a Arc<dyn EventSubscriber>> {
        self.subscribers.iter().filter(move |s| s.is_applicable(job))
    }

    /// Calls every interested subscriber exactly once. A failing or panicking
    /// subscriber is logged and does not stop the others.
    pub fn dispatch(&self, envelope: &EventEnvelope) -> DispatchReport {
        let mut report = DispatchReport::default();

        for subscriber in self.interested_in(envelope.kind) {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut ctx = SecurityContext::anonymous();
                subscriber.on_event(&mut ctx, envelope.kind, &envelope.payload)
            }));

            match outcome {
                Ok(Ok(())) => {
                    debug!(subscriber = subscriber.name(), event = %envelope.kind, "Subscriber handled event");
                    report.delivered += 1;
                }
                Ok(Err(e)) => {
                    error!(subscriber = subscriber.name(), event = %envelope.kind, "Subscriber failed: {}", e);
                    report.failed.push(subscriber.name().to_string());
                }
                Err(panic) => {
                    error!(
                        subscriber = subscriber.name(),
                        event = %envelope.kind,
                        "Subscriber panicked: {}",
                        panic_message(panic.as_ref())
                    );
                    report.failed.push(subscriber.name().to_string());
                }
            }
        }

        if report.delivered == 0 && report.failed.is_empty() {
            debug!(event = %envelope.kind, "No subscriber is interested in event");
        }
        report
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RouterError;
    use std::sync::Mutex;

    enum Behavior {
        Succeed,
        Fail,
        Panic,
    }

    struct Recording {
        name: &'static str,
        events: Vec<EventKind>,
        behavior: Behavior,
        calls: Mutex<Vec<(EventKind, String, bool)>>,
    }

    impl Recording {
        fn new(name: &'static str, events: &[EventKind], behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name,
                events: events.to_vec(),
                behavior,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(EventKind, String, bool)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl EventSubscriber for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn events(&self) -> &[EventKind] {
            &self.events
        }

        fn is_applicable(&self, _job: &dyn BuildJob) -> bool {
            true
        }

        fn on_event(&self, ctx: &mut SecurityContext, event: EventKind, payload: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((event, payload.to_string(), ctx.is_elevated()));
            match self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Fail => Err(RouterError::MalformedPayload("boom".to_string())),
                Behavior::Panic => panic!("subscriber exploded"),
            }
        }
    }

    #[test]
    fn only_interested_subscribers_are_called() {
        let push = Recording::new("push", &[EventKind::Push], Behavior::Succeed);
        let pr = Recording::new("pr", &[EventKind::PullRequest], Behavior::Succeed);
        let registry = SubscriberRegistry::new()
            .with(push.clone())
            .with(pr.clone());

        let report = registry.dispatch(&EventEnvelope::new(EventKind::Push, "{}"));

        assert_eq!(report.delivered, 1);
        assert_eq!(push.calls(), [(EventKind::Push, "{}".to_string(), false)]);
        assert!(pr.calls().is_empty());
    }

    #[test]
    fn each_subscriber_is_called_exactly_once() {
        let both = Recording::new(
            "both",
            &[EventKind::Push, EventKind::Push, EventKind::Create],
            Behavior::Succeed,
        );
        let registry = SubscriberRegistry::new().with(both.clone());

        registry.dispatch(&EventEnvelope::new(EventKind::Push, "payload"));

        assert_eq!(both.calls().len(), 1);
    }

    #[test]
    fn failures_are_isolated() {
        let failing = Recording::new("failing", &[EventKind::Push], Behavior::Fail);
        let panicking = Recording::new("panicking", &[EventKind::Push], Behavior::Panic);
        let healthy = Recording::new("healthy", &[EventKind::Push], Behavior::Succeed);
        let registry = SubscriberRegistry::new()
            .with(failing.clone())
            .with(panicking.clone())
            .with(healthy.clone());

        let report = registry.dispatch(&EventEnvelope::new(EventKind::Push, "{}"));

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, ["failing", "panicking"]);
        assert_eq!(healthy.calls().len(), 1);
    }

    #[test]
    fn no_subscribers_is_an_empty_report() {
        let registry = SubscriberRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(
            registry.dispatch(&EventEnvelope::new(EventKind::Ping, "{}")),
            DispatchReport::default()
        );
    }
}
