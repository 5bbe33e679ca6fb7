use crate::core::models::fiber::FiberEnd;
use crate::core::models::hand::DetachReason;
use crate::core::models::world::HandOwner;

/// Per-object notifications emitted by the kinetics and the step driver.
///
/// Objects are identified by their inventory identity, which stays
/// resolvable (or recognizably stale) for the rest of the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    Attached {
        hand: HandOwner,
        fiber: u64,
        abscissa: f64,
    },
    Detached {
        hand: HandOwner,
        fiber: u64,
        reason: DetachReason,
    },
    Catastrophe {
        fiber: u64,
        end: FiberEnd,
    },
    Rescued {
        fiber: u64,
        end: FiberEnd,
    },
    Severed {
        fiber: u64,
        new_fiber: u64,
        abscissa: f64,
    },
    Destroyed {
        fiber: u64,
    },
}

pub type EventCallback<'a> = Box<dyn FnMut(&SimEvent) + Send + 'a>;

/// Receives simulation events; without a callback every report is a no-op.
#[derive(Default)]
pub struct EventSink<'a> {
    callback: Option<EventCallback<'a>>,
}

impl<'a> EventSink<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: EventCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&mut self, event: SimEvent) {
        if let Some(cb) = &mut self.callback {
            cb(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn sink_without_callback_ignores_reports() {
        let mut sink = EventSink::new();
        sink.report(SimEvent::Destroyed { fiber: 1 });
    }

    #[test]
    fn sink_forwards_events_to_the_callback() {
        let count = AtomicUsize::new(0);
        {
            let mut sink = EventSink::with_callback(Box::new(|event| {
                assert!(matches!(event, SimEvent::Destroyed { fiber: 9 }));
                count.fetch_add(1, Ordering::Relaxed);
            }));
            sink.report(SimEvent::Destroyed { fiber: 9 });
            sink.report(SimEvent::Destroyed { fiber: 9 });
        }
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }
}
