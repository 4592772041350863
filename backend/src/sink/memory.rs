use crate::events::EventCollection;
use crate::sink::{EventSink, SinkError};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Default)]
struct Delivered {
    events: EventCollection,
    batches: usize,
    failing: u32,
}

/// Collects everything delivered. Clones share the collected events, so a
/// test can keep one handle and give another to the driver.
#[derive(Debug, Clone)]
pub struct MemorySink {
    name: String,
    delivered: Rc<RefCell<Delivered>>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delivered: Rc::default(),
        }
    }

    /// Reject the next `count` deliveries.
    pub fn fail_next(&self, count: u32) {
        self.delivered.borrow_mut().failing = count;
    }

    pub fn events(&self) -> EventCollection {
        self.delivered.borrow().events.clone()
    }

    pub fn batch_count(&self) -> usize {
        self.delivered.borrow().batches
    }

    /// Drop what has been collected so far.
    pub fn clear(&self) -> EventCollection {
        self.delivered.borrow_mut().events.take()
    }
}

impl EventSink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&mut self, events: &EventCollection) -> Result<(), SinkError> {
        let mut delivered = self.delivered.borrow_mut();
        if delivered.failing > 0 {
            delivered.failing -= 1;
            return Err(SinkError::Rejected(format!("{} is unavailable", self.name)));
        }
        delivered.events.insert_events(events.clone());
        delivered.batches += 1;
        Ok(())
    }
}
