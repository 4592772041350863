//! Event queues: the ordered collection and the detached-event relay built on it.

pub mod collection;
pub mod relay;

pub use collection::{CollectionError, EventCollection};
pub use relay::{DetachedEventRelay, RelayError};
