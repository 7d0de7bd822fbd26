//! Event bus for live run observability
//!
//! Every significant action in a run emits a [`FlowEvent`] onto a tokio
//! broadcast channel. Consumers subscribe and never slow the runner down:
//! emission is fire-and-forget, and a run proceeds identically with zero
//! subscribers.

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter, create_event_bus};
pub use types::{EventLogEntry, FlowEvent};
