pub mod event_bus;

pub use event_bus::{EventBus, EventHandler, PublishReport, Subscription, WILDCARD};
