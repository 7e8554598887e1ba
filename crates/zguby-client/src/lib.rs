//! Zguby Client - network collaborators of the publication saga.
//!
//! - [`PortalClient`]: the open-data portal's HTTP API (`reqwest`)
//! - [`NatsBus`]: the event bus as a JetStream stream (`async-nats`)

pub mod bus;
pub mod portal;

pub use bus::{NatsBus, NatsDelivery, NatsSubscription};
pub use portal::PortalClient;
