//! Inbound polling — gateway drain loop and its singleton lease.

pub mod lease;
pub mod receiver;

pub use lease::LeaseRegistry;
pub use receiver::spawn_inbound_poller;
