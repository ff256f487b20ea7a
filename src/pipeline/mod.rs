//! Response processing pipeline.
//!
//! Inbound messages flow: poller → worker queue → `ResponseProcessor`,
//! which parses the reply and runs the capacity-constrained transition
//! per pending assignment. Every outbound notice goes back through the
//! shared [`crate::dispatch::Messenger`].

pub mod capacity;
pub mod processor;
pub mod reply;

pub use capacity::{RequestLocks, ResponseOutcome};
pub use processor::ResponseProcessor;
pub use reply::ReplyIntent;
