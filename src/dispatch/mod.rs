//! Outbound side — message emission and offer dispatch.

pub mod messenger;
pub mod notifier;

pub use messenger::Messenger;
pub use notifier::VolunteerNotifier;
