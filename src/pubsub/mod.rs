//! Message passing between the I/O tasks, the station consumer loop and front ends.
//!
//! - [`Inbox`]: bounded queue every background task pushes decoded events into
//! - [`Topic`] / [`Publisher`] / [`Subscriber`]: latest-value cells that front ends
//!   poll on their own cadence

pub mod message;
pub mod topic;
pub mod publisher;
pub mod subscriber;
pub mod inbox;

pub use message::Message;
pub use topic::Topic;
pub use publisher::Publisher;
pub use subscriber::Subscriber;
pub use inbox::{EventSink, Inbox};
