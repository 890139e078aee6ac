//! Progress reporting: the callback surface executors push into, and the
//! polling stream clients consume.

pub mod publisher;
pub mod subscriber;

pub use publisher::{ProgressSink, RecordSink};
pub use subscriber::{StreamEvent, SubscriberConfig, stream_progress};
