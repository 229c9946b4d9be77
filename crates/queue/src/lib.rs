//! `queue` crate — durable, at-least-once activity queues.
//!
//! One queue (subject) per activity type plus a well-known response
//! subject. Consumers fetch messages, then explicitly acknowledge them or
//! hand them back for redelivery, optionally after a delay.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod subject;
pub mod traits;

pub use error::QueueError;
pub use memory::MemoryQueue;
pub use postgres::PgQueue;
pub use subject::{activity_subject, RESPONSE_SUBJECT};
pub use traits::{publish_message, ActivityQueue, Delivery};
