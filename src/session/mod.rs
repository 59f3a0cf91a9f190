//! Session state: transcripts and context variables keyed by session.

pub mod message;
pub mod store;

pub use message::{Message, MessageMetadata, Role, ThinkingAnnotation, ThinkingStatus};
pub use store::{Session, SessionHandle, SessionStore};
