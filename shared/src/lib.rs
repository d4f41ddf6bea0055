//! Shared types for the Lavoro chat service.
//!
//! Both the server and the client crate speak these types: the persistent
//! data model (messages, groups, summaries) and the real-time event
//! catalogue carried over the WebSocket channel as JSON text frames.

pub mod envelope;
pub mod events;
pub mod model;

pub use envelope::Envelope;
pub use events::{ClientEvent, ServerEvent};
pub use model::{
    Attachment, Contact, ConversationSummary, Group, GroupMessage, GroupSummary, Message,
};
