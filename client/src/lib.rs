//! Device-side library for the Lavoro chat service.
//!
//! Gives the UI instant feedback before server confirmation and survives
//! reloads and offline gaps:
//!
//! - [`api::ChatApi`] — REST client (durable path)
//! - [`socket::SocketClient`] — real-time channel (fast path)
//! - [`cache::CacheStore`] — local mirror of conversation/group summaries
//! - [`reconcile`] — optimistic entries and duplicate-free merging
//! - [`session::ChatSession`] — wires the pieces together

pub mod api;
pub mod cache;
pub mod error;
pub mod reconcile;
pub mod session;
pub mod socket;

pub use api::ChatApi;
pub use cache::CacheStore;
pub use error::{ClientError, Result};
pub use session::ChatSession;
pub use socket::SocketClient;
