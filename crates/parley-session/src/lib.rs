//! Call session orchestration.
//!
//! A [`SessionManager`] owns every live call. Each call is a session task
//! that connects a transport leg, opens a transcription channel, and then
//! turns final caller transcripts into spoken replies: completion first,
//! then synthesis, one step at a time.

mod config;
mod context;
mod error;
mod registry;
mod session;

pub use config::SessionConfig;
pub use context::ConversationContext;
pub use error::SessionError;
pub use registry::{CreatedCall, InboundCall, OutboundCall, SessionManager};
pub use session::SessionDeps;
