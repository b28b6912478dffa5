//! Per-call conversation history.

use parley_types::{Role, Turn};
use std::collections::HashMap;
use tracing::warn;

/// Ordered turn history for one call.
///
/// Owned by the call's session task. The first turn is always the system
/// prompt once [`ConversationContext::initialize`] has run.
#[derive(Debug, Default)]
pub struct ConversationContext {
    call_id: Option<String>,
    turns: Vec<Turn>,
    metadata: HashMap<String, String>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the history with the system prompt and attaches call metadata.
    ///
    /// Initializing an already initialized context discards its history and
    /// starts over.
    pub fn initialize(
        &mut self,
        call_id: &str,
        system_prompt: &str,
        metadata: HashMap<String, String>,
    ) -> &[Turn] {
        if let Some(previous) = &self.call_id {
            warn!(
                call_id,
                previous_call_id = %previous,
                discarded_turns = self.turns.len(),
                "conversation context re-initialized"
            );
        }
        self.call_id = Some(call_id.to_string());
        self.metadata = metadata;
        self.turns.clear();
        self.turns.push(Turn::new(Role::System, system_prompt));
        &self.turns
    }

    pub fn is_initialized(&self) -> bool {
        self.call_id.is_some()
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn append_system(&mut self, content: impl Into<String>) -> &[Turn] {
        self.append(Role::System, content)
    }

    pub fn append_user(&mut self, content: impl Into<String>) -> &[Turn] {
        self.append(Role::User, content)
    }

    pub fn append_assistant(&mut self, content: impl Into<String>) -> &[Turn] {
        self.append(Role::Assistant, content)
    }

    fn append(&mut self, role: Role, content: impl Into<String>) -> &[Turn] {
        self.turns.push(Turn::new(role, content));
        &self.turns
    }

    /// The full history in the order a completion request expects it.
    pub fn render(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
