use serde_json::Value;

/// A batch of keyed message entries to merge into the stored conversation
/// row. Every field is optional; empty vectors mean "no update for that
/// column". Entries are raw JSON because each tool shapes its own reasoning
/// and response payloads; identity-key derivation happens at the persistence
/// boundary.
#[derive(Debug, Clone, Default)]
pub struct MessageEntryUpdate {
    pub reasoning: Vec<Value>,
    pub raw_llm: Vec<Value>,
    pub response: Vec<Value>,
}

impl MessageEntryUpdate {
    pub fn is_empty(&self) -> bool {
        self.reasoning.is_empty() && self.raw_llm.is_empty() && self.response.is_empty()
    }

    pub fn reasoning(entry: Value) -> Self {
        Self {
            reasoning: vec![entry],
            ..Default::default()
        }
    }
}
