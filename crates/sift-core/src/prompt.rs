use sift_index::RetrievedChunk;
use sift_llm::{Message, Role};

use crate::config::{ChatConfig, default_rag_instruction, default_system_preamble};

const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub preamble: String,
    /// Appended to the preamble when retrieved context is supplied.
    pub rag_instruction: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            preamble: default_system_preamble(),
            rag_instruction: default_rag_instruction(),
        }
    }
}

impl From<&ChatConfig> for PromptTemplate {
    fn from(config: &ChatConfig) -> Self {
        Self {
            preamble: config.system_preamble.clone(),
            rag_instruction: config.rag_instruction.clone(),
        }
    }
}

/// Join retrieved chunks, each tagged with its source, best first.
#[must_use]
pub fn format_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| format!("[source: {}]\n{}", c.source_path, c.text))
        .collect::<Vec<_>>()
        .join(CHUNK_SEPARATOR)
}

/// Build the message list sent to the generation backend.
///
/// The result starts with a system message carrying the preamble, followed by
/// the conversation in order. With `use_rag`, the last user message is wrapped
/// in a CONTEXT / QUESTION / ANSWER block holding the retrieved chunks, even
/// when assistant turns follow it.
#[must_use]
pub fn assemble_prompt(
    template: &PromptTemplate,
    chunks: &[RetrievedChunk],
    conversation: &[Message],
    use_rag: bool,
) -> Vec<Message> {
    let mut system = template.preamble.clone();
    if use_rag && !template.rag_instruction.is_empty() {
        system.push('\n');
        system.push_str(&template.rag_instruction);
    }

    let mut messages = Vec::with_capacity(conversation.len() + 1);
    messages.push(Message::system(system));
    messages.extend(conversation.iter().cloned());

    if use_rag
        && let Some(question) = messages.iter_mut().rev().find(|m| m.role == Role::User)
    {
        question.content = format!(
            "CONTEXT:\n{}\n\nQUESTION:\n{}\n\nANSWER:",
            format_context(chunks),
            question.content
        );
    }
    messages
}
