use crate::error::RelayResult;
use crate::llm_client::{CompletionOptions, LlmClient};
use crate::rag::types::{ConversationTurn, TurnRole};

const CONTEXTUALIZE_PROMPT: &str = "Given a chat history and the latest user question \
which might reference context in the chat history, formulate a standalone question \
which can be understood without the chat history. Do NOT answer the question, just \
reformulate it if needed and otherwise return it as is.";

pub(crate) fn format_history(history: &[ConversationTurn]) -> String {
    history
        .iter()
        .map(|turn| {
            let label = match turn.role {
                TurnRole::Human => "Human",
                TurnRole::Ai => "Assistant",
            };
            format!("{label}: {}", turn.content.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rewrite a follow-up question into a standalone retrieval query.
///
/// With no history there is nothing to resolve, so the question passes
/// through verbatim and the LLM is never invoked. The prompt instructs a
/// rewrite, not an elaboration: no facts beyond the history and the
/// question itself.
pub async fn contextualize(
    llm: &dyn LlmClient,
    history: &[ConversationTurn],
    latest: &str,
) -> RelayResult<String> {
    if history.is_empty() {
        return Ok(latest.to_string());
    }

    let prompt = format!(
        "{CONTEXTUALIZE_PROMPT}\n\nChat history:\n{}\n\nLatest question:\n{}",
        format_history(history),
        latest.trim()
    );

    let rewritten = llm
        .complete(&prompt, &CompletionOptions::deterministic())
        .await?;
    let rewritten = rewritten.trim();

    if rewritten.is_empty() {
        Ok(latest.to_string())
    } else {
        Ok(rewritten.to_string())
    }
}
