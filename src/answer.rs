//! Answer composition: grounded prompt assembly plus the single
//! generation call.
//!
//! Generation is invoked exactly once — a failed completion is not safe to
//! blindly repeat — and on failure a deterministic fallback is returned
//! that still reports how many emails and attachments matched, so the read
//! path never surfaces a raw provider error.

use tracing::warn;

use crate::providers::GenerationProvider;
use crate::retrieval::RetrievalResult;

const SYSTEM_PROMPT: &str = "You are an assistant that answers questions about the \
user's mailbox. Ground every statement in the provided excerpts; when the excerpts \
do not contain the answer, say so plainly instead of guessing.";

pub async fn compose_answer(
    generator: &dyn GenerationProvider,
    query: &str,
    retrieval: &RetrievalResult,
) -> String {
    let user_prompt = build_user_prompt(query, retrieval);

    match generator.generate(SYSTEM_PROMPT, &user_prompt).await {
        Ok(answer) => answer,
        Err(e) => {
            warn!(error = %e, "generation failed, returning fallback");
            fallback_answer(retrieval)
        }
    }
}

fn build_user_prompt(query: &str, retrieval: &RetrievalResult) -> String {
    format!(
        "Mailbox excerpts:\n{}\n\nQuestion: {}",
        retrieval.context, query
    )
}

/// Deterministic text returned when generation fails. Never empty.
pub fn fallback_answer(retrieval: &RetrievalResult) -> String {
    format!(
        "I could not generate an answer right now. Your question matched {} email(s) \
and {} attachment(s); the excerpts below may still help.\n\n{}",
        retrieval.emails.len(),
        retrieval.attachments.len(),
        retrieval.context
    )
}
