//! Prompt construction for simple and structured answers.

use serde_json::Value;

use docqa_core::types::RetrievalResult;

use crate::generation::GenerationRequest;

/// The sentence the model is told to use when the context has no answer.
pub const NO_ANSWER: &str = "I don't have enough information to answer this question.";

const CONTEXT_HEADER: &str = "Context:\n";
const QUESTION_HEADER: &str = "\n\nQuestion: ";
const SOURCE_TAG: &str = "[Source ";

const SYSTEM_INSTRUCTION: &str = "You are a helpful assistant that answers questions using only \
     the provided context passages from the user's documents. Do not use outside knowledge.";

/// Render the ranked chunks as tagged context passages, best first.
pub fn format_context(retrieval: &RetrievalResult) -> String {
    retrieval
        .chunks
        .iter()
        .enumerate()
        .map(|(i, scored)| {
            format!(
                "{}{}] {} (chunk {}, score {:.2})\n{}",
                SOURCE_TAG,
                i + 1,
                scored.chunk.source_document,
                scored.chunk.sequence_index,
                scored.score,
                scored.chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn context_block(retrieval: &RetrievalResult) -> String {
    if retrieval.is_empty() {
        "No relevant documents were found for this question.".to_string()
    } else {
        format_context(retrieval)
    }
}

/// Request for a free-text answer.
pub fn simple_request(question: &str, retrieval: &RetrievalResult) -> GenerationRequest {
    let instruction = if retrieval.is_empty() {
        format!("Reply exactly: \"{}\"", NO_ANSWER)
    } else {
        format!(
            "Answer the question based on the context above. If the context doesn't \
             contain the answer, say \"{}\"\n\nProvide a concise and accurate answer:",
            NO_ANSWER
        )
    };

    GenerationRequest {
        system: Some(SYSTEM_INSTRUCTION.to_string()),
        prompt: format!(
            "{}{}{}{}\n\n{}",
            CONTEXT_HEADER,
            context_block(retrieval),
            QUESTION_HEADER,
            question.trim(),
            instruction
        ),
        json_mode: false,
    }
}

/// Request for a JSON answer conforming to `schema`.
///
/// The schema goes into the system instruction and the provider is asked
/// for JSON output.
pub fn structured_request(
    question: &str,
    retrieval: &RetrievalResult,
    schema: &Value,
) -> GenerationRequest {
    let schema_text =
        serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    let system = format!(
        "{}\n\nYou always respond with valid JSON. The response must match the following \
         JSON schema exactly:\n\n{}\n\nReturn only the JSON value, without any additional \
         text or markdown formatting.",
        SYSTEM_INSTRUCTION, schema_text
    );
    let instruction = if retrieval.is_empty() {
        format!(
            "No context is available. Fill the answer fields with \"{}\"",
            NO_ANSWER
        )
    } else {
        "Answer the question based on the context above. If the context doesn't contain \
         the answer, indicate this in your response."
            .to_string()
    };

    GenerationRequest {
        system: Some(system),
        prompt: format!(
            "{}{}{}{}\n\n{}",
            CONTEXT_HEADER,
            context_block(retrieval),
            QUESTION_HEADER,
            question.trim(),
            instruction
        ),
        json_mode: true,
    }
}

/// Text of the first context passage in a prompt built by this module.
pub fn first_passage(prompt: &str) -> Option<&str> {
    let context = prompt.split_once(CONTEXT_HEADER)?.1;
    let context = context.split_once(QUESTION_HEADER).map_or(context, |(c, _)| c);
    if !context.starts_with(SOURCE_TAG) {
        return None;
    }
    let body = context.split_once('\n')?.1;
    let end = body.find(&format!("\n\n{}", SOURCE_TAG)).unwrap_or(body.len());
    Some(body[..end].trim()).filter(|p| !p.is_empty())
}
