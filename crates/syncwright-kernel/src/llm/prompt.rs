//! Prompt assembly for chat-style providers.

use std::fmt::Write;

use super::GenerationRequest;

pub const SYSTEM_PROMPT: &str = "You keep a bilingual document in sync. \
Translate the text you are given and reply with the translation only: \
a single line, no quotes, no commentary.";

/// User message for one request.
pub fn render_user_prompt(request: &GenerationRequest) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Translate the following {} text into {}.",
        request.from_lang(),
        request.to_lang()
    );

    if !request.references.glossary.is_empty() {
        out.push_str("\nGlossary (source => target):\n");
        for item in &request.references.glossary {
            let _ = writeln!(out, "- {} => {}", item.source, item.target);
        }
    }
    if !request.references.preferences.is_empty() {
        out.push_str("\nPreferred renderings (source => target):\n");
        for item in &request.references.preferences {
            let _ = writeln!(out, "- {} => {}", item.source, item.target);
        }
    }

    if let Some(prior) = &request.prior {
        let _ = write!(
            out,
            "\nThe previous version of this passage was:\n{}: {}\n{}: {}\n\
             Keep the translation as close to the previous one as the changes allow.\n",
            request.source_lang, prior.source, request.target_lang, prior.target
        );
    }

    if let Some(instruction) = &request.instruction {
        let _ = writeln!(out, "\nAdditional instruction: {instruction}");
    }

    let _ = write!(out, "\nText:\n{}", request.content);
    out
}
