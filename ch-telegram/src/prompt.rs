//! Prompt and reminder rendering.
//!
//! Prompts are plain text and carry no request-id metadata; correlation runs
//! through message ids and reply threading instead, so the human never has to
//! copy tokens around.

use ch_core::AskRequest;

pub fn render_prompt(req: &AskRequest) -> String {
    let mut out = String::new();
    out.push_str(req.question.trim());

    if req.is_choice() {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        for choice in &req.choices {
            out.push_str(&format!("{}) {}\n", choice.id, choice.text));
        }
        if req.allow_other {
            out.push_str("other) write your own answer\n");
        }
        out.push_str("\nReply with option ID or text.");
    }

    out.trim().to_string()
}

pub fn reminder_text(pending_count: usize) -> String {
    if pending_count <= 1 {
        return "Please reply directly to the message you are answering.".to_string();
    }
    format!(
        "You have {pending_count} unanswered consult-human questions. \
         Please reply directly to the exact message you are answering."
    )
}
