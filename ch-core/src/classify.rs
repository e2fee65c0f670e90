//! Interpretation of a human reply to a choice question.
//!
//! Replies arrive as free text: "B", "1, 3", "inline", "other: ship both",
//! or a full sentence. The rules here decide which choice ids were picked
//! and what (if anything) counts as a free-form answer.

use std::collections::{HashMap, HashSet};

use crate::AskRequest;

const ID_TRIM: &[char] = &['(', ')', '[', ']', '{', '}', '<', '>', '.'];
const OTHER_PREFIX: &str = "other:";

/// Canonical form of a choice id: trimmed, uppercased, stripped of wrapping
/// punctuation so "(a)" and "A." both resolve to "A".
pub fn normalize_choice_id(v: &str) -> String {
    v.trim().to_uppercase().trim_matches(ID_TRIM).to_string()
}

/// Maps raw reply text to `(selected_ids, other_text)` for a choice question.
///
/// Precedence: an exact match of a choice's text wins outright; otherwise the
/// reply is split into tokens and matched against ids, 1-based indices, and
/// choice texts; otherwise `allow_other` decides whether the text is kept as
/// a free-form answer. A sentence-like reply (spaces but no `, ; \n`
/// delimiters) skips the token scan so incidental words such as "a" are not
/// mistaken for choice id "A".
pub fn classify_choice_reply(req: &AskRequest, raw: &str) -> (Vec<String>, String) {
    let text = raw.trim();
    if text.is_empty() {
        return (Vec::new(), String::new());
    }

    let by_id: HashSet<String> = req
        .choices
        .iter()
        .map(|c| normalize_choice_id(&c.id))
        .collect();
    let by_text: HashMap<String, String> = req
        .choices
        .iter()
        .map(|c| (c.text.trim().to_lowercase(), normalize_choice_id(&c.id)))
        .collect();

    if let Some(id) = by_text.get(&text.to_lowercase()) {
        return (vec![id.clone()], String::new());
    }

    if !text.contains([',', ';', '\n']) && text.contains(' ') {
        if req.allow_other {
            if let Some(rest) = strip_other_prefix(text) {
                return (Vec::new(), rest);
            }
            return (Vec::new(), text.to_string());
        }
        return (Vec::new(), String::new());
    }

    let mut selected: Vec<String> = Vec::new();
    for token in split_reply_tokens(text) {
        let normalized = normalize_choice_id(&token);
        let id = if by_id.contains(&normalized) {
            Some(normalized)
        } else if let Ok(idx) = normalized.parse::<usize>() {
            (idx >= 1 && idx <= req.choices.len())
                .then(|| normalize_choice_id(&req.choices[idx - 1].id))
        } else {
            by_text.get(&token.to_lowercase()).cloned()
        };
        if let Some(id) = id {
            if !selected.contains(&id) {
                selected.push(id);
            }
        }
    }
    selected.sort();

    if !selected.is_empty() {
        if let Some(rest) = strip_other_prefix(text) {
            return (selected, rest);
        }
        return (selected, String::new());
    }

    if req.allow_other {
        if let Some(rest) = strip_other_prefix(text) {
            return (Vec::new(), rest);
        }
        if text.eq_ignore_ascii_case("other") {
            return (Vec::new(), String::new());
        }
        return (Vec::new(), text.to_string());
    }

    (Vec::new(), String::new())
}

fn strip_other_prefix(text: &str) -> Option<String> {
    if text.to_lowercase().starts_with(OTHER_PREFIX) {
        Some(text[OTHER_PREFIX.len()..].trim().to_string())
    } else {
        None
    }
}

fn split_reply_tokens(s: &str) -> Vec<String> {
    s.split([',', ';', '\n', '\t', ' '])
        .map(|f| f.trim_matches(ID_TRIM).trim())
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{classify_choice_reply, normalize_choice_id};
    use crate::{AskRequest, Choice, QuestionType};
    use chrono::Utc;

    fn choice_request(choices: &[(&str, &str)], allow_other: bool) -> AskRequest {
        AskRequest {
            request_id: "deadbeefdeadbeef".to_string(),
            question: "Which approach?".to_string(),
            question_type: QuestionType::Choice,
            choices: choices
                .iter()
                .map(|(id, text)| Choice {
                    id: id.to_string(),
                    text: text.to_string(),
                })
                .collect(),
            allow_other,
            sent_at: Utc::now(),
        }
    }

    #[test]
    fn id_token_selects_choice() {
        let req = choice_request(&[("A", "Shared"), ("B", "Inline")], false);
        let (selected, other) = classify_choice_reply(&req, "B");
        assert_eq!(selected, vec!["B"]);
        assert_eq!(other, "");
    }

    #[test]
    fn lowercase_and_wrapped_ids_normalize() {
        let req = choice_request(&[("A", "Shared"), ("B", "Inline")], false);
        assert_eq!(classify_choice_reply(&req, "b").0, vec!["B"]);
        assert_eq!(classify_choice_reply(&req, "(a)").0, vec!["A"]);
        assert_eq!(normalize_choice_id(" [c]. "), "C");
    }

    #[test]
    fn numeric_indices_resolve_one_based() {
        let req = choice_request(&[("A", "Shared"), ("B", "Inline")], false);
        let (selected, other) = classify_choice_reply(&req, "1, 2");
        assert_eq!(selected, vec!["A", "B"]);
        assert_eq!(other, "");
    }

    #[test]
    fn out_of_range_index_selects_nothing() {
        let req = choice_request(&[("A", "Shared"), ("B", "Inline")], false);
        assert!(classify_choice_reply(&req, "3").0.is_empty());
        assert!(classify_choice_reply(&req, "0").0.is_empty());
    }

    #[test]
    fn choice_text_matches_exactly() {
        let req = choice_request(&[("A", "Shared"), ("B", "Inline")], false);
        let (selected, other) = classify_choice_reply(&req, "inline");
        assert_eq!(selected, vec!["B"]);
        assert_eq!(other, "");
    }

    #[test]
    fn duplicates_collapse_and_ids_sort() {
        let req = choice_request(&[("A", "Shared"), ("B", "Inline")], false);
        assert_eq!(classify_choice_reply(&req, "B, A, 2").0, vec!["A", "B"]);
    }

    #[test]
    fn sentence_guard_skips_token_scan() {
        // "a detailed reason" contains the token "a" which must not match
        // choice id "A".
        let req = choice_request(&[("A", "Shared"), ("B", "Inline")], false);
        let (selected, other) = classify_choice_reply(&req, "a detailed reason");
        assert!(selected.is_empty());
        assert_eq!(other, "");

        let req = choice_request(&[("A", "Shared"), ("B", "Inline")], true);
        let (selected, other) = classify_choice_reply(&req, "a detailed reason");
        assert!(selected.is_empty());
        assert_eq!(other, "a detailed reason");
    }

    #[test]
    fn allow_other_captures_free_text() {
        let req = choice_request(&[("A", "Shared"), ("B", "Inline")], true);
        let (selected, other) = classify_choice_reply(&req, "Let's do a third option");
        assert!(selected.is_empty());
        assert_eq!(other, "Let's do a third option");
    }

    #[test]
    fn other_prefix_is_stripped() {
        let req = choice_request(&[("A", "Shared"), ("B", "Inline")], true);
        let (selected, other) = classify_choice_reply(&req, "other: ship both halves");
        assert!(selected.is_empty());
        assert_eq!(other, "ship both halves");
    }

    #[test]
    fn bare_other_keyword_yields_empty_other_text() {
        let req = choice_request(&[("A", "Shared"), ("B", "Inline")], true);
        let (selected, other) = classify_choice_reply(&req, "Other");
        assert!(selected.is_empty());
        assert_eq!(other, "");
    }

    #[test]
    fn without_allow_other_unmatched_text_is_dropped() {
        let req = choice_request(&[("A", "Shared"), ("B", "Inline")], false);
        let (selected, other) = classify_choice_reply(&req, "neither");
        assert!(selected.is_empty());
        assert_eq!(other, "");
    }
}
