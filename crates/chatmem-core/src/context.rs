//! Prompt context assembly from retrieved exchanges.

use crate::messages::MessageRecord;

/// Render retrieved exchanges as a context block for a language-model prompt.
/// Returns an empty string when there is nothing to inject.
pub fn format_context(messages: &[MessageRecord]) -> String {
    if messages.is_empty() {
        return String::new();
    }

    let mut block = String::from("Here is some context from earlier in this chat:\n");
    for message in messages {
        block.push_str(&format!(
            "User previously asked: \"{}\"\nAgent replied: \"{}\"\n\n",
            message.query, message.response
        ));
    }
    block
}

/// Context block followed by the new query
pub fn build_prompt(messages: &[MessageRecord], query: &str) -> String {
    format!("{}{}", format_context(messages), query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn message(query: &str, response: &str) -> MessageRecord {
        MessageRecord {
            id: Uuid::new_v4(),
            chat_id: "c1".into(),
            query: query.into(),
            response: response.into(),
            timestamp: Utc::now(),
            score: None,
        }
    }

    #[test]
    fn test_empty_context_leaves_prompt_untouched() {
        assert_eq!(format_context(&[]), "");
        assert_eq!(build_prompt(&[], "hello"), "hello");
    }

    #[test]
    fn test_context_block_lists_exchanges_in_order() {
        let prompt = build_prompt(
            &[message("Weather?", "Sunny"), message("Tomorrow?", "Rain")],
            "And Sunday?",
        );
        assert!(prompt.starts_with("Here is some context from earlier in this chat:\n"));
        assert!(prompt.contains("User previously asked: \"Weather?\"\nAgent replied: \"Sunny\"\n"));
        assert!(prompt.find("Weather?").unwrap() < prompt.find("Tomorrow?").unwrap());
        assert!(prompt.ends_with("And Sunday?"));
    }
}
