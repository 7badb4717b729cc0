use super::{BirthDetails, RequestKind};
use crate::types::{ChatRequest, Message};

pub const REPROMPT_SYSTEM_INSTRUCTION: &str = "You are an expert astrologer. Your previous answer was cut off. \
Write the complete response and include ALL requested sections in full. Do not truncate, do not \
summarize early, and finish every section before stopping.";

/// Longest slice of the caller's prompt reused when nothing was extracted.
const MAX_REUSED_PROMPT_CHARS: usize = 2_000;

const READING_SECTIONS: &str =
    "Overview, Personality, Key Strengths, Potential Challenges, Career, Relationships";
const CAREER_SECTIONS: &str =
    "Career Overview, Key Strengths, Potential Challenges, Suitable Fields, Timing and Opportunities";

/// Builds the follow-up request sent after a truncated first answer.
///
/// Every strategy asks for the provider's token ceiling.
pub fn reprompt(kind: RequestKind, details: &BirthDetails, original: &ChatRequest) -> ChatRequest {
    let messages = match kind {
        RequestKind::Reading => structured_messages(
            "Provide a complete astrological reading",
            READING_SECTIONS,
            details,
            original,
        ),
        RequestKind::Career => structured_messages(
            "Provide a complete career-focused astrological analysis",
            CAREER_SECTIONS,
            details,
            original,
        ),
        RequestKind::General => {
            let mut messages = Vec::with_capacity(original.messages.len() + 1);
            messages.push(Message::system(REPROMPT_SYSTEM_INSTRUCTION));
            messages.extend(original.messages.iter().cloned());
            messages
        }
    };

    ChatRequest {
        model: original.model.clone(),
        messages,
        temperature: original.temperature,
        max_tokens: None,
    }
    .at_token_ceiling()
}

fn structured_messages(
    lead: &str,
    sections: &str,
    details: &BirthDetails,
    original: &ChatRequest,
) -> Vec<Message> {
    let user = if details.is_empty() {
        truncate_chars(original.last_user_content(), MAX_REUSED_PROMPT_CHARS)
    } else {
        let mut prompt = format!("{lead} for the following birth details.\n\n");
        for (label, value) in [
            ("Name", &details.name),
            ("Date of Birth", &details.date),
            ("Time of Birth", &details.time),
            ("Place of Birth", &details.place),
        ] {
            if !value.is_empty() {
                prompt.push_str(&format!("{label}: {value}\n"));
            }
        }
        prompt.push_str(&format!("\nInclude these sections: {sections}."));
        prompt
    };

    vec![Message::system(REPROMPT_SYSTEM_INSTRUCTION), Message::user(user)]
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn original(content: &str) -> ChatRequest {
        ChatRequest::new(
            "m",
            vec![Message::system("be kind"), Message::user(content)],
        )
        .with_temperature(0.3)
        .with_max_tokens(500)
    }

    #[test]
    fn reading_reprompt_is_minimal_and_structured() {
        let details = BirthDetails {
            name: "Ada".to_string(),
            date: "1815-12-10".to_string(),
            time: String::new(),
            place: "London".to_string(),
        };
        let request = reprompt(RequestKind::Reading, &details, &original("long prompt"));

        assert_eq!(request.model, "m");
        assert_eq!(request.temperature, Some(0.3));
        assert_eq!(request.max_tokens, Some(u32::MAX));
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].content, REPROMPT_SYSTEM_INSTRUCTION);
        let user = &request.messages[1].content;
        assert!(user.contains("Name: Ada\n"));
        assert!(user.contains("Place of Birth: London"));
        assert!(!user.contains("Time of Birth"));
        assert!(user.contains("Key Strengths, Potential Challenges"));
    }

    #[test]
    fn falls_back_to_capped_original_prompt() {
        let long = "é".repeat(3_000);
        let request = reprompt(RequestKind::Career, &BirthDetails::default(), &original(&long));
        assert_eq!(request.messages[1].content.chars().count(), 2_000);
    }

    #[test]
    fn general_reprompt_resends_conversation() {
        let original = original("Tell me about Aries");
        let request = reprompt(RequestKind::General, &BirthDetails::default(), &original);
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(&request.messages[1..], &original.messages[..]);
        assert_eq!(request.max_tokens, Some(u32::MAX));
    }
}
