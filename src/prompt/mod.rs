//! System prompts: the prompt registry, the default prompt for each
//! channel and the templates used by the API routes.

use chrono::{Local, NaiveDate};

pub mod registry;
pub use registry::{Prompt, PromptRegistry};

pub mod templates;
pub use templates::{Template, templates};

pub const DEFAULT_PROMPT_ID: &str = "defaultPrompt";

/// Placeholder replaced with today's date when a prompt is used
pub const DATE_PLACEHOLDER: &str = "<CURRENT_DATE>";

pub const BASE_PROMPT: &str = r"You are ChatGPT, an AI language model designed to assist users by providing helpful and accurate information. Current date: <CURRENT_DATE>.
When interacting with users, adhere to the following principles:
Understand the Query: Accurately comprehend the user's question or request.
Provide Relevant Information: Offer information that is pertinent to the query, drawing on a wide range of knowledge.
Be Clear and Concise: Ensure that responses are easy to understand and to the point.
Maintain a Conversational Tone: Interact in a way that feels natural and engaging, similar to a human conversation.
Adapt to User Preferences: Tailor responses based on the user's stated preferences and context.
Acknowledge Knowledge Gaps: If you don't know the answer to a query, acknowledge this and do not generate false or inaccurate information.
Request Additional Information: If more information is needed to provide a quality answer, ask the user for the extra details you need.";

/// Fallback system prompt for a channel. Only the `default` channel
/// exists so far, unknown channels get the same prompt.
pub fn channel_prompt(channel: &str) -> &'static str {
    match channel {
        "default" => BASE_PROMPT,
        other => {
            tracing::debug!("Unknown channel {}, using the default prompt", other);
            BASE_PROMPT
        }
    }
}

/// Format a date the way prompts expect it, e.g. `2024-Sep-05`
pub fn format_prompt_date(date: NaiveDate) -> String {
    date.format("%Y-%b-%d").to_string()
}

pub fn current_date() -> String {
    format_prompt_date(Local::now().date_naive())
}

/// Replace every date placeholder in `prompt` with `date`.
pub fn resolve_date(prompt: &str, date: &str) -> String {
    prompt.replace(DATE_PLACEHOLDER, date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prompt_date() {
        let date = NaiveDate::from_ymd_opt(2024, 9, 5).unwrap();
        assert_eq!(format_prompt_date(date), "2024-Sep-05");
    }

    #[test]
    fn test_resolve_date() {
        let resolved = resolve_date(BASE_PROMPT, "2024-Sep-05");
        assert!(resolved.contains("Current date: 2024-Sep-05."));
        assert!(!resolved.contains(DATE_PLACEHOLDER));
    }

    #[test]
    fn test_channel_prompt_falls_back_to_base() {
        assert_eq!(channel_prompt("default"), BASE_PROMPT);
        assert_eq!(channel_prompt("confluence"), BASE_PROMPT);
    }
}
