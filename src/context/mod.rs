//! Augment the system prompt with the readable text of a web page the
//! user mentioned. Any failure falls back to the plain system prompt.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use htmd::HtmlToMarkdown;
use regex::Regex;
use serde_json::json;

use crate::openai::{Message, Role};
use crate::prompt::{Template, templates};

/// Upper bound on page text added to the prompt
pub const MAX_CONTEXT_CHARS: usize = 20_000;

// Optional scheme, then an IPv4 address or dotted domain, optional
// port and path
static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:https?://)?(?:\d{1,3}(?:\.\d{1,3}){3}|(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z]{2,})(?::\d{1,5})?(?:/[^\s]*)?",
    )
    .expect("Invalid URL regex")
});

/// Find the first URL-looking substring in `text`. URLs without a
/// scheme get `https://`.
pub fn find_url(text: &str) -> Option<String> {
    let found = URL_RE.find(text)?.as_str();
    let found = found.trim_end_matches(['.', ',', '!', '?', ')', ']', '"', '\'', ';', ':']);
    let lower = found.to_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        Some(found.to_string())
    } else {
        Some(format!("https://{}", found))
    }
}

/// Convert a page to readable text, leaving out scripts, styles and
/// page chrome.
pub fn readable_text(html: &str) -> Result<String, Error> {
    let converter = HtmlToMarkdown::builder()
        .skip_tags(vec![
            "script", "style", "noscript", "head", "nav", "header", "footer", "aside", "form",
            "svg", "iframe",
        ])
        .build();
    let text = converter.convert(html)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(anyhow!("Page has no readable content"));
    }
    Ok(text.chars().take(MAX_CONTEXT_CHARS).collect())
}

pub async fn fetch_readable_text(url: &str) -> Result<String, Error> {
    let html = reqwest::Client::new()
        .get(url)
        .header("Accept", "text/html")
        .timeout(Duration::from_secs(15))
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    readable_text(&html)
}

/// Prefix `system` with the content of the first URL in the latest
/// user message. Returns `system` unchanged when there's no URL or
/// the page can't be used.
pub async fn augment_system_prompt(system: &str, messages: &[Message]) -> String {
    let Some(latest) = messages.iter().rev().find(|m| m.role == Role::User) else {
        return system.to_string();
    };
    let Some(url) = find_url(&latest.content) else {
        return system.to_string();
    };

    let content = match fetch_readable_text(&url).await {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!("Skipping URL context for {}: {}", url, e);
            return system.to_string();
        }
    };

    match templates().render(
        &Template::UrlContext.to_string(),
        &json!({"url": url, "content": content, "system": system}),
    ) {
        Ok(prompt) => {
            tracing::debug!("Added {} chars of context from {}", content.len(), url);
            prompt
        }
        Err(e) => {
            tracing::error!("Failed to render URL context: {}", e);
            system.to_string()
        }
    }
}
