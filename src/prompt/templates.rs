//! Prompts sent upstream on behalf of the user, rendered with
//! Handlebars. Page text and transcripts are untrusted input so the
//! registry runs in strict mode with no extra helpers.

use std::fmt;

use handlebars::Handlebars;

#[derive(Debug)]
pub enum Template {
    ChatTitle,
    UrlContext,
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// Transcript is passed pre-serialized as JSON
const CHAT_TITLE_PROMPT: &str = r"Generate a short (5-7 words) chat title based on the following initial conversation. The conversation is a set of messages, stringified: {{{messages}}}";

const URL_CONTEXT_PROMPT: &str = r"The user referenced the web page {{{url}}}. Use the following readable content of that page as context when answering.

PAGE CONTENT:
{{{content}}}

---

{{{system}}}";

pub fn templates<'a>() -> Handlebars<'a> {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    registry
        .register_template_string(&Template::ChatTitle.to_string(), CHAT_TITLE_PROMPT)
        .expect("Failed to register template");
    registry
        .register_template_string(&Template::UrlContext.to_string(), URL_CONTEXT_PROMPT)
        .expect("Failed to register template");
    registry
}
