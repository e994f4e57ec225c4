//! Link extraction from message text and attachments.

use regex::Regex;

use crate::discord::Message;

/// `http` or `https` scheme followed by any run of non-whitespace.
pub const URL_PATTERN: &str = r"https?://\S+";

/// Owns the precompiled URL pattern; built once and shared read-only.
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    url: Regex,
}

impl Default for LinkExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkExtractor {
    pub fn new() -> Self {
        Self {
            url: Regex::new(URL_PATTERN).expect("URL pattern is a valid regex"),
        }
    }

    /// Inline links in left-to-right order, then attachment URLs in attachment order.
    pub fn extract(&self, message: &Message) -> Vec<String> {
        let mut links: Vec<String> = self.inline_links(&message.content).collect();
        links.extend(message.attachments.iter().map(|a| a.url.clone()));
        links
    }

    /// Every non-overlapping URL match in `text`.
    pub fn inline_links<'a>(&'a self, text: &'a str) -> impl Iterator<Item = String> + 'a {
        self.url.find_iter(text).map(|m| m.as_str().to_string())
    }
}
