/// Text processing utilities
pub mod text {
    use regex::Regex;
    use std::sync::OnceLock;

    fn url_pattern() -> &'static Regex {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        PATTERN.get_or_init(|| Regex::new(r"https?://\S+").expect("static regex"))
    }

    /// Largest byte index <= `max_bytes` that sits on a char boundary.
    fn floor_char_boundary(text: &str, max_bytes: usize) -> usize {
        if max_bytes >= text.len() {
            return text.len();
        }
        let mut idx = max_bytes;
        while !text.is_char_boundary(idx) {
            idx -= 1;
        }
        idx
    }

    /// Truncate text to a maximum length, trying to break at sentence boundaries
    pub fn smart_truncate(text: &str, max_length: usize) -> String {
        if text.len() <= max_length {
            return text.to_string();
        }

        let truncated = &text[..floor_char_boundary(text, max_length)];
        if let Some(last_sentence) = truncated.rfind('.') {
            truncated[..last_sentence + 1].to_string()
        } else if let Some(last_space) = truncated.rfind(' ') {
            format!("{}...", &truncated[..last_space])
        } else {
            format!("{}...", truncated)
        }
    }

    /// Extract the first N sentences from text
    pub fn extract_sentences(text: &str, count: usize) -> String {
        let sentences: Vec<&str> = text
            .split(|c| c == '.' || c == '!' || c == '?')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .take(count)
            .collect();
        if sentences.is_empty() {
            String::new()
        } else {
            sentences.join(". ") + "."
        }
    }

    pub fn collapse_whitespace(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Drop inline URLs and collapse whitespace.
    pub fn clean_summary(text: &str) -> String {
        collapse_whitespace(&url_pattern().replace_all(text, " "))
    }

    /// Shorten text for log lines without splitting a character.
    pub fn preview(text: &str, max_chars: usize) -> String {
        match text.char_indices().nth(max_chars) {
            Some((idx, _)) => format!("{}...", &text[..idx]),
            None => text.to_string(),
        }
    }
}

/// URL utilities
pub mod url {
    use url::Url;

    /// Extract domain from URL
    pub fn extract_domain(url_str: &str) -> Option<String> {
        Url::parse(url_str).ok()?.host_str().map(|d| d.to_string())
    }

    /// Resolve a possibly relative href found on `base`.
    pub fn resolve_link(base: &str, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() || href.starts_with("javascript:") || href.starts_with('#') {
            return None;
        }
        let base = Url::parse(base).ok()?;
        let resolved = base.join(href).ok()?;
        match resolved.scheme() {
            "http" | "https" => Some(resolved.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smart_truncate_respects_multibyte_characters() {
        let text = "Operação no porto de São Luís ampliada. Movimentação recorde em março";
        let out = text::smart_truncate(text, 45);
        assert_eq!(out, "Operação no porto de São Luís ampliada.");

        let accents = "ãããããããããã";
        let out = text::smart_truncate(accents, 5);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn clean_summary_strips_links() {
        let out = text::clean_summary("Leia mais  em https://example.com/x?y=1 \n agora");
        assert_eq!(out, "Leia mais em agora");
    }

    #[test]
    fn resolve_link_handles_relative_and_rejects_scripts() {
        assert_eq!(
            url::resolve_link("https://www.portosenavios.com.br/noticias/", "/noticias/portos/abc").as_deref(),
            Some("https://www.portosenavios.com.br/noticias/portos/abc")
        );
        assert!(url::resolve_link("https://example.com/", "javascript:void(0)").is_none());
        assert_eq!(url::extract_domain("https://www.gov.br/antaq/rss.xml").as_deref(), Some("www.gov.br"));
    }

    #[test]
    fn extract_sentences_takes_first_n() {
        assert_eq!(text::extract_sentences("Um. Dois! Três? Quatro.", 2), "Um. Dois.");
        assert_eq!(text::extract_sentences("", 2), "");
    }
}
