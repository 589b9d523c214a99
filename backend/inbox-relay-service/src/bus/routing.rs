use std::fmt;

/// Topic-style binding pattern over dot-separated routing keys.
///
/// `*` matches exactly one word, `#` matches zero or more words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingPattern {
    raw: String,
    words: Vec<String>,
}

impl RoutingPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        let raw = pattern.into();
        let words = raw.split('.').map(str::to_string).collect();
        Self { raw, words }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, routing_key: &str) -> bool {
        let key: Vec<&str> = routing_key.split('.').collect();
        match_words(&self.words, &key)
    }
}

fn match_words(pattern: &[String], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((head, rest)) if head == "#" => {
            // try every possible number of swallowed words
            (0..=key.len()).any(|skip| match_words(rest, &key[skip..]))
        }
        Some((head, rest)) => match key.split_first() {
            Some((word, key_rest)) if head == "*" || head == word => match_words(rest, key_rest),
            _ => false,
        },
    }
}

impl fmt::Display for RoutingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
