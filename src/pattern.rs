use regex::Regex;

/// Literal substring or regular expression matched against a line of text
#[derive(Debug, Clone)]
pub enum Pattern {
    Literal(String),
    Regex(Regex),
}

impl Pattern {
    pub fn new(pattern: &str, is_regex: bool) -> Result<Self, regex::Error> {
        if is_regex {
            Ok(Pattern::Regex(Regex::new(pattern)?))
        } else {
            Ok(Pattern::Literal(pattern.to_string()))
        }
    }

    /// Substring containment for literals, search for regexes
    pub fn is_match(&self, text: &str) -> bool {
        match self {
            Pattern::Literal(s) => text.contains(s.as_str()),
            Pattern::Regex(re) => re.is_match(text),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Pattern::Literal(s) => s,
            Pattern::Regex(re) => re.as_str(),
        }
    }
}
