use std::sync::OnceLock;

use regex::Regex;

/// Leading keyword token extracted from AI output, plus the text after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKeyword {
    pub keyword: String,
    pub feedback: String,
}

/// Strategy for pulling a keyword out of free-text AI output.
///
/// Kept separate from the transition engine so the fuzzy text extraction
/// can be swapped without touching state-machine logic.
pub trait KeywordParser: Send + Sync + 'static {
    fn parse(&self, text: &str) -> Option<ParsedKeyword>;
}

/// Default parser: the first word of the output is the keyword.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeadingKeywordParser;

impl KeywordParser for LeadingKeywordParser {
    fn parse(&self, text: &str) -> Option<ParsedKeyword> {
        parse_keyword(text)
    }
}

fn leading_token() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*([A-Za-z][A-Za-z0-9_-]*)").expect("static regex"))
}

fn whole_token() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").expect("static regex"))
}

/// Whether `keyword` is a token [`parse_keyword`] can produce.
pub fn is_valid_keyword(keyword: &str) -> bool {
    whole_token().is_match(keyword)
}

/// Extract the leading keyword token.
///
/// `"PROCEED: looks good"` yields keyword `PROCEED` and feedback `looks good`.
/// Case is preserved; matching against declared keywords is the caller's job.
pub fn parse_keyword(text: &str) -> Option<ParsedKeyword> {
    let caps = leading_token().captures(text)?;
    let token = caps.get(1)?;
    let rest = text[token.end()..].trim_start();
    let rest = rest
        .strip_prefix(':')
        .or_else(|| rest.strip_prefix('-'))
        .unwrap_or(rest);

    Some(ParsedKeyword {
        keyword: token.as_str().to_string(),
        feedback: rest.trim().to_string(),
    })
}
