use lazy_static::lazy_static;
use regex::Regex;

use crate::dataset::DatasetConfig;

lazy_static! {
    static ref PUNCTUATION: Regex = Regex::new(r#"([,.:;?_!"()\']|--|\s)"#).unwrap();
}

pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<String>;
}

/// Splits on whitespace only. Punctuation stays attached to its word.
#[derive(Clone, Debug, Default)]
pub struct WhitespaceTokenizer {
    pub lowercase: bool,
}

impl WhitespaceTokenizer {
    pub fn new(lowercase: bool) -> Self {
        Self { lowercase }
    }
}

impl Tokenizer for WhitespaceTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.split_whitespace()
            .map(|token| normalize(token, self.lowercase))
            .collect()
    }
}

/// Splits on whitespace and emits punctuation marks as separate tokens.
#[derive(Clone, Debug, Default)]
pub struct PunctuationTokenizer {
    pub lowercase: bool,
}

impl PunctuationTokenizer {
    pub fn new(lowercase: bool) -> Self {
        Self { lowercase }
    }
}

impl Tokenizer for PunctuationTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let mut parts = Vec::new();

        let mut last_idx = 0;
        for cap in PUNCTUATION.find_iter(text) {
            parts.push(&text[last_idx..cap.start()]);
            parts.push(cap.as_str().trim());
            last_idx = cap.end();
        }
        parts.push(&text[last_idx..]);

        parts
            .into_iter()
            .filter(|s| !s.is_empty())
            .map(|s| normalize(s, self.lowercase))
            .collect()
    }
}

fn normalize(token: &str, lowercase: bool) -> String {
    if lowercase {
        token.to_lowercase()
    } else {
        token.to_string()
    }
}

/// Tokenizer described by a dataset config. Training and inference must agree on it.
pub fn tokenizer_for(config: &DatasetConfig) -> Box<dyn Tokenizer> {
    if config.split_punctuation {
        Box::new(PunctuationTokenizer::new(config.lowercase))
    } else {
        Box::new(WhitespaceTokenizer::new(config.lowercase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_split_keeps_punctuation() {
        let tokenizer = WhitespaceTokenizer::new(false);
        assert_eq!(
            tokenizer.tokenize("Zwei junge  Männer,\tdraußen.\n"),
            vec!["Zwei", "junge", "Männer,", "draußen."]
        );
    }

    #[test]
    fn whitespace_lowercases() {
        let tokenizer = WhitespaceTokenizer::new(true);
        assert_eq!(tokenizer.tokenize("Two Young MEN"), vec!["two", "young", "men"]);
    }

    #[test]
    fn blank_input_has_no_tokens() {
        assert!(WhitespaceTokenizer::new(true).tokenize("   \t \n").is_empty());
        assert!(PunctuationTokenizer::new(true).tokenize("").is_empty());
    }

    #[test]
    fn punctuation_becomes_tokens() {
        let tokenizer = PunctuationTokenizer::new(true);
        assert_eq!(
            tokenizer.tokenize("Hello, do you like tea?"),
            vec!["hello", ",", "do", "you", "like", "tea", "?"]
        );
        assert_eq!(tokenizer.tokenize("wait--now"), vec!["wait", "--", "now"]);
    }

    #[test]
    fn config_selects_tokenizer() {
        let config = DatasetConfig::new("data".into(), "de".into(), "en".into())
            .with_split_punctuation(true)
            .with_lowercase(false);
        let tokenizer = tokenizer_for(&config);
        assert_eq!(tokenizer.tokenize("A dog."), vec!["A", "dog", "."]);
    }
}
