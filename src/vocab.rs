use std::collections::HashMap;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

pub const UNK_TOKEN: &str = "<unk>";
pub const PAD_TOKEN: &str = "<pad>";
pub const SOS_TOKEN: &str = "<sos>";
pub const EOS_TOKEN: &str = "<eos>";

pub const UNK_ID: u32 = 0;
pub const PAD_ID: u32 = 1;
pub const SOS_ID: u32 = 2;
pub const EOS_ID: u32 = 3;

/// Special tokens, in id order.
pub const SPECIAL_TOKENS: [&str; 4] = [UNK_TOKEN, PAD_TOKEN, SOS_TOKEN, EOS_TOKEN];

/// Token <-> id mapping for one language.
///
/// Persisted as the plain list of tokens in id order; the reverse index is
/// rebuilt on load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Vocab {
    itos: Vec<String>,
    stoi: HashMap<String, u32>,
}

impl Vocab {
    /// Builds a vocabulary from tokenized sentences.
    ///
    /// Tokens seen fewer than `min_freq` times map to `<unk>`. Remaining tokens
    /// are ordered by descending frequency, ties broken lexicographically, and
    /// capped at `max_size` entries on top of the special tokens.
    pub fn build<'a, I>(sentences: I, min_freq: usize, max_size: Option<usize>) -> Self
    where
        I: IntoIterator<Item = &'a [String]>,
    {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for sentence in sentences {
            for token in sentence {
                *counts.entry(token.as_str()).or_default() += 1;
            }
        }

        let mut frequent = counts
            .into_iter()
            .filter(|(token, count)| *count >= min_freq && !SPECIAL_TOKENS.contains(token))
            .collect::<Vec<_>>();
        frequent.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        if let Some(max_size) = max_size {
            frequent.truncate(max_size);
        }

        let itos = SPECIAL_TOKENS
            .iter()
            .copied()
            .chain(frequent.into_iter().map(|(token, _)| token))
            .map(str::to_string)
            .collect::<Vec<_>>();
        Self::from(itos)
    }

    pub fn len(&self) -> usize {
        self.itos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.itos.is_empty()
    }

    pub fn id(&self, token: &str) -> u32 {
        self.stoi.get(token).copied().unwrap_or(UNK_ID)
    }

    pub fn token(&self, id: u32) -> Option<&str> {
        self.itos.get(id as usize).map(String::as_str)
    }

    /// `<sos> ids.. <eos>`
    pub fn encode<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<u32> {
        let mut ids = Vec::with_capacity(tokens.len() + 2);
        ids.push(SOS_ID);
        ids.extend(tokens.iter().map(|token| self.id(token.as_ref())));
        ids.push(EOS_ID);
        ids
    }

    /// Maps ids back to tokens up to the first `<eos>`, dropping `<sos>` and `<pad>`.
    pub fn decode(&self, ids: &[u32]) -> Result<Vec<String>> {
        let mut tokens = Vec::new();
        for &id in ids {
            match id {
                EOS_ID => break,
                SOS_ID | PAD_ID => continue,
                _ => {
                    let token = self
                        .token(id)
                        .ok_or_else(|| anyhow!("id {id} not in vocab of size {}", self.len()))?;
                    tokens.push(token.to_string());
                }
            }
        }
        Ok(tokens)
    }
}

impl From<Vec<String>> for Vocab {
    fn from(itos: Vec<String>) -> Self {
        let stoi = itos
            .iter()
            .enumerate()
            .map(|(idx, token)| (token.clone(), idx as u32))
            .collect();
        Self { itos, stoi }
    }
}

impl From<Vocab> for Vec<String> {
    fn from(vocab: Vocab) -> Self {
        vocab.itos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentences(raw: &[&str]) -> Vec<Vec<String>> {
        raw.iter()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .collect()
    }

    fn build(raw: &[&str], min_freq: usize, max_size: Option<usize>) -> Vocab {
        let sentences = sentences(raw);
        Vocab::build(sentences.iter().map(Vec::as_slice), min_freq, max_size)
    }

    #[test]
    fn specials_have_fixed_ids() {
        let vocab = build(&[], 1, None);
        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.id("<unk>"), UNK_ID);
        assert_eq!(vocab.id("<pad>"), PAD_ID);
        assert_eq!(vocab.id("<sos>"), SOS_ID);
        assert_eq!(vocab.id("<eos>"), EOS_ID);
    }

    #[test]
    fn frequency_cutoff_and_order() {
        let vocab = build(&["a dog runs", "a dog sits", "a cat"], 2, None);
        assert_eq!(vocab.len(), 6);
        assert_eq!(vocab.token(4), Some("a"));
        assert_eq!(vocab.token(5), Some("dog"));
        assert_eq!(vocab.id("cat"), UNK_ID);
        assert_eq!(vocab.id("never-seen"), UNK_ID);
    }

    #[test]
    fn ties_break_lexicographically() {
        let vocab = build(&["b a c", "c b a"], 1, None);
        assert_eq!(vocab.token(4), Some("a"));
        assert_eq!(vocab.token(5), Some("b"));
        assert_eq!(vocab.token(6), Some("c"));
    }

    #[test]
    fn max_size_caps_regular_tokens() {
        let vocab = build(&["x x x y y z"], 1, Some(2));
        assert_eq!(vocab.len(), 6);
        assert_eq!(vocab.id("z"), UNK_ID);
    }

    #[test]
    fn special_tokens_in_text_are_not_duplicated() {
        let vocab = build(&["<pad> <unk> word"], 1, None);
        assert_eq!(vocab.len(), 5);
        assert_eq!(vocab.id("<pad>"), PAD_ID);
    }

    #[test]
    fn ids_round_trip_through_tokens() {
        let vocab = build(&["the quick brown fox", "the lazy dog"], 1, None);
        for id in 0..vocab.len() as u32 {
            assert_eq!(vocab.id(vocab.token(id).unwrap()), id);
        }
    }

    #[test]
    fn encode_wraps_with_sos_and_eos() {
        let vocab = build(&["a dog", "a dog"], 2, None);
        let ids = vocab.encode(&["a", "cat", "dog"]);
        assert_eq!(ids, vec![SOS_ID, 4, UNK_ID, 5, EOS_ID]);
    }

    #[test]
    fn decode_stops_at_eos() {
        let vocab = build(&["a dog", "a dog"], 2, None);
        let tokens = vocab.decode(&[SOS_ID, 4, PAD_ID, 5, EOS_ID, 4]).unwrap();
        assert_eq!(tokens, vec!["a", "dog"]);
        assert!(vocab.decode(&[99]).is_err());
    }

    #[test]
    fn json_is_a_token_list() {
        let vocab = build(&["hallo welt"], 1, None);
        let json = serde_json::to_string(&vocab).unwrap();
        assert_eq!(json, r#"["<unk>","<pad>","<sos>","<eos>","hallo","welt"]"#);
        let restored: Vocab = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, vocab);
        assert_eq!(restored.id("welt"), 5);
    }
}
