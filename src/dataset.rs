use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use burn::{config::Config, data::dataset::Dataset};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use crate::{tokenizer::Tokenizer, vocab::Vocab};

#[derive(Config, Debug)]
pub struct DatasetConfig {
    /// Directory holding the parallel text files.
    pub dir: String,
    /// Source language extension, e.g. `de` for `train.de`.
    pub src_ext: String,
    /// Target language extension, e.g. `en` for `train.en`.
    pub trg_ext: String,
    #[config(default = "String::from(\"train\")")]
    pub train_prefix: String,
    #[config(default = "String::from(\"val\")")]
    pub valid_prefix: String,
    #[config(default = "String::from(\"test\")")]
    pub test_prefix: String,
    /// Load a single corpus with this prefix and split it randomly instead.
    pub corpus: Option<String>,
    #[config(default = 0.1)]
    pub valid_ratio: f64,
    #[config(default = 0.1)]
    pub test_ratio: f64,
    #[config(default = 2)]
    pub min_freq: usize,
    pub max_vocab: Option<usize>,
    #[config(default = true)]
    pub lowercase: bool,
    #[config(default = false)]
    pub split_punctuation: bool,
    #[config(default = true)]
    pub reverse_source: bool,
    #[config(default = 1234)]
    pub seed: u64,
}

impl DatasetConfig {
    fn file(&self, prefix: &str, ext: &str) -> PathBuf {
        Path::new(&self.dir).join(format!("{prefix}.{ext}"))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TranslationExample {
    pub src: Vec<String>,
    pub trg: Vec<String>,
}

/// Reads two line-aligned files into tokenized sentence pairs.
///
/// Pairs where either side tokenizes to nothing are dropped.
pub fn load_parallel(
    src_path: &Path,
    trg_path: &Path,
    src_tokenizer: &dyn Tokenizer,
    trg_tokenizer: &dyn Tokenizer,
) -> Result<Vec<TranslationExample>> {
    let src_text = fs::read_to_string(src_path)
        .with_context(|| format!("Cannot read source file '{}'", src_path.display()))?;
    let trg_text = fs::read_to_string(trg_path)
        .with_context(|| format!("Cannot read target file '{}'", trg_path.display()))?;

    let src_lines = src_text.lines().collect::<Vec<_>>();
    let trg_lines = trg_text.lines().collect::<Vec<_>>();
    if src_lines.len() != trg_lines.len() {
        bail!(
            "'{}' has {} lines but '{}' has {}",
            src_path.display(),
            src_lines.len(),
            trg_path.display(),
            trg_lines.len()
        );
    }

    let mut examples = Vec::with_capacity(src_lines.len());
    for (src, trg) in src_lines.into_iter().zip(trg_lines) {
        let src = src_tokenizer.tokenize(src);
        let trg = trg_tokenizer.tokenize(trg);
        if src.is_empty() || trg.is_empty() {
            continue;
        }
        examples.push(TranslationExample { src, trg });
    }

    tracing::debug!(
        "Loaded {} pairs from '{}'",
        examples.len(),
        src_path.display()
    );
    Ok(examples)
}

#[derive(Clone, Debug)]
pub struct TranslationSplits {
    pub train: Vec<TranslationExample>,
    pub valid: Vec<TranslationExample>,
    pub test: Vec<TranslationExample>,
}

impl TranslationSplits {
    pub fn load(
        config: &DatasetConfig,
        src_tokenizer: &dyn Tokenizer,
        trg_tokenizer: &dyn Tokenizer,
    ) -> Result<Self> {
        let load = |prefix: &str| {
            load_parallel(
                &config.file(prefix, &config.src_ext),
                &config.file(prefix, &config.trg_ext),
                src_tokenizer,
                trg_tokenizer,
            )
        };

        let splits = match &config.corpus {
            Some(corpus) => Self::random_split(
                load(corpus.as_str())?,
                config.valid_ratio,
                config.test_ratio,
                config.seed,
            ),
            None => Self {
                train: load(config.train_prefix.as_str())?,
                valid: load(config.valid_prefix.as_str())?,
                test: load(config.test_prefix.as_str())?,
            },
        };

        tracing::info!(
            "Dataset split: {} train, {} valid, {} test",
            splits.train.len(),
            splits.valid.len(),
            splits.test.len()
        );
        Ok(splits)
    }

    /// Shuffles one corpus and cuts it into train, valid and test.
    pub fn random_split(
        mut examples: Vec<TranslationExample>,
        valid_ratio: f64,
        test_ratio: f64,
        seed: u64,
    ) -> Self {
        assert!(
            valid_ratio >= 0.0 && test_ratio >= 0.0 && valid_ratio + test_ratio <= 1.0,
            "split ratios must be non-negative and sum to at most 1"
        );

        let mut rng = StdRng::seed_from_u64(seed);
        examples.shuffle(&mut rng);

        let total = examples.len();
        let n_test = ((total as f64) * test_ratio).round() as usize;
        let n_valid = (((total as f64) * valid_ratio).round() as usize).min(total - n_test);

        let test = examples.split_off(total - n_test);
        let valid = examples.split_off(examples.len() - n_valid);
        Self {
            train: examples,
            valid,
            test,
        }
    }
}

/// A sentence pair as vocabulary ids, both sides wrapped in `<sos>`/`<eos>`.
#[derive(Clone, Debug, PartialEq)]
pub struct TranslationItem {
    pub src: Vec<u32>,
    pub trg: Vec<u32>,
}

/// Numericalizes source tokens, reversing them first when requested.
pub fn encode_source<S: AsRef<str>>(vocab: &Vocab, tokens: &[S], reverse: bool) -> Vec<u32> {
    if reverse {
        let reversed = tokens.iter().rev().map(AsRef::as_ref).collect::<Vec<_>>();
        vocab.encode(&reversed)
    } else {
        vocab.encode(tokens)
    }
}

pub struct TranslationDataset {
    items: Vec<TranslationItem>,
}

impl TranslationDataset {
    pub fn new(
        examples: &[TranslationExample],
        src_vocab: &Vocab,
        trg_vocab: &Vocab,
        reverse_source: bool,
    ) -> Self {
        let items = examples
            .iter()
            .map(|example| TranslationItem {
                src: encode_source(src_vocab, &example.src, reverse_source),
                trg: trg_vocab.encode(&example.trg),
            })
            .collect();
        Self { items }
    }

    pub fn from_items(items: Vec<TranslationItem>) -> Self {
        Self { items }
    }

    /// Source and target lengths of an item, used to bucket by size.
    pub fn lengths(&self, index: usize) -> Option<(usize, usize)> {
        self.items
            .get(index)
            .map(|item| (item.src.len(), item.trg.len()))
    }
}

impl Dataset<TranslationItem> for TranslationDataset {
    fn get(&self, index: usize) -> Option<TranslationItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Vocabularies built from the training split plus the three numericalized splits.
pub struct TranslationData {
    pub src_vocab: Vocab,
    pub trg_vocab: Vocab,
    pub train: TranslationDataset,
    pub valid: TranslationDataset,
    pub test: TranslationDataset,
}

impl TranslationData {
    pub fn new(splits: &TranslationSplits, config: &DatasetConfig) -> Self {
        let src_vocab = Vocab::build(
            splits.train.iter().map(|example| example.src.as_slice()),
            config.min_freq,
            config.max_vocab,
        );
        let trg_vocab = Vocab::build(
            splits.train.iter().map(|example| example.trg.as_slice()),
            config.min_freq,
            config.max_vocab,
        );
        tracing::info!(
            "Vocabulary sizes: {} source, {} target (min_freq={})",
            src_vocab.len(),
            trg_vocab.len(),
            config.min_freq
        );

        let numericalize = |examples: &[TranslationExample]| {
            TranslationDataset::new(examples, &src_vocab, &trg_vocab, config.reverse_source)
        };
        let train = numericalize(&splits.train);
        let valid = numericalize(&splits.valid);
        let test = numericalize(&splits.test);

        Self {
            src_vocab,
            trg_vocab,
            train,
            valid,
            test,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::WhitespaceTokenizer;
    use crate::vocab::{EOS_ID, SOS_ID, UNK_ID};

    fn example(src: &str, trg: &str) -> TranslationExample {
        let tokenizer = WhitespaceTokenizer::new(false);
        TranslationExample {
            src: tokenizer.tokenize(src),
            trg: tokenizer.tokenize(trg),
        }
    }

    fn write_pair(dir: &Path, prefix: &str, src: &str, trg: &str) {
        fs::write(dir.join(format!("{prefix}.de")), src).unwrap();
        fs::write(dir.join(format!("{prefix}.en")), trg).unwrap();
    }

    #[test]
    fn loads_aligned_lines_and_skips_blank_pairs() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(
            dir.path(),
            "train",
            "Ein Hund\n\nZwei Katzen\n",
            "A dog\nignored\nTwo cats\n",
        );
        let tokenizer = WhitespaceTokenizer::new(true);
        let examples = load_parallel(
            &dir.path().join("train.de"),
            &dir.path().join("train.en"),
            &tokenizer,
            &tokenizer,
        )
        .unwrap();

        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0], example("ein hund", "a dog"));
        assert_eq!(examples[1], example("zwei katzen", "two cats"));
    }

    #[test]
    fn mismatched_line_counts_are_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "train", "a\nb\n", "a\n");
        let tokenizer = WhitespaceTokenizer::new(true);
        let err = load_parallel(
            &dir.path().join("train.de"),
            &dir.path().join("train.en"),
            &tokenizer,
            &tokenizer,
        )
        .unwrap_err();
        assert!(err.to_string().contains("lines"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatasetConfig::new(
            dir.path().to_string_lossy().into_owned(),
            "de".into(),
            "en".into(),
        );
        let tokenizer = WhitespaceTokenizer::new(true);
        assert!(TranslationSplits::load(&config, &tokenizer, &tokenizer).is_err());
    }

    #[test]
    fn loads_three_split_files() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "train", "a\nb\nc\n", "x\ny\nz\n");
        write_pair(dir.path(), "val", "d\n", "w\n");
        write_pair(dir.path(), "test", "e\nf\n", "u\nv\n");
        let config = DatasetConfig::new(
            dir.path().to_string_lossy().into_owned(),
            "de".into(),
            "en".into(),
        );
        let tokenizer = WhitespaceTokenizer::new(true);
        let splits = TranslationSplits::load(&config, &tokenizer, &tokenizer).unwrap();

        assert_eq!(splits.train.len(), 3);
        assert_eq!(splits.valid, vec![example("d", "w")]);
        assert_eq!(splits.test.len(), 2);
    }

    #[test]
    fn random_split_preserves_every_example() {
        let examples = (0..100)
            .map(|i| example(&format!("s{i}"), &format!("t{i}")))
            .collect::<Vec<_>>();
        let splits = TranslationSplits::random_split(examples.clone(), 0.1, 0.2, 7);

        assert_eq!(splits.train.len(), 70);
        assert_eq!(splits.valid.len(), 10);
        assert_eq!(splits.test.len(), 20);

        let mut all = [splits.train, splits.valid, splits.test].concat();
        all.sort_by(|a, b| a.src.cmp(&b.src));
        let mut expected = examples;
        expected.sort_by(|a, b| a.src.cmp(&b.src));
        assert_eq!(all, expected);
    }

    #[test]
    fn random_split_is_seeded() {
        let examples = (0..20)
            .map(|i| example(&format!("s{i}"), &format!("t{i}")))
            .collect::<Vec<_>>();
        let a = TranslationSplits::random_split(examples.clone(), 0.25, 0.25, 3);
        let b = TranslationSplits::random_split(examples, 0.25, 0.25, 3);
        assert_eq!(a.test, b.test);
        assert_eq!(a.valid, b.valid);
    }

    #[test]
    fn random_split_of_empty_corpus() {
        let splits = TranslationSplits::random_split(Vec::new(), 0.1, 0.1, 0);
        assert!(splits.train.is_empty() && splits.valid.is_empty() && splits.test.is_empty());
    }

    #[test]
    fn dataset_numericalizes_and_reverses_source() {
        let examples = vec![example("ein hund", "a dog"), example("ein hund", "a dog")];
        let src_vocab = Vocab::build(examples.iter().map(|e| e.src.as_slice()), 1, None);
        let trg_vocab = Vocab::build(examples.iter().map(|e| e.trg.as_slice()), 1, None);

        let dataset = TranslationDataset::new(&examples, &src_vocab, &trg_vocab, true);
        let item = dataset.get(0).unwrap();
        let hund = src_vocab.id("hund");
        let ein = src_vocab.id("ein");
        assert_eq!(item.src, vec![SOS_ID, hund, ein, EOS_ID]);
        assert_eq!(item.trg, trg_vocab.encode(&["a", "dog"]));
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.lengths(1), Some((4, 4)));
        assert!(dataset.get(2).is_none());

        let forward = encode_source(&src_vocab, &["ein", "katze"], false);
        assert_eq!(forward, vec![SOS_ID, ein, UNK_ID, EOS_ID]);
    }

    #[test]
    fn vocabularies_come_from_training_split_only() {
        let splits = TranslationSplits {
            train: vec![example("ein hund", "a dog"), example("ein hund", "a dog")],
            valid: vec![example("eine katze", "a cat")],
            test: vec![example("ein vogel", "a bird")],
        };
        let config = DatasetConfig::new("data".into(), "de".into(), "en".into());
        let data = TranslationData::new(&splits, &config);

        assert_eq!(data.src_vocab.len(), 6);
        assert_eq!(data.trg_vocab.id("cat"), UNK_ID);
        assert_eq!(data.train.len(), 2);
        assert_eq!(data.valid.len(), 1);
        let test = data.test.get(0).unwrap();
        assert_eq!(test.trg, vec![SOS_ID, data.trg_vocab.id("a"), UNK_ID, EOS_ID]);
    }
}
