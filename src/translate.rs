use anyhow::Result;
use burn::prelude::*;

use crate::{
    artifacts::ArtifactDir,
    dataset::{DatasetConfig, encode_source},
    seq2seq::Seq2Seq,
    tokenizer::{Tokenizer, tokenizer_for},
    vocab::Vocab,
};

/// A trained model together with the vocabularies and tokenizer it was trained with.
pub struct Translator<B: Backend> {
    model: Seq2Seq<B>,
    src_vocab: Vocab,
    trg_vocab: Vocab,
    tokenizer: Box<dyn Tokenizer>,
    reverse_source: bool,
    device: B::Device,
}

impl<B: Backend> Translator<B> {
    pub fn new(
        model: Seq2Seq<B>,
        src_vocab: Vocab,
        trg_vocab: Vocab,
        dataset_config: &DatasetConfig,
        device: B::Device,
    ) -> Self {
        Self {
            model,
            src_vocab,
            trg_vocab,
            tokenizer: tokenizer_for(dataset_config),
            reverse_source: dataset_config.reverse_source,
            device,
        }
    }

    pub fn load(artifacts: &ArtifactDir, device: B::Device) -> Result<Self> {
        let training = artifacts.load_training_config()?;
        let dataset_config = artifacts.load_dataset_config()?;
        let (src_vocab, trg_vocab) = artifacts.load_vocabs()?;
        let model = artifacts.load_model::<B>(&training.model, &device)?;
        tracing::info!(
            "Loaded translator from '{}' ({} -> {})",
            artifacts.root().display(),
            dataset_config.src_ext,
            dataset_config.trg_ext
        );

        Ok(Self::new(
            model,
            src_vocab,
            trg_vocab,
            &dataset_config,
            device,
        ))
    }

    /// Greedy translation of one raw sentence into at most `max_len` target tokens.
    pub fn translate(&self, sentence: &str, max_len: usize) -> Result<Vec<String>> {
        let tokens = self.tokenizer.tokenize(sentence);
        let ids = encode_source(&self.src_vocab, &tokens, self.reverse_source)
            .into_iter()
            .map(i64::from)
            .collect::<Vec<_>>();
        let len = ids.len();
        let src = Tensor::<B, 2, Int>::from_data(TensorData::new(ids, [1, len]), &self.device);

        let decoded = self
            .model
            .greedy_decode(src, max_len)
            .pop()
            .unwrap_or_default();
        self.trg_vocab.decode(&decoded)
    }
}
