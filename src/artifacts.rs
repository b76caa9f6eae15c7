use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use burn::{config::Config, module::Module, record::CompactRecorder, tensor::backend::Backend};

use crate::{
    dataset::DatasetConfig,
    seq2seq::{Seq2Seq, Seq2SeqConfig},
    train::TrainingConfig,
    vocab::Vocab,
};

/// Everything a training run leaves behind, and everything inference needs:
///
/// ```text
/// artifacts/
///   training.json   model + optimization config
///   dataset.json    tokenization and numericalization settings
///   src_vocab.json
///   trg_vocab.json
///   model.mpk       weights with the best validation loss
///   metrics.csv     one row per epoch
/// ```
#[derive(Clone, Debug)]
pub struct ArtifactDir {
    root: PathBuf,
}

impl ArtifactDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let dir = Self::new(root);
        fs::create_dir_all(&dir.root)
            .with_context(|| format!("Cannot create '{}'", dir.root.display()))?;
        Ok(dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.root.join("metrics.csv")
    }

    fn model_path(&self) -> PathBuf {
        self.root.join("model")
    }

    pub fn has_model(&self) -> bool {
        self.root.join("model.mpk").exists()
    }

    pub fn save_training_config(&self, config: &TrainingConfig) -> Result<()> {
        save_config(config, &self.root.join("training.json"))
    }

    pub fn load_training_config(&self) -> Result<TrainingConfig> {
        load_config(&self.root.join("training.json"))
    }

    pub fn save_dataset_config(&self, config: &DatasetConfig) -> Result<()> {
        save_config(config, &self.root.join("dataset.json"))
    }

    pub fn load_dataset_config(&self) -> Result<DatasetConfig> {
        load_config(&self.root.join("dataset.json"))
    }

    pub fn save_vocabs(&self, src: &Vocab, trg: &Vocab) -> Result<()> {
        for (name, vocab) in [("src_vocab.json", src), ("trg_vocab.json", trg)] {
            let path = self.root.join(name);
            fs::write(&path, serde_json::to_string(vocab)?)
                .with_context(|| format!("Cannot write '{}'", path.display()))?;
        }
        Ok(())
    }

    /// `(source, target)` vocabularies.
    pub fn load_vocabs(&self) -> Result<(Vocab, Vocab)> {
        let load = |name: &str| -> Result<Vocab> {
            let path = self.root.join(name);
            let json = fs::read_to_string(&path).with_context(|| {
                format!(
                    "Cannot read '{}'. Has a model been trained here?",
                    path.display()
                )
            })?;
            serde_json::from_str(&json).with_context(|| format!("Invalid vocab '{}'", path.display()))
        };
        Ok((load("src_vocab.json")?, load("trg_vocab.json")?))
    }

    pub fn save_model<B: Backend>(&self, model: &Seq2Seq<B>) -> Result<()> {
        let path = self.model_path();
        model
            .clone()
            .save_file(path.clone(), &CompactRecorder::new())
            .map_err(|err| anyhow!("Cannot save model to '{}': {err:?}", path.display()))?;
        tracing::debug!("Saved model to '{}'", path.display());
        Ok(())
    }

    pub fn load_model<B: Backend>(
        &self,
        config: &Seq2SeqConfig,
        device: &B::Device,
    ) -> Result<Seq2Seq<B>> {
        let path = self.model_path();
        config
            .init::<B>(device)
            .load_file(path.clone(), &CompactRecorder::new(), device)
            .map_err(|err| anyhow!("Cannot load model from '{}': {err:?}", path.display()))
    }
}

fn save_config<C: Config>(config: &C, path: &Path) -> Result<()> {
    config
        .save(path)
        .with_context(|| format!("Cannot write config '{}'", path.display()))
}

fn load_config<C: Config>(path: &Path) -> Result<C> {
    C::load(path).map_err(|err| anyhow!("Cannot read config '{}': {err:?}", path.display()))
}
