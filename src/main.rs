use anyhow::{Result, ensure};
use burn::optim::AdamConfig;
use clap::{Args, Parser, Subcommand, builder::RangedU64ValueParser};

use seq2seq_burn::{
    InferenceBackend, TrainBackend,
    artifacts::ArtifactDir,
    dataset::{DatasetConfig, TranslationData, TranslationSplits},
    metrics::perplexity,
    seq2seq::Seq2SeqConfig,
    tokenizer::tokenizer_for,
    train::{TrainingConfig, evaluate_checkpoint, train},
    translate::Translator,
};

#[derive(Parser, Debug)]
#[command(
    name = "seq2seq",
    version,
    about = "Train and run an LSTM encoder-decoder translation model."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a model on a parallel corpus
    Train(TrainArgs),

    /// Report test loss and perplexity of a trained model
    Evaluate {
        /// Directory written by `train`
        #[arg(long, default_value = "artifacts")]
        artifact_dir: String,
    },

    /// Translate one sentence with a trained model
    Translate {
        /// Sentence in the source language
        sentence: String,

        /// Directory written by `train`
        #[arg(long, default_value = "artifacts")]
        artifact_dir: String,

        /// Maximum number of generated tokens
        #[arg(long, default_value_t = 50)]
        max_len: usize,
    },
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Directory holding `<prefix>.<ext>` files, one sentence per line
    #[arg(long, default_value = "data")]
    data_dir: String,

    /// Source language extension
    #[arg(long, default_value = "de")]
    src_ext: String,

    /// Target language extension
    #[arg(long, default_value = "en")]
    trg_ext: String,

    /// Split a single `<corpus>.<ext>` pair randomly instead of reading train/val/test files
    #[arg(long)]
    corpus: Option<String>,

    /// Share of the corpus held out for validation when splitting randomly
    #[arg(long, default_value_t = 0.1, value_parser = ratio)]
    valid_ratio: f64,

    /// Share of the corpus held out for testing when splitting randomly
    #[arg(long, default_value_t = 0.1, value_parser = ratio)]
    test_ratio: f64,

    /// Where the config, vocabularies, checkpoint and metrics are written
    #[arg(long, default_value = "artifacts")]
    artifact_dir: String,

    /// Tokens seen fewer times in the training split map to <unk>
    #[arg(long, default_value_t = 2)]
    min_freq: usize,

    /// Cap on vocabulary size, not counting special tokens
    #[arg(long)]
    max_vocab: Option<usize>,

    /// Keep the original casing
    #[arg(long)]
    keep_case: bool,

    /// Split punctuation into separate tokens
    #[arg(long)]
    split_punctuation: bool,

    /// Feed the source sentence in its original order
    #[arg(long)]
    no_reverse: bool,

    #[arg(long, default_value_t = 256)]
    enc_emb_dim: usize,

    #[arg(long, default_value_t = 256)]
    dec_emb_dim: usize,

    #[arg(long, default_value_t = 512)]
    hid_dim: usize,

    #[arg(long, default_value_t = 2, value_parser = positive())]
    n_layers: usize,

    #[arg(long, default_value_t = 0.5)]
    enc_dropout: f64,

    #[arg(long, default_value_t = 0.5)]
    dec_dropout: f64,

    #[arg(long, default_value_t = 10)]
    epochs: usize,

    #[arg(long, default_value_t = 128, value_parser = positive())]
    batch_size: usize,

    /// Batches per length-sorted pool when bucketing training data
    #[arg(long, default_value_t = 100, value_parser = positive())]
    pool_factor: usize,

    #[arg(long, default_value_t = 1e-3)]
    lr: f64,

    /// Probability of feeding the ground truth token to the decoder
    #[arg(long, default_value_t = 0.5, value_parser = ratio)]
    teacher_forcing_ratio: f64,

    /// Maximum gradient norm, 0 disables clipping
    #[arg(long, default_value_t = 1.0)]
    clip: f32,

    #[arg(long, default_value_t = 1234)]
    seed: u64,
}

fn positive() -> RangedU64ValueParser<usize> {
    RangedU64ValueParser::new().range(1..)
}

fn ratio(value: &str) -> Result<f64, String> {
    let ratio = value
        .parse::<f64>()
        .map_err(|err| format!("'{value}' is not a number: {err}"))?;
    if (0.0..=1.0).contains(&ratio) {
        Ok(ratio)
    } else {
        Err(format!("{ratio} is not between 0 and 1"))
    }
}

impl TrainArgs {
    fn dataset_config(&self) -> Result<DatasetConfig> {
        ensure!(
            self.valid_ratio + self.test_ratio <= 1.0,
            "--valid-ratio and --test-ratio add up to more than 1"
        );

        Ok(DatasetConfig::new(
            self.data_dir.clone(),
            self.src_ext.clone(),
            self.trg_ext.clone(),
        )
        .with_corpus(self.corpus.clone())
        .with_valid_ratio(self.valid_ratio)
        .with_test_ratio(self.test_ratio)
        .with_min_freq(self.min_freq)
        .with_max_vocab(self.max_vocab)
        .with_lowercase(!self.keep_case)
        .with_split_punctuation(self.split_punctuation)
        .with_reverse_source(!self.no_reverse)
        .with_seed(self.seed))
    }

    fn training_config(&self, data: &TranslationData) -> TrainingConfig {
        let model = Seq2SeqConfig::new(data.src_vocab.len(), data.trg_vocab.len())
            .with_enc_emb_dim(self.enc_emb_dim)
            .with_dec_emb_dim(self.dec_emb_dim)
            .with_hid_dim(self.hid_dim)
            .with_n_layers(self.n_layers)
            .with_enc_dropout(self.enc_dropout)
            .with_dec_dropout(self.dec_dropout);

        TrainingConfig::new(model, AdamConfig::new())
            .with_num_epochs(self.epochs)
            .with_batch_size(self.batch_size)
            .with_pool_factor(self.pool_factor)
            .with_learning_rate(self.lr)
            .with_teacher_forcing_ratio(self.teacher_forcing_ratio)
            .with_grad_clip(self.clip)
            .with_seed(self.seed)
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    let dataset_config = args.dataset_config()?;
    let artifacts = ArtifactDir::create(&args.artifact_dir)?;
    artifacts.save_dataset_config(&dataset_config)?;

    tracing::info!("Loading parallel corpus from '{}'", dataset_config.dir);
    let tokenizer = tokenizer_for(&dataset_config);
    let splits = TranslationSplits::load(&dataset_config, &*tokenizer, &*tokenizer)?;
    let data = TranslationData::new(&splits, &dataset_config);
    println!(
        "Unique tokens in source ({}) vocabulary: {}",
        dataset_config.src_ext,
        data.src_vocab.len()
    );
    println!(
        "Unique tokens in target ({}) vocabulary: {}",
        dataset_config.trg_ext,
        data.trg_vocab.len()
    );

    let config = args.training_config(&data);
    let summary = train::<TrainBackend>(&artifacts, data, config, Default::default())?;
    tracing::info!(
        "Best validation loss {:.3} at epoch {}",
        summary.best_valid_loss,
        summary.best_epoch
    );
    Ok(())
}

fn run_evaluate(artifact_dir: &str) -> Result<()> {
    let artifacts = ArtifactDir::new(artifact_dir);
    let loss = evaluate_checkpoint::<InferenceBackend>(&artifacts, Default::default())?;
    println!(
        "| Test Loss: {:.3} | Test PPL: {:7.3} |",
        loss,
        perplexity(loss)
    );
    Ok(())
}

fn run_translate(artifact_dir: &str, sentence: &str, max_len: usize) -> Result<()> {
    let artifacts = ArtifactDir::new(artifact_dir);
    let translator = Translator::<InferenceBackend>::load(&artifacts, Default::default())?;
    let tokens = translator.translate(sentence, max_len)?;
    println!("{}", tokens.join(" "));
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("seq2seq_burn=info".parse()?),
        )
        .init();

    match Cli::parse().command {
        Commands::Train(args) => run_train(args),
        Commands::Evaluate { artifact_dir } => run_evaluate(&artifact_dir),
        Commands::Translate {
            sentence,
            artifact_dir,
            max_len,
        } => run_translate(&artifact_dir, &sentence, max_len),
    }
}
