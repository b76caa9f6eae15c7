use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use burn::{
    data::dataset::Dataset,
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    artifacts::ArtifactDir,
    batcher::{TranslationBatch, TranslationBatcher},
    bucket::BucketIterator,
    dataset::{TranslationData, TranslationDataset, TranslationSplits},
    metrics::{EpochMetrics, MetricsLogger, epoch_time, perplexity},
    seq2seq::{Seq2Seq, Seq2SeqConfig},
    tokenizer::tokenizer_for,
};

#[derive(Config)]
pub struct TrainingConfig {
    pub model: Seq2SeqConfig,
    pub optimizer: AdamConfig,
    #[config(default = 10)]
    pub num_epochs: usize,
    #[config(default = 128)]
    pub batch_size: usize,
    /// Batches per length-sorted pool when bucketing training data.
    #[config(default = 100)]
    pub pool_factor: usize,
    #[config(default = 0.5)]
    pub teacher_forcing_ratio: f64,
    /// Maximum L2 norm of all gradients taken together; zero disables clipping.
    #[config(default = 1.0)]
    pub grad_clip: f32,
    #[config(default = 0.001)]
    pub learning_rate: f64,
    #[config(default = 1234)]
    pub seed: u64,
}

#[derive(Clone, Debug)]
pub struct TrainingSummary {
    pub epochs: Vec<EpochMetrics>,
    pub best_epoch: usize,
    pub best_valid_loss: f64,
    pub test_loss: f64,
}

impl TrainingSummary {
    pub fn test_ppl(&self) -> f64 {
        perplexity(self.test_loss)
    }
}

/// Sums the squared gradient entries of every float parameter of a module.
struct SquaredGradNorm<'a, B: AutodiffBackend> {
    grads: &'a GradientsParams,
    sum: Option<Tensor<B::InnerBackend, 1>>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for SquaredGradNorm<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) else {
            return;
        };
        let squared = grad.powi_scalar(2).sum();
        self.sum = Some(match self.sum.take() {
            Some(sum) => sum + squared,
            None => squared,
        });
    }
}

struct ScaleGrads<'a, B: AutodiffBackend> {
    grads: &'a mut GradientsParams,
    scale: f64,
    backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for ScaleGrads<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads
                .register::<B::InnerBackend, D>(id, grad.mul_scalar(self.scale));
        }
    }
}

/// Rescales all gradients of `module` together so that their combined L2 norm
/// is at most `max_norm`. Returns the norm before clipping.
pub fn clip_grad_norm<B, M>(module: &M, grads: &mut GradientsParams, max_norm: f64) -> f64
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut norm = SquaredGradNorm::<B> {
        grads: &*grads,
        sum: None,
    };
    module.visit(&mut norm);
    let total = norm
        .sum
        .map(|sum| sum.into_scalar().elem::<f64>().sqrt())
        .unwrap_or(0.0);

    if total > max_norm {
        let mut scale = ScaleGrads::<B> {
            grads,
            scale: max_norm / total,
            backend: PhantomData,
        };
        module.visit(&mut scale);
    }
    total
}

fn mean(sum: f64, count: usize) -> f64 {
    if count > 0 {
        sum / count as f64
    } else {
        f64::NAN
    }
}

/// One pass over `batches` with teacher forcing. Returns the updated model and
/// the mean batch loss.
///
/// With `max_grad_norm`, gradients are clipped by their global norm before each step.
pub fn train_epoch<B, O, I, R>(
    mut model: Seq2Seq<B>,
    optim: &mut O,
    batches: I,
    learning_rate: f64,
    teacher_forcing_ratio: f64,
    max_grad_norm: Option<f64>,
    rng: &mut R,
) -> (Seq2Seq<B>, f64)
where
    B: AutodiffBackend,
    O: Optimizer<Seq2Seq<B>, B>,
    I: IntoIterator<Item = TranslationBatch<B>>,
    R: Rng,
{
    let mut loss_sum = 0.0;
    let mut num_batches = 0;

    for batch in batches {
        let loss = model.forward_loss(batch.src, batch.trg, teacher_forcing_ratio, rng);
        loss_sum += loss.clone().into_scalar().elem::<f64>();
        num_batches += 1;

        let grads = loss.backward();
        let mut grads = GradientsParams::from_grads(grads, &model);
        if let Some(max_norm) = max_grad_norm {
            clip_grad_norm::<B, _>(&model, &mut grads, max_norm);
        }
        model = optim.step(learning_rate, model, grads);
    }

    (model, mean(loss_sum, num_batches))
}

/// Mean batch loss with teacher forcing off. Pass a model without autodiff,
/// e.g. from `model.valid()`.
pub fn evaluate<B, I>(model: &Seq2Seq<B>, batches: I) -> f64
where
    B: Backend,
    I: IntoIterator<Item = TranslationBatch<B>>,
{
    // Never consulted with a ratio of zero.
    let mut rng = StdRng::seed_from_u64(0);
    let mut loss_sum = 0.0;
    let mut num_batches = 0;

    for batch in batches {
        let loss = model.forward_loss(batch.src, batch.trg, 0.0, &mut rng);
        loss_sum += loss.into_scalar().elem::<f64>();
        num_batches += 1;
    }

    mean(loss_sum, num_batches)
}

fn eval_iterator<B: Backend>(
    dataset: TranslationDataset,
    batch_size: usize,
    device: &B::Device,
) -> BucketIterator<B> {
    BucketIterator::new(
        Arc::new(dataset),
        TranslationBatcher::default(),
        batch_size,
        device.clone(),
    )
}

/// Trains for `config.num_epochs`, keeping the weights with the lowest
/// validation loss in `artifacts`, then scores that checkpoint on the test split.
pub fn train<B: AutodiffBackend>(
    artifacts: &ArtifactDir,
    data: TranslationData,
    config: TrainingConfig,
    device: B::Device,
) -> Result<TrainingSummary> {
    artifacts.save_training_config(&config)?;
    artifacts.save_vocabs(&data.src_vocab, &data.trg_vocab)?;

    B::seed(config.seed);
    let mut rng = StdRng::seed_from_u64(config.seed);

    println!("Train dataset size: {}", data.train.len());
    println!("Valid dataset size: {}", data.valid.len());
    println!("Test dataset size: {}", data.test.len());

    let train_batches = BucketIterator::<B>::new(
        Arc::new(data.train),
        TranslationBatcher::default(),
        config.batch_size,
        device.clone(),
    )
    .with_shuffle(true)
    .with_pool_factor(config.pool_factor);
    let valid_batches = eval_iterator::<B::InnerBackend>(data.valid, config.batch_size, &device);
    let test_batches = eval_iterator::<B::InnerBackend>(data.test, config.batch_size, &device);

    let mut model = config.model.init::<B>(&device);
    tracing::info!("The model has {} trainable parameters", model.num_params());

    let max_grad_norm = (config.grad_clip > 0.0).then_some(config.grad_clip as f64);
    let mut optim = config.optimizer.init::<B, Seq2Seq<B>>();

    let logger = MetricsLogger::new(artifacts.metrics_path())?;
    let mut history = Vec::with_capacity(config.num_epochs);
    let mut best: Option<(usize, f64)> = None;

    for epoch in 1..=config.num_epochs {
        let start = Instant::now();

        let (trained, train_loss) = train_epoch(
            model,
            &mut optim,
            train_batches.iter(&mut rng),
            config.learning_rate,
            config.teacher_forcing_ratio,
            max_grad_norm,
            &mut rng,
        );
        model = trained;
        let valid_loss = evaluate(&model.valid(), valid_batches.iter(&mut rng));

        let metrics = EpochMetrics {
            epoch,
            train_loss,
            valid_loss,
            elapsed: start.elapsed(),
        };

        let improved = match best {
            Some((_, best_loss)) => metrics.is_improvement(best_loss),
            None => true,
        };
        if improved {
            artifacts.save_model(&model)?;
            best = Some((epoch, valid_loss));
            tracing::info!("Epoch {epoch}: best validation loss so far, checkpoint saved");
        }

        let (mins, secs) = epoch_time(metrics.elapsed);
        println!("Epoch: {epoch:02} | Time: {mins}m {secs}s");
        println!(
            "\tTrain Loss: {:.3} | Train PPL: {:7.3}",
            metrics.train_loss,
            metrics.train_ppl()
        );
        println!(
            "\t Val. Loss: {:.3} |  Val. PPL: {:7.3}",
            metrics.valid_loss,
            metrics.valid_ppl()
        );

        logger.log(&metrics)?;
        history.push(metrics);
    }

    let (best_epoch, best_valid_loss) = best.unwrap_or((0, f64::NAN));
    let best_model = if best_epoch > 0 {
        artifacts.load_model::<B::InnerBackend>(&config.model, &device)?
    } else {
        model.valid()
    };
    let test_loss = evaluate(&best_model, test_batches.iter(&mut rng));
    println!(
        "| Test Loss: {:.3} | Test PPL: {:7.3} |",
        test_loss,
        perplexity(test_loss)
    );

    Ok(TrainingSummary {
        epochs: history,
        best_epoch,
        best_valid_loss,
        test_loss,
    })
}

/// Test-split loss of the checkpoint stored in `artifacts`.
pub fn evaluate_checkpoint<B: Backend>(
    artifacts: &ArtifactDir,
    device: B::Device,
) -> Result<f64> {
    let training = artifacts.load_training_config()?;
    let dataset_config = artifacts.load_dataset_config()?;
    let (src_vocab, trg_vocab) = artifacts.load_vocabs()?;

    let tokenizer = tokenizer_for(&dataset_config);
    let splits = TranslationSplits::load(&dataset_config, &*tokenizer, &*tokenizer)?;
    let test = TranslationDataset::new(
        &splits.test,
        &src_vocab,
        &trg_vocab,
        dataset_config.reverse_source,
    );

    let model = artifacts.load_model::<B>(&training.model, &device)?;
    let batches = eval_iterator::<B>(test, training.batch_size, &device);
    let mut rng = StdRng::seed_from_u64(training.seed);
    Ok(evaluate(&model, batches.iter(&mut rng)))
}
