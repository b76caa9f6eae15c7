use burn::config::Config;
use burn::module::Module;
use burn::nn::{
    Dropout, DropoutConfig, Embedding, EmbeddingConfig, Initializer, Linear, LinearConfig,
    LstmState,
};
use burn::tensor::activation::log_softmax;
use burn::tensor::{Int, Tensor, backend::Backend};
use rand::Rng;

use crate::rnn::{StackedLstm, StackedLstmConfig};
use crate::vocab::{EOS_ID, PAD_ID, SOS_ID};

/// Embeds the source sentence and summarizes it as the final LSTM state.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    embedding: Embedding<B>,
    rnn: StackedLstm<B>,
    dropout: Dropout,
}

impl<B: Backend> Encoder<B> {
    /// `src`: `[batch, src_len]` -> one hidden/cell state per layer, each `[batch, hid_dim]`.
    pub fn forward(&self, src: Tensor<B, 2, Int>) -> Vec<LstmState<B, 2>> {
        let embedded = self.dropout.forward(self.embedding.forward(src));
        let (_outputs, states) = self.rnn.forward(embedded, None);
        states
    }
}

#[derive(Config, Debug)]
pub struct EncoderConfig {
    pub vocab_size: usize,
    pub emb_dim: usize,
    pub hid_dim: usize,
    pub n_layers: usize,
    pub dropout: f64,
    #[config(default = 0.08)]
    pub init_range: f64,
}

impl EncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Encoder<B> {
        let initializer = uniform(self.init_range);
        Encoder {
            embedding: EmbeddingConfig::new(self.vocab_size, self.emb_dim)
                .with_initializer(initializer.clone())
                .init(device),
            rnn: StackedLstmConfig::new(self.emb_dim, self.hid_dim, self.n_layers)
                .with_dropout(self.dropout)
                .with_initializer(initializer)
                .init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// Advances the target side by one token.
#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    embedding: Embedding<B>,
    rnn: StackedLstm<B>,
    fc_out: Linear<B>,
    dropout: Dropout,
}

impl<B: Backend> Decoder<B> {
    /// `input`: `[batch]` token ids -> logits `[batch, vocab_size]` and the next states.
    pub fn forward(
        &self,
        input: Tensor<B, 1, Int>,
        states: Vec<LstmState<B, 2>>,
    ) -> (Tensor<B, 2>, Vec<LstmState<B, 2>>) {
        let [batch_size] = input.dims();

        let embedded = self
            .dropout
            .forward(self.embedding.forward(input.unsqueeze_dim::<2>(1)));
        let (output, states) = self.rnn.forward(embedded, Some(states));
        let output = output.reshape([batch_size, self.rnn.d_hidden]);

        (self.fc_out.forward(output), states)
    }
}

#[derive(Config, Debug)]
pub struct DecoderConfig {
    pub vocab_size: usize,
    pub emb_dim: usize,
    pub hid_dim: usize,
    pub n_layers: usize,
    pub dropout: f64,
    #[config(default = 0.08)]
    pub init_range: f64,
}

impl DecoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Decoder<B> {
        let initializer = uniform(self.init_range);
        Decoder {
            embedding: EmbeddingConfig::new(self.vocab_size, self.emb_dim)
                .with_initializer(initializer.clone())
                .init(device),
            rnn: StackedLstmConfig::new(self.emb_dim, self.hid_dim, self.n_layers)
                .with_dropout(self.dropout)
                .with_initializer(initializer.clone())
                .init(device),
            fc_out: LinearConfig::new(self.hid_dim, self.vocab_size)
                .with_initializer(initializer)
                .init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

fn uniform(range: f64) -> Initializer {
    Initializer::Uniform {
        min: -range,
        max: range,
    }
}

#[derive(Module, Debug)]
pub struct Seq2Seq<B: Backend> {
    encoder: Encoder<B>,
    decoder: Decoder<B>,
}

impl<B: Backend> Seq2Seq<B> {
    /// Decodes the whole target sequence, returning logits for positions
    /// `1..trg_len` as `[batch, trg_len - 1, trg_vocab]`.
    ///
    /// Step `t` is fed the ground truth `trg[:, t]` with probability
    /// `teacher_forcing_ratio`, otherwise the model's own argmax from step `t`.
    pub fn forward<R: Rng>(
        &self,
        src: Tensor<B, 2, Int>,
        trg: Tensor<B, 2, Int>,
        teacher_forcing_ratio: f64,
        rng: &mut R,
    ) -> Tensor<B, 3> {
        let [batch_size, trg_len] = trg.dims();
        assert!(trg_len > 1, "target needs <sos> and at least one more token");

        let mut states = self.encoder.forward(src);
        let mut input = trg.clone().slice([0..batch_size, 0..1]).reshape([batch_size]);

        let mut outputs = Vec::with_capacity(trg_len - 1);
        for t in 1..trg_len {
            let (logits, next_states) = self.decoder.forward(input, states);
            states = next_states;

            let teacher_force = rng.random::<f64>() < teacher_forcing_ratio;
            input = if teacher_force {
                trg.clone().slice([0..batch_size, t..t + 1]).reshape([batch_size])
            } else {
                logits.clone().argmax(1).reshape([batch_size])
            };

            outputs.push(logits.unsqueeze_dim::<3>(1));
        }

        Tensor::cat(outputs, 1)
    }

    /// Masked cross-entropy of predicting `trg[:, 1..]`.
    pub fn forward_loss<R: Rng>(
        &self,
        src: Tensor<B, 2, Int>,
        trg: Tensor<B, 2, Int>,
        teacher_forcing_ratio: f64,
        rng: &mut R,
    ) -> Tensor<B, 1> {
        let [batch_size, trg_len] = trg.dims();
        let logits = self.forward(src, trg.clone(), teacher_forcing_ratio, rng);
        let targets = trg.slice([0..batch_size, 1..trg_len]).flatten::<1>(0, 1);

        masked_cross_entropy(logits.flatten::<2>(0, 1), targets, PAD_ID)
    }

    /// Argmax decoding without a target. Each row stops at `<eos>` (not
    /// included) or after `max_len` tokens.
    pub fn greedy_decode(&self, src: Tensor<B, 2, Int>, max_len: usize) -> Vec<Vec<u32>> {
        let [batch_size, _] = src.dims();
        let device = src.device();

        let mut states = self.encoder.forward(src);
        let mut input = Tensor::<B, 1, Int>::full([batch_size], SOS_ID as i64, &device);

        let mut decoded = vec![Vec::new(); batch_size];
        let mut finished = vec![false; batch_size];
        for _ in 0..max_len {
            let (logits, next_states) = self.decoder.forward(input, states);
            states = next_states;

            let next = logits.argmax(1).reshape([batch_size]);
            for (row, id) in next.to_data().iter::<i64>().enumerate() {
                if finished[row] {
                    continue;
                }
                if id as u32 == EOS_ID {
                    finished[row] = true;
                } else {
                    decoded[row].push(id as u32);
                }
            }
            if finished.iter().all(|done| *done) {
                break;
            }
            input = next;
        }

        decoded
    }
}

#[derive(Config, Debug)]
pub struct Seq2SeqConfig {
    pub src_vocab_size: usize,
    pub trg_vocab_size: usize,
    #[config(default = 256)]
    pub enc_emb_dim: usize,
    #[config(default = 256)]
    pub dec_emb_dim: usize,
    #[config(default = 512)]
    pub hid_dim: usize,
    #[config(default = 2)]
    pub n_layers: usize,
    #[config(default = 0.5)]
    pub enc_dropout: f64,
    #[config(default = 0.5)]
    pub dec_dropout: f64,
    /// Every parameter starts uniform in `[-init_range, init_range]`.
    #[config(default = 0.08)]
    pub init_range: f64,
}

impl Seq2SeqConfig {
    /// Encoder and decoder share `hid_dim` and `n_layers` so the encoder's
    /// final state can seed the decoder directly.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Seq2Seq<B> {
        Seq2Seq {
            encoder: EncoderConfig::new(
                self.src_vocab_size,
                self.enc_emb_dim,
                self.hid_dim,
                self.n_layers,
                self.enc_dropout,
            )
            .with_init_range(self.init_range)
            .init(device),
            decoder: DecoderConfig::new(
                self.trg_vocab_size,
                self.dec_emb_dim,
                self.hid_dim,
                self.n_layers,
                self.dec_dropout,
            )
            .with_init_range(self.init_range)
            .init(device),
        }
    }
}

/// Mean negative log-likelihood over the targets that are not `pad_id`.
///
/// `logits`: `[n, classes]`, `targets`: `[n]`. Zero when every target is padding.
pub fn masked_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
    pad_id: u32,
) -> Tensor<B, 1> {
    let [n, _] = logits.dims();

    let mask = targets.clone().not_equal_elem(pad_id as i64).float();
    let log_probs = log_softmax(logits, 1)
        .gather(1, targets.reshape([n, 1]))
        .reshape([n]);
    let count = mask.clone().sum().clamp_min(1.0);

    log_probs.mul(mask).sum().neg().div(count)
}
