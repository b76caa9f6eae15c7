pub mod artifacts;
mod backend;
pub mod batcher;
pub mod bucket;
pub mod dataset;
pub mod metrics;
pub mod rnn;
pub mod seq2seq;
pub mod tokenizer;
pub mod train;
pub mod translate;
pub mod vocab;

pub use backend::{InferenceBackend, TrainBackend};
