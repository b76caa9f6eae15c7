use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Initializer, Lstm, LstmConfig, LstmState};
use burn::tensor::{Tensor, backend::Backend};

/// Multi-layer LSTM. Each layer consumes the full output sequence of the
/// layer below; dropout is applied between layers but not after the last one.
#[derive(Module, Debug)]
pub struct StackedLstm<B: Backend> {
    pub d_hidden: usize,
    layers: Vec<Lstm<B>>,
    dropout: Dropout,
}

impl<B: Backend> StackedLstm<B> {
    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    /// `input`: `[batch, seq_len, d_input]` -> `[batch, seq_len, d_hidden]`,
    /// plus the final hidden/cell state of every layer, bottom first.
    ///
    /// `states`, when given, must hold one state per layer.
    pub fn forward(
        &self,
        input: Tensor<B, 3>,
        states: Option<Vec<LstmState<B, 2>>>,
    ) -> (Tensor<B, 3>, Vec<LstmState<B, 2>>) {
        let states: Vec<Option<LstmState<B, 2>>> = match states {
            Some(states) => {
                assert_eq!(
                    states.len(),
                    self.layers.len(),
                    "expected one recurrent state per layer"
                );
                states.into_iter().map(Some).collect()
            }
            None => self.layers.iter().map(|_| None).collect(),
        };

        let last = self.layers.len() - 1;
        let mut x = input;
        let mut final_states = Vec::with_capacity(self.layers.len());
        for (i, (layer, state)) in self.layers.iter().zip(states).enumerate() {
            let (output, state) = layer.forward(x, state);
            final_states.push(state);
            x = if i < last {
                self.dropout.forward(output)
            } else {
                output
            };
        }

        (x, final_states)
    }
}

#[derive(Config, Debug)]
pub struct StackedLstmConfig {
    pub d_input: usize,
    pub d_hidden: usize,
    pub n_layers: usize,
    #[config(default = 0.0)]
    pub dropout: f64,
    #[config(default = "Initializer::XavierNormal{gain:1.0}")]
    pub initializer: Initializer,
}

impl StackedLstmConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> StackedLstm<B> {
        assert!(self.n_layers > 0, "an LSTM needs at least one layer");
        StackedLstm {
            d_hidden: self.d_hidden,
            layers: (0..self.n_layers)
                .map(|i| {
                    let d_input = if i == 0 { self.d_input } else { self.d_hidden };
                    LstmConfig::new(d_input, self.d_hidden, true)
                        .with_initializer(self.initializer.clone())
                        .init(device)
                })
                .collect(),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}
