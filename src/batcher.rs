use burn::{data::dataloader::batcher::Batcher, prelude::*};

use crate::{dataset::TranslationItem, vocab::PAD_ID};

/// Right-pads sentence pairs to the longest source and target in the batch.
#[derive(Clone, Debug)]
pub struct TranslationBatcher {
    pub pad_id: u32,
}

impl Default for TranslationBatcher {
    fn default() -> Self {
        Self { pad_id: PAD_ID }
    }
}

#[derive(Clone, Debug)]
pub struct TranslationBatch<B: Backend> {
    /// `[batch, src_len]`
    pub src: Tensor<B, 2, Int>,
    /// `[batch, trg_len]`
    pub trg: Tensor<B, 2, Int>,
    pub src_lengths: Vec<usize>,
    pub trg_lengths: Vec<usize>,
}

impl TranslationBatcher {
    fn pad<B: Backend>(&self, rows: &[&[u32]], device: &B::Device) -> Tensor<B, 2, Int> {
        let max_len = rows.iter().map(|row| row.len()).max().unwrap_or(0);
        let mut flat = Vec::with_capacity(rows.len() * max_len);
        for row in rows {
            flat.extend(row.iter().map(|&id| id as i64));
            flat.extend(std::iter::repeat_n(self.pad_id as i64, max_len - row.len()));
        }
        Tensor::from_data(TensorData::new(flat, [rows.len(), max_len]), device)
    }
}

impl<B: Backend> Batcher<B, TranslationItem, TranslationBatch<B>> for TranslationBatcher {
    fn batch(&self, items: Vec<TranslationItem>, device: &B::Device) -> TranslationBatch<B> {
        let src_rows = items.iter().map(|item| item.src.as_slice()).collect::<Vec<_>>();
        let trg_rows = items.iter().map(|item| item.trg.as_slice()).collect::<Vec<_>>();

        TranslationBatch {
            src: self.pad(&src_rows, device),
            trg: self.pad(&trg_rows, device),
            src_lengths: src_rows.iter().map(|row| row.len()).collect(),
            trg_lengths: trg_rows.iter().map(|row| row.len()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    fn item(src: &[u32], trg: &[u32]) -> TranslationItem {
        TranslationItem {
            src: src.to_vec(),
            trg: trg.to_vec(),
        }
    }

    #[test]
    fn pads_to_longest_in_batch() {
        let device = Default::default();
        let batcher = TranslationBatcher::default();
        let batch: TranslationBatch<B> = batcher.batch(
            vec![item(&[2, 5, 3], &[2, 7, 8, 9, 3]), item(&[2, 6, 6, 6, 3], &[2, 3])],
            &device,
        );

        assert_eq!(batch.src.dims(), [2, 5]);
        assert_eq!(batch.trg.dims(), [2, 5]);
        assert_eq!(batch.src_lengths, vec![3, 5]);
        assert_eq!(batch.trg_lengths, vec![5, 2]);

        let src = batch.src.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(src, vec![2, 5, 3, 1, 1, 2, 6, 6, 6, 3]);
        let trg = batch.trg.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(trg, vec![2, 7, 8, 9, 3, 2, 3, 1, 1, 1]);
    }

    #[test]
    fn custom_pad_id() {
        let device = Default::default();
        let batcher = TranslationBatcher { pad_id: 0 };
        let batch: TranslationBatch<B> =
            batcher.batch(vec![item(&[4], &[4, 4]), item(&[4, 4], &[4])], &device);

        let src = batch.src.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(src, vec![4, 0, 4, 4]);
    }
}
