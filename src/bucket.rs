use std::sync::Arc;

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    prelude::*,
};
use rand::{Rng, seq::SliceRandom};

use crate::{
    batcher::{TranslationBatch, TranslationBatcher},
    dataset::TranslationDataset,
};

/// Yields padded batches of similar-length sentence pairs.
///
/// Shuffled iteration mirrors a bucket iterator: the dataset is shuffled, cut
/// into pools of `batch_size * pool_factor` items, each pool is sorted by
/// length and sliced into batches, and the batch order is shuffled. Without
/// shuffling everything is sorted by length once.
pub struct BucketIterator<B: Backend> {
    dataset: Arc<TranslationDataset>,
    batcher: TranslationBatcher,
    batch_size: usize,
    pool_factor: usize,
    shuffle: bool,
    device: B::Device,
}

impl<B: Backend> BucketIterator<B> {
    pub fn new(
        dataset: Arc<TranslationDataset>,
        batcher: TranslationBatcher,
        batch_size: usize,
        device: B::Device,
    ) -> Self {
        assert!(batch_size > 0, "batch_size must be positive");
        Self {
            dataset,
            batcher,
            batch_size,
            pool_factor: 100,
            shuffle: false,
            device,
        }
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_pool_factor(mut self, pool_factor: usize) -> Self {
        assert!(pool_factor > 0, "pool_factor must be positive");
        self.pool_factor = pool_factor;
        self
    }

    /// Dataset indices grouped into batches for one epoch.
    pub fn plan<R: Rng>(&self, rng: &mut R) -> Vec<Vec<usize>> {
        let mut indices = (0..self.dataset.len()).collect::<Vec<_>>();
        let by_length = |index: &usize| self.dataset.lengths(*index).unwrap_or_default();

        if !self.shuffle {
            indices.sort_by_key(by_length);
            return indices
                .chunks(self.batch_size)
                .map(<[usize]>::to_vec)
                .collect();
        }

        indices.shuffle(rng);
        let mut batches = Vec::new();
        for pool in indices.chunks_mut(self.batch_size * self.pool_factor) {
            pool.sort_by_key(by_length);
            batches.extend(pool.chunks(self.batch_size).map(<[usize]>::to_vec));
        }
        batches.shuffle(rng);
        batches
    }

    pub fn iter<R: Rng>(&self, rng: &mut R) -> BucketBatches<'_, B> {
        BucketBatches {
            source: self,
            plan: self.plan(rng).into_iter(),
        }
    }
}

/// One epoch of batches from a [`BucketIterator`].
pub struct BucketBatches<'a, B: Backend> {
    source: &'a BucketIterator<B>,
    plan: std::vec::IntoIter<Vec<usize>>,
}

impl<B: Backend> Iterator for BucketBatches<'_, B> {
    type Item = TranslationBatch<B>;

    fn next(&mut self) -> Option<Self::Item> {
        let indices = self.plan.next()?;
        let items = indices
            .into_iter()
            .filter_map(|index| self.source.dataset.get(index))
            .collect();
        Some(self.source.batcher.batch(items, &self.source.device))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.plan.size_hint()
    }
}
