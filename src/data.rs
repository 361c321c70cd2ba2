//! Batch sources for the training loop.
use crate::error::{BdcnError, Result};
use crate::vision::dataset::{load_sample, PairEntry, SampleConfig};
use rand::seq::SliceRandom;
use rayon::prelude::*;
use tch::{Device, Kind, Tensor};

/// One pass over a dataset, yielding `(images, labels)` batches.
pub trait BatchSource {
    /// Number of complete batches in one pass.
    fn batches_per_epoch(&self) -> usize;

    /// Starts a new pass.
    fn reset(&mut self);

    /// Returns `None` once the current pass is exhausted.
    fn next_batch(&mut self) -> Result<Option<(Tensor, Tensor)>>;
}

/// Batches over a pair of in-memory tensors which have the same first dimension
/// size.
#[derive(Debug)]
pub struct TensorBatches {
    xs: Tensor,
    ys: Tensor,
    batch_index: i64,
    batch_size: i64,
    total_size: i64,
    shuffle: bool,
}

impl TensorBatches {
    pub fn new(xs: &Tensor, ys: &Tensor, batch_size: i64) -> Result<TensorBatches> {
        let total_size = xs.size()[0];
        if ys.size()[0] != total_size {
            return Err(BdcnError::Shape(format!(
                "different dimension for the two inputs {:?} {:?}",
                xs.size(),
                ys.size()
            )));
        }
        if batch_size <= 0 {
            return Err(BdcnError::Config(format!("invalid batch size {batch_size}")));
        }
        Ok(TensorBatches {
            xs: xs.shallow_clone(),
            ys: ys.shallow_clone(),
            batch_index: 0,
            batch_size,
            total_size,
            shuffle: false,
        })
    }

    /// Reshuffles the samples at the start of every pass.
    pub fn shuffle(mut self) -> TensorBatches {
        self.shuffle = true;
        self.reset();
        self
    }
}

impl BatchSource for TensorBatches {
    fn batches_per_epoch(&self) -> usize {
        (self.total_size / self.batch_size) as usize
    }

    fn reset(&mut self) {
        self.batch_index = 0;
        if self.shuffle {
            let index = Tensor::randperm(self.total_size, (Kind::Int64, self.xs.device()));
            self.xs = self.xs.index_select(0, &index);
            self.ys = self.ys.index_select(0, &index);
        }
    }

    fn next_batch(&mut self) -> Result<Option<(Tensor, Tensor)>> {
        let start = self.batch_index * self.batch_size;
        let size = std::cmp::min(self.batch_size, self.total_size - start);
        if size < self.batch_size {
            Ok(None)
        } else {
            self.batch_index += 1;
            Ok(Some((self.xs.narrow(0, start, size), self.ys.narrow(0, start, size))))
        }
    }
}

/// Decodes image and label files on the rayon thread pool, one batch at a time.
///
/// The entry order is shuffled at the start of every pass and the last incomplete
/// batch is dropped.
#[derive(Debug)]
pub struct EdgeLoader {
    entries: Vec<PairEntry>,
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
    shuffle: bool,
    cfg: SampleConfig,
}

impl EdgeLoader {
    pub fn new(
        entries: Vec<PairEntry>,
        cfg: SampleConfig,
        batch_size: usize,
        shuffle: bool,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(BdcnError::Config("batch size must be positive".to_string()));
        }
        if entries.len() < batch_size {
            return Err(BdcnError::EmptyDataset(format!(
                "{} entries, fewer than a batch of {batch_size}",
                entries.len()
            )));
        }
        if batch_size > 1 && cfg.crop_size.is_none() {
            tracing::warn!(
                "batch size {batch_size} without cropping requires equally sized images"
            );
        }
        let order = (0..entries.len()).collect();
        let mut loader = EdgeLoader { entries, order, cursor: 0, batch_size, shuffle, cfg };
        loader.reset();
        Ok(loader)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl BatchSource for EdgeLoader {
    fn batches_per_epoch(&self) -> usize {
        self.entries.len() / self.batch_size
    }

    fn reset(&mut self) {
        self.cursor = 0;
        if self.shuffle {
            self.order.shuffle(&mut rand::thread_rng());
        }
    }

    fn next_batch(&mut self) -> Result<Option<(Tensor, Tensor)>> {
        let end = self.cursor + self.batch_size;
        if end > self.order.len() {
            return Ok(None);
        }
        let slice = &self.order[self.cursor..end];
        self.cursor = end;
        let samples = slice
            .par_iter()
            .map(|&i| load_sample(&self.entries[i], &self.cfg))
            .collect::<Result<Vec<_>>>()?;
        let (images, labels): (Vec<_>, Vec<_>) = samples.into_iter().unzip();
        Ok(Some((Tensor::f_stack(&images, 0)?, Tensor::f_stack(&labels, 0)?)))
    }
}

/// Endless batches: a new pass starts whenever the current one is exhausted.
/// Batches are moved to `device`.
#[derive(Debug)]
pub struct Cycle<S> {
    source: S,
    device: Device,
    epoch: usize,
}

impl<S: BatchSource> Cycle<S> {
    pub fn new(source: S, device: Device) -> Self {
        Cycle { source, device, epoch: 0 }
    }

    /// Number of completed passes.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn batches_per_epoch(&self) -> usize {
        self.source.batches_per_epoch()
    }

    pub fn next_batch(&mut self) -> Result<(Tensor, Tensor)> {
        let batch = match self.source.next_batch()? {
            Some(batch) => batch,
            None => {
                self.epoch += 1;
                self.source.reset();
                self.source
                    .next_batch()?
                    .ok_or_else(|| {
                        BdcnError::EmptyDataset("not a single complete batch".to_string())
                    })?
            }
        };
        let (xs, ys) = batch;
        Ok((xs.to_device(self.device), ys.to_device(self.device)))
    }
}
