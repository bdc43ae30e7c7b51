use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;
use tch::{Device, Tensor};

use reid_core::cfg::{Config, InputCfg};

use crate::market1501::{ImageItem, Market1501};
use crate::sampler::{shuffled_indices, RandomIdentitySampler};
use crate::transforms::{load_test_image, load_train_image};
use crate::DataError;

enum SamplerKind {
    Shuffle,
    Identity(RandomIdentitySampler),
}

/// Owns the training and test image lists and hands out tensor batches.
///
/// The test list is the query set followed by the gallery set; `num_query`
/// marks the split point for the evaluator.
pub struct DataBunch {
    train: Vec<ImageItem>,
    test: Vec<ImageItem>,
    num_query: usize,
    num_classes: i64,
    input: InputCfg,
    sampler: SamplerKind,
    ims_per_batch: usize,
    test_ims_per_batch: usize,
    device: Device,
}

impl DataBunch {
    pub fn num_classes(&self) -> i64 {
        self.num_classes
    }

    pub fn num_query(&self) -> usize {
        self.num_query
    }

    /// Full train batches per epoch; the trailing partial batch is dropped so
    /// P x K batches stay well-formed.
    pub fn batches_per_epoch(&self) -> usize {
        let epoch_len = match &self.sampler {
            SamplerKind::Shuffle => self.train.len(),
            SamplerKind::Identity(s) => s.epoch_len(),
        };
        epoch_len / self.ims_per_batch
    }

    /// One epoch of `(images, targets)` batches in a fresh sampling order.
    pub fn train_epoch(&self) -> TrainEpoch<'_> {
        let mut rng = StdRng::from_entropy();
        let order = match &self.sampler {
            SamplerKind::Shuffle => shuffled_indices(self.train.len(), &mut rng),
            SamplerKind::Identity(s) => s.sample(&mut rng),
        };
        TrainEpoch {
            bunch: self,
            order,
            cursor: 0,
            rng,
        }
    }

    /// Test batches over query followed by gallery, in stable order.
    pub fn test_batches(&self) -> TestBatches<'_> {
        TestBatches {
            bunch: self,
            cursor: 0,
        }
    }
}

pub struct TrainEpoch<'a> {
    bunch: &'a DataBunch,
    order: Vec<usize>,
    cursor: usize,
    rng: StdRng,
}

impl Iterator for TrainEpoch<'_> {
    type Item = Result<(Tensor, Tensor)>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch = self.bunch.ims_per_batch;
        if self.cursor + batch > self.order.len() {
            return None;
        }
        let indices = &self.order[self.cursor..self.cursor + batch];
        self.cursor += batch;

        let mut images = Vec::with_capacity(batch);
        let mut targets = Vec::with_capacity(batch);
        for &i in indices {
            let item = &self.bunch.train[i];
            match load_train_image(&item.path, &self.bunch.input, &mut self.rng) {
                Ok(t) => images.push(t),
                Err(e) => return Some(Err(e)),
            }
            targets.push(item.pid);
        }

        let images = Tensor::stack(&images, 0).to_device(self.bunch.device);
        let targets = Tensor::from_slice(&targets).to_device(self.bunch.device);
        Some(Ok((images, targets)))
    }
}

pub struct TestBatches<'a> {
    bunch: &'a DataBunch,
    cursor: usize,
}

impl Iterator for TestBatches<'_> {
    type Item = Result<Tensor>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.bunch.test.len() {
            return None;
        }
        let end = (self.cursor + self.bunch.test_ims_per_batch).min(self.bunch.test.len());
        let items = &self.bunch.test[self.cursor..end];
        self.cursor = end;

        let mut images = Vec::with_capacity(items.len());
        for item in items {
            match load_test_image(&item.path, &self.bunch.input) {
                Ok(t) => images.push(t),
                Err(e) => return Some(Err(e)),
            }
        }
        Some(Ok(Tensor::stack(&images, 0).to_device(self.bunch.device)))
    }
}

/// Assembles the dataset pipeline the trainer consumes.
///
/// Returns the bunch, the `(pid, camid)` labels of the test images in
/// iteration order, and the number of query images at the head of that list.
pub fn get_data_bunch(
    cfg: &Config,
    device: Device,
) -> Result<(DataBunch, Vec<(i64, i64)>, usize)> {
    if cfg.datasets.names != "market1501" {
        bail!(DataError::UnknownDataset(cfg.datasets.names.clone()));
    }
    let root = Path::new(&cfg.datasets.root_dir).join(&cfg.datasets.names);
    let ds = Market1501::load(&root)?;

    let num_query = ds.query.len();
    let mut test = ds.query;
    test.extend(ds.gallery);
    let test_labels: Vec<(i64, i64)> = test.iter().map(|it| (it.pid, it.camid)).collect();

    let sampler = match cfg.dataloader.sampler.as_str() {
        "softmax" => SamplerKind::Shuffle,
        "triplet" | "softmax_triplet" => SamplerKind::Identity(RandomIdentitySampler::new(
            &ds.train,
            cfg.dataloader.num_instance,
        )),
        other => bail!("unknown sampler: {}", other),
    };

    let bunch = DataBunch {
        train: ds.train,
        test,
        num_query,
        num_classes: ds.num_train_pids,
        input: cfg.input.clone(),
        sampler,
        ims_per_batch: cfg.solver.ims_per_batch,
        test_ims_per_batch: cfg.test.ims_per_batch,
        device,
    };

    Ok((bunch, test_labels, num_query))
}
