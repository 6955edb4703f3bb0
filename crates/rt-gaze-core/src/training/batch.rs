//! Parallel mini-batch loading.

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use super::Augmenter;
use crate::ports::GazeDataset;
use crate::vision::patch_to_chw;

/// Loader settings.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Samples per batch; the last batch may be shorter.
    pub batch_size: usize,
    /// Side length of the network input.
    pub input_size: u32,
    /// Reshuffle the record order every epoch.
    pub shuffle: bool,
    /// Worker threads decoding and augmenting records.
    pub num_workers: usize,
    /// Base seed for shuffling and augmentation.
    pub seed: u64,
}

/// One mini-batch ready for the network.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Left eye patches `(N, 3, S, S)`.
    pub left: Tensor,
    /// Right eye patches `(N, 3, S, S)`.
    pub right: Tensor,
    /// Head poses `(N, 2)` in `[phi, theta]` order.
    pub head_pose: Tensor,
    /// Gaze labels `(N, 2)` in `[theta, phi]` order.
    pub gaze: Tensor,
    /// Number of samples.
    pub len: usize,
}

struct Prepared {
    left: Vec<f32>,
    right: Vec<f32>,
    head_pose: [f32; 2],
    gaze: [f32; 2],
}

/// Yields shuffled, optionally augmented batches of a dataset view.
///
/// Batches are assembled on a dedicated `rayon` pool. Shuffling and every
/// random augmentation draw derive from the seed and the epoch number, so a
/// run is reproducible regardless of the worker count.
pub struct BatchLoader {
    dataset: Box<dyn GazeDataset>,
    config: LoaderConfig,
    augmenter: Option<Augmenter>,
    pool: ThreadPool,
    device: Device,
}

impl BatchLoader {
    /// Creates a loader.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch size is zero or the worker pool cannot
    /// be created.
    pub fn new(
        dataset: Box<dyn GazeDataset>,
        config: LoaderConfig,
        augmenter: Option<Augmenter>,
        device: Device,
    ) -> Result<Self> {
        if config.batch_size == 0 {
            anyhow::bail!("batch size must be greater than 0");
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.num_workers.max(1))
            .thread_name(|i| format!("rt-gaze-io-{i}"))
            .build()
            .context("Failed to create loader thread pool")?;
        Ok(Self {
            dataset,
            config,
            augmenter,
            pool,
            device,
        })
    }

    /// Number of records.
    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.dataset.len()
    }

    /// Number of batches per epoch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.num_samples().div_ceil(self.config.batch_size)
    }

    /// Returns true if the loader yields no batches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subjects of the underlying view.
    #[must_use]
    pub fn subjects(&self) -> &[usize] {
        self.dataset.subjects()
    }

    /// Iterates the batches of one epoch.
    pub fn epoch(&self, epoch: usize) -> impl Iterator<Item = Result<Batch>> + '_ {
        let epoch_seed = (epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let mut rng = StdRng::seed_from_u64(self.config.seed ^ epoch_seed);
        let mut order: Vec<usize> = (0..self.num_samples()).collect();
        if self.config.shuffle {
            order.shuffle(&mut rng);
        }
        let jobs: Vec<(usize, u64)> = order.into_iter().map(|i| (i, rng.gen())).collect();
        debug!(
            "Epoch {epoch}: {} records in {} batches over subjects {:?}",
            jobs.len(),
            self.len(),
            self.subjects()
        );

        let batch_size = self.config.batch_size;
        (0..self.len()).map(move |b| {
            let start = b * batch_size;
            let end = (start + batch_size).min(jobs.len());
            self.load_batch(&jobs[start..end])
        })
    }

    fn load_batch(&self, jobs: &[(usize, u64)]) -> Result<Batch> {
        let prepared = self.pool.install(|| {
            jobs.par_iter()
                .map(|&(index, seed)| self.prepare(index, seed))
                .collect::<Result<Vec<_>>>()
        })?;

        let n = prepared.len();
        let s = self.config.input_size as usize;
        let mut left = Vec::with_capacity(n * 3 * s * s);
        let mut right = Vec::with_capacity(n * 3 * s * s);
        let mut head_pose = Vec::with_capacity(n * 2);
        let mut gaze = Vec::with_capacity(n * 2);
        for p in prepared {
            left.extend(p.left);
            right.extend(p.right);
            head_pose.extend(p.head_pose);
            gaze.extend(p.gaze);
        }

        Ok(Batch {
            left: Tensor::from_vec(left, (n, 3, s, s), &self.device)?,
            right: Tensor::from_vec(right, (n, 3, s, s), &self.device)?,
            head_pose: Tensor::from_vec(head_pose, (n, 2), &self.device)?,
            gaze: Tensor::from_vec(gaze, (n, 2), &self.device)?,
            len: n,
        })
    }

    fn prepare(&self, index: usize, seed: u64) -> Result<Prepared> {
        let sample = self
            .dataset
            .get(index)
            .with_context(|| format!("Failed to read record {index}"))?;
        let size = self.config.input_size;
        let (left, right) = match &self.augmenter {
            Some(aug) => {
                let mut rng = StdRng::seed_from_u64(seed);
                let left = aug.apply(&sample.left, &mut rng);
                let right = aug.apply(&sample.right, &mut rng);
                (patch_to_chw(&left, size), patch_to_chw(&right, size))
            }
            None => (patch_to_chw(&sample.left, size), patch_to_chw(&sample.right, size)),
        };
        Ok(Prepared {
            left,
            right,
            head_pose: sample.head_pose.to_array(),
            gaze: sample.gaze.to_array(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GazeAngles, GazeSample, HeadPose};
    use image::RgbImage;

    struct Synthetic {
        subjects: Vec<usize>,
        per_subject: usize,
    }

    impl GazeDataset for Synthetic {
        fn len(&self) -> usize {
            self.subjects.len() * self.per_subject
        }

        fn subjects(&self) -> &[usize] {
            &self.subjects
        }

        #[allow(clippy::cast_precision_loss)]
        fn get(&self, index: usize) -> Result<GazeSample> {
            let subject = self.subjects[index / self.per_subject];
            Ok(GazeSample {
                subject,
                left: RgbImage::new(12, 12),
                right: RgbImage::new(12, 12),
                head_pose: HeadPose::new(0.0, 0.0),
                gaze: GazeAngles::new(index as f32, subject as f32),
            })
        }
    }

    fn loader(shuffle: bool, batch_size: usize) -> BatchLoader {
        let dataset = Synthetic {
            subjects: vec![3, 5],
            per_subject: 5,
        };
        let config = LoaderConfig {
            batch_size,
            input_size: 8,
            shuffle,
            num_workers: 2,
            seed: 42,
        };
        BatchLoader::new(Box::new(dataset), config, None, Device::Cpu)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    fn labels(loader: &BatchLoader, epoch: usize) -> Vec<f32> {
        loader
            .epoch(epoch)
            .flat_map(|b| {
                let b = b.unwrap_or_else(|e| panic!("{e}"));
                b.gaze.to_vec2::<f32>().unwrap_or_else(|e| panic!("{e}"))
            })
            .map(|row| row[0])
            .collect()
    }

    #[test]
    fn test_batches_cover_every_record_once() {
        let loader = loader(true, 4);
        assert_eq!(loader.len(), 3);
        let mut seen = labels(&loader, 0);
        seen.sort_by(f32::total_cmp);
        assert_eq!(seen, (0..10).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn test_last_batch_is_short_and_shaped() {
        let loader = loader(false, 4);
        let batches: Vec<Batch> = loader
            .epoch(0)
            .map(|b| b.unwrap_or_else(|e| panic!("{e}")))
            .collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].len, 2);
        assert_eq!(batches[0].left.dims(), &[4, 3, 8, 8]);
        assert_eq!(batches[2].head_pose.dims(), &[2, 2]);
    }

    #[test]
    fn test_shuffle_is_seeded() {
        let loader = loader(true, 10);
        assert_eq!(labels(&loader, 1), labels(&loader, 1));
        assert_ne!(labels(&loader, 1), labels(&loader, 2));
    }

    #[test]
    fn test_only_requested_subjects() {
        let loader = loader(true, 3);
        assert_eq!(loader.subjects(), &[3, 5]);
        for batch in loader.epoch(0) {
            let batch = batch.unwrap_or_else(|e| panic!("{e}"));
            let rows = batch.gaze.to_vec2::<f32>().unwrap_or_else(|e| panic!("{e}"));
            assert!(rows
                .iter()
                .all(|r| (r[1] - 3.0).abs() < 1e-6 || (r[1] - 5.0).abs() < 1e-6));
        }
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let dataset = Synthetic {
            subjects: vec![0],
            per_subject: 1,
        };
        let config = LoaderConfig {
            batch_size: 0,
            input_size: 8,
            shuffle: false,
            num_workers: 1,
            seed: 0,
        };
        assert!(BatchLoader::new(Box::new(dataset), config, None, Device::Cpu).is_err());
    }
}
