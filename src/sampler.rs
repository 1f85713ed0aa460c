use crate::parse::RoiIndex;
use crate::process::CrossotopeError;

use itertools::Itertools;
use log::info;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

/// One ratio bucket chosen for analysis and the replicate drawn for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleDraw {
    pub nrh: u32,
    pub ix: u32,
}

/// Draws ratio buckets without replacement and replicates with replacement.
pub struct Sampler<R: Rng = StdRng> {
    rng: R,
}

impl Sampler<StdRng> {
    pub fn seeded(seed: u64) -> Self {
        Sampler {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Uses `seed` when given, otherwise picks one. The seed in use is logged
    /// so the same draw can be repeated with `--seed`.
    pub fn from_option(seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(rand::random);
        info!("Sampling seed: {}", seed);
        Sampler::seeded(seed)
    }
}

impl<R: Rng> Sampler<R> {
    pub fn with_rng(rng: R) -> Self {
        Sampler { rng }
    }

    /// Draws from an index whose numbering matches what [`draw_counts`]
    /// produces, so every draw resolves to files on disk.
    ///
    /// [`draw_counts`]: Sampler::draw_counts
    pub fn draw(&mut self, roi_index: &RoiIndex, n: usize) -> Result<Vec<SampleDraw>, CrossotopeError> {
        check_numbering(roi_index)?;
        self.draw_counts(roi_index.bucket_count(), roi_index.replicate_count(), n)
    }

    /// Picks `n` distinct buckets from `1..bucket_count`, sorted ascending,
    /// each paired with a replicate from `1..=replicate_count`. Requires
    /// `1 <= n < bucket_count`.
    pub fn draw_counts(
        &mut self,
        bucket_count: usize,
        replicate_count: usize,
        n: usize,
    ) -> Result<Vec<SampleDraw>, CrossotopeError> {
        if n == 0 || n >= bucket_count {
            return Err(CrossotopeError::SampleSize {
                requested: n,
                available: bucket_count,
            });
        }
        if replicate_count == 0 {
            return Err(CrossotopeError::Consistency(
                "ROI index has no replicates to draw from".to_string(),
            ));
        }
        let to_u32 = |value: usize| {
            u32::try_from(value).map_err(|_| {
                CrossotopeError::InputValidation(format!("{} does not fit a ROI number", value))
            })
        };

        // Candidates are 1..bucket_count, i.e. bucket_count - 1 of them.
        let mut buckets: Vec<u32> = index::sample(&mut self.rng, bucket_count - 1, n)
            .into_iter()
            .map(|i| to_u32(i + 1))
            .collect::<Result<_, _>>()?;
        buckets.sort_unstable();

        let max_replicate = to_u32(replicate_count)?;
        Ok(buckets
            .into_iter()
            .map(|nrh| SampleDraw {
                nrh,
                ix: self.rng.gen_range(1..=max_replicate),
            })
            .collect())
    }
}

/// Buckets `1..bucket_count` must all be present and replicates must be
/// exactly `1..=replicate_count`.
fn check_numbering(roi_index: &RoiIndex) -> Result<(), CrossotopeError> {
    let bucket_count = u32::try_from(roi_index.bucket_count()).unwrap_or(u32::MAX);
    let missing: Vec<u32> = (1..bucket_count)
        .filter(|nrh| !roi_index.buckets.contains(nrh))
        .collect();
    if !missing.is_empty() {
        return Err(CrossotopeError::Consistency(format!(
            "{} has {} ratio buckets but lacks nrh {}; buckets 1..{} must all exist",
            roi_index.root.display(),
            bucket_count,
            missing.iter().join(", "),
            bucket_count
        )));
    }

    let replicate_count = u32::try_from(roi_index.replicate_count()).unwrap_or(u32::MAX);
    if !roi_index.replicates.iter().copied().eq(1..=replicate_count) {
        return Err(CrossotopeError::Consistency(format!(
            "{} has replicates ix {}; expected them numbered 1..={}",
            roi_index.root.display(),
            roi_index.replicates.iter().join(", "),
            replicate_count
        )));
    }
    Ok(())
}
