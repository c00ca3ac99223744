//! In-memory form of the persisted sample-set record
//!
//! This is the record the classifier-training collaborator consumes: one
//! flat sample vector and a reachability flag per entry, plus global
//! per-dimension bounds. Reachable samples are packed from the front in
//! encounter order and unreachable samples from the back, so the first
//! entry's class is the positive one.

use nalgebra::DVector;

use crate::common::{PlanningError, PlanningResult};
use crate::sampling::SamplingSpace;

#[derive(Debug, Clone)]
pub struct SampleSetEntry {
    pub sample: DVector<f64>,
    pub is_reachable: bool,
}

#[derive(Debug, Clone)]
pub struct SampleSet {
    space: SamplingSpace,
    entries: Vec<SampleSetEntry>,
    sample_min: DVector<f64>,
    sample_max: DVector<f64>,
}

impl SampleSet {
    pub fn from_samples<I>(space: SamplingSpace, samples: I) -> PlanningResult<Self>
    where
        I: IntoIterator<Item = (DVector<f64>, bool)>,
    {
        let dim = space.sample_dim();
        let collected: Vec<(DVector<f64>, bool)> = samples.into_iter().collect();
        if collected.is_empty() {
            return Err(PlanningError::ConfigError(
                "sample set is empty".to_string(),
            ));
        }
        for (sample, _) in &collected {
            if sample.len() != dim {
                return Err(PlanningError::DimensionMismatch(format!(
                    "sample has dimension {}, expected {} for {}",
                    sample.len(),
                    dim,
                    space
                )));
            }
        }
        let mut sample_min = collected[0].0.clone();
        let mut sample_max = collected[0].0.clone();
        for (sample, _) in &collected {
            for d in 0..dim {
                sample_min[d] = sample_min[d].min(sample[d]);
                sample_max[d] = sample_max[d].max(sample[d]);
            }
        }

        // reachable entries fill from the front in encounter order,
        // unreachable from the back
        let mut entries = Vec::with_capacity(collected.len());
        let mut unreachable = Vec::new();
        for (sample, is_reachable) in collected {
            let entry = SampleSetEntry {
                sample,
                is_reachable,
            };
            if is_reachable {
                entries.push(entry);
            } else {
                unreachable.push(entry);
            }
        }
        entries.extend(unreachable.into_iter().rev());
        Ok(SampleSet {
            space,
            entries,
            sample_min,
            sample_max,
        })
    }

    pub fn space(&self) -> SamplingSpace {
        self.space
    }

    pub fn entries(&self) -> &[SampleSetEntry] {
        &self.entries
    }

    pub fn num_reachable(&self) -> usize {
        self.entries.iter().filter(|e| e.is_reachable).count()
    }

    pub fn sample_min(&self) -> &DVector<f64> {
        &self.sample_min
    }

    pub fn sample_max(&self) -> &DVector<f64> {
        &self.sample_max
    }
}
