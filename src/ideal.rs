use crate::{
    assets::{check_schema, read_json, write_json, SCHEMA_VERSION},
    dataset::LabeledFeatures,
    error::Error,
};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};
use uuid::Uuid;

/// Per-class mean skeleton feature, for comparing a pose against its class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct IdealPoses {
    schema_version: u32,
    pub(crate) model_id: Uuid,
    poses: BTreeMap<String, Array2<f32>>,
}

impl IdealPoses {
    pub(crate) fn compute(samples: &LabeledFeatures, model_id: Uuid) -> Self {
        let mut sums: BTreeMap<String, (Array2<f32>, usize)> = BTreeMap::new();
        for (feature, label) in samples.features.iter().zip(&samples.labels) {
            let (sum, count) = sums
                .entry(label.clone())
                .or_insert_with(|| (Array2::zeros(feature.raw_dim()), 0));
            *sum += feature;
            *count += 1;
        }
        let poses = sums
            .into_iter()
            .map(|(label, (sum, count))| (label, sum / count as f32))
            .collect();
        Self {
            schema_version: SCHEMA_VERSION,
            model_id,
            poses,
        }
    }

    pub(crate) fn get(&self, label: &str) -> Option<&Array2<f32>> {
        self.poses.get(label)
    }

    /// Cosine similarity of `feature` to the ideal pose of `label`.
    pub(crate) fn similarity(&self, label: &str, feature: ArrayView2<f32>) -> Option<f32> {
        self.get(label)
            .filter(|ideal| ideal.dim() == feature.dim())
            .map(|ideal| cosine_similarity(ideal.view(), feature))
    }

    pub(crate) fn save(&self, path: &Path) -> Result<(), Error> {
        write_json(path, self)
    }

    pub(crate) fn load(path: &Path) -> Result<Self, Error> {
        let poses: Self = read_json(path)?;
        check_schema(poses.schema_version, path)?;
        Ok(poses)
    }
}

/// Cosine similarity of two flattened features; 0 when either is all zeros.
pub(crate) fn cosine_similarity(a: ArrayView2<f32>, b: ArrayView2<f32>) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}
