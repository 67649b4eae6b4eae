use crate::{dataset::LabeledFeatures, error::Error};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::collections::HashMap;
use tracing::debug;

/// Default standard deviation of the noise added to synthetic samples.
pub(crate) const DEFAULT_NOISE: f32 = 0.03;

/// Oversample until every class has at least `target` samples.
///
/// Synthetic samples are copies of original (pre-augmentation) samples with independent
/// Gaussian noise added to both coordinates of every joint. Every class in `classes` must
/// already have at least one sample. Returns the number of samples added.
pub(crate) fn augment<R>(
    samples: &mut LabeledFeatures,
    classes: &[String],
    target: usize,
    noise: f32,
    rng: &mut R,
) -> Result<usize, Error>
where
    R: Rng + ?Sized,
{
    if !(noise.is_finite() && noise >= 0.0) {
        return Err(Error::InvalidNoise(noise));
    }
    let normal = Normal::new(0.0_f32, noise).map_err(|e| Error::NoiseDistribution(e, noise))?;

    let mut counts: HashMap<String, usize> = HashMap::new();
    for label in &samples.labels {
        *counts.entry(label.clone()).or_insert(0) += 1;
    }
    if let Some(empty) = classes.iter().find(|class| !counts.contains_key(*class)) {
        return Err(Error::EmptyClass(empty.clone()));
    }

    let originals = samples.len();
    let mut added = 0;
    while counts.values().any(|&count| count < target) {
        for i in 0..originals {
            let label = samples.labels[i].clone();
            let count = counts.entry(label.clone()).or_insert(0);
            if *count >= target {
                continue;
            }
            let noisy = samples.features[i].mapv(|value| value + normal.sample(&mut *rng));
            samples.push(noisy, label);
            *count += 1;
            added += 1;
        }
    }

    debug!(message = "augmented dataset", added, total = samples.len());
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::{augment, DEFAULT_NOISE};
    use crate::{dataset::LabeledFeatures, error::Error};
    use ndarray::Array2;
    use rand::{rngs::StdRng, SeedableRng};

    fn samples(counts: &[(&str, usize)]) -> LabeledFeatures {
        let mut samples = LabeledFeatures::default();
        for (class, count) in counts {
            for i in 0..*count {
                samples.push(Array2::from_elem((19, 2), i as f32 * 0.1), *class);
            }
        }
        samples
    }

    fn classes(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn every_class_reaches_target() {
        let mut data = samples(&[("tree", 1), ("cobra", 4), ("bridge", 9)]);
        let mut rng = StdRng::seed_from_u64(7);
        let added = augment(
            &mut data,
            &classes(&["bridge", "cobra", "tree"]),
            10,
            DEFAULT_NOISE,
            &mut rng,
        )
        .unwrap();

        let counts = data.class_counts();
        assert_eq!(counts["tree"], 10);
        assert_eq!(counts["cobra"], 10);
        assert_eq!(counts["bridge"], 10);
        assert_eq!(added, 9 + 6 + 1);
        assert_eq!(data.features.len(), data.labels.len());
    }

    #[test]
    fn classes_already_at_target_are_untouched() {
        let mut data = samples(&[("tree", 5), ("cobra", 2)]);
        let mut rng = StdRng::seed_from_u64(1);
        augment(&mut data, &classes(&["tree", "cobra"]), 3, DEFAULT_NOISE, &mut rng).unwrap();

        let counts = data.class_counts();
        assert_eq!(counts["tree"], 5);
        assert_eq!(counts["cobra"], 3);
    }

    #[test]
    fn synthetic_samples_stay_close_to_their_source() {
        let mut data = LabeledFeatures::default();
        data.push(Array2::from_elem((19, 2), 0.5_f32), "tree");
        let mut rng = StdRng::seed_from_u64(3);
        augment(&mut data, &classes(&["tree"]), 20, DEFAULT_NOISE, &mut rng).unwrap();

        assert_eq!(data.len(), 20);
        for feature in &data.features[1..] {
            assert_eq!(feature.dim(), (19, 2));
            assert!(feature.iter().all(|&v| (v - 0.5).abs() < 0.3));
            assert!(feature.iter().any(|&v| v != 0.5));
        }
    }

    #[test]
    fn empty_class_is_rejected() {
        let mut data = samples(&[("tree", 2)]);
        let mut rng = StdRng::seed_from_u64(0);
        let result = augment(
            &mut data,
            &classes(&["tree", "warrior"]),
            4,
            DEFAULT_NOISE,
            &mut rng,
        );
        assert!(matches!(result, Err(Error::EmptyClass(class)) if class == "warrior"));
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn negative_noise_is_rejected() {
        let mut data = samples(&[("tree", 1)]);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            augment(&mut data, &classes(&["tree"]), 2, -1.0, &mut rng),
            Err(Error::InvalidNoise(noise)) if noise == -1.0
        ));
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn non_finite_noise_is_rejected() {
        let mut data = samples(&[("tree", 1)]);
        let mut rng = StdRng::seed_from_u64(0);
        for noise in [f32::NAN, f32::INFINITY] {
            assert!(matches!(
                augment(&mut data, &classes(&["tree"]), 2, noise, &mut rng),
                Err(Error::InvalidNoise(_))
            ));
        }
    }

    #[test]
    fn zero_noise_duplicates_samples() {
        let mut data = samples(&[("tree", 1)]);
        let mut rng = StdRng::seed_from_u64(0);
        augment(&mut data, &classes(&["tree"]), 3, 0.0, &mut rng).unwrap();
        assert_eq!(data.len(), 3);
        assert!(data.features.iter().all(|feature| feature == &data.features[0]));
    }
}
