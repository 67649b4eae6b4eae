//! Multi-class support vector machine with probability estimates.
//!
//! One binary `linfa-svm` machine per class (one-vs-rest), each calibrated by linfa's
//! Platt scaling. Class probabilities are the per-machine probabilities normalized to
//! sum to 1.
//!
//! linfa evaluates the polynomial kernel as `(<x, y> + coef0)^degree`; the `gamma` scale
//! of `(gamma * <x, y> + coef0)^degree` is applied by multiplying every record by
//! `sqrt(gamma)` before fitting and predicting.

use crate::error::Error;
use linfa::{dataset::Pr, prelude::*};
use linfa_svm::Svm;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PolynomialKernel {
    pub(crate) degree: u8,
    pub(crate) gamma: f64,
    pub(crate) coef0: f64,
}

impl PolynomialKernel {
    /// Kernel with `gamma = 1 / (n_features * Var(records))`, or 1 for constant records.
    pub(crate) fn scaled(degree: u8, records: ArrayView2<f64>) -> Self {
        let mean = records.mean().unwrap_or(0.0);
        let variance = records
            .mapv(|value| (value - mean).powi(2))
            .mean()
            .unwrap_or(0.0);
        let denominator = records.ncols() as f64 * variance;
        let gamma = if denominator > 0.0 {
            1.0 / denominator
        } else {
            1.0
        };
        Self {
            degree,
            gamma,
            coef0: 0.0,
        }
    }

    /// Records with `gamma` folded in, ready for linfa's unscaled polynomial kernel.
    pub(crate) fn scale(&self, records: ArrayView2<f64>) -> Array2<f64> {
        let factor = self.gamma.sqrt();
        records.mapv(|value| value * factor)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MultiClassSvm {
    kernel: PolynomialKernel,
    num_features: usize,
    machines: Vec<Svm<f64, Pr>>,
}

impl MultiClassSvm {
    /// Fit one machine per class id in `0..num_classes`.
    pub(crate) fn fit(
        records: ArrayView2<f64>,
        targets: ArrayView1<usize>,
        num_classes: usize,
        degree: u8,
    ) -> Result<Self, Error> {
        if records.nrows() != targets.len() {
            return Err(Error::LengthMismatch(records.nrows(), targets.len()));
        }
        if num_classes < 2 {
            return Err(Error::TooFewClasses(num_classes));
        }

        let kernel = PolynomialKernel::scaled(degree, records);
        let scaled = kernel.scale(records);

        let machines = (0..num_classes)
            .map(|class_id| {
                let positives: Array1<bool> = targets.mapv(|t| t == class_id);
                if !positives.iter().any(|&positive| positive) {
                    return Err(Error::MissingClass(class_id));
                }

                let dataset = Dataset::new(scaled.clone(), positives);
                let machine = Svm::<_, Pr>::params()
                    .polynomial_kernel(kernel.coef0, f64::from(degree))
                    .fit(&dataset)
                    .map_err(|e| Error::FitSvm(e, class_id))?;
                debug!(
                    message = "fitted binary machine",
                    class_id,
                    degree,
                    support_vectors = machine.nsupport(),
                    rho = machine.rho
                );
                Ok(machine)
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Self {
            kernel,
            num_features: records.ncols(),
            machines,
        })
    }

    pub(crate) fn num_classes(&self) -> usize {
        self.machines.len()
    }

    pub(crate) fn num_features(&self) -> usize {
        self.num_features
    }

    pub(crate) fn kernel(&self) -> PolynomialKernel {
        self.kernel
    }

    fn check_features(&self, got: usize) -> Result<(), Error> {
        if got == self.num_features {
            Ok(())
        } else {
            Err(Error::FeatureDimension {
                expected: self.num_features,
                got,
            })
        }
    }

    /// Class probabilities, one row per record and one column per class id.
    ///
    /// Rows sum to 1; a row where every machine reports 0 becomes uniform.
    pub(crate) fn predict_proba_batch(
        &self,
        records: ArrayView2<f64>,
    ) -> Result<Array2<f64>, Error> {
        self.check_features(records.ncols())?;
        let scaled = self.kernel.scale(records);
        let mut probabilities = Array2::zeros((records.nrows(), self.machines.len()));
        for (machine, mut column) in self.machines.iter().zip(probabilities.columns_mut()) {
            let positive: Array1<Pr> = machine.predict(&scaled);
            for (dst, probability) in column.iter_mut().zip(positive.iter()) {
                *dst = f64::from(**probability);
            }
        }

        let uniform = 1.0 / self.machines.len() as f64;
        for mut row in probabilities.rows_mut() {
            let total = row.sum();
            if total > 0.0 {
                row /= total;
            } else {
                row.fill(uniform);
            }
        }
        Ok(probabilities)
    }

    /// Class probabilities for one sample, indexed by class id and summing to 1.
    pub(crate) fn predict_proba(&self, sample: ArrayView1<f64>) -> Result<Array1<f64>, Error> {
        let probabilities = self.predict_proba_batch(sample.insert_axis(Axis(0)))?;
        Ok(probabilities.row(0).to_owned())
    }

    /// Most probable class id and its probability.
    pub(crate) fn predict_one(&self, sample: ArrayView1<f64>) -> Result<(usize, f64), Error> {
        argmax(self.predict_proba(sample)?.view())
    }

    pub(crate) fn predict(&self, records: ArrayView2<f64>) -> Result<Array1<usize>, Error> {
        self.predict_proba_batch(records)?
            .rows()
            .into_iter()
            .map(|row| argmax(row).map(|(class_id, _)| class_id))
            .collect()
    }
}

/// Highest probability and its class id; ties go to the lowest id.
fn argmax(probabilities: ArrayView1<f64>) -> Result<(usize, f64), Error> {
    probabilities
        .iter()
        .copied()
        .enumerate()
        .max_by_key(|&(class_id, probability)| {
            (OrderedFloat(probability), std::cmp::Reverse(class_id))
        })
        .ok_or(Error::TooFewClasses(0))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{argmax, MultiClassSvm, PolynomialKernel};
    use crate::error::Error;
    use assert_approx_eq::assert_approx_eq;
    use ndarray::{array, Array1, Array2};

    /// Three well separated clusters of `per_class` samples each, with small jitter.
    pub(crate) fn clusters(per_class: usize) -> (Array2<f64>, Array1<usize>) {
        let centers = [[0.0, 0.0, 0.0, 0.0], [1.0, 0.5, 1.0, 0.5], [0.5, -1.0, 0.5, -1.0]];
        let mut records = Array2::zeros((centers.len() * per_class, 4));
        let mut targets = Array1::zeros(centers.len() * per_class);
        for (class_id, center) in centers.iter().enumerate() {
            for i in 0..per_class {
                let row = class_id * per_class + i;
                let jitter = 0.01 * i as f64;
                for (j, &value) in center.iter().enumerate() {
                    records[(row, j)] = if value == 0.0 { 0.0 } else { value + jitter };
                }
                targets[row] = class_id;
            }
        }
        (records, targets)
    }

    #[test]
    fn kernel_gamma_uses_feature_variance() {
        let records = array![[0.0, 2.0], [2.0, 0.0]];
        let kernel = PolynomialKernel::scaled(3, records.view());
        assert_approx_eq!(kernel.gamma, 0.5);
        let scaled = kernel.scale(records.view());
        // <x, x> on scaled records equals gamma * <x, x> on the originals
        assert_approx_eq!(scaled.row(0).dot(&scaled.row(0)), 2.0);
        assert_approx_eq!(scaled.row(0).dot(&scaled.row(1)), 0.0);
    }

    #[test]
    fn constant_records_fall_back_to_unit_gamma() {
        let records = Array2::<f64>::zeros((3, 4));
        assert_approx_eq!(PolynomialKernel::scaled(4, records.view()).gamma, 1.0);
    }

    #[test]
    fn ties_go_to_lowest_class_id() {
        assert_eq!(argmax(array![0.25, 0.5, 0.5].view()).unwrap(), (1, 0.5));
        assert!(matches!(
            argmax(Array1::<f64>::zeros(0).view()),
            Err(Error::TooFewClasses(0))
        ));
    }

    #[test]
    fn separable_clusters_are_recovered() {
        let (records, targets) = clusters(6);
        let svm = MultiClassSvm::fit(records.view(), targets.view(), 3, 4).unwrap();
        assert_eq!(svm.num_classes(), 3);
        assert_eq!(svm.num_features(), 4);
        assert_eq!(svm.predict(records.view()).unwrap(), targets);

        let probabilities = svm.predict_proba(records.row(8)).unwrap();
        assert_approx_eq!(probabilities.sum(), 1.0);
        let (class_id, probability) = svm.predict_one(records.row(8)).unwrap();
        assert_eq!(class_id, 1);
        assert!(probability > 1.0 / 3.0);
    }

    #[test]
    fn batch_rows_are_distributions() {
        let (records, targets) = clusters(5);
        let svm = MultiClassSvm::fit(records.view(), targets.view(), 3, 5).unwrap();
        let probabilities = svm.predict_proba_batch(records.view()).unwrap();
        assert_eq!(probabilities.dim(), (15, 3));
        for row in probabilities.rows() {
            assert_approx_eq!(row.sum(), 1.0);
            assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
        }
    }

    #[test]
    fn model_survives_json() {
        let (records, targets) = clusters(6);
        let svm = MultiClassSvm::fit(records.view(), targets.view(), 3, 4).unwrap();
        let restored: MultiClassSvm =
            serde_json::from_str(&serde_json::to_string(&svm).unwrap()).unwrap();
        assert_eq!(restored.kernel(), svm.kernel());
        for row in records.rows() {
            let expected = svm.predict_proba(row).unwrap();
            let got = restored.predict_proba(row).unwrap();
            for (&e, &g) in expected.iter().zip(got.iter()) {
                assert_approx_eq!(e, g, 1e-6);
            }
        }
    }

    #[test]
    fn single_class_is_rejected() {
        let records = Array2::<f64>::ones((3, 2));
        let targets = Array1::<usize>::zeros(3);
        assert!(matches!(
            MultiClassSvm::fit(records.view(), targets.view(), 1, 4),
            Err(Error::TooFewClasses(1))
        ));
    }

    #[test]
    fn class_without_samples_is_rejected() {
        let (records, targets) = clusters(2);
        assert!(matches!(
            MultiClassSvm::fit(records.view(), targets.view(), 4, 4),
            Err(Error::MissingClass(3))
        ));
    }

    #[test]
    fn wrong_feature_count_is_rejected() {
        let (records, targets) = clusters(3);
        let svm = MultiClassSvm::fit(records.view(), targets.view(), 3, 4).unwrap();
        let short = array![0.0, 1.0];
        assert!(matches!(
            svm.predict_proba(short.view()),
            Err(Error::FeatureDimension {
                expected: 4,
                got: 2
            })
        ));
    }
}
