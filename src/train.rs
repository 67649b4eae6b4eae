use crate::{
    assets::Assets,
    augment::{augment, DEFAULT_NOISE},
    client::PoseEstimator,
    dataset::{build_dataset, LabeledFeatures},
    error::Error,
    features::{flatten, unflatten, FeatureSpace},
    ideal::IdealPoses,
    labels::encode_labels,
    model::Model,
    svm::MultiClassSvm,
};
use linfa::{prelude::ToConfusionMatrix, Dataset};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use structopt::StructOpt;
use tracing::{debug, info};
use uuid::Uuid;

/// Samples per class after augmentation when training explicitly.
pub(crate) const DEFAULT_DATA_SIZE: usize = 100;

/// Samples per class after augmentation when a missing classifier is trained on demand.
pub(crate) const BOOTSTRAP_DATA_SIZE: usize = 500;

#[derive(Debug, Clone, StructOpt)]
pub(crate) struct TrainOptions {
    /// Number of samples per class after augmentation.
    #[structopt(long)]
    pub(crate) data_size: Option<usize>,

    /// Standard deviation of the noise added to synthetic samples.
    #[structopt(long, default_value = "0.03")]
    pub(crate) noise: f32,

    /// Fraction of samples held out for the final evaluation.
    #[structopt(long, default_value = "0.2")]
    pub(crate) test_ratio: f64,

    /// Number of cross-validation folds in the grid search.
    #[structopt(long, default_value = "5")]
    pub(crate) folds: usize,

    /// Candidate polynomial kernel degrees.
    #[structopt(long, use_delimiter = true, default_value = "4,5,6,7,8")]
    pub(crate) degrees: Vec<u8>,

    /// Seed for the split, fold assignment and augmentation noise.
    #[structopt(long)]
    pub(crate) seed: Option<u64>,

    /// Use max-normalized cartesian coordinates instead of polar ones.
    #[structopt(long)]
    pub(crate) cartesian: bool,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            data_size: None,
            noise: DEFAULT_NOISE,
            test_ratio: 0.2,
            folds: 5,
            degrees: vec![4, 5, 6, 7, 8],
            seed: None,
            cartesian: false,
        }
    }
}

impl TrainOptions {
    pub(crate) fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    pub(crate) fn feature_space(&self) -> FeatureSpace {
        if self.cartesian {
            FeatureSpace::Cartesian
        } else {
            FeatureSpace::Polar
        }
    }
}

/// Held-out metrics of a fitted classifier.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Evaluation {
    pub(crate) accuracy: f32,
    pub(crate) precision: f32,
    pub(crate) recall: f32,
    pub(crate) f1: f32,
}

#[derive(Debug)]
pub(crate) struct TrainedClassifier {
    pub(crate) svm: MultiClassSvm,
    pub(crate) degree: u8,
    /// Mean cross-validation accuracy per candidate degree.
    pub(crate) scores: BTreeMap<u8, f64>,
    pub(crate) evaluation: Evaluation,
    /// Sample indices of the training split.
    pub(crate) train: Vec<usize>,
}

/// Split sample indices into `(train, test)`, taking `test_ratio` of every class.
///
/// Each class keeps at least one training sample.
pub(crate) fn stratified_split<R>(
    targets: ArrayView1<usize>,
    test_ratio: f64,
    rng: &mut R,
) -> (Vec<usize>, Vec<usize>)
where
    R: Rng + ?Sized,
{
    let mut train = Vec::new();
    let mut test = Vec::new();
    for mut indices in class_indices(targets).into_values() {
        indices.shuffle(rng);
        let n_test = ((indices.len() as f64 * test_ratio).round() as usize)
            .min(indices.len().saturating_sub(1));
        test.extend_from_slice(&indices[..n_test]);
        train.extend_from_slice(&indices[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

/// Assign every sample to one of `folds` validation folds, spreading each class evenly.
pub(crate) fn stratified_folds<R>(
    targets: ArrayView1<usize>,
    folds: usize,
    rng: &mut R,
) -> Result<Vec<Vec<usize>>, Error>
where
    R: Rng + ?Sized,
{
    if folds < 2 {
        return Err(Error::TooFewFolds(folds));
    }
    let mut assignment = vec![Vec::new(); folds];
    let mut offset = 0;
    for (class_id, mut indices) in class_indices(targets) {
        if indices.len() < folds {
            return Err(Error::TooFewSamplesForFolds {
                class_id,
                count: indices.len(),
                folds,
            });
        }
        indices.shuffle(rng);
        for (i, index) in indices.into_iter().enumerate() {
            assignment[(offset + i) % folds].push(index);
        }
        // stagger the starting fold per class
        offset += 1;
    }
    for fold in &mut assignment {
        fold.sort_unstable();
    }
    Ok(assignment)
}

fn class_indices(targets: ArrayView1<usize>) -> BTreeMap<usize, Vec<usize>> {
    let mut classes: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &class_id) in targets.iter().enumerate() {
        classes.entry(class_id).or_default().push(i);
    }
    classes
}

fn accuracy(predicted: ArrayView1<usize>, expected: ArrayView1<usize>) -> f64 {
    if expected.is_empty() {
        return 0.0;
    }
    let correct = predicted
        .iter()
        .zip(expected.iter())
        .filter(|(p, e)| p == e)
        .count();
    correct as f64 / expected.len() as f64
}

/// Score every candidate degree by mean k-fold accuracy and return the best one.
///
/// Ties go to the lower degree.
pub(crate) fn grid_search<R>(
    records: ArrayView2<f64>,
    targets: ArrayView1<usize>,
    num_classes: usize,
    degrees: &[u8],
    folds: usize,
    rng: &mut R,
) -> Result<(u8, BTreeMap<u8, f64>), Error>
where
    R: Rng + ?Sized,
{
    let candidates: Vec<u8> = degrees
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if candidates.is_empty() {
        return Err(Error::EmptyGrid);
    }

    let assignment = stratified_folds(targets, folds, rng)?;
    let mut scores = BTreeMap::new();
    for &degree in &candidates {
        let mut total = 0.0;
        for validation in &assignment {
            let training: Vec<usize> = (0..targets.len())
                .filter(|i| validation.binary_search(i).is_err())
                .collect();
            let svm = MultiClassSvm::fit(
                records.select(Axis(0), &training).view(),
                targets.select(Axis(0), &training).view(),
                num_classes,
                degree,
            )?;
            let predicted = svm.predict(records.select(Axis(0), validation).view())?;
            total += accuracy(
                predicted.view(),
                targets.select(Axis(0), validation).view(),
            );
        }
        let score = total / assignment.len() as f64;
        info!(message = "cross-validated degree", degree, folds, accuracy = score);
        scores.insert(degree, score);
    }

    let mut best = candidates[0];
    for &degree in &candidates[1..] {
        if scores[&degree] > scores[&best] {
            best = degree;
        }
    }
    Ok((best, scores))
}

/// Evaluate predictions against held-out targets.
pub(crate) fn evaluate(
    svm: &MultiClassSvm,
    records: ArrayView2<f64>,
    targets: ArrayView1<usize>,
) -> Result<Evaluation, Error> {
    let predicted = svm.predict(records)?;
    let truth = Dataset::new(records.to_owned(), targets.to_owned());
    let confusion = predicted
        .confusion_matrix(&truth)
        .map_err(Error::ConfusionMatrix)?;
    debug!(message = "confusion matrix", matrix = ?confusion);
    Ok(Evaluation {
        accuracy: confusion.accuracy(),
        precision: confusion.precision(),
        recall: confusion.recall(),
        f1: confusion.f1_score(),
    })
}

/// Split, grid-search the kernel degree, refit on the whole training split and evaluate.
pub(crate) fn train_classifier<R>(
    records: ArrayView2<f64>,
    targets: ArrayView1<usize>,
    num_classes: usize,
    opts: &TrainOptions,
    rng: &mut R,
) -> Result<TrainedClassifier, Error>
where
    R: Rng + ?Sized,
{
    if records.nrows() != targets.len() {
        return Err(Error::LengthMismatch(records.nrows(), targets.len()));
    }
    if num_classes < 2 {
        return Err(Error::TooFewClasses(num_classes));
    }

    let (train, test) = stratified_split(targets, opts.test_ratio, rng);
    let train_records = records.select(Axis(0), &train);
    let train_targets: Array1<usize> = targets.select(Axis(0), &train);
    info!(
        message = "split dataset",
        train = train.len(),
        test = test.len()
    );

    let (degree, scores) = grid_search(
        train_records.view(),
        train_targets.view(),
        num_classes,
        &opts.degrees,
        opts.folds,
        rng,
    )?;
    info!(message = "selected kernel degree", degree);

    let svm = MultiClassSvm::fit(
        train_records.view(),
        train_targets.view(),
        num_classes,
        degree,
    )?;

    let (eval_records, eval_targets) = if test.is_empty() {
        (train_records, train_targets)
    } else {
        (
            records.select(Axis(0), &test),
            targets.select(Axis(0), &test),
        )
    };
    let evaluation = evaluate(&svm, eval_records.view(), eval_targets.view())?;
    info!(
        message = "evaluated classifier",
        samples = eval_targets.len(),
        accuracy = evaluation.accuracy,
        precision = evaluation.precision,
        recall = evaluation.recall,
        f1 = evaluation.f1
    );

    Ok(TrainedClassifier {
        svm,
        degree,
        scores,
        evaluation,
        train,
    })
}

/// Balance, encode and fit `samples`, then persist the model and ideal poses.
pub(crate) fn fit_and_save<R>(
    classes: &[String],
    mut samples: LabeledFeatures,
    assets: &Assets,
    opts: &TrainOptions,
    data_size: usize,
    rng: &mut R,
) -> Result<Model, Error>
where
    R: Rng + ?Sized,
{
    if classes.len() < 2 {
        return Err(Error::TooFewClasses(classes.len()));
    }
    debug!(message = "samples before augmentation", counts = ?samples.class_counts());
    let added = augment(&mut samples, classes, data_size, opts.noise, rng)?;
    info!(
        message = "augmented dataset",
        added,
        samples = samples.len(),
        classes = classes.len()
    );

    let (targets, labels) = encode_labels(&samples.labels)?;
    let records = flatten(&samples.features)?;

    let trained = train_classifier(records.view(), targets.view(), labels.len(), opts, rng)?;
    info!(
        message = "trained classifier",
        degree = trained.degree,
        scores = ?trained.scores
    );

    let model_id = Uuid::new_v4();
    let training_split = LabeledFeatures {
        features: unflatten(&records.select(Axis(0), &trained.train))?,
        labels: trained
            .train
            .iter()
            .map(|&i| samples.labels[i].clone())
            .collect(),
    };
    let ideal = IdealPoses::compute(&training_split, model_id);

    let model = Model {
        model_id,
        feature_space: opts.feature_space(),
        svm: trained.svm,
        labels,
    };
    model.save(assets)?;
    ideal.save(&assets.ideal_poses())?;
    Ok(model)
}

/// Build the dataset from the corpus under `assets`, train, and persist the model.
pub(crate) fn run<E>(
    estimator: &E,
    assets: &Assets,
    opts: &TrainOptions,
    default_data_size: usize,
    show_progress: bool,
) -> Result<Model, Error>
where
    E: PoseEstimator + ?Sized,
{
    let mut rng = opts.rng();
    let corpus = build_dataset(
        &assets.images(),
        estimator,
        opts.feature_space(),
        show_progress,
    )?;
    for (path, error) in &corpus.report.failures {
        debug!(message = "ingestion failure", path = %path.display(), error = ?error);
    }
    let data_size = opts.data_size.unwrap_or(default_data_size);
    fit_and_save(
        &corpus.classes,
        corpus.samples,
        assets,
        opts,
        data_size,
        &mut rng,
    )
}
