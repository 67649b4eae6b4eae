use crate::{client::PoseEstimator, error::Error, features::FeatureSpace};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array2;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

/// Corpus subdirectory that holds held-out images rather than a class.
pub(crate) const TEST_DIR: &str = "test";

/// Skeleton features with their class labels, correlated by index.
#[derive(Debug, Clone, Default)]
pub(crate) struct LabeledFeatures {
    pub(crate) features: Vec<Array2<f32>>,
    pub(crate) labels: Vec<String>,
}

impl LabeledFeatures {
    pub(crate) fn push(&mut self, feature: Array2<f32>, label: impl Into<String>) {
        self.features.push(feature);
        self.labels.push(label.into());
    }

    pub(crate) fn len(&self) -> usize {
        self.labels.len()
    }

    pub(crate) fn class_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for label in &self.labels {
            *counts.entry(label.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

/// Images that could not be turned into features.
#[derive(Debug, Default)]
pub(crate) struct IngestReport {
    pub(crate) processed: usize,
    pub(crate) without_pose: Vec<PathBuf>,
    pub(crate) failures: Vec<(PathBuf, Error)>,
}

#[derive(Debug, Default)]
pub(crate) struct Corpus {
    /// Every class directory found, including ones that yielded no samples.
    pub(crate) classes: Vec<String>,
    pub(crate) samples: LabeledFeatures,
    pub(crate) report: IngestReport,
}

fn list_dir(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut paths = fs::read_dir(dir)
        .map_err(|e| Error::ReadDir(e, dir.to_path_buf()))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::ReadDir(e, dir.to_path_buf()))?;
    paths.sort();
    Ok(paths)
}

/// Class labels of a corpus: its immediate subdirectories, except [`TEST_DIR`], sorted.
pub(crate) fn class_labels(root: &Path) -> Result<Vec<String>, Error> {
    Ok(list_dir(root)?
        .into_iter()
        .filter(|path| path.is_dir())
        .filter_map(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .filter(|name| name != TEST_DIR)
        .collect())
}

/// Features of the first person detected in an image, if any.
fn image_features<E>(
    estimator: &E,
    path: &Path,
    space: FeatureSpace,
) -> Result<Option<Array2<f32>>, Error>
where
    E: PoseEstimator + ?Sized,
{
    let response = estimator.estimate_file(path)?;
    match response.first() {
        Some(prediction) if !prediction.body_parts.is_empty() => {
            let coordinates = prediction.coordinates()?;
            space.extract(coordinates.view()).map(Some)
        }
        _ => Ok(None),
    }
}

fn progress_bar(len: usize, show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    ProgressBar::new(len as u64).with_style(
        ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30}] {pos}/{len} {wide_msg}")
            .progress_chars("=> "),
    )
}

/// Walk a labeled image corpus and extract one skeleton feature per usable image.
///
/// A failing image is recorded in the report and skipped; the rest of its class
/// directory is still processed. Samples keep directory order.
pub(crate) fn build_dataset<E>(
    root: &Path,
    estimator: &E,
    space: FeatureSpace,
    show_progress: bool,
) -> Result<Corpus, Error>
where
    E: PoseEstimator + ?Sized,
{
    let classes = class_labels(root)?;
    let mut images = Vec::new();
    for class in &classes {
        let files = list_dir(&root.join(class))?
            .into_iter()
            .filter(|path| path.is_file());
        images.extend(files.map(|path| (class.as_str(), path)));
    }

    info!(
        message = "building dataset",
        root = %root.display(),
        classes = classes.len(),
        images = images.len()
    );

    let progress = progress_bar(images.len(), show_progress);
    let mut samples = LabeledFeatures::default();
    let mut report = IngestReport::default();

    for (class, path) in images {
        progress.set_message(format!("{}", path.display()));
        report.processed += 1;
        match image_features(estimator, &path, space) {
            Ok(Some(feature)) => samples.push(feature, class),
            Ok(None) => report.without_pose.push(path),
            Err(error) => {
                warn!(message = "skipping image", path = %path.display(), error = %error);
                report.failures.push((path, error));
            }
        }
        progress.inc(1);
    }
    progress.finish_and_clear();

    info!(
        message = "finished building dataset",
        processed = report.processed,
        samples = samples.len(),
        without_pose = report.without_pose.len(),
        failures = report.failures.len()
    );

    Ok(Corpus {
        classes,
        samples,
        report,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{build_dataset, class_labels};
    use crate::{
        client::PoseEstimator, error::Error, features::FeatureSpace, pose::PoseResponse,
    };
    use std::{fs, path::Path};

    /// Reads the pose service's answer straight out of the "image" file.
    pub(crate) struct RecordedEstimator;

    impl PoseEstimator for RecordedEstimator {
        fn estimate(&self, image: &[u8], _file_name: &str) -> Result<PoseResponse, Error> {
            serde_json::from_slice(image).map_err(Error::ParseKeypoints)
        }
    }

    pub(crate) fn response_json(points: &[(f32, f32)]) -> String {
        let parts = points
            .iter()
            .enumerate()
            .map(|(i, (x, y))| format!(r#"{{"part_id": {}, "x": {}, "y": {}}}"#, i, x, y))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            r#"{{"predictions": [{{"body_parts": [{}], "pose_lines": []}}]}}"#,
            parts
        )
    }

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn class_labels_skip_test_dir_and_files() {
        let root = tempfile::tempdir().unwrap();
        for dir in ["tree", "test", "cobra"] {
            fs::create_dir(root.path().join(dir)).unwrap();
        }
        fs::write(root.path().join("README"), "").unwrap();
        assert_eq!(class_labels(root.path()).unwrap(), vec!["cobra", "tree"]);
    }

    #[test]
    fn builds_features_in_directory_order() {
        let root = tempfile::tempdir().unwrap();
        let pose = response_json(&[(10.0, 10.0), (20.0, 10.0), (15.0, 30.0)]);
        write(&root.path().join("cobra/1.jpg"), &pose);
        write(&root.path().join("cobra/2.jpg"), &pose);
        write(&root.path().join("tree/1.jpg"), &pose);
        write(&root.path().join("test/1.jpg"), &pose);

        let corpus = build_dataset(root.path(), &RecordedEstimator, FeatureSpace::Polar, false)
            .unwrap();
        assert_eq!(corpus.classes, vec!["cobra", "tree"]);
        assert_eq!(corpus.samples.labels, vec!["cobra", "cobra", "tree"]);
        assert!(corpus
            .samples
            .features
            .iter()
            .all(|feature| feature.dim() == (19, 2)));
        assert_eq!(corpus.report.processed, 3);
    }

    #[test]
    fn failing_image_does_not_abandon_its_directory() {
        let root = tempfile::tempdir().unwrap();
        let pose = response_json(&[(0.0, 0.0), (4.0, 3.0)]);
        write(&root.path().join("tree/1.jpg"), "not a pose");
        write(&root.path().join("tree/2.jpg"), &pose);
        write(&root.path().join("tree/3.jpg"), r#"{"predictions": []}"#);

        let corpus = build_dataset(root.path(), &RecordedEstimator, FeatureSpace::Polar, false)
            .unwrap();
        assert_eq!(corpus.samples.labels, vec!["tree"]);
        assert_eq!(corpus.report.failures.len(), 1);
        assert!(corpus.report.failures[0].0.ends_with("tree/1.jpg"));
        assert_eq!(corpus.report.without_pose.len(), 1);
    }

    #[test]
    fn class_without_usable_images_is_still_listed() {
        let root = tempfile::tempdir().unwrap();
        write(&root.path().join("bridge/1.jpg"), r#"{"predictions": []}"#);
        write(
            &root.path().join("tree/1.jpg"),
            &response_json(&[(1.0, 2.0), (3.0, 4.0)]),
        );

        let corpus = build_dataset(root.path(), &RecordedEstimator, FeatureSpace::Polar, false)
            .unwrap();
        assert_eq!(corpus.classes, vec!["bridge", "tree"]);
        assert_eq!(corpus.samples.class_counts().get("bridge"), None);
    }

    #[test]
    fn missing_root_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        assert!(matches!(
            build_dataset(
                &root.path().join("missing"),
                &RecordedEstimator,
                FeatureSpace::Polar,
                false
            ),
            Err(Error::ReadDir(..))
        ));
    }
}
