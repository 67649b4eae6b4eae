use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("cannot transform an empty keypoint set")]
    EmptyKeypoints,

    #[error("expected keypoint coordinates with 2 columns, got {0}")]
    KeypointColumns(usize),

    #[error("failed to construct NotNan from f32: {1}")]
    ConstructNotNan(#[source] ordered_float::FloatIsNan, f32),

    #[error("expected a feature of shape (19, 2), got {0:?}")]
    FeatureShape((usize, usize)),

    #[error("expected {expected} features per sample, got {got}")]
    FeatureDimension { expected: usize, got: usize },

    #[error("failed to reshape features")]
    ReshapeFeatures(#[source] ndarray::ShapeError),

    #[error("got {0} feature rows but {1} labels")]
    LengthMismatch(usize, usize),

    #[error("pose service request to {1} failed")]
    PoseRequest(#[source] ureq::Error, String),

    #[error("failed to decode pose service response")]
    DecodePoseResponse(#[source] ureq::Error),

    #[error("failed to parse keypoints JSON")]
    ParseKeypoints(#[source] serde_json::Error),

    #[error("failed to read {1:?}")]
    ReadFile(#[source] std::io::Error, PathBuf),

    #[error("failed to write {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),

    #[error("failed to list directory {1:?}")]
    ReadDir(#[source] std::io::Error, PathBuf),

    #[error("failed to serialize artifact {1:?}")]
    SerializeArtifact(#[source] serde_json::Error, PathBuf),

    #[error("failed to parse artifact {1:?}")]
    ParseArtifact(#[source] serde_json::Error, PathBuf),

    #[error("artifact {path:?} has schema version {found}, expected {expected}")]
    SchemaVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("classifier {classifier} and label map {labels} come from different training runs")]
    ArtifactMismatch {
        classifier: uuid::Uuid,
        labels: uuid::Uuid,
    },

    #[error("classifier knows {classifier} classes but the label map has {labels}")]
    ClassCountMismatch { classifier: usize, labels: usize },

    #[error("label map ids are not dense: missing id {0}")]
    SparseLabelMap(usize),

    #[error("class {0:?} has no samples to augment from")]
    EmptyClass(String),

    #[error("noise standard deviation must be finite and non-negative, got {0}")]
    InvalidNoise(f32),

    #[error("invalid noise standard deviation: {1}")]
    NoiseDistribution(#[source] rand_distr::NormalError, f32),

    #[error("unknown class label: {0:?}")]
    UnknownLabel(String),

    #[error("unknown class id: {0}")]
    UnknownClassId(usize),

    #[error("need at least two classes to train a classifier, got {0}")]
    TooFewClasses(usize),

    #[error("need at least two cross-validation folds, got {0}")]
    TooFewFolds(usize),

    #[error("class id {class_id} has {count} training samples, fewer than {folds} cross-validation folds")]
    TooFewSamplesForFolds {
        class_id: usize,
        count: usize,
        folds: usize,
    },

    #[error("no training samples for class id {0}")]
    MissingClass(usize),

    #[error("no candidate polynomial degrees to search")]
    EmptyGrid,

    #[error("failed to fit SVM for class id {1}")]
    FitSvm(#[source] linfa_svm::SvmError, usize),

    #[error("failed to compute confusion matrix")]
    ConfusionMatrix(#[source] linfa::Error),

    #[error("failed to open video capture device {0}")]
    OpenCapture(i32),

    #[error("failed to read frame from video capture")]
    ReadFrame(#[source] opencv::Error),

    #[error("video capture returned no frame")]
    CaptureEnded,

    #[error("failed to encode frame as JPEG")]
    EncodeFrame(#[source] opencv::Error),

    #[cfg(feature = "gui")]
    #[error("failed to draw line")]
    DrawLine(#[source] opencv::Error),

    #[cfg(feature = "gui")]
    #[error("failed to draw text")]
    PutText(#[source] opencv::Error),

    #[cfg(feature = "gui")]
    #[error("failed to show image")]
    ImShow(#[source] opencv::Error),

    #[cfg(feature = "gui")]
    #[error("failed to convert pose line coordinate {0} to i32")]
    ConvertLineCoordinate(f32),
}

impl Error {
    /// Whether a live session can carry on with the next frame after this error.
    pub(crate) fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::EmptyKeypoints
                | Self::KeypointColumns(_)
                | Self::ConstructNotNan(..)
                | Self::PoseRequest(..)
                | Self::DecodePoseResponse(_)
                | Self::EncodeFrame(_)
        )
    }
}
