use crate::{
    assets::Assets,
    client::PoseEstimator,
    error::Error,
    features::flatten,
    ideal::IdealPoses,
    model::Model,
    pose::{keypoints_to_array, Keypoint, PoseResponse, Prediction},
    train::{self, TrainOptions},
};
use ndarray::{Array2, ArrayView2};
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

/// One classified pose.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct Classification {
    pub(crate) label: String,
    #[serde(skip)]
    pub(crate) class_id: usize,
    /// Probability of `label`, in percent.
    pub(crate) confidence: f64,
    #[serde(skip)]
    pub(crate) feature: Array2<f32>,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{:.2}", self.label, self.confidence)
    }
}

/// Everything needed to classify poses, loaded once and passed to each call.
#[derive(Debug)]
pub(crate) struct InferenceContext {
    model: Model,
    ideal: Option<IdealPoses>,
}

impl InferenceContext {
    pub(crate) fn new(model: Model, ideal: Option<IdealPoses>) -> Self {
        let ideal = ideal.filter(|ideal| {
            let matches = ideal.model_id == model.model_id;
            if !matches {
                warn!(
                    message = "ignoring ideal poses from another training run",
                    model_id = %model.model_id,
                    ideal_model_id = %ideal.model_id
                );
            }
            matches
        });
        Self { model, ideal }
    }

    /// Load the persisted model, and the ideal poses if there are any.
    pub(crate) fn load(assets: &Assets) -> Result<Self, Error> {
        let model = Model::load(assets)?;
        let ideal = match IdealPoses::load(&assets.ideal_poses()) {
            Ok(ideal) => Some(ideal),
            Err(error) => {
                warn!(message = "ideal poses unavailable", error = %error);
                None
            }
        };
        info!(
            message = "loaded model",
            model_id = %model.model_id,
            classes = model.labels.len(),
            degree = model.svm.kernel().degree
        );
        Ok(Self::new(model, ideal))
    }

    /// Load the persisted model, training one first if no classifier exists yet.
    ///
    /// A classifier without its label map is an error rather than a reason to retrain.
    pub(crate) fn load_or_bootstrap<E>(
        assets: &Assets,
        estimator: &E,
        opts: &TrainOptions,
        show_progress: bool,
    ) -> Result<Self, Error>
    where
        E: PoseEstimator + ?Sized,
    {
        if !assets.classifier().exists() {
            warn!(
                message = "no trained classifier found, training one now",
                classifier = %assets.classifier().display(),
                corpus = %assets.images().display()
            );
            train::run(
                estimator,
                assets,
                opts,
                train::BOOTSTRAP_DATA_SIZE,
                show_progress,
            )?;
            info!(message = "finished bootstrap training");
        }
        Self::load(assets)
    }

    pub(crate) fn model(&self) -> &Model {
        &self.model
    }

    /// Classify raw `(x, y)` keypoint coordinates.
    pub(crate) fn classify(&self, coordinates: ArrayView2<f32>) -> Result<Classification, Error> {
        let feature = self.model.feature_space.extract(coordinates)?;
        let records = flatten(std::slice::from_ref(&feature))?;
        let (class_id, probability) = self.model.svm.predict_one(records.row(0))?;
        Ok(Classification {
            label: self.model.labels.label(class_id)?.to_owned(),
            class_id,
            confidence: probability * 100.0,
            feature,
        })
    }

    pub(crate) fn classify_keypoints(
        &self,
        keypoints: &[Keypoint],
    ) -> Result<Classification, Error> {
        self.classify(keypoints_to_array(keypoints)?.view())
    }

    /// Classify a JSON array of `{"x": .., "y": ..}` objects.
    pub(crate) fn classify_json(&self, json: &str) -> Result<Classification, Error> {
        let keypoints: Vec<Keypoint> = serde_json::from_str(json).map_err(Error::ParseKeypoints)?;
        self.classify_keypoints(&keypoints)
    }

    /// Classify the first person in a pose service response, if the pose is full-body.
    pub(crate) fn classify_response<'a>(
        &self,
        response: &'a PoseResponse,
        min_pose_lines: usize,
    ) -> Result<Option<(&'a Prediction, Classification)>, Error> {
        match response.first_full_body(min_pose_lines) {
            Some(prediction) => {
                let classification = self.classify_keypoints(&prediction.body_parts)?;
                Ok(Some((prediction, classification)))
            }
            None => Ok(None),
        }
    }

    /// Cosine similarity of a classified pose to its class's ideal pose.
    pub(crate) fn similarity_to_ideal(&self, classification: &Classification) -> Option<f32> {
        self.ideal.as_ref().and_then(|ideal| {
            ideal.similarity(&classification.label, classification.feature.view())
        })
    }

    /// Cosine similarity of raw keypoints to every class's ideal pose, in label order.
    pub(crate) fn similarities(
        &self,
        coordinates: ArrayView2<f32>,
    ) -> Result<Vec<(String, Option<f32>)>, Error> {
        let feature = self.model.feature_space.extract(coordinates)?;
        Ok(self
            .model
            .labels
            .classes()
            .iter()
            .map(|label| {
                let similarity = self
                    .ideal
                    .as_ref()
                    .and_then(|ideal| ideal.similarity(label, feature.view()));
                (label.clone(), similarity)
            })
            .collect())
    }
}
