use crate::{
    assets::{check_schema, read_json, write_json, Assets, SCHEMA_VERSION},
    error::Error,
    features::{FeatureSpace, FEATURE_DIM},
    labels::{LabelArtifact, LabelMap},
    svm::MultiClassSvm,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct ClassifierArtifact<S> {
    schema_version: u32,
    model_id: Uuid,
    feature_space: FeatureSpace,
    svm: S,
}

/// A fitted classifier together with the label map that decodes its class ids.
///
/// Both halves are persisted to separate files that share a `model_id`, and are only
/// loaded together.
#[derive(Debug)]
pub(crate) struct Model {
    pub(crate) model_id: Uuid,
    pub(crate) feature_space: FeatureSpace,
    pub(crate) svm: MultiClassSvm,
    pub(crate) labels: LabelMap,
}

impl Model {
    /// Writes `classes.json` first; `classifier.json` only exists next to its label map.
    pub(crate) fn save(&self, assets: &Assets) -> Result<(), Error> {
        let classifier = ClassifierArtifact {
            schema_version: SCHEMA_VERSION,
            model_id: self.model_id,
            feature_space: self.feature_space,
            svm: &self.svm,
        };
        let labels = LabelArtifact {
            schema_version: SCHEMA_VERSION,
            model_id: self.model_id,
            classes: self.labels.to_ids(),
        };
        write_json(&assets.classes(), &labels)?;
        write_json(&assets.classifier(), &classifier)?;
        info!(
            message = "saved model",
            model_id = %self.model_id,
            classifier = %assets.classifier().display(),
            classes = %assets.classes().display()
        );
        Ok(())
    }

    pub(crate) fn load(assets: &Assets) -> Result<Self, Error> {
        let classifier_path = assets.classifier();
        let classifier: ClassifierArtifact<MultiClassSvm> = read_json(&classifier_path)?;
        check_schema(classifier.schema_version, &classifier_path)?;

        let labels_path = assets.classes();
        let labels: LabelArtifact = read_json(&labels_path)?;
        check_schema(labels.schema_version, &labels_path)?;

        if classifier.model_id != labels.model_id {
            return Err(Error::ArtifactMismatch {
                classifier: classifier.model_id,
                labels: labels.model_id,
            });
        }

        if classifier.svm.num_features() != FEATURE_DIM {
            return Err(Error::FeatureDimension {
                expected: FEATURE_DIM,
                got: classifier.svm.num_features(),
            });
        }

        let label_map = LabelMap::from_ids(labels.classes)?;
        if label_map.len() != classifier.svm.num_classes() {
            return Err(Error::ClassCountMismatch {
                classifier: classifier.svm.num_classes(),
                labels: label_map.len(),
            });
        }

        Ok(Self {
            model_id: classifier.model_id,
            feature_space: classifier.feature_space,
            svm: classifier.svm,
            labels: label_map,
        })
    }
}
