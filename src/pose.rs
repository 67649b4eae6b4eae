use crate::error::Error;
use ndarray::Array2;
use num_traits::{FromPrimitive, ToPrimitive};
use ordered_float::NotNan;
use serde::Deserialize;

/// Body parts reported by the pose service, in COCO order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, num_derive::FromPrimitive, num_derive::ToPrimitive)]
pub(crate) enum KeypointKind {
    Nose,
    Neck,
    RightShoulder,
    RightElbow,
    RightWrist,
    LeftShoulder,
    LeftElbow,
    LeftWrist,
    RightHip,
    RightKnee,
    RightAnkle,
    LeftHip,
    LeftKnee,
    LeftAnkle,
    RightEye,
    LeftEye,
    RightEar,
    LeftEar,
    Background,
}

impl KeypointKind {
    pub(crate) fn idx(self) -> Option<usize> {
        self.to_usize()
    }
}

/// Number of skeleton slots: 18 COCO parts plus background.
pub(crate) const NUM_KEYPOINTS: usize = 19;

/// A single detected body part.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize)]
pub(crate) struct Keypoint {
    #[serde(default)]
    pub(crate) part_id: Option<usize>,
    pub(crate) x: f32,
    pub(crate) y: f32,
}

impl Keypoint {
    pub(crate) fn kind(&self) -> Option<KeypointKind> {
        self.part_id.and_then(KeypointKind::from_usize)
    }
}

/// A skeleton segment in pixel coordinates: `[x1, y1, x2, y2]`.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize)]
pub(crate) struct PoseLine {
    pub(crate) line: [f32; 4],
}

/// One detected person.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Prediction {
    #[serde(default)]
    pub(crate) body_parts: Vec<Keypoint>,
    #[serde(default)]
    pub(crate) pose_lines: Vec<PoseLine>,
}

impl Prediction {
    pub(crate) fn coordinates(&self) -> Result<Array2<f32>, Error> {
        keypoints_to_array(&self.body_parts)
    }

    /// A pose is only trusted as full-body when it has more than `min_pose_lines` segments.
    pub(crate) fn is_full_body(&self, min_pose_lines: usize) -> bool {
        self.pose_lines.len() > min_pose_lines
    }

    /// Body parts the service did not report, in COCO order.
    pub(crate) fn missing_parts(&self) -> Vec<KeypointKind> {
        let mut seen = [false; NUM_KEYPOINTS];
        for kind in self.body_parts.iter().filter_map(Keypoint::kind) {
            if let Some(index) = kind.idx() {
                seen[index] = true;
            }
        }
        seen.iter()
            .enumerate()
            .filter(|(_, &seen)| !seen)
            .filter_map(|(index, _)| KeypointKind::from_usize(index))
            .filter(|&kind| kind != KeypointKind::Background)
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct PoseResponse {
    #[serde(default)]
    pub(crate) predictions: Vec<Prediction>,
}

impl PoseResponse {
    pub(crate) fn first(&self) -> Option<&Prediction> {
        self.predictions.first()
    }

    pub(crate) fn first_full_body(&self, min_pose_lines: usize) -> Option<&Prediction> {
        self.first()
            .filter(|prediction| prediction.is_full_body(min_pose_lines))
    }
}

/// Stack keypoints into an `N x 2` array of `(x, y)` rows, rejecting NaN coordinates.
pub(crate) fn keypoints_to_array(keypoints: &[Keypoint]) -> Result<Array2<f32>, Error> {
    let mut coordinates = Array2::zeros((keypoints.len(), 2));
    for (mut row, keypoint) in coordinates.rows_mut().into_iter().zip(keypoints) {
        row[0] = NotNan::new(keypoint.x)
            .map_err(|e| Error::ConstructNotNan(e, keypoint.x))?
            .into_inner();
        row[1] = NotNan::new(keypoint.y)
            .map_err(|e| Error::ConstructNotNan(e, keypoint.y))?
            .into_inner();
    }
    Ok(coordinates)
}
