use crate::{error::Error, pose::NUM_KEYPOINTS};
use ndarray::{s, Array2, ArrayView2, ArrayViewMut1, Axis};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::warn;

/// Rows in an assembled skeleton feature.
pub(crate) const SKELETON_SIZE: usize = NUM_KEYPOINTS;

/// Length of a flattened skeleton feature.
pub(crate) const FEATURE_DIM: usize = SKELETON_SIZE * 2;

/// Coordinate system keypoints are projected into before classification.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum FeatureSpace {
    /// Centered `(rho, phi)` pairs, rho scaled to `[0, 1]`.
    Polar,
    /// Raw `(x, y)` pairs, each column scaled by its largest magnitude.
    Cartesian,
}

impl Default for FeatureSpace {
    fn default() -> Self {
        Self::Polar
    }
}

impl FeatureSpace {
    pub(crate) fn transform(self, coordinates: ArrayView2<f32>) -> Result<Array2<f32>, Error> {
        match self {
            Self::Polar => to_polar(coordinates),
            Self::Cartesian => normalize_cartesian(coordinates),
        }
    }

    /// Transform a keypoint set and assemble it into a fixed-size skeleton feature.
    pub(crate) fn extract(self, coordinates: ArrayView2<f32>) -> Result<Array2<f32>, Error> {
        Ok(assemble(self.transform(coordinates)?))
    }
}

fn check_keypoints(coordinates: &ArrayView2<f32>) -> Result<(), Error> {
    match coordinates.dim() {
        (0, _) => Err(Error::EmptyKeypoints),
        (_, 2) => Ok(()),
        (_, ncols) => Err(Error::KeypointColumns(ncols)),
    }
}

/// Divide a column by its largest magnitude. All-zero columns are left alone.
fn normalize_max(mut column: ArrayViewMut1<f32>) {
    let max = column.iter().fold(0.0_f32, |max, &value| max.max(value.abs()));
    if max > 0.0 {
        column.mapv_inplace(|value| value / max);
    }
}

/// Convert `(x, y)` keypoints to `(rho, phi)` around their centroid.
///
/// Output rho lies in `[0, 1]`, phi in `(-pi, pi]`. Translating or uniformly scaling the
/// input leaves the output unchanged.
pub(crate) fn to_polar(coordinates: ArrayView2<f32>) -> Result<Array2<f32>, Error> {
    check_keypoints(&coordinates)?;
    let centroid = coordinates
        .mean_axis(Axis(0))
        .ok_or(Error::EmptyKeypoints)?;
    let centered = &coordinates - &centroid;

    let mut polar = Array2::zeros(centered.raw_dim());
    for (point, mut out) in centered.rows().into_iter().zip(polar.rows_mut()) {
        let (x, y) = (point[0], point[1]);
        out[0] = x.hypot(y);
        out[1] = y.atan2(x);
    }
    normalize_max(polar.column_mut(0));
    Ok(polar)
}

/// Scale x and y independently by their largest magnitude, without centering.
pub(crate) fn normalize_cartesian(coordinates: ArrayView2<f32>) -> Result<Array2<f32>, Error> {
    check_keypoints(&coordinates)?;
    let mut normalized = coordinates.to_owned();
    normalize_max(normalized.column_mut(0));
    normalize_max(normalized.column_mut(1));
    Ok(normalized)
}

/// Zero-pad (or truncate) a transformed keypoint set to exactly [`SKELETON_SIZE`] rows.
pub(crate) fn assemble(features: Array2<f32>) -> Array2<f32> {
    let rows = features.nrows();
    match rows.cmp(&SKELETON_SIZE) {
        Ordering::Equal => features,
        Ordering::Greater => {
            warn!(
                message = "truncating oversized keypoint set",
                rows,
                kept = SKELETON_SIZE
            );
            features.slice(s![..SKELETON_SIZE, ..]).to_owned()
        }
        Ordering::Less => {
            let mut padded = Array2::zeros((SKELETON_SIZE, features.ncols()));
            padded.slice_mut(s![..rows, ..]).assign(&features);
            padded
        }
    }
}

/// Flatten skeleton features into one `FEATURE_DIM`-wide row per sample, row-major.
pub(crate) fn flatten(features: &[Array2<f32>]) -> Result<Array2<f64>, Error> {
    let mut flat = Array2::zeros((features.len(), FEATURE_DIM));
    for (feature, mut row) in features.iter().zip(flat.rows_mut()) {
        if feature.dim() != (SKELETON_SIZE, 2) {
            return Err(Error::FeatureShape(feature.dim()));
        }
        for (dst, &src) in row.iter_mut().zip(feature.iter()) {
            *dst = f64::from(src);
        }
    }
    Ok(flat)
}

/// Inverse of [`flatten`]: one 19×2 skeleton per row of 38 values.
pub(crate) fn unflatten(records: &Array2<f64>) -> Result<Vec<Array2<f32>>, Error> {
    if records.ncols() != FEATURE_DIM {
        return Err(Error::FeatureDimension {
            expected: FEATURE_DIM,
            got: records.ncols(),
        });
    }
    records
        .rows()
        .into_iter()
        .map(|row| {
            let values = row.iter().map(|&value| value as f32).collect();
            Array2::from_shape_vec((SKELETON_SIZE, 2), values).map_err(Error::ReshapeFeatures)
        })
        .collect()
}
