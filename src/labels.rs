use crate::error::Error;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Bidirectional mapping between class ids `0..K` and class labels.
///
/// Ids follow the sorted order of the distinct labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LabelMap {
    classes: Vec<String>,
}

impl LabelMap {
    pub(crate) fn fit<S>(labels: &[S]) -> Self
    where
        S: AsRef<str>,
    {
        let classes = labels
            .iter()
            .map(|label| label.as_ref())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_owned)
            .collect();
        Self { classes }
    }

    pub(crate) fn len(&self) -> usize {
        self.classes.len()
    }

    pub(crate) fn classes(&self) -> &[String] {
        &self.classes
    }

    pub(crate) fn id(&self, label: &str) -> Result<usize, Error> {
        self.classes
            .iter()
            .position(|class| class == label)
            .ok_or_else(|| Error::UnknownLabel(label.to_owned()))
    }

    pub(crate) fn label(&self, id: usize) -> Result<&str, Error> {
        self.classes
            .get(id)
            .map(String::as_str)
            .ok_or(Error::UnknownClassId(id))
    }

    pub(crate) fn encode<S>(&self, labels: &[S]) -> Result<Array1<usize>, Error>
    where
        S: AsRef<str>,
    {
        labels.iter().map(|label| self.id(label.as_ref())).collect()
    }

    pub(crate) fn to_ids(&self) -> BTreeMap<usize, String> {
        self.classes.iter().cloned().enumerate().collect()
    }

    /// Rebuild from a persisted id map, which must cover `0..K` without gaps.
    pub(crate) fn from_ids(ids: BTreeMap<usize, String>) -> Result<Self, Error> {
        let classes = ids
            .into_iter()
            .enumerate()
            .map(|(expected, (id, label))| {
                if id == expected {
                    Ok(label)
                } else {
                    Err(Error::SparseLabelMap(expected))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { classes })
    }
}

/// Integer-encode labels, returning the encoded sequence and the map that decodes it.
pub(crate) fn encode_labels<S>(labels: &[S]) -> Result<(Array1<usize>, LabelMap), Error>
where
    S: AsRef<str>,
{
    let map = LabelMap::fit(labels);
    Ok((map.encode(labels)?, map))
}

/// On-disk form of a [`LabelMap`].
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LabelArtifact {
    pub(crate) schema_version: u32,
    pub(crate) model_id: uuid::Uuid,
    pub(crate) classes: BTreeMap<usize, String>,
}
