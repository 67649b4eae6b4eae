use crate::error::Error;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Version written into, and required of, every persisted artifact.
pub(crate) const SCHEMA_VERSION: u32 = 1;

/// Locations of the training corpus and model artifacts under one directory.
#[derive(Debug, Clone)]
pub(crate) struct Assets {
    root: PathBuf,
}

impl Assets {
    pub(crate) fn new<P>(root: P) -> Self
    where
        P: AsRef<Path>,
    {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub(crate) fn images(&self) -> PathBuf {
        self.root.join("images")
    }

    pub(crate) fn classifier(&self) -> PathBuf {
        self.root.join("classifier.json")
    }

    pub(crate) fn classes(&self) -> PathBuf {
        self.root.join("classes.json")
    }

    pub(crate) fn ideal_poses(&self) -> PathBuf {
        self.root.join("ideal_poses.json")
    }
}

pub(crate) fn write_json<T>(path: &Path, value: &T) -> Result<(), Error>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::WriteFile(e, parent.to_path_buf()))?;
    }
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| Error::SerializeArtifact(e, path.to_path_buf()))?;
    fs::write(path, bytes).map_err(|e| Error::WriteFile(e, path.to_path_buf()))
}

pub(crate) fn read_json<T>(path: &Path) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    let bytes = fs::read(path).map_err(|e| Error::ReadFile(e, path.to_path_buf()))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::ParseArtifact(e, path.to_path_buf()))
}

pub(crate) fn check_schema(found: u32, path: &Path) -> Result<(), Error> {
    if found == SCHEMA_VERSION {
        Ok(())
    } else {
        Err(Error::SchemaVersion {
            path: path.to_path_buf(),
            found,
            expected: SCHEMA_VERSION,
        })
    }
}
