//! Simulated parameter values, loaded once from a flat JSON document.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Name-to-value map joined against the dictionary's `ParameterName` keys.
///
/// Values are static for the lifetime of the emulator; range checking is the
/// job of the external test harness, not this store.
#[derive(Debug)]
pub struct ValueStore {
    values: HashMap<String, i64>,
}

#[derive(Debug)]
pub enum ValueStoreError {
    /// The values file is missing or unreadable. Fatal at startup.
    Unavailable { path: PathBuf, source: io::Error },
    /// The document is not a flat JSON object of integer values.
    Malformed(serde_json::Error),
}

impl fmt::Display for ValueStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { path, source } => {
                write!(f, "cannot read values file {:?}: {}", path, source)
            }
            Self::Malformed(e) => write!(f, "values file is not a flat object of integers: {}", e),
        }
    }
}

impl Error for ValueStoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Unavailable { source, .. } => Some(source),
            Self::Malformed(e) => Some(e),
        }
    }
}

impl ValueStore {
    pub fn load(path: &Path) -> Result<Self, ValueStoreError> {
        let content = fs::read_to_string(path).map_err(|source| ValueStoreError::Unavailable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ValueStoreError> {
        let values: HashMap<String, i64> =
            serde_json::from_str(content).map_err(ValueStoreError::Malformed)?;
        Ok(Self { values })
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.values.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
