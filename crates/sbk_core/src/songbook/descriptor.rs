//! Loading and validating songbook descriptors.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::orchestrator::ConfigurationError;

/// Parsed songbook file.
#[derive(Debug, Clone, PartialEq)]
pub struct SongbookDescriptor {
    source_path: PathBuf,
    entries: Map<String, Value>,
}

impl SongbookDescriptor {
    /// Load a descriptor from a `.sb` file.
    ///
    /// Songbook files are YAML; the older JSON layout parses as well since
    /// JSON is a subset of YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ConfigurationError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigurationError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let descriptor = Self::parse(path, &content)?;
        tracing::debug!(
            "Loaded songbook {} ({} keys)",
            path.display(),
            descriptor.len()
        );
        Ok(descriptor)
    }

    /// Parse descriptor content that was read from `path`.
    pub fn parse(path: impl Into<PathBuf>, content: &str) -> Result<Self, ConfigurationError> {
        let path = path.into();
        let value: Value = serde_yaml::from_str(content)
            .map_err(|e| ConfigurationError::malformed(&path, e.to_string()))?;

        match value {
            Value::Object(entries) => Ok(Self::from_entries(path, entries)),
            Value::Null => Err(ConfigurationError::malformed(&path, "songbook is empty")),
            other => Err(ConfigurationError::malformed(
                &path,
                format!("expected a mapping at top level, found {}", kind_of(&other)),
            )),
        }
    }

    /// Build a descriptor from already-parsed entries.
    pub fn from_entries(path: impl Into<PathBuf>, entries: Map<String, Value>) -> Self {
        Self {
            source_path: path.into(),
            entries,
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Directory containing the songbook file (`.` for bare file names).
    pub fn source_dir(&self) -> PathBuf {
        match self.source_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// File stem of the source path, if it is valid UTF-8.
    pub fn file_stem(&self) -> Option<&str> {
        self.source_path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entries(&self) -> &Map<String, Value> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check the keys the build relies on have a usable shape.
    ///
    /// `book` must be a mapping and `content` a list or a single string.
    /// Other keys are left to the step executors.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if let Some(book) = self.get("book") {
            if !book.is_object() {
                return Err(ConfigurationError::invalid_field(
                    "book",
                    format!("expected a mapping, found {}", kind_of(book)),
                ));
            }
        }

        if let Some(content) = self.get("content") {
            if !(content.is_array() || content.is_string()) {
                return Err(ConfigurationError::invalid_field(
                    "content",
                    format!("expected a list or a string, found {}", kind_of(content)),
                ));
            }
        }

        Ok(())
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}
