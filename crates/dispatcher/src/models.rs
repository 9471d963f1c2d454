//! Ordered model candidates
//!
//! The first model is the primary; the rest are backups tried in listed
//! order. The list is fixed at construction and never reordered, so every
//! dispatch starts from the primary regardless of which model last succeeded.

use crate::error::{Error, Result};

/// One model id with an optional human-readable label for logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCandidate {
    pub id: String,
    pub label: Option<String>,
}

impl ModelCandidate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
        }
    }

    pub fn labeled(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: Some(label.into()),
        }
    }

    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// Non-empty, ordered list of models.
#[derive(Debug, Clone)]
pub struct ModelCandidates {
    models: Vec<ModelCandidate>,
}

impl ModelCandidates {
    /// `[primary] + backups`, rejecting an empty list or blank ids.
    pub fn new(primary: ModelCandidate, backups: Vec<ModelCandidate>) -> Result<Self> {
        let mut models = Vec::with_capacity(backups.len() + 1);
        models.push(primary);
        models.extend(backups);
        Self::from_candidates(models)
    }

    pub fn from_ids<I, S>(ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_candidates(ids.into_iter().map(ModelCandidate::new).collect())
    }

    fn from_candidates(models: Vec<ModelCandidate>) -> Result<Self> {
        if models.is_empty() {
            return Err(Error::NoModels);
        }
        if let Some(bad) = models.iter().find(|m| m.id.trim().is_empty()) {
            return Err(Error::InvalidModel(bad.id.clone()));
        }
        Ok(Self { models })
    }

    pub fn primary(&self) -> &ModelCandidate {
        &self.models[0]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ModelCandidate> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
