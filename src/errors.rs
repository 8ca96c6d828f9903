// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::fmt;

use thiserror::Error;

use crate::types::BuildStage;

#[derive(Error, Debug)]
pub enum BuildGraphError {
    #[error("Invalid image definition: {0}")]
    InvalidDefinition(String),

    #[error("Duplicate image definition: '{0}' is already defined")]
    DuplicateNode(String),

    #[error("Cycle detected in image graph: {0}")]
    CycleDetected(String),

    #[error("Undefined images referenced: {}", format_orphans(.0))]
    OrphanReference(Vec<OrphanReference>),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Build plan error: {0}")]
    PlanError(String),

    #[error("Build of '{image}' failed during {stage}: {message}")]
    BuildFailed {
        image: String,
        stage: BuildStage,
        message: String,
    },

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("Build cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BuildGraphError {
    /// Convenience constructor for a failed build of `image` at `stage`.
    pub fn build_failed(image: impl Into<String>, stage: BuildStage, message: impl fmt::Display) -> Self {
        BuildGraphError::BuildFailed {
            image: image.into(),
            stage,
            message: message.to_string(),
        }
    }
}

/// An image referenced as parent or child that never got its own definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanReference {
    /// `name:version` of the missing definition.
    pub image: String,
    /// `name:version` of every defined image that points at it.
    pub referenced_by: Vec<String>,
}

impl fmt::Display for OrphanReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.referenced_by.is_empty() {
            write!(f, "'{}'", self.image)
        } else {
            write!(
                f,
                "'{}' (referenced by {})",
                self.image,
                self.referenced_by.join(", ")
            )
        }
    }
}

fn format_orphans(orphans: &[OrphanReference]) -> String {
    orphans
        .iter()
        .map(|o| o.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Every failure collected from one build invocation.
///
/// Sibling steps are never cancelled because one of them failed, so this
/// carries the complete picture: each failed build, the steps skipped
/// because something upstream did not succeed, and the steps stopped by a
/// cancellation that arrived after something had already failed.
#[derive(Error, Debug, Default)]
pub struct AggregateError {
    failures: Vec<BuildGraphError>,
    skipped: Vec<String>,
    cancelled: Vec<String>,
}

impl AggregateError {
    pub fn new(failures: Vec<BuildGraphError>, skipped: Vec<String>) -> Self {
        Self {
            failures,
            skipped,
            cancelled: Vec::new(),
        }
    }

    /// Record the steps that were cancelled.
    pub fn with_cancelled(mut self, cancelled: Vec<String>) -> Self {
        self.cancelled = cancelled;
        self
    }

    pub fn failures(&self) -> &[BuildGraphError] {
        &self.failures
    }

    /// `name:version` of steps that never ran because a parent did not succeed.
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// `name:version` of steps stopped by cancellation.
    pub fn cancelled(&self) -> &[String] {
        &self.cancelled
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty() && self.cancelled.is_empty()
    }

    /// Images named by `BuildFailed` entries, nested aggregates included.
    pub fn failed_images(&self) -> Vec<String> {
        let mut out = Vec::new();
        for failure in &self.failures {
            match failure {
                BuildGraphError::BuildFailed { image, .. } => out.push(image.clone()),
                BuildGraphError::Aggregate(inner) => out.extend(inner.failed_images()),
                _ => {}
            }
        }
        out
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} image build(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  - {failure}")?;
        }
        if !self.skipped.is_empty() {
            write!(
                f,
                "\n  skipped after upstream failure: {}",
                self.skipped.join(", ")
            )?;
        }
        if !self.cancelled.is_empty() {
            write!(f, "\n  cancelled: {}", self.cancelled.join(", "))?;
        }
        Ok(())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, BuildGraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_message_lists_every_failure() {
        let agg = AggregateError::new(
            vec![
                BuildGraphError::build_failed("mid:v1", BuildStage::Execute, "exit code 2"),
                BuildGraphError::build_failed("other:v3", BuildStage::Dispatch, "queue closed"),
            ],
            vec!["leaf:v1".to_string()],
        );

        let msg = agg.to_string();
        assert!(msg.starts_with("2 image build(s) failed"));
        assert!(msg.contains("'mid:v1' failed during execute: exit code 2"));
        assert!(msg.contains("'other:v3' failed during dispatch"));
        assert!(msg.contains("skipped after upstream failure: leaf:v1"));
        assert_eq!(agg.failed_images(), vec!["mid:v1", "other:v3"]);
    }

    #[test]
    fn aggregate_message_lists_cancelled_steps() {
        let agg = AggregateError::new(
            vec![BuildGraphError::build_failed("a:v1", BuildStage::Execute, "exit code 1")],
            vec![],
        )
        .with_cancelled(vec!["b:v1".to_string()]);

        assert_eq!(agg.cancelled(), &["b:v1".to_string()]);
        let msg = agg.to_string();
        assert!(msg.contains("'a:v1' failed during execute"));
        assert!(msg.contains("cancelled: b:v1"));
    }

    #[test]
    fn orphan_message_names_referrers() {
        let err = BuildGraphError::OrphanReference(vec![
            OrphanReference {
                image: "base:v1".into(),
                referenced_by: vec!["mid:v1".into(), "mid:v2".into()],
            },
            OrphanReference {
                image: "tools:v9".into(),
                referenced_by: vec![],
            },
        ]);

        let msg = err.to_string();
        assert!(msg.contains("'base:v1' (referenced by mid:v1, mid:v2)"));
        assert!(msg.contains("'tools:v9'"));
    }
}
