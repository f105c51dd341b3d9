//! Independent checks of an instrumented image.
//!
//! Findings never abort: every check runs to completion and the results are
//! merged into a single [`ValidationReport`]. Only [`Severity::Error`]
//! findings fail a run.

mod diff;
mod output;
mod sanity;

use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::ProtectionConfig;
use crate::corpus::Corpus;
use crate::error::CfpResult;
use crate::image::ImageSnapshot;
use crate::policy::SkipPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    BinaryDiff,
    InstrumentedOutput,
    PreImageSanity,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Check::BinaryDiff => "binary-diff",
            Check::InstrumentedOutput => "instrumented-output",
            Check::PreImageSanity => "pre-image-sanity",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub check: Check,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_offset: Option<u64>,
}

impl Finding {
    pub(crate) fn error(check: Check, message: impl Into<String>) -> Self {
        Self {
            check,
            severity: Severity::Error,
            message: message.into(),
            function: None,
            address: None,
            file_offset: None,
        }
    }

    pub(crate) fn warning(check: Check, message: impl Into<String>) -> Self {
        Self { severity: Severity::Warning, ..Self::error(check, message) }
    }

    pub(crate) fn in_function(mut self, name: &str) -> Self {
        self.function = Some(name.to_string());
        self
    }

    pub(crate) fn at(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }

    pub(crate) fn at_offset(mut self, offset: u64) -> Self {
        self.file_offset = Some(offset);
        self
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "[{}] {level}: {}", self.check, self.message)?;
        if let Some(function) = &self.function {
            write!(f, " (in {function})")?;
        }
        if let Some(address) = self.address {
            write!(f, " at {address:#x}")?;
        }
        Ok(())
    }
}

/// Aggregated findings of one validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub findings: Vec<Finding>,
    /// Number of bytes that differ between the pre- and post-image.
    pub bytes_changed: usize,
}

impl ValidationReport {
    /// No error findings (warnings allowed).
    pub fn is_ok(&self) -> bool {
        !self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Warning)
    }

    pub fn extend(&mut self, other: ValidationReport) {
        self.findings.extend(other.findings);
        self.bytes_changed += other.bytes_changed;
    }
}

pub struct Validator<'a> {
    corpus: &'a Corpus,
    config: &'a ProtectionConfig,
    policy: &'a SkipPolicy,
}

impl<'a> Validator<'a> {
    pub fn new(corpus: &'a Corpus, config: &'a ProtectionConfig, policy: &'a SkipPolicy) -> Self {
        Self { corpus, config, policy }
    }

    /// Sanity checks of the image before anything is written.
    pub fn check_pre_image(&self, pre: &ImageSnapshot) -> CfpResult<ValidationReport> {
        let report = sanity::check(self.corpus, self.config, pre)?;
        log_report("pre-image", &report);
        Ok(report)
    }

    /// Run the three checks in parallel and merge their findings.
    pub fn validate(&self, pre: &ImageSnapshot, post: &ImageSnapshot) -> CfpResult<ValidationReport> {
        let ((diffed, decoded), sane) = rayon::join(
            || {
                rayon::join(
                    || diff::check(self.corpus, self.policy, pre, post),
                    || output::check(self.corpus, self.config, self.policy, post),
                )
            },
            || sanity::check(self.corpus, self.config, pre),
        );
        let mut report = diffed?;
        report.extend(decoded?);
        report.extend(sane?);
        log_report("post-image", &report);
        Ok(report)
    }
}

fn log_report(stage: &str, report: &ValidationReport) {
    for finding in &report.findings {
        warn!(stage, "{finding}");
    }
    info!(
        stage,
        errors = report.errors().count(),
        warnings = report.warnings().count(),
        bytes_changed = report.bytes_changed,
        "validation finished"
    );
}
