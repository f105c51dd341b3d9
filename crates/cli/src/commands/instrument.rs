use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use kcfp_core::engine::{AuditFinding, PassStats};
use kcfp_core::image::ImageTarget;
use kcfp_core::services::{self, InstrumentReport, InstrumentRequest, RunStatus};
use kcfp_core::validate::Finding;
use kcfp_core::{InstrumentScope, ProtectionConfig};
use serde::Serialize;

use crate::commands::{build_corpus, load_policy, load_protection, print_report, CorpusInputs};
use crate::{canonicalize_or_current, sha256_file};

/// Options of the `instrument` command.
#[derive(Debug, Clone)]
pub struct InstrumentOptions {
    pub image: String,
    pub config: String,
    pub output: Option<String>,
    pub in_place: bool,
    pub threads: usize,
    pub inputs: CorpusInputs,
    pub policy: Option<String>,
    pub function: Option<String>,
    pub function_line: Option<usize>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub keep_copies: Option<String>,
    pub mask_reg: u8,
    pub key_reg: u8,
    pub skip_validation: bool,
    pub report: Option<String>,
    pub json: bool,
}

/// Machine-readable record of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub tool_version: String,
    pub started_at: String,
    pub finished_at: String,
    pub image: String,
    pub image_sha256: String,
    pub output: Option<String>,
    pub output_sha256: Option<String>,
    pub config: ProtectionConfig,
    pub status: RunStatus,
    pub patches: usize,
    pub stats: Option<PassStats>,
    pub audit: Vec<AuditFinding>,
    pub findings: Vec<Finding>,
}

impl RunSummary {
    fn new(
        started_at: String,
        image: &Path,
        config: ProtectionConfig,
        report: &InstrumentReport,
    ) -> Result<Self> {
        let output_sha256 = match &report.target {
            Some(target) => Some(sha256_file(target)?),
            None => None,
        };
        let mut findings = report.pre_check.findings.clone();
        if let Some(validation) = &report.validation {
            findings.extend(validation.findings.iter().cloned());
        }
        Ok(Self {
            tool_version: kcfp_core::version().to_string(),
            started_at,
            finished_at: Utc::now().to_rfc3339(),
            image: image.display().to_string(),
            image_sha256: sha256_file(image)?,
            output: report.target.as_ref().map(|p| p.display().to_string()),
            output_sha256,
            config,
            status: report.status,
            patches: report.outcome.as_ref().map(|o| o.patches.len()).unwrap_or(0),
            stats: report.outcome.as_ref().map(|o| o.stats),
            audit: report.outcome.as_ref().map(|o| o.audit.clone()).unwrap_or_default(),
            findings,
        })
    }
}

fn scope_from(opts: &InstrumentOptions) -> Result<InstrumentScope> {
    match (&opts.function, &opts.from, &opts.to) {
        (Some(name), None, None) => {
            Ok(InstrumentScope::Function { name: name.clone(), line: opts.function_line })
        }
        (None, Some(start), Some(end)) => {
            Ok(InstrumentScope::Range { start: start.clone(), end: end.clone() })
        }
        (None, None, None) => Ok(InstrumentScope::All),
        _ => Err(anyhow!("use either --function or both --from and --to")),
    }
}

/// Instrument an image and validate the result.
pub fn instrument_command(opts: &InstrumentOptions) -> Result<()> {
    let started_at = Utc::now().to_rfc3339();
    let image = canonicalize_or_current(&opts.image)?;
    if !image.is_file() {
        return Err(anyhow!("Image does not exist: {}", image.display()));
    }
    let config_path = PathBuf::from(&opts.config);
    let protection = load_protection(&config_path, opts.mask_reg, opts.key_reg)?;
    let policy = load_policy(opts.policy.as_deref())?;
    let scope = scope_from(opts)?;
    let corpus = build_corpus(&image, &opts.inputs)?;

    let target = if opts.in_place {
        ImageTarget::InPlace
    } else {
        ImageTarget::Copy(
            opts.output.as_ref().map(PathBuf::from).unwrap_or_else(|| services::default_output_path(&image)),
        )
    };

    let keep_copies = opts.keep_copies.as_ref().map(PathBuf::from);
    if let Some(dir) = &keep_copies {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create copies dir: {}", dir.display()))?;
        fs::copy(&config_path, dir.join("config")).with_context(|| {
            format!("Failed to copy {} into {}", config_path.display(), dir.display())
        })?;
    }

    let request = InstrumentRequest {
        target,
        policy,
        scope,
        threads: opts.threads.max(1),
        validate: !opts.skip_validation,
        keep_copies,
        ..InstrumentRequest::new(&image, protection)
    };
    let report = services::instrument(&corpus, &request)
        .with_context(|| format!("Failed to instrument {}", image.display()))?;

    let summary = RunSummary::new(started_at, &image, protection, &report)?;
    if let Some(path) = &opts.report {
        let json = serde_json::to_string_pretty(&summary)?;
        fs::write(path, json).with_context(|| format!("Failed to write run report: {path}"))?;
    }

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_human(&summary, &report);
    }

    match report.status {
        RunStatus::Instrumented => Ok(()),
        RunStatus::Rejected => Err(anyhow!("Pre-image checks failed; nothing was written")),
        RunStatus::ValidationFailed => Err(anyhow!("Validation of the instrumented image failed")),
    }
}

fn print_human(summary: &RunSummary, report: &InstrumentReport) {
    println!("kcfp v{}", summary.tool_version);
    println!("  Image: {}", summary.image);
    println!("  ROPP: {}  JOPP: {}", summary.config.ropp, summary.config.jopp);
    if let Some(output) = &summary.output {
        println!("  Output: {output}");
    }
    if let Some(stats) = &summary.stats {
        println!("  Functions scanned: {}", stats.functions_scanned);
        println!("  Returns masked: {}", stats.returns_masked);
        println!("  Springboards: {}", stats.springboards);
        println!("  Landing pads: {}", stats.landing_pads);
        println!("  Patches: {}", summary.patches);
    }
    for entry in &summary.audit {
        match entry {
            AuditFinding::AdditionalEpilogue { function, address, .. } => {
                println!("  Audit: additional epilogue in {} at {address:#x}", function.name);
            }
        }
    }
    print_report("Pre-image checks", &report.pre_check);
    if let Some(validation) = &report.validation {
        print_report("Validation", validation);
    }
}
