//! End-to-end instrumentation run: pre-image checks, planning, patching and
//! validation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::ProtectionConfig;
use crate::corpus::Corpus;
use crate::engine::{Engine, EngineOutcome, InstrumentScope};
use crate::error::{CfpError, CfpResult};
use crate::image::{ImageAccessor, ImageSnapshot, ImageTarget};
use crate::policy::SkipPolicy;
use crate::validate::{ValidationReport, Validator};

/// Everything one instrumentation run needs besides the corpus.
#[derive(Debug, Clone)]
pub struct InstrumentRequest {
    pub image: PathBuf,
    pub target: ImageTarget,
    pub config: ProtectionConfig,
    pub policy: SkipPolicy,
    pub scope: InstrumentScope,
    pub threads: usize,
    pub validate: bool,
    /// Directory receiving a copy of the pre-image and the patched image.
    pub keep_copies: Option<PathBuf>,
}

impl InstrumentRequest {
    pub fn new(image: impl Into<PathBuf>, config: ProtectionConfig) -> Self {
        let image = image.into();
        Self {
            target: ImageTarget::Copy(default_output_path(&image)),
            image,
            config,
            policy: SkipPolicy::default(),
            scope: InstrumentScope::All,
            threads: 1,
            validate: true,
            keep_copies: None,
        }
    }
}

/// `<image>.instr` next to the image.
pub fn default_output_path(image: &Path) -> PathBuf {
    let mut name = image.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".instr");
    image.with_file_name(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Patched and, if requested, validated cleanly.
    Instrumented,
    /// The pre-image failed its sanity checks; nothing was written.
    Rejected,
    /// Patched, but validation found errors.
    ValidationFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstrumentReport {
    pub status: RunStatus,
    pub target: Option<PathBuf>,
    pub pre_check: ValidationReport,
    pub outcome: Option<EngineOutcome>,
    pub validation: Option<ValidationReport>,
}

impl InstrumentReport {
    pub fn is_ok(&self) -> bool {
        self.status == RunStatus::Instrumented
    }
}

/// Instrument `request.image` as described by `corpus`.
pub fn instrument(corpus: &Corpus, request: &InstrumentRequest) -> CfpResult<InstrumentReport> {
    request.policy.check_against(corpus)?;
    let validator = Validator::new(corpus, &request.config, &request.policy);

    let pristine = ImageSnapshot::open(&request.image)?;
    let pre_check = validator.check_pre_image(&pristine)?;
    if !pre_check.is_ok() {
        error!(image = %request.image.display(), "pre-image rejected; nothing written");
        return Ok(InstrumentReport {
            status: RunStatus::Rejected,
            target: None,
            pre_check,
            outcome: None,
            validation: None,
        });
    }

    let outcome = Engine::new(corpus, &request.config, &request.policy)
        .threads(request.threads)
        .plan(&pristine, &request.scope)?;

    if let Some(dir) = &request.keep_copies {
        keep_copy(dir, &request.image, "pre", pristine.bytes())?;
    }

    let mut accessor = ImageAccessor::open(corpus, pristine, &request.target)?;
    outcome.apply(&mut accessor)?;
    let target = accessor.target_path().to_path_buf();
    let pristine = accessor.into_pristine();

    if let Some(dir) = &request.keep_copies {
        let patched = fs::read(&target).map_err(|e| CfpError::io(&target, e))?;
        keep_copy(dir, &request.image, "instr", &patched)?;
    }

    let validation = if request.validate {
        let post = ImageSnapshot::open(&target)?;
        Some(validator.validate(&pristine, &post)?)
    } else {
        warn!("validation skipped");
        None
    };

    let status = match &validation {
        Some(report) if !report.is_ok() => RunStatus::ValidationFailed,
        _ => RunStatus::Instrumented,
    };
    info!(?status, target = %target.display(), "run finished");
    Ok(InstrumentReport { status, target: Some(target), pre_check, outcome: Some(outcome), validation })
}

/// Validate an already instrumented image against its pre-image.
pub fn validate_images(
    corpus: &Corpus,
    config: &ProtectionConfig,
    policy: &SkipPolicy,
    original: &Path,
    instrumented: &Path,
) -> CfpResult<ValidationReport> {
    let pre = ImageSnapshot::open(original)?;
    let post = ImageSnapshot::open(instrumented)?;
    Validator::new(corpus, config, policy).validate(&pre, &post)
}

fn keep_copy(dir: &Path, image: &Path, suffix: &str, bytes: &[u8]) -> CfpResult<()> {
    fs::create_dir_all(dir).map_err(|e| CfpError::io(dir, e))?;
    let mut name = image.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{suffix}"));
    let path = dir.join(name);
    fs::write(&path, bytes).map_err(|e| CfpError::io(&path, e))?;
    info!(copy = %path.display(), "kept copy");
    Ok(())
}
