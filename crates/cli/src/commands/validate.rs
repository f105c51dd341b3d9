use std::path::Path;

use anyhow::{anyhow, Context, Result};
use kcfp_core::services;

use crate::canonicalize_or_current;
use crate::commands::{build_corpus, load_policy, load_protection, print_report, CorpusInputs};

/// Options of the `validate` command.
#[derive(Debug, Clone)]
pub struct ValidateOptions {
    pub original: String,
    pub instrumented: String,
    pub config: String,
    pub inputs: CorpusInputs,
    pub policy: Option<String>,
    pub mask_reg: u8,
    pub key_reg: u8,
    pub json: bool,
}

/// Re-run the validator over an image instrumented earlier.
///
/// The corpus describes the original image.
pub fn validate_command(opts: &ValidateOptions) -> Result<()> {
    let original = canonicalize_or_current(&opts.original)?;
    let instrumented = canonicalize_or_current(&opts.instrumented)?;
    for path in [&original, &instrumented] {
        if !path.is_file() {
            return Err(anyhow!("Image does not exist: {}", path.display()));
        }
    }
    let protection = load_protection(Path::new(&opts.config), opts.mask_reg, opts.key_reg)?;
    let policy = load_policy(opts.policy.as_deref())?;
    let corpus = build_corpus(&original, &opts.inputs)?;

    let report = services::validate_images(&corpus, &protection, &policy, &original, &instrumented)
        .with_context(|| format!("Failed to validate {}", instrumented.display()))?;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Bytes changed: {}", report.bytes_changed);
        print_report("Validation", &report);
    }

    if report.is_ok() {
        Ok(())
    } else {
        Err(anyhow!("{} validation error(s)", report.errors().count()))
    }
}
