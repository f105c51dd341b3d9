use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use kcfp_core::services::{CorpusBackend, TextFilesBackend, ToolchainBackend};
use kcfp_core::{Corpus, KernelConfig, ProtectionConfig, SkipPolicy, ValidationReport};

/// Where the disassembly, section table and symbol table come from.
#[derive(Debug, Clone, Default)]
pub struct CorpusInputs {
    pub disassembly: Option<String>,
    pub sections: Option<String>,
    pub symbols: Option<String>,
}

/// Build the corpus of `image` from text files when given, else by running the toolchain.
pub fn build_corpus(image: &Path, inputs: &CorpusInputs) -> Result<Corpus> {
    let backend: Box<dyn CorpusBackend> = match (&inputs.disassembly, &inputs.symbols) {
        (Some(disassembly), Some(symbols)) => Box::new(TextFilesBackend {
            disassembly: PathBuf::from(disassembly),
            sections: inputs.sections.as_ref().map(PathBuf::from),
            symbols: PathBuf::from(symbols),
        }),
        (None, None) if inputs.sections.is_none() => Box::new(ToolchainBackend::from_env()),
        _ => {
            return Err(anyhow!(
                "--disassembly and --symbols must be given together (--sections is optional)"
            ))
        }
    };
    backend
        .build_corpus(image)
        .with_context(|| format!("Failed to build corpus for {} ({})", image.display(), backend.name()))
}

/// Read the kernel `.config` and apply the register overrides.
pub fn load_protection(config: &Path, mask_reg: u8, key_reg: u8) -> Result<ProtectionConfig> {
    let kernel = KernelConfig::load(config)
        .with_context(|| format!("Failed to read kernel config {}", config.display()))?;
    let protection = ProtectionConfig::from_kernel(&kernel)
        .with_context(|| format!("Invalid protection settings in {}", config.display()))?;
    Ok(protection.with_registers(mask_reg, key_reg)?)
}

pub fn load_policy(path: Option<&str>) -> Result<SkipPolicy> {
    match path {
        Some(p) => SkipPolicy::load(Path::new(p))
            .with_context(|| format!("Failed to load skip policy {p}")),
        None => Ok(SkipPolicy::default()),
    }
}

/// Parse `0x`-prefixed or bare hex.
pub fn parse_hex(text: &str) -> Result<u64> {
    let digits = text.trim().trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(digits, 16).with_context(|| format!("Invalid hex value: {text}"))
}

pub fn print_report(label: &str, report: &ValidationReport) {
    let errors = report.errors().count();
    let warnings = report.warnings().count();
    println!("{label}: {} ({errors} errors, {warnings} warnings)", if report.is_ok() { "OK" } else { "FAILED" });
    for finding in &report.findings {
        println!("  - {finding}");
    }
}
