//! Per-function skip policy shared by the engine and the validator.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::corpus::Corpus;
use crate::error::{CfpError, CfpResult};
use crate::model::SPRINGBOARD_PREFIX;

/// Named sets of function names exempt from some or all rewrites.
///
/// Loaded from YAML or JSON:
///
/// ```yaml
/// skip: [__do_softirq]
/// skip_asm: [cpu_resume, el1_sync]
/// skip_stp: []
/// skip_blr: [__efi_rt_asm_wrapper]
/// br_allowlist: [__bpf_prog_run]
/// always_unmodified: [jopp_springboard_blr_x0]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SkipPolicy {
    pub skip: BTreeSet<String>,
    pub skip_asm: BTreeSet<String>,
    pub skip_stp: BTreeSet<String>,
    pub skip_blr: BTreeSet<String>,
    pub br_allowlist: BTreeSet<String>,
    pub always_unmodified: BTreeSet<String>,
}

impl SkipPolicy {
    /// Load a policy file; a missing file yields the empty policy.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let body = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let parsed = match ext {
            "json" => serde_json::from_str(&body).map_err(|e| e.to_string()),
            "yaml" | "yml" => serde_yaml::from_str(&body).map_err(|e| e.to_string()),
            other => Err(format!("unsupported policy format {other:?} (expected yaml, yml or json)")),
        };
        parsed.map_err(|reason| ConfigError::Parse { path: path.to_path_buf(), reason })
    }

    /// Excluded from every rewrite.
    pub fn skips_function(&self, name: &str) -> bool {
        name.starts_with(SPRINGBOARD_PREFIX) || self.skip.contains(name) || self.skip_asm.contains(name)
    }

    /// Excluded from return-address masking.
    pub fn skips_stp(&self, name: &str) -> bool {
        self.skips_function(name) || self.skip_stp.contains(name)
    }

    /// Excluded from springboard redirection.
    pub fn skips_blr(&self, name: &str) -> bool {
        self.skips_function(name) || self.skip_blr.contains(name)
    }

    /// Springboards end in `br` by construction.
    pub fn allows_br(&self, name: &str) -> bool {
        name.starts_with(SPRINGBOARD_PREFIX) || self.br_allowlist.contains(name)
    }

    /// Every name in the rewrite-affecting lists must be a function of the corpus.
    pub fn check_against(&self, corpus: &Corpus) -> CfpResult<()> {
        let lists = [
            &self.skip,
            &self.skip_asm,
            &self.skip_stp,
            &self.skip_blr,
            &self.always_unmodified,
        ];
        match lists.into_iter().flatten().find(|name| corpus.function(name).is_none()) {
            Some(name) => Err(CfpError::MissingSymbol(name.clone())),
            None => Ok(()),
        }
    }
}
