use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use super::CorpusBackend;
use crate::corpus::Corpus;
use crate::error::{CfpError, CfpResult};

/// Runs the cross toolchain's `objdump` and `nm` against the image.
#[derive(Debug, Clone)]
pub struct ToolchainBackend {
    pub objdump: PathBuf,
    pub nm: PathBuf,
}

impl ToolchainBackend {
    /// `KCFP_OBJDUMP`/`KCFP_NM` when set, else `${CROSS_COMPILE}objdump`/`${CROSS_COMPILE}nm`.
    pub fn from_env() -> Self {
        let prefix = env::var("CROSS_COMPILE").unwrap_or_default();
        let tool = |var: &str, name: &str| {
            env::var_os(var).map(PathBuf::from).unwrap_or_else(|| PathBuf::from(format!("{prefix}{name}")))
        };
        Self { objdump: tool("KCFP_OBJDUMP", "objdump"), nm: tool("KCFP_NM", "nm") }
    }

    fn run(&self, tool: &Path, args: &[&str], image: &Path) -> CfpResult<String> {
        debug!(tool = %tool.display(), ?args, image = %image.display(), "running");
        let output = Command::new(tool).args(args).arg(image).output().map_err(|e| {
            CfpError::Toolchain(format!("failed to spawn {}: {e}", tool.display()))
        })?;
        if !output.status.success() {
            return Err(CfpError::Toolchain(format!(
                "{} {} exited with {}: {}",
                tool.display(),
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl CorpusBackend for ToolchainBackend {
    fn build_corpus(&self, image: &Path) -> CfpResult<Corpus> {
        info!(backend = self.name(), objdump = %self.objdump.display(), nm = %self.nm.display(), "disassembling");
        let disassembly = self.run(&self.objdump, &["-d"], image)?;
        let sections = self.run(&self.objdump, &["-h"], image)?;
        let symbols = self.run(&self.nm, &[], image)?;
        Corpus::build(&disassembly, &sections, &symbols)
    }

    fn name(&self) -> &'static str {
        "toolchain"
    }
}
