//! Instrumentation engine: the JOPP and ROPP rewrite passes.
//!
//! Functions, ordered by label line, are split into contiguous partitions that
//! are scanned in parallel. Each partition produces an ordered list of word
//! [`Patch`]es; nothing is written until every partition has succeeded, after
//! which [`EngineOutcome::apply`] writes the patches in partition order.

mod pending;
mod scan;

pub use pending::PendingPrologueRewrite;

use std::ops::AddAssign;

use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::config::ProtectionConfig;
use crate::corpus::Corpus;
use crate::error::{CfpError, CfpResult};
use crate::image::{ImageAccessor, ImageSnapshot};
use crate::model::FunctionId;
use crate::policy::SkipPolicy;
use scan::PartitionScan;

/// Which functions a run instruments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InstrumentScope {
    #[default]
    All,
    /// One definition; `line` picks among duplicate names.
    Function { name: String, line: Option<usize> },
    /// All definitions from `start` through `end`, by listing order.
    Range { start: String, end: String },
}

impl InstrumentScope {
    pub fn resolve(&self, corpus: &Corpus) -> CfpResult<Vec<FunctionId>> {
        match self {
            InstrumentScope::All => Ok(corpus.functions().cloned().collect()),
            InstrumentScope::Function { name, line } => {
                Ok(vec![corpus.resolve_function(name, *line)?])
            }
            InstrumentScope::Range { start, end } => {
                let first = corpus.resolve_function(start, None)?;
                let last = corpus.resolve_function(end, None)?;
                if last.line < first.line {
                    return Err(CfpError::malformed(
                        last.line + 1,
                        format!("range end {end} precedes start {start}"),
                    ));
                }
                Ok(corpus
                    .functions()
                    .filter(|f| f.line >= first.line && f.line <= last.line)
                    .cloned()
                    .collect())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchKind {
    LandingPad,
    Springboard,
    PrologueMask,
    PrologueStore,
    EpilogueLoad,
    EpilogueUnmask,
}

/// One instruction word to overwrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Patch {
    pub line: usize,
    pub address: u64,
    pub file_offset: u64,
    pub original: u32,
    pub replacement: u32,
    pub kind: PatchKind,
    /// Function being instrumented when the patch was produced.
    pub function: String,
}

/// Something the engine noticed but deliberately left alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditFinding {
    /// A second epilogue after the function's prologue was already committed.
    AdditionalEpilogue { function: FunctionId, line: usize, address: u64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    pub functions_scanned: usize,
    pub functions_skipped: usize,
    pub landing_pads: usize,
    pub springboards: usize,
    pub returns_masked: usize,
    pub prologues_unmatched: usize,
    pub epilogues_skipped: usize,
}

impl AddAssign for PassStats {
    fn add_assign(&mut self, other: Self) {
        self.functions_scanned += other.functions_scanned;
        self.functions_skipped += other.functions_skipped;
        self.landing_pads += other.landing_pads;
        self.springboards += other.springboards;
        self.returns_masked += other.returns_masked;
        self.prologues_unmatched += other.prologues_unmatched;
        self.epilogues_skipped += other.epilogues_skipped;
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct PartitionOutcome {
    patches: Vec<Patch>,
    audit: Vec<AuditFinding>,
    stats: PassStats,
}

/// Patches and findings of a whole run, in partition order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineOutcome {
    pub partitions: usize,
    pub patches: Vec<Patch>,
    pub audit: Vec<AuditFinding>,
    pub stats: PassStats,
}

impl EngineOutcome {
    /// Write every patch to the working copy and flush it.
    pub fn apply(&self, accessor: &mut ImageAccessor<'_>) -> CfpResult<()> {
        for patch in &self.patches {
            accessor.write_word(patch.line, patch.replacement)?;
        }
        accessor.flush()?;
        info!(patches = self.patches.len(), target = %accessor.target_path().display(), "patches written");
        Ok(())
    }
}

pub struct Engine<'a> {
    corpus: &'a Corpus,
    config: &'a ProtectionConfig,
    policy: &'a SkipPolicy,
    threads: usize,
}

impl<'a> Engine<'a> {
    pub fn new(corpus: &'a Corpus, config: &'a ProtectionConfig, policy: &'a SkipPolicy) -> Self {
        Self { corpus, config, policy, threads: 1 }
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Scan `scope` and collect the patches without touching any file.
    pub fn plan(&self, image: &ImageSnapshot, scope: &InstrumentScope) -> CfpResult<EngineOutcome> {
        let functions = scope.resolve(self.corpus)?;
        let partitions = partition(&functions, self.threads);
        info!(
            functions = functions.len(),
            partitions = partitions.len(),
            ropp = self.config.ropp,
            jopp = self.config.jopp,
            "instrumenting"
        );

        let outcomes = partitions
            .par_iter()
            .map(|part| PartitionScan::new(self.corpus, image, self.config, self.policy).run(part))
            .collect::<CfpResult<Vec<_>>>()?;

        let mut merged = EngineOutcome { partitions: partitions.len(), ..EngineOutcome::default() };
        for outcome in outcomes {
            merged.patches.extend(outcome.patches);
            merged.audit.extend(outcome.audit);
            merged.stats += outcome.stats;
        }
        info!(
            patches = merged.patches.len(),
            landing_pads = merged.stats.landing_pads,
            springboards = merged.stats.springboards,
            returns_masked = merged.stats.returns_masked,
            audit = merged.audit.len(),
            "instrumentation planned"
        );
        Ok(merged)
    }
}

/// Split into at most `threads` contiguous ranges of equal (ceiling) size.
pub fn partition(functions: &[FunctionId], threads: usize) -> Vec<&[FunctionId]> {
    if functions.is_empty() {
        return Vec::new();
    }
    let chunk = functions.len().div_ceil(threads.max(1));
    functions.chunks(chunk).collect()
}
