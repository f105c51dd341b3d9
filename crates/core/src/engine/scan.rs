//! Single left-to-right scan over one partition of functions.

use tracing::{debug, warn};

use super::pending::PendingPrologueRewrite;
use super::{AuditFinding, PartitionOutcome, Patch, PatchKind};
use crate::codec::{Instruction, Op, PairMode, PairOperands};
use crate::config::ProtectionConfig;
use crate::corpus::Corpus;
use crate::error::{CfpError, CfpResult};
use crate::image::ImageSnapshot;
use crate::model::{springboard_for, FunctionId, REG_FP, REG_LR, REG_SP};
use crate::policy::SkipPolicy;

/// Scan state of one partition.
///
/// The scan is `Scanning` while `pending` is empty and `Rewriting` while a
/// matched prologue waits for its epilogue; [`PartitionScan::run`] consumes it.
pub(crate) struct PartitionScan<'a> {
    corpus: &'a Corpus,
    image: &'a ImageSnapshot,
    config: &'a ProtectionConfig,
    policy: &'a SkipPolicy,
    pending: Option<PendingPrologueRewrite>,
    /// Last function whose prologue was committed.
    committed: Option<FunctionId>,
    out: PartitionOutcome,
}

impl<'a> PartitionScan<'a> {
    pub(crate) fn new(
        corpus: &'a Corpus,
        image: &'a ImageSnapshot,
        config: &'a ProtectionConfig,
        policy: &'a SkipPolicy,
    ) -> Self {
        Self {
            corpus,
            image,
            config,
            policy,
            pending: None,
            committed: None,
            out: PartitionOutcome::default(),
        }
    }

    pub(crate) fn run(mut self, functions: &[FunctionId]) -> CfpResult<PartitionOutcome> {
        for function in functions {
            if self.policy.skips_function(&function.name) {
                self.out.stats.functions_skipped += 1;
                continue;
            }
            self.out.stats.functions_scanned += 1;
            self.landing_pad(function)?;
            let lines: Vec<usize> = self.corpus.instructions_of(function).collect();
            for line in lines {
                self.step(function, line)?;
            }
        }
        if let Some(left) = self.pending.take() {
            debug!(function = %left.owner.name, line = left.stp_line, "prologue without epilogue left untouched");
            self.out.stats.prologues_unmatched += 1;
        }
        Ok(self.out)
    }

    fn step(&mut self, function: &FunctionId, line: usize) -> CfpResult<()> {
        let insn = self.image.decode_line(self.corpus, line)?;
        match insn.op {
            Op::Blr { rn } if self.config.jopp && !self.policy.skips_blr(&function.name) => {
                self.redirect_blr(function, line, &insn, rn)
            }
            Op::Ldp(pair) if self.masks_returns(function) && is_frame_pair(&pair) => {
                self.epilogue(function, line, &insn, pair)
            }
            Op::Stp(pair)
                if self.masks_returns(function)
                    && is_frame_pair(&pair)
                    && pair.rn == REG_SP
                    && is_prologue_store(&pair) =>
            {
                self.prologue(function, line, &insn, pair)
            }
            _ => Ok(()),
        }
    }

    fn masks_returns(&self, function: &FunctionId) -> bool {
        self.config.ropp && !self.policy.skips_stp(&function.name)
    }

    fn landing_pad(&mut self, function: &FunctionId) -> CfpResult<()> {
        let Some(magic) = self.config.magic() else {
            return Ok(());
        };
        let Some(entry) = self.corpus.instructions_of(function).next() else {
            return Ok(());
        };
        let Some(slot) = self.corpus.prev_instruction(entry) else {
            return Ok(());
        };
        let Some(before) = self.corpus.prev_instruction(slot) else {
            return Ok(());
        };
        if !self.is_nop(slot)? || !self.is_nop(before)? {
            return Ok(());
        }
        if let Some(owner) = self.corpus.enclosing_function(slot) {
            if self.policy.always_unmodified.contains(&owner.name) {
                debug!(function = %function.name, owner = %owner.name, "landing pad slot is in an unmodifiable function");
                return Ok(());
            }
        }
        self.push(slot, magic, PatchKind::LandingPad, function)?;
        self.out.stats.landing_pads += 1;
        Ok(())
    }

    fn redirect_blr(
        &mut self,
        function: &FunctionId,
        line: usize,
        insn: &Instruction,
        register: u8,
    ) -> CfpResult<()> {
        let name = springboard_for(register);
        let target = self.corpus.symbol_address(&name).ok_or_else(|| {
            CfpError::MissingSpringboard { name: name.clone(), register, address: insn.address }
        })?;
        let offset = target.wrapping_sub(insn.address) as i64;
        let bl = Instruction::synthesize(insn.address, Op::Bl { offset })?;
        debug!(function = %function.name, address = format_args!("{:#x}", insn.address), springboard = %name, "blr redirected");
        self.push(line, bl.word, PatchKind::Springboard, function)?;
        self.out.stats.springboards += 1;
        Ok(())
    }

    fn prologue(
        &mut self,
        function: &FunctionId,
        line: usize,
        insn: &Instruction,
        pair: PairOperands,
    ) -> CfpResult<()> {
        let Some(nop_line) = line.checked_sub(1) else {
            return Ok(());
        };
        if !self.is_nop(nop_line)? {
            return Ok(());
        }
        let nop_address = self.corpus.address(nop_line).unwrap_or_default();
        let mask = Instruction::synthesize(
            nop_address,
            Op::Eor { rd: self.config.mask_register, rn: REG_LR, rm: self.config.key_register },
        )?;
        let store = Instruction::synthesize(
            insn.address,
            Op::Stp(PairOperands { rt2: self.config.mask_register, ..pair }),
        )?;
        let rewrite = PendingPrologueRewrite {
            owner: function.clone(),
            nop_line,
            stp_line: line,
            mask_word: mask.word,
            store_word: store.word,
        };
        if let Some(old) = self.pending.replace(rewrite) {
            debug!(function = %old.owner.name, line = old.stp_line, "pending prologue superseded");
            self.out.stats.prologues_unmatched += 1;
        }
        Ok(())
    }

    fn epilogue(
        &mut self,
        function: &FunctionId,
        line: usize,
        insn: &Instruction,
        pair: PairOperands,
    ) -> CfpResult<()> {
        let unmask_line = line + 1;
        if !self.is_nop(unmask_line)? || !self.is_nop(line + 2)? {
            return Ok(());
        }
        let pending = match self.pending.take() {
            Some(p) if p.belongs_to(function) => p,
            other => {
                self.pending = other;
                if self.committed.as_ref() == Some(function) {
                    warn!(function = %function.name, address = format_args!("{:#x}", insn.address), "additional epilogue after committed prologue left unmasked");
                    self.out.audit.push(AuditFinding::AdditionalEpilogue {
                        function: function.clone(),
                        line,
                        address: insn.address,
                    });
                } else {
                    debug!(function = %function.name, line, "epilogue without pending prologue skipped");
                    self.out.stats.epilogues_skipped += 1;
                }
                return Ok(());
            }
        };

        let load = Instruction::synthesize(
            insn.address,
            Op::Ldp(PairOperands { rt2: self.config.mask_register, ..pair }),
        )?;
        let unmask_address = self.corpus.address(unmask_line).unwrap_or_default();
        let unmask = Instruction::synthesize(
            unmask_address,
            Op::Eor { rd: REG_LR, rn: self.config.mask_register, rm: self.config.key_register },
        )?;

        self.push(pending.nop_line, pending.mask_word, PatchKind::PrologueMask, function)?;
        self.push(pending.stp_line, pending.store_word, PatchKind::PrologueStore, function)?;
        self.push(line, load.word, PatchKind::EpilogueLoad, function)?;
        self.push(unmask_line, unmask.word, PatchKind::EpilogueUnmask, function)?;
        debug!(function = %function.name, prologue = pending.stp_line, epilogue = line, "return address masked");
        self.committed = Some(function.clone());
        self.out.stats.returns_masked += 1;
        Ok(())
    }

    fn is_nop(&self, line: usize) -> CfpResult<bool> {
        if !self.corpus.is_instruction(line) {
            return Ok(false);
        }
        Ok(self.image.decode_line(self.corpus, line)?.is_nop())
    }

    fn push(
        &mut self,
        line: usize,
        replacement: u32,
        kind: PatchKind,
        function: &FunctionId,
    ) -> CfpResult<()> {
        let original = self.image.read_line(self.corpus, line)?;
        self.out.patches.push(Patch {
            line,
            address: self.corpus.address(line).unwrap_or_default(),
            file_offset: self.corpus.file_offset(line)?,
            original,
            replacement,
            kind,
            function: function.name.clone(),
        });
        Ok(())
    }
}

fn is_frame_pair(pair: &PairOperands) -> bool {
    pair.size64 && pair.rt == REG_FP && pair.rt2 == REG_LR
}

/// `stp x29, x30, [sp, #-n]!`, `stp x29, x30, [sp, #n]` or `stp x29, x30, [sp], #n`.
fn is_prologue_store(pair: &PairOperands) -> bool {
    match pair.mode {
        PairMode::PreIndex => pair.offset < 0,
        PairMode::SignedOffset | PairMode::PostIndex => pair.offset > 0,
    }
}
