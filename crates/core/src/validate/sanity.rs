use std::collections::BTreeSet;

use super::{Check, Finding, ValidationReport};
use crate::codec::Op;
use crate::config::ProtectionConfig;
use crate::corpus::Corpus;
use crate::error::CfpResult;
use crate::image::ImageSnapshot;
use crate::model::{BYTES_PER_INSN, REG_LR};

/// Callee-saved registers a function may stash the link register in.
const CALLEE_SAVED: std::ops::RangeInclusive<u8> = 19..=28;

/// Checks of the image before instrumentation.
pub(super) fn check(
    corpus: &Corpus,
    config: &ProtectionConfig,
    pre: &ImageSnapshot,
) -> CfpResult<ValidationReport> {
    let mut report = ValidationReport::default();
    if let Some(magic) = config.magic() {
        magic_collisions(corpus, pre, magic, &mut report);
    }
    link_register_copies(corpus, pre, &mut report)?;
    Ok(report)
}

/// The landing-pad marker must not already occur as a code word.
fn magic_collisions(corpus: &Corpus, pre: &ImageSnapshot, magic: u32, report: &mut ValidationReport) {
    for section in corpus.sections().code_sections() {
        let mut offset = section.file_offset;
        let end = section.file_offset + section.size;
        while offset + BYTES_PER_INSN <= end {
            if pre.word_at(offset) == Some(magic) {
                let address = section.address + (offset - section.file_offset);
                report.findings.push(
                    Finding::error(
                        Check::PreImageSanity,
                        format!("landing-pad magic {magic:#010x} already present in {}", section.name),
                    )
                    .at(address)
                    .at_offset(offset),
                );
            }
            offset += BYTES_PER_INSN;
        }
    }
}

/// Functions that copy x30 into a callee-saved register and later return
/// through it bypass return-address masking.
fn link_register_copies(
    corpus: &Corpus,
    pre: &ImageSnapshot,
    report: &mut ValidationReport,
) -> CfpResult<()> {
    for function in corpus.functions() {
        let mut holders = BTreeSet::new();
        for line in corpus.instructions_of(function) {
            let insn = pre.decode_line(corpus, line)?;
            match insn.op {
                Op::MovReg { rd, rm: REG_LR } if CALLEE_SAVED.contains(&rd) => {
                    holders.insert(rd);
                }
                Op::MovReg { rd, .. } => {
                    holders.remove(&rd);
                }
                Op::Ret { rn } if holders.contains(&rn) => {
                    report.findings.push(
                        Finding::warning(
                            Check::PreImageSanity,
                            format!("returns through x{rn} holding a copy of x30"),
                        )
                        .in_function(&function.name)
                        .at(insn.address),
                    );
                }
                _ => {}
            }
        }
    }
    Ok(())
}
