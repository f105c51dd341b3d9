use super::{Check, Finding, ValidationReport};
use crate::codec::{Op, PairMode, PairOperands};
use crate::config::ProtectionConfig;
use crate::corpus::Corpus;
use crate::error::CfpResult;
use crate::image::ImageSnapshot;
use crate::model::{REG_FP, REG_LR, REG_SP};
use crate::policy::SkipPolicy;

/// Re-decode the instrumented image and look for constructs the passes
/// should have removed.
pub(super) fn check(
    corpus: &Corpus,
    config: &ProtectionConfig,
    policy: &SkipPolicy,
    post: &ImageSnapshot,
) -> CfpResult<ValidationReport> {
    let mut report = ValidationReport::default();
    for function in corpus.functions() {
        let name = function.name.as_str();
        let mut prev_nop = false;
        for line in corpus.instructions_of(function) {
            let insn = post.decode_line(corpus, line)?;
            match insn.op {
                Op::Blr { rn } if config.jopp && !policy.skips_blr(name) => {
                    report.findings.push(
                        Finding::error(Check::InstrumentedOutput, format!("blr x{rn} not redirected"))
                            .in_function(name)
                            .at(insn.address),
                    );
                }
                Op::Br { rn } if config.jopp && !policy.allows_br(name) => {
                    report.findings.push(
                        Finding::error(
                            Check::InstrumentedOutput,
                            format!("br x{rn} outside the br allowlist"),
                        )
                        .in_function(name)
                        .at(insn.address),
                    );
                }
                Op::Stp(pair)
                    if config.ropp
                        && prev_nop
                        && !policy.skips_stp(name)
                        && saves_frame_record(&pair) =>
                {
                    report.findings.push(
                        Finding::error(
                            Check::InstrumentedOutput,
                            "unmasked prologue nop; stp x29, x30",
                        )
                        .in_function(name)
                        .at(insn.address),
                    );
                }
                _ => {}
            }
            prev_nop = insn.is_nop();
        }
    }
    Ok(report)
}

/// `stp x29, x30` to the stack with a non-zero offset.
fn saves_frame_record(pair: &PairOperands) -> bool {
    let frame = pair.size64 && pair.rt == REG_FP && pair.rt2 == REG_LR && pair.rn == REG_SP;
    let offset_ok = match pair.mode {
        PairMode::PreIndex => pair.offset < 0,
        PairMode::SignedOffset | PairMode::PostIndex => pair.offset > 0,
    };
    frame && offset_ok
}
