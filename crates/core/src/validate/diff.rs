use super::{Check, Finding, ValidationReport};
use crate::corpus::Corpus;
use crate::error::CfpResult;
use crate::image::ImageSnapshot;
use crate::model::FunctionId;
use crate::policy::SkipPolicy;

/// Every changed byte must be in a code section and outside every
/// always-unmodified function.
pub(super) fn check(
    corpus: &Corpus,
    policy: &SkipPolicy,
    pre: &ImageSnapshot,
    post: &ImageSnapshot,
) -> CfpResult<ValidationReport> {
    let mut report = ValidationReport::default();
    let (before, after) = (pre.bytes(), post.bytes());
    if before.len() != after.len() {
        report.findings.push(Finding::error(
            Check::BinaryDiff,
            format!("image size changed from {} to {} bytes", before.len(), after.len()),
        ));
    }

    let protected = protected_ranges(corpus, policy, &mut report)?;
    let len = before.len().min(after.len());
    let mut i = 0;
    while i < len {
        if before[i] == after[i] {
            i += 1;
            continue;
        }
        let start = i;
        while i < len && before[i] != after[i] {
            i += 1;
        }
        report.bytes_changed += i - start;
        classify(corpus, &protected, start as u64, i as u64, &mut report);
    }
    Ok(report)
}

fn classify(
    corpus: &Corpus,
    protected: &[(String, u64, u64)],
    start: u64,
    end: u64,
    report: &mut ValidationReport,
) {
    let span = format!("bytes {start:#x}..{end:#x}");
    match corpus.sections().by_file_offset(start) {
        None => report.findings.push(
            Finding::error(Check::BinaryDiff, format!("{span} changed in no section"))
                .at_offset(start),
        ),
        Some(section) if !section.is_code() => report.findings.push(
            Finding::error(
                Check::BinaryDiff,
                format!("{span} changed in non-code section {}", section.name),
            )
            .at_offset(start),
        ),
        Some(section) if end > section.file_offset + section.size => report.findings.push(
            Finding::error(
                Check::BinaryDiff,
                format!("{span} run past the end of section {}", section.name),
            )
            .at_offset(start),
        ),
        Some(_) => {}
    }
    for (name, lo, hi) in protected {
        if start < *hi && *lo < end {
            report.findings.push(
                Finding::error(
                    Check::BinaryDiff,
                    format!("{span} changed inside always-unmodified function"),
                )
                .in_function(name)
                .at_offset(start),
            );
        }
    }
}

fn protected_ranges(
    corpus: &Corpus,
    policy: &SkipPolicy,
    report: &mut ValidationReport,
) -> CfpResult<Vec<(String, u64, u64)>> {
    let mut ranges = Vec::new();
    for name in &policy.always_unmodified {
        let Some(symbol) = corpus.function(name) else {
            report.findings.push(
                Finding::error(Check::BinaryDiff, "always-unmodified function not found")
                    .in_function(name),
            );
            continue;
        };
        for &line in &symbol.lines {
            if let Some((lo, hi)) = corpus.function_file_range(&FunctionId::new(name, line))? {
                ranges.push((name.clone(), lo, hi));
            }
        }
    }
    Ok(ranges)
}
