//! Host-side check of `result[i] == a[i] + b[i]`.
//!
//! The verifier is diagnostic only: it logs what it finds and returns a
//! [`VerificationReport`], it never fails the cycle.

use log::{error, info};
use serde::{Deserialize, Serialize};

/// Number of mismatches kept in a report; every mismatch is still logged.
pub const MAX_RECORDED_MISMATCHES: usize = 64;

/// What the verifier logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMode {
    /// Log only elements whose sum is wrong.
    #[default]
    MismatchesOnly,
    /// Log every element.
    Verbose,
}

/// One element whose result differs from the sum of its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Mismatch {
    pub index: usize,
    pub result: f32,
    pub a: f32,
    pub b: f32,
}

impl Mismatch {
    pub fn expected(&self) -> f32 {
        self.a + self.b
    }
}

/// Outcome of one verification pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VerificationReport {
    pub checked: usize,
    pub mismatch_count: usize,
    /// The first [`MAX_RECORDED_MISMATCHES`] mismatches, by index.
    pub mismatches: Vec<Mismatch>,
}

impl VerificationReport {
    pub fn is_success(&self) -> bool {
        self.mismatch_count == 0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Verifier {
    mode: VerifyMode,
}

impl Verifier {
    pub fn new(mode: VerifyMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> VerifyMode {
        self.mode
    }

    /// Compare `result` against `a + b` element by element.
    ///
    /// Only the common prefix of the three slices is checked.
    pub fn verify(&self, a: &[f32], b: &[f32], result: &[f32]) -> VerificationReport {
        let mut report = VerificationReport::default();

        for (index, ((&a, &b), &result)) in a.iter().zip(b).zip(result).enumerate() {
            report.checked += 1;
            let expected = a + b;

            if result != expected {
                error!(
                    "Compute FAILED: index={} result={} vs {} = {} + {}",
                    index, result, expected, a, b
                );
                report.mismatch_count += 1;
                if report.mismatches.len() < MAX_RECORDED_MISMATCHES {
                    report.mismatches.push(Mismatch {
                        index,
                        result,
                        a,
                        b,
                    });
                }
            } else if self.mode == VerifyMode::Verbose {
                info!("index={} result={} = {} + {}", index, result, a, b);
            }
        }

        if report.is_success() {
            info!("Compute results as expected ({} elements)", report.checked);
        } else {
            error!(
                "Compute FAILED for {} of {} elements",
                report.mismatch_count, report.checked
            );
        }

        report
    }
}
