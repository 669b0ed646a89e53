//! Admission gate: maps a redundancy score to a decision.
//!
//! Scores run from 0.0 (nothing like it has been seen) to 1.0 (an exact
//! duplicate). Three cutoffs split that range into four bands:
//!
//! ```text
//! 0.0 ── admit_below ── notice_below ── reject_at ── 1.0
//!   Admit      AdmitWithNotice      Review       Reject
//! ```
//!
//! When no usable score is available the gate fails closed and treats the
//! candidate as a duplicate.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Score assumed when the scorer gave nothing usable.
pub const FAIL_CLOSED_SCORE: f64 = 1.0;

/// Outcome of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Admit,
    AdmitWithNotice,
    Review,
    Reject,
}

impl Decision {
    /// Wire label.
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Admit => "admit",
            Decision::AdmitWithNotice => "admit_with_notice",
            Decision::Review => "review",
            Decision::Reject => "reject",
        }
    }

    /// Whether the candidate goes in.
    pub fn is_admitted(self) -> bool {
        matches!(self, Decision::Admit | Decision::AdmitWithNotice)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three cutoffs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub admit_below: f64,
    pub notice_below: f64,
    pub reject_at: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            admit_below: 0.30,
            notice_below: 0.60,
            reject_at: 0.85,
        }
    }
}

impl Thresholds {
    /// Cutoffs must be strictly increasing inside `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        let Thresholds {
            admit_below,
            notice_below,
            reject_at,
        } = *self;

        let in_range = [admit_below, notice_below, reject_at]
            .iter()
            .all(|c| (0.0..=1.0).contains(c));
        if !in_range || admit_below >= notice_below || notice_below >= reject_at {
            return Err(Error::Config(format!(
                "thresholds must satisfy 0 <= {admit_below} < {notice_below} < {reject_at} <= 1"
            )));
        }
        Ok(())
    }

    /// Decide on a score. Non-finite scores fail closed.
    pub fn decide(&self, score: f64) -> Decision {
        let score = if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            FAIL_CLOSED_SCORE
        };

        if score < self.admit_below {
            Decision::Admit
        } else if score < self.notice_below {
            Decision::AdmitWithNotice
        } else if score < self.reject_at {
            Decision::Review
        } else {
            Decision::Reject
        }
    }
}

/// Resolve an optional scorer result, failing closed.
pub fn effective_score(score: Option<f64>) -> f64 {
    score.filter(|s| s.is_finite()).unwrap_or(FAIL_CLOSED_SCORE)
}

/// BLAKE3 hex digest used as the content hash in mesh signals.
pub fn content_digest(content: &[u8]) -> String {
    hex::encode(blake3::hash(content).as_bytes())
}
