use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuizError {
    #[error("quiz must have at least one question")]
    ZeroTotal,

    #[error("score {score} exceeds question count {total}")]
    ScoreExceedsTotal { score: u32, total: u32 },

    #[error("pass threshold must be between 0 and 100 percent, got {0}")]
    InvalidThreshold(u32),
}

//
// ─── PERCENTAGES ──────────────────────────────────────────────────────────────
//

/// `part / whole` as a percentage, rounded half up. Returns 0 when `whole` is 0.
#[must_use]
pub fn rounded_percent(part: u64, whole: u64) -> u32 {
    if whole == 0 {
        return 0;
    }
    let value = (part.saturating_mul(200) + whole) / (whole * 2);
    u32::try_from(value).unwrap_or(u32::MAX)
}

//
// ─── PASS THRESHOLD ───────────────────────────────────────────────────────────
//

/// Minimum score ratio for an attempt to count as passed, in whole percent.
///
/// Comparisons are done in integer arithmetic so `3/5` against 60% is exactly
/// on the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PassThreshold(u8);

impl PassThreshold {
    /// Threshold used by the module progress tables.
    pub const GLOBAL: Self = Self(60);
    /// Threshold used by the course-scoped progress tables.
    pub const COURSE: Self = Self(70);

    /// # Errors
    ///
    /// Returns `QuizError::InvalidThreshold` when `percent` exceeds 100.
    pub fn from_percent(percent: u32) -> Result<Self, QuizError> {
        u8::try_from(percent)
            .ok()
            .filter(|p| *p <= 100)
            .map(Self)
            .ok_or(QuizError::InvalidThreshold(percent))
    }

    #[must_use]
    pub fn percent(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn is_met_by(self, score: QuizScore) -> bool {
        u64::from(score.score) * 100 >= u64::from(self.0) * u64::from(score.total)
    }
}

impl Default for PassThreshold {
    fn default() -> Self {
        Self::GLOBAL
    }
}

//
// ─── SCORE ────────────────────────────────────────────────────────────────────
//

/// A validated `score / total` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizScore {
    score: u32,
    total: u32,
}

impl QuizScore {
    /// # Errors
    ///
    /// Returns `QuizError::ZeroTotal` for an empty quiz and
    /// `QuizError::ScoreExceedsTotal` when more answers are correct than asked.
    pub fn new(score: u32, total: u32) -> Result<Self, QuizError> {
        if total == 0 {
            return Err(QuizError::ZeroTotal);
        }
        if score > total {
            return Err(QuizError::ScoreExceedsTotal { score, total });
        }
        Ok(Self { score, total })
    }

    #[must_use]
    pub fn score(&self) -> u32 {
        self.score
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Rounded percentage in `0..=100`.
    #[must_use]
    pub fn percentage(&self) -> u8 {
        let pct = rounded_percent(u64::from(self.score), u64::from(self.total));
        u8::try_from(pct).unwrap_or(100)
    }
}

//
// ─── RESULT ───────────────────────────────────────────────────────────────────
//

/// Latest known outcome of a module quiz, as surfaced in the progress snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResult {
    pub score: u32,
    pub total: u32,
    pub percentage: u8,
    pub passed: bool,
    pub completed_at: DateTime<Utc>,
}

impl QuizResult {
    #[must_use]
    pub fn new(score: QuizScore, passed: bool, completed_at: DateTime<Utc>) -> Self {
        Self {
            score: score.score(),
            total: score.total(),
            percentage: score.percentage(),
            passed,
            completed_at,
        }
    }

    /// Grade a score against a threshold, deriving `passed` at write time.
    #[must_use]
    pub fn graded(score: QuizScore, threshold: PassThreshold, completed_at: DateTime<Utc>) -> Self {
        Self::new(score, threshold.is_met_by(score), completed_at)
    }
}

/// One answered question within an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizAnswer {
    pub selected: u32,
    pub correct: bool,
}

impl QuizAnswer {
    #[must_use]
    pub fn new(selected: u32, correct: bool) -> Self {
        Self { selected, correct }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
