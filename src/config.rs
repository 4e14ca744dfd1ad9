//! Session configuration loaded from environment variables.
//!
//! Every knob has a sensible default so a bare `from_env()` in a clean
//! environment yields a playable session; set `QUIZMESH_*` variables to
//! override individual values.

use serde::{Deserialize, Serialize};

fn env_u32(name: &str, default: u32) -> u32 {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!("{name}={raw:?} is not a number, using default {default}");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!("{name}={raw:?} is not a number, using default {default}");
                default
            }
        },
        Err(_) => default,
    }
}

/// Fixed countdowns driven by the host phase controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// PREPARE countdown before question 0 (longer, lets everyone settle).
    pub first_prepare_seconds: u32,
    /// PREPARE countdown before every later question.
    pub prepare_seconds: u32,
    /// RESULT reveal duration between questions.
    pub result_seconds: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            first_prepare_seconds: 10,
            prepare_seconds: 5,
            result_seconds: 8,
        }
    }
}

impl TimingConfig {
    /// QUESTION countdown when a kind is missing from `perTypeTimeLimit`.
    /// Host and players must agree on this, or players lock themselves out
    /// of a question the host keeps open.
    pub const DEFAULT_QUESTION_SECONDS: u32 = 30;

    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            first_prepare_seconds: env_u32("QUIZMESH_FIRST_PREPARE_SECONDS", d.first_prepare_seconds),
            prepare_seconds: env_u32("QUIZMESH_PREPARE_SECONDS", d.prepare_seconds),
            result_seconds: env_u32("QUIZMESH_RESULT_SECONDS", d.result_seconds),
        }
    }

    /// PREPARE countdown for the question at `index`.
    pub fn prepare_seconds_for(&self, index: u32) -> u32 {
        if index == 0 {
            self.first_prepare_seconds
        } else {
            self.prepare_seconds
        }
    }
}

/// Point values handed to the scoring engine. Ladders differ numerically by
/// mode, so they are configuration, never constants inside the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub single_choice_points: u32,
    pub short_answer_points: u32,
    /// Points by multi-truth match count: index 0 = no matches.
    pub truth_ladder: Vec<u32>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            single_choice_points: 100,
            short_answer_points: 100,
            truth_ladder: vec![0, 10, 25, 50, 100],
        }
    }
}

impl ScoringConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let ladder = match std::env::var("QUIZMESH_TRUTH_LADDER") {
            Ok(raw) => {
                let parsed: Result<Vec<u32>, _> =
                    raw.split(',').map(|s| s.trim().parse()).collect();
                match parsed {
                    Ok(tiers) if !tiers.is_empty() => tiers,
                    _ => {
                        tracing::warn!(
                            "QUIZMESH_TRUTH_LADDER={raw:?} is not a comma-separated list, using default"
                        );
                        d.truth_ladder.clone()
                    }
                }
            }
            Err(_) => d.truth_ladder.clone(),
        };
        Self {
            single_choice_points: env_u32("QUIZMESH_SINGLE_CHOICE_POINTS", d.single_choice_points),
            short_answer_points: env_u32("QUIZMESH_SHORT_ANSWER_POINTS", d.short_answer_points),
            truth_ladder: ladder,
        }
    }

    /// Tier for a match count; saturates at the top tier so the engine stays
    /// total when a question carries more statements than the ladder covers.
    pub fn ladder_points(&self, matches: usize) -> u32 {
        match self.truth_ladder.get(matches) {
            Some(points) => *points,
            None => self.truth_ladder.last().copied().unwrap_or(0),
        }
    }
}

/// Exam proctor thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProctorConfig {
    /// Violations that force finalize with `violation-limit-exceeded`.
    pub violation_ceiling: u32,
    /// Window inside which one physical event reported via two listeners
    /// counts once.
    pub debounce_ms: u64,
}

impl Default for ProctorConfig {
    fn default() -> Self {
        Self {
            violation_ceiling: 3,
            debounce_ms: 1_000,
        }
    }
}

impl ProctorConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            violation_ceiling: env_u32("QUIZMESH_VIOLATION_CEILING", d.violation_ceiling),
            debounce_ms: env_u64("QUIZMESH_VIOLATION_DEBOUNCE_MS", d.debounce_ms),
        }
    }
}
