//! Exam proctor: a self-contained violation-detection machine running on
//! the examinee's device.
//!
//! Nothing here touches the shared room store. The attempt lives locally
//! and is mutated only by this machine; only the final outcome is persisted,
//! fire-and-forget, so a dead sink never blocks or changes the score the
//! examinee sees.

use crate::config::{ProctorConfig, ScoringConfig};
use crate::records::RecordSink;
use crate::scoring::score;
use crate::types::{AttemptId, Question, QuestionId, Submission};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Events reported by the device's monitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProctorEvent {
    VisibilityLost,
    FocusLost,
    CopyAttempt,
    CutAttempt,
    PasteAttempt,
    ContextMenuAttempt,
    /// `confirmed = false`: the examinee tried to navigate away and was
    /// held in the exam. `confirmed = true`: they insisted, and are gone.
    NavigationAttempt { confirmed: bool },
    TimerExpired,
    ManualSubmit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    ManualSubmit,
    TimeExpired,
    ViolationLimitExceeded,
    NavigationAbort,
}

/// What the device should do after reporting an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResponse {
    /// Violation recorded (or collapsed into the previous one); carry on.
    Recorded { violation_count: u32 },
    /// Violation recorded and the navigation attempt must be blocked.
    Blocked { violation_count: u32 },
    /// The attempt just finalized for this reason.
    Finalized(TerminationReason),
    /// Attempt already finalized; the event has no effect.
    Ignored,
}

/// The local exam attempt record. This is also the shape persisted at
/// finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamAttempt {
    pub id: AttemptId,
    pub answers: HashMap<QuestionId, Submission>,
    pub violation_count: u32,
    pub termination_reason: Option<TerminationReason>,
    pub final_score: Option<u32>,
    pub started_at: String,
    pub finalized_at: Option<String>,
}

pub struct ExamProctor {
    config: ProctorConfig,
    scoring: ScoringConfig,
    questions: Vec<Question>,
    attempt: ExamAttempt,
    last_violation_ms: Option<i64>,
    sink: Arc<dyn RecordSink>,
}

impl ExamProctor {
    pub fn new(
        questions: Vec<Question>,
        scoring: ScoringConfig,
        config: ProctorConfig,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        let attempt = ExamAttempt {
            id: ulid::Ulid::new().to_string(),
            answers: HashMap::new(),
            violation_count: 0,
            termination_reason: None,
            final_score: None,
            started_at: chrono::Utc::now().to_rfc3339(),
            finalized_at: None,
        };
        Self {
            config,
            scoring,
            questions,
            attempt,
            last_violation_ms: None,
            sink,
        }
    }

    pub fn attempt(&self) -> &ExamAttempt {
        &self.attempt
    }

    pub fn is_finalized(&self) -> bool {
        self.attempt.termination_reason.is_some()
    }

    /// Record or replace the examinee's answer for a question. Ignored once
    /// the attempt is finalized.
    pub fn record_answer(&mut self, question_id: QuestionId, submission: Submission) {
        if self.is_finalized() {
            return;
        }
        self.attempt.answers.insert(question_id, submission);
    }

    /// Feed one monitored event through the machine. `now_ms` is the
    /// device's monotonic-ish clock; only deltas matter (debounce).
    pub async fn handle_event(&mut self, event: ProctorEvent, now_ms: i64) -> EventResponse {
        if self.is_finalized() {
            return EventResponse::Ignored;
        }

        match event {
            ProctorEvent::ManualSubmit => {
                self.finalize(TerminationReason::ManualSubmit).await;
                EventResponse::Finalized(TerminationReason::ManualSubmit)
            }
            ProctorEvent::TimerExpired => {
                self.finalize(TerminationReason::TimeExpired).await;
                EventResponse::Finalized(TerminationReason::TimeExpired)
            }
            ProctorEvent::NavigationAttempt { confirmed: true } => {
                // Leaving for real is an abort, not a violation.
                self.finalize(TerminationReason::NavigationAbort).await;
                EventResponse::Finalized(TerminationReason::NavigationAbort)
            }
            ProctorEvent::NavigationAttempt { confirmed: false } => {
                let response = self.count_violation(now_ms).await;
                match response {
                    EventResponse::Recorded { violation_count } => {
                        EventResponse::Blocked { violation_count }
                    }
                    other => other,
                }
            }
            _ => self.count_violation(now_ms).await,
        }
    }

    /// One violation, unless it lands inside the debounce window of the
    /// previous one (one physical event often arrives via two listeners).
    async fn count_violation(&mut self, now_ms: i64) -> EventResponse {
        let debounced = self
            .last_violation_ms
            .is_some_and(|last| now_ms.saturating_sub(last) < self.config.debounce_ms as i64);
        if debounced {
            return EventResponse::Recorded {
                violation_count: self.attempt.violation_count,
            };
        }

        self.last_violation_ms = Some(now_ms);
        self.attempt.violation_count += 1;
        tracing::debug!(
            attempt = %self.attempt.id,
            count = self.attempt.violation_count,
            "proctor violation"
        );

        if self.attempt.violation_count >= self.config.violation_ceiling {
            self.finalize(TerminationReason::ViolationLimitExceeded).await;
            return EventResponse::Finalized(TerminationReason::ViolationLimitExceeded);
        }
        EventResponse::Recorded {
            violation_count: self.attempt.violation_count,
        }
    }

    /// Finalize exactly once: compute the score, stamp the reason, append
    /// the record. Later calls (and later events) are no-ops.
    pub async fn finalize(&mut self, reason: TerminationReason) -> u32 {
        if let Some(points) = self.attempt.final_score {
            return points;
        }

        let total = self.compute_score();
        self.attempt.final_score = Some(total);
        self.attempt.termination_reason = Some(reason);
        self.attempt.finalized_at = Some(chrono::Utc::now().to_rfc3339());
        tracing::info!(attempt = %self.attempt.id, ?reason, total, "exam attempt finalized");

        match serde_json::to_value(&self.attempt) {
            Ok(record) => {
                if let Err(e) = self.sink.append("exam_results", record).await {
                    // Non-fatal: the locally shown score stands.
                    tracing::warn!(attempt = %self.attempt.id, "result persistence failed: {e}");
                }
            }
            Err(e) => {
                tracing::warn!(attempt = %self.attempt.id, "could not serialize attempt: {e}");
            }
        }
        total
    }

    /// Same pure engine as the live session paths, summed over the answers.
    fn compute_score(&self) -> u32 {
        self.questions
            .iter()
            .filter_map(|q| {
                self.attempt
                    .answers
                    .get(q.id())
                    .map(|submission| score(q, submission, &self.scoring).points)
            })
            .sum()
    }
}
