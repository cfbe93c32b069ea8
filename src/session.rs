//! Per-concern lifecycle state. One explicit machine per concern instead of
//! a pile of independent flags, so illegal combinations cannot be built.

use crate::stream::ProgressEvent;

/// Lifecycle of one embed submission.
///
/// `Idle → Submitting → Streaming → Completed | Failed | Cancelled`.
/// Terminal states reset only when the user starts a new submission;
/// `Streaming` cannot be reentered from a terminal state.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbedPhase {
    Idle,
    Submitting,
    Streaming(ProgressEvent),
    Completed { message: String },
    Failed { error: String },
    Cancelled,
}

impl EmbedPhase {
    pub fn in_flight(&self) -> bool {
        matches!(self, EmbedPhase::Submitting | EmbedPhase::Streaming(_))
    }

    /// Starts a new submission. Overlapping submissions are rejected, not
    /// queued; the caller keeps the old state and must tell the user.
    pub fn begin(&mut self) -> bool {
        if self.in_flight() {
            return false;
        }
        *self = EmbedPhase::Submitting;
        true
    }

    /// Records one progress event. Ignored outside of an active submission
    /// so a straggler event from an abandoned parse cannot resurrect the bar.
    pub fn advance(&mut self, event: ProgressEvent) {
        if self.in_flight() {
            *self = EmbedPhase::Streaming(event);
        }
    }

    pub fn complete(&mut self, message: String) {
        if self.in_flight() {
            *self = EmbedPhase::Completed { message };
        }
    }

    pub fn fail(&mut self, error: String) {
        if self.in_flight() {
            *self = EmbedPhase::Failed { error };
        }
    }

    pub fn cancel(&mut self) {
        if self.in_flight() {
            *self = EmbedPhase::Cancelled;
        }
    }

    /// Clears a terminal state back to `Idle` once its status text has been
    /// shown long enough. No effect mid-flight.
    pub fn reset(&mut self) {
        if !self.in_flight() {
            *self = EmbedPhase::Idle;
        }
    }

    /// Progress of the active submission, if any.
    pub fn progress(&self) -> Option<ProgressEvent> {
        match self {
            EmbedPhase::Streaming(event) => Some(*event),
            _ => None,
        }
    }

    /// Transient status line for the sidebar.
    pub fn status(&self) -> Option<String> {
        match self {
            EmbedPhase::Idle => None,
            EmbedPhase::Submitting => Some("Uploading and processing...".to_string()),
            EmbedPhase::Streaming(event) => {
                Some(format!("{} / {} chunks embedded", event.completed, event.total))
            }
            EmbedPhase::Completed { message } => Some(message.clone()),
            EmbedPhase::Failed { error } => Some(format!("Error during embedding: {error}")),
            EmbedPhase::Cancelled => Some("Embedding cancelled".to_string()),
        }
    }
}

/// Authentication lifecycle. The login form lives inside `SignedOut` so it
/// cannot survive into a signed-in session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthPhase {
    SignedOut { username: String, password: String },
    SigningIn,
    SignedIn { username: String },
}

impl AuthPhase {
    pub fn signed_out() -> Self {
        AuthPhase::SignedOut {
            username: String::new(),
            password: String::new(),
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            AuthPhase::SignedIn { username } => Some(username),
            _ => None,
        }
    }
}

/// What the preview pane is showing. A single pane: opening a file preview
/// replaces a chunk preview and vice versa.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewPhase {
    Closed,
    Loading { filename: String },
    File { filename: String, text: String },
    Chunks {
        filename: String,
        chunks: Vec<String>,
        /// Chunk cited by the evidence link that opened the pane.
        highlight: Option<usize>,
    },
}

impl PreviewPhase {
    pub fn is_open(&self) -> bool {
        !matches!(self, PreviewPhase::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(completed: u64, total: u64) -> ProgressEvent {
        ProgressEvent { completed, total }
    }

    #[test]
    fn embed_walks_the_happy_path() {
        let mut phase = EmbedPhase::Idle;
        assert!(phase.begin());
        assert_eq!(phase, EmbedPhase::Submitting);

        phase.advance(event(1, 10));
        phase.advance(event(5, 10));
        assert_eq!(phase.progress(), Some(event(5, 10)));

        phase.complete("Embedding complete".to_string());
        assert_eq!(
            phase,
            EmbedPhase::Completed { message: "Embedding complete".to_string() }
        );
    }

    #[test]
    fn overlapping_submission_is_rejected() {
        let mut phase = EmbedPhase::Idle;
        assert!(phase.begin());
        phase.advance(event(1, 4));
        assert!(!phase.begin());
        assert_eq!(phase.progress(), Some(event(1, 4)));
    }

    #[test]
    fn terminal_states_ignore_late_events() {
        let mut phase = EmbedPhase::Idle;
        phase.begin();
        phase.fail("connection reset".to_string());
        phase.advance(event(9, 10));
        phase.complete("late".to_string());
        assert!(matches!(phase, EmbedPhase::Failed { .. }));
    }

    #[test]
    fn failure_is_distinguishable_from_completion() {
        let mut failed = EmbedPhase::Idle;
        failed.begin();
        failed.advance(event(3, 10));
        failed.fail("boom".to_string());
        assert!(!matches!(failed, EmbedPhase::Completed { .. }));
        assert_eq!(failed.progress(), None);
    }

    #[test]
    fn reset_only_applies_to_terminal_states() {
        let mut phase = EmbedPhase::Idle;
        phase.begin();
        phase.reset();
        assert!(phase.in_flight());

        phase.cancel();
        assert_eq!(phase, EmbedPhase::Cancelled);
        phase.reset();
        assert_eq!(phase, EmbedPhase::Idle);
    }

    #[test]
    fn new_submission_after_terminal_state() {
        let mut phase = EmbedPhase::Idle;
        phase.begin();
        phase.complete("done".to_string());
        assert!(phase.begin());
        assert_eq!(phase, EmbedPhase::Submitting);
    }
}
