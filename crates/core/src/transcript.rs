//! Speech capture and transcript assembly.
//!
//! Recognizers report a cumulative result list on every event: earlier
//! results can still change and be promoted from interim to final. The
//! transcript is therefore recomputed from the whole list each time by the
//! pure reducer [`TranscriptState::reduce`] rather than accumulated.

use crate::error::TransitionError;
use serde::{Deserialize, Serialize};

/// One segment reported by a speech recognizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub transcript: String,
    pub is_final: bool,
}

impl RecognitionResult {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            transcript: text.into(),
            is_final: false,
        }
    }

    pub fn finalized(text: impl Into<String>) -> Self {
        Self {
            transcript: text.into(),
            is_final: true,
        }
    }
}

/// Whether the running environment has a speech recognizer at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechCapability {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TranscriptState {
    pub interim: String,
    pub final_text: String,
    pub is_capturing: bool,
}

impl TranscriptState {
    /// Recomputes the transcript from a recognizer's full result list.
    pub fn reduce(prior: &TranscriptState, results: &[RecognitionResult]) -> TranscriptState {
        let mut final_text = String::new();
        let mut interim = String::new();
        for result in results {
            if result.is_final {
                final_text.push_str(&result.transcript);
            } else {
                interim.push_str(&result.transcript);
            }
        }
        TranscriptState {
            interim,
            final_text,
            is_capturing: prior.is_capturing,
        }
    }

    /// What the operator currently sees while speaking.
    pub fn display_text(&self) -> String {
        format!("{}{}", self.final_text, self.interim)
    }
}

/// Owns the transcript for one capture cycle.
#[derive(Debug, Clone)]
pub struct TranscriptAssembler {
    capability: SpeechCapability,
    state: TranscriptState,
    last_combined: String,
    utterance: Option<String>,
}

impl TranscriptAssembler {
    pub fn new(capability: SpeechCapability) -> Self {
        Self {
            capability,
            state: TranscriptState::default(),
            last_combined: String::new(),
            utterance: None,
        }
    }

    /// Input is disabled when the environment cannot recognize speech.
    pub fn is_input_enabled(&self) -> bool {
        self.capability == SpeechCapability::Available
    }

    /// Clears the previous transcript and begins a new capture.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        if !self.is_input_enabled() {
            return Err(TransitionError::SpeechUnavailable);
        }
        self.state = TranscriptState {
            is_capturing: true,
            ..TranscriptState::default()
        };
        self.last_combined.clear();
        self.utterance = None;
        Ok(())
    }

    /// Applies a recognizer event. Ignored once capture has stopped.
    pub fn on_results(&mut self, results: &[RecognitionResult]) {
        if !self.state.is_capturing {
            return;
        }
        self.state = TranscriptState::reduce(&self.state, results);
        let combined = self.state.display_text();
        if !combined.trim().is_empty() {
            self.last_combined = combined;
        }
    }

    /// Ends capture and commits the utterance used for dispatch.
    ///
    /// Falls back to the last interim+final text when nothing was marked
    /// final, so a captured phrase is never lost to recognizer timing.
    pub fn stop(&mut self) -> Option<String> {
        self.state.is_capturing = false;
        let committed = if self.state.final_text.trim().is_empty() {
            self.last_combined.trim()
        } else {
            self.state.final_text.trim()
        };
        self.utterance = (!committed.is_empty()).then(|| committed.to_string());
        self.utterance.clone()
    }

    pub fn state(&self) -> &TranscriptState {
        &self.state
    }

    pub fn utterance(&self) -> Option<&str> {
        self.utterance.as_deref()
    }

    /// Forgets everything, keeping only the capability.
    pub fn clear(&mut self) {
        *self = Self::new(self.capability);
    }
}
