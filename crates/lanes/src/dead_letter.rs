use std::{collections::VecDeque, sync::Mutex};

use {relay_protocol::Envelope, tracing::error};

/// Retain the most recent dead letters for operator inspection.
const RETAINED: usize = 256;

/// A message that exhausted its redelivery budget.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub envelope: Envelope,
    pub reason: String,
}

/// Terminal destination for exhausted messages. Every arrival is logged at
/// error level (the operator alert); the most recent entries stay readable
/// for diagnosis.
#[derive(Default)]
pub struct DeadLetterSink {
    entries: Mutex<VecDeque<DeadLetter>>,
}

impl DeadLetterSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, letter: DeadLetter) {
        error!(
            message_id = %letter.envelope.message_id,
            chat_id = %letter.envelope.chat_id,
            retry_count = letter.envelope.retry_count,
            reason = %letter.reason,
            "message dead-lettered"
        );
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if entries.len() >= RETAINED {
            entries.pop_front();
        }
        entries.push_back(letter);
    }

    /// Snapshot of the retained dead letters, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<DeadLetter> {
        self.entries
            .lock()
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
