use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use transcribe_core::{SegmentProgress, TranscriptionEngine, TranscriptionError, TranscriptionOutcome};

/// Scripted transcription engine: returns a fixed outcome, or a fixed error
/// if one was configured, and emits one progress tick per segment in the
/// scripted outcome.
pub struct FakeTranscriptionEngine {
    result: Mutex<Result<TranscriptionOutcome, TranscriptionErrorScript>>,
}

/// `TranscriptionError` isn't `Clone`, so the scripted failure is stored as
/// its own small enum and converted on each call.
enum TranscriptionErrorScript {
    InvalidMedia(String),
    Retryable(String),
    Permanent(String),
}

impl FakeTranscriptionEngine {
    pub fn succeeding(outcome: TranscriptionOutcome) -> Self {
        Self { result: Mutex::new(Ok(outcome)) }
    }

    pub fn failing_retryable(message: impl Into<String>) -> Self {
        Self { result: Mutex::new(Err(TranscriptionErrorScript::Retryable(message.into()))) }
    }

    pub fn failing_permanent(message: impl Into<String>) -> Self {
        Self { result: Mutex::new(Err(TranscriptionErrorScript::Permanent(message.into()))) }
    }

    pub fn failing_invalid_media(message: impl Into<String>) -> Self {
        Self { result: Mutex::new(Err(TranscriptionErrorScript::InvalidMedia(message.into()))) }
    }
}

#[async_trait]
impl TranscriptionEngine for FakeTranscriptionEngine {
    async fn transcribe(
        &self,
        _media_path: &Path,
        _language: &str,
        on_segment: &mut (dyn FnMut(SegmentProgress) + Send),
    ) -> Result<TranscriptionOutcome, TranscriptionError> {
        let result = self.result.lock().unwrap();

        match &*result {
            Ok(outcome) => {
                let total = outcome.duration_sec as f64;
                for segment in &outcome.segments {
                    on_segment(SegmentProgress { end_sec: segment.end, total_duration_sec: Some(total) });
                }
                Ok(outcome.clone())
            }
            Err(TranscriptionErrorScript::InvalidMedia(m)) => Err(TranscriptionError::InvalidMedia(m.clone())),
            Err(TranscriptionErrorScript::Retryable(m)) => Err(TranscriptionError::Retryable(m.clone())),
            Err(TranscriptionErrorScript::Permanent(m)) => Err(TranscriptionError::Permanent(m.clone())),
        }
    }
}
