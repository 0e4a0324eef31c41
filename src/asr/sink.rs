//! Result presentation
//!
//! Decoded events are handed to a [`ResultSink`] as soon as they arrive.

use super::protocol::ResultEvent;

/// Consumer of decoded result events
pub trait ResultSink: Send + Sync {
    fn on_event(&self, event: &ResultEvent);
}

/// Sink that reports every event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ResultSink for LogSink {
    fn on_event(&self, event: &ResultEvent) {
        match event {
            ResultEvent::Segment(segment) => {
                if segment.finished {
                    tracing::info!("[done] segment {}: {}", segment.idx, segment.text);
                } else {
                    tracing::info!("[partial] segment {}: {}", segment.idx, segment.text);
                }
            }
            ResultEvent::Status { status } => {
                tracing::info!("[status] {}", status);
            }
            ResultEvent::Recognition(result) => {
                tracing::info!("[result] {}", result.text);
                if result.lang != "auto" {
                    tracing::info!("    language: {}", result.lang);
                }
                if !result.emotion.is_empty() {
                    tracing::info!("    emotion: {}", result.emotion);
                }
                if !result.event.is_empty() {
                    tracing::info!("    event: {}", result.event);
                }
                if !result.timestamps.is_empty() {
                    tracing::info!("    timestamps: {}", result.timestamps.len());
                }
                if !result.tokens.is_empty() {
                    tracing::info!("    tokens: {}", result.tokens.join(", "));
                }
            }
            ResultEvent::ServerError { message } => {
                tracing::error!("[server error] {}", message);
            }
            ResultEvent::Other(raw) => {
                tracing::info!("[message] {}", raw);
            }
        }
    }
}
