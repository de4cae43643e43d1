use async_trait::async_trait;
use std::pin::Pin;

use crate::core::error::ProviderError;
use crate::core::message::{ChatMessage, TokenUsage};
use crate::core::model::ModelId;

#[derive(Debug, Clone)]
pub enum ProviderEvent {
    ContentDelta { text: String },
    Complete { usage: TokenUsage },
    Error { error: ProviderError },
}

pub type ProviderEventStream =
    Pin<Box<dyn futures_core::Stream<Item = ProviderEvent> + Send>>;

/// A chat completion backend. `messages` is the full outgoing list, system
/// prompt included; implementations forward it as-is.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn stream_response(
        &self,
        messages: &[ChatMessage],
    ) -> Result<ProviderEventStream, ProviderError>;

    fn model(&self) -> &ModelId;
}
