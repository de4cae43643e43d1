//! Chat relay between one visitor's session and the completion endpoint.
//!
//! Every request is the synthesized system prompt followed by the whole
//! session history. Replies stream back through a [`Turn`], which appends
//! the assistant message only when the stream finishes cleanly.

pub mod prompt;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::core::config::AppConfig;
use crate::core::error::{ConfigError, ProviderError, RelayError};
use crate::core::message::{ChatMessage, MessageRole, TokenUsage};
use crate::core::model::ModelId;
use crate::core::provider::{Provider, ProviderEvent, ProviderEventStream};
use crate::core::session::{ConversationSession, SessionState};

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub subject_name: String,
    pub resume_context: String,
    pub welcome_message: String,
    pub timeout: Duration,
}

impl RelaySettings {
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            subject_name: config.chat.subject_name.clone(),
            resume_context: config.resume_context()?,
            welcome_message: config.chat.welcome_message.clone(),
            timeout: config.timeout(),
        })
    }
}

pub struct ConversationRelay {
    provider: Arc<dyn Provider>,
    system_prompt: String,
    welcome_message: String,
    timeout: Duration,
}

impl ConversationRelay {
    pub fn new(provider: Arc<dyn Provider>, settings: RelaySettings) -> Self {
        Self {
            provider,
            system_prompt: prompt::build_system_prompt(
                &settings.subject_name,
                &settings.resume_context,
            ),
            welcome_message: settings.welcome_message,
            timeout: settings.timeout,
        }
    }

    /// Build the relay from configuration. A missing credential fails here,
    /// before any request can be made.
    pub fn from_config(config: &AppConfig) -> Result<Self, RelayError> {
        let provider = crate::providers::create_provider(config)?;
        let settings = RelaySettings::from_config(config)?;
        Ok(Self::new(provider, settings))
    }

    pub fn model_id(&self) -> &ModelId {
        self.provider.model()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// New session, already holding the welcome message.
    pub fn start_session(&self) -> ConversationSession {
        let mut session = ConversationSession::new();
        self.open(&mut session);
        session
    }

    fn open(&self, session: &mut ConversationSession) {
        if session.state() == SessionState::Empty {
            session.push(ChatMessage::assistant(self.welcome_message.clone()));
            session.set_state(SessionState::Ready);
        }
    }

    /// The exact message list sent for the session's next request.
    pub fn outgoing_messages(&self, session: &ConversationSession) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(session.len() + 1);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(session.messages().iter().cloned());
        messages
    }

    /// Append the user's message and start streaming the reply.
    ///
    /// The user message stays in history even when the request fails, so a
    /// retry does not need to resubmit it.
    pub async fn submit_user_message<'s>(
        &self,
        session: &'s mut ConversationSession,
        text: &str,
    ) -> Result<Turn<'s>, RelayError> {
        if text.trim().is_empty() {
            return Err(RelayError::EmptyMessage);
        }

        self.open(session);
        session.push(ChatMessage::user(text));
        self.start_turn(session).await
    }

    /// Re-send the history after a failed turn, without appending anything.
    /// Only valid while the last message is an unanswered user message.
    pub async fn retry_last<'s>(
        &self,
        session: &'s mut ConversationSession,
    ) -> Result<Turn<'s>, RelayError> {
        let unanswered = matches!(session.last(), Some(m) if m.role == MessageRole::User);
        if !unanswered {
            return Err(RelayError::NothingToRetry);
        }
        self.start_turn(session).await
    }

    async fn start_turn<'s>(
        &self,
        session: &'s mut ConversationSession,
    ) -> Result<Turn<'s>, RelayError> {
        session.set_state(SessionState::Pending);

        let outgoing = self.outgoing_messages(session);
        let deadline = Instant::now() + self.timeout;

        tracing::debug!(
            session_id = %session.id,
            history = session.len(),
            model = %self.provider.model(),
            "submitting user message"
        );

        let opened =
            match tokio::time::timeout_at(deadline, self.provider.stream_response(&outgoing)).await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(self.timeout.as_secs())),
            };

        match opened {
            Ok(stream) => Ok(Turn {
                session,
                stream,
                reply: String::new(),
                deadline,
                timeout_secs: self.timeout.as_secs(),
                cancel: CancellationToken::new(),
                usage: None,
                done: false,
            }),
            Err(error) => {
                tracing::warn!(session_id = %session.id, %error, "completion request failed");
                session.set_state(SessionState::Ready);
                Err(RelayError::ExternalService(error))
            }
        }
    }
}

enum Step {
    Event(Option<ProviderEvent>),
    TimedOut,
    Cancelled,
}

/// One in-flight reply. Fragments are pulled with [`Turn::next_fragment`];
/// the stream cannot be restarted. Dropping an unfinished turn discards it.
pub struct Turn<'s> {
    session: &'s mut ConversationSession,
    stream: ProviderEventStream,
    reply: String,
    deadline: Instant,
    timeout_secs: u64,
    cancel: CancellationToken,
    usage: Option<TokenUsage>,
    done: bool,
}

impl<'s> Turn<'s> {
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn reply_so_far(&self) -> &str {
        &self.reply
    }

    pub fn usage(&self) -> Option<&TokenUsage> {
        self.usage.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.done
    }

    /// Next text fragment. `None` once the reply is complete and recorded;
    /// an error is yielded at most once and ends the turn.
    pub async fn next_fragment(&mut self) -> Option<Result<String, RelayError>> {
        if self.done {
            return None;
        }

        loop {
            let step = tokio::select! {
                _ = self.cancel.cancelled() => Step::Cancelled,
                next = tokio::time::timeout_at(self.deadline, self.stream.next()) => match next {
                    Ok(event) => Step::Event(event),
                    Err(_) => Step::TimedOut,
                },
            };

            match step {
                Step::Cancelled => return Some(Err(self.fail(ProviderError::Cancelled))),
                Step::TimedOut => {
                    return Some(Err(self.fail(ProviderError::Timeout(self.timeout_secs))))
                }
                Step::Event(Some(ProviderEvent::ContentDelta { text })) => {
                    if text.is_empty() {
                        continue;
                    }
                    self.reply.push_str(&text);
                    return Some(Ok(text));
                }
                Step::Event(Some(ProviderEvent::Complete { usage })) => {
                    self.usage = Some(usage);
                    self.complete();
                    return None;
                }
                Step::Event(Some(ProviderEvent::Error { error })) => {
                    return Some(Err(self.fail(error)))
                }
                Step::Event(None) => {
                    return Some(Err(self.fail(ProviderError::Stream(
                        "stream ended before completion".into(),
                    ))))
                }
            }
        }
    }

    /// Drive the turn to the end, handing each fragment to `sink`.
    pub async fn collect(mut self, mut sink: impl FnMut(&str)) -> Result<String, RelayError> {
        while let Some(fragment) = self.next_fragment().await {
            sink(&fragment?);
        }
        Ok(std::mem::take(&mut self.reply))
    }

    fn complete(&mut self) {
        self.done = true;
        self.session.push(ChatMessage::assistant(self.reply.clone()));
        self.session.set_state(SessionState::Ready);
        tracing::debug!(
            session_id = %self.session.id,
            reply_chars = self.reply.chars().count(),
            "reply recorded"
        );
    }

    fn fail(&mut self, error: ProviderError) -> RelayError {
        self.done = true;
        self.session.set_state(SessionState::Ready);
        tracing::warn!(session_id = %self.session.id, %error, "reply stream failed");
        RelayError::ExternalService(error)
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.session.set_state(SessionState::Ready);
            tracing::debug!(session_id = %self.session.id, "unfinished reply discarded");
        }
    }
}
