use super::*;
use crate::core::config::ApiKey;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Replays a fixed event script and records every outgoing request.
struct ScriptedProvider {
    model: ModelId,
    script: Vec<ProviderEvent>,
    open_error: Option<ProviderError>,
    stall: Option<Duration>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn replying(fragments: &[&str]) -> Self {
        let mut script: Vec<ProviderEvent> = fragments
            .iter()
            .map(|t| ProviderEvent::ContentDelta {
                text: t.to_string(),
            })
            .collect();
        script.push(ProviderEvent::Complete {
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 7,
            },
        });
        Self::with_script(script)
    }

    fn with_script(script: Vec<ProviderEvent>) -> Self {
        Self {
            model: ModelId("scripted".into()),
            script,
            open_error: None,
            stall: None,
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn failing(error: ProviderError) -> Self {
        let mut provider = Self::with_script(vec![]);
        provider.open_error = Some(error);
        provider
    }

    fn stalling(after: &[&str], stall: Duration) -> Self {
        let mut provider = Self::replying(after);
        provider.stall = Some(stall);
        provider
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_request(&self) -> Vec<ChatMessage> {
        self.requests.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn stream_response(
        &self,
        messages: &[ChatMessage],
    ) -> Result<ProviderEventStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(messages.to_vec());
        if let Some(err) = &self.open_error {
            return Err(err.clone());
        }

        let script = self.script.clone();
        let stall = self.stall;
        Ok(Box::pin(async_stream::stream! {
            for event in script {
                if let (Some(d), ProviderEvent::Complete { .. }) = (stall, &event) {
                    tokio::time::sleep(d).await;
                }
                yield event;
            }
        }))
    }

    fn model(&self) -> &ModelId {
        &self.model
    }
}

fn settings() -> RelaySettings {
    RelaySettings {
        subject_name: "Test Person".into(),
        resume_context: "[Education]\nB.Sc. in Statistics".into(),
        welcome_message: "Hi, ask me anything.".into(),
        timeout: Duration::from_secs(5),
    }
}

fn relay(provider: &Arc<ScriptedProvider>) -> ConversationRelay {
    let provider: Arc<dyn Provider> = provider.clone();
    ConversationRelay::new(provider, settings())
}

#[test]
fn test_start_session_inserts_welcome() {
    let provider = Arc::new(ScriptedProvider::replying(&[]));
    let relay = relay(&provider);

    let fresh = ConversationSession::new();
    assert_eq!(fresh.state(), SessionState::Empty);
    assert!(fresh.is_empty());

    let session = relay.start_session();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.len(), 1);
    assert_eq!(session.messages()[0].role, MessageRole::Assistant);
    assert_eq!(session.messages()[0].content, "Hi, ask me anything.");
    assert_eq!(provider.calls(), 0);
}

#[test]
fn test_system_prompt_embeds_context() {
    let provider = Arc::new(ScriptedProvider::replying(&[]));
    let relay = relay(&provider);
    let prompt = relay.system_prompt();
    assert!(prompt.starts_with("You are a helpful assistant representing Test Person."));
    assert!(prompt.contains("[Education]\nB.Sc. in Statistics"));
    assert!(prompt.contains("offer to contact Test Person directly"));
}

#[tokio::test]
async fn test_successful_turn_appends_two_messages() {
    let provider = Arc::new(ScriptedProvider::replying(&["I studied ", "statistics."]));
    let relay = relay(&provider);
    let mut session = relay.start_session();
    let before = session.len();

    let mut turn = relay
        .submit_user_message(&mut session, "What did you study?")
        .await
        .unwrap();

    let mut fragments = Vec::new();
    while let Some(fragment) = turn.next_fragment().await {
        fragments.push(fragment.unwrap());
    }
    assert_eq!(fragments, vec!["I studied ", "statistics."]);
    assert!(turn.is_finished());
    assert_eq!(turn.usage().map(|u| u.output_tokens), Some(7));
    assert!(turn.next_fragment().await.is_none());
    drop(turn);

    assert_eq!(session.len(), before + 2);
    assert_eq!(session.state(), SessionState::Ready);
    let last = session.last().unwrap();
    assert_eq!(last.role, MessageRole::Assistant);
    assert_eq!(last.content, "I studied statistics.");
}

#[tokio::test]
async fn test_request_is_system_prompt_then_history() {
    let provider = Arc::new(ScriptedProvider::replying(&["ok"]));
    let relay = relay(&provider);
    let mut session = relay.start_session();

    relay
        .submit_user_message(&mut session, "first")
        .await
        .unwrap()
        .collect(|_| {})
        .await
        .unwrap();
    relay
        .submit_user_message(&mut session, "second")
        .await
        .unwrap()
        .collect(|_| {})
        .await
        .unwrap();

    let sent = provider.last_request();
    let shape: Vec<(MessageRole, &str)> =
        sent.iter().map(|m| (m.role, m.content.as_str())).collect();
    assert_eq!(shape.len(), 5);
    assert_eq!(shape[0].0, MessageRole::System);
    assert_eq!(shape[0].1, relay.system_prompt());
    assert_eq!(
        &shape[1..],
        &[
            (MessageRole::Assistant, "Hi, ask me anything."),
            (MessageRole::User, "first"),
            (MessageRole::Assistant, "ok"),
            (MessageRole::User, "second"),
        ]
    );
    // the hidden prompt is synthesized per request, never stored
    assert!(session
        .messages()
        .iter()
        .all(|m| m.role != MessageRole::System));
}

#[tokio::test]
async fn test_empty_message_rejected_without_request() {
    let provider = Arc::new(ScriptedProvider::replying(&["unused"]));
    let relay = relay(&provider);
    let mut session = relay.start_session();

    for text in ["", "   \n"] {
        let err = relay.submit_user_message(&mut session, text).await.err().unwrap();
        assert!(matches!(err, RelayError::EmptyMessage));
    }
    assert_eq!(provider.calls(), 0);
    assert_eq!(session.len(), 1);
}

#[tokio::test]
async fn test_open_failure_keeps_user_message_only() {
    let provider = Arc::new(ScriptedProvider::failing(ProviderError::Api {
        status: 500,
        message: "boom".into(),
    }));
    let relay = relay(&provider);
    let mut session = relay.start_session();
    let before = session.len();

    let err = relay
        .submit_user_message(&mut session, "Tell me about RED")
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        RelayError::ExternalService(ProviderError::Api { status: 500, .. })
    ));
    assert_eq!(session.len(), before + 1);
    assert_eq!(session.last().unwrap().role, MessageRole::User);
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_stream_error_discards_partial_reply() {
    let provider = Arc::new(ScriptedProvider::with_script(vec![
        ProviderEvent::ContentDelta {
            text: "partial".into(),
        },
        ProviderEvent::Error {
            error: ProviderError::Stream("connection reset".into()),
        },
    ]));
    let relay = relay(&provider);
    let mut session = relay.start_session();
    let before = session.len();

    let mut seen = String::new();
    let result = relay
        .submit_user_message(&mut session, "hello")
        .await
        .unwrap()
        .collect(|f| seen.push_str(f))
        .await;

    assert_eq!(seen, "partial");
    assert!(matches!(
        result,
        Err(RelayError::ExternalService(ProviderError::Stream(_)))
    ));
    assert_eq!(session.len(), before + 1);
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_stream_without_completion_is_failure() {
    let provider = Arc::new(ScriptedProvider::with_script(vec![
        ProviderEvent::ContentDelta { text: "hm".into() },
    ]));
    let relay = relay(&provider);
    let mut session = relay.start_session();
    let before = session.len();

    let result = relay
        .submit_user_message(&mut session, "hello")
        .await
        .unwrap()
        .collect(|_| {})
        .await;
    assert!(result.is_err());
    assert_eq!(session.len(), before + 1);
}

#[tokio::test]
async fn test_retry_after_failure_succeeds() {
    let failing = Arc::new(ScriptedProvider::failing(ProviderError::Http(
        "connection refused".into(),
    )));
    let mut session = relay(&failing).start_session();
    assert!(relay(&failing)
        .submit_user_message(&mut session, "question")
        .await
        .is_err());

    let working = Arc::new(ScriptedProvider::replying(&["answer"]));
    let reply = relay(&working)
        .submit_user_message(&mut session, "question")
        .await
        .unwrap()
        .collect(|_| {})
        .await
        .unwrap();
    assert_eq!(reply, "answer");

    let roles: Vec<MessageRole> = session.messages().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::Assistant,
            MessageRole::User,
            MessageRole::User,
            MessageRole::Assistant,
        ]
    );
}

#[tokio::test]
async fn test_timeout_is_external_service_error() {
    let provider = Arc::new(ScriptedProvider::stalling(&["slow"], Duration::from_secs(30)));
    let mut relay_settings = settings();
    relay_settings.timeout = Duration::from_millis(50);
    let dyn_provider: Arc<dyn Provider> = provider.clone();
    let relay = ConversationRelay::new(dyn_provider, relay_settings);
    let mut session = relay.start_session();
    let before = session.len();

    let result = relay
        .submit_user_message(&mut session, "hello")
        .await
        .unwrap()
        .collect(|_| {})
        .await;
    assert!(matches!(
        result,
        Err(RelayError::ExternalService(ProviderError::Timeout(_)))
    ));
    assert_eq!(session.len(), before + 1);
}

#[tokio::test]
async fn test_cancellation_leaves_history_unchanged() {
    let provider = Arc::new(ScriptedProvider::stalling(&["a"], Duration::from_secs(30)));
    let relay = relay(&provider);
    let mut session = relay.start_session();
    let before = session.len();

    let token = CancellationToken::new();
    let mut turn = relay
        .submit_user_message(&mut session, "hello")
        .await
        .unwrap()
        .with_cancellation(token.clone());

    assert_eq!(turn.next_fragment().await.unwrap().unwrap(), "a");
    token.cancel();
    let err = turn.next_fragment().await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        RelayError::ExternalService(ProviderError::Cancelled)
    ));
    assert!(turn.next_fragment().await.is_none());
    drop(turn);

    assert_eq!(session.len(), before + 1);
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_dropped_turn_returns_to_ready() {
    let provider = Arc::new(ScriptedProvider::replying(&["one", "two"]));
    let relay = relay(&provider);
    let mut session = relay.start_session();

    {
        let mut turn = relay.submit_user_message(&mut session, "hi").await.unwrap();
        let _ = turn.next_fragment().await;
    }

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.len(), 2);
}

#[test]
fn test_missing_credential_fails_before_any_request() {
    let mut config = AppConfig::default();
    config.api_key = None;
    assert!(matches!(
        ConversationRelay::from_config(&config),
        Err(RelayError::Configuration(ConfigError::MissingApiKey(_)))
    ));

    config.api_key = Some(ApiKey::new(""));
    assert!(matches!(
        ConversationRelay::from_config(&config),
        Err(RelayError::Configuration(_))
    ));
}

#[test]
fn test_from_config_uses_builtin_resume() {
    let mut config = AppConfig::default();
    config.api_key = Some(ApiKey::new("key"));
    let relay = ConversationRelay::from_config(&config).unwrap();
    assert!(relay.system_prompt().contains("[Experience]"));
    assert_eq!(relay.model_id(), &ModelId::default());
}

#[tokio::test]
async fn test_retry_last_resends_without_appending() {
    let provider = Arc::new(ScriptedProvider::replying(&["second try"]));
    let relay = relay(&provider);
    let mut session = relay.start_session();

    assert!(matches!(
        relay.retry_last(&mut session).await.err().unwrap(),
        RelayError::NothingToRetry
    ));

    let failing = Arc::new(ScriptedProvider::failing(ProviderError::Timeout(5)));
    assert!(self::relay(&failing)
        .submit_user_message(&mut session, "still there?")
        .await
        .is_err());
    assert_eq!(session.len(), 2);

    let reply = relay
        .retry_last(&mut session)
        .await
        .unwrap()
        .collect(|_| {})
        .await
        .unwrap();
    assert_eq!(reply, "second try");
    assert_eq!(session.len(), 3);
    assert_eq!(provider.last_request().last().unwrap().content, "still there?");
}
