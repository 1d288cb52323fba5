//! Chat service driving one request from message to streamed reply.
//!
//! ChatService wires the context aggregator, the tool-calling orchestrator
//! and the streaming responder together, then hands the finished exchange
//! to background jobs (conversation cache update, memory write-back). The
//! background jobs start only after the `end` frame has been sent and the
//! response channel closed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use parley_types::chat::StreamFrame;
use parley_types::config::{ParleyConfig, StreamingConfig};
use parley_types::context::PriorTurn;
use parley_types::provider::ProviderEndpoint;
use parley_types::tool::ToolsSummary;
use parley_types::trace::FlowTrace;

use crate::background::BackgroundTasks;
use crate::context::store::{ConversationStore, MemorySearch, UserContextStore};
use crate::context::prefetch::PrefetchCache;
use crate::context::{AggregatorSettings, ContextAggregator};
use crate::llm::fallback::TokenFallbackChain;
use crate::llm::provider::LlmProviderFactory;
use crate::llm::token_guard::TokenGuard;
use crate::memory::WriteBackError;
use crate::memory::analyzer::{AnalysisError, ExchangeAnalyzer};
use crate::memory::writer::{CompletedExchange, MemorySink, MemoryWriter};
use crate::notify::Notifier;
use crate::provider::{ProviderCache, ProviderResolver};
use crate::repository::task_config::TaskConfigRepository;
use crate::tools::host::ToolHost;
use crate::tools::runner::{ToolRunner, ToolTimeouts};
use crate::tools::sanitize::RedactingSanitizer;

use super::ChatError;
use super::orchestrator::ConversationOrchestrator;
use super::prompt::{build_messages, build_system_prompt};
use super::stream::StreamingResponder;

/// External collaborators the service is assembled from.
pub struct ChatDeps<R, M, X, F, T, N> {
    pub task_configs: R,
    pub memory: Arc<M>,
    pub contexts: Arc<X>,
    pub llm_factory: Arc<F>,
    pub tools: Arc<T>,
    pub notifier: Arc<N>,
    pub background: BackgroundTasks,
}

/// Summary of a delivered reply.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub message_id: String,
    pub text: String,
    pub tools: ToolsSummary,
    pub iterations: u32,
    pub exhausted: bool,
}

/// A delivered exchange waiting for its background jobs.
struct PendingWriteBack {
    exchange: CompletedExchange,
    endpoint: ProviderEndpoint,
}

pub struct ChatService<R, M, X, F, T, N> {
    aggregator: ContextAggregator<R, M, X>,
    orchestrator: ConversationOrchestrator<F, T, N>,
    factory: Arc<F>,
    analyzer: ExchangeAnalyzer,
    writer: Arc<MemoryWriter<M>>,
    contexts: Arc<X>,
    background: BackgroundTasks,
    streaming: StreamingConfig,
    conversation_window: usize,
}

impl<R, M, X, F, T, N> ChatService<R, M, X, F, T, N>
where
    R: TaskConfigRepository + 'static,
    M: MemorySearch + MemorySink + 'static,
    X: UserContextStore + ConversationStore + 'static,
    F: LlmProviderFactory + 'static,
    T: ToolHost + 'static,
    N: Notifier + 'static,
{
    pub fn new(config: &ParleyConfig, deps: ChatDeps<R, M, X, F, T, N>) -> Self {
        let resolver = Arc::new(ProviderResolver::new(
            deps.task_configs,
            ProviderCache::new(Duration::from_secs(config.provider_cache.ttl_secs)),
        ));
        let aggregator = ContextAggregator::new(
            resolver,
            deps.memory.clone(),
            deps.contexts.clone(),
            Arc::new(PrefetchCache::new(Duration::from_secs(config.memory.prefetch_ttl_secs))),
            deps.background.clone(),
            AggregatorSettings {
                search_limit: config.memory.search_limit,
                prefetch_max_queries: config.memory.prefetch_max_queries,
            },
        );

        let runner = ToolRunner::new(
            deps.tools,
            Box::new(RedactingSanitizer::default()),
            ToolTimeouts {
                per_call: Duration::from_millis(config.orchestrator.tool_call_timeout_ms),
                batch: Duration::from_millis(config.orchestrator.tool_batch_timeout_ms),
            },
        );
        let chain = TokenFallbackChain::new(
            TokenGuard::new(config.token_guard.clone(), config.model_limits.clone()),
            deps.notifier,
        );
        let orchestrator = ConversationOrchestrator::new(
            deps.llm_factory.clone(),
            runner,
            chain,
            config.orchestrator.clone(),
            config.llm.clone(),
        );

        Self {
            aggregator,
            orchestrator,
            factory: deps.llm_factory,
            analyzer: ExchangeAnalyzer::default(),
            writer: Arc::new(MemoryWriter::new(deps.memory, config.memory.importance_threshold)),
            contexts: deps.contexts,
            background: deps.background,
            streaming: config.streaming.clone(),
            conversation_window: config.memory.conversation_window,
        }
    }

    pub fn background(&self) -> &BackgroundTasks {
        &self.background
    }

    /// Open a response channel with a fresh message id.
    pub fn open_stream(&self) -> (StreamingResponder, mpsc::Receiver<StreamFrame>) {
        StreamingResponder::channel(Uuid::new_v4().to_string(), &self.streaming)
    }

    /// Answer `message` for `user_id`, streaming frames through `responder`.
    ///
    /// Every exit path emits `start` first and `end` last. A request-fatal
    /// error is also sent as a single `error` frame before `end` and then
    /// returned to the caller for logging.
    pub async fn run_chat(
        &self,
        user_id: &str,
        message: &str,
        prior_turns: Option<Vec<PriorTurn>>,
        mut responder: StreamingResponder,
    ) -> Result<ChatReply, ChatError> {
        let correlation_id = responder.message_id().to_string();
        let span = info_span!("chat.request", user_id, correlation_id = %correlation_id);

        async move {
            let mut trace = FlowTrace::new(correlation_id.as_str());
            responder.start().await;

            let (result, pending) = match self
                .respond(user_id, message, prior_turns, &mut responder, &mut trace)
                .await
            {
                Ok((reply, pending)) => (Ok(reply), Some(pending)),
                Err(e) => {
                    warn!(error = %e, "Chat request failed");
                    responder.error(e.to_string()).await;
                    (Err(e), None)
                }
            };
            responder.end().await;
            drop(responder);

            // The channel is closed from here on.
            if let Some(pending) = pending {
                self.schedule_write_back(pending);
            }

            debug!(
                trace = %serde_json::to_string(&trace).unwrap_or_default(),
                "Flow trace"
            );
            result
        }
        .instrument(span)
        .await
    }

    async fn respond(
        &self,
        user_id: &str,
        message: &str,
        prior_turns: Option<Vec<PriorTurn>>,
        responder: &mut StreamingResponder,
        trace: &mut FlowTrace,
    ) -> Result<(ChatReply, PendingWriteBack), ChatError> {
        let ctx = self.aggregator.gather(user_id, message, trace).await?;

        let messages = build_messages(
            build_system_prompt(&ctx),
            prior_turns.as_deref(),
            &ctx.conversation.turns,
            message,
        );
        let outcome = self.orchestrator.run(user_id, &ctx.provider, messages, trace).await?;

        let summary = ToolsSummary::from_results(&outcome.tool_results);
        responder.tools(summary.clone()).await;
        responder.tokens(&outcome.final_text).await;
        responder.end().await;

        info!(
            iterations = outcome.iterations,
            tool_calls = summary.count,
            exhausted = outcome.exhausted,
            chars = outcome.final_text.chars().count(),
            "Chat reply delivered"
        );

        let pending = PendingWriteBack {
            exchange: CompletedExchange {
                user_id: user_id.to_string(),
                correlation_id: responder.message_id().to_string(),
                user_message: message.to_string(),
                assistant_message: outcome.final_text.clone(),
                tool_stats: outcome.tool_stats,
            },
            endpoint: ctx.provider.primary,
        };
        let reply = ChatReply {
            message_id: responder.message_id().to_string(),
            text: outcome.final_text,
            tools: summary,
            iterations: outcome.iterations,
            exhausted: outcome.exhausted,
        };
        Ok((reply, pending))
    }

    fn schedule_write_back(&self, pending: PendingWriteBack) {
        let PendingWriteBack { exchange, endpoint } = pending;

        self.background.submit("conversation_update", {
            let contexts = self.contexts.clone();
            let exchange = exchange.clone();
            let window = self.conversation_window;
            async move {
                contexts
                    .append_exchange(
                        &exchange.user_id,
                        &exchange.user_message,
                        &exchange.assistant_message,
                        window,
                    )
                    .await
            }
        });

        if exchange.assistant_message.trim().is_empty() {
            debug!(user_id = %exchange.user_id, "Empty reply, skipping memory write-back");
            return;
        }

        self.background.submit("memory_write_back", {
            let factory = self.factory.clone();
            let analyzer = self.analyzer.clone();
            let writer = self.writer.clone();
            async move {
                let provider = factory.create(&endpoint).map_err(AnalysisError::from)?;
                let analysis = analyzer
                    .analyze(
                        &provider,
                        &endpoint.model_id,
                        &exchange.user_message,
                        &exchange.assistant_message,
                    )
                    .await?;
                writer.write(&exchange, &analysis).await?;
                Ok::<(), WriteBackError>(())
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        InMemoryContexts, InMemoryMemory, InMemoryTaskConfigs, MockToolHost, RecordingNotifier,
        ScriptedFactory, ScriptedProvider, ToolBehavior, chat_task_config, memory_hit, text_response,
    };
    use parley_types::error::ConfigurationError;
    use parley_types::llm::{LlmError, MessageRole};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc::error::TryRecvError;

    type TestService = ChatService<
        InMemoryTaskConfigs,
        InMemoryMemory,
        InMemoryContexts,
        ScriptedFactory,
        MockToolHost,
        RecordingNotifier,
    >;

    const LOW_VALUE_VERDICT: &str = r#"{
        "classification": {"type": "question", "sentiment": "neutral", "topic": "weather", "entities": ["Paris"], "confidence": 0.8},
        "assessment": {"should_store": false, "is_factual_declaration": false, "extracted_fact": null, "adjusted_importance_score": 0.1, "tags": []}
    }"#;

    const FACT_VERDICT: &str = r#"{
        "classification": {"type": "factual_declaration", "sentiment": "positive", "topic": "home", "entities": ["Lyon"], "confidence": 0.9},
        "assessment": {"should_store": true, "is_factual_declaration": true, "extracted_fact": "The user lives in Lyon", "adjusted_importance_score": 0.8, "tags": ["home"]}
    }"#;

    struct Fixture {
        service: TestService,
        memory: Arc<InMemoryMemory>,
        contexts: Arc<InMemoryContexts>,
        background: BackgroundTasks,
    }

    fn fixture(configured: bool, provider: ScriptedProvider, host: MockToolHost) -> Fixture {
        let task_configs = InMemoryTaskConfigs::default();
        if configured {
            task_configs.put(chat_task_config("u1", "gpt-4o"));
        }
        let memory = Arc::new(InMemoryMemory::with_hits(vec![memory_hit("m1", "The user likes hiking")]));
        let contexts = Arc::new(InMemoryContexts::default());
        let background = BackgroundTasks::new();

        let mut config = ParleyConfig::default();
        config.streaming.chunk_delay_ms = 0;

        let service = ChatService::new(
            &config,
            ChatDeps {
                task_configs,
                memory: memory.clone(),
                contexts: contexts.clone(),
                llm_factory: Arc::new(ScriptedFactory::default().with(provider)),
                tools: Arc::new(host),
                notifier: Arc::new(RecordingNotifier::default()),
                background: background.clone(),
            },
        );
        Fixture {
            service,
            memory,
            contexts,
            background,
        }
    }

    async fn drain(mut rx: mpsc::Receiver<StreamFrame>) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    }

    fn kinds(frames: &[StreamFrame]) -> Vec<&'static str> {
        frames.iter().map(StreamFrame::kind).collect()
    }

    fn token_text(frames: &[StreamFrame]) -> String {
        frames
            .iter()
            .filter_map(|f| match f {
                StreamFrame::Token { data } => Some(data.as_str()),
                _ => None,
            })
            .collect()
    }

    fn assert_framing(frames: &[StreamFrame]) {
        let kinds = kinds(frames);
        assert_eq!(kinds.first(), Some(&"start"));
        assert_eq!(kinds.last(), Some(&"end"));
        assert_eq!(kinds.iter().filter(|k| **k == "start").count(), 1);
        assert_eq!(kinds.iter().filter(|k| **k == "end").count(), 1);
        assert!(kinds.iter().filter(|k| **k == "error").count() <= 1);
    }

    #[tokio::test]
    async fn test_failed_tool_is_reported_before_the_answer() {
        let answer = "Désolé, je n'ai pas pu joindre le service météo.";
        let provider = ScriptedProvider::new(
            "openai",
            vec![
                Ok(text_response(
                    r#"Je vérifie. http_fetch{"action":"get","url":"https://wttr.in/Paris"}"#,
                )),
                Ok(text_response(answer)),
                Ok(text_response(LOW_VALUE_VERDICT)),
            ],
        );
        let host = MockToolHost::default().with("http_fetch", ToolBehavior::Fail("network error".to_string()));
        let f = fixture(true, provider.clone(), host);

        let (responder, rx) = f.service.open_stream();
        let message_id = responder.message_id().to_string();
        let reply = f
            .service
            .run_chat("u1", "Il fait quel temps à Paris?", None, responder)
            .await
            .unwrap();
        let frames = drain(rx).await;

        assert_framing(&frames);
        assert_eq!(frames[0], StreamFrame::Start { message_id: message_id.clone() });
        assert_eq!(kinds(&frames)[1], "tools");
        match &frames[1] {
            StreamFrame::Tools { data } => {
                assert_eq!(data.count, 1);
                assert_eq!(data.tools[0].tool, "http_fetch");
                assert!(!data.tools[0].success);
            }
            other => panic!("expected tools frame, got {other:?}"),
        }
        assert_eq!(token_text(&frames), answer);
        assert_eq!(reply.text, answer);
        assert_eq!(reply.iterations, 2);

        // The model saw the failure envelope, not an exception.
        let second = &provider.calls()[1].messages;
        let tool_message = second.iter().find(|m| m.role() == MessageRole::Tool).unwrap();
        assert!(tool_message.text().contains("network error"));

        f.background.wait_idle().await;
        assert!(f.memory.saved().is_empty());
        let conversation = f.contexts.conversation("u1").unwrap();
        assert_eq!(conversation.turns.len(), 2);
        assert_eq!(conversation.turns[1].content, answer);
    }

    #[tokio::test]
    async fn test_configuration_error_is_streamed_verbatim() {
        let f = fixture(false, ScriptedProvider::new("openai", vec![]), MockToolHost::default());
        let (responder, rx) = f.service.open_stream();

        let err = f.service.run_chat("u1", "hello", None, responder).await.unwrap_err();
        assert!(matches!(err, ChatError::Configuration(ConfigurationError::NoProvider)));

        let frames = drain(rx).await;
        assert_eq!(kinds(&frames), ["start", "error", "end"]);
        assert_eq!(
            frames[1],
            StreamFrame::Error {
                data: ConfigurationError::NoProvider.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_model_failure_ends_stream_with_error() {
        let provider = ScriptedProvider::new("openai", vec![Err(LlmError::AuthenticationFailed)]);
        let f = fixture(true, provider, MockToolHost::default());
        let (responder, rx) = f.service.open_stream();

        assert!(f.service.run_chat("u1", "hello", None, responder).await.is_err());
        let frames = drain(rx).await;
        assert_eq!(kinds(&frames), ["start", "error", "end"]);

        f.background.wait_idle().await;
        assert!(f.contexts.conversation("u1").is_none());
    }

    #[tokio::test]
    async fn test_analysis_failure_after_end_leaves_response_intact() {
        let provider = ScriptedProvider::new(
            "openai",
            vec![
                Ok(text_response("Bonjour!")),
                Err(LlmError::Overloaded("busy".to_string())),
            ],
        );
        let f = fixture(true, provider.clone(), MockToolHost::default());
        let (responder, mut rx) = f.service.open_stream();

        f.service.run_chat("u1", "salut", None, responder).await.unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        let delivered = serde_json::to_string(&frames).unwrap();

        f.background.wait_idle().await;
        assert_eq!(provider.calls().len(), 2);
        assert!(rx.recv().await.is_none());
        assert_eq!(serde_json::to_string(&frames).unwrap(), delivered);
        assert_eq!(kinds(&frames), ["start", "token", "token", "end"]);
        assert!(f.memory.saved().is_empty());
        assert!(f.contexts.conversation("u1").is_some());
    }

    #[tokio::test]
    async fn test_factual_declaration_is_remembered() {
        let provider = ScriptedProvider::new(
            "openai",
            vec![Ok(text_response("Lyon is lovely!")), Ok(text_response(FACT_VERDICT))],
        );
        let f = fixture(true, provider.clone(), MockToolHost::default());
        let (responder, rx) = f.service.open_stream();

        f.service.run_chat("u1", "I live in Lyon", None, responder).await.unwrap();
        drain(rx).await;
        f.background.wait_idle().await;

        let saved = f.memory.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].content, "The user lives in Lyon");
        assert_eq!(saved[0].user_id, "u1");

        let system = provider.calls()[0].messages[0].text().to_string();
        assert!(system.contains("The user likes hiking"));
    }

    #[tokio::test]
    async fn test_client_turns_are_sent_to_the_model() {
        let provider = ScriptedProvider::new(
            "openai",
            vec![Ok(text_response("Yes.")), Ok(text_response(LOW_VALUE_VERDICT))],
        );
        let f = fixture(true, provider.clone(), MockToolHost::default());
        let prior = vec![
            PriorTurn {
                role: MessageRole::User,
                content: "Is Lyon far from Paris?".to_string(),
            },
            PriorTurn {
                role: MessageRole::Assistant,
                content: "About two hours by train.".to_string(),
            },
        ];
        let (responder, rx) = f.service.open_stream();

        f.service.run_chat("u1", "Really?", Some(prior), responder).await.unwrap();
        drain(rx).await;
        f.background.wait_idle().await;

        let messages = &provider.calls()[0].messages;
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].text(), "Is Lyon far from Paris?");
        assert_eq!(messages[3].text(), "Really?");
    }

    #[tokio::test]
    async fn test_write_back_starts_after_stream_is_closed() {
        let receiver: Arc<Mutex<Option<mpsc::Receiver<StreamFrame>>>> = Arc::default();
        let closed_at_analysis = Arc::new(AtomicBool::new(false));
        let provider = ScriptedProvider::new(
            "openai",
            vec![Ok(text_response("Bonjour!")), Ok(text_response(LOW_VALUE_VERDICT))],
        )
        .on_call({
            let receiver = receiver.clone();
            let closed = closed_at_analysis.clone();
            move |index| {
                if index != 1 {
                    return;
                }
                let mut slot = receiver.lock().unwrap();
                let Some(rx) = slot.as_mut() else {
                    return;
                };
                loop {
                    match rx.try_recv() {
                        Ok(_) => continue,
                        Err(TryRecvError::Disconnected) => closed.store(true, Ordering::SeqCst),
                        Err(TryRecvError::Empty) => {}
                    }
                    break;
                }
            }
        });
        let f = fixture(true, provider.clone(), MockToolHost::default());
        let (responder, rx) = f.service.open_stream();
        *receiver.lock().unwrap() = Some(rx);

        f.service.run_chat("u1", "salut", None, responder).await.unwrap();
        f.background.wait_idle().await;

        assert_eq!(provider.calls().len(), 2);
        assert!(closed_at_analysis.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_concurrent_replies_keep_every_turn() {
        let provider = ScriptedProvider::new(
            "openai",
            vec![
                Ok(text_response("Première réponse.")),
                Ok(text_response("Seconde réponse.")),
                Ok(text_response(LOW_VALUE_VERDICT)),
                Ok(text_response(LOW_VALUE_VERDICT)),
            ],
        );
        let f = fixture(true, provider, MockToolHost::default());
        let (first, first_rx) = f.service.open_stream();
        let (second, second_rx) = f.service.open_stream();

        let (a, b, _, _) = tokio::join!(
            f.service.run_chat("u1", "question une", None, first),
            f.service.run_chat("u1", "question deux", None, second),
            drain(first_rx),
            drain(second_rx),
        );
        a.unwrap();
        b.unwrap();
        f.background.wait_idle().await;

        let conversation = f.contexts.conversation("u1").unwrap();
        assert_eq!(conversation.turns.len(), 4);
        let users: Vec<&str> = conversation
            .turns
            .iter()
            .filter(|t| t.role == MessageRole::User)
            .map(|t| t.content.as_str())
            .collect();
        assert!(users.contains(&"question une"));
        assert!(users.contains(&"question deux"));
    }
}
