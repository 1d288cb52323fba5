//! In-memory collaborators and fixtures shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use parley_types::context::{ConversationContext, UserContext};
use parley_types::error::{NotifyError, RepositoryError, ToolError};
use parley_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, NativeToolCall, StopReason, ToolSchema, Usage,
};
use parley_types::memory::{MemoryCandidate, MemoryHit};
use parley_types::provider::{ChatTaskConfig, ProviderConfig, ProviderEndpoint, StoredProvider};
use parley_types::tool::ToolCallRequest;

use crate::context::store::{ConversationStore, MemorySearch, UserContextStore};
use crate::llm::box_provider::BoxLlmProvider;
use crate::llm::provider::{LlmProvider, LlmProviderFactory};
use crate::memory::writer::MemorySink;
use crate::notify::{Notifier, UserNotice};
use crate::repository::task_config::TaskConfigRepository;
use crate::tools::host::ToolHost;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn stored_provider(name: &str) -> StoredProvider {
    StoredProvider {
        id: format!("prov-{name}"),
        name: name.to_string(),
        api_key: format!("sk-{name}"),
        base_url: format!("https://{name}.example.com/v1"),
    }
}

pub fn chat_task_config(user_id: &str, model_id: &str) -> ChatTaskConfig {
    ChatTaskConfig {
        user_id: user_id.to_string(),
        provider: Some(stored_provider("openai")),
        model_id: Some(model_id.to_string()),
        fallback_provider: None,
        fallback_model_id: None,
    }
}

pub fn provider_config(model_id: &str) -> ProviderConfig {
    let provider = stored_provider("openai");
    ProviderConfig {
        primary: ProviderEndpoint {
            id: provider.id,
            name: provider.name,
            api_key: provider.api_key,
            base_url: provider.base_url,
            model_id: model_id.to_string(),
        },
        fallback: None,
    }
}

pub fn memory_hit(id: &str, content: &str) -> MemoryHit {
    MemoryHit {
        id: id.to_string(),
        content: content.to_string(),
        score: 0.9,
        tags: Vec::new(),
    }
}

pub fn text_response(text: &str) -> CompletionResponse {
    CompletionResponse {
        id: "resp".to_string(),
        content: text.to_string(),
        model: "scripted".to_string(),
        stop_reason: StopReason::EndTurn,
        tool_calls: Vec::new(),
        usage: Usage::default(),
    }
}

/// A response carrying native tool calls given as `(id, name, arguments)`.
pub fn native_tool_response(calls: &[(&str, &str, &str)]) -> CompletionResponse {
    CompletionResponse {
        id: "resp".to_string(),
        content: String::new(),
        model: "scripted".to_string(),
        stop_reason: StopReason::ToolUse,
        tool_calls: calls
            .iter()
            .map(|(id, name, arguments)| NativeToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
            })
            .collect(),
        usage: Usage::default(),
    }
}

// ---------------------------------------------------------------------------
// LLM
// ---------------------------------------------------------------------------

/// Replays a fixed script of responses and records every request.
#[derive(Clone)]
pub struct ScriptedProvider {
    name: String,
    script: Arc<Mutex<VecDeque<Result<CompletionResponse, LlmError>>>>,
    calls: Arc<Mutex<Vec<CompletionRequest>>>,
    on_call: Option<Arc<dyn Fn(usize) + Send + Sync>>,
}

impl ScriptedProvider {
    pub fn new(name: &str, script: Vec<Result<CompletionResponse, LlmError>>) -> Self {
        Self {
            name: name.to_string(),
            script: Arc::new(Mutex::new(script.into())),
            calls: Arc::new(Mutex::new(Vec::new())),
            on_call: None,
        }
    }

    /// Run `hook` with the zero-based call index before each reply.
    pub fn on_call(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_call = Some(Arc::new(hook));
        self
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            calls.len() - 1
        };
        if let Some(hook) = &self.on_call {
            hook(index);
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(LlmError::Provider {
                    message: "script exhausted".to_string(),
                })
            })
    }
}

/// Hands out scripted providers by endpoint name. Clones share the script.
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    providers: HashMap<String, ScriptedProvider>,
}

impl ScriptedFactory {
    pub fn with(mut self, provider: ScriptedProvider) -> Self {
        self.providers.insert(provider.name.clone(), provider);
        self
    }
}

impl LlmProviderFactory for ScriptedFactory {
    fn create(&self, endpoint: &ProviderEndpoint) -> Result<BoxLlmProvider, LlmError> {
        self.providers
            .get(&endpoint.name)
            .cloned()
            .map(BoxLlmProvider::new)
            .ok_or_else(|| LlmError::InvalidRequest(format!("no scripted provider '{}'", endpoint.name)))
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<(String, UserNotice)>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn notices(&self) -> Vec<(String, UserNotice)> {
        self.notices.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: &str, notice: &UserNotice) -> Result<(), NotifyError> {
        if self.failing {
            return Err(NotifyError("notification channel down".to_string()));
        }
        self.notices.lock().unwrap().push((user_id.to_string(), notice.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ToolBehavior {
    Ok(Value),
    Delay(Duration, Value),
    Fail(String),
}

#[derive(Clone, Default)]
pub struct MockToolHost {
    behaviors: HashMap<String, ToolBehavior>,
    schemas: Vec<ToolSchema>,
    executed: Arc<Mutex<Vec<ToolCallRequest>>>,
}

impl MockToolHost {
    pub fn with(mut self, tool: &str, behavior: ToolBehavior) -> Self {
        self.behaviors.insert(tool.to_string(), behavior);
        self
    }

    pub fn with_schema(mut self, tool: &str) -> Self {
        self.schemas.push(ToolSchema {
            name: tool.to_string(),
            description: format!("The {tool} tool"),
            parameters: json!({"type": "object", "properties": {"action": {"type": "string"}}}),
        });
        self
    }

    pub fn executed(&self) -> Vec<ToolCallRequest> {
        self.executed.lock().unwrap().clone()
    }
}

impl ToolHost for MockToolHost {
    async fn list_tools(&self, _user_id: &str) -> Result<Vec<ToolSchema>, ToolError> {
        Ok(self.schemas.clone())
    }

    async fn execute(&self, _user_id: &str, request: &ToolCallRequest) -> Result<Value, ToolError> {
        self.executed.lock().unwrap().push(request.clone());
        match self.behaviors.get(&request.tool_id).cloned() {
            Some(ToolBehavior::Ok(value)) => Ok(value),
            Some(ToolBehavior::Delay(delay, value)) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            Some(ToolBehavior::Fail(message)) => Err(ToolError::Execution(message)),
            None => Err(ToolError::UnknownTool(request.tool_id.clone())),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryMemory {
    hits: Vec<MemoryHit>,
    saved: Mutex<Vec<MemoryCandidate>>,
    fail_fast: AtomicBool,
    fail_semantic: AtomicBool,
    fail_writes: AtomicBool,
    fast_calls: AtomicUsize,
    semantic_calls: AtomicUsize,
}

impl InMemoryMemory {
    pub fn with_hits(hits: Vec<MemoryHit>) -> Self {
        Self {
            hits,
            ..Default::default()
        }
    }

    pub fn fail_fast_search(&self, fail: bool) {
        self.fail_fast.store(fail, Ordering::SeqCst);
    }

    pub fn fail_semantic_search(&self, fail: bool) {
        self.fail_semantic.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fast_calls(&self) -> usize {
        self.fast_calls.load(Ordering::SeqCst)
    }

    pub fn semantic_calls(&self) -> usize {
        self.semantic_calls.load(Ordering::SeqCst)
    }

    pub fn saved(&self) -> Vec<MemoryCandidate> {
        self.saved.lock().unwrap().clone()
    }

    fn top(&self, limit: usize) -> Vec<MemoryHit> {
        self.hits.iter().take(limit).cloned().collect()
    }
}

impl MemorySearch for InMemoryMemory {
    async fn fast_search(&self, _user_id: &str, _query: &str, limit: usize) -> Result<Vec<MemoryHit>, RepositoryError> {
        self.fast_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fast.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        Ok(self.top(limit))
    }

    async fn semantic_search(
        &self,
        _user_id: &str,
        _query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryHit>, RepositoryError> {
        self.semantic_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_semantic.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query("semantic index offline".to_string()));
        }
        Ok(self.top(limit))
    }
}

impl MemorySink for InMemoryMemory {
    async fn save_memory(&self, candidate: &MemoryCandidate) -> Result<String, RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        let mut saved = self.saved.lock().unwrap();
        saved.push(candidate.clone());
        Ok(format!("mem-{}", saved.len()))
    }
}

#[derive(Default)]
pub struct InMemoryContexts {
    users: Mutex<HashMap<String, UserContext>>,
    conversations: Mutex<HashMap<String, ConversationContext>>,
    fail_reads: AtomicBool,
}

impl InMemoryContexts {
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_user_context(&self, user_id: &str, context: UserContext) {
        self.users.lock().unwrap().insert(user_id.to_string(), context);
    }

    pub fn conversation(&self, user_id: &str) -> Option<ConversationContext> {
        self.conversations.lock().unwrap().get(user_id).cloned()
    }

    fn check_reads(&self) -> Result<(), RepositoryError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(RepositoryError::Connection)
        } else {
            Ok(())
        }
    }
}

impl UserContextStore for InMemoryContexts {
    async fn get_user_context(&self, user_id: &str) -> Result<Option<UserContext>, RepositoryError> {
        self.check_reads()?;
        Ok(self.users.lock().unwrap().get(user_id).cloned())
    }
}

impl ConversationStore for InMemoryContexts {
    async fn get_conversation(&self, user_id: &str) -> Result<Option<ConversationContext>, RepositoryError> {
        self.check_reads()?;
        Ok(self.conversation(user_id))
    }

    async fn save_conversation(&self, user_id: &str, context: &ConversationContext) -> Result<(), RepositoryError> {
        self.conversations
            .lock()
            .unwrap()
            .insert(user_id.to_string(), context.clone());
        Ok(())
    }

    async fn append_exchange(
        &self,
        user_id: &str,
        user_message: &str,
        assistant_message: &str,
        max_turns: usize,
    ) -> Result<(), RepositoryError> {
        self.conversations
            .lock()
            .unwrap()
            .entry(user_id.to_string())
            .or_default()
            .push_exchange(user_message, assistant_message, max_turns);
        Ok(())
    }
}

/// Task configs keyed by user. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryTaskConfigs {
    configs: Arc<Mutex<HashMap<String, ChatTaskConfig>>>,
    loads: Arc<AtomicUsize>,
    fail_next: Arc<AtomicBool>,
}

impl InMemoryTaskConfigs {
    pub fn put(&self, config: ChatTaskConfig) {
        self.configs.lock().unwrap().insert(config.user_id.clone(), config);
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl TaskConfigRepository for InMemoryTaskConfigs {
    async fn get_chat_config(&self, user_id: &str) -> Result<Option<ChatTaskConfig>, RepositoryError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        Ok(self.configs.lock().unwrap().get(user_id).cloned())
    }

    async fn save_chat_config(&self, config: &ChatTaskConfig) -> Result<(), RepositoryError> {
        self.put(config.clone());
        Ok(())
    }
}
