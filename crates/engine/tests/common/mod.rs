//! Shared mock collaborators for the engine scenario tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use nova_devlog::DevLog;
use nova_domain::capability::{ProviderCapabilities, ProviderKind};
use nova_domain::config::Config;
use nova_domain::error::{Error, Result};
use nova_domain::stream::{BoxStream, StreamEvent, Usage};
use nova_domain::tool::{ToolCall, ToolDefinition, ToolOutcome};
use nova_engine::collab::{
    Broadcaster, CryptoService, HudTokenOutcome, IntegrationsProvider, MusicHandler, ToolRuntime,
    ToolSession, Voice, WeatherReport, WeatherService, WorkflowBuilder,
};
use nova_engine::state::{ClientFactory, EngineDeps, EngineState};
use nova_memory::{KeywordRecall, MemoryFileStore};
use nova_providers::{
    ChatRequest, ChatResponse, ChatRuntime, IntegrationsSnapshot, ProviderClient,
    ProviderIntegration,
};
use nova_sessions::SessionStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Broadcaster
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct RecordingBroadcaster {
    pub stream_starts: Mutex<Vec<String>>,
    pub stream_dones: Mutex<Vec<String>>,
    pub deltas: Mutex<Vec<(String, String)>>,
    pub states: Mutex<Vec<String>>,
    pub hud_token_ok: Mutex<bool>,
}

#[async_trait::async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn broadcast_state(&self, state: &str) {
        self.states.lock().push(state.to_string());
    }
    async fn broadcast_thinking_status(&self, _status: &str) {}
    async fn broadcast_message(&self, _text: &str) {}
    async fn stream_start(&self, stream_id: &str) {
        self.stream_starts.lock().push(stream_id.to_string());
    }
    async fn stream_delta(&self, stream_id: &str, delta: &str) {
        self.deltas
            .lock()
            .push((stream_id.to_string(), delta.to_string()));
    }
    async fn stream_done(&self, stream_id: &str) {
        self.stream_dones.lock().push(stream_id.to_string());
    }
    async fn broadcast_usage(&self, _usage: &Usage, _estimated_cost_usd: Option<f64>) {}
    async fn consume_hud_op_token(&self, token: Option<&str>, _action: &str) -> HudTokenOutcome {
        let ok = *self.hud_token_ok.lock() && token.is_some();
        HudTokenOutcome {
            ok,
            reason: (!ok).then(|| "missing or spent token".to_string()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub enum Scripted {
    Text(String),
    ToolCalls(Vec<ToolCall>),
    Fail(String),
}

pub struct ScriptedClient {
    pub responses: Mutex<VecDeque<Scripted>>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
        })
    }

    fn next(&self) -> Scripted {
        self.responses
            .lock()
            .pop_front()
            .unwrap_or(Scripted::Text("(script exhausted)".into()))
    }
}

fn usage() -> Usage {
    Usage {
        prompt_tokens: 20,
        completion_tokens: 10,
        total_tokens: 30,
    }
}

#[async_trait::async_trait]
impl ProviderClient for ScriptedClient {
    async fn create(&self, req: &ChatRequest) -> Result<ChatResponse> {
        match self.next() {
            Scripted::Text(content) => Ok(ChatResponse {
                content,
                tool_calls: vec![],
                usage: Some(usage()),
                model: req.model.clone(),
                finish_reason: Some("stop".into()),
            }),
            Scripted::ToolCalls(tool_calls) => Ok(ChatResponse {
                content: String::new(),
                tool_calls,
                usage: Some(usage()),
                model: req.model.clone(),
                finish_reason: Some("tool_calls".into()),
            }),
            Scripted::Fail(message) => Err(Error::Http(message)),
        }
    }

    async fn stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let response = self.create(req).await?;
        Ok(Box::pin(async_stream::stream! {
            let text = response.content;
            let mid = text.len() / 2;
            let mid = (0..=mid).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0);
            if mid > 0 {
                yield Ok(StreamEvent::Token { text: text[..mid].to_string() });
            }
            if mid < text.len() {
                yield Ok(StreamEvent::Token { text: text[mid..].to_string() });
            }
            yield Ok(StreamEvent::Done { usage: response.usage, finish_reason: response.finish_reason });
        }))
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderKind::Openai.capabilities()
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Openai
    }
}

pub struct FixedClientFactory {
    pub client: Arc<ScriptedClient>,
}

impl ClientFactory for FixedClientFactory {
    fn client_for(
        &self,
        _runtime: &ChatRuntime,
        _request_timeout_ms: u64,
    ) -> Result<Arc<dyn ProviderClient>> {
        Ok(self.client.clone())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Scripted tools: `web_search` can stall, other names answer instantly.
pub struct StallableSession {
    pub web_search_delay: Duration,
    pub web_search_result: String,
}

#[async_trait::async_trait]
impl ToolSession for StallableSession {
    fn tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "web_search".into(),
                description: "search the web".into(),
                parameters: serde_json::json!({"type": "object"}),
            },
            ToolDefinition {
                name: "web_fetch".into(),
                description: "fetch a page".into(),
                parameters: serde_json::json!({"type": "object"}),
            },
        ]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutcome {
        match call.tool_name.as_str() {
            "web_search" => {
                if !self.web_search_delay.is_zero() {
                    tokio::time::sleep(self.web_search_delay).await;
                }
                ToolOutcome::ok(self.web_search_result.clone())
            }
            "web_fetch" => ToolOutcome::ok("fetched page body"),
            other => ToolOutcome::error(format!("unknown tool: {other}")),
        }
    }
}

pub struct FixedToolRuntime {
    pub session: Arc<dyn ToolSession>,
}

#[async_trait::async_trait]
impl ToolRuntime for FixedToolRuntime {
    async fn init(&self, _user_context_id: &str) -> Result<Arc<dyn ToolSession>> {
        Ok(self.session.clone())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Remaining collaborators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OneProviderIntegrations;

#[async_trait::async_trait]
impl IntegrationsProvider for OneProviderIntegrations {
    async fn snapshot(&self, _user: &str) -> Result<IntegrationsSnapshot> {
        Ok(IntegrationsSnapshot {
            providers: vec![ProviderIntegration {
                kind: ProviderKind::Openai,
                connected: true,
                enabled: true,
                api_key: Some("sk-test".into()),
                base_url: None,
                default_model: Some("gpt-4o".into()),
                active: false,
            }],
        })
    }
}

pub struct FixedWeather;

#[async_trait::async_trait]
impl WeatherService for FixedWeather {
    async fn lookup(&self, location: &str) -> Result<WeatherReport> {
        Ok(WeatherReport {
            location: location.to_string(),
            summary: format!("Weather in {location}: 72°F and clear, light breeze."),
        })
    }
}

pub struct FixedCrypto;

#[async_trait::async_trait]
impl CryptoService for FixedCrypto {
    async fn report(&self, _user: &str) -> Result<String> {
        Ok("Portfolio report: BTC $60,000 (+1.2%), ETH $3,000 (-0.4%).".into())
    }
}

pub struct EchoWorkflow;

#[async_trait::async_trait]
impl WorkflowBuilder for EchoWorkflow {
    async fn build(&self, _user: &str, prompt: &str) -> Result<String> {
        Ok(format!("Mission created: {prompt}"))
    }
}

pub struct EchoMusic;

#[async_trait::async_trait]
impl MusicHandler for EchoMusic {
    async fn handle(&self, _user: &str, text: &str) -> Result<String> {
        Ok(format!("Now playing: {text}"))
    }
}

pub struct SilentVoice;

#[async_trait::async_trait]
impl Voice for SilentVoice {
    async fn speak(&self, _text: &str) {}
    async fn play_thinking(&self) {}
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Harness {
    pub state: EngineState,
    pub broadcaster: Arc<RecordingBroadcaster>,
    pub client: Arc<ScriptedClient>,
    _dir: tempfile::TempDir,
}

pub struct HarnessOptions {
    pub responses: Vec<Scripted>,
    pub web_search_delay: Duration,
    pub config: Config,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            responses: Vec::new(),
            web_search_delay: Duration::ZERO,
            config: Config::default(),
        }
    }
}

/// Install a test subscriber once so `RUST_LOG=debug cargo test` shows the
/// engine's structured logs.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn harness(options: HarnessOptions) -> Harness {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut config = options.config;
    config.devlog.log_path = dir
        .path()
        .join("devlog/conversations.jsonl")
        .display()
        .to_string();

    let sessions = Arc::new(SessionStore::new(dir.path()).unwrap());
    let memory = Arc::new(MemoryFileStore::new(&dir.path().join("memory")).unwrap());
    let recall = Arc::new(KeywordRecall::new(memory.clone()));
    let devlog = Arc::new(DevLog::new(config.devlog.clone()).unwrap());
    let broadcaster = Arc::new(RecordingBroadcaster::default());
    let client = ScriptedClient::new(options.responses);

    let session: Arc<dyn ToolSession> = Arc::new(StallableSession {
        web_search_delay: options.web_search_delay,
        web_search_result: "1. Rust 1.80 release notes".into(),
    });

    let state = EngineState::new(
        config,
        "You are Nova, a fast personal assistant.".into(),
        EngineDeps {
            sessions,
            memory,
            recall,
            devlog,
            broadcaster: broadcaster.clone(),
            tool_runtime: Arc::new(FixedToolRuntime { session }),
            integrations: Arc::new(OneProviderIntegrations),
            client_factory: Arc::new(FixedClientFactory {
                client: client.clone(),
            }),
            weather: Arc::new(FixedWeather),
            crypto: Arc::new(FixedCrypto),
            workflow: Arc::new(EchoWorkflow),
            music: Arc::new(EchoMusic),
            voice: Arc::new(SilentVoice),
        },
    );

    Harness {
        state,
        broadcaster,
        client,
        _dir: dir,
    }
}
