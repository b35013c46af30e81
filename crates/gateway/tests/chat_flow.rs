//! End-to-end tests for the response pipeline, with a scripted model and
//! scripted tools.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use parley_domain::chat::ToolDefinition;
use parley_domain::config::Config;
use parley_domain::pending::PendingAction;
use parley_domain::stream::{BoxStream, ModelEvent, StopReason, Usage};
use parley_domain::turn::TurnRole;
use parley_domain::{Error, Result};
use parley_gateway::runtime::gate::{ConfigFeatureProvider, SessionGate};
use parley_gateway::runtime::persist::PersistenceCoordinator;
use parley_gateway::runtime::slots::PipelineSlots;
use parley_gateway::runtime::tools::{ToolContext, ToolDispatcher};
use parley_gateway::runtime::{run_chat, ChatEvent, ChatInput, MAX_ITERATIONS};
use parley_gateway::state::AppState;
use parley_providers::{ModelClient, ModelRequest};
use parley_store::memory::{MemorySessionRepo, MemoryTurnRepo, MemoryUsageRepo};
use parley_store::{TurnRepo, UsageRepo};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type Script = Vec<ModelEvent>;

/// Plays back pre-written event scripts, one per model call, and records
/// every request it sees (system prompt included).
struct ScriptedModel {
    scripts: Mutex<VecDeque<Script>>,
    /// Played when the queue is exhausted; lets a test script an unbounded
    /// tool loop.
    repeat: Option<Script>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn repeating(script: Script) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(VecDeque::new()),
            repeat: Some(script),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn request(&self, idx: usize) -> ModelRequest {
        self.requests.lock()[idx].clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn stream(&self, req: ModelRequest) -> Result<BoxStream<'static, Result<ModelEvent>>> {
        self.requests.lock().push(req);
        let script = self
            .scripts
            .lock()
            .pop_front()
            .or_else(|| self.repeat.clone())
            .ok_or_else(|| Error::Other("scripted model ran out of scripts".into()))?;
        Ok(Box::pin(futures_util::stream::iter(
            script.into_iter().map(Ok),
        )))
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}

fn end_turn(stop_reason: StopReason) -> ModelEvent {
    ModelEvent::TurnEnd {
        stop_reason,
        usage: Some(Usage {
            input_tokens: 10,
            output_tokens: 5,
        }),
    }
}

fn text(t: &str) -> ModelEvent {
    ModelEvent::TextDelta { text: t.into() }
}

fn tool_start(id: &str, name: &str) -> ModelEvent {
    ModelEvent::ToolUseStart {
        id: id.into(),
        name: name.into(),
    }
}

fn tool_delta(id: &str, partial: &str) -> ModelEvent {
    ModelEvent::InputJsonDelta {
        id: id.into(),
        partial_json: partial.into(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ScriptedTools {
    /// name -> (result, artificial latency)
    responses: HashMap<String, (String, Duration)>,
    executed: Mutex<Vec<(String, Value)>>,
}

impl ScriptedTools {
    fn new(responses: Vec<(&str, &str)>) -> Arc<Self> {
        Self::with_delays(responses.into_iter().map(|(n, r)| (n, r, Duration::ZERO)))
    }

    fn with_delays<'a>(
        responses: impl IntoIterator<Item = (&'a str, &'a str, Duration)>,
    ) -> Arc<Self> {
        Arc::new(Self {
            responses: responses
                .into_iter()
                .map(|(n, r, d)| (n.to_owned(), (r.to_owned(), d)))
                .collect(),
            executed: Mutex::new(Vec::new()),
        })
    }

    fn executed(&self) -> Vec<(String, Value)> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl ToolDispatcher for ScriptedTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.responses
            .keys()
            .map(|name| ToolDefinition {
                name: name.clone(),
                description: "scripted".into(),
                parameters: json!({"type": "object"}),
            })
            .collect()
    }

    async fn execute(&self, name: &str, input: &Value, _ctx: &ToolContext) -> Result<String> {
        self.executed.lock().push((name.to_owned(), input.clone()));
        let (result, delay) = self
            .responses
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Tool {
                tool: name.to_owned(),
                message: "unknown tool".into(),
            })?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(result)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Harness {
    state: AppState,
    model: Arc<ScriptedModel>,
    tools: Arc<ScriptedTools>,
    turns: Arc<MemoryTurnRepo>,
    usage: Arc<MemoryUsageRepo>,
}

fn harness(model: Arc<ScriptedModel>, tools: Arc<ScriptedTools>) -> Harness {
    harness_with_config(model, tools, Config::default())
}

fn harness_with_config(
    model: Arc<ScriptedModel>,
    tools: Arc<ScriptedTools>,
    config: Config,
) -> Harness {
    let sessions = Arc::new(MemorySessionRepo::new());
    let turns = Arc::new(MemoryTurnRepo::new());
    let usage = Arc::new(MemoryUsageRepo::new());

    let state = AppState {
        config: Arc::new(config.clone()),
        model: model.clone(),
        sessions: sessions.clone(),
        turns: turns.clone(),
        usage: usage.clone(),
        gate: Arc::new(SessionGate::new(
            Arc::new(ConfigFeatureProvider::new(config.features)),
            usage.clone(),
        )),
        tools: tools.clone(),
        persistence: Arc::new(PersistenceCoordinator::new(
            sessions,
            turns.clone(),
            usage.clone(),
        )),
        pipeline_slots: Arc::new(PipelineSlots::new(config.server.pipeline_slots_per_user)),
    };

    Harness {
        state,
        model,
        tools,
        turns,
        usage,
    }
}

fn input(message: &str) -> ChatInput {
    ChatInput {
        user_id: "u1".into(),
        message: message.into(),
        session_id: None,
        ui_context: None,
        pending_actions: Vec::new(),
        forwarded_credential: None,
    }
}

async fn drain(state: AppState, input: ChatInput) -> Vec<ChatEvent> {
    let mut rx = run_chat(state, input);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    // Let detached writes (usage, titles, tool-result records) land.
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    events
}

fn session_id_of(events: &[ChatEvent]) -> String {
    events
        .iter()
        .find_map(|e| match e {
            ChatEvent::MessageStart { session_id, .. } => Some(session_id.clone()),
            _ => None,
        })
        .expect("no message_start")
}

fn message_end_of(events: &[ChatEvent]) -> (u32, Vec<PendingAction>) {
    events
        .iter()
        .find_map(|e| match e {
            ChatEvent::MessageEnd {
                tokens_used,
                pending_imports,
                ..
            } => Some((*tokens_used, pending_imports.clone())),
            _ => None,
        })
        .expect("no message_end")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn plain_exchange_produces_ordered_events_and_two_turns() {
    let model = ScriptedModel::new(vec![vec![
        text("Hello"),
        text(" there"),
        end_turn(StopReason::EndTurn),
    ]]);
    let tools = ScriptedTools::new(vec![]);
    let h = harness(model, tools);

    let events = drain(h.state.clone(), input("Hi")).await;

    let kinds: Vec<_> = events.iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        vec!["message_start", "content_delta", "content_delta", "message_end"]
    );

    let (tokens, pending) = message_end_of(&events);
    assert_eq!(tokens, 15);
    assert!(pending.is_empty());

    let session_id = session_id_of(&events);
    let turns = h.turns.list_for_session(&session_id).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, TurnRole::User);
    assert_eq!(turns[0].content.as_deref(), Some("Hi"));
    assert_eq!(turns[1].role, TurnRole::Assistant);
    assert_eq!(turns[1].content.as_deref(), Some("Hello there"));
}

#[tokio::test]
async fn fragmented_tool_input_reassembles_before_execution() {
    let model = ScriptedModel::new(vec![
        vec![
            tool_start("tu_1", "search"),
            tool_delta("tu_1", "{\"query\": \"rust"),
            tool_delta("tu_1", " async\", \"limit\""),
            tool_delta("tu_1", ": 5}"),
            end_turn(StopReason::ToolUse),
        ],
        vec![text("Found it."), end_turn(StopReason::EndTurn)],
    ]);
    let tools = ScriptedTools::new(vec![("search", "3 results")]);
    let h = harness(model, tools);

    let events = drain(h.state.clone(), input("find rust async docs")).await;

    let executed = h.tools.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].0, "search");
    assert_eq!(executed[0].1, json!({"query": "rust async", "limit": 5}));

    // The function_call fires only once the input is whole.
    assert!(events
        .iter()
        .any(|e| matches!(e, ChatEvent::FunctionCall { id, name } if id == "tu_1" && name == "search")));
    assert!(events.iter().any(|e| matches!(
        e,
        ChatEvent::FunctionResult { result, is_error: false, .. } if result == "3 results"
    )));
    assert_eq!(h.model.call_count(), 2);
}

#[tokio::test]
async fn invalid_tool_input_is_never_executed_but_loop_continues() {
    let model = ScriptedModel::new(vec![
        vec![
            tool_start("tu_1", "search"),
            tool_delta("tu_1", "{\"query\": truncated"),
            end_turn(StopReason::ToolUse),
        ],
        vec![text("Sorry about that."), end_turn(StopReason::EndTurn)],
    ]);
    let tools = ScriptedTools::new(vec![("search", "unused")]);
    let h = harness(model, tools);

    let events = drain(h.state.clone(), input("go")).await;

    // The dispatcher never saw the call.
    assert!(h.tools.executed().is_empty());

    // The model got exactly one error result and a second chance.
    let error_results: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, ChatEvent::FunctionResult { is_error: true, .. }))
        .collect();
    assert_eq!(error_results.len(), 1);
    assert!(matches!(
        error_results[0],
        ChatEvent::FunctionResult { result, .. } if result.starts_with("invalid tool arguments")
    ));
    assert_eq!(h.model.call_count(), 2);
    assert!(events.iter().any(|e| e.kind() == "message_end"));
}

#[tokio::test]
async fn tool_loop_stops_at_iteration_limit() {
    let model = ScriptedModel::repeating(vec![
        tool_start("tu", "ping"),
        tool_delta("tu", "{}"),
        end_turn(StopReason::ToolUse),
    ]);
    let tools = ScriptedTools::new(vec![("ping", "pong")]);
    let h = harness(model, tools);

    let events = drain(h.state.clone(), input("loop forever")).await;

    assert_eq!(h.model.call_count(), MAX_ITERATIONS);
    assert_eq!(h.tools.executed().len(), MAX_ITERATIONS);
    // Still terminates normally.
    assert!(events.iter().any(|e| e.kind() == "message_end"));
    assert!(!events.iter().any(|e| e.kind() == "error"));
}

#[tokio::test]
async fn second_request_sees_first_response_in_history() {
    let model = ScriptedModel::new(vec![
        vec![text("First answer"), end_turn(StopReason::EndTurn)],
        vec![text("Second answer"), end_turn(StopReason::EndTurn)],
    ]);
    let tools = ScriptedTools::new(vec![]);
    let h = harness(model, tools);

    let first = drain(h.state.clone(), input("first question")).await;
    let session_id = session_id_of(&first);

    // message_end means the assistant turn is already durable.
    let turns = h.turns.list_for_session(&session_id).await.unwrap();
    assert_eq!(turns.len(), 2);

    let mut second = input("second question");
    second.session_id = Some(session_id);
    drain(h.state.clone(), second).await;

    let req = h.model.request(1);
    assert_eq!(req.messages.len(), 3);
    assert_eq!(req.messages[0].content.text(), Some("first question"));
    assert_eq!(req.messages[1].content.text(), Some("First answer"));
    assert_eq!(req.messages[2].content.text(), Some("second question"));
}

#[tokio::test]
async fn unknown_session_id_is_a_typed_error() {
    let model = ScriptedModel::new(vec![]);
    let tools = ScriptedTools::new(vec![]);
    let h = harness(model, tools);

    let mut req = input("hello");
    req.session_id = Some("missing".into());
    let events = drain(h.state.clone(), req).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        ChatEvent::Error { error_type, .. } if error_type == "session_not_found"
    ));
    assert_eq!(h.model.call_count(), 0);
}

#[tokio::test]
async fn pending_import_survives_the_round_trip() {
    let extract_result =
        json!({"success": true, "persisted": false, "source_ref": "https://e.com/recipe", "title": "Recipe", "count": 1});
    let model = ScriptedModel::new(vec![
        // Request 1: extract without committing.
        vec![
            tool_start("tu_1", "extract_recipe"),
            tool_delta("tu_1", "{\"url\": \"https://e.com/recipe\"}"),
            end_turn(StopReason::ToolUse),
        ],
        vec![text("Extracted. Save it?"), end_turn(StopReason::EndTurn)],
        // Request 2: commit.
        vec![
            tool_start("tu_2", "commit_import"),
            tool_delta("tu_2", "{\"source_ref\": \"https://e.com/recipe\"}"),
            end_turn(StopReason::ToolUse),
        ],
        vec![text("Saved."), end_turn(StopReason::EndTurn)],
    ]);
    let tools = ScriptedTools::new(vec![
        ("extract_recipe", &extract_result.to_string()),
        (
            "commit_import",
            "{\"success\": true, \"persisted\": true}",
        ),
    ]);
    let h = harness(model, tools);

    let first = drain(h.state.clone(), input("grab that recipe")).await;
    let (_, pending) = message_end_of(&first);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].key, "https://e.com/recipe");

    // The client carries the pending list into the next request.
    let mut second = input("yes, save it");
    second.session_id = Some(session_id_of(&first));
    second.pending_actions = pending;
    let second_events = drain(h.state.clone(), second).await;

    // The second request's system prompt warned the model off re-extracting.
    let system = h.model.request(2).system;
    assert!(system.contains("Pending imports"));
    assert!(system.contains("commit_import"));
    assert!(system.contains("https://e.com/recipe"));

    // A successful commit clears the pending list.
    let (_, pending_after) = message_end_of(&second_events);
    assert!(pending_after.is_empty());
}

#[tokio::test]
async fn quota_exhausted_is_denied_before_any_work() {
    let model = ScriptedModel::new(vec![]);
    let tools = ScriptedTools::new(vec![]);
    let mut config = Config::default();
    config.features.default_monthly_quota = 2;
    let h = harness_with_config(model, tools, config);

    h.usage.increment("u1").await.unwrap();
    h.usage.increment("u1").await.unwrap();

    let events = drain(h.state.clone(), input("one more?")).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        ChatEvent::Error { error_type, .. } if error_type == "rate_limit_exceeded"
    ));
    assert_eq!(h.model.call_count(), 0);
}

#[tokio::test]
async fn last_quota_unit_completes_then_next_request_is_denied() {
    let model = ScriptedModel::new(vec![
        vec![text("ok"), end_turn(StopReason::EndTurn)],
    ]);
    let tools = ScriptedTools::new(vec![]);
    let mut config = Config::default();
    config.features.default_monthly_quota = 2;
    let h = harness_with_config(model, tools, config);

    h.usage.increment("u1").await.unwrap();

    let first = drain(h.state.clone(), input("last one")).await;
    assert!(first.iter().any(|e| e.kind() == "message_end"));
    assert_eq!(h.usage.get_monthly_usage("u1").await.unwrap(), 2);

    let second = drain(h.state.clone(), input("over the line")).await;
    assert!(matches!(
        &second[0],
        ChatEvent::Error { error_type, .. } if error_type == "rate_limit_exceeded"
    ));
}

#[tokio::test(start_paused = true)]
async fn slow_tool_emits_heartbeats_and_still_returns_its_result() {
    let model = ScriptedModel::new(vec![
        vec![
            tool_start("tu_1", "crawl"),
            tool_delta("tu_1", "{}"),
            end_turn(StopReason::ToolUse),
        ],
        vec![text("Crawl finished."), end_turn(StopReason::EndTurn)],
    ]);
    let tools = ScriptedTools::with_delays(vec![(
        "crawl",
        "crawled 40 pages",
        Duration::from_secs(12),
    )]);
    let h = harness(model, tools);

    let events = drain(h.state.clone(), input("crawl the site")).await;

    let heartbeats: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::Heartbeat {
                status,
                tool_name,
                elapsed_seconds,
            } => Some((status.clone(), tool_name.clone(), *elapsed_seconds)),
            _ => None,
        })
        .collect();

    // 12s of work over a 5s interval: at least two pulses, correctly labeled.
    assert!(heartbeats.len() >= 2);
    assert_eq!(heartbeats[0], ("executing_tool".into(), "crawl".into(), 5));
    assert_eq!(heartbeats[1].2, 10);

    assert!(events.iter().any(|e| matches!(
        e,
        ChatEvent::FunctionResult { result, is_error: false, .. } if result == "crawled 40 pages"
    )));
    assert!(events.iter().any(|e| e.kind() == "message_end"));
}

#[tokio::test]
async fn text_between_tool_fragments_still_streams_and_input_reassembles() {
    // The model narrates around an in-progress tool call; the narration must
    // reach the client as content deltas without disturbing the buffered
    // input.
    let model = ScriptedModel::new(vec![
        vec![
            text("Let me check"),
            tool_start("tu_1", "search"),
            tool_delta("tu_1", "{\"query\":"),
            text(" the index."),
            tool_delta("tu_1", " \"cats\"}"),
            end_turn(StopReason::ToolUse),
        ],
        vec![text("Cats found."), end_turn(StopReason::EndTurn)],
    ]);
    let tools = ScriptedTools::new(vec![("search", "2 results")]);
    let h = harness(model, tools);

    let events = drain(h.state.clone(), input("any cats?")).await;

    let interleaved_at = events
        .iter()
        .position(|e| matches!(
            e,
            ChatEvent::ContentDelta { text: Some(t), .. } if t == " the index."
        ))
        .expect("interleaved text was not forwarded");
    let call_at = events
        .iter()
        .position(|e| matches!(e, ChatEvent::FunctionCall { id, .. } if id == "tu_1"))
        .expect("no function_call");
    assert!(interleaved_at < call_at);

    let executed = h.tools.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].1, json!({"query": "cats"}));
}

#[tokio::test(start_paused = true)]
async fn disconnected_client_does_not_abort_the_pipeline() {
    let model = ScriptedModel::new(vec![
        vec![
            tool_start("tu_1", "slow_save"),
            tool_delta("tu_1", "{}"),
            end_turn(StopReason::ToolUse),
        ],
        vec![text("Done."), end_turn(StopReason::EndTurn)],
    ]);
    let tools = ScriptedTools::with_delays(vec![(
        "slow_save",
        "saved",
        Duration::from_secs(2),
    )]);
    let h = harness(model, tools);

    let mut rx = run_chat(h.state.clone(), input("save it"));

    // Read just enough to learn the session id, then hang up while the tool
    // is still executing.
    let session_id = match rx.recv().await.expect("no first event") {
        ChatEvent::MessageStart { session_id, .. } => session_id,
        other => panic!("expected message_start, got {other:?}"),
    };
    drop(rx);

    // The tool still runs to completion and the assistant turn still lands.
    let mut turns = Vec::new();
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        turns = h.turns.list_for_session(&session_id).await.unwrap();
        if turns.iter().any(|t| t.role == TurnRole::Assistant) {
            break;
        }
    }

    let assistant = turns
        .iter()
        .find(|t| t.role == TurnRole::Assistant)
        .expect("assistant turn never persisted after disconnect");
    assert_eq!(assistant.content.as_deref(), Some("Done."));
    let invocations = assistant.tool_invocations.as_ref().unwrap();
    assert_eq!(invocations[0].result, "saved");
    assert!(!invocations[0].is_error);
    assert_eq!(h.tools.executed().len(), 1);
}

#[tokio::test]
async fn duplicate_pending_actions_from_the_client_collapse() {
    let model = ScriptedModel::new(vec![vec![
        text("Still pending."),
        end_turn(StopReason::EndTurn),
    ]]);
    let tools = ScriptedTools::new(vec![]);
    let h = harness(model, tools);

    let action = PendingAction {
        key: "https://e.com/a".into(),
        label: "Article".into(),
        count: None,
    };
    let mut req = input("remind me");
    req.pending_actions = vec![action.clone(), action];

    let events = drain(h.state.clone(), req).await;

    let system = h.model.request(0).system;
    assert_eq!(system.matches("https://e.com/a").count(), 2); // key + commit call, once
    let (_, pending) = message_end_of(&events);
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn disabled_chat_denies_with_feature_error() {
    let model = ScriptedModel::new(vec![]);
    let tools = ScriptedTools::new(vec![]);
    let mut config = Config::default();
    config.features.chat_enabled = false;
    let h = harness_with_config(model, tools, config);

    let events = drain(h.state.clone(), input("hello?")).await;
    assert!(matches!(
        &events[0],
        ChatEvent::Error { error_type, .. } if error_type == "feature_disabled"
    ));
}
