//! Integration tests for the Weft pipeline engine.
//!
//! These run whole pipelines against a scripted backend and check what ends
//! up in the chat, in storage and on the event bus.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::sync::mpsc;

use weft_config::WeftConfig;
use weft_core::backend::{BackendRequest, ChunkStream, ModelBackend, StreamChunk};
use weft_core::error::{BackendError, Error, ToolError};
use weft_core::message::{Message, MessageKind, PromptOptions};
use weft_core::{PipelineEvent, Storage};
use weft_pipeline::{FnTool, Pipeline, SidebarOptions, Validator, validators};
use weft_storage::{InMemoryStorage, NoopStorage};

// ── Scripted Backend ─────────────────────────────────────────────────────

/// A backend that replays scripted chunk sequences, one per submission.
///
/// Once the script runs out, every further submission gets `fallback`.
struct ScriptedBackend {
    turns: Mutex<VecDeque<Vec<StreamChunk>>>,
    fallback: Vec<StreamChunk>,
    requests: Mutex<Vec<BackendRequest>>,
    cost: Option<usize>,
}

impl ScriptedBackend {
    fn new(turns: Vec<Vec<StreamChunk>>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            fallback: text("ok"),
            requests: Mutex::new(Vec::new()),
            cost: None,
        })
    }

    fn repeating(chunks: Vec<StreamChunk>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(VecDeque::new()),
            fallback: chunks,
            requests: Mutex::new(Vec::new()),
            cost: None,
        })
    }

    fn flat_cost(turns: Vec<Vec<StreamChunk>>, cost: usize) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            fallback: text("ok"),
            requests: Mutex::new(Vec::new()),
            cost: Some(cost),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, index: usize) -> BackendRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait::async_trait]
impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn token_cost(&self, message: &Message) -> usize {
        match self.cost {
            Some(cost) => cost,
            None => weft_core::token::estimate_message_tokens(message),
        }
    }

    async fn stream(&self, request: BackendRequest) -> Result<ChunkStream, BackendError> {
        self.requests.lock().unwrap().push(request);
        let chunks = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let (tx, rx) = mpsc::channel(chunks.len() + 1);
        for chunk in chunks {
            tx.send(Ok(chunk)).await.unwrap();
        }
        Ok(rx)
    }
}

/// A backend whose every submission fails.
struct FailingBackend;

#[async_trait::async_trait]
impl ModelBackend for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    async fn stream(&self, _request: BackendRequest) -> Result<ChunkStream, BackendError> {
        Err(BackendError::ApiError {
            status_code: 503,
            message: "unavailable".into(),
        })
    }
}

fn text(content: &str) -> Vec<StreamChunk> {
    vec![StreamChunk::Text {
        content: content.into(),
    }]
}

fn tool_call(id: &str, name: &str, arguments: &str) -> Vec<StreamChunk> {
    vec![StreamChunk::ToolCall {
        id: id.into(),
        name: name.into(),
        arguments: arguments.into(),
    }]
}

fn lookup_tool() -> FnTool {
    FnTool::new(
        "lookup",
        "Look up a term",
        json!({
            "type": "object",
            "properties": { "q": { "type": "string" } }
        }),
        |args, _locals| Ok(json!({ "found": args["q"] })),
    )
}

fn pipeline(backend: Arc<dyn ModelBackend>) -> Pipeline {
    Pipeline::new(backend, Arc::new(NoopStorage))
}

fn labels(p: &Pipeline) -> Vec<&'static str> {
    p.messages().iter().map(|m| m.kind.label()).collect()
}

fn prompt_contents(p: &Pipeline) -> Vec<String> {
    p.messages()
        .iter()
        .filter(|m| matches!(m.kind, MessageKind::Prompt { .. }))
        .map(Message::content)
        .collect()
}

// ── Prompts and windows ──────────────────────────────────────────────────

#[tokio::test]
async fn prompt_records_window_and_response() {
    let backend = ScriptedBackend::new(vec![text("Hello!")]);
    let mut p = pipeline(backend.clone());

    p.push("background").prompt("Say hello");
    p.execute().await.unwrap();

    assert_eq!(labels(&p), vec!["context", "prompt", "response"]);
    let context_id = p.messages()[0].id.clone();
    assert_eq!(p.messages()[1].window, vec![context_id]);
    assert_eq!(p.messages()[2].content(), "Hello!");

    let request = backend.request(0);
    assert_eq!(request.messages.len(), 2);
    assert_eq!(request.messages[1].content(), "Say hello");
}

#[tokio::test]
async fn prompt_window_respects_token_budget() {
    let backend = ScriptedBackend::flat_cost(vec![text("ok")], 10);
    let mut config = WeftConfig::default();
    config.engine.token_budget = 30;
    let mut p = Pipeline::with_config(backend.clone(), Arc::new(NoopStorage), config);

    p.push("a").push("b").push("c").push("d").prompt("q");
    p.execute().await.unwrap();

    // The prompt costs 10, leaving room for the two newest messages
    let expected: Vec<String> = p.messages()[2..4].iter().map(|m| m.id.clone()).collect();
    assert_eq!(p.messages()[4].window, expected);
    assert_eq!(backend.request(0).messages.len(), 3);
}

#[tokio::test]
async fn user_and_usage_are_tracked() {
    let backend = ScriptedBackend::new(vec![vec![
        StreamChunk::Text {
            content: "hi".into(),
        },
        StreamChunk::Usage {
            input_tokens: 12,
            output_tokens: 3,
        },
    ]]);
    let mut p = pipeline(backend.clone());
    p.set_user("user-7");

    p.prompt("hello");
    p.execute().await.unwrap();

    assert_eq!(backend.request(0).user.as_deref(), Some("user-7"));
    assert_eq!(p.chat().input_tokens, 12);
    assert_eq!(p.chat().output_tokens, 3);
    assert_eq!(p.chat().metadata["user"], "user-7");
}

#[tokio::test]
async fn prompt_templates_read_locals() {
    let backend = ScriptedBackend::new(vec![]);
    let mut p = pipeline(backend);
    p.set_local("topic", "rust");

    p.prompt("Tell me about {{topic}}");
    p.execute().await.unwrap();

    assert_eq!(prompt_contents(&p), vec!["Tell me about rust"]);
}

#[tokio::test]
async fn keyed_prompt_supersedes_earlier_one() {
    let backend = ScriptedBackend::new(vec![]);
    let mut p = pipeline(backend.clone());
    let keyed = PromptOptions {
        key: Some("summary".into()),
        ..PromptOptions::default()
    };

    p.prompt_with_options("summary v1", keyed.clone())
        .prompt_with_options("summary v2", keyed);
    p.execute().await.unwrap();

    let sent: Vec<String> = backend.request(1).messages.iter().map(Message::content).collect();
    assert_eq!(sent, vec!["ok", "summary v2"]);

    let first_prompt = p.messages()[0].id.clone();
    assert!(!p.messages()[2].window.contains(&first_prompt));
    // Superseded prompts stay in history
    assert_eq!(prompt_contents(&p), vec!["summary v1", "summary v2"]);
}

// ── Scheduling ───────────────────────────────────────────────────────────

#[tokio::test]
async fn stages_added_while_running_run_next() {
    let mut p = pipeline(ScriptedBackend::new(vec![]));

    p.call("expand", |p| {
        Box::pin(async move {
            p.push("inner 1").push("inner 2");
            Ok(())
        })
    });
    p.push("outer");
    p.execute().await.unwrap();

    let contents: Vec<String> = p.messages().iter().map(Message::content).collect();
    assert_eq!(contents, vec!["inner 1", "inner 2", "outer"]);
}

#[tokio::test]
async fn append_then_move_back_is_a_loop() {
    let storage = Arc::new(InMemoryStorage::new());
    let mut p = Pipeline::new(ScriptedBackend::new(vec![]), storage.clone());

    p.push("again");
    let target = p.last_stage_id().unwrap().to_string();
    p.move_to(target);

    let err = p.execute().await.unwrap_err();
    assert!(matches!(err, Error::LoopDetected { count: 2, .. }));

    let appended = p
        .messages()
        .iter()
        .filter(|m| matches!(m.kind, MessageKind::Context { .. }))
        .count();
    assert_eq!(appended, 3);

    // Saved despite the failure, with the error recorded last
    let saved = storage.get_by_id(p.chat_id().as_str()).await.unwrap();
    assert_eq!(saved.messages.last().unwrap().kind.label(), "error");
}

#[tokio::test]
async fn move_to_unknown_stage_fails() {
    let mut p = pipeline(ScriptedBackend::new(vec![]));
    p.move_to("no-such-stage");

    let err = p.execute().await.unwrap_err();
    assert!(matches!(err, Error::MoveTargetNotFound(id) if id == "no-such-stage"));
}

#[tokio::test]
async fn pause_and_resume() {
    let mut p = pipeline(ScriptedBackend::new(vec![]));
    p.push("first").pause().push("second");

    p.execute().await.unwrap();
    assert_eq!(p.messages().len(), 1);

    p.execute().await.unwrap();
    let contents: Vec<String> = p.messages().iter().map(Message::content).collect();
    assert_eq!(contents, vec!["first", "second"]);
}

#[tokio::test]
async fn exit_with_error_aborts() {
    let mut p = pipeline(ScriptedBackend::new(vec![]));
    p.call("bail", |p| {
        Box::pin(async move {
            p.exit(Some(Error::Internal("giving up".into())));
            Ok(())
        })
    });
    p.push("never");

    let err = p.execute().await.unwrap_err();
    assert!(matches!(err, Error::Internal(reason) if reason == "giving up"));
    assert_eq!(labels(&p), vec!["error"]);
}

#[tokio::test]
async fn failed_stage_does_not_leave_an_exit_behind() {
    let mut p = pipeline(ScriptedBackend::new(vec![]));
    let mut events = p.events().subscribe();
    let failed_once = Arc::new(AtomicBool::new(false));

    let flag = failed_once.clone();
    p.call("flaky", move |p| {
        let flag = flag.clone();
        Box::pin(async move {
            if !flag.swap(true, Ordering::SeqCst) {
                p.exit(None);
                return Err(Error::Internal("first attempt fails".into()));
            }
            Ok(())
        })
    });
    p.push("after");

    let err = p.execute().await.unwrap_err();
    assert!(matches!(err, Error::Internal(_)));

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event.event_type());
    }
    assert_eq!(
        seen,
        vec!["chat_opened", "stage_begin", "stage_end", "message", "error", "chat_closed"]
    );

    // The retry runs the failed stage again and carries on
    p.execute().await.unwrap();
    assert_eq!(labels(&p), vec!["error", "context"]);
    assert_eq!(p.messages()[1].content(), "after");
}

// ── Tools ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn tool_result_is_fed_back() {
    let backend = ScriptedBackend::new(vec![
        tool_call("call_1", "lookup", r#"{"q": "weft"}"#),
        text("Found it."),
    ]);
    let mut p = pipeline(backend.clone());

    p.tool(lookup_tool()).prompt("What is weft?");
    p.execute().await.unwrap();

    assert_eq!(labels(&p), vec!["prompt", "function", "tool-result", "response"]);
    match &p.messages()[2].kind {
        MessageKind::ToolResult { call_id, output, .. } => {
            assert_eq!(call_id, "call_1");
            assert_eq!(output, &json!({ "found": "weft" }));
        }
        other => panic!("Expected tool result, got {}", other.label()),
    }

    assert_eq!(backend.calls(), 2);
    assert_eq!(backend.request(0).tools[0].name, "lookup");
    // The continuation carries the tool result
    assert!(
        backend
            .request(1)
            .messages
            .iter()
            .any(|m| m.kind.label() == "tool-result")
    );
}

#[tokio::test]
async fn tool_failures_are_recorded_not_fatal() {
    let backend = ScriptedBackend::new(vec![
        tool_call("call_1", "missing", "{}"),
        tool_call("call_2", "lookup", "{not json"),
        text("Sorry."),
    ]);
    let mut p = pipeline(backend.clone());

    p.tool(lookup_tool()).prompt("Try tools");
    p.execute().await.unwrap();

    let errors: Vec<String> = p
        .messages()
        .iter()
        .filter(|m| m.kind.label() == "error")
        .map(Message::content)
        .collect();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].contains("Tool not found: missing"));
    assert!(errors[1].contains("Invalid tool arguments for lookup"));
    assert_eq!(p.messages().last().unwrap().content(), "Sorry.");
}

#[tokio::test]
async fn handler_error_becomes_error_message() {
    let backend = ScriptedBackend::new(vec![tool_call("c1", "broken", "{}"), text("ok")]);
    let mut p = pipeline(backend);

    p.tool(FnTool::new("broken", "Always fails", json!({}), |_, _| {
        Err(ToolError::ExecutionFailed {
            tool_name: "broken".into(),
            reason: "disk full".into(),
        })
    }));
    p.prompt("go");
    p.execute().await.unwrap();

    assert!(
        p.messages()
            .iter()
            .any(|m| m.kind.label() == "error" && m.content().contains("disk full"))
    );
}

#[tokio::test]
async fn tool_calling_itself_is_stopped() {
    let backend = ScriptedBackend::repeating(tool_call("c", "lookup", r#"{"q": "again"}"#));
    let mut p = pipeline(backend.clone());

    p.tool(lookup_tool()).prompt("Loop forever");
    let err = p.execute().await.unwrap_err();

    assert!(matches!(
        err,
        Error::ToolLoop { ref tool, invocations: 3 } if tool == "lookup"
    ));
    assert_eq!(backend.calls(), 3);
    let results = p.messages().iter().filter(|m| m.kind.label() == "tool-result").count();
    assert_eq!(results, 2);
}

#[tokio::test]
async fn tool_can_drive_the_pipeline() {
    struct Remember;

    #[async_trait::async_trait]
    impl weft_pipeline::Tool for Remember {
        fn name(&self) -> &str {
            "remember"
        }
        fn description(&self) -> &str {
            "Store a note in the chat"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn call(
            &self,
            arguments: Value,
            locals: &Value,
            pipeline: &mut Pipeline,
        ) -> Result<Value, ToolError> {
            pipeline.push(format!("{} for {}", arguments["note"], locals["owner"]));
            Ok(json!("stored"))
        }
    }

    let backend = ScriptedBackend::new(vec![
        tool_call("c1", "remember", r#"{"note": "milk"}"#),
        text("Noted."),
    ]);
    let mut p = pipeline(backend);
    p.set_local("owner", "sam");

    p.tool(Remember).prompt("Remember milk");
    p.execute().await.unwrap();

    assert!(p.messages().iter().any(|m| m.content() == r#""milk" for "sam""#));
}

// ── Expectations ─────────────────────────────────────────────────────────

#[tokio::test]
async fn expectation_passes_after_correction() {
    let backend = ScriptedBackend::new(vec![text("not json"), text(r#"{"answer": 42}"#)]);
    let mut p = pipeline(backend.clone());

    p.prompt("Answer in JSON").expect(validators::json());
    p.execute().await.unwrap();

    assert_eq!(p.expectation(), Some(&json!({ "answer": 42 })));
    assert_eq!(backend.calls(), 2);
    assert_eq!(p.messages().iter().filter(|m| m.kind.label() == "error").count(), 1);
}

#[tokio::test]
async fn expectation_gives_up_after_max_call_stack() {
    let backend = ScriptedBackend::repeating(text("never json"));
    let mut p = pipeline(backend.clone());

    p.prompt("Answer in JSON").expect(validators::json());
    let err = p.execute().await.unwrap_err();

    assert!(matches!(err, Error::ExpectationExhausted { attempts: 3, .. }));
    let corrections = p
        .messages()
        .iter()
        .filter(|m| m.content().starts_with("Response is not valid JSON"))
        .count();
    assert_eq!(corrections, 3);
    // The original prompt plus one resubmission per correction
    assert_eq!(backend.calls(), 4);
}

#[tokio::test]
async fn expectation_without_response_is_rejected() {
    let mut config = WeftConfig::default();
    config.engine.max_call_stack = 1;
    let backend = ScriptedBackend::repeating(Vec::new());
    let mut p = Pipeline::with_config(backend, Arc::new(NoopStorage), config);

    p.expect(validators::non_empty());
    let err = p.execute().await.unwrap_err();
    assert!(matches!(err, Error::ExpectationExhausted { attempts: 1, .. }));
}

#[tokio::test]
async fn each_expectation_has_its_own_bound() {
    let backend = ScriptedBackend::new(vec![
        text("bad"),
        text("bad"),
        text(r#"{"step": 1}"#),
        text("bad"),
        text("bad"),
    ]);
    let mut p = pipeline(backend.clone());
    let json_only = || -> Vec<Arc<dyn Validator>> { vec![Arc::new(validators::json())] };

    p.prompt("first")
        .expect_with_limit(json_only(), 2)
        .prompt("second")
        .expect_with_limit(json_only(), 1);
    let err = p.execute().await.unwrap_err();

    // The first expectation used both of its corrections, the second its only one
    assert!(matches!(err, Error::ExpectationExhausted { attempts: 1, .. }));
    assert_eq!(p.expectation(), Some(&json!({ "step": 1 })));
    assert_eq!(backend.calls(), 5);
    let corrections = p
        .messages()
        .iter()
        .filter(|m| m.content().starts_with("Response is not valid JSON"))
        .count();
    assert_eq!(corrections, 3);
}

// ── Branches ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn for_each_replicates_body_per_item() {
    let mut p = pipeline(ScriptedBackend::new(vec![]));

    p.for_each(["red", "green"])
        .prompt("Name a {{item}} fruit (#{{index}})")
        .join()
        .push("done");
    p.execute().await.unwrap();

    assert_eq!(
        prompt_contents(&p),
        vec!["Name a red fruit (#0)", "Name a green fruit (#1)"]
    );
    assert_eq!(p.messages().last().unwrap().content(), "done");

    let names: Vec<&str> = p.stages().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["for_each", "item", "prompt", "item", "prompt", "join", "append"]
    );
}

#[tokio::test]
async fn nested_branches_pair_with_their_own_join() {
    let seen: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let mut p = pipeline(ScriptedBackend::new(vec![]));

    p.for_each(["a", "b"]).for_each([1, 2]);
    p.call("record", move |p| {
        let sink = sink.clone();
        Box::pin(async move {
            sink.lock().unwrap().push(p.locals()["item"].clone());
            Ok(())
        })
    });
    p.join().join();
    p.execute().await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![json!(1), json!(2), json!(1), json!(2)]);
}

#[tokio::test]
async fn branch_without_join_fails() {
    let mut p = pipeline(ScriptedBackend::new(vec![]));
    p.for_each(["x"]).push("body");

    let err = p.execute().await.unwrap_err();
    assert!(matches!(err, Error::BranchWithoutJoin(_)));
}

#[tokio::test]
async fn prompt_for_each_keeps_item_order() {
    let backend = ScriptedBackend::new(vec![]);
    let mut p = pipeline(backend.clone());

    p.prompt_for_each("Describe {{item}}", ["a", "b", "c"]);
    p.execute().await.unwrap();

    assert_eq!(
        prompt_contents(&p),
        vec!["Describe a", "Describe b", "Describe c"]
    );
    assert_eq!(backend.calls(), 3);
}

// ── Clone and sidebar ────────────────────────────────────────────────────

#[tokio::test]
async fn clone_is_independent() {
    let mut original = pipeline(ScriptedBackend::new(vec![]));
    original.push("note").prompt("question");
    original.execute().await.unwrap();

    let mut copy = original.clone();
    assert_ne!(copy.chat_id(), original.chat_id());
    assert_eq!(copy.messages().len(), original.messages().len());
    for (a, b) in original.messages().iter().zip(copy.messages()) {
        assert_ne!(a.id, b.id);
        assert_eq!(a.content(), b.content());
    }
    for (a, b) in original.stages().iter().zip(copy.stages()) {
        assert_ne!(a.id, b.id);
    }

    // Window references point into the copy
    let copy_ids: Vec<&str> = copy.messages().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(copy.messages()[1].window, vec![copy_ids[0].to_string()]);

    copy.push("only in the copy");
    copy.execute().await.unwrap();
    assert_eq!(copy.messages().len(), 4);
    assert_eq!(original.messages().len(), 3);
}

#[tokio::test]
async fn sidebar_links_parent_and_child() {
    let backend = ScriptedBackend::new(vec![]);
    let mut parent = pipeline(backend);
    let mut events = parent.events().subscribe();

    parent.rule("Be brief").tool(lookup_tool());
    parent.execute().await.unwrap();

    let mut child = parent.sidebar(SidebarOptions::inherit_all());
    child.prompt("Side question");
    child.execute().await.unwrap();

    assert_eq!(child.chat().parent_id(), Some(parent.chat_id().as_str()));
    assert_eq!(parent.chat().sidebar_ids, vec![child.chat_id().to_string()]);
    assert_eq!(child.messages()[0].content(), "Be brief");
    assert!(child.tools().get("lookup").is_some());

    let mut saw_sidebar = false;
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::SidebarOpened { parent_id, .. } = event.as_ref() {
            assert_eq!(parent_id, parent.chat_id().as_str());
            saw_sidebar = true;
        }
    }
    assert!(saw_sidebar);
}

#[tokio::test]
async fn sidebar_inherits_nothing_by_default() {
    let mut parent = pipeline(ScriptedBackend::new(vec![]));
    parent.rule("Be brief").tool(lookup_tool());
    parent.execute().await.unwrap();

    let child = parent.sidebar(SidebarOptions::default());
    assert!(child.messages().is_empty());
    assert!(child.tools().is_empty());
}

// ── Storage ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_run_is_saved_with_error() {
    let storage = Arc::new(InMemoryStorage::new());
    let mut p = Pipeline::new(Arc::new(FailingBackend), storage.clone());

    p.push("context").prompt("question");
    let err = p.execute().await.unwrap_err();
    assert!(matches!(err, Error::Backend(BackendError::ApiError { status_code: 503, .. })));

    let saved = storage.get_by_id(p.chat_id().as_str()).await.unwrap();
    let kinds: Vec<&str> = saved.messages.iter().map(|m| m.kind.label()).collect();
    assert_eq!(kinds, vec!["context", "prompt", "error"]);
    assert!(saved.messages[2].content().contains("503"));
}

#[tokio::test]
async fn load_continues_a_stored_chat() {
    let storage = Arc::new(InMemoryStorage::new());
    let backend = ScriptedBackend::new(vec![]);

    let mut first = Pipeline::new(backend.clone(), storage.clone());
    first.push("remembered").save();
    first.execute().await.unwrap();
    let chat_id = first.chat_id().to_string();

    let mut second = Pipeline::new(backend, storage.clone());
    second.load(chat_id.clone()).push("added later");
    second.execute().await.unwrap();

    assert_eq!(second.chat_id().as_str(), chat_id);
    let stored = storage.get_by_id(&chat_id).await.unwrap();
    let contents: Vec<String> = stored.messages.iter().map(Message::content).collect();
    assert_eq!(contents, vec!["remembered", "added later"]);
}

// ── Events ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn events_follow_execution_order() {
    let backend = ScriptedBackend::new(vec![vec![
        StreamChunk::Text {
            content: "Hel".into(),
        },
        StreamChunk::Text {
            content: "lo".into(),
        },
    ]]);
    let mut p = pipeline(backend);
    let mut events = p.events().subscribe();

    p.push("context").prompt("greet");
    p.execute().await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event.event_type());
    }
    assert_eq!(
        seen,
        vec![
            "chat_opened",
            "stage_begin",
            "message",
            "stage_end",
            "stage_begin",
            "message",
            "text_delta",
            "text_delta",
            "message",
            "stage_end",
            "chat_closed",
        ]
    );
    assert_eq!(p.messages().last().unwrap().content(), "Hello");
}
