mod common;

use anyhow::anyhow;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;

use common::{hashing_embedder, sample_knowledge_base, tool_call, ScriptedModel, ToolModel};
use video_discovery::agent::{
    AgentEvent, Orchestrator, Termination, CLIP_SEARCH, FINISH, FORCE_FINISH_PROMPT, FRAME_INSPECT, GLOBAL_BROWSE,
};
use video_discovery::config::AgentConfig;
use video_discovery::knowledge::NOT_FOUND;
use video_discovery::llm::{ChatRequest, LLMResponse, Role};
use video_discovery::{Config, Retriever, RetrievalSettings};

fn agent_config(max_iterations: usize, topk_override: usize) -> AgentConfig {
    let mut agent = Config::default().agent;
    agent.max_iterations = max_iterations;
    agent.topk_override = topk_override;
    agent
}

async fn orchestrator(model: Arc<ScriptedModel>, agent: &AgentConfig, lite: bool, frames: &TempDir) -> Orchestrator {
    let db = sample_knowledge_base(frames.path()).await;
    let retriever = Retriever::new(Arc::new(ToolModel), hashing_embedder(), RetrievalSettings::from(agent));
    Orchestrator::new(model, retriever, Arc::new(db), agent, lite).unwrap()
}

fn tool_names(request: &ChatRequest) -> Vec<String> {
    request
        .tools
        .iter()
        .filter_map(|t| t["function"]["name"].as_str().map(str::to_string))
        .collect()
}

fn last_user_text(request: &ChatRequest) -> Option<String> {
    request.messages.last().filter(|m| m.role == Role::User).and_then(|m| m.content.clone())
}

#[tokio::test]
async fn test_finish_ends_the_session() {
    let frames = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![
        Ok(tool_call("c1", CLIP_SEARCH, r#"{"query": "Alice shoots at goal"}"#)),
        Ok(tool_call("c2", FINISH, r#"{"answer": "(B) Alice"}"#)),
    ]));
    let agent = orchestrator(model.clone(), &agent_config(15, 0), false, &frames).await;

    let outcome = agent.run("Who shoots at goal?").await.unwrap();

    assert_eq!(outcome.termination, Termination::Finished);
    assert_eq!(outcome.answer.as_deref(), Some("(B) Alice"));
    assert_eq!(outcome.iterations, 2);
    assert_eq!(model.calls(), 2);

    let tool_result = outcome.messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert_eq!(tool_result.tool_call_id.as_deref(), Some("c1"));
    assert!(tool_result.content.as_deref().unwrap().starts_with("Here is the searched video clip scripts:"));
}

#[tokio::test]
async fn test_iteration_budget_bounds_model_calls() {
    let frames = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::repeating(tool_call("c", GLOBAL_BROWSE, "{}")));
    let agent = orchestrator(model.clone(), &agent_config(3, 0), false, &frames).await;

    let outcome = agent.run("What happens?").await.unwrap();

    assert_eq!(outcome.termination, Termination::Exhausted);
    assert_eq!(outcome.answer, None);
    assert_eq!(outcome.iterations, 3);
    assert_eq!(model.calls(), 3);

    let requests = model.requests();
    assert_eq!(last_user_text(&requests[2]).as_deref(), Some(FORCE_FINISH_PROMPT));
    assert!(requests[..2]
        .iter()
        .all(|r| r.messages.iter().all(|m| m.content.as_deref() != Some(FORCE_FINISH_PROMPT))));
}

#[tokio::test]
async fn test_single_iteration_is_forced_to_finish() {
    let frames = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![Ok(LLMResponse::text("I think it is (C)."))]));
    let agent = orchestrator(model.clone(), &agent_config(1, 0), false, &frames).await;

    let outcome = agent.run("Which option?").await.unwrap();

    assert_eq!(model.calls(), 1);
    assert_eq!(last_user_text(&model.requests()[0]).as_deref(), Some(FORCE_FINISH_PROMPT));
    assert_eq!(outcome.termination, Termination::Exhausted);
    assert_eq!(outcome.final_text().as_deref(), Some("I think it is (C)."));
}

async fn clip_search_hits(topk_override: usize) -> usize {
    let frames = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![
        Ok(tool_call("c1", CLIP_SEARCH, r#"{"query": "goal", "topk": 20}"#)),
        Ok(tool_call("c2", FINISH, r#"{"answer": "done"}"#)),
    ]));
    let agent = orchestrator(model, &agent_config(15, topk_override), false, &frames).await;

    let outcome = agent.run("Find the goal").await.unwrap();
    let result = outcome.messages.iter().find(|m| m.role == Role::Tool).unwrap();
    result.content.as_deref().unwrap().matches("[From ").count()
}

#[tokio::test]
async fn test_topk_override_reaches_retrieval() {
    assert_eq!(clip_search_hits(5).await, 5);
    assert_eq!(clip_search_hits(0).await, 20);
}

#[tokio::test]
async fn test_unknown_tool_is_reported_to_the_model() {
    let frames = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![
        Ok(tool_call("c1", "web_search", r#"{"q": "x"}"#)),
        Ok(tool_call("c2", FINISH, r#"{"answer": "A"}"#)),
    ]));
    let agent = orchestrator(model.clone(), &agent_config(15, 0), false, &frames).await;

    let outcome = agent.run("Question").await.unwrap();

    assert_eq!(outcome.termination, Termination::Finished);
    let result = outcome.messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert_eq!(result.content.as_deref(), Some("Invalid function name: 'web_search'"));
    // the rejection is visible to the model on its next turn
    assert!(model.requests()[1].messages.iter().any(|m| m.role == Role::Tool));
}

#[tokio::test]
async fn test_malformed_arguments_abort_the_session() {
    let frames = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::repeating(tool_call("c1", CLIP_SEARCH, "{not json")));
    let agent = orchestrator(model.clone(), &agent_config(15, 0), false, &frames).await;

    let outcome = agent.run("Question").await.unwrap();

    assert!(matches!(outcome.termination, Termination::Aborted(_)));
    assert_eq!(outcome.iterations, 1);
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn test_aborted_session_has_no_final_text() {
    let frames = TempDir::new().unwrap();
    let mut response = tool_call("c1", CLIP_SEARCH, "{not json");
    response.content = Some("Let me search for the goal.".to_string());
    let model = Arc::new(ScriptedModel::new(vec![Ok(response)]));
    let agent = orchestrator(model, &agent_config(15, 0), false, &frames).await;

    let outcome = agent.run("Who scores?").await.unwrap();

    assert!(matches!(outcome.termination, Termination::Aborted(ref reason) if reason.contains(CLIP_SEARCH)));
    assert_eq!(outcome.answer, None);
    // the assistant's partial text is still in the transcript
    assert!(outcome
        .messages
        .iter()
        .any(|m| m.content.as_deref() == Some("Let me search for the goal.")));
    assert_eq!(outcome.final_text(), None);
}

#[tokio::test]
async fn test_tool_errors_are_not_fatal() {
    let frames = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![
        Ok(tool_call("c1", FRAME_INSPECT, r#"{"time_ranges": [["00:10:00", "00:10:10"]]}"#)),
        Ok(tool_call("c2", FRAME_INSPECT, r#"{"time_ranges": [["00:00:10", "00:00:20"]]}"#)),
        Ok(tool_call("c3", FINISH, r#"{"answer": "unknown"}"#)),
    ]));
    let agent = orchestrator(model, &agent_config(15, 0), false, &frames).await;

    let outcome = agent.run("What is on the scoreboard?").await.unwrap();
    let results: Vec<&str> = outcome
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.content.as_deref())
        .collect();

    assert_eq!(outcome.termination, Termination::Finished);
    // past the end of the video
    assert!(results[0].starts_with("Error: "));
    // in range, but no frame files on disk
    assert_eq!(results[1], NOT_FOUND);
}

#[tokio::test]
async fn test_model_failure_fails_the_session() {
    let frames = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![Err(anyhow!("connection reset"))]));
    let agent = orchestrator(model, &agent_config(15, 0), false, &frames).await;

    assert!(agent.run("Question").await.is_err());
}

#[tokio::test]
async fn test_stream_reports_events_in_order() {
    let frames = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![
        Ok(tool_call("c1", CLIP_SEARCH, r#"{"query": "goal"}"#)),
        Ok(tool_call("c2", FINISH, r#"{"answer": "B"}"#)),
    ]));
    let agent = orchestrator(model, &agent_config(15, 0), false, &frames).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = agent.stream_run("Question", tx).await.unwrap();

    let mut kinds = Vec::new();
    while let Some(event) = rx.recv().await {
        kinds.push(match event {
            AgentEvent::Assistant(_) => "assistant".to_string(),
            AgentEvent::ToolCall { name, .. } => format!("call:{}", name),
            AgentEvent::ToolResult(_) => "result".to_string(),
            AgentEvent::Done { answer, termination } => {
                assert_eq!(answer.as_deref(), Some("B"));
                assert_eq!(termination, Termination::Finished);
                "done".to_string()
            }
            AgentEvent::Failed(reason) => panic!("unexpected failure: {}", reason),
        });
    }

    assert_eq!(
        kinds,
        vec!["assistant", "call:clip_search", "result", "assistant", "call:finish", "done"]
    );
    assert_eq!(outcome.answer.as_deref(), Some("B"));
}

#[tokio::test]
async fn test_stream_reports_failure() {
    let frames = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![Err(anyhow!("connection reset"))]));
    let agent = orchestrator(model, &agent_config(15, 0), false, &frames).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    assert!(agent.stream_run("Question", tx).await.is_err());
    assert!(matches!(rx.recv().await, Some(AgentEvent::Failed(_))));
}

#[tokio::test]
async fn test_lite_mode_hides_frame_inspect() {
    let frames = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![Ok(tool_call("c1", FINISH, r#"{"answer": "A"}"#))]));
    let agent = orchestrator(model.clone(), &agent_config(15, 0), true, &frames).await;

    agent.run("Question").await.unwrap();
    let request = &model.requests()[0];

    assert_eq!(tool_names(request), vec![GLOBAL_BROWSE, CLIP_SEARCH, FINISH]);
    assert!(request.messages.iter().all(|m| !m.content.as_deref().unwrap_or_default().contains(FRAME_INSPECT)));

    let full = Arc::new(ScriptedModel::new(vec![Ok(tool_call("c1", FINISH, r#"{"answer": "A"}"#))]));
    orchestrator(full.clone(), &agent_config(15, 0), false, &frames)
        .await
        .run("Question")
        .await
        .unwrap();
    assert!(tool_names(&full.requests()[0]).contains(&FRAME_INSPECT.to_string()));
}

#[tokio::test]
async fn test_prompt_states_video_length() {
    let frames = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![]));
    let agent = orchestrator(model, &agent_config(15, 0), false, &frames).await;

    let messages = agent.initial_messages("Who wins?");
    let prompt = messages[1].content.as_deref().unwrap();

    assert!(prompt.contains("Total video length: 299 seconds."));
    assert!(prompt.ends_with("Question: Who wins?"));
}
