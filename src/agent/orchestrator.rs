use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::tools::{ToolInvocation, ToolRegistry, FINISH, FRAME_INSPECT};
use crate::config::AgentConfig;
use crate::error::DiscoveryError;
use crate::knowledge::{Retriever, VideoKnowledgeBase};
use crate::llm::{ChatMessage, ChatRequest, Role, LLM};

/// Appended before the model call on the last allowed iteration
pub const FORCE_FINISH_PROMPT: &str = "Please call the `finish` function to finish the task.";

const SYSTEM_PROMPT: &str = "You are a helpful assistant who answers multi-step questions by sequentially invoking functions. \
Follow the THINK → ACT → OBSERVE loop:
  • THOUGHT Reason step-by-step about which function to call next.
  • ACTION   Call exactly one function that moves you closer to the final answer.
  • OBSERVATION Summarize the function's output.
Plan carefully before each function call and reflect on the outcome of every previous call. \
Only pass arguments that come verbatim from the user or from earlier function outputs; never invent them. \
Keep looping until the question is fully resolved, then call `finish` with the final answer. \
When unsure about the video content, inspect it with the tools instead of guessing. \
Timestamps may be written as 'HH:MM:SS' or 'MM:SS'.";

const USER_PROMPT_HEAD: &str = "Carefully read the timestamps and narration returned by the tools, paying attention to the causal \
order of events, object details and movements, and people's actions and poses.

Use these tools whenever the information you have is insufficient:

• For global information about the events and main subjects of the video, use `global_browse`.
• To search for an event without a specific timestamp, use `clip_search`.";

const USER_PROMPT_FRAMES: &str = "
• If the retrieved material lacks precise, question-relevant detail (e.g. an unknown name), call `frame_inspect` with a list of time ranges ([[HH:MM:SS, HH:MM:SS], ...]).
• Whenever you are still uncertain after searching, inspect the frames of the relevant intervals with `frame_inspect`.
• After locating an answer in the captions, confirm it with a `frame_inspect` query.";

const USER_PROMPT_TAIL: &str = "

You can start with `global_browse` to get an overview of the video, then call these tools as many times as needed to progressively find the answer.

Based on your observations and the tool outputs, give a concise answer that directly addresses the question.

Total video length: {video_length} seconds.

Question: {question}";

/// How a question-answering session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The model called `finish`
    Finished,
    /// The iteration budget ran out without `finish`
    Exhausted,
    /// Tool-call arguments could not be decoded
    Aborted(String),
}

/// Result of one iteration of the loop
#[derive(Debug, Clone, PartialEq, Eq)]
enum LoopStep {
    Continue,
    Finished(String),
    Aborted(String),
}

#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub messages: Vec<ChatMessage>,
    /// Set only when the model called `finish`
    pub answer: Option<String>,
    pub termination: Termination,
    /// Model calls made
    pub iterations: usize,
}

impl AgentOutcome {
    /// The `finish` answer, or else the text of the last assistant message.
    /// An aborted session has no final text.
    pub fn final_text(&self) -> Option<String> {
        if matches!(self.termination, Termination::Aborted(_)) {
            return None;
        }
        self.answer.clone().or_else(|| {
            self.messages
                .iter()
                .rev()
                .filter(|m| m.role == Role::Assistant)
                .find_map(extract_answer)
        })
    }
}

/// Progress of a streamed session
#[derive(Debug, Clone)]
pub enum AgentEvent {
    Assistant(ChatMessage),
    ToolCall { name: String, arguments: String },
    ToolResult(ChatMessage),
    Done { answer: Option<String>, termination: Termination },
    Failed(String),
}

/// Text of a message, or the `answer` argument of a `finish` call it carries
pub fn extract_answer(message: &ChatMessage) -> Option<String> {
    if let Some(text) = message.content.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        return Some(text.to_string());
    }
    message
        .tool_calls
        .iter()
        .filter(|c| c.function.name == FINISH)
        .find_map(|c| {
            let args: serde_json::Value = serde_json::from_str(&c.function.arguments).ok()?;
            match args.get("answer")? {
                serde_json::Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            }
        })
}

struct ConversationState {
    messages: Vec<ChatMessage>,
    iteration: usize,
}

fn emit(events: Option<&mpsc::UnboundedSender<AgentEvent>>, event: AgentEvent) {
    if let Some(tx) = events {
        if tx.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }
}

/// Iteration-bounded tool-calling loop over one video's knowledge base
pub struct Orchestrator {
    llm: Arc<dyn LLM>,
    retriever: Retriever,
    db: Arc<VideoKnowledgeBase>,
    registry: ToolRegistry,
    max_iterations: usize,
    temperature: f32,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LLM>,
        retriever: Retriever,
        db: Arc<VideoKnowledgeBase>,
        agent: &AgentConfig,
        lite_mode: bool,
    ) -> Result<Self, DiscoveryError> {
        if agent.max_iterations == 0 {
            return Err(DiscoveryError::Config("max_iterations must be greater than 0".to_string()));
        }

        Ok(Self {
            llm,
            retriever,
            db,
            registry: ToolRegistry::new(agent, lite_mode)?,
            max_iterations: agent.max_iterations,
            temperature: agent.temperature,
        })
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// System preamble plus the question with the video length filled in
    pub fn initial_messages(&self, question: &str) -> Vec<ChatMessage> {
        let mut prompt = USER_PROMPT_HEAD.to_string();
        if self.registry.get(FRAME_INSPECT).is_some() {
            prompt.push_str(USER_PROMPT_FRAMES);
        }
        prompt.push_str(
            &USER_PROMPT_TAIL
                .replace("{video_length}", &self.db.video_length_secs.to_string())
                .replace("{question}", question),
        );

        vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)]
    }

    /// Answer a question; performs at most `max_iterations` model calls
    pub async fn run(&self, question: &str) -> Result<AgentOutcome> {
        self.drive(question, None).await
    }

    /// Same as [`run`](Self::run), reporting every assistant message, tool call
    /// and tool result through `events` as it happens
    pub async fn stream_run(&self, question: &str, events: mpsc::UnboundedSender<AgentEvent>) -> Result<AgentOutcome> {
        let result = self.drive(question, Some(&events)).await;
        if let Err(e) = &result {
            emit(Some(&events), AgentEvent::Failed(e.to_string()));
        }
        result
    }

    async fn drive(&self, question: &str, events: Option<&mpsc::UnboundedSender<AgentEvent>>) -> Result<AgentOutcome> {
        let mut state = ConversationState {
            messages: self.initial_messages(question),
            iteration: 0,
        };
        let mut termination = Termination::Exhausted;
        let mut answer = None;

        while state.iteration < self.max_iterations {
            match self.step(&mut state, events).await? {
                LoopStep::Continue => {}
                LoopStep::Finished(a) => {
                    info!("🏁 Finished after {} iterations", state.iteration);
                    answer = Some(a);
                    termination = Termination::Finished;
                    break;
                }
                LoopStep::Aborted(reason) => {
                    warn!("Session aborted: {}", reason);
                    termination = Termination::Aborted(reason);
                    break;
                }
            }
        }

        if termination == Termination::Exhausted {
            warn!("Iteration budget of {} exhausted without a `finish` call", self.max_iterations);
        }

        emit(
            events,
            AgentEvent::Done {
                answer: answer.clone(),
                termination: termination.clone(),
            },
        );

        Ok(AgentOutcome {
            messages: state.messages,
            answer,
            termination,
            iterations: state.iteration,
        })
    }

    async fn step(
        &self,
        state: &mut ConversationState,
        events: Option<&mpsc::UnboundedSender<AgentEvent>>,
    ) -> Result<LoopStep> {
        if state.iteration + 1 == self.max_iterations {
            info!("⏳ Last iteration, asking the model to call `finish`");
            state.messages.push(ChatMessage::user(FORCE_FINISH_PROMPT));
        }
        state.iteration += 1;
        debug!("Iteration {}/{}", state.iteration, self.max_iterations);

        let request = ChatRequest::new(state.messages.clone())
            .with_tools(self.registry.schemas())
            .with_temperature(self.temperature);
        let response = self
            .llm
            .chat(request)
            .await
            .with_context(|| format!("orchestrator model call failed at iteration {}", state.iteration))?;

        let message = response.into_message();
        state.messages.push(message.clone());
        emit(events, AgentEvent::Assistant(message.clone()));

        for call in &message.tool_calls {
            let name = call.function.name.clone();
            emit(
                events,
                AgentEvent::ToolCall {
                    name: name.clone(),
                    arguments: call.function.arguments.clone(),
                },
            );

            let content = match self.registry.parse_call(&call.function) {
                Ok(ToolInvocation::Finish { answer }) => {
                    info!("Finish task with answer: {:?}", answer);
                    return Ok(LoopStep::Finished(answer));
                }
                Ok(invocation) => {
                    info!("🛠️ Calling `{}` with {:?}", name, invocation);
                    match self.execute(invocation).await {
                        Ok(content) => content,
                        Err(e) => {
                            warn!("Tool `{}` failed: {:#}", name, e);
                            format!("Error: {:#}", e)
                        }
                    }
                }
                Err(e @ DiscoveryError::MalformedToolArguments { .. }) => {
                    return Ok(LoopStep::Aborted(e.to_string()));
                }
                Err(e) => {
                    warn!("Rejected tool call `{}`: {}", name, e);
                    e.to_string()
                }
            };

            let result = ChatMessage::tool_result(call.id.clone(), name, content);
            state.messages.push(result.clone());
            emit(events, AgentEvent::ToolResult(result));
        }

        Ok(LoopStep::Continue)
    }

    async fn execute(&self, invocation: ToolInvocation) -> Result<String> {
        let db = self.db.as_ref();
        match invocation {
            ToolInvocation::GlobalBrowse { query, topk } => self.retriever.global_browse(db, query.as_deref(), topk).await,
            ToolInvocation::ClipSearch { query, topk } => self.retriever.clip_search(db, &query, topk).await,
            ToolInvocation::FrameInspect { question, time_ranges } => {
                self.retriever.frame_inspect(db, question.as_deref(), &time_ranges).await
            }
            ToolInvocation::Finish { answer } => Ok(answer),
        }
    }
}
