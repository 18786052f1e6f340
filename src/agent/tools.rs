use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;

use super::schema::{ParamSpec, ParamType, ToolSpec, DATABASE_PARAM};
use crate::clips::hhmmss_to_seconds;
use crate::config::AgentConfig;
use crate::error::DiscoveryError;
use crate::knowledge::NOT_FOUND;
use crate::llm::FunctionCall;

pub const GLOBAL_BROWSE: &str = "global_browse";
pub const CLIP_SEARCH: &str = "clip_search";
pub const FRAME_INSPECT: &str = "frame_inspect";
pub const FINISH: &str = "finish";

const TOPK_PARAM: &str = "topk";

/// A tool call decoded into typed arguments
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    GlobalBrowse { query: Option<String>, topk: usize },
    ClipSearch { query: String, topk: usize },
    FrameInspect { question: Option<String>, time_ranges: Vec<(u64, u64)> },
    Finish { answer: String },
}

#[derive(Debug, Deserialize)]
struct GlobalBrowseArgs {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    topk: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ClipSearchArgs {
    #[serde(alias = "event_description")]
    query: String,
    #[serde(default, alias = "top_k")]
    topk: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct FrameInspectArgs {
    #[serde(default)]
    question: Option<String>,
    #[serde(alias = "time_ranges_hhmmss")]
    time_ranges: Vec<(Value, Value)>,
}

#[derive(Debug, Deserialize)]
struct FinishArgs {
    answer: Value,
}

fn global_browse_spec() -> ToolSpec {
    ToolSpec::new(
        GLOBAL_BROWSE,
        "Get a global view of the whole video: the registry of its main subjects and an overview of the events \
         related to the query, written from the most relevant clip descriptions. Without a query, summarizes \
         the video as a whole.",
    )
    .param(ParamSpec::database())
    .param(ParamSpec::optional(
        "query",
        ParamType::String,
        "A textual description used to find relevant clips in the video.",
    ))
    .param(ParamSpec::optional(
        TOPK_PARAM,
        ParamType::Integer,
        "Maximum number of clip descriptions to consider. Just use the default value.",
    ))
}

fn clip_search_spec(default_topk: usize) -> ToolSpec {
    ToolSpec::new(
        CLIP_SEARCH,
        "Search the video for clips matching an event description and return the captions of the most \
         relevant clips, in chronological order, each prefixed with its time range.",
    )
    .param(ParamSpec::database())
    .param(ParamSpec::required(
        "query",
        ParamType::String,
        "A textual description of the event to search for.",
    ))
    .param(
        ParamSpec::optional(
            TOPK_PARAM,
            ParamType::Integer,
            "Maximum number of clips to retrieve. Just use the default value.",
        )
        .with_default(json!(default_topk)),
    )
}

fn frame_inspect_spec(max_frames: usize) -> ToolSpec {
    let description = format!(
        "Look at the actual video frames in the given time ranges and answer a detailed question about them. \
         Up to {} frames are sampled evenly across the ranges. Returns `{}` when nothing relevant is visible.",
        max_frames, NOT_FOUND
    );
    ToolSpec::new(FRAME_INSPECT, description)
        .param(ParamSpec::database())
        .param(ParamSpec::optional(
            "question",
            ParamType::String,
            "The specific, detailed question to ask about the frames. No need to repeat the time ranges.",
        ))
        .param(ParamSpec::required(
            "time_ranges",
            ParamType::TimeRanges,
            "A list of [start, end] pairs in HH:MM:SS format.",
        ))
}

fn finish_spec() -> ToolSpec {
    ToolSpec::new(
        FINISH,
        "Call this after confirming the answer to the user's question to end the conversation.",
    )
    .param(ParamSpec::required("answer", ParamType::String, "Answer to the user's question."))
}

/// The fixed set of tools offered to the orchestrator model
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
    global_browse_topk: usize,
    clip_search_topk: usize,
    topk_override: Option<usize>,
}

impl ToolRegistry {
    /// Build and validate the registry; lite mode leaves out `frame_inspect`
    pub fn new(agent: &AgentConfig, lite_mode: bool) -> Result<Self, DiscoveryError> {
        let mut specs = vec![global_browse_spec(), clip_search_spec(agent.clip_search_topk)];
        if !lite_mode {
            specs.push(frame_inspect_spec(agent.frame_inspect_max_frames));
        }
        specs.push(finish_spec());

        let registry = Self {
            specs,
            global_browse_topk: agent.global_browse_topk,
            clip_search_topk: agent.clip_search_topk,
            topk_override: (agent.topk_override > 0).then_some(agent.topk_override),
        };
        registry.validate(lite_mode)?;
        Ok(registry)
    }

    fn validate(&self, lite_mode: bool) -> Result<(), DiscoveryError> {
        let mut names = HashSet::new();
        for spec in &self.specs {
            spec.validate()?;
            if !names.insert(spec.name) {
                return Err(DiscoveryError::Config(format!("tool `{}` registered twice", spec.name)));
            }
        }
        if !names.contains(FINISH) {
            return Err(DiscoveryError::Config("the `finish` tool is required".to_string()));
        }
        if lite_mode && names.contains(FRAME_INSPECT) {
            return Err(DiscoveryError::Config("`frame_inspect` is unavailable in lite mode".to_string()));
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.specs.iter().map(|s| s.name).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Function schemas in the order the tools were registered
    pub fn schemas(&self) -> Vec<Value> {
        self.specs.iter().map(ToolSpec::function_schema).collect()
    }

    /// Decode a model tool call.
    ///
    /// Errors: `UnknownTool` for an unregistered name, `MalformedToolArguments`
    /// when the argument string is not JSON, `InvalidToolArguments` when the
    /// JSON does not fit the tool's parameters.
    pub fn parse_call(&self, call: &FunctionCall) -> Result<ToolInvocation, DiscoveryError> {
        let spec = self
            .get(&call.name)
            .ok_or_else(|| DiscoveryError::UnknownTool(call.name.clone()))?;

        let raw = call.arguments.trim();
        let mut args: Value = if raw.is_empty() {
            json!({})
        } else {
            serde_json::from_str(raw).map_err(|e| DiscoveryError::MalformedToolArguments {
                tool: call.name.clone(),
                reason: e.to_string(),
            })?
        };

        let invalid = |reason: String| DiscoveryError::InvalidToolArguments {
            tool: call.name.clone(),
            reason,
        };

        let Value::Object(fields) = &mut args else {
            return Err(invalid("arguments must be a JSON object".to_string()));
        };
        if spec.takes_database() {
            fields.remove(DATABASE_PARAM);
        }
        if let Some(topk) = self.topk_override {
            if spec.has_param(TOPK_PARAM) {
                fields.insert(TOPK_PARAM.to_string(), json!(topk));
            }
        }

        let decode_err = |e: serde_json::Error| invalid(e.to_string());
        match spec.name {
            GLOBAL_BROWSE => {
                let a: GlobalBrowseArgs = serde_json::from_value(args).map_err(decode_err)?;
                Ok(ToolInvocation::GlobalBrowse {
                    query: a.query,
                    topk: a.topk.unwrap_or(self.global_browse_topk),
                })
            }
            CLIP_SEARCH => {
                let a: ClipSearchArgs = serde_json::from_value(args).map_err(decode_err)?;
                Ok(ToolInvocation::ClipSearch {
                    query: a.query,
                    topk: a.topk.unwrap_or(self.clip_search_topk),
                })
            }
            FRAME_INSPECT => {
                let a: FrameInspectArgs = serde_json::from_value(args).map_err(decode_err)?;
                let time_ranges = a
                    .time_ranges
                    .into_iter()
                    .map(|(start, end)| Ok((time_arg(&start)?, time_arg(&end)?)))
                    .collect::<Result<Vec<_>, DiscoveryError>>()
                    .map_err(|e| invalid(e.to_string()))?;
                Ok(ToolInvocation::FrameInspect {
                    question: a.question,
                    time_ranges,
                })
            }
            FINISH => {
                let a: FinishArgs = serde_json::from_value(args).map_err(decode_err)?;
                let answer = match a.answer {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                Ok(ToolInvocation::Finish { answer })
            }
            other => Err(DiscoveryError::UnknownTool(other.to_string())),
        }
    }
}

/// Seconds from an `HH:MM:SS` / `MM:SS` string or a bare number
fn time_arg(value: &Value) -> Result<u64, DiscoveryError> {
    match value {
        Value::String(s) => hhmmss_to_seconds(s),
        Value::Number(n) => n
            .as_f64()
            .filter(|secs| *secs >= 0.0)
            .map(|secs| secs as u64)
            .ok_or_else(|| DiscoveryError::InvalidTimestamp(n.to_string())),
        other => Err(DiscoveryError::InvalidTimestamp(other.to_string())),
    }
}
