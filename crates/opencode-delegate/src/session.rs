//! Session collaborator traits and child-session tool policy.
//!
//! The prompt-session runtime is an external capability; this module
//! defines the seam the dispatcher talks through, plus the denied-tool
//! construction every delegated child receives.

use std::sync::Arc;

use async_trait::async_trait;
use opencode_core::SessionId;

use crate::agent::AgentDef;

/// One streamed part of a prompt reply.
#[derive(Debug, Clone)]
pub enum PromptPart {
    /// Assistant text.
    Text(String),
    /// A tool invocation, summarized.
    ToolCall {
        /// Tool name.
        name: String,
        /// One-line summary of the call.
        summary: String,
    },
}

/// The reply from a completed session prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptReply {
    /// All parts in arrival order.
    pub parts: Vec<PromptPart>,
}

impl PromptReply {
    /// The last text part, which is the delegated task's answer.
    #[must_use]
    pub fn last_text(&self) -> Option<&str> {
        self.parts.iter().rev().find_map(|part| match part {
            PromptPart::Text(text) => Some(text.as_str()),
            PromptPart::ToolCall { .. } => None,
        })
    }

    /// Summaries of all tool calls, for caller metadata.
    #[must_use]
    pub fn tool_summaries(&self) -> Vec<String> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                PromptPart::ToolCall { name, summary } => Some(format!("{name}: {summary}")),
                PromptPart::Text(_) => None,
            })
            .collect()
    }
}

/// A fully-constructed prompt call.
#[derive(Clone)]
pub struct PromptRequest {
    /// Session to prompt in.
    pub session_id: SessionId,
    /// Resolved provider, when pinned.
    pub provider_id: Option<String>,
    /// Resolved model, when pinned.
    pub model_id: Option<String>,
    /// Target agent name.
    pub agent: String,
    /// Final prompt (user prompt + skills + category suffix).
    pub prompt: String,
    /// Tools the child session must not use.
    pub denied_tools: Vec<String>,
    /// Observer for streamed parts.
    pub progress: Option<Arc<dyn Fn(&PromptPart) + Send + Sync>>,
}

impl std::fmt::Debug for PromptRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptRequest")
            .field("session_id", &self.session_id)
            .field("provider_id", &self.provider_id)
            .field("model_id", &self.model_id)
            .field("agent", &self.agent)
            .field("denied_tools", &self.denied_tools)
            .finish_non_exhaustive()
    }
}

/// External prompt-session runtime.
#[async_trait]
pub trait SessionPrompt: Send + Sync {
    /// Run a prompt to completion.
    async fn prompt(&self, request: PromptRequest) -> Result<PromptReply, String>;

    /// Cancel the in-flight prompt of a session, if any.
    async fn cancel(&self, session: &SessionId);
}

/// External session store.
pub trait SessionStore: Send + Sync {
    /// Create a child session with a title and tool policy.
    fn create(&self, title: &str, denied_tools: &[String]) -> SessionId;

    /// Resolve an existing session for reuse.
    fn resolve(&self, id: &SessionId) -> Option<SessionId>;
}

/// The tool policy applied to a delegated child session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeniedTools {
    /// Tools denied unconditionally.
    pub denied: Vec<String>,
    /// Tools force-allowed on top of the denials
    /// (`experimental.primary_tools`).
    pub allowed: Vec<String>,
}

impl DeniedTools {
    /// The effective blacklist: denials minus forced allows.
    #[must_use]
    pub fn effective(&self) -> Vec<String> {
        self.denied
            .iter()
            .filter(|tool| !self.allowed.contains(tool))
            .cloned()
            .collect()
    }
}

/// Build the denied-tool set for a delegated child.
///
/// Children never get todo tools or recursive delegation; `task` as a
/// whole stays denied unless the target agent's own permission set
/// grants it.
#[must_use]
pub fn denied_tools_for(agent: &AgentDef, primary_tools: &[String]) -> DeniedTools {
    let mut denied = vec![
        "todowrite".to_owned(),
        "todoread".to_owned(),
        "delegate_task".to_owned(),
    ];
    if !agent.permissions.grants_task() {
        denied.push("task".to_owned());
    }

    DeniedTools {
        denied,
        allowed: primary_tools.to_vec(),
    }
}
