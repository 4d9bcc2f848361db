//! The delegation dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use opencode_core::{SessionId, TaskId, TaskSnapshot};
use opencode_tasks::{CreateTaskInput, TaskExecutor, TaskManager};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::agent::{AgentDef, AgentRegistry, PermissionDecision, PermissionSet};
use crate::categories::Categories;
use crate::error::{DelegateError, DelegateResult};
use crate::session::{
    PromptPart, PromptRequest, SessionPrompt, SessionStore, denied_tools_for,
};
use crate::skills::{Skill, SkillStore, render_skill_blocks};

/// Default agent when `subagent_type` is omitted.
const DEFAULT_AGENT: &str = "explore";

/// Input to [`DelegateDispatcher::delegate`].
#[derive(Debug, Clone)]
pub struct DelegateRequest {
    /// Short task description (also the child session title stem).
    pub description: String,
    /// The task prompt.
    pub prompt: String,
    /// Route through the background task manager instead of waiting.
    pub run_in_background: bool,
    /// Delegation category. Mutually exclusive with `subagent_type`.
    pub category: Option<String>,
    /// Target agent. Mutually exclusive with `category`.
    pub subagent_type: Option<String>,
    /// Existing session to reuse.
    pub session_id: Option<SessionId>,
    /// Skills to inject into the prompt.
    pub load_skills: Vec<String>,
}

/// Caller-side context for one delegation.
#[derive(Clone)]
pub struct DelegateContext {
    /// Whether the caller is itself a delegated agent.
    pub is_subagent: bool,
    /// Provider of the caller's message model.
    pub caller_provider: Option<String>,
    /// The caller's message model.
    pub caller_model: Option<String>,
    /// The caller's permission set (gates agent accessibility).
    pub caller_permissions: PermissionSet,
    /// `experimental.primary_tools` from the host config.
    pub primary_tools: Vec<String>,
    /// Abort signal for synchronous delegations.
    pub abort: CancellationToken,
    /// Sink for progress metadata echoed to the caller.
    pub metadata_sink: Option<Arc<dyn Fn(serde_json::Value) + Send + Sync>>,
}

impl Default for DelegateContext {
    fn default() -> Self {
        Self {
            is_subagent: false,
            caller_provider: None,
            caller_model: None,
            caller_permissions: PermissionSet::allow_all(),
            primary_tools: Vec::new(),
            abort: CancellationToken::new(),
            metadata_sink: None,
        }
    }
}

impl std::fmt::Debug for DelegateContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegateContext")
            .field("is_subagent", &self.is_subagent)
            .field("caller_provider", &self.caller_provider)
            .field("caller_model", &self.caller_model)
            .field("primary_tools", &self.primary_tools)
            .finish_non_exhaustive()
    }
}

/// Result of a delegation or companion operation.
#[derive(Debug, Clone)]
pub struct DelegateOutput {
    /// Human-readable output text.
    pub output: String,
    /// Structured metadata for the tool boundary.
    pub metadata: serde_json::Value,
}

/// The delegation dispatcher.
///
/// Owns the wiring between the agent registry, skill store, session
/// runtime, and the background task manager. The security snapshot
/// rides on the task manager and is inherited by identity.
pub struct DelegateDispatcher {
    agents: Arc<dyn AgentRegistry>,
    skills: Arc<dyn SkillStore>,
    sessions: Arc<dyn SessionStore>,
    prompts: Arc<dyn SessionPrompt>,
    tasks: TaskManager,
    categories: Categories,
}

impl DelegateDispatcher {
    /// Wire up a dispatcher.
    #[must_use]
    pub fn new(
        agents: Arc<dyn AgentRegistry>,
        skills: Arc<dyn SkillStore>,
        sessions: Arc<dyn SessionStore>,
        prompts: Arc<dyn SessionPrompt>,
        tasks: TaskManager,
        categories: Categories,
    ) -> Self {
        Self {
            agents,
            skills,
            sessions,
            prompts,
            tasks,
            categories,
        }
    }

    /// The task manager delegations run through.
    #[must_use]
    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    /// Run a delegation.
    ///
    /// # Errors
    ///
    /// Structured tool errors, with no side effects: sub-agent callers,
    /// mutually exclusive parameters, unknown agents or categories, and
    /// prompt failures.
    pub async fn delegate(
        &self,
        request: DelegateRequest,
        ctx: &DelegateContext,
    ) -> DelegateResult<DelegateOutput> {
        if ctx.is_subagent {
            return Err(DelegateError::SubagentContext);
        }
        if request.category.is_some() && request.subagent_type.is_some() {
            return Err(DelegateError::MutuallyExclusive);
        }

        let agent = self.resolve_agent(request.subagent_type.as_deref(), ctx)?;
        let category = self.resolve_category(request.category.as_deref())?;
        let (provider_id, model_id) = self.resolve_model(category.as_ref().map(|c| &c.1), &agent, ctx);

        let prompt = self.assemble_prompt(
            &request.prompt,
            &request.load_skills,
            category.as_ref().and_then(|c| c.1.prompt_append.as_deref()),
        );

        let denied = denied_tools_for(&agent, &ctx.primary_tools).effective();
        let session = self.resolve_session(&request, &agent, &denied);

        let prompt_request = PromptRequest {
            session_id: session.clone(),
            provider_id: provider_id.clone(),
            model_id: model_id.clone(),
            agent: agent.name.clone(),
            prompt,
            denied_tools: denied,
            progress: ctx.metadata_sink.clone().map(progress_forwarder),
        };

        info!(
            agent = %agent.name,
            background = request.run_in_background,
            session = %session,
            "delegating task"
        );

        if request.run_in_background {
            self.delegate_background(&request, category.map(|c| c.0), provider_id, model_id, session, prompt_request)
        } else {
            self.delegate_sync(ctx, &session, prompt_request).await
        }
    }

    /// Snapshot a background task for the caller.
    ///
    /// # Errors
    ///
    /// [`DelegateError::UnknownTask`] for an unknown ID.
    pub fn background_output(&self, task_id: &TaskId) -> DelegateResult<DelegateOutput> {
        let snapshot = self
            .tasks
            .get(task_id)
            .ok_or_else(|| DelegateError::UnknownTask {
                id: task_id.to_string(),
            })?;

        Ok(DelegateOutput {
            output: render_task_snapshot(&snapshot),
            metadata: serde_json::to_value(&snapshot).unwrap_or_else(|_| json!({})),
        })
    }

    /// Cancel a background task and its session prompt.
    ///
    /// # Errors
    ///
    /// [`DelegateError::UnknownTask`] for an unknown ID and
    /// [`DelegateError::TaskTerminal`] when the task already finished.
    pub async fn background_cancel(&self, task_id: &TaskId) -> DelegateResult<DelegateOutput> {
        let snapshot = self
            .tasks
            .get(task_id)
            .ok_or_else(|| DelegateError::UnknownTask {
                id: task_id.to_string(),
            })?;

        if snapshot.status.is_terminal() {
            return Err(DelegateError::TaskTerminal {
                id: task_id.to_string(),
                status: snapshot.status.to_string(),
            });
        }

        if let Some(session) = &snapshot.session_id {
            self.prompts.cancel(session).await;
        }
        self.tasks.cancel(task_id);

        Ok(DelegateOutput {
            output: format!("Task {task_id} cancelled."),
            metadata: json!({ "taskId": task_id.to_string(), "cancelled": true }),
        })
    }

    /// Resolve the target agent through the caller's permissions.
    fn resolve_agent(
        &self,
        subagent_type: Option<&str>,
        ctx: &DelegateContext,
    ) -> DelegateResult<AgentDef> {
        let name = subagent_type.unwrap_or(DEFAULT_AGENT);
        let accessible = |agent: &AgentDef| {
            ctx.caller_permissions
                .evaluate(&format!("task {}", agent.name))
                != PermissionDecision::Deny
        };

        match self.agents.get(name) {
            Some(agent) if accessible(&agent) => Ok(agent),
            _ => {
                let available = self
                    .agents
                    .list()
                    .into_iter()
                    .filter(accessible)
                    .map(|a| a.name)
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(DelegateError::UnknownAgent {
                    name: name.to_owned(),
                    available,
                })
            },
        }
    }

    /// Resolve a category by name.
    fn resolve_category(
        &self,
        category: Option<&str>,
    ) -> DelegateResult<Option<(String, crate::categories::Category)>> {
        let Some(name) = category else {
            return Ok(None);
        };
        let resolved = self.categories.resolve();
        match resolved.get(name) {
            Some(entry) => Ok(Some((name.to_owned(), entry.clone()))),
            None => Err(DelegateError::UnknownCategory {
                name: name.to_owned(),
                available: resolved.keys().cloned().collect::<Vec<_>>().join(", "),
            }),
        }
    }

    /// Category model → agent model → caller model, each split on the
    /// first `/` into provider and model.
    fn resolve_model(
        &self,
        category: Option<&crate::categories::Category>,
        agent: &AgentDef,
        ctx: &DelegateContext,
    ) -> (Option<String>, Option<String>) {
        if let Some(model) = category.and_then(|c| c.model.as_deref()) {
            if let Some((provider, model)) = model.split_once('/') {
                return (Some(provider.to_owned()), Some(model.to_owned()));
            }
        }
        if let Some(model) = agent.model.as_deref() {
            if let Some((provider, model)) = model.split_once('/') {
                return (Some(provider.to_owned()), Some(model.to_owned()));
            }
        }
        (ctx.caller_provider.clone(), ctx.caller_model.clone())
    }

    /// User prompt, then skill blocks, then the category suffix.
    fn assemble_prompt(
        &self,
        prompt: &str,
        load_skills: &[String],
        prompt_append: Option<&str>,
    ) -> String {
        let skills: Vec<Skill> = load_skills
            .iter()
            .filter_map(|name| self.skills.get(name))
            .collect();

        let mut assembled = prompt.to_owned();
        if !skills.is_empty() {
            assembled.push_str("\n\n");
            assembled.push_str(&render_skill_blocks(&skills));
        }
        if let Some(suffix) = prompt_append {
            assembled.push_str("\n\n");
            assembled.push_str(suffix);
        }
        assembled
    }

    /// Reuse the caller-supplied session when it resolves, otherwise
    /// create a child session with the delegation tool policy.
    fn resolve_session(
        &self,
        request: &DelegateRequest,
        agent: &AgentDef,
        denied_tools: &[String],
    ) -> SessionId {
        if let Some(existing) = request
            .session_id
            .as_ref()
            .and_then(|id| self.sessions.resolve(id))
        {
            debug!(session = %existing, "reusing delegated session");
            return existing;
        }

        let title = format!("{} (@{} delegate)", request.description, agent.name);
        self.sessions.create(&title, denied_tools)
    }

    /// Synchronous execution: wait for the prompt, honoring the abort
    /// signal.
    async fn delegate_sync(
        &self,
        ctx: &DelegateContext,
        session: &SessionId,
        prompt_request: PromptRequest,
    ) -> DelegateResult<DelegateOutput> {
        let reply = tokio::select! {
            biased;
            () = ctx.abort.cancelled() => {
                self.prompts.cancel(session).await;
                return Err(DelegateError::Aborted);
            },
            result = self.prompts.prompt(prompt_request) => {
                result.map_err(DelegateError::PromptFailed)?
            },
        };

        let text = reply.last_text().unwrap_or("(no text output)").to_owned();
        Ok(DelegateOutput {
            output: format!("{text}\n\n<task_metadata>session_id: {session}</task_metadata>"),
            metadata: json!({
                "sessionId": session.to_string(),
                "toolCalls": reply.tool_summaries(),
            }),
        })
    }

    /// Background execution: hand the prompt to the task manager and
    /// return immediately.
    fn delegate_background(
        &self,
        request: &DelegateRequest,
        category: Option<String>,
        provider_id: Option<String>,
        model_id: Option<String>,
        session: SessionId,
        prompt_request: PromptRequest,
    ) -> DelegateResult<DelegateOutput> {
        let executor = Arc::new(BackgroundPromptExecutor {
            prompts: Arc::clone(&self.prompts),
            request: prompt_request,
            session: session.clone(),
        });

        let snapshot = self.tasks.create(CreateTaskInput {
            description: Some(request.description.clone()),
            provider: provider_id,
            model: model_id,
            category,
            session_id: Some(session.clone()),
            executor: Some(executor),
        });

        let task_id = snapshot.id.clone();
        Ok(DelegateOutput {
            output: format!(
                "Task {task_id} is running in the background.\n\
                 Check progress with background_output(task_id: \"{task_id}\"); \
                 stop it with background_cancel(task_id: \"{task_id}\")."
            ),
            metadata: json!({
                "taskId": task_id.to_string(),
                "sessionId": session.to_string(),
                "background": true,
            }),
        })
    }
}

/// Per-task executor that runs the delegated prompt.
struct BackgroundPromptExecutor {
    prompts: Arc<dyn SessionPrompt>,
    request: PromptRequest,
    session: SessionId,
}

#[async_trait]
impl TaskExecutor for BackgroundPromptExecutor {
    async fn execute(&self, _task: TaskSnapshot) -> Result<serde_json::Value, String> {
        let reply = self.prompts.prompt(self.request.clone()).await?;
        Ok(json!({
            "text": reply.last_text().unwrap_or("(no text output)"),
            "sessionId": self.session.to_string(),
        }))
    }
}

/// Forward streamed parts into the caller's metadata sink.
fn progress_forwarder(
    sink: Arc<dyn Fn(serde_json::Value) + Send + Sync>,
) -> Arc<dyn Fn(&PromptPart) + Send + Sync> {
    Arc::new(move |part| {
        let value = match part {
            PromptPart::Text(text) => json!({ "type": "text", "text": text }),
            PromptPart::ToolCall { name, summary } => {
                json!({ "type": "tool", "name": name, "summary": summary })
            },
        };
        sink(value);
    })
}

/// Human-readable snapshot rendering for `background_output`.
fn render_task_snapshot(snapshot: &TaskSnapshot) -> String {
    let mut lines = vec![
        format!("Task {}", snapshot.id),
        format!("  status:  {}", snapshot.status),
        format!("  created: {}", snapshot.created_at.to_rfc3339()),
    ];
    if let Some(description) = &snapshot.description {
        lines.insert(1, format!("  task:    {description}"));
    }
    if let Some(started) = snapshot.started_at {
        lines.push(format!("  started: {}", started.to_rfc3339()));
    }
    if let Some(completed) = snapshot.completed_at {
        lines.push(format!("  ended:   {}", completed.to_rfc3339()));
    }
    if let Some(session) = &snapshot.session_id {
        lines.push(format!("  session: {session}"));
    }
    if let Some(error) = &snapshot.error {
        lines.push(format!("  error:   {error}"));
    }
    if let Some(text) = snapshot
        .result
        .as_ref()
        .and_then(|r| r.get("text"))
        .and_then(|t| t.as_str())
    {
        lines.push(String::new());
        lines.push(text.to_owned());
    }
    lines.join("\n")
}
