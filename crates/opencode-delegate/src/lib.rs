//! Delegation dispatcher for the opencode core.
//!
//! Takes a "run this task with a sub-agent" request and turns it into
//! a bounded, policy-enforced execution: the target agent is resolved
//! through the caller's permissions, the model through the category
//! chain, skills are injected into the prompt, and the child session
//! gets a denied-tool set it cannot escape. Execution routes either
//! through a synchronous prompt call or the background task manager,
//! and every child inherits the parent's frozen security snapshot.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod agent;
mod categories;
mod dispatcher;
mod error;
mod session;
mod skills;

pub use agent::{AgentDef, AgentRegistry, PermissionDecision, PermissionRule, PermissionSet};
pub use categories::{Categories, Category, CategoryOverride};
pub use dispatcher::{DelegateContext, DelegateDispatcher, DelegateOutput, DelegateRequest};
pub use error::{DelegateError, DelegateResult};
pub use session::{
    DeniedTools, PromptPart, PromptReply, PromptRequest, SessionPrompt, SessionStore,
    denied_tools_for,
};
pub use skills::{
    ENV_DISABLE_EXTERNAL_SKILLS, ENV_TEST_HOME, FsSkillStore, Skill, SkillStore,
    render_skill_blocks,
};
