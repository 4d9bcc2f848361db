//! Built-in remote MCP server registry.
//!
//! Three pre-declared remote servers can be enabled with nothing but
//! an API key in the environment. Resolution is gated by the security
//! config's MCP policy and the caller's disabled list; a server the
//! user already configured under the same name is never overridden.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod builtin;

pub use builtin::{
    BUILTIN_SERVERS, BuiltinMcpServer, McpRemoteConfig, ResolveOptions, resolve_builtin_servers,
    resolve_with_env,
};
