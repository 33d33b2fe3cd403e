//! Tower layers of the client stack.
//!
//! Auth layers live in the crates that own the credentials and plug in
//! through [`HttpClientBuilder::with_auth_layer`](crate::HttpClientBuilder::with_auth_layer).

mod user_agent;

pub use user_agent::{UserAgentLayer, UserAgentService};
