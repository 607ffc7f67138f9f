//! Langbase Pipes client.
//!
//! The engine reaches the LLM only through the pipes configured in
//! [`crate::config::PipeConfig`]; the collaborator adapters in
//! [`crate::collaborators`] wrap this client.

mod client;
mod types;


pub use client::LangbaseClient;
pub use types::*;
