//! Client Module
//!
//! HTTP transport and rate-limit signal parsing.

pub mod http;
pub mod rate_limit;

pub use http::{chat_completions_url, HttpClient, HttpReply};
