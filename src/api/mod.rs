//! API Module
//!
//! Chat completion wire types and vendor-neutral response extraction.

pub mod completion;
pub mod extract;

pub use completion::{
    Choice, CompletionRequest, CompletionResponse, CompletionTokensDetails, ContentPart, Message,
    MessageContent, ResponseMessage, Thinking, Usage,
};
pub use extract::{Completion, ProviderResponse};
