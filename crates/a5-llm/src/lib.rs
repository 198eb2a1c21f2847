//! Token sources for the generation driver.
//!
//! The driver only sees [`TokenSource`]: a request goes in, tokens come out
//! through an mpsc channel, and a final [`StreamEvent::Done`] carries usage.

pub mod openai;
pub mod provider;
pub mod sse;

pub use openai::{OpenAiCompatible, OpenAiConfig};
pub use provider::{ChatMessage, ChatRequest, ProviderError, StreamEvent, TokenSource};
