//! Analysis relay: sends chunk lists to the workflow endpoint and decodes
//! its server-sent-event response.
//!
//! - [`sse`]: byte stream → [`sse::SseFrame`] decoding, transport-free
//! - [`client`]: the HTTP client with buffered and streaming modes

pub mod client;
pub mod sse;

pub use client::{decode_fragments, FragmentStream, WorkflowClient};
pub use sse::{SseDecoder, SseFrame};
