//! Accessible descriptions for rendered diagrams.

pub mod anthropic;
pub mod provider;
mod service;

pub use anthropic::AnthropicDescriber;
pub use provider::{DescribeError, DescriptionProvider, Descriptions, MAX_ALT_TEXT_CHARS};
pub use service::{DescribeOutcome, DescribeService};
