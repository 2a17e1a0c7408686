//! Wirelink video conversion core
//!
//! Converts frames between the packed 4:2:2 wire format and display RGBA in
//! both directions, and paces decoding for a live preview.
//!
//! Key pieces:
//! - Closed pixel format enum with exhaustive kernel classification
//! - Per-invocation kernels that never touch memory outside the frame
//! - Fixed ring of buffer slots bounded by an in-flight gate
//! - Latest-wins mailbox between producer and consumer

pub mod buffer_pool;
pub mod classifier;
pub mod color;
pub mod command_queue;
pub mod compute;
pub mod config;
pub mod converter;
pub mod error;
pub mod format_conversion;
pub mod in_flight;
pub mod mailbox;
pub mod pipeline;
pub mod types;

pub use buffer_pool::*;
pub use classifier::*;
pub use command_queue::*;
pub use compute::*;
pub use config::*;
pub use converter::*;
pub use error::*;
pub use format_conversion::*;
pub use in_flight::*;
pub use mailbox::*;
pub use pipeline::*;
pub use types::*;
