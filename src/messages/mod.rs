// Wire-level building blocks: protocol constants, inbound message catalog
// and outbound message builders.

pub mod backend;
pub mod constants;
pub mod frontend;
pub mod types;

pub use constants::*;
pub use frontend::FrontendMessage;
pub use types::{BytesMutReader, DataType};

/// Ceiling for a single framed message. Anything larger is treated as a
/// fatal protocol error before the payload is read.
pub const MAX_MESSAGE_SIZE: i32 = 256 * 1024 * 1024;
