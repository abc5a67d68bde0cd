//! Device CLI protocol: output normalization, command framing, chunk
//! planning and the command/response session.

pub mod ansi;
pub mod chunk;
pub mod command;
pub mod session;

// Re-export common types
pub use chunk::{ChunkPlan, WRITE_CHUNK_MAX};
pub use command::{Command, Marker, PROMPT, READY, Response, Terminator, quote_path};
pub use session::{CommandSession, SessionConfig};
