//! Chatsec Protocol Module
//!
//! - `wire`: line codec for server messages and client commands
//! - `sequence`: per-session replay guard
//! - `file_transfer`: receiving side of chunked file transfers

pub mod file_transfer;
pub mod sequence;
pub mod wire;

pub use file_transfer::{
    CompletedTransfer, DirectorySinkFactory, FileTransferCoordinator, LoggingHook, SinkFactory,
    TransferHook, TransferSink,
};
pub use sequence::{ReplayGuard, SequenceVerdict};
pub use wire::{ClientCommand, ServerMessage};
