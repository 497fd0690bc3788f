//! Protocol implementations.

pub mod channel;
pub mod receiver;
pub mod stk500;

// Re-export common types
pub use channel::{CommandChannel, Expectation};
pub use receiver::{AssemblerState, ResponseAssembler, ResponseReceiver};
pub use stk500::{Command, CommandFrame};
