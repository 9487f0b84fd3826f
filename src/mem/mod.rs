pub mod addr;
pub mod channel;
pub mod config;
pub mod controller;
pub mod request;
pub mod state;

#[cfg(test)]
mod unit_tests;

pub use addr::{AddressTranslator, MemAddr, TranslationMethod};
pub use channel::{ChannelConfig, FixedLatencyChannel, IssueBlock, MemChannel, SubArrayState};
pub use config::{ConfigError, MemConfig};
pub use controller::{ControllerStats, Deadlocked, MemoryController};
pub use request::{OpType, Owner, Request};
pub use state::{RefreshState, SchedState};
