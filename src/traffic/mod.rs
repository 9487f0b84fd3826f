pub mod patterns;

pub use patterns::{PatternEngine, TrafficConfig, TrafficOp};
