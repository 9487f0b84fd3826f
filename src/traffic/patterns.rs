use crate::sim::config::Config;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficOp {
    Read,
    Write,
}

impl TrafficOp {
    pub fn is_store(self) -> bool {
        matches!(self, Self::Write)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficConfig {
    /// "sequential" or "random".
    pub kind: String,
    /// Byte distance between consecutive sequential requests.
    pub stride: u64,
    /// Fraction of requests that are writes, 0.0..=1.0.
    pub write_ratio: f64,
    pub seed: u64,
    pub base: u64,
}

impl Config for TrafficConfig {}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            kind: "sequential".to_string(),
            stride: 64,
            write_ratio: 0.25,
            seed: 1,
            base: 0,
        }
    }
}

#[derive(Debug, Clone)]
enum PatternKind {
    Sequential { stride: u64 },
    Random { seed: u64 },
}

/// Deterministic synthetic transaction source for the driver binary. Every
/// request index maps to the same (op, address) pair across runs.
#[derive(Debug, Clone)]
pub struct PatternEngine {
    kind: PatternKind,
    write_ratio: f64,
    base: u64,
    span: u64,
}

impl PatternEngine {
    /// `span` is the addressable range of the channel in bytes.
    pub fn new(config: &TrafficConfig, span: u64) -> Self {
        let kind = match config.kind.trim().to_ascii_lowercase().as_str() {
            "sequential" | "strided" => PatternKind::Sequential {
                stride: config.stride.max(1),
            },
            "random" => PatternKind::Random { seed: config.seed },
            other => panic!("unsupported traffic pattern kind '{other}' (expected sequential|random)"),
        };
        Self {
            kind,
            write_ratio: config.write_ratio,
            base: config.base,
            span: span.max(1),
        }
    }

    pub fn request(&self, idx: u64) -> (TrafficOp, u64) {
        let addr = match self.kind {
            PatternKind::Sequential { stride } => {
                (self.base + idx.wrapping_mul(stride)) % self.span
            }
            PatternKind::Random { seed } => {
                (self.base + mix64(seed ^ idx.wrapping_mul(0x9e37_79b9_7f4a_7c15))) % self.span
            }
        };
        let op = if decide(self.write_ratio, mix64(idx ^ 0xa5a5_a5a5)) {
            TrafficOp::Write
        } else {
            TrafficOp::Read
        };
        (op, addr)
    }
}

fn decide(rate: f64, key: u64) -> bool {
    let clamped = rate.clamp(0.0, 1.0);
    if clamped <= 0.0 {
        return false;
    }
    if clamped >= 1.0 {
        return true;
    }
    let threshold = (clamped * (u64::MAX as f64)) as u64;
    key <= threshold
}

fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}
