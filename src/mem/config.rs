use crate::mem::request::OpType;
use crate::sim::config::Config;
use serde::Deserialize;
use thiserror::Error;

/// Raised at setup time for parameters the core cannot run with. The
/// simulation never starts on any of these.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unrecognized address mapping tag `{tag}` in scheme `{scheme}`")]
    UnknownMappingTag { tag: String, scheme: String },
    #[error("address mapping scheme `{scheme}` must name each of R, C, BK, RK, CH exactly once")]
    MalformedMappingScheme { scheme: String },
    #[error("field orders {orders:?} are not a permutation of 1..=5")]
    BadFieldOrder { orders: [usize; 5] },
    #[error("undefined low power mode `{0}` (expected SLOWEXIT or FASTEXIT)")]
    UnknownPowerDownMode(String),
    #[error("BanksPerRefresh must be nonzero and no larger than {banks} banks, got {banks_per_refresh}")]
    BadBanksPerRefresh { banks: usize, banks_per_refresh: usize },
    #[error("MATHeight {mat_height} does not evenly divide {rows} rows")]
    BadMatHeight { rows: usize, mat_height: usize },
    #[error("ClosePage must be 0 (open), 1 (relaxed close) or 2 (restricted close), got {0}")]
    BadClosePage(u32),
    #[error("ScheduleScheme must be 0 (fixed), 1 (rank-first) or 2 (bank-first), got {0}")]
    BadScheduleScheme(u32),
    #[error("RefreshRows {refresh_rows} does not evenly divide {rows} rows")]
    BadRefreshRows { rows: usize, refresh_rows: usize },
}

/// Topology and policy knobs consumed by the controller core. Device timing
/// parameters live in `ChannelConfig`; the core consumes cycle counts here
/// without interpreting them.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MemConfig {
    pub channels: usize,
    pub ranks: usize,
    pub banks: usize,
    pub rows: usize,
    pub cols: usize,
    /// Rows per sub-array; 0 means one sub-array spanning the whole bank.
    pub mat_height: usize,
    /// Columns per row-buffer mux subset.
    pub rb_size: usize,
    /// 0 = open page, 1 = relaxed close, 2 = restricted close.
    pub close_page: u32,
    /// 0 = fixed, 1 = rank-first round-robin, 2 = bank-first round-robin.
    pub schedule_scheme: u32,
    /// Consecutive row hits a sub-array may absorb before a queued miss wins.
    pub starvation_threshold: usize,
    /// Cycles a queue head may wait before the watchdog aborts the run.
    pub deadlock_timer: u64,
    pub use_refresh: bool,
    pub banks_per_refresh: usize,
    pub trefw: u64,
    pub refresh_rows: usize,
    pub delayed_refresh_threshold: usize,
    pub use_low_power: bool,
    pub power_down_mode: String,
    pub init_pd: bool,
    pub write_pausing: bool,
    /// Colon-separated field tags, MSB to LSB, e.g. "R:RK:BK:CH:C".
    pub address_mapping_scheme: String,
}

impl Config for MemConfig {}

impl Default for MemConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            ranks: 2,
            banks: 8,
            rows: 65536,
            cols: 256,
            mat_height: 0,
            rb_size: 64,
            close_page: 1,
            schedule_scheme: 2,
            starvation_threshold: 4,
            deadlock_timer: 10000,
            use_refresh: false,
            banks_per_refresh: 1,
            trefw: 560_000,
            refresh_rows: 8,
            delayed_refresh_threshold: 1,
            use_low_power: false,
            power_down_mode: "SLOWEXIT".to_string(),
            init_pd: false,
            write_pausing: false,
            address_mapping_scheme: "CH:RK:R:BK:C".to_string(),
        }
    }
}

impl MemConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.close_page > 2 {
            return Err(ConfigError::BadClosePage(self.close_page));
        }
        if self.schedule_scheme > 2 {
            return Err(ConfigError::BadScheduleScheme(self.schedule_scheme));
        }
        if self.mat_height != 0 && self.rows % self.mat_height != 0 {
            return Err(ConfigError::BadMatHeight {
                rows: self.rows,
                mat_height: self.mat_height,
            });
        }
        if self.use_refresh {
            if self.banks_per_refresh == 0 || self.banks_per_refresh > self.banks {
                return Err(ConfigError::BadBanksPerRefresh {
                    banks: self.banks,
                    banks_per_refresh: self.banks_per_refresh,
                });
            }
            if self.refresh_rows == 0 || self.rows % self.refresh_rows != 0 {
                return Err(ConfigError::BadRefreshRows {
                    rows: self.rows,
                    refresh_rows: self.refresh_rows,
                });
            }
        }
        if self.use_low_power {
            self.power_down_op()?;
        }
        Ok(())
    }

    /// Rows per sub-array with the unconfigured case resolved.
    pub fn mat_height_effective(&self) -> usize {
        if self.mat_height == 0 {
            self.rows
        } else {
            self.mat_height
        }
    }

    pub fn subarray_count(&self) -> usize {
        self.rows / self.mat_height_effective()
    }

    /// Interval between refresh pulses to one (rank, bank group).
    pub fn trefi(&self) -> u64 {
        self.trefw / (self.rows / self.refresh_rows) as u64
    }

    pub fn power_down_op(&self) -> Result<OpType, ConfigError> {
        match self.power_down_mode.as_str() {
            "SLOWEXIT" => Ok(OpType::PowerDownSlow),
            "FASTEXIT" => Ok(OpType::PowerDownFast),
            other => Err(ConfigError::UnknownPowerDownMode(other.to_string())),
        }
    }
}
