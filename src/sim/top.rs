use crate::mem::channel::{ChannelConfig, FixedLatencyChannel};
use crate::mem::config::{ConfigError, MemConfig};
use crate::mem::controller::{Deadlocked, MemoryController};
use crate::mem::request::OpType;
use crate::sim::config::SimConfig;
use crate::traffic::{PatternEngine, TrafficConfig, TrafficOp};
use log::info;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
pub struct SimSummary {
    pub cycles: u64,
    pub injected: u64,
    pub completed: u64,
    pub issued_refreshes: u64,
    pub power_downs: u64,
}

/// Outer driver: one controller over one fixed-latency channel, fed from a
/// synthetic traffic pattern until the request budget drains or the timeout
/// hits.
pub struct SimTop {
    pub controller: MemoryController<FixedLatencyChannel>,
    pattern: PatternEngine,
    timeout: u64,
    num_requests: u64,
}

impl SimTop {
    pub fn new(
        sim: &SimConfig,
        mem: MemConfig,
        channel: ChannelConfig,
        traffic: &TrafficConfig,
    ) -> Result<Self, ConfigError> {
        let mem = Arc::new(mem);
        let channel = FixedLatencyChannel::new(mem.ranks, mem.banks, channel);
        let controller = MemoryController::new(mem, channel)?;
        let span = 1u64 << controller.translator().address_bits();
        let pattern = PatternEngine::new(traffic, span);
        Ok(Self {
            controller,
            pattern,
            timeout: sim.timeout,
            num_requests: sim.num_requests,
        })
    }

    pub fn run(&mut self) -> Result<SimSummary, Deadlocked> {
        let mut injected = 0u64;
        let mut completed = 0u64;
        for _ in 0..self.timeout {
            // One new transaction per cycle while the budget lasts.
            if injected < self.num_requests {
                let (op, addr) = self.pattern.request(injected);
                let op = match op {
                    TrafficOp::Read => OpType::Read,
                    TrafficOp::Write => OpType::Write,
                };
                self.controller.enqueue(op, addr);
                injected += 1;
            }
            self.controller.tick_one()?;
            while self.controller.pop_completed().is_some() {
                completed += 1;
            }
            if injected == self.num_requests && completed == injected {
                break;
            }
        }
        let stats = *self.controller.stats();
        info!(
            "run finished: {} cycles, {}/{} transactions completed",
            stats.simulation_cycles, completed, injected
        );
        Ok(SimSummary {
            cycles: stats.simulation_cycles,
            injected,
            completed,
            issued_refreshes: stats.issued_refreshes,
            power_downs: stats.power_downs,
        })
    }
}
