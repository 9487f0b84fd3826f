use crate::mem::addr::MemAddr;
use crate::mem::request::{OpType, Request};
use crate::sim::config::Config;
use crate::sim::event_queue::Cycle;
use log::trace;
use serde::Deserialize;

/// Why the downstream cannot accept a command this tick. Transient; the
/// scheduler retries on subsequent ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueBlock {
    /// A timing window on the target bank or rank is still busy.
    Busy { until: Cycle },
    /// The bank still holds an open row that must be precharged first.
    RowOpen,
    /// The rank is powered down and must power up before accepting commands.
    PoweredDown,
}

/// Snapshot of one sub-array's sense-amp activity, surfaced so the scheduler
/// never needs a typed downcast into the device model.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubArrayState {
    pub is_writing: bool,
}

/// Narrow capability surface the controller holds on its downstream
/// interconnect. The controller records `issue_cycle` before handing a
/// command over; completed commands flow back through `take_completions`.
pub trait MemChannel {
    fn check_issue(&self, req: &Request, now: Cycle) -> Result<(), IssueBlock>;
    fn issue_command(&mut self, req: Request, now: Cycle);
    /// Advance the device model to `now`, retiring finished commands.
    fn tick(&mut self, now: Cycle);
    fn take_completions(&mut self) -> Vec<Request>;
    fn is_rank_idle(&self, rank: usize) -> bool;
    fn can_power_down(&self, op: OpType, rank: usize) -> bool;
    fn can_power_up(&self, rank: usize) -> bool;
    fn power_down(&mut self, op: OpType, rank: usize);
    fn power_up(&mut self, rank: usize);
    fn subarray_state(&self, addr: &MemAddr) -> SubArrayState;
}

/// Cycle counts the fixed-latency channel model charges per command class.
/// Consumed as opaque windows; no device datasheet semantics are implied.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct ChannelConfig {
    pub activate_latency: Cycle,
    pub read_latency: Cycle,
    pub write_latency: Cycle,
    pub precharge_latency: Cycle,
    pub refresh_latency: Cycle,
    pub power_up_latency: Cycle,
    /// Accept a read into a sub-array that is mid-write, pausing the write.
    pub allow_write_pause: bool,
}

impl Config for ChannelConfig {}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            activate_latency: 14,
            read_latency: 14,
            write_latency: 16,
            precharge_latency: 14,
            refresh_latency: 160,
            power_up_latency: 10,
            allow_write_pause: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BankWindow {
    busy_until: Cycle,
    open_row: Option<usize>,
    writing_until: Cycle,
    writing_subarray: usize,
}

/// Minimal per-bank busy-window timing model standing in for a full
/// interconnect/rank/bank hierarchy. Each command occupies its bank for a
/// configured number of cycles and completes when the window closes.
/// REFRESH commands are absorbed here; the rank owns their lifetime.
#[derive(Debug)]
pub struct FixedLatencyChannel {
    config: ChannelConfig,
    banks: usize,
    now: Cycle,
    windows: Vec<BankWindow>,
    powered_down: Vec<bool>,
    power_ready: Vec<Cycle>,
    inflight: Vec<(Cycle, Request)>,
    completions: Vec<Request>,
}

impl FixedLatencyChannel {
    pub fn new(ranks: usize, banks: usize, config: ChannelConfig) -> Self {
        Self {
            config,
            banks,
            now: 0,
            windows: vec![BankWindow::default(); ranks * banks],
            powered_down: vec![false; ranks],
            power_ready: vec![0; ranks],
            inflight: Vec::new(),
            completions: Vec::new(),
        }
    }

    fn window(&self, rank: usize, bank: usize) -> &BankWindow {
        &self.windows[rank * self.banks + bank]
    }

    fn window_mut(&mut self, rank: usize, bank: usize) -> &mut BankWindow {
        &mut self.windows[rank * self.banks + bank]
    }

    fn latency(&self, op: OpType) -> Cycle {
        match op {
            OpType::Activate => self.config.activate_latency,
            OpType::Read => self.config.read_latency,
            OpType::Write => self.config.write_latency,
            OpType::Precharge | OpType::PrechargeAll => self.config.precharge_latency,
            OpType::ReadPrecharge => self.config.read_latency + self.config.precharge_latency,
            OpType::WritePrecharge => self.config.write_latency + self.config.precharge_latency,
            OpType::Refresh => self.config.refresh_latency,
            OpType::PowerUp => self.config.power_up_latency,
            OpType::PowerDownFast | OpType::PowerDownSlow | OpType::PowerDownActive => 1,
        }
    }

    fn write_in_progress(win: &BankWindow, subarray: usize, now: Cycle) -> bool {
        now < win.writing_until && win.writing_subarray == subarray
    }
}

impl MemChannel for FixedLatencyChannel {
    fn check_issue(&self, req: &Request, now: Cycle) -> Result<(), IssueBlock> {
        if self.powered_down[req.addr.rank] && req.op != OpType::PowerUp {
            return Err(IssueBlock::PoweredDown);
        }
        let win = self.window(req.addr.rank, req.addr.bank);
        if req.op == OpType::Refresh && win.open_row.is_some() {
            return Err(IssueBlock::RowOpen);
        }
        if now < win.busy_until {
            // A read may still slip into a sub-array that is mid-write.
            if self.config.allow_write_pause
                && req.op == OpType::Read
                && Self::write_in_progress(win, req.addr.subarray, now)
            {
                return Ok(());
            }
            return Err(IssueBlock::Busy {
                until: win.busy_until,
            });
        }
        Ok(())
    }

    fn issue_command(&mut self, req: Request, now: Cycle) {
        self.now = now;
        let latency = self.latency(req.op);
        let done = now + latency;
        let subarray = req.addr.subarray;
        let win = self.window_mut(req.addr.rank, req.addr.bank);
        match req.op {
            OpType::Activate => win.open_row = Some(req.addr.row),
            OpType::Precharge | OpType::PrechargeAll => win.open_row = None,
            OpType::ReadPrecharge | OpType::WritePrecharge => win.open_row = None,
            OpType::Refresh => win.open_row = None,
            _ => {}
        }
        if req.op.is_write() {
            win.writing_until = done;
            win.writing_subarray = subarray;
        } else if req.op == OpType::Read && now < win.writing_until {
            // Write pause: accepting the read cancels the remaining write window.
            win.writing_until = now;
        }
        win.busy_until = done;
        trace!("channel accepted {} for {}, done at {}", req.op, req.addr, done);
        if req.op == OpType::Refresh {
            return;
        }
        self.inflight.push((done, req));
    }

    fn tick(&mut self, now: Cycle) {
        self.now = now;
        let mut i = 0;
        while i < self.inflight.len() {
            if self.inflight[i].0 <= now {
                let (_, req) = self.inflight.remove(i);
                self.completions.push(req);
            } else {
                i += 1;
            }
        }
    }

    fn take_completions(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.completions)
    }

    fn is_rank_idle(&self, rank: usize) -> bool {
        (0..self.banks).all(|b| self.window(rank, b).open_row.is_none())
    }

    fn can_power_down(&self, _op: OpType, rank: usize) -> bool {
        !self.powered_down[rank]
            && self.inflight.iter().all(|(_, req)| req.addr.rank != rank)
    }

    fn can_power_up(&self, rank: usize) -> bool {
        self.powered_down[rank]
    }

    fn power_down(&mut self, op: OpType, rank: usize) {
        trace!("rank {} entering {}", rank, op);
        self.powered_down[rank] = true;
    }

    fn power_up(&mut self, rank: usize) {
        trace!("rank {} powering up", rank);
        self.powered_down[rank] = false;
        self.power_ready[rank] = self.now + self.config.power_up_latency;
        for bank in 0..self.banks {
            let ready = self.power_ready[rank];
            let win = self.window_mut(rank, bank);
            win.busy_until = win.busy_until.max(ready);
        }
    }

    fn subarray_state(&self, addr: &MemAddr) -> SubArrayState {
        let win = self.window(addr.rank, addr.bank);
        SubArrayState {
            is_writing: Self::write_in_progress(win, addr.subarray, self.now),
        }
    }
}
