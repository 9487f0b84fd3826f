use crate::mem::addr::MemAddr;
use crate::mem::channel::{IssueBlock, MemChannel, SubArrayState};
use crate::mem::config::MemConfig;
use crate::mem::controller::MemoryController;
use crate::mem::request::{OpType, Request};
use crate::sim::event_queue::Cycle;
use std::collections::HashSet;
use std::sync::Arc;

/// Scripted channel stand-in: immediately issuable unless told otherwise,
/// completes commands one cycle later, and records everything it is handed.
pub struct ScriptedChannel {
    pub issued: Vec<(Cycle, Request)>,
    /// (rank, bank) pairs that always report busy.
    pub refuse_banks: HashSet<(usize, usize)>,
    /// Command types that always report busy.
    pub refuse_ops: Vec<OpType>,
    /// Refuse REFRESH while the addressed bank still holds an open row.
    pub refuse_refresh_while_open: bool,
    /// (rank, bank, subarray) triples reported as mid-write.
    pub writing: HashSet<(usize, usize, usize)>,
    pub powered_down: Vec<bool>,
    open_rows: HashSet<(usize, usize)>,
    inflight: Vec<(Cycle, Request)>,
    completions: Vec<Request>,
    latency: Cycle,
}

impl ScriptedChannel {
    pub fn new(ranks: usize) -> Self {
        Self {
            issued: Vec::new(),
            refuse_banks: HashSet::new(),
            refuse_ops: Vec::new(),
            refuse_refresh_while_open: false,
            writing: HashSet::new(),
            powered_down: vec![false; ranks],
            open_rows: HashSet::new(),
            inflight: Vec::new(),
            completions: Vec::new(),
            latency: 1,
        }
    }

    /// Issued command types in issue order.
    pub fn ops(&self) -> Vec<OpType> {
        self.issued.iter().map(|(_, req)| req.op).collect()
    }

    /// Issued (type, row) pairs in issue order.
    pub fn op_rows(&self) -> Vec<(OpType, usize)> {
        self.issued
            .iter()
            .map(|(_, req)| (req.op, req.addr.row))
            .collect()
    }

    pub fn issue_cycles(&self) -> Vec<Cycle> {
        self.issued.iter().map(|(cycle, _)| *cycle).collect()
    }
}

impl MemChannel for ScriptedChannel {
    fn check_issue(&self, req: &Request, now: Cycle) -> Result<(), IssueBlock> {
        if self.powered_down[req.addr.rank] && req.op != OpType::PowerUp {
            return Err(IssueBlock::PoweredDown);
        }
        if self.refuse_banks.contains(&(req.addr.rank, req.addr.bank))
            || self.refuse_ops.contains(&req.op)
        {
            return Err(IssueBlock::Busy { until: now + 1 });
        }
        if req.op == OpType::Refresh
            && self.refuse_refresh_while_open
            && self.open_rows.contains(&(req.addr.rank, req.addr.bank))
        {
            return Err(IssueBlock::RowOpen);
        }
        Ok(())
    }

    fn issue_command(&mut self, req: Request, now: Cycle) {
        let key = (req.addr.rank, req.addr.bank);
        match req.op {
            OpType::Activate => {
                self.open_rows.insert(key);
            }
            op if op.closes_row() => {
                self.open_rows.remove(&key);
            }
            OpType::Refresh => {
                self.open_rows.remove(&key);
            }
            _ => {}
        }
        self.issued.push((now, req.clone()));
        if req.op != OpType::Refresh {
            self.inflight.push((now + self.latency, req));
        }
    }

    fn tick(&mut self, now: Cycle) {
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
        !self.open_rows.iter().any(|&(r, _)| r == rank)
    }

    fn can_power_down(&self, _op: OpType, rank: usize) -> bool {
        !self.powered_down[rank]
    }

    fn can_power_up(&self, rank: usize) -> bool {
        self.powered_down[rank]
    }

    fn power_down(&mut self, _op: OpType, rank: usize) {
        self.powered_down[rank] = true;
    }

    fn power_up(&mut self, rank: usize) {
        self.powered_down[rank] = false;
    }

    fn subarray_state(&self, addr: &MemAddr) -> SubArrayState {
        SubArrayState {
            is_writing: self
                .writing
                .contains(&(addr.rank, addr.bank, addr.subarray)),
        }
    }
}

/// Small single-rank, single-bank topology most scenarios start from.
pub fn base_config() -> MemConfig {
    MemConfig {
        channels: 1,
        ranks: 1,
        banks: 1,
        rows: 64,
        cols: 256,
        mat_height: 0,
        rb_size: 256,
        close_page: 1,
        schedule_scheme: 0,
        starvation_threshold: 4,
        deadlock_timer: 100,
        use_refresh: false,
        use_low_power: false,
        write_pausing: false,
        address_mapping_scheme: "R:RK:BK:CH:C".to_string(),
        ..MemConfig::default()
    }
}

pub fn controller_with(config: MemConfig) -> MemoryController<ScriptedChannel> {
    let ranks = config.ranks;
    MemoryController::new(Arc::new(config), ScriptedChannel::new(ranks))
        .expect("test config rejected")
}

/// Physical address for a (row, col, bank, rank, subarray) tuple.
pub fn phys(
    controller: &MemoryController<ScriptedChannel>,
    row: usize,
    col: usize,
    bank: usize,
    rank: usize,
    subarray: usize,
) -> u64 {
    controller
        .translator()
        .reverse_translate(row, col, bank, rank, 0, subarray)
}

pub fn run_ticks(controller: &mut MemoryController<ScriptedChannel>, ticks: u64) {
    for _ in 0..ticks {
        controller.tick_one().expect("unexpected deadlock");
    }
}
