/*
Memory controller core: per-bank command queues, row-buffer/sub-array hit
scheduling with starvation avoidance, transaction-to-command lowering,
staggered delayed refresh, rank power management and a deadlock watchdog.

One transaction is selected per tick; at most one device command is issued
per tick across the whole channel, either a refresh or the head of a
per-bank queue chosen round-robin.
*/

use crate::mem::addr::{AddressTranslator, MemAddr, TranslationMethod};
use crate::mem::channel::MemChannel;
use crate::mem::config::{ConfigError, MemConfig};
use crate::mem::request::{OpType, Owner, Request};
use crate::mem::state::{RefreshState, SchedState};
use crate::sim::event_queue::{Cycle, EventQueue};
use log::{debug, error, info, trace};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

/// A queued command could not be sent downstream within `DeadlockTimer`
/// cycles. The run is not recoverable; the outer driver decides whether to
/// break into a debugger or just report.
#[derive(Debug, Error, Clone)]
#[error(
    "command {op} stuck at the head of its bank queue: address {addr}, \
     queued at cycle {queued_at}, last issue mark {issue_cycle}, now {now}"
)]
pub struct Deadlocked {
    pub op: OpType,
    pub addr: MemAddr,
    pub queued_at: Cycle,
    pub issue_cycle: Cycle,
    pub now: Cycle,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerStats {
    pub simulation_cycles: Cycle,
    pub accepted_transactions: u64,
    pub completed_transactions: u64,
    pub issued_activates: u64,
    pub issued_precharges: u64,
    pub issued_reads: u64,
    pub issued_writes: u64,
    pub issued_refreshes: u64,
    pub refresh_pulses: u64,
    pub power_downs: u64,
    pub power_ups: u64,
}

pub struct MemoryController<C: MemChannel> {
    config: Arc<MemConfig>,
    pub channel: C,
    translator: AddressTranslator,
    events: EventQueue<Request>,
    txn_queues: Vec<Vec<Request>>,
    bank_queues: Vec<VecDeque<Request>>,
    sched: SchedState,
    refresh: Option<RefreshState>,
    rank_power_down: Vec<bool>,
    power_down_op: OpType,
    cur_rank: usize,
    cur_bank: usize,
    completions: VecDeque<Request>,
    stats: ControllerStats,
}

impl<C: MemChannel> MemoryController<C> {
    pub fn new(config: Arc<MemConfig>, mut channel: C) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut method = TranslationMethod::for_counts(
            config.rows,
            config.cols,
            config.banks,
            config.ranks,
            config.channels,
        );
        method.set_address_mapping_scheme(&config.address_mapping_scheme)?;
        let translator = AddressTranslator::new(method, config.mat_height_effective())?;
        let subarrays = translator.subarray_count();

        info!(
            "memory topology: {} rank(s) x {} bank(s) x {} row(s) x {} col(s), \
             {} sub-array(s) per bank, {} addressable bits",
            config.ranks,
            config.banks,
            config.rows,
            config.cols,
            subarrays,
            translator.address_bits()
        );

        let power_down_op = if config.use_low_power {
            config.power_down_op()?
        } else {
            OpType::PowerDownFast
        };

        let init_pd = config.use_low_power && config.init_pd;
        if init_pd {
            for rank in 0..config.ranks {
                channel.power_down(power_down_op, rank);
            }
        }

        let refresh = config.use_refresh.then(|| {
            RefreshState::new(
                config.ranks,
                config.banks,
                config.banks_per_refresh,
                config.delayed_refresh_threshold,
                config.trefi(),
            )
        });

        let mut me = Self {
            channel,
            translator,
            events: EventQueue::new(),
            txn_queues: vec![Vec::new()],
            bank_queues: vec![VecDeque::new(); config.ranks * config.banks],
            sched: SchedState::new(config.ranks, config.banks, subarrays, config.rows),
            refresh,
            rank_power_down: vec![init_pd; config.ranks],
            power_down_op,
            cur_rank: 0,
            cur_bank: 0,
            completions: VecDeque::new(),
            stats: ControllerStats::default(),
            config,
        };
        if me.config.use_refresh {
            me.seed_refresh_pulses();
        }
        Ok(me)
    }

    /// Replace the transaction queues with `num_queues` empty ones. Queue
    /// assignment is a policy concern; the default policy uses queue 0.
    pub fn init_queues(&mut self, num_queues: usize) {
        assert!(num_queues > 0, "at least one transaction queue is required");
        self.txn_queues = vec![Vec::new(); num_queues];
    }

    pub fn config(&self) -> &MemConfig {
        &self.config
    }

    pub fn translator(&self) -> &AddressTranslator {
        &self.translator
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    pub fn current_cycle(&self) -> Cycle {
        self.events.current_cycle()
    }

    pub fn queued_transactions(&self) -> usize {
        self.txn_queues.iter().map(Vec::len).sum()
    }

    /// Missed refresh pulses currently backlogged for (rank, group).
    pub fn pending_refreshes(&self, rank: usize, group: usize) -> usize {
        self.refresh.as_ref().map_or(0, |r| r.counter(rank, group))
    }

    pub fn is_bank_active(&self, rank: usize, bank: usize) -> bool {
        self.sched.activate_queued(rank, bank)
    }

    pub fn open_row(&self, rank: usize, bank: usize, subarray: usize) -> Option<usize> {
        self.sched.open_row(rank, bank, subarray)
    }

    pub fn is_rank_powered_down(&self, rank: usize) -> bool {
        self.rank_power_down[rank]
    }

    /// Accept a host transaction addressed by flat physical address.
    pub fn enqueue(&mut self, op: OpType, phys: u64) {
        self.enqueue_to(0, op, phys);
    }

    pub fn enqueue_to(&mut self, queue: usize, op: OpType, phys: u64) {
        debug_assert!(matches!(op, OpType::Read | OpType::Write));
        let now = self.events.current_cycle();
        let addr = self.translator.translate(phys);
        trace!("accepted {} for {}", op, addr);
        self.stats.accepted_transactions += 1;
        self.txn_queues[queue].push(Request::host(op, addr, now));
    }

    /// Completed host transactions, in completion order.
    pub fn pop_completed(&mut self) -> Option<Request> {
        self.completions.pop_front()
    }

    /// One simulator tick: deliver due pulses, pick a transaction, issue at
    /// most one device command, then advance the downstream model.
    pub fn tick_one(&mut self) -> Result<(), Deadlocked> {
        while let Some(pulse) = self.events.pop_due() {
            self.request_complete(pulse);
        }
        self.schedule_transactions();
        self.cycle_command_queues()?;
        let now = self.events.current_cycle();
        self.channel.tick(now);
        for done in self.channel.take_completions() {
            self.request_complete(done);
        }
        self.stats.simulation_cycles = now;
        self.events.advance(1);
        Ok(())
    }

    /// Route a completed request to its owner. Refresh pulses re-arm here;
    /// controller-generated commands end their life here; host transactions
    /// queue upstream.
    pub fn request_complete(&mut self, req: Request) {
        if req.op == OpType::Refresh {
            self.process_refresh_pulse(req);
        } else {
            match req.owner {
                Owner::Controller => {}
                Owner::Host => {
                    self.stats.completed_transactions += 1;
                    self.completions.push_back(req);
                }
            }
        }
    }

    // ---- request factories -------------------------------------------------

    fn make_activate_request(&self, trigger: &Request) -> Request {
        Request::controller(OpType::Activate, trigger.addr, self.events.current_cycle())
    }

    fn make_precharge_request(
        &self,
        row: usize,
        col: usize,
        bank: usize,
        rank: usize,
        subarray: usize,
    ) -> Request {
        let addr = self.translator.compose(row, col, bank, rank, 0, subarray);
        Request::controller(OpType::Precharge, addr, self.events.current_cycle())
    }

    fn make_precharge_all_request(
        &self,
        row: usize,
        col: usize,
        bank: usize,
        rank: usize,
        subarray: usize,
    ) -> Request {
        let addr = self.translator.compose(row, col, bank, rank, 0, subarray);
        Request::controller(OpType::PrechargeAll, addr, self.events.current_cycle())
    }

    fn make_refresh_request(
        &self,
        row: usize,
        col: usize,
        bank: usize,
        rank: usize,
        subarray: usize,
    ) -> Request {
        let addr = self.translator.compose(row, col, bank, rank, 0, subarray);
        Request::controller(OpType::Refresh, addr, self.events.current_cycle())
    }

    /// Fold the closing precharge into the trigger access in place. READ
    /// becomes READ_PRECHARGE and WRITE becomes WRITE_PRECHARGE; already
    /// folded types pass through unchanged.
    pub fn make_implicit_precharge_request(mut req: Request, now: Cycle) -> Request {
        req.op = match req.op {
            OpType::Read => OpType::ReadPrecharge,
            OpType::Write => OpType::WritePrecharge,
            other => other,
        };
        req.issue_cycle = now;
        req
    }

    // ---- selection primitives ---------------------------------------------

    fn mux_level(&self, col: usize) -> usize {
        col / self.config.rb_size
    }

    fn bank_queue(&self, rank: usize, bank: usize) -> &VecDeque<Request> {
        &self.bank_queues[rank * self.config.banks + bank]
    }

    fn refresh_gated(&self, rank: usize, bank: usize) -> bool {
        self.refresh
            .as_ref()
            .is_some_and(|r| r.bank_gated(rank, bank))
    }

    /// Relaxed close-page: the winner is "last" only when no other queued
    /// transaction still hits the same (rank, bank, row, sub-array).
    /// Restricted close-page closes unconditionally; open page never does.
    fn is_last_request(&self, queue: usize, req: &Request) -> bool {
        match self.config.close_page {
            0 => false,
            1 => !self.txn_queues[queue].iter().any(|other| {
                other.addr.rank == req.addr.rank
                    && other.addr.bank == req.addr.bank
                    && other.addr.row == req.addr.row
                    && other.addr.subarray == req.addr.subarray
            }),
            _ => true,
        }
    }

    fn take_selected(&mut self, queue: usize, index: usize) -> Request {
        let mut req = self.txn_queues[queue].remove(index);
        if self.is_last_request(queue, &req) {
            req.last_request = true;
        }
        req
    }

    /// First transaction whose row and mux subset are already at the sense
    /// amps of an active, un-gated bank with an empty command queue.
    pub fn find_row_buffer_hit(
        &mut self,
        queue: usize,
        mut pred: impl FnMut(&Request) -> bool,
    ) -> Option<Request> {
        let mut pick = None;
        for i in 0..self.txn_queues[queue].len() {
            let req = &self.txn_queues[queue][i];
            let a = req.addr;
            let mux = self.mux_level(a.col);
            if self.sched.activate_queued(a.rank, a.bank)
                && self.sched.row_hit(a.rank, a.bank, a.subarray, a.row, mux)
                && !self.refresh_gated(a.rank, a.bank)
                && self.bank_queue(a.rank, a.bank).is_empty()
                && pred(req)
            {
                pick = Some(i);
                break;
            }
        }
        Some(self.take_selected(queue, pick?))
    }

    /// First READ whose target sub-array is mid-write and which the
    /// downstream would accept right now, so the write can be paused in its
    /// favor. Only meaningful with `WritePausing` enabled.
    pub fn find_write_stalled_read(
        &mut self,
        queue: usize,
        mut pred: impl FnMut(&Request) -> bool,
    ) -> Option<Request> {
        if !self.config.write_pausing {
            return None;
        }
        let now = self.events.current_cycle();
        let mut pick = None;
        for i in 0..self.txn_queues[queue].len() {
            let req = &self.txn_queues[queue][i];
            if req.op != OpType::Read {
                continue;
            }
            let a = req.addr;
            let mux = self.mux_level(a.col);
            if self.sched.activate_queued(a.rank, a.bank)
                && self.sched.row_hit(a.rank, a.bank, a.subarray, a.row, mux)
                && !self.refresh_gated(a.rank, a.bank)
                && self.channel.subarray_state(&a).is_writing
                && self.channel.check_issue(req, now).is_ok()
                && pred(req)
            {
                pick = Some(i);
                break;
            }
        }
        Some(self.take_selected(queue, pick?))
    }

    /// First transaction on an active bank whose sub-array has absorbed
    /// `starvation_threshold` consecutive row hits since its last activate.
    pub fn find_starved_request(
        &mut self,
        queue: usize,
        mut pred: impl FnMut(&Request) -> bool,
    ) -> Option<Request> {
        let mut pick = None;
        for i in 0..self.txn_queues[queue].len() {
            let req = &self.txn_queues[queue][i];
            let a = req.addr;
            let mux = self.mux_level(a.col);
            if self.sched.activate_queued(a.rank, a.bank)
                && !self.sched.row_hit(a.rank, a.bank, a.subarray, a.row, mux)
                && !self.refresh_gated(a.rank, a.bank)
                && self.sched.starvation(a.rank, a.bank, a.subarray)
                    >= self.config.starvation_threshold
                && self.bank_queue(a.rank, a.bank).is_empty()
                && pred(req)
            {
                pick = Some(i);
                break;
            }
        }
        Some(self.take_selected(queue, pick?))
    }

    /// First transaction whose bank is active, un-gated and ready.
    pub fn find_oldest_ready_request(
        &mut self,
        queue: usize,
        mut pred: impl FnMut(&Request) -> bool,
    ) -> Option<Request> {
        let mut pick = None;
        for i in 0..self.txn_queues[queue].len() {
            let req = &self.txn_queues[queue][i];
            let a = req.addr;
            if self.sched.activate_queued(a.rank, a.bank)
                && !self.refresh_gated(a.rank, a.bank)
                && self.bank_queue(a.rank, a.bank).is_empty()
                && pred(req)
            {
                pick = Some(i);
                break;
            }
        }
        Some(self.take_selected(queue, pick?))
    }

    /// First transaction targeting a closed, un-gated, ready bank.
    pub fn find_closed_bank_request(
        &mut self,
        queue: usize,
        mut pred: impl FnMut(&Request) -> bool,
    ) -> Option<Request> {
        let mut pick = None;
        for i in 0..self.txn_queues[queue].len() {
            let req = &self.txn_queues[queue][i];
            let a = req.addr;
            if !self.sched.activate_queued(a.rank, a.bank)
                && !self.refresh_gated(a.rank, a.bank)
                && self.bank_queue(a.rank, a.bank).is_empty()
                && pred(req)
            {
                pick = Some(i);
                break;
            }
        }
        Some(self.take_selected(queue, pick?))
    }

    // Plural variants drain every match at once for reordering policies.
    // They never set the close-page marking.

    pub fn find_row_buffer_hits(
        &mut self,
        queue: usize,
        mut pred: impl FnMut(&Request) -> bool,
    ) -> Vec<Request> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < self.txn_queues[queue].len() {
            let matched = {
                let req = &self.txn_queues[queue][i];
                let a = req.addr;
                let mux = self.mux_level(a.col);
                self.sched.activate_queued(a.rank, a.bank)
                    && self.sched.row_hit(a.rank, a.bank, a.subarray, a.row, mux)
                    && !self.refresh_gated(a.rank, a.bank)
                    && self.bank_queue(a.rank, a.bank).is_empty()
                    && pred(req)
            };
            if matched {
                out.push(self.txn_queues[queue].remove(i));
            } else {
                i += 1;
            }
        }
        out
    }

    pub fn find_starved_requests(
        &mut self,
        queue: usize,
        mut pred: impl FnMut(&Request) -> bool,
    ) -> Vec<Request> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < self.txn_queues[queue].len() {
            let matched = {
                let req = &self.txn_queues[queue][i];
                let a = req.addr;
                let mux = self.mux_level(a.col);
                self.sched.activate_queued(a.rank, a.bank)
                    && !self.sched.row_hit(a.rank, a.bank, a.subarray, a.row, mux)
                    && !self.refresh_gated(a.rank, a.bank)
                    && self.sched.starvation(a.rank, a.bank, a.subarray)
                        >= self.config.starvation_threshold
                    && self.bank_queue(a.rank, a.bank).is_empty()
                    && pred(req)
            };
            if matched {
                out.push(self.txn_queues[queue].remove(i));
            } else {
                i += 1;
            }
        }
        out
    }

    pub fn find_oldest_ready_requests(
        &mut self,
        queue: usize,
        mut pred: impl FnMut(&Request) -> bool,
    ) -> Vec<Request> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < self.txn_queues[queue].len() {
            let matched = {
                let req = &self.txn_queues[queue][i];
                let a = req.addr;
                self.sched.activate_queued(a.rank, a.bank)
                    && !self.refresh_gated(a.rank, a.bank)
                    && self.bank_queue(a.rank, a.bank).is_empty()
                    && pred(req)
            };
            if matched {
                out.push(self.txn_queues[queue].remove(i));
            } else {
                i += 1;
            }
        }
        out
    }

    pub fn find_closed_bank_requests(
        &mut self,
        queue: usize,
        mut pred: impl FnMut(&Request) -> bool,
    ) -> Vec<Request> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < self.txn_queues[queue].len() {
            let matched = {
                let req = &self.txn_queues[queue][i];
                let a = req.addr;
                !self.sched.activate_queued(a.rank, a.bank)
                    && !self.refresh_gated(a.rank, a.bank)
                    && self.bank_queue(a.rank, a.bank).is_empty()
                    && pred(req)
            };
            if matched {
                out.push(self.txn_queues[queue].remove(i));
            } else {
                i += 1;
            }
        }
        out
    }

    // ---- transaction-to-command lowering ----------------------------------

    /// Default policy: write-stalled reads preempt, then starved sub-arrays,
    /// then row hits, then the oldest ready transaction, then closed banks.
    fn schedule_transactions(&mut self) {
        for queue in 0..self.txn_queues.len() {
            let mut picked = self.find_write_stalled_read(queue, |_| true);
            if picked.is_none() {
                picked = self.find_starved_request(queue, |_| true);
            }
            if picked.is_none() {
                picked = self.find_row_buffer_hit(queue, |_| true);
            }
            if picked.is_none() {
                picked = self.find_oldest_ready_request(queue, |_| true);
            }
            if picked.is_none() {
                picked = self.find_closed_bank_request(queue, |_| true);
            }
            if let Some(req) = picked {
                let issued = self.issue_memory_commands(req);
                debug_assert!(issued, "selected transaction no longer lowerable");
                return;
            }
        }
    }

    /// Lower one selected transaction into device commands on its bank
    /// queue. Assumes the selection primitives' conditions held; returns
    /// false if the bank state changed out from under the selection.
    pub fn issue_memory_commands(&mut self, req: Request) -> bool {
        let now = self.events.current_cycle();
        let a = req.addr;
        let mux = self.mux_level(a.col);
        let qidx = a.rank * self.config.banks + a.bank;

        if !self.sched.activate_queued(a.rank, a.bank) && self.bank_queues[qidx].is_empty() {
            // Closed bank: open the row, then access it.
            self.sched.set_activate_queued(a.rank, a.bank, true);
            self.sched.open_subarray(a.rank, a.bank, a.subarray, a.row, mux);
            self.sched.reset_starvation(a.rank, a.bank, a.subarray);

            let mut req = req;
            req.issue_cycle = now;
            let activate = self.make_activate_request(&req);
            self.bank_queues[qidx].push_back(activate);

            if req.last_request {
                let folded = Self::make_implicit_precharge_request(req, now);
                self.bank_queues[qidx].push_back(folded);
                self.sched.close_subarray(a.rank, a.bank, a.subarray);
                self.sched.set_activate_queued(a.rank, a.bank, false);
            } else {
                self.bank_queues[qidx].push_back(req);
            }
            true
        } else if self.sched.activate_queued(a.rank, a.bank)
            && !self.sched.row_hit(a.rank, a.bank, a.subarray, a.row, mux)
            && self.bank_queues[qidx].is_empty()
        {
            // Active bank, wrong row, sub-array or mux subset: close the
            // stale row if one is open, then activate the wanted one.
            self.sched.reset_starvation(a.rank, a.bank, a.subarray);

            let mut req = req;
            req.issue_cycle = now;
            if self.sched.subarray_open(a.rank, a.bank, a.subarray) {
                let stale_row = self.sched.effective_row(a.rank, a.bank, a.subarray);
                let precharge =
                    self.make_precharge_request(stale_row, 0, a.bank, a.rank, a.subarray);
                self.bank_queues[qidx].push_back(precharge);
            }
            let activate = self.make_activate_request(&req);
            self.bank_queues[qidx].push_back(activate);
            self.bank_queues[qidx].push_back(req);
            self.sched.open_subarray(a.rank, a.bank, a.subarray, a.row, mux);
            true
        } else if self.sched.activate_queued(a.rank, a.bank)
            && self.sched.row_hit(a.rank, a.bank, a.subarray, a.row, mux)
        {
            // Row-buffer hit.
            self.sched.bump_starvation(a.rank, a.bank, a.subarray);

            let mut req = req;
            req.issue_cycle = now;
            if req.last_request {
                // Restricted close-page never leaves a row open to hit.
                assert!(
                    self.config.close_page != 2,
                    "row-buffer hit under restricted close-page"
                );
                let folded = Self::make_implicit_precharge_request(req, now);
                self.bank_queues[qidx].push_back(folded);
                self.sched.close_subarray(a.rank, a.bank, a.subarray);
                if !self.sched.any_subarray_open(a.rank, a.bank) {
                    self.sched.set_activate_queued(a.rank, a.bank, false);
                }
            } else {
                self.bank_queues[qidx].push_back(req);
            }
            true
        } else {
            false
        }
    }

    // ---- per-tick issue loop ----------------------------------------------

    /// Issue at most one device command this tick: refresh first, then the
    /// first issuable per-bank queue head in round-robin order.
    pub fn cycle_command_queues(&mut self) -> Result<(), Deadlocked> {
        let now = self.events.current_cycle();

        if self.config.use_low_power {
            self.handle_low_power();
        }
        if self.config.use_refresh && self.handle_refresh() {
            return Ok(());
        }

        let ranks = self.config.ranks;
        let banks = self.config.banks;
        for rank_idx in 0..ranks {
            let i = (self.cur_rank + rank_idx) % ranks;
            for bank_idx in 0..banks {
                let j = (self.cur_bank + bank_idx) % banks;
                let qidx = i * banks + j;
                let Some(head) = self.bank_queues[qidx].front() else {
                    continue;
                };
                if self.channel.check_issue(head, now).is_ok() {
                    let mut cmd = self.bank_queues[qidx].pop_front().expect("head just checked");
                    debug!("issuing {} for {}", cmd.op, cmd.addr);
                    cmd.issue_cycle = now;
                    self.note_issue(cmd.op);
                    self.channel.issue_command(cmd, now);
                    self.move_rank_bank();
                    return Ok(());
                }
                if now.saturating_sub(head.issue_cycle) > self.config.deadlock_timer {
                    let dead = Deadlocked {
                        op: head.op,
                        addr: head.addr,
                        queued_at: head.arrival_cycle,
                        issue_cycle: head.issue_cycle,
                        now,
                    };
                    error!("{dead}");
                    return Err(dead);
                }
            }
        }
        Ok(())
    }

    /// All command queues in the rank are drained.
    pub fn rank_queue_empty(&self, rank: usize) -> bool {
        (0..self.config.banks).all(|b| self.bank_queue(rank, b).is_empty())
    }

    /// Advance the round-robin scan start per the configured scheme:
    /// 0 fixed, 1 rank-first, 2 bank-first.
    fn move_rank_bank(&mut self) {
        match self.config.schedule_scheme {
            1 => {
                self.cur_rank += 1;
                if self.cur_rank == self.config.ranks {
                    self.cur_rank = 0;
                    self.cur_bank = (self.cur_bank + 1) % self.config.banks;
                }
            }
            2 => {
                self.cur_bank += 1;
                if self.cur_bank == self.config.banks {
                    self.cur_bank = 0;
                    self.cur_rank = (self.cur_rank + 1) % self.config.ranks;
                }
            }
            _ => {}
        }
    }

    fn note_issue(&mut self, op: OpType) {
        match op {
            OpType::Activate => self.stats.issued_activates += 1,
            OpType::Precharge | OpType::PrechargeAll => self.stats.issued_precharges += 1,
            OpType::Read | OpType::ReadPrecharge => self.stats.issued_reads += 1,
            OpType::Write | OpType::WritePrecharge => self.stats.issued_writes += 1,
            OpType::Refresh => self.stats.issued_refreshes += 1,
            _ => {}
        }
        // Implicit precharges count on both sides.
        if matches!(op, OpType::ReadPrecharge | OpType::WritePrecharge) {
            self.stats.issued_precharges += 1;
        }
    }

    // ---- refresh engine ---------------------------------------------------

    /// One staggered pulse per (rank, bank group); each pulse re-arms itself
    /// every tREFI, so the event queue acts as the refresh countdown timer.
    fn seed_refresh_pulses(&mut self) {
        let (groups, banks_per_refresh, trefi) = {
            let r = self.refresh.as_ref().expect("refresh state missing");
            (r.group_count(), r.banks_per_refresh(), r.trefi())
        };
        let slice = trefi / (self.config.ranks * groups) as u64;
        let now = self.events.current_cycle();
        for rank in 0..self.config.ranks {
            for group in 0..groups {
                let head_bank = group * banks_per_refresh;
                let pulse = self.make_refresh_request(0, 0, head_bank, rank, 0);
                let offset = (rank * groups + group) as u64 * slice;
                self.events.insert(now + trefi + offset, pulse);
            }
        }
    }

    /// Count the missed refresh, gate the group once the backlog crosses the
    /// threshold, and re-arm the pulse one tREFI out.
    pub fn process_refresh_pulse(&mut self, pulse: Request) {
        debug_assert_eq!(pulse.op, OpType::Refresh);
        let (rank, bank) = (pulse.addr.rank, pulse.addr.bank);
        self.stats.refresh_pulses += 1;
        let trefi = {
            let r = self.refresh.as_mut().expect("refresh pulse while refresh is disabled");
            r.increment_counter(bank, rank);
            if r.need_refresh(bank, rank) {
                trace!("rank {} bank group of bank {} now gated for refresh", rank, bank);
                r.set_refresh(bank, rank);
            }
            r.trefi()
        };
        let at = self.events.current_cycle() + trefi;
        self.events.insert(at, pulse);
    }

    /// Try to issue one REFRESH. Groups are scanned round-robin; a group
    /// whose banks are not yet drainable gets its active banks precharged
    /// instead, and the refresh retries on a later tick.
    fn handle_refresh(&mut self) -> bool {
        let now = self.events.current_cycle();
        let Some((groups, banks_per_refresh, next_rank, next_bank)) = self
            .refresh
            .as_ref()
            .map(|r| (r.group_count(), r.banks_per_refresh(), r.next_rank, r.next_bank))
        else {
            return false;
        };
        let ranks = self.config.ranks;
        let banks = self.config.banks;

        for rank_idx in 0..ranks {
            let i = (next_rank + rank_idx) % ranks;
            for group_idx in 0..groups {
                let j = (next_bank + group_idx * banks_per_refresh) % banks;
                let need = self.refresh.as_ref().is_some_and(|r| r.need_refresh(j, i));
                if !need || !self.is_refresh_bank_queue_empty(j, i) {
                    continue;
                }

                let cmd_refresh = self.make_refresh_request(0, 0, j, i, 0);
                if self.channel.check_issue(&cmd_refresh, now).is_err() {
                    // Close every active bank in the group so the refresh can
                    // go out once the precharges land. Modulo allows an odd
                    // number of banks per refresh.
                    for offset in 0..banks_per_refresh {
                        let ref_bank = (j + offset) % banks;
                        if self.sched.activate_queued(i, ref_bank)
                            && self.bank_queue(i, ref_bank).is_empty()
                        {
                            let pre_all =
                                self.make_precharge_all_request(0, 0, ref_bank, i, 0);
                            self.bank_queues[i * banks + ref_bank].push_back(pre_all);
                            self.sched.close_bank(i, ref_bank);
                        }
                    }
                    continue;
                }

                debug!("issuing {} for rank {} bank group at bank {}", cmd_refresh.op, i, j);
                self.note_issue(cmd_refresh.op);
                self.channel.issue_command(cmd_refresh, now);

                let r = self.refresh.as_mut().expect("refresh state missing");
                r.decrement_counter(j, i);
                if !r.need_refresh(j, i) {
                    r.reset_refresh(j, i);
                }
                r.next_bank += banks_per_refresh;
                if r.next_bank >= banks {
                    r.next_bank = 0;
                    r.next_rank = (r.next_rank + 1) % ranks;
                }
                return true;
            }
        }
        false
    }

    /// All banks in the refresh group containing `bank` have drained their
    /// command queues.
    pub fn is_refresh_bank_queue_empty(&self, bank: usize, rank: usize) -> bool {
        let Some(banks_per_refresh) = self.refresh.as_ref().map(|r| r.banks_per_refresh()) else {
            return true;
        };
        let head = (bank / banks_per_refresh) * banks_per_refresh;
        (0..banks_per_refresh).all(|i| self.bank_queue(rank, head + i).is_empty())
    }

    // ---- low-power manager ------------------------------------------------

    /// Ranks with a refresh backlog are woken; otherwise idle ranks drift
    /// down and ranks with queued work come back up.
    fn handle_low_power(&mut self) {
        for rank in 0..self.config.ranks {
            let need_refresh = self.refresh.as_ref().is_some_and(|r| {
                (0..r.group_count()).any(|g| r.need_refresh(g * r.banks_per_refresh(), rank))
            });
            if need_refresh {
                if self.rank_power_down[rank] && self.channel.can_power_up(rank) {
                    self.channel.power_up(rank);
                    self.rank_power_down[rank] = false;
                    self.stats.power_ups += 1;
                }
            } else if self.rank_power_down[rank] {
                self.power_up(rank);
            } else {
                self.power_down(rank);
            }
        }
    }

    pub fn power_down(&mut self, rank: usize) {
        let op = if self.channel.is_rank_idle(rank) {
            self.power_down_op
        } else {
            // Some bank still holds an open row; only active powerdown fits.
            OpType::PowerDownActive
        };
        if self.channel.can_power_down(op, rank) && self.rank_queue_empty(rank) {
            debug!("rank {} powering down ({})", rank, op);
            self.channel.power_down(op, rank);
            self.rank_power_down[rank] = true;
            self.stats.power_downs += 1;
        }
    }

    pub fn power_up(&mut self, rank: usize) {
        if !self.rank_queue_empty(rank) && self.channel.can_power_up(rank) {
            debug!("rank {} powering up", rank);
            self.channel.power_up(rank);
            self.rank_power_down[rank] = false;
            self.stats.power_ups += 1;
        }
    }
}
