use crate::sim::event_queue::Cycle;

/// Per-(rank, bank, sub-array) scheduling bookkeeping. Runtime-sized
/// dimensions are flattened into single buffers indexed
/// `(rank * banks + bank) * subarrays + subarray`.
#[derive(Debug)]
pub struct SchedState {
    banks: usize,
    subarrays: usize,
    /// Sentinel row index meaning "closed" (one past the last valid row).
    row_sentinel: usize,
    activate_queued: Vec<bool>,
    active_subarray: Vec<bool>,
    effective_row: Vec<usize>,
    effective_muxed_row: Vec<usize>,
    starvation_counter: Vec<usize>,
}

impl SchedState {
    pub fn new(ranks: usize, banks: usize, subarrays: usize, rows: usize) -> Self {
        let bank_cells = ranks * banks;
        let sub_cells = bank_cells * subarrays;
        Self {
            banks,
            subarrays,
            row_sentinel: rows,
            activate_queued: vec![false; bank_cells],
            active_subarray: vec![false; sub_cells],
            effective_row: vec![rows; sub_cells],
            effective_muxed_row: vec![rows; sub_cells],
            starvation_counter: vec![0; sub_cells],
        }
    }

    fn bank_idx(&self, rank: usize, bank: usize) -> usize {
        rank * self.banks + bank
    }

    fn sub_idx(&self, rank: usize, bank: usize, subarray: usize) -> usize {
        (rank * self.banks + bank) * self.subarrays + subarray
    }

    pub fn subarrays(&self) -> usize {
        self.subarrays
    }

    pub fn activate_queued(&self, rank: usize, bank: usize) -> bool {
        self.activate_queued[self.bank_idx(rank, bank)]
    }

    pub fn set_activate_queued(&mut self, rank: usize, bank: usize, queued: bool) {
        let idx = self.bank_idx(rank, bank);
        self.activate_queued[idx] = queued;
    }

    pub fn subarray_open(&self, rank: usize, bank: usize, subarray: usize) -> bool {
        let idx = self.sub_idx(rank, bank, subarray);
        debug_assert_eq!(
            self.active_subarray[idx],
            self.effective_row[idx] != self.row_sentinel,
            "open flag and effective row disagree"
        );
        self.active_subarray[idx]
    }

    pub fn effective_row(&self, rank: usize, bank: usize, subarray: usize) -> usize {
        self.effective_row[self.sub_idx(rank, bank, subarray)]
    }

    pub fn effective_muxed_row(&self, rank: usize, bank: usize, subarray: usize) -> usize {
        self.effective_muxed_row[self.sub_idx(rank, bank, subarray)]
    }

    /// The open row, or None when the sub-array is closed.
    pub fn open_row(&self, rank: usize, bank: usize, subarray: usize) -> Option<usize> {
        let row = self.effective_row(rank, bank, subarray);
        (row != self.row_sentinel).then_some(row)
    }

    /// Row hit: sub-array open with both the row and the mux subset matching.
    pub fn row_hit(&self, rank: usize, bank: usize, subarray: usize, row: usize, mux: usize) -> bool {
        self.subarray_open(rank, bank, subarray)
            && self.effective_row(rank, bank, subarray) == row
            && self.effective_muxed_row(rank, bank, subarray) == mux
    }

    pub fn open_subarray(&mut self, rank: usize, bank: usize, subarray: usize, row: usize, mux: usize) {
        debug_assert!(row < self.row_sentinel);
        let idx = self.sub_idx(rank, bank, subarray);
        self.active_subarray[idx] = true;
        self.effective_row[idx] = row;
        self.effective_muxed_row[idx] = mux;
    }

    pub fn close_subarray(&mut self, rank: usize, bank: usize, subarray: usize) {
        let idx = self.sub_idx(rank, bank, subarray);
        self.active_subarray[idx] = false;
        self.effective_row[idx] = self.row_sentinel;
        self.effective_muxed_row[idx] = self.row_sentinel;
    }

    /// Close every sub-array in the bank and clear its activate marker.
    pub fn close_bank(&mut self, rank: usize, bank: usize) {
        for subarray in 0..self.subarrays {
            self.close_subarray(rank, bank, subarray);
        }
        self.set_activate_queued(rank, bank, false);
    }

    pub fn any_subarray_open(&self, rank: usize, bank: usize) -> bool {
        (0..self.subarrays).any(|s| self.active_subarray[self.sub_idx(rank, bank, s)])
    }

    pub fn starvation(&self, rank: usize, bank: usize, subarray: usize) -> usize {
        self.starvation_counter[self.sub_idx(rank, bank, subarray)]
    }

    pub fn reset_starvation(&mut self, rank: usize, bank: usize, subarray: usize) {
        let idx = self.sub_idx(rank, bank, subarray);
        self.starvation_counter[idx] = 0;
    }

    pub fn bump_starvation(&mut self, rank: usize, bank: usize, subarray: usize) {
        let idx = self.sub_idx(rank, bank, subarray);
        self.starvation_counter[idx] += 1;
    }
}

/// Delayed-refresh bookkeeping per (rank, bank group). A group whose counter
/// reaches the threshold gates new activates on all of its banks until the
/// backlog drains.
#[derive(Debug)]
pub struct RefreshState {
    banks: usize,
    banks_per_refresh: usize,
    group_count: usize,
    threshold: usize,
    trefi: Cycle,
    delayed_counter: Vec<usize>,
    bank_need_refresh: Vec<bool>,
    pub next_rank: usize,
    pub next_bank: usize,
}

impl RefreshState {
    pub fn new(
        ranks: usize,
        banks: usize,
        banks_per_refresh: usize,
        threshold: usize,
        trefi: Cycle,
    ) -> Self {
        debug_assert!(banks_per_refresh > 0 && banks_per_refresh <= banks);
        let group_count = banks / banks_per_refresh;
        Self {
            banks,
            banks_per_refresh,
            group_count,
            threshold,
            trefi,
            delayed_counter: vec![0; ranks * group_count],
            bank_need_refresh: vec![false; ranks * banks],
            next_rank: 0,
            next_bank: 0,
        }
    }

    pub fn trefi(&self) -> Cycle {
        self.trefi
    }

    pub fn group_count(&self) -> usize {
        self.group_count
    }

    pub fn banks_per_refresh(&self) -> usize {
        self.banks_per_refresh
    }

    fn group_idx(&self, rank: usize, bank: usize) -> usize {
        rank * self.group_count + bank / self.banks_per_refresh
    }

    pub fn counter(&self, rank: usize, group: usize) -> usize {
        self.delayed_counter[rank * self.group_count + group]
    }

    /// Whether the group containing `bank` has accumulated enough missed
    /// refreshes to demand service.
    pub fn need_refresh(&self, bank: usize, rank: usize) -> bool {
        self.delayed_counter[self.group_idx(rank, bank)] >= self.threshold
    }

    pub fn bank_gated(&self, rank: usize, bank: usize) -> bool {
        self.bank_need_refresh[rank * self.banks + bank]
    }

    /// Gate every bank in the group containing `bank`.
    pub fn set_refresh(&mut self, bank: usize, rank: usize) {
        let head = (bank / self.banks_per_refresh) * self.banks_per_refresh;
        for i in 0..self.banks_per_refresh {
            self.bank_need_refresh[rank * self.banks + head + i] = true;
        }
    }

    pub fn reset_refresh(&mut self, bank: usize, rank: usize) {
        let head = (bank / self.banks_per_refresh) * self.banks_per_refresh;
        for i in 0..self.banks_per_refresh {
            self.bank_need_refresh[rank * self.banks + head + i] = false;
        }
    }

    pub fn increment_counter(&mut self, bank: usize, rank: usize) {
        let idx = self.group_idx(rank, bank);
        self.delayed_counter[idx] += 1;
    }

    pub fn decrement_counter(&mut self, bank: usize, rank: usize) {
        let idx = self.group_idx(rank, bank);
        debug_assert!(self.delayed_counter[idx] > 0, "refresh counter underflow");
        self.delayed_counter[idx] -= 1;
    }
}
