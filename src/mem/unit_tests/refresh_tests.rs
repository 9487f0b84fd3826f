use super::harness::{base_config, controller_with, phys, run_ticks};
use crate::mem::config::MemConfig;
use crate::mem::request::OpType;

fn refresh_config() -> MemConfig {
    // rows == refresh_rows makes tREFI equal tREFW, so pulse timing is easy
    // to reason about in the assertions below.
    MemConfig {
        use_refresh: true,
        banks_per_refresh: 1,
        refresh_rows: 64,
        rows: 64,
        trefw: 32,
        delayed_refresh_threshold: 1000,
        ..base_config()
    }
}

#[test]
fn refresh_pulses_are_exactly_periodic() {
    let mut c = controller_with(refresh_config());
    // First pulse lands at tREFI (offset 0 for the only rank/group), then
    // every tREFI after that.
    run_ticks(&mut c, 33);
    assert_eq!(c.pending_refreshes(0, 0), 1);
    run_ticks(&mut c, 32);
    assert_eq!(c.pending_refreshes(0, 0), 2);
    run_ticks(&mut c, 32);
    assert_eq!(c.pending_refreshes(0, 0), 3);
    assert_eq!(c.stats().refresh_pulses, 3);
}

#[test]
fn staggered_pulses_offset_by_refresh_slice() {
    let config = MemConfig {
        ranks: 2,
        banks: 2,
        use_refresh: true,
        banks_per_refresh: 1,
        refresh_rows: 64,
        rows: 64,
        trefw: 80,
        delayed_refresh_threshold: 1000,
        ..base_config()
    };
    // tREFI = 80, four (rank, group) pairs, slice = 20: pulses land at
    // 80, 100, 120, 140.
    let mut c = controller_with(config);
    run_ticks(&mut c, 81);
    assert_eq!(c.pending_refreshes(0, 0), 1);
    assert_eq!(c.pending_refreshes(0, 1), 0);
    run_ticks(&mut c, 20);
    assert_eq!(c.pending_refreshes(0, 1), 1);
    assert_eq!(c.pending_refreshes(1, 0), 0);
    run_ticks(&mut c, 20);
    assert_eq!(c.pending_refreshes(1, 0), 1);
    run_ticks(&mut c, 20);
    assert_eq!(c.pending_refreshes(1, 1), 1);
}

#[test]
fn refresh_takes_priority_and_drains_the_bank_first() {
    let config = MemConfig {
        banks: 2,
        use_refresh: true,
        banks_per_refresh: 1,
        refresh_rows: 64,
        rows: 64,
        trefw: 20,
        delayed_refresh_threshold: 1,
        close_page: 0,
        ..base_config()
    };
    let mut c = controller_with(config);
    c.channel.refuse_refresh_while_open = true;

    // Open a row in bank 0, then let the pulse at cycle 20 gate the group.
    c.enqueue(OpType::Read, phys(&c, 5, 0, 0, 0, 0));
    run_ticks(&mut c, 20);
    assert_eq!(c.open_row(0, 0, 0), Some(5));

    // A transaction arriving while the group is gated must not activate
    // until the refresh has gone out.
    c.enqueue(OpType::Read, phys(&c, 9, 0, 0, 0, 0));
    run_ticks(&mut c, 6);

    assert_eq!(
        c.channel.op_rows(),
        vec![
            (OpType::Activate, 5),
            (OpType::Read, 5),
            (OpType::PrechargeAll, 0),
            (OpType::Refresh, 0),
            (OpType::Activate, 9),
            (OpType::Read, 9),
        ]
    );
    assert_eq!(c.pending_refreshes(0, 0), 0);
    assert_eq!(c.stats().issued_refreshes, 1);
}

#[test]
fn gated_bank_rejects_new_activates_until_refresh_issues() {
    let config = MemConfig {
        use_refresh: true,
        banks_per_refresh: 1,
        refresh_rows: 64,
        rows: 64,
        trefw: 10,
        delayed_refresh_threshold: 1,
        close_page: 0,
        ..base_config()
    };
    let mut c = controller_with(config);
    c.channel.refuse_refresh_while_open = true;
    c.channel.refuse_ops.push(OpType::PrechargeAll);

    // Open a row, then hold the drain precharge hostage so the gate stays up.
    c.enqueue(OpType::Read, phys(&c, 3, 0, 0, 0, 0));
    run_ticks(&mut c, 11);
    c.enqueue(OpType::Read, phys(&c, 7, 0, 0, 0, 0));
    assert!(c.find_closed_bank_request(0, |_| true).is_none());
    assert!(c.find_oldest_ready_request(0, |_| true).is_none());

    // Releasing the precharge lets the refresh through and ungates the bank.
    c.channel.refuse_ops.clear();
    run_ticks(&mut c, 4);
    let ops = c.channel.ops();
    let refresh_at = ops.iter().position(|&op| op == OpType::Refresh);
    assert!(refresh_at.is_some(), "refresh never issued: {ops:?}");
    let last_activate = ops.iter().rposition(|&op| op == OpType::Activate);
    assert!(last_activate.unwrap() > refresh_at.unwrap());
}

#[test]
fn refresh_counter_decrements_once_per_issued_refresh() {
    let config = MemConfig {
        use_refresh: true,
        banks_per_refresh: 1,
        refresh_rows: 64,
        rows: 64,
        trefw: 16,
        delayed_refresh_threshold: 2,
        ..base_config()
    };
    let mut c = controller_with(config);
    // Pulses at 16 and 32; the threshold of two holds the refresh until the
    // second pulse, after which the backlog drains one per issued REFRESH.
    run_ticks(&mut c, 17);
    assert_eq!(c.pending_refreshes(0, 0), 1);
    assert_eq!(c.stats().issued_refreshes, 0);
    run_ticks(&mut c, 17);
    assert_eq!(c.stats().issued_refreshes, 1);
    assert_eq!(c.pending_refreshes(0, 0), 1);
}
