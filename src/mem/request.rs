use crate::mem::addr::MemAddr;
use crate::sim::event_queue::Cycle;
use std::fmt::{self, Display, Formatter};

/// Device-level command kinds plus the host transaction types they are
/// lowered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    Read,
    Write,
    Activate,
    Precharge,
    PrechargeAll,
    ReadPrecharge,
    WritePrecharge,
    Refresh,
    PowerDownFast,
    PowerDownSlow,
    PowerDownActive,
    PowerUp,
}

impl OpType {
    pub fn is_column_access(self) -> bool {
        matches!(
            self,
            Self::Read | Self::Write | Self::ReadPrecharge | Self::WritePrecharge
        )
    }

    pub fn is_write(self) -> bool {
        matches!(self, Self::Write | Self::WritePrecharge)
    }

    pub fn is_power_down(self) -> bool {
        matches!(
            self,
            Self::PowerDownFast | Self::PowerDownSlow | Self::PowerDownActive
        )
    }

    pub fn closes_row(self) -> bool {
        matches!(
            self,
            Self::Precharge | Self::PrechargeAll | Self::ReadPrecharge | Self::WritePrecharge
        )
    }
}

impl Display for OpType {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        let name = match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::Activate => "ACTIVATE",
            Self::Precharge => "PRECHARGE",
            Self::PrechargeAll => "PRECHARGE_ALL",
            Self::ReadPrecharge => "READ_PRECHARGE",
            Self::WritePrecharge => "WRITE_PRECHARGE",
            Self::Refresh => "REFRESH",
            Self::PowerDownFast => "POWERDOWN_PDPF",
            Self::PowerDownSlow => "POWERDOWN_PDPS",
            Self::PowerDownActive => "POWERDOWN_PDA",
            Self::PowerUp => "POWERUP",
        };
        fmt.write_str(name)
    }
}

/// Who is responsible for the request once it completes. Controller-generated
/// commands end their life at the controller; host transactions are handed
/// back upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Host,
    Controller,
}

/// One transaction or device command moving through the controller. The
/// address and type are fixed at creation except for the in-place implicit
/// precharge mutation.
#[derive(Debug, Clone)]
pub struct Request {
    pub op: OpType,
    pub addr: MemAddr,
    pub arrival_cycle: Cycle,
    pub issue_cycle: Cycle,
    pub owner: Owner,
    /// Close-page marking: close the row after this access completes.
    pub last_request: bool,
}

impl Request {
    pub fn host(op: OpType, addr: MemAddr, now: Cycle) -> Self {
        Self {
            op,
            addr,
            arrival_cycle: now,
            issue_cycle: now,
            owner: Owner::Host,
            last_request: false,
        }
    }

    pub fn controller(op: OpType, addr: MemAddr, now: Cycle) -> Self {
        Self {
            op,
            addr,
            arrival_cycle: now,
            issue_cycle: now,
            owner: Owner::Controller,
            last_request: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{OpType, Owner, Request};
    use crate::mem::addr::MemAddr;

    #[test]
    fn op_classes() {
        assert!(OpType::ReadPrecharge.is_column_access());
        assert!(OpType::ReadPrecharge.closes_row());
        assert!(!OpType::Activate.is_column_access());
        assert!(OpType::PowerDownActive.is_power_down());
        assert!(!OpType::PowerUp.is_power_down());
        assert!(OpType::WritePrecharge.is_write());
        assert!(!OpType::Read.is_write());
    }

    #[test]
    fn factories_set_owner_and_cycles() {
        let addr = MemAddr::default();
        let host = Request::host(OpType::Read, addr, 7);
        assert_eq!(host.owner, Owner::Host);
        assert_eq!(host.arrival_cycle, 7);
        assert_eq!(host.issue_cycle, 7);
        assert!(!host.last_request);
        let cmd = Request::controller(OpType::Activate, addr, 9);
        assert_eq!(cmd.owner, Owner::Controller);
        assert_eq!(cmd.issue_cycle, 9);
    }
}
