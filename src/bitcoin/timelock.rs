use super::{BlockHeight, ExpiredTimelocks, Timelocks, expired_timelocks};

/// Events derived from new chain-height observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelockEvent {
    /// The relative status changed; carries the new status.
    StatusChanged(ExpiredTimelocks),
    /// The cancel deadline was crossed.
    CancelExpired,
    /// The punish deadline was crossed.
    PunishExpired,
}

/// Tracks a swap's timelocks against chain-height observations and turns
/// them into edge-triggered events.
///
/// Each crossing fires exactly once, unless a reorg moves the remaining
/// block count back above zero again, in which case the crossing re-arms and
/// can fire a second time. Consumers treat crossings as advisory triggers:
/// a swap that already acted on an expiry never rolls back.
#[derive(Debug)]
pub struct TimelockMonitor {
    timelocks: Timelocks,
    last: Option<ExpiredTimelocks>,
    cancel_fired: bool,
    punish_fired: bool,
}

impl TimelockMonitor {
    pub fn new(timelocks: Timelocks) -> Self {
        Self {
            timelocks,
            last: None,
            cancel_fired: false,
            punish_fired: false,
        }
    }

    pub fn status(&self) -> Option<ExpiredTimelocks> {
        self.last
    }

    /// Feed one observation: the current tip and the height at which the
    /// lock transaction is confirmed (`None` while unconfirmed, including
    /// after a reorg evicted the confirming block).
    pub fn observe(
        &mut self,
        tip: BlockHeight,
        lock_height: Option<BlockHeight>,
    ) -> Vec<TimelockEvent> {
        let status = expired_timelocks(tip, lock_height, self.timelocks);
        let mut events = Vec::new();

        if self.last != Some(status) {
            self.last = Some(status);
            events.push(TimelockEvent::StatusChanged(status));
        }

        match status {
            ExpiredTimelocks::None { .. } => {
                // Reorg moved us back before the cancel deadline: re-arm.
                self.cancel_fired = false;
                self.punish_fired = false;
            }
            ExpiredTimelocks::Cancel { .. } => {
                if !self.cancel_fired {
                    self.cancel_fired = true;
                    events.push(TimelockEvent::CancelExpired);
                }
                self.punish_fired = false;
            }
            ExpiredTimelocks::Punish => {
                if !self.cancel_fired {
                    self.cancel_fired = true;
                    events.push(TimelockEvent::CancelExpired);
                }
                if !self.punish_fired {
                    self.punish_fired = true;
                    events.push(TimelockEvent::PunishExpired);
                }
            }
        }

        events
    }
}
