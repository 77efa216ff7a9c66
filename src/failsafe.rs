// SPDX-License-Identifier: MPL-2.0

//! The failsafe watchdog's deadline state machine.
//!
//! The machine has two states: *disarmed* (no callback, or a zero period)
//! and *armed*. While armed, [`Failsafe::fire_due`] reports the callback
//! once per elapsed period. Firing never disarms; a persistently stalled
//! main loop keeps the callback firing at its period, never faster.
//!
//! This is pure bookkeeping. The timer worker supplies the clock and invokes
//! the callback outside the lock that guards this state, so a slow failsafe
//! handler can't wedge registration.

use crate::Proc;

pub(crate) struct Failsafe {
    proc: Option<Proc>,
    period_us: u64,
    deadline_us: u64,
}

impl Failsafe {
    pub(crate) const fn new() -> Self {
        Self {
            proc: None,
            period_us: 0,
            deadline_us: 0,
        }
    }

    /// Arm with `proc` and a period, resetting the deadline from `now_us`.
    ///
    /// A zero period disarms; that's the only disarm path.
    pub(crate) fn arm(&mut self, proc: Proc, period_us: u32, now_us: u64) {
        if period_us == 0 {
            self.proc = None;
            self.period_us = 0;
            return;
        }
        self.proc = Some(proc);
        self.period_us = u64::from(period_us);
        self.deadline_us = now_us + self.period_us;
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.proc.is_some()
    }

    /// If the deadline has passed, advance it and return the callback to run.
    ///
    /// The new deadline is one period from *now*, not from the old deadline.
    /// After a long stall this fires once and resynchronizes, rather than
    /// bursting through the backlog of missed periods.
    pub(crate) fn fire_due(&mut self, now_us: u64) -> Option<Proc> {
        let proc = self.proc?;
        if now_us < self.deadline_us {
            return None;
        }
        self.deadline_us = now_us + self.period_us;
        Some(proc)
    }
}

#[cfg(test)]
mod tests {
    use super::Failsafe;

    fn noop() {}

    #[test]
    fn disarmed_never_fires() {
        let mut failsafe = Failsafe::new();
        assert!(!failsafe.is_armed());
        assert!(failsafe.fire_due(u64::MAX).is_none());
    }

    #[test]
    fn fires_once_per_elapsed_period() {
        let mut failsafe = Failsafe::new();
        failsafe.arm(noop, 1_000, 0);
        assert!(failsafe.is_armed());

        // Not due before the first period elapses.
        assert!(failsafe.fire_due(500).is_none());
        assert!(failsafe.fire_due(999).is_none());

        // Due at the deadline; then quiet until a full period later.
        assert!(failsafe.fire_due(1_000).is_some());
        assert!(failsafe.fire_due(1_001).is_none());
        assert!(failsafe.fire_due(1_999).is_none());
        assert!(failsafe.fire_due(2_000).is_some());
    }

    #[test]
    fn long_stall_resynchronizes_instead_of_bursting() {
        let mut failsafe = Failsafe::new();
        failsafe.arm(noop, 1_000, 0);

        // Ten periods go by unserviced. One firing, then the regular cadence
        // resumes relative to the stall's end.
        assert!(failsafe.fire_due(10_000).is_some());
        assert!(failsafe.fire_due(10_500).is_none());
        assert!(failsafe.fire_due(11_000).is_some());
    }

    #[test]
    fn rearming_resets_the_deadline() {
        let mut failsafe = Failsafe::new();
        failsafe.arm(noop, 1_000, 0);
        failsafe.arm(noop, 2_000, 500);

        assert!(failsafe.fire_due(1_500).is_none());
        assert!(failsafe.fire_due(2_500).is_some());
    }

    #[test]
    fn zero_period_disarms() {
        let mut failsafe = Failsafe::new();
        failsafe.arm(noop, 1_000, 0);
        failsafe.arm(noop, 0, 0);
        assert!(!failsafe.is_armed());
        assert!(failsafe.fire_due(u64::MAX).is_none());
    }
}
