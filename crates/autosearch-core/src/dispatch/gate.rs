//! Concurrency and rate gate
//!
//! Tracks which triggers are in flight and when the last one was dispatched.
//! A dispatch is allowed only below the concurrency limit and after the
//! minimum interval since the previous dispatch.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

/// Whether the next backlog item may go now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Admit,
    /// Every slot is taken; a completion will reopen the gate
    AtCapacity,
    /// Rate limited; retry after this long
    Wait(Duration),
}

#[derive(Debug, Default)]
pub struct ConcurrencyGate {
    in_flight: HashSet<Uuid>,
    last_dispatch_at: Option<Instant>,
    total_dispatched: u64,
}

impl ConcurrencyGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, now: Instant, max_concurrent: usize, min_interval: Duration) -> GateDecision {
        if self.in_flight.len() >= max_concurrent {
            return GateDecision::AtCapacity;
        }
        if let Some(last) = self.last_dispatch_at {
            let since = now.saturating_duration_since(last);
            if since < min_interval {
                return GateDecision::Wait(min_interval - since);
            }
        }
        GateDecision::Admit
    }

    /// Occupy a slot for a trigger
    pub fn dispatch(&mut self, trigger_id: Uuid, now: Instant) {
        self.in_flight.insert(trigger_id);
        self.last_dispatch_at = Some(now);
        self.total_dispatched += 1;
    }

    /// Free a trigger's slot; false if it was not in flight
    pub fn release(&mut self, trigger_id: Uuid) -> bool {
        self.in_flight.remove(&trigger_id)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, trigger_id: &Uuid) -> bool {
        self.in_flight.contains(trigger_id)
    }

    pub fn last_dispatch_at(&self) -> Option<Instant> {
        self.last_dispatch_at
    }

    pub fn total_dispatched(&self) -> u64 {
        self.total_dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(1000);

    #[test]
    fn test_first_dispatch_is_admitted() {
        let gate = ConcurrencyGate::new();
        assert_eq!(gate.check(Instant::now(), 3, INTERVAL), GateDecision::Admit);
    }

    #[test]
    fn test_rate_limit_reports_remaining_wait() {
        let mut gate = ConcurrencyGate::new();
        let start = Instant::now();
        gate.dispatch(Uuid::new_v4(), start);

        let decision = gate.check(start + Duration::from_millis(400), 3, INTERVAL);
        assert_eq!(decision, GateDecision::Wait(Duration::from_millis(600)));

        let decision = gate.check(start + INTERVAL, 3, INTERVAL);
        assert_eq!(decision, GateDecision::Admit);
    }

    #[test]
    fn test_capacity_checked_before_rate() {
        let mut gate = ConcurrencyGate::new();
        let start = Instant::now();
        let ids: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            gate.dispatch(*id, start);
        }

        assert_eq!(gate.check(start, 2, INTERVAL), GateDecision::AtCapacity);
        assert!(gate.release(ids[0]));
        assert!(!gate.release(ids[0]));
        assert_eq!(gate.in_flight(), 1);
        assert!(matches!(gate.check(start, 2, INTERVAL), GateDecision::Wait(_)));
        assert_eq!(gate.total_dispatched(), 2);
    }

    #[test]
    fn test_zero_interval_never_waits() {
        let mut gate = ConcurrencyGate::new();
        let now = Instant::now();
        gate.dispatch(Uuid::new_v4(), now);
        assert_eq!(gate.check(now, 3, Duration::ZERO), GateDecision::Admit);
        assert_eq!(gate.last_dispatch_at(), Some(now));
    }
}
