//! Outcomes reported by the engine

use ckos_api::CounterBucket;

/// How a break ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakOutcome {
    OnTime {
        elapsed_seconds: u32,
    },
    /// Served time was reset to zero
    Overdue {
        elapsed_seconds: u32,
        allowed_seconds: u16,
    },
}

impl BreakOutcome {
    pub fn elapsed_seconds(&self) -> u32 {
        match self {
            BreakOutcome::OnTime { elapsed_seconds }
            | BreakOutcome::Overdue {
                elapsed_seconds, ..
            } => *elapsed_seconds,
        }
    }

    pub fn is_overdue(&self) -> bool {
        matches!(self, BreakOutcome::Overdue { .. })
    }
}

/// What a wake alarm meant when it fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmOutcome {
    /// The timed unlock target has been reached
    TargetReached,
    /// The active break ran out of allowance
    BreakExpired,
    /// Nothing is due (stale or early alarm)
    Spurious,
}

/// A session that ended with a confirmed physical unlock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedSession {
    /// `None` only if the session had no lock type
    pub bucket: Option<CounterBucket>,
    pub served_seconds: u32,
}

/// What happened while loading persisted state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootReport {
    /// The session blob failed verification and was reset
    pub session_reset: bool,
    /// The counters blob failed verification and was reset
    pub counters_reset: bool,
    /// Alarm requested for the restored session
    pub alarm_utc: Option<u32>,
}

impl BootReport {
    pub fn integrity_reset(&self) -> bool {
        self.session_reset || self.counters_reset
    }
}
