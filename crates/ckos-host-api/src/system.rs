//! Wall-clock implementation of the clock collaborator

use std::sync::Mutex;
use tracing::debug;

use crate::{ClockResult, ClockSource};

/// System clock with a software alarm slot.
///
/// The control loop polls [`SystemClock::take_due_alarm`] on every tick; an
/// RTC-backed implementation would instead raise a wake interrupt.
#[derive(Debug, Default)]
pub struct SystemClock {
    alarm: Mutex<Option<u32>>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop the alarm if it is due at `now_utc`
    pub fn take_due_alarm(&self, now_utc: u32) -> Option<u32> {
        let mut alarm = self.alarm.lock().unwrap_or_else(|e| e.into_inner());
        match *alarm {
            Some(at) if at <= now_utc => alarm.take(),
            _ => None,
        }
    }
}

impl ClockSource for SystemClock {
    fn now_utc(&self) -> u32 {
        ckos_util::now_utc()
    }

    fn schedule_alarm(&self, utc_seconds: u32) -> ClockResult<()> {
        let mut alarm = self.alarm.lock().unwrap_or_else(|e| e.into_inner());
        *alarm = Some(utc_seconds);
        debug!(alarm_utc = utc_seconds, "Alarm scheduled");
        Ok(())
    }

    fn cancel_alarm(&self) -> ClockResult<()> {
        let mut alarm = self.alarm.lock().unwrap_or_else(|e| e.into_inner());
        if alarm.take().is_some() {
            debug!("Alarm cancelled");
        }
        Ok(())
    }

    fn pending_alarm(&self) -> Option<u32> {
        *self.alarm.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reschedule_replaces_pending_alarm() {
        let clock = SystemClock::new();
        clock.schedule_alarm(100).unwrap();
        clock.schedule_alarm(200).unwrap();
        assert_eq!(clock.pending_alarm(), Some(200));
    }

    #[test]
    fn take_due_alarm_only_when_due() {
        let clock = SystemClock::new();
        clock.schedule_alarm(500).unwrap();

        assert_eq!(clock.take_due_alarm(499), None);
        assert_eq!(clock.take_due_alarm(500), Some(500));
        assert_eq!(clock.take_due_alarm(600), None);
    }

    #[test]
    fn cancel_clears_alarm() {
        let clock = SystemClock::new();
        clock.schedule_alarm(500).unwrap();
        clock.cancel_alarm().unwrap();
        assert_eq!(clock.pending_alarm(), None);
    }
}
