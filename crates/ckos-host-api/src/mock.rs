//! Mock clock for testing

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::{ClockError, ClockResult, ClockSource};

/// An alarm request as seen by the mock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmRequest {
    Schedule(u32),
    Cancel,
}

/// Settable clock that records every alarm request
#[derive(Debug, Clone)]
pub struct MockClock {
    now: Arc<AtomicU32>,
    alarm: Arc<Mutex<Option<u32>>>,
    requests: Arc<Mutex<Vec<AlarmRequest>>>,

    /// Configure alarm scheduling to fail
    pub fail_alarm: Arc<Mutex<bool>>,
}

impl MockClock {
    pub fn new(now_utc: u32) -> Self {
        Self {
            now: Arc::new(AtomicU32::new(now_utc)),
            alarm: Arc::new(Mutex::new(None)),
            requests: Arc::new(Mutex::new(Vec::new())),
            fail_alarm: Arc::new(Mutex::new(false)),
        }
    }

    /// Jump to an absolute time
    pub fn set(&self, now_utc: u32) {
        self.now.store(now_utc, Ordering::SeqCst);
    }

    /// Move time forward
    pub fn advance(&self, seconds: u32) {
        let now = self.now.load(Ordering::SeqCst);
        self.now.store(now.saturating_add(seconds), Ordering::SeqCst);
    }

    /// Every schedule/cancel request in order
    pub fn alarm_requests(&self) -> Vec<AlarmRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_fail_alarm(&self, fail: bool) {
        *self.fail_alarm.lock().unwrap_or_else(|e| e.into_inner()) = fail;
    }

    fn should_fail(&self) -> bool {
        *self.fail_alarm.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ClockSource for MockClock {
    fn now_utc(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }

    fn schedule_alarm(&self, utc_seconds: u32) -> ClockResult<()> {
        if self.should_fail() {
            return Err(ClockError::AlarmFailed("Mock alarm failure".into()));
        }
        *self.alarm.lock().unwrap_or_else(|e| e.into_inner()) = Some(utc_seconds);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(AlarmRequest::Schedule(utc_seconds));
        Ok(())
    }

    fn cancel_alarm(&self) -> ClockResult<()> {
        if self.should_fail() {
            return Err(ClockError::AlarmFailed("Mock alarm failure".into()));
        }
        *self.alarm.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(AlarmRequest::Cancel);
        Ok(())
    }

    fn pending_alarm(&self) -> Option<u32> {
        *self.alarm.lock().unwrap_or_else(|e| e.into_inner())
    }
}
