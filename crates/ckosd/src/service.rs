//! Request dispatch and timer handling

use ckos_api::{
    Command, ErrorCode, ErrorInfo, Event, EventPayload, LockSession, OperationalState, Request,
    Response, ResponsePayload, API_VERSION,
};
use ckos_config::ControlSettings;
use ckos_core::{AlarmOutcome, BootReport, BreakOutcome, EngineError, EngineResult, LockEngine};
use ckos_store::HistoryEvent;
use ckos_util::AttemptLimiter;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Why a command was not carried out
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Too many rejected credentials, retry in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u32 },

    #[error("Unsupported API version {0}")]
    UnsupportedVersion(u32),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CommandError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CommandError::Engine(EngineError::InvalidConfig(_)) => ErrorCode::InvalidConfig,
            CommandError::Engine(EngineError::InvalidStateTransition { .. }) => {
                ErrorCode::InvalidStateTransition
            }
            CommandError::Engine(EngineError::CredentialRejected(_)) => {
                ErrorCode::CredentialRejected
            }
            CommandError::Engine(EngineError::Integrity(_)) => ErrorCode::IntegrityError,
            CommandError::Engine(EngineError::Persist(_)) => ErrorCode::StorageError,
            CommandError::RateLimited { .. } => ErrorCode::RateLimited,
            CommandError::UnsupportedVersion(_) => ErrorCode::InvalidRequest,
            CommandError::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo::new(self.code(), self.to_string())
    }
}

/// The service state behind the control loop
pub struct Service {
    engine: LockEngine,
    limiter: AttemptLimiter,
    pending_unlock_timeout_seconds: u32,
    /// When the current PendingUnlock began, as seen by this process
    pending_since_utc: Option<u32>,
}

impl Service {
    /// Wrap a booted engine. Returns the events to announce at startup.
    pub fn start(
        engine: LockEngine,
        control: &ControlSettings,
        report: &BootReport,
    ) -> (Self, Vec<Event>) {
        let limiter = AttemptLimiter::new(control.max_unlock_attempts, control.attempt_window_seconds);
        let timeout = u32::try_from(control.pending_unlock_timeout.as_secs()).unwrap_or(u32::MAX);

        let service = Self {
            engine,
            limiter,
            pending_unlock_timeout_seconds: timeout,
            pending_since_utc: None,
        };
        service.engine.record_event(HistoryEvent::ServiceStarted);

        let mut events = Vec::new();
        if report.integrity_reset() {
            events.push(service.event(EventPayload::ConfigurationReset {
                session: report.session_reset,
                counters: report.counters_reset,
            }));
        }
        events.push(service.state_changed());

        info!(
            state = ?service.engine.session().operational_state,
            alarm = ?report.alarm_utc,
            "Service started"
        );
        (service, events)
    }

    pub fn engine(&self) -> &LockEngine {
        &self.engine
    }

    /// Handle one request; returns the response and any events it caused
    pub fn handle_request(&mut self, request: Request) -> (Response, Vec<Event>) {
        let request_id = request.request_id;
        let mut events = Vec::new();

        let result = if request.api_version != API_VERSION {
            Err(CommandError::UnsupportedVersion(request.api_version))
        } else {
            let before = self.engine.session().clone();
            let result = self.dispatch(request.command, &mut events);
            if self.engine.session() != &before {
                events.push(self.state_changed());
            }
            result
        };

        let response = match result {
            Ok(payload) => Response::success(request_id, payload),
            Err(e) => {
                if let CommandError::Engine(EngineError::Persist(store_error)) = &e {
                    events.push(self.event(EventPayload::StorageError {
                        message: store_error.to_string(),
                    }));
                }
                debug!(request_id, error = %e, "Request failed");
                Response::error(request_id, e.to_error_info())
            }
        };

        (response, events)
    }

    fn dispatch(
        &mut self,
        command: Command,
        events: &mut Vec<Event>,
    ) -> Result<ResponsePayload, CommandError> {
        let payload = match command {
            Command::GetStatus => ResponsePayload::Status(self.engine.status()),

            Command::GetCounters => ResponsePayload::Counters(self.engine.counters()),

            Command::GetHistory { limit } => {
                let entries = self
                    .engine
                    .recent_history(limit)?
                    .iter()
                    .map(serde_json::to_value)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| CommandError::Internal(e.to_string()))?;
                ResponsePayload::History { entries }
            }

            Command::Configure { config, confirmed } => {
                self.engine.configure(config, confirmed)?;
                ResponsePayload::Configured
            }

            Command::CancelConfiguration => {
                self.engine.cancel_configuration()?;
                ResponsePayload::ConfigurationCancelled
            }

            Command::Finalize => {
                self.engine.finalize()?;
                ResponsePayload::AwaitingDoorClose
            }

            Command::DoorClosed => {
                self.engine.on_door_closed()?;
                ResponsePayload::Locked {
                    unlock_target_utc: target_of(self.engine.session()),
                }
            }

            Command::AttemptUnlock { credential } => {
                self.throttled(|engine| engine.attempt_unlock(&credential))?;
                let now = self.engine.now_utc();
                self.limiter.reset(now);
                self.pending_since_utc = Some(now);
                events.push(self.event(EventPayload::ActuateUnlock));
                ResponsePayload::UnlockRequested
            }

            Command::UnlockConfirmed => {
                let completed = self.engine.on_unlock_confirmed()?;
                self.pending_since_utc = None;
                events.push(self.event(EventPayload::SessionCompleted {
                    bucket: completed.bucket,
                    served_seconds: completed.served_seconds,
                }));
                ResponsePayload::Unlocked {
                    bucket: completed.bucket,
                    served_seconds: completed.served_seconds,
                }
            }

            Command::UnlockFailed => {
                self.engine.on_unlock_failed()?;
                self.pending_since_utc = None;
                ResponsePayload::UnlockAborted
            }

            Command::StartBreak { allowed_seconds } => {
                self.engine.start_break(allowed_seconds)?;
                self.break_started()
            }

            Command::StartCleaningBreak { key } => {
                self.throttled(|engine| engine.start_cleaning_break(&key))?;
                self.break_started()
            }

            Command::EndBreak => {
                let outcome = self.engine.end_break()?;
                if let BreakOutcome::Overdue {
                    elapsed_seconds,
                    allowed_seconds,
                } = outcome
                {
                    events.push(self.event(EventPayload::BreakOverdue {
                        elapsed_seconds,
                        allowed_seconds,
                    }));
                }
                ResponsePayload::BreakEnded {
                    elapsed_seconds: outcome.elapsed_seconds(),
                    overdue: outcome.is_overdue(),
                    unlock_target_utc: target_of(self.engine.session()),
                }
            }

            Command::AdjustTarget { delta_seconds } => ResponsePayload::TargetAdjusted {
                unlock_target_utc: self.engine.adjust_unlock_target(delta_seconds)?,
            },

            Command::UpdateRemoteBreak { key, minutes } => {
                self.throttled(|engine| engine.update_remote_break_duration(&key, minutes))?;
                ResponsePayload::Configured
            }

            Command::RedeemRemoteKey { purpose, key } => ResponsePayload::KeyAccepted {
                purpose,
                next_index: self.throttled(|engine| engine.redeem_remote_key(purpose, &key))?,
            },

            Command::Fault { reason } => {
                self.engine.fault(&reason)?;
                self.pending_since_utc = None;
                ResponsePayload::Faulted
            }

            Command::OperatorReset => {
                self.engine.operator_reset()?;
                self.pending_since_utc = None;
                ResponsePayload::Reset
            }

            Command::FactoryReset => {
                self.engine.factory_reset()?;
                self.pending_since_utc = None;
                let now = self.engine.now_utc();
                self.limiter.reset(now);
                ResponsePayload::Reset
            }

            Command::Ping => ResponsePayload::Pong,
        };

        Ok(payload)
    }

    /// Run a credential-bearing engine call under the attempt limiter.
    /// Only rejected credentials count against the budget.
    fn throttled<T>(
        &mut self,
        op: impl FnOnce(&mut LockEngine) -> EngineResult<T>,
    ) -> Result<T, CommandError> {
        let now = self.engine.now_utc();
        if !self.limiter.allows(now) {
            let retry_after_seconds = self.limiter.retry_after(now);
            warn!(retry_after_seconds, "Credential attempt throttled");
            return Err(CommandError::RateLimited {
                retry_after_seconds,
            });
        }

        match op(&mut self.engine) {
            Err(e @ EngineError::CredentialRejected(_)) => {
                self.limiter.record_failure(now);
                Err(e.into())
            }
            result => Ok(result?),
        }
    }

    fn break_started(&self) -> ResponsePayload {
        ResponsePayload::BreakStarted {
            deadline_utc: self
                .engine
                .session()
                .break_deadline_utc()
                .unwrap_or_default(),
        }
    }

    /// Periodic accrual
    pub fn on_tick(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        if let Err(e) = self.engine.tick() {
            self.report_failure(&mut events, "tick", &e);
        }
        events
    }

    /// Give up on an unlock the hardware never confirmed
    pub fn check_unlock_timeout(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        if self.engine.session().operational_state != OperationalState::PendingUnlock {
            self.pending_since_utc = None;
            return events;
        }

        let now = self.engine.now_utc();
        // A session restored in PendingUnlock gets a fresh timeout from boot
        let since = *self.pending_since_utc.get_or_insert(now);
        if now.saturating_sub(since) < self.pending_unlock_timeout_seconds {
            return events;
        }

        match self.engine.unlock_timed_out() {
            Ok(()) => {
                self.pending_since_utc = None;
                events.push(self.event(EventPayload::UnlockTimedOut));
                events.push(self.state_changed());
            }
            Err(e) => self.report_failure(&mut events, "unlock_timed_out", &e),
        }
        events
    }

    /// The clock's wake alarm went off
    pub fn on_alarm(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        match self.engine.on_alarm_fired() {
            Ok(AlarmOutcome::TargetReached) => {
                events.push(self.event(EventPayload::TargetReached));
                events.push(self.state_changed());
            }
            Ok(AlarmOutcome::BreakExpired) => {
                events.push(self.event(EventPayload::BreakExpired));
            }
            Ok(AlarmOutcome::Spurious) => {}
            Err(e) => self.report_failure(&mut events, "on_alarm_fired", &e),
        }
        events
    }

    /// Final accrual before exit
    pub fn shutdown(&mut self) -> Vec<Event> {
        let mut events = self.on_tick();
        self.engine.record_event(HistoryEvent::ServiceStopped);
        events.push(self.event(EventPayload::Shutdown));
        info!("Service stopped");
        events
    }

    fn report_failure(&self, events: &mut Vec<Event>, operation: &str, e: &EngineError) {
        error!(operation, error = %e, "Engine operation failed");
        if let EngineError::Persist(store_error) = e {
            events.push(self.event(EventPayload::StorageError {
                message: store_error.to_string(),
            }));
        }
    }

    fn event(&self, payload: EventPayload) -> Event {
        Event::new(self.engine.now_utc(), payload)
    }

    fn state_changed(&self) -> Event {
        self.event(EventPayload::StateChanged(self.engine.status()))
    }
}

fn target_of(session: &LockSession) -> Option<u32> {
    session.is_timed().then_some(session.unlock_target_utc)
}
