//! Session state machine
//!
//! Pure transitions over [`LockSession`]. Each takes the current session and
//! the time explicitly and returns the next session; none of them touch the
//! store or the clock. A rejected transition leaves the caller's session as
//! it was.

use ckos_api::{
    Credential, KeyPurpose, LockSession, ModeConfig, OperationalState, RejectReason,
    IDENTICON_SEED_MAX, LONG_LOCK_CONFIRMATION_SECONDS, MAX_BREAK_DURATION_MINUTES,
    MAX_CUSTOM_DURATION_SECONDS, MAX_GAMES, MIN_CUSTOM_DURATION_SECONDS, PIN_LENGTH,
    SERVICE_ID_MAX_LEN,
};

use crate::{
    accept_rolling_key, validate_credential, AlarmOutcome, BreakOutcome, CompletedSession,
    ConfigViolation, CredentialContext, EngineError, EngineResult, KeyDerivation,
};

/// Everything a rolling key check needs from the engine
#[derive(Clone, Copy)]
pub struct KeyCheck<'a> {
    pub window: u32,
    pub keys: &'a dyn KeyDerivation,
}

fn require(
    session: &LockSession,
    command: &'static str,
    allowed: &[OperationalState],
) -> EngineResult<()> {
    if allowed.contains(&session.operational_state) {
        Ok(())
    } else {
        Err(EngineError::transition(command, session.operational_state))
    }
}

/// Type-specific configuration rules
pub fn validate_mode_config(config: &ModeConfig, confirmed: bool) -> Result<(), ConfigViolation> {
    match config {
        ModeConfig::None => Err(ConfigViolation::NoLockType),
        ModeConfig::Agent(_) => Ok(()),
        ModeConfig::Custom(custom) => {
            let duration = custom.duration_seconds;
            if !(MIN_CUSTOM_DURATION_SECONDS..=MAX_CUSTOM_DURATION_SECONDS).contains(&duration) {
                return Err(ConfigViolation::DurationOutOfRange {
                    value: duration,
                    min: MIN_CUSTOM_DURATION_SECONDS,
                    max: MAX_CUSTOM_DURATION_SECONDS,
                });
            }
            if duration > LONG_LOCK_CONFIRMATION_SECONDS && !confirmed {
                return Err(ConfigViolation::ConfirmationRequired);
            }
            if custom.num_games() > MAX_GAMES {
                return Err(ConfigViolation::TooManyGames {
                    count: custom.num_games(),
                    max: MAX_GAMES,
                });
            }
            Ok(())
        }
        ModeConfig::KeyholderBasic(basic) => {
            if basic.pin_length() == PIN_LENGTH && basic.pin.bytes().all(|b| b.is_ascii_digit()) {
                Ok(())
            } else {
                Err(ConfigViolation::PinFormat {
                    expected: PIN_LENGTH,
                })
            }
        }
        ModeConfig::KeyholderRemote(remote) => {
            let len = remote.service_id.len();
            if len == 0 || len > SERVICE_ID_MAX_LEN {
                return Err(ConfigViolation::ServiceIdLength {
                    len,
                    max: SERVICE_ID_MAX_LEN,
                });
            }
            if remote.identicon_seed > IDENTICON_SEED_MAX {
                return Err(ConfigViolation::IdenticonSeed(remote.identicon_seed));
            }
            validate_break_minutes(remote.break_duration_minutes)
        }
    }
}

fn validate_break_minutes(minutes: u16) -> Result<(), ConfigViolation> {
    if minutes > MAX_BREAK_DURATION_MINUTES {
        Err(ConfigViolation::BreakDuration {
            value: minutes,
            max: MAX_BREAK_DURATION_MINUTES,
        })
    } else {
        Ok(())
    }
}

/// Choose a lock type. Re-configuring replaces the previous choice.
pub fn configure(
    session: &LockSession,
    config: ModeConfig,
    confirmed: bool,
) -> EngineResult<LockSession> {
    require(
        session,
        "configure",
        &[OperationalState::Unlocked, OperationalState::Configuring],
    )?;
    validate_mode_config(&config, confirmed)?;

    Ok(LockSession {
        operational_state: OperationalState::Configuring,
        mode_config: config,
        ..LockSession::default()
    })
}

pub fn cancel_configuration(session: &LockSession) -> EngineResult<LockSession> {
    require(
        session,
        "cancel_configuration",
        &[OperationalState::Configuring, OperationalState::AwaitingDoorClose],
    )?;
    Ok(LockSession::default())
}

pub fn finalize(session: &LockSession) -> EngineResult<LockSession> {
    require(session, "finalize", &[OperationalState::Configuring])?;
    Ok(LockSession {
        operational_state: OperationalState::AwaitingDoorClose,
        ..session.clone()
    })
}

/// Door closed: the session starts now
pub fn initiate(session: &LockSession, now_utc: u32) -> EngineResult<LockSession> {
    require(session, "initiate", &[OperationalState::AwaitingDoorClose])?;

    // lock_start_utc == 0 is reserved for "never locked"
    let start = now_utc.max(1);
    let unlock_target_utc = session
        .mode_config
        .fixed_duration_seconds()
        .map_or(0, |duration| start.saturating_add(duration));

    Ok(LockSession {
        operational_state: OperationalState::Locked,
        mode_config: session.mode_config.clone(),
        lock_start_utc: start,
        unlock_target_utc,
        session_accumulated_seconds: 0,
        accrual_baseline_utc: start,
        break_start_utc: 0,
        break_allowed_seconds: 0,
    })
}

/// Credit served time up to `now_utc`. Only a `Locked` session accrues.
pub fn accrue(session: &LockSession, now_utc: u32) -> LockSession {
    let mut next = session.clone();
    if session.operational_state == OperationalState::Locked {
        credit_since_baseline(&mut next, now_utc);
    }
    next
}

fn credit_since_baseline(session: &mut LockSession, now_utc: u32) {
    let from = session.accrual_baseline_utc.max(session.lock_start_utc);
    if now_utc > from {
        session.session_accumulated_seconds = session
            .session_accumulated_seconds
            .saturating_add(now_utc - from);
    }
    session.accrual_baseline_utc = from.max(now_utc);
}

/// Served seconds as of `now_utc` without mutating anything
pub fn live_accumulated_seconds(session: &LockSession, now_utc: u32) -> u32 {
    accrue(session, now_utc).session_accumulated_seconds
}

/// Present a credential to end the session; success moves to `PendingUnlock`
pub fn attempt_unlock(
    session: &LockSession,
    now_utc: u32,
    credential: &Credential,
    check: KeyCheck<'_>,
) -> EngineResult<LockSession> {
    require(session, "attempt_unlock", &[OperationalState::Locked])?;

    let mut next = accrue(session, now_utc);
    let ctx = CredentialContext {
        now_utc,
        unlock_target_utc: session.unlock_target_utc,
        window: check.window,
        keys: check.keys,
    };
    validate_credential(&mut next.mode_config, credential, &ctx)
        .map_err(EngineError::CredentialRejected)?;

    next.operational_state = OperationalState::PendingUnlock;
    Ok(next)
}

/// Actuator reported failure (or never answered): back to `Locked`
pub fn abort_unlock(session: &LockSession, command: &'static str) -> EngineResult<LockSession> {
    require(session, command, &[OperationalState::PendingUnlock])?;
    Ok(LockSession {
        operational_state: OperationalState::Locked,
        ..session.clone()
    })
}

/// Physical unlock confirmed: close the session and report what it served
pub fn complete_unlock(
    session: &LockSession,
    now_utc: u32,
) -> EngineResult<(LockSession, CompletedSession)> {
    require(session, "complete_unlock", &[OperationalState::PendingUnlock])?;

    let mut closing = session.clone();
    credit_since_baseline(&mut closing, now_utc);

    let completed = CompletedSession {
        bucket: closing.mode_config.counter_bucket(),
        served_seconds: closing.session_accumulated_seconds,
    };
    Ok((LockSession::default(), completed))
}

pub fn start_break(
    session: &LockSession,
    now_utc: u32,
    allowed_seconds: u16,
) -> EngineResult<LockSession> {
    require(session, "start_break", &[OperationalState::Locked])?;

    let mut next = accrue(session, now_utc);
    next.operational_state = OperationalState::BreakActive;
    next.break_start_utc = now_utc;
    next.break_allowed_seconds = allowed_seconds;
    Ok(next)
}

/// A cleaning break authorized by the remote keyholder's cleaning key
pub fn start_cleaning_break(
    session: &LockSession,
    now_utc: u32,
    key: &str,
    check: KeyCheck<'_>,
) -> EngineResult<LockSession> {
    require(session, "start_cleaning_break", &[OperationalState::Locked])?;

    let mut next = session.clone();
    let ModeConfig::KeyholderRemote(remote) = &mut next.mode_config else {
        return Err(EngineError::CredentialRejected(RejectReason::WrongCredential));
    };
    accept_rolling_key(remote, KeyPurpose::Cleaning, key, check.window, check.keys)
        .map_err(EngineError::CredentialRejected)?;
    let allowed = remote.break_duration_seconds();

    start_break(&next, now_utc, allowed)
}

pub fn end_break(session: &LockSession, now_utc: u32) -> EngineResult<(LockSession, BreakOutcome)> {
    require(session, "end_break", &[OperationalState::BreakActive])?;

    let elapsed = now_utc.saturating_sub(session.break_start_utc);
    let allowed = session.break_allowed_seconds;
    let overdue = elapsed > u32::from(allowed);

    let mut next = session.clone();
    next.operational_state = OperationalState::Locked;
    if overdue {
        next.session_accumulated_seconds = 0;
    }
    if next.is_timed() {
        next.unlock_target_utc = next.unlock_target_utc.saturating_add(elapsed);
    }
    // Accrual resumes from the end of the break
    next.accrual_baseline_utc = now_utc.max(session.accrual_baseline_utc);
    next.break_start_utc = 0;
    next.break_allowed_seconds = 0;

    let outcome = if overdue {
        BreakOutcome::Overdue {
            elapsed_seconds: elapsed,
            allowed_seconds: allowed,
        }
    } else {
        BreakOutcome::OnTime {
            elapsed_seconds: elapsed,
        }
    };
    Ok((next, outcome))
}

/// Move a timed target by a signed delta, never before the session start
pub fn adjust_unlock_target(session: &LockSession, delta_seconds: i64) -> EngineResult<LockSession> {
    require(
        session,
        "adjust_unlock_target",
        &[OperationalState::Locked, OperationalState::BreakActive],
    )?;
    if !session.is_timed() {
        return Err(EngineError::transition(
            "adjust_unlock_target",
            session.operational_state,
        ));
    }

    let target = i64::from(session.unlock_target_utc).saturating_add(delta_seconds);
    let clamped = target.clamp(i64::from(session.lock_start_utc), i64::from(u32::MAX));

    Ok(LockSession {
        // clamped is within u32 bounds
        unlock_target_utc: clamped as u32,
        ..session.clone()
    })
}

/// Remote keyholder changes the break duration with a config key
pub fn update_remote_break_duration(
    session: &LockSession,
    key: &str,
    minutes: u16,
    check: KeyCheck<'_>,
) -> EngineResult<LockSession> {
    require(
        session,
        "update_remote_break_duration",
        &[OperationalState::Locked, OperationalState::BreakActive],
    )?;
    validate_break_minutes(minutes)?;

    let mut next = session.clone();
    let ModeConfig::KeyholderRemote(remote) = &mut next.mode_config else {
        return Err(EngineError::CredentialRejected(RejectReason::WrongCredential));
    };
    accept_rolling_key(remote, KeyPurpose::Config, key, check.window, check.keys)
        .map_err(EngineError::CredentialRejected)?;
    remote.break_duration_minutes = minutes;
    Ok(next)
}

/// Consume a remote key without acting on it; returns the new stored index
pub fn redeem_remote_key(
    session: &LockSession,
    purpose: KeyPurpose,
    key: &str,
    check: KeyCheck<'_>,
) -> EngineResult<(LockSession, u32)> {
    require(
        session,
        "redeem_remote_key",
        &[
            OperationalState::Locked,
            OperationalState::PendingUnlock,
            OperationalState::BreakActive,
        ],
    )?;

    let mut next = session.clone();
    let ModeConfig::KeyholderRemote(remote) = &mut next.mode_config else {
        return Err(EngineError::CredentialRejected(RejectReason::WrongCredential));
    };
    let index = accept_rolling_key(remote, purpose, key, check.window, check.keys)
        .map_err(EngineError::CredentialRejected)?;
    Ok((next, index))
}

/// Classify a wake alarm against the session
pub fn alarm_outcome(session: &LockSession, now_utc: u32) -> AlarmOutcome {
    match session.operational_state {
        OperationalState::BreakActive => match session.break_deadline_utc() {
            Some(deadline) if now_utc >= deadline => AlarmOutcome::BreakExpired,
            _ => AlarmOutcome::Spurious,
        },
        OperationalState::Locked | OperationalState::PendingUnlock
            if session.is_timed() && now_utc >= session.unlock_target_utc =>
        {
            AlarmOutcome::TargetReached
        }
        _ => AlarmOutcome::Spurious,
    }
}

/// Unrecoverable fault: park the session in `Error`
pub fn fault(session: &LockSession) -> LockSession {
    LockSession {
        operational_state: OperationalState::Error,
        ..session.clone()
    }
}

pub fn operator_reset(session: &LockSession) -> EngineResult<LockSession> {
    require(session, "operator_reset", &[OperationalState::Error])?;
    Ok(LockSession::default())
}
