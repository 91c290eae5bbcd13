//! Lock session engine

use ckos_api::{
    Credential, KeyPurpose, LockSession, LockStatus, ModeConfig, RejectReason, TimeCounters,
};
use ckos_config::EngineSettings;
use ckos_host_api::ClockSource;
use ckos_store::{
    encode_counters, encode_session, load_counters, load_session, save_session, HistoryEntry,
    HistoryEvent, LoadError, PersistenceStore,
};
use ckos_util::format_duration;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::session::{self, KeyCheck};
use crate::{
    AlarmOutcome, BootReport, BreakOutcome, CompletedSession, ConfigViolation, EngineError,
    EngineResult, KeyDerivation,
};

/// Status projection of a session at `now_utc`
pub fn lock_status(session: &LockSession, now_utc: u32) -> LockStatus {
    LockStatus {
        lock_type: session.active_lock_type(),
        state: session.operational_state,
        lock_start_utc: (session.lock_start_utc != 0).then_some(session.lock_start_utc),
        unlock_target_utc: session.is_timed().then_some(session.unlock_target_utc),
        remaining_seconds: session.remaining_seconds(now_utc),
        accumulated_seconds: session::live_accumulated_seconds(session, now_utc),
        break_deadline_utc: session.break_deadline_utc(),
        identicon_seed: match &session.mode_config {
            ModeConfig::KeyholderRemote(remote) => Some(remote.identicon_seed),
            _ => None,
        },
    }
}

/// The lock session engine.
///
/// Owns the session and the lifetime counters. Every mutation is computed on
/// a copy, persisted, and only then becomes the engine's state, so a failed
/// write leaves the engine exactly as it was. Calls must be serialized by the
/// owner; the engine holds no locks of its own.
pub struct LockEngine {
    clock: Arc<dyn ClockSource>,
    store: Arc<dyn PersistenceStore>,
    keys: Arc<dyn KeyDerivation>,
    settings: EngineSettings,
    session: LockSession,
    counters: TimeCounters,
}

impl LockEngine {
    /// Load persisted state and start the engine.
    ///
    /// An aggregate that fails verification is replaced by its default and
    /// rewritten; the report says which ones were reset. A store that cannot
    /// be read at all is an error.
    pub fn boot(
        clock: Arc<dyn ClockSource>,
        store: Arc<dyn PersistenceStore>,
        keys: Arc<dyn KeyDerivation>,
        settings: EngineSettings,
    ) -> EngineResult<(Self, BootReport)> {
        let mut report = BootReport::default();

        let session = match load_session(store.as_ref(), &settings.session_key) {
            Ok(session) => session.unwrap_or_default(),
            Err(LoadError::Integrity(e)) => {
                error!(error = %e, "Lock session failed verification, resetting to unlocked");
                report.session_reset = true;
                LockSession::default()
            }
            Err(LoadError::Store(e)) => return Err(e.into()),
        };

        let counters = match load_counters(store.as_ref(), &settings.counters_key) {
            Ok(counters) => counters.unwrap_or_default(),
            Err(LoadError::Integrity(e)) => {
                error!(error = %e, "Time counters failed verification, resetting to zero");
                report.counters_reset = true;
                TimeCounters::default()
            }
            Err(LoadError::Store(e)) => return Err(e.into()),
        };

        let engine = Self {
            clock,
            store,
            keys,
            settings,
            session,
            counters,
        };

        if report.integrity_reset() {
            let session_blob = encode_session(&engine.session);
            let counters_blob = encode_counters(&engine.counters);
            let mut entries: Vec<(&str, &[u8])> = Vec::new();
            if report.session_reset {
                entries.push((engine.settings.session_key.as_str(), session_blob.as_slice()));
            }
            if report.counters_reset {
                entries.push((engine.settings.counters_key.as_str(), counters_blob.as_slice()));
            }
            engine.store.write_batch(&entries)?;

            engine.record(
                engine.clock.now_utc(),
                HistoryEvent::IntegrityReset {
                    session: report.session_reset,
                    counters: report.counters_reset,
                },
            );
        }

        report.alarm_utc = engine.sync_alarm();

        info!(
            lock_type = ?engine.session.active_lock_type(),
            state = ?engine.session.operational_state,
            total_served_seconds = engine.counters.total(),
            "Lock engine booted"
        );

        Ok((engine, report))
    }

    pub fn session(&self) -> &LockSession {
        &self.session
    }

    pub fn counters(&self) -> TimeCounters {
        self.counters
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn now_utc(&self) -> u32 {
        self.clock.now_utc()
    }

    /// Status snapshot at the current time
    pub fn status(&self) -> LockStatus {
        lock_status(&self.session, self.clock.now_utc())
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.session.remaining_seconds(self.clock.now_utc())
    }

    /// Served seconds including time since the last tick
    pub fn accumulated_seconds(&self) -> u32 {
        session::live_accumulated_seconds(&self.session, self.clock.now_utc())
    }

    /// Append an entry to the lock history at the current time
    pub fn record_event(&self, event: HistoryEvent) {
        self.record(self.clock.now_utc(), event);
    }

    pub fn recent_history(&self, limit: usize) -> EngineResult<Vec<HistoryEntry>> {
        Ok(self.store.recent_history(limit)?)
    }

    // Configuration

    pub fn configure(&mut self, config: ModeConfig, confirmed: bool) -> EngineResult<()> {
        let next = session::configure(&self.session, config, confirmed)?;
        if matches!(next.mode_config, ModeConfig::KeyholderRemote(_)) && !self.keys.is_provisioned()
        {
            warn!("Remote keyholder lock refused, no key derivation provisioned");
            return Err(ConfigViolation::RemoteKeysUnavailable.into());
        }
        self.commit(next)?;
        info!(lock_type = ?self.session.active_lock_type(), "Lock configured");
        Ok(())
    }

    pub fn cancel_configuration(&mut self) -> EngineResult<()> {
        let next = session::cancel_configuration(&self.session)?;
        self.commit(next)?;
        info!("Configuration cancelled");
        Ok(())
    }

    /// Configuration done; wait for the door to close
    pub fn finalize(&mut self) -> EngineResult<()> {
        let next = session::finalize(&self.session)?;
        self.commit(next)?;
        info!("Awaiting door close");
        Ok(())
    }

    // Session lifecycle

    /// Start the session now
    pub fn initiate(&mut self) -> EngineResult<()> {
        let now = self.clock.now_utc();
        let next = session::initiate(&self.session, now)?;
        self.commit(next)?;
        self.sync_alarm();

        let unlock_target_utc = self.session.is_timed().then_some(self.session.unlock_target_utc);
        self.record(
            now,
            HistoryEvent::SessionStarted {
                lock_type: self.session.active_lock_type(),
                unlock_target_utc,
            },
        );
        info!(
            lock_type = ?self.session.active_lock_type(),
            lock_start = self.session.lock_start_utc,
            target = ?unlock_target_utc,
            "Lock initiated"
        );
        Ok(())
    }

    /// Hardware reports the door closed
    pub fn on_door_closed(&mut self) -> EngineResult<()> {
        self.initiate()
    }

    /// Credit served time up to now
    pub fn tick(&mut self) -> EngineResult<()> {
        let now = self.clock.now_utc();
        self.accrue_to(now)
    }

    /// Present a credential. On success the caller must actuate the lock and
    /// report back through [`Self::on_unlock_confirmed`] or the failure path.
    pub fn attempt_unlock(&mut self, credential: &Credential) -> EngineResult<()> {
        let now = self.clock.now_utc();
        let check = self.key_check();

        match session::attempt_unlock(&self.session, now, credential, check) {
            Ok(next) => {
                self.commit(next)?;
                info!(
                    lock_type = ?self.session.active_lock_type(),
                    "Credential accepted, unlock requested"
                );
                Ok(())
            }
            Err(EngineError::CredentialRejected(reason)) => {
                self.reject(now, reason);
                Err(EngineError::CredentialRejected(reason))
            }
            Err(e) => Err(e),
        }
    }

    /// Physical unlock confirmed: credit the served time and reset the session
    pub fn complete_unlock(&mut self) -> EngineResult<CompletedSession> {
        let now = self.clock.now_utc();
        let lock_type = self.session.active_lock_type();
        let (next, completed) = session::complete_unlock(&self.session, now)?;

        let mut counters = self.counters;
        if let Some(bucket) = completed.bucket {
            counters.credit(bucket, u64::from(completed.served_seconds));
        }
        self.commit_with_counters(next, counters)?;
        self.sync_alarm();

        self.record(
            now,
            HistoryEvent::SessionCompleted {
                lock_type,
                bucket: completed.bucket,
                served_seconds: completed.served_seconds,
            },
        );
        info!(
            ?lock_type,
            bucket = ?completed.bucket,
            served_seconds = completed.served_seconds,
            served = %format_duration(u64::from(completed.served_seconds)),
            "Session completed"
        );
        Ok(completed)
    }

    pub fn on_unlock_confirmed(&mut self) -> EngineResult<CompletedSession> {
        self.complete_unlock()
    }

    /// Actuator reported failure
    pub fn on_unlock_failed(&mut self) -> EngineResult<()> {
        let next = session::abort_unlock(&self.session, "on_unlock_failed")?;
        self.commit(next)?;
        warn!("Actuator reported unlock failure, session stays locked");
        Ok(())
    }

    /// The caller's actuation timeout elapsed without confirmation
    pub fn unlock_timed_out(&mut self) -> EngineResult<()> {
        let next = session::abort_unlock(&self.session, "unlock_timed_out")?;
        self.commit(next)?;
        warn!("Unlock was never confirmed, session stays locked");
        Ok(())
    }

    // Breaks

    pub fn start_break(&mut self, allowed_seconds: u16) -> EngineResult<()> {
        let now = self.clock.now_utc();
        let next = session::start_break(&self.session, now, allowed_seconds)?;
        self.commit(next)?;
        self.sync_alarm();
        info!(allowed_seconds, "Break started");
        Ok(())
    }

    /// Break authorized by the remote keyholder's cleaning key
    pub fn start_cleaning_break(&mut self, key: &str) -> EngineResult<()> {
        let now = self.clock.now_utc();
        let check = self.key_check();

        match session::start_cleaning_break(&self.session, now, key, check) {
            Ok(next) => {
                self.commit(next)?;
                self.sync_alarm();
                info!(
                    allowed_seconds = self.session.break_allowed_seconds,
                    "Cleaning break started"
                );
                Ok(())
            }
            Err(EngineError::CredentialRejected(reason)) => {
                self.reject(now, reason);
                Err(EngineError::CredentialRejected(reason))
            }
            Err(e) => Err(e),
        }
    }

    pub fn end_break(&mut self) -> EngineResult<BreakOutcome> {
        let now = self.clock.now_utc();
        let (next, outcome) = session::end_break(&self.session, now)?;
        let allowed_seconds = self.session.break_allowed_seconds;
        self.commit(next)?;
        self.sync_alarm();

        self.record(
            now,
            HistoryEvent::BreakEnded {
                elapsed_seconds: outcome.elapsed_seconds(),
                allowed_seconds,
                overdue: outcome.is_overdue(),
            },
        );
        match outcome {
            BreakOutcome::OnTime { elapsed_seconds } => {
                info!(elapsed_seconds, "Break ended on time");
            }
            BreakOutcome::Overdue {
                elapsed_seconds,
                allowed_seconds,
            } => {
                warn!(
                    elapsed_seconds,
                    allowed_seconds, "Break overdue, served time reset"
                );
            }
        }
        Ok(outcome)
    }

    // Collaborator hooks

    /// Move the unlock target by a signed delta (mini-games, agent mood)
    pub fn adjust_unlock_target(&mut self, delta_seconds: i64) -> EngineResult<u32> {
        let now = self.clock.now_utc();
        let next = session::adjust_unlock_target(&self.session, delta_seconds)?;
        self.commit(next)?;
        self.sync_alarm();

        let target = self.session.unlock_target_utc;
        self.record(
            now,
            HistoryEvent::TargetAdjusted {
                delta_seconds,
                unlock_target_utc: target,
            },
        );
        info!(delta_seconds, target, "Unlock target adjusted");
        Ok(target)
    }

    /// Remote keyholder changes the break duration
    pub fn update_remote_break_duration(&mut self, key: &str, minutes: u16) -> EngineResult<()> {
        let now = self.clock.now_utc();
        let check = self.key_check();

        match session::update_remote_break_duration(&self.session, key, minutes, check) {
            Ok(next) => {
                self.commit(next)?;
                self.record(now, HistoryEvent::RemoteBreakUpdated { minutes });
                info!(minutes, "Remote break duration updated");
                Ok(())
            }
            Err(EngineError::CredentialRejected(reason)) => {
                self.reject(now, reason);
                Err(EngineError::CredentialRejected(reason))
            }
            Err(e) => Err(e),
        }
    }

    /// Consume a remote key so the device stays in step with the service
    pub fn redeem_remote_key(&mut self, purpose: KeyPurpose, key: &str) -> EngineResult<u32> {
        let now = self.clock.now_utc();
        let check = self.key_check();

        match session::redeem_remote_key(&self.session, purpose, key, check) {
            Ok((next, index)) => {
                self.commit(next)?;
                debug!(purpose = purpose.as_str(), next_index = index, "Remote key redeemed");
                Ok(index)
            }
            Err(EngineError::CredentialRejected(reason)) => {
                self.reject(now, reason);
                Err(EngineError::CredentialRejected(reason))
            }
            Err(e) => Err(e),
        }
    }

    /// The wake alarm fired
    pub fn on_alarm_fired(&mut self) -> EngineResult<AlarmOutcome> {
        let now = self.clock.now_utc();
        self.accrue_to(now)?;

        let outcome = session::alarm_outcome(&self.session, now);
        match outcome {
            AlarmOutcome::TargetReached => info!(now, "Unlock target reached"),
            AlarmOutcome::BreakExpired => warn!(now, "Break allowance used up"),
            AlarmOutcome::Spurious => {
                debug!(now, "Spurious alarm");
                self.sync_alarm();
            }
        }
        Ok(outcome)
    }

    // Faults and resets

    /// Unrecoverable fault: park in `Error` until an operator reset
    pub fn fault(&mut self, reason: &str) -> EngineResult<()> {
        let now = self.clock.now_utc();
        let next = session::fault(&self.session);
        self.commit(next)?;
        self.sync_alarm();
        self.record(
            now,
            HistoryEvent::Fault {
                reason: reason.to_string(),
            },
        );
        error!(reason, "Lock engine fault");
        Ok(())
    }

    pub fn operator_reset(&mut self) -> EngineResult<()> {
        let now = self.clock.now_utc();
        let next = session::operator_reset(&self.session)?;
        self.commit(next)?;
        self.sync_alarm();
        self.record(now, HistoryEvent::OperatorReset);
        info!("Operator reset");
        Ok(())
    }

    /// Wipe the session and the lifetime counters
    pub fn factory_reset(&mut self) -> EngineResult<()> {
        let now = self.clock.now_utc();
        self.commit_with_counters(LockSession::default(), TimeCounters::default())?;
        self.sync_alarm();
        self.record(now, HistoryEvent::FactoryReset);
        warn!("Factory reset");
        Ok(())
    }

    // Internals

    fn key_check(&self) -> KeyCheck<'_> {
        KeyCheck {
            window: self.settings.rolling_key_window,
            keys: self.keys.as_ref(),
        }
    }

    fn accrue_to(&mut self, now: u32) -> EngineResult<()> {
        let next = session::accrue(&self.session, now);
        if next != self.session {
            self.commit(next)?;
            debug!(
                accumulated = self.session.session_accumulated_seconds,
                "Served time accrued"
            );
        }
        Ok(())
    }

    fn reject(&self, now: u32, reason: RejectReason) {
        warn!(
            lock_type = ?self.session.active_lock_type(),
            ?reason,
            "Credential rejected"
        );
        self.record(
            now,
            HistoryEvent::CredentialRejected {
                lock_type: self.session.active_lock_type(),
                reason,
            },
        );
    }

    fn commit(&mut self, next: LockSession) -> EngineResult<()> {
        if let Err(e) = save_session(self.store.as_ref(), &self.settings.session_key, &next) {
            error!(error = %e, "Failed to persist lock session");
            return Err(e.into());
        }
        self.session = next;
        Ok(())
    }

    fn commit_with_counters(
        &mut self,
        next: LockSession,
        counters: TimeCounters,
    ) -> EngineResult<()> {
        let session_blob = encode_session(&next);
        let counters_blob = encode_counters(&counters);
        let entries: [(&str, &[u8]); 2] = [
            (self.settings.session_key.as_str(), session_blob.as_slice()),
            (self.settings.counters_key.as_str(), counters_blob.as_slice()),
        ];

        if let Err(e) = self.store.write_batch(&entries) {
            error!(error = %e, "Failed to persist session and counters");
            return Err(e.into());
        }
        self.session = next;
        self.counters = counters;
        Ok(())
    }

    /// Point the clock's alarm at the session's wake time (or clear it).
    /// Alarm failures are logged, not fatal.
    fn sync_alarm(&self) -> Option<u32> {
        match self.session.wake_time_utc() {
            Some(at) => {
                if let Err(e) = self.clock.schedule_alarm(at) {
                    warn!(error = %e, alarm_utc = at, "Failed to schedule alarm");
                }
                Some(at)
            }
            None => {
                if let Err(e) = self.clock.cancel_alarm() {
                    warn!(error = %e, "Failed to cancel alarm");
                }
                None
            }
        }
    }

    fn record(&self, now: u32, event: HistoryEvent) {
        if let Err(e) = self.store.append_history(HistoryEntry::new(now, event)) {
            warn!(error = %e, "Failed to record history entry");
        }
    }
}

impl std::fmt::Debug for LockEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockEngine")
            .field("settings", &self.settings)
            .field("session", &self.session)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ckos_api::{
        AgentConfig, AgentPersonality, CounterBucket, CustomConfig, KeyholderBasicConfig,
        KeyholderRemoteConfig, OperationalState,
    };
    use ckos_host_api::{AlarmRequest, MockClock};
    use ckos_store::{decode_counters, decode_session, MemoryStore, SqliteStore};
    use proptest::prelude::*;

    struct IndexedKeys;

    impl KeyDerivation for IndexedKeys {
        fn derive(&self, purpose: KeyPurpose, service_id: &str, index: u32) -> Option<String> {
            Some(format!("{service_id}/{}/{index}", purpose.as_str()))
        }
    }

    fn key(purpose: KeyPurpose, index: u32) -> String {
        IndexedKeys.derive(purpose, "svc", index).unwrap()
    }

    struct Harness {
        clock: MockClock,
        store: Arc<MemoryStore>,
        engine: LockEngine,
    }

    fn boot_with(clock: MockClock, store: Arc<MemoryStore>) -> (LockEngine, BootReport) {
        LockEngine::boot(
            Arc::new(clock),
            store,
            Arc::new(IndexedKeys),
            EngineSettings::default(),
        )
        .unwrap()
    }

    fn harness(now: u32) -> Harness {
        let clock = MockClock::new(now);
        let store = Arc::new(MemoryStore::new());
        let (engine, _) = boot_with(clock.clone(), store.clone());
        Harness {
            clock,
            store,
            engine,
        }
    }

    fn custom(duration_seconds: u32) -> ModeConfig {
        ModeConfig::Custom(CustomConfig {
            duration_seconds,
            game_ids: vec![],
        })
    }

    fn remote(unlock_key_index: u32) -> ModeConfig {
        ModeConfig::KeyholderRemote(KeyholderRemoteConfig {
            service_id: "svc".into(),
            identicon_seed: 0x0ABC,
            unlock_key_index,
            cleaning_key_index: 0,
            config_key_index: 0,
            break_duration_minutes: 10,
        })
    }

    fn lock(h: &mut Harness, config: ModeConfig) {
        h.engine.configure(config, false).unwrap();
        h.engine.finalize().unwrap();
        h.engine.on_door_closed().unwrap();
    }

    fn persisted_session(h: &Harness) -> LockSession {
        let bytes = h.store.read("lock_session").unwrap().unwrap();
        decode_session(&bytes).unwrap()
    }

    #[test]
    fn fresh_boot_is_unlocked() {
        let h = harness(1000);
        assert_eq!(h.engine.session(), &LockSession::default());
        assert_eq!(h.engine.counters(), TimeCounters::default());
        assert_eq!(h.clock.alarm_requests(), vec![AlarmRequest::Cancel]);
    }

    #[test]
    fn custom_lock_sets_target_and_alarm() {
        let mut h = harness(1000);
        lock(&mut h, custom(3600));

        let session = h.engine.session();
        assert_eq!(session.lock_start_utc, 1000);
        assert_eq!(session.unlock_target_utc, 4600);
        assert_eq!(h.clock.pending_alarm(), Some(4600));
        assert_eq!(&persisted_session(&h), h.engine.session());

        h.clock.set(4600);
        assert_eq!(h.engine.remaining_seconds(), 0);
        assert_eq!(h.engine.on_alarm_fired().unwrap(), AlarmOutcome::TargetReached);
    }

    #[test]
    fn persist_failure_leaves_state_unchanged() {
        let mut h = harness(1000);
        h.engine.configure(custom(3600), false).unwrap();
        h.engine.finalize().unwrap();

        h.store.set_fail_writes(true);
        let before = h.engine.session().clone();
        assert!(matches!(
            h.engine.on_door_closed(),
            Err(EngineError::Persist(_))
        ));
        assert_eq!(h.engine.session(), &before);
        assert_eq!(h.engine.session().operational_state, OperationalState::AwaitingDoorClose);
        assert_eq!(h.clock.pending_alarm(), None);

        h.store.set_fail_writes(false);
        h.engine.on_door_closed().unwrap();
        assert_eq!(h.engine.session().operational_state, OperationalState::Locked);
    }

    #[test]
    fn breaks_reschedule_the_alarm() {
        let mut h = harness(1000);
        lock(&mut h, custom(3600));

        h.clock.set(5000);
        h.engine.start_break(300).unwrap();
        assert_eq!(h.clock.pending_alarm(), Some(5300));

        h.clock.set(5200);
        let outcome = h.engine.end_break().unwrap();
        assert_eq!(outcome, BreakOutcome::OnTime { elapsed_seconds: 200 });
        assert_eq!(h.engine.session().unlock_target_utc, 4800);
        assert_eq!(h.clock.pending_alarm(), Some(4800));
    }

    #[test]
    fn overdue_break_resets_served_time_and_is_recorded() {
        let mut h = harness(1000);
        lock(&mut h, custom(3600));

        h.clock.set(5000);
        h.engine.start_break(300).unwrap();
        assert_eq!(h.engine.session().session_accumulated_seconds, 4000);

        h.clock.set(5400);
        let outcome = h.engine.end_break().unwrap();
        assert!(outcome.is_overdue());
        assert_eq!(h.engine.session().session_accumulated_seconds, 0);

        let history = h.engine.recent_history(1).unwrap();
        assert_eq!(
            history[0].event,
            HistoryEvent::BreakEnded {
                elapsed_seconds: 400,
                allowed_seconds: 300,
                overdue: true,
            }
        );
    }

    #[test]
    fn remote_key_scenario() {
        let mut h = harness(1000);
        lock(&mut h, remote(50));

        let presented = Credential::RemoteKey {
            purpose: KeyPurpose::Unlock,
            key: key(KeyPurpose::Unlock, 120),
        };
        h.engine.attempt_unlock(&presented).unwrap();
        let ModeConfig::KeyholderRemote(config) = &h.engine.session().mode_config else {
            panic!("remote config expected");
        };
        assert_eq!(config.unlock_key_index, 121);

        h.engine.on_unlock_failed().unwrap();
        assert!(matches!(
            h.engine.attempt_unlock(&presented),
            Err(EngineError::CredentialRejected(RejectReason::ReplayedOrOutOfWindow))
        ));
        assert_eq!(h.engine.status().identicon_seed, Some(0x0ABC));
    }

    #[test]
    fn agent_session_credits_beginner_bucket() {
        let mut h = harness(1000);
        lock(
            &mut h,
            ModeConfig::Agent(AgentConfig {
                agent_id: AgentPersonality::Rookie,
                duration_seconds: 0,
            }),
        );

        h.clock.set(2800);
        h.engine.tick().unwrap();
        assert_eq!(h.engine.session().session_accumulated_seconds, 1800);

        h.engine.attempt_unlock(&Credential::AgentRelease).unwrap();
        let completed = h.engine.on_unlock_confirmed().unwrap();
        assert_eq!(completed.served_seconds, 1800);

        assert_eq!(h.engine.counters().get(CounterBucket::AgentBeginner), 1800);
        assert_eq!(h.engine.session(), &LockSession::default());

        let counters = decode_counters(&h.store.read("time_counters").unwrap().unwrap()).unwrap();
        assert_eq!(counters.get(CounterBucket::AgentBeginner), 1800);
        assert_eq!(persisted_session(&h), LockSession::default());
    }

    #[test]
    fn tick_does_not_rewrite_unchanged_state() {
        let mut h = harness(1000);
        lock(&mut h, custom(3600));
        h.clock.set(1060);
        h.engine.tick().unwrap();
        let writes = h.store.write_count();

        h.engine.tick().unwrap();
        assert_eq!(h.store.write_count(), writes);
    }

    #[test]
    fn corrupted_session_falls_back_to_unlocked() {
        let clock = MockClock::new(1000);
        let store = Arc::new(MemoryStore::new());
        {
            let (mut engine, _) = boot_with(clock.clone(), store.clone());
            engine.configure(custom(3600), false).unwrap();
            engine.finalize().unwrap();
            engine.initiate().unwrap();
        }
        store.corrupt("lock_session", 5);

        let (engine, report) = boot_with(clock, store.clone());
        assert!(report.session_reset);
        assert!(!report.counters_reset);
        assert_eq!(engine.session(), &LockSession::default());

        let history = store.recent_history(1).unwrap();
        assert_eq!(
            history[0].event,
            HistoryEvent::IntegrityReset {
                session: true,
                counters: false,
            }
        );

        // The reset was persisted
        let (_, report) = boot_with(MockClock::new(1000), store);
        assert!(!report.integrity_reset());
    }

    #[test]
    fn reboot_restores_session_and_alarm() {
        let clock = MockClock::new(1000);
        let store = Arc::new(MemoryStore::new());
        {
            let (mut engine, _) = boot_with(clock.clone(), store.clone());
            engine.configure(custom(3600), false).unwrap();
            engine.finalize().unwrap();
            engine.initiate().unwrap();
        }

        let rebooted = MockClock::new(2000);
        let (engine, report) = boot_with(rebooted.clone(), store);
        assert_eq!(engine.session().operational_state, OperationalState::Locked);
        assert_eq!(report.alarm_utc, Some(4600));
        assert_eq!(rebooted.pending_alarm(), Some(4600));
        assert_eq!(engine.accumulated_seconds(), 1000);
    }

    #[test]
    fn engine_works_over_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckos.db");
        let clock = MockClock::new(1000);

        {
            let store = Arc::new(SqliteStore::open(&path).unwrap());
            let (mut engine, _) = LockEngine::boot(
                Arc::new(clock.clone()),
                store,
                Arc::new(IndexedKeys),
                EngineSettings::default(),
            )
            .unwrap();
            engine.configure(custom(600), false).unwrap();
            engine.finalize().unwrap();
            engine.initiate().unwrap();
        }

        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let (engine, _) = LockEngine::boot(
            Arc::new(clock),
            store,
            Arc::new(IndexedKeys),
            EngineSettings::default(),
        )
        .unwrap();
        assert_eq!(engine.session().unlock_target_utc, 1600);
    }

    #[test]
    fn cleaning_break_uses_configured_duration() {
        let mut h = harness(1000);
        lock(&mut h, remote(0));

        h.clock.set(2000);
        assert!(matches!(
            h.engine.start_cleaning_break(&key(KeyPurpose::Unlock, 0)),
            Err(EngineError::CredentialRejected(_))
        ));
        h.engine
            .start_cleaning_break(&key(KeyPurpose::Cleaning, 0))
            .unwrap();

        assert_eq!(h.engine.session().operational_state, OperationalState::BreakActive);
        assert_eq!(h.engine.session().break_allowed_seconds, 600);
        assert_eq!(h.clock.pending_alarm(), Some(2600));
    }

    #[test]
    fn remote_break_update_needs_config_key() {
        let mut h = harness(1000);
        lock(&mut h, remote(0));

        assert!(h
            .engine
            .update_remote_break_duration(&key(KeyPurpose::Config, 500), 30)
            .is_err());
        h.engine
            .update_remote_break_duration(&key(KeyPurpose::Config, 2), 30)
            .unwrap();

        let ModeConfig::KeyholderRemote(config) = &h.engine.session().mode_config else {
            panic!("remote config expected");
        };
        assert_eq!(config.break_duration_minutes, 30);
        assert_eq!(config.config_key_index, 3);
    }

    #[test]
    fn adjust_target_moves_alarm() {
        let mut h = harness(1000);
        lock(&mut h, custom(3600));

        assert_eq!(h.engine.adjust_unlock_target(-600).unwrap(), 4000);
        assert_eq!(h.clock.pending_alarm(), Some(4000));
        assert_eq!(h.engine.adjust_unlock_target(-10_000).unwrap(), 1000);
    }

    #[test]
    fn early_alarm_is_rescheduled() {
        let mut h = harness(1000);
        lock(&mut h, custom(3600));

        h.clock.set(3000);
        assert_eq!(h.engine.on_alarm_fired().unwrap(), AlarmOutcome::Spurious);
        assert_eq!(h.clock.pending_alarm(), Some(4600));
        assert_eq!(h.engine.session().session_accumulated_seconds, 2000);
    }

    #[test]
    fn alarm_failure_is_not_fatal() {
        let mut h = harness(1000);
        h.clock.set_fail_alarm(true);
        lock(&mut h, custom(3600));
        assert_eq!(h.engine.session().operational_state, OperationalState::Locked);
    }

    #[test]
    fn wrong_pin_is_recorded() {
        let mut h = harness(1000);
        lock(
            &mut h,
            ModeConfig::KeyholderBasic(KeyholderBasicConfig {
                pin: "24681357".into(),
            }),
        );

        let result = h.engine.attempt_unlock(&Credential::Pin {
            pin: "00000000".into(),
        });
        assert!(matches!(result, Err(EngineError::CredentialRejected(_))));
        assert_eq!(h.engine.session().operational_state, OperationalState::Locked);
        assert!(matches!(
            h.engine.recent_history(1).unwrap()[0].event,
            HistoryEvent::CredentialRejected { .. }
        ));

        h.engine
            .attempt_unlock(&Credential::Pin {
                pin: "24681357".into(),
            })
            .unwrap();
        assert_eq!(
            h.engine.session().operational_state,
            OperationalState::PendingUnlock
        );
    }

    #[test]
    fn remote_lock_needs_provisioned_keys() {
        let clock = MockClock::new(1000);
        let store = Arc::new(MemoryStore::new());
        let (mut engine, _) = LockEngine::boot(
            Arc::new(clock),
            store.clone(),
            Arc::new(crate::NoKeyDerivation),
            EngineSettings::default(),
        )
        .unwrap();
        let writes = store.write_count();

        assert!(matches!(
            engine.configure(remote(1), false),
            Err(EngineError::InvalidConfig(ConfigViolation::RemoteKeysUnavailable))
        ));
        assert_eq!(engine.session(), &LockSession::default());
        assert_eq!(store.write_count(), writes);

        engine.configure(custom(60), false).unwrap();
    }

    #[test]
    fn fault_and_resets() {
        let mut h = harness(1000);
        lock(&mut h, custom(3600));
        h.clock.set(2000);
        h.engine.tick().unwrap();

        h.engine.fault("actuator jammed").unwrap();
        assert_eq!(h.engine.session().operational_state, OperationalState::Error);
        assert_eq!(h.clock.pending_alarm(), None);
        assert!(h.engine.start_break(60).is_err());
        assert!(h.engine.attempt_unlock(&Credential::Timer).is_err());

        h.engine.operator_reset().unwrap();
        assert_eq!(h.engine.session(), &LockSession::default());

        h.engine.configure(custom(60), false).unwrap();
        h.engine.finalize().unwrap();
        h.engine.initiate().unwrap();
        h.clock.set(2060);
        h.engine.attempt_unlock(&Credential::Timer).unwrap();
        h.engine.complete_unlock().unwrap();
        assert_eq!(h.engine.counters().get(CounterBucket::Custom), 60);

        h.engine.factory_reset().unwrap();
        assert_eq!(h.engine.counters(), TimeCounters::default());
        let counters = decode_counters(&h.store.read("time_counters").unwrap().unwrap()).unwrap();
        assert_eq!(counters.total(), 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Advance(u32),
        Tick,
        StartBreak(u16),
        EndBreak,
        Adjust(i64),
        Timer,
        Confirm,
        Fail,
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u32..2_000).prop_map(Op::Advance),
            Just(Op::Tick),
            (0u16..900).prop_map(Op::StartBreak),
            Just(Op::EndBreak),
            (-5_000i64..5_000).prop_map(Op::Adjust),
            Just(Op::Timer),
            Just(Op::Confirm),
            Just(Op::Fail),
        ]
    }

    proptest! {
        #[test]
        fn invariants_hold_across_operations(ops in proptest::collection::vec(arb_op(), 1..60)) {
            let mut h = harness(1000);
            lock(&mut h, custom(3600));
            let mut now = 1000u32;

            for op in ops {
                let before = h.engine.session().clone();
                let result = match op {
                    Op::Advance(secs) => {
                        now += secs;
                        h.clock.set(now);
                        Ok(())
                    }
                    Op::Tick => h.engine.tick(),
                    Op::StartBreak(allowed) => h.engine.start_break(allowed),
                    Op::EndBreak => h.engine.end_break().map(|_| ()),
                    Op::Adjust(delta) => h.engine.adjust_unlock_target(delta).map(|_| ()),
                    Op::Timer => h.engine.attempt_unlock(&Credential::Timer),
                    Op::Confirm => h.engine.complete_unlock().map(|_| ()),
                    Op::Fail => h.engine.on_unlock_failed(),
                };

                let session = h.engine.session();
                if result.is_err() {
                    prop_assert_eq!(session, &before);
                }
                if session.operational_state == OperationalState::Locked {
                    prop_assert!(session.lock_start_utc > 0);
                }
                if session.unlock_target_utc != 0 {
                    prop_assert!(session.unlock_target_utc >= session.lock_start_utc);
                }
                prop_assert_eq!(&persisted_session(&h), session);

                if session.operational_state == OperationalState::Unlocked {
                    // Session completed; start another
                    lock(&mut h, custom(3600));
                }
            }
        }
    }
}
