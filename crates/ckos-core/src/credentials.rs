//! Credential validators, one per lock type

use ckos_api::{
    AgentConfig, Credential, CustomConfig, KeyPurpose, KeyholderBasicConfig,
    KeyholderRemoteConfig, ModeConfig, RejectReason,
};

/// Maps a rolling key index to the key the remote service issues for it.
///
/// The derivation is a secret shared with the keyholder service and lives
/// outside this crate. `None` means no key can be derived for that index.
pub trait KeyDerivation: Send + Sync {
    fn derive(&self, purpose: KeyPurpose, service_id: &str, index: u32) -> Option<String>;

    /// Whether this derivation can produce keys at all. Remote keyholder
    /// locks are refused when it cannot.
    fn is_provisioned(&self) -> bool {
        true
    }
}

/// Derivation used when no keyholder service is provisioned: every remote
/// key is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKeyDerivation;

impl KeyDerivation for NoKeyDerivation {
    fn derive(&self, _purpose: KeyPurpose, _service_id: &str, _index: u32) -> Option<String> {
        None
    }

    fn is_provisioned(&self) -> bool {
        false
    }
}

/// Inputs shared by every validator
pub struct CredentialContext<'a> {
    pub now_utc: u32,
    /// 0 when the session is untimed
    pub unlock_target_utc: u32,
    pub window: u32,
    pub keys: &'a dyn KeyDerivation,
}

/// Validates the credential that ends a session of one lock type
pub trait CredentialValidator {
    /// Accepting a rolling key advances its stored index, so validators may
    /// mutate their configuration; a rejection never does.
    fn validate(
        &mut self,
        credential: &Credential,
        ctx: &CredentialContext<'_>,
    ) -> Result<(), RejectReason>;
}

fn timer_elapsed(ctx: &CredentialContext<'_>) -> Result<(), RejectReason> {
    if ctx.unlock_target_utc != 0 && ctx.now_utc >= ctx.unlock_target_utc {
        Ok(())
    } else {
        Err(RejectReason::TimerRunning)
    }
}

impl CredentialValidator for AgentConfig {
    fn validate(
        &mut self,
        credential: &Credential,
        ctx: &CredentialContext<'_>,
    ) -> Result<(), RejectReason> {
        match credential {
            Credential::Timer => timer_elapsed(ctx),
            Credential::AgentRelease => Ok(()),
            _ => Err(RejectReason::WrongCredential),
        }
    }
}

impl CredentialValidator for CustomConfig {
    fn validate(
        &mut self,
        credential: &Credential,
        ctx: &CredentialContext<'_>,
    ) -> Result<(), RejectReason> {
        match credential {
            Credential::Timer => timer_elapsed(ctx),
            _ => Err(RejectReason::WrongCredential),
        }
    }
}

impl CredentialValidator for KeyholderBasicConfig {
    fn validate(
        &mut self,
        credential: &Credential,
        _ctx: &CredentialContext<'_>,
    ) -> Result<(), RejectReason> {
        match credential {
            // Plain equality on the stored PIN
            Credential::Pin { pin } if *pin == self.pin => Ok(()),
            _ => Err(RejectReason::WrongCredential),
        }
    }
}

impl CredentialValidator for KeyholderRemoteConfig {
    fn validate(
        &mut self,
        credential: &Credential,
        ctx: &CredentialContext<'_>,
    ) -> Result<(), RejectReason> {
        match credential {
            Credential::RemoteKey {
                purpose: KeyPurpose::Unlock,
                key,
            } => accept_rolling_key(self, KeyPurpose::Unlock, key, ctx.window, ctx.keys)
                .map(|_| ()),
            _ => Err(RejectReason::WrongCredential),
        }
    }
}

/// Dispatch to the validator for the active lock type
pub fn validate_credential(
    mode_config: &mut ModeConfig,
    credential: &Credential,
    ctx: &CredentialContext<'_>,
) -> Result<(), RejectReason> {
    match mode_config {
        ModeConfig::None => Err(RejectReason::WrongCredential),
        ModeConfig::Agent(config) => config.validate(credential, ctx),
        ModeConfig::Custom(config) => config.validate(credential, ctx),
        ModeConfig::KeyholderBasic(config) => config.validate(credential, ctx),
        ModeConfig::KeyholderRemote(config) => config.validate(credential, ctx),
    }
}

/// Lowest index in `[current, current + window - 1]` whose derived key matches.
///
/// The walk stops short of `u32::MAX` so an accepted index can always advance.
pub fn find_rolling_key(
    keys: &dyn KeyDerivation,
    purpose: KeyPurpose,
    service_id: &str,
    current: u32,
    window: u32,
    presented: &str,
) -> Option<u32> {
    if window == 0 || current == u32::MAX {
        return None;
    }
    let last = current.saturating_add(window - 1).min(u32::MAX - 1);

    (current..=last).find(|&index| {
        keys.derive(purpose, service_id, index)
            .is_some_and(|expected| expected == presented)
    })
}

/// Validate a rolling key and advance the purpose's index past it.
///
/// Returns the new stored index.
pub fn accept_rolling_key(
    config: &mut KeyholderRemoteConfig,
    purpose: KeyPurpose,
    presented: &str,
    window: u32,
    keys: &dyn KeyDerivation,
) -> Result<u32, RejectReason> {
    let current = config.key_index(purpose);
    let matched = find_rolling_key(keys, purpose, &config.service_id, current, window, presented)
        .ok_or(RejectReason::ReplayedOrOutOfWindow)?;

    let next = matched + 1;
    *config.key_index_mut(purpose) = next;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ckos_api::AgentPersonality;
    use proptest::prelude::*;

    /// Deterministic stand-in for the shared-secret derivation
    struct IndexedKeys;

    impl KeyDerivation for IndexedKeys {
        fn derive(&self, purpose: KeyPurpose, service_id: &str, index: u32) -> Option<String> {
            Some(format!("{service_id}:{}:{index}", purpose.as_str()))
        }
    }

    fn key(purpose: KeyPurpose, index: u32) -> String {
        IndexedKeys.derive(purpose, "svc", index).unwrap()
    }

    fn remote(unlock_key_index: u32) -> KeyholderRemoteConfig {
        KeyholderRemoteConfig {
            service_id: "svc".into(),
            identicon_seed: 7,
            unlock_key_index,
            cleaning_key_index: 0,
            config_key_index: 0,
            break_duration_minutes: 10,
        }
    }

    fn ctx(now_utc: u32, unlock_target_utc: u32) -> CredentialContext<'static> {
        CredentialContext {
            now_utc,
            unlock_target_utc,
            window: 100,
            keys: &IndexedKeys,
        }
    }

    #[test]
    fn rolling_key_inside_window_advances_index() {
        let mut config = remote(50);
        let presented = key(KeyPurpose::Unlock, 120);

        assert_eq!(
            accept_rolling_key(&mut config, KeyPurpose::Unlock, &presented, 100, &IndexedKeys),
            Ok(121)
        );
        assert_eq!(config.unlock_key_index, 121);

        // Replay of the same key
        assert_eq!(
            accept_rolling_key(&mut config, KeyPurpose::Unlock, &presented, 100, &IndexedKeys),
            Err(RejectReason::ReplayedOrOutOfWindow)
        );
        assert_eq!(config.unlock_key_index, 121);
    }

    #[test]
    fn window_edges() {
        // Window [50, 149]
        let mut config = remote(50);
        let last = key(KeyPurpose::Unlock, 149);
        let beyond = key(KeyPurpose::Unlock, 150);
        let before = key(KeyPurpose::Unlock, 49);

        assert!(accept_rolling_key(&mut config, KeyPurpose::Unlock, &beyond, 100, &IndexedKeys).is_err());
        assert!(accept_rolling_key(&mut config, KeyPurpose::Unlock, &before, 100, &IndexedKeys).is_err());
        assert_eq!(
            accept_rolling_key(&mut config, KeyPurpose::Unlock, &last, 100, &IndexedKeys),
            Ok(150)
        );
    }

    #[test]
    fn purposes_keep_separate_indices() {
        let mut config = remote(0);
        let cleaning = key(KeyPurpose::Cleaning, 3);

        // A cleaning key is not an unlock key
        assert!(
            accept_rolling_key(&mut config, KeyPurpose::Unlock, &cleaning, 100, &IndexedKeys)
                .is_err()
        );
        assert_eq!(
            accept_rolling_key(&mut config, KeyPurpose::Cleaning, &cleaning, 100, &IndexedKeys),
            Ok(4)
        );
        assert_eq!(config.unlock_key_index, 0);
        assert_eq!(config.config_key_index, 0);
    }

    #[test]
    fn lowest_matching_index_wins() {
        struct Repeating;
        impl KeyDerivation for Repeating {
            fn derive(&self, _: KeyPurpose, _: &str, index: u32) -> Option<String> {
                Some(format!("k{}", index % 10))
            }
        }

        assert_eq!(
            find_rolling_key(&Repeating, KeyPurpose::Unlock, "svc", 12, 100, "k5"),
            Some(15)
        );
    }

    #[test]
    fn index_never_wraps() {
        assert_eq!(
            find_rolling_key(&IndexedKeys, KeyPurpose::Unlock, "svc", u32::MAX, 100, "x"),
            None
        );
        let presented = key(KeyPurpose::Unlock, u32::MAX - 1);
        let mut config = remote(u32::MAX - 10);
        assert_eq!(
            accept_rolling_key(&mut config, KeyPurpose::Unlock, &presented, 100, &IndexedKeys),
            Ok(u32::MAX)
        );
    }

    #[test]
    fn no_derivation_rejects_everything() {
        let mut config = remote(0);
        assert_eq!(
            accept_rolling_key(&mut config, KeyPurpose::Unlock, "anything", 100, &NoKeyDerivation),
            Err(RejectReason::ReplayedOrOutOfWindow)
        );
        assert!(!NoKeyDerivation.is_provisioned());
    }

    #[test]
    fn pin_is_exact_match() {
        let mut mode = ModeConfig::KeyholderBasic(KeyholderBasicConfig {
            pin: "12345678".into(),
        });
        let good = Credential::Pin {
            pin: "12345678".into(),
        };
        let bad = Credential::Pin {
            pin: "1234567".into(),
        };

        assert_eq!(validate_credential(&mut mode, &good, &ctx(0, 0)), Ok(()));
        assert_eq!(
            validate_credential(&mut mode, &bad, &ctx(0, 0)),
            Err(RejectReason::WrongCredential)
        );
        assert_eq!(
            validate_credential(&mut mode, &Credential::Timer, &ctx(0, 0)),
            Err(RejectReason::WrongCredential)
        );
    }

    #[test]
    fn timer_needs_reached_target() {
        let mut mode = ModeConfig::Custom(CustomConfig {
            duration_seconds: 3600,
            game_ids: vec![],
        });

        assert_eq!(
            validate_credential(&mut mode, &Credential::Timer, &ctx(4599, 4600)),
            Err(RejectReason::TimerRunning)
        );
        assert_eq!(
            validate_credential(&mut mode, &Credential::Timer, &ctx(4600, 4600)),
            Ok(())
        );
        assert_eq!(
            validate_credential(&mut mode, &Credential::AgentRelease, &ctx(4600, 4600)),
            Err(RejectReason::WrongCredential)
        );
    }

    #[test]
    fn open_ended_agent_needs_release() {
        let mut mode = ModeConfig::Agent(AgentConfig {
            agent_id: AgentPersonality::Rookie,
            duration_seconds: 0,
        });

        assert_eq!(
            validate_credential(&mut mode, &Credential::Timer, &ctx(9999, 0)),
            Err(RejectReason::TimerRunning)
        );
        assert_eq!(
            validate_credential(&mut mode, &Credential::AgentRelease, &ctx(9999, 0)),
            Ok(())
        );
    }

    proptest! {
        #[test]
        fn accepted_keys_strictly_advance_and_never_replay(
            start in 0u32..1000,
            offsets in proptest::collection::vec(0u32..150, 1..20),
        ) {
            let mut config = remote(start);
            let mut accepted = Vec::new();

            for offset in offsets {
                let presented = key(KeyPurpose::Unlock, start + offset);
                let before = config.unlock_key_index;
                match accept_rolling_key(&mut config, KeyPurpose::Unlock, &presented, 100, &IndexedKeys) {
                    Ok(next) => {
                        prop_assert!(next > before);
                        prop_assert!(!accepted.contains(&presented));
                        accepted.push(presented);
                    }
                    Err(_) => prop_assert_eq!(config.unlock_key_index, before),
                }
            }

            for presented in &accepted {
                prop_assert!(
                    accept_rolling_key(&mut config, KeyPurpose::Unlock, presented, 100, &IndexedKeys)
                        .is_err()
                );
            }
        }
    }
}
