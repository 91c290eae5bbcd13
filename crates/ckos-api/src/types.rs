//! Lock data model shared by the engine, the store and clients

use ckos_util::SECONDS_PER_YEAR;
use serde::{Deserialize, Serialize};

/// Shortest custom lock accepted
pub const MIN_CUSTOM_DURATION_SECONDS: u32 = 60;

/// Longest custom lock accepted (100 years)
pub const MAX_CUSTOM_DURATION_SECONDS: u32 = 100 * SECONDS_PER_YEAR;

/// Custom locks longer than this need caller-side multi-step confirmation
pub const LONG_LOCK_CONFIRMATION_SECONDS: u32 = SECONDS_PER_YEAR;

/// Keyholder PINs are exactly this many ASCII digits
pub const PIN_LENGTH: usize = 8;

/// Maximum number of mini-games attached to a custom lock
pub const MAX_GAMES: usize = 8;

/// Maximum length of a remote keyholder service id, in bytes
pub const SERVICE_ID_MAX_LEN: usize = 32;

/// Identicon seeds are 15 bits wide
pub const IDENTICON_SEED_MAX: u16 = 0x7FFF;

/// Longest break a remote keyholder may configure (must fit `u16` seconds)
pub const MAX_BREAK_DURATION_MINUTES: u16 = u16::MAX / 60;

/// Lock type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LockType {
    #[default]
    None = 0,
    Agent = 1,
    Custom = 2,
    KeyholderBasic = 3,
    KeyholderRemote = 4,
}

impl LockType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Agent),
            2 => Some(Self::Custom),
            3 => Some(Self::KeyholderBasic),
            4 => Some(Self::KeyholderRemote),
            _ => None,
        }
    }
}

/// Operational state of the lock session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum OperationalState {
    #[default]
    Unlocked = 0,
    Configuring = 1,
    AwaitingDoorClose = 2,
    Locked = 3,
    PendingUnlock = 4,
    BreakActive = 5,
    Error = 6,
}

impl OperationalState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unlocked),
            1 => Some(Self::Configuring),
            2 => Some(Self::AwaitingDoorClose),
            3 => Some(Self::Locked),
            4 => Some(Self::PendingUnlock),
            5 => Some(Self::BreakActive),
            6 => Some(Self::Error),
            _ => None,
        }
    }

    /// Whether a session is in progress (the device is physically locked)
    pub fn is_engaged(self) -> bool {
        matches!(self, Self::Locked | Self::PendingUnlock | Self::BreakActive)
    }
}

/// Agent personalities, one per difficulty tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AgentPersonality {
    /// Beginner mode
    Rookie = 0,
    /// Advanced mode
    Veteran = 1,
    /// Permanent/strict mode
    Warden = 2,
}

impl AgentPersonality {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Rookie),
            1 => Some(Self::Veteran),
            2 => Some(Self::Warden),
            _ => None,
        }
    }

    pub fn counter_bucket(self) -> CounterBucket {
        match self {
            Self::Rookie => CounterBucket::AgentBeginner,
            Self::Veteran => CounterBucket::AgentAdvanced,
            Self::Warden => CounterBucket::AgentPermanent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: AgentPersonality,
    /// Fixed duration the agent granted; 0 means open-ended
    #[serde(default)]
    pub duration_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomConfig {
    pub duration_seconds: u32,
    /// Mini-games that may adjust the timer, at most [`MAX_GAMES`]
    #[serde(default)]
    pub game_ids: Vec<u8>,
}

impl CustomConfig {
    pub fn num_games(&self) -> usize {
        self.game_ids.len()
    }
}

/// Basic keyholder: a fixed PIN stored in plaintext
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyholderBasicConfig {
    pub pin: String,
}

impl KeyholderBasicConfig {
    pub fn pin_length(&self) -> usize {
        self.pin.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyholderRemoteConfig {
    pub service_id: String,
    pub identicon_seed: u16,
    #[serde(default)]
    pub unlock_key_index: u32,
    #[serde(default)]
    pub cleaning_key_index: u32,
    #[serde(default)]
    pub config_key_index: u32,
    pub break_duration_minutes: u16,
}

impl KeyholderRemoteConfig {
    /// Next acceptable key index for a purpose
    pub fn key_index(&self, purpose: KeyPurpose) -> u32 {
        match purpose {
            KeyPurpose::Unlock => self.unlock_key_index,
            KeyPurpose::Cleaning => self.cleaning_key_index,
            KeyPurpose::Config => self.config_key_index,
        }
    }

    pub fn key_index_mut(&mut self, purpose: KeyPurpose) -> &mut u32 {
        match purpose {
            KeyPurpose::Unlock => &mut self.unlock_key_index,
            KeyPurpose::Cleaning => &mut self.cleaning_key_index,
            KeyPurpose::Config => &mut self.config_key_index,
        }
    }

    pub fn break_duration_seconds(&self) -> u16 {
        self.break_duration_minutes
            .min(MAX_BREAK_DURATION_MINUTES)
            .saturating_mul(60)
    }
}

/// Per-type configuration; the variant is the active lock type
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModeConfig {
    #[default]
    None,
    Agent(AgentConfig),
    Custom(CustomConfig),
    KeyholderBasic(KeyholderBasicConfig),
    KeyholderRemote(KeyholderRemoteConfig),
}

impl ModeConfig {
    pub fn lock_type(&self) -> LockType {
        match self {
            ModeConfig::None => LockType::None,
            ModeConfig::Agent(_) => LockType::Agent,
            ModeConfig::Custom(_) => LockType::Custom,
            ModeConfig::KeyholderBasic(_) => LockType::KeyholderBasic,
            ModeConfig::KeyholderRemote(_) => LockType::KeyholderRemote,
        }
    }

    /// Duration implied by the configuration, if the lock is timed
    pub fn fixed_duration_seconds(&self) -> Option<u32> {
        match self {
            ModeConfig::Custom(c) => Some(c.duration_seconds),
            ModeConfig::Agent(a) if a.duration_seconds > 0 => Some(a.duration_seconds),
            _ => None,
        }
    }

    /// Statistics bucket credited when a session of this type completes
    pub fn counter_bucket(&self) -> Option<CounterBucket> {
        match self {
            ModeConfig::None => None,
            ModeConfig::Agent(a) => Some(a.agent_id.counter_bucket()),
            ModeConfig::Custom(_) => Some(CounterBucket::Custom),
            ModeConfig::KeyholderBasic(_) => Some(CounterBucket::KeyholderBasic),
            ModeConfig::KeyholderRemote(_) => Some(CounterBucket::KeyholderRemote),
        }
    }
}

/// The device's lock session, the single source of truth for what is locked
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LockSession {
    pub operational_state: OperationalState,
    pub mode_config: ModeConfig,
    /// Set once per session; breaks never move it
    pub lock_start_utc: u32,
    /// 0 means no timed target
    pub unlock_target_utc: u32,
    /// Served time in the current session, frozen during breaks
    pub session_accumulated_seconds: u32,
    /// Time up to which `session_accumulated_seconds` has been credited
    pub accrual_baseline_utc: u32,
    pub break_start_utc: u32,
    pub break_allowed_seconds: u16,
}

impl LockSession {
    pub fn active_lock_type(&self) -> LockType {
        self.mode_config.lock_type()
    }

    pub fn is_timed(&self) -> bool {
        self.unlock_target_utc != 0
    }

    /// Seconds until the timed target, 0 when untimed or already reached
    pub fn remaining_seconds(&self, now_utc: u32) -> u32 {
        if self.unlock_target_utc == 0 || self.unlock_target_utc <= now_utc {
            0
        } else {
            self.unlock_target_utc - now_utc
        }
    }

    /// When the active break runs out, if a break is active
    pub fn break_deadline_utc(&self) -> Option<u32> {
        (self.operational_state == OperationalState::BreakActive).then(|| {
            self.break_start_utc
                .saturating_add(u32::from(self.break_allowed_seconds))
        })
    }

    /// Wake time the clock collaborator should hold for this session
    pub fn wake_time_utc(&self) -> Option<u32> {
        match self.operational_state {
            OperationalState::BreakActive => self.break_deadline_utc(),
            OperationalState::Locked | OperationalState::PendingUnlock if self.is_timed() => {
                Some(self.unlock_target_utc)
            }
            _ => None,
        }
    }
}

/// Historical statistics buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterBucket {
    AgentBeginner,
    AgentAdvanced,
    AgentPermanent,
    Custom,
    KeyholderBasic,
    KeyholderRemote,
}

impl CounterBucket {
    pub const ALL: [CounterBucket; 6] = [
        CounterBucket::AgentBeginner,
        CounterBucket::AgentAdvanced,
        CounterBucket::AgentPermanent,
        CounterBucket::Custom,
        CounterBucket::KeyholderBasic,
        CounterBucket::KeyholderRemote,
    ];

    pub fn index(self) -> usize {
        match self {
            CounterBucket::AgentBeginner => 0,
            CounterBucket::AgentAdvanced => 1,
            CounterBucket::AgentPermanent => 2,
            CounterBucket::Custom => 3,
            CounterBucket::KeyholderBasic => 4,
            CounterBucket::KeyholderRemote => 5,
        }
    }
}

/// Lifetime served-time totals, one accumulator per bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeCounters {
    buckets: [u64; 6],
}

impl TimeCounters {
    pub fn from_array(buckets: [u64; 6]) -> Self {
        Self { buckets }
    }

    pub fn as_array(&self) -> [u64; 6] {
        self.buckets
    }

    pub fn get(&self, bucket: CounterBucket) -> u64 {
        self.buckets[bucket.index()]
    }

    /// Add served seconds to a bucket; counters only ever grow
    pub fn credit(&mut self, bucket: CounterBucket, seconds: u64) {
        let slot = &mut self.buckets[bucket.index()];
        *slot = slot.saturating_add(seconds);
    }

    pub fn total(&self) -> u64 {
        self.buckets.iter().fold(0u64, |acc, v| acc.saturating_add(*v))
    }
}

/// Which rolling key sequence a remote key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPurpose {
    Unlock,
    Cleaning,
    Config,
}

impl KeyPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyPurpose::Unlock => "unlock",
            KeyPurpose::Cleaning => "cleaning",
            KeyPurpose::Config => "config",
        }
    }
}

/// A credential presented to end a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// The timed target has passed (agent and custom locks)
    Timer,
    /// The agent decided to release the wearer (agent locks)
    AgentRelease,
    /// Keyholder PIN (basic keyholder locks)
    Pin { pin: String },
    /// Rolling key issued by the remote keyholder service
    RemoteKey { purpose: KeyPurpose, key: String },
}

/// Why a credential was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    WrongCredential,
    ReplayedOrOutOfWindow,
    TimerRunning,
}

/// Read-only projection of the session for status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStatus {
    pub lock_type: LockType,
    pub state: OperationalState,
    pub lock_start_utc: Option<u32>,
    pub unlock_target_utc: Option<u32>,
    pub remaining_seconds: u32,
    pub accumulated_seconds: u32,
    pub break_deadline_utc: Option<u32>,
    /// Identicon shown so the wearer can match the remote keyholder
    pub identicon_seed: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hundred_years_fits_u32() {
        assert_eq!(MAX_CUSTOM_DURATION_SECONDS, 3_153_600_000);
    }

    #[test]
    fn mode_config_determines_lock_type() {
        let config = ModeConfig::Custom(CustomConfig {
            duration_seconds: 3600,
            game_ids: vec![],
        });
        assert_eq!(config.lock_type(), LockType::Custom);
        assert_eq!(config.fixed_duration_seconds(), Some(3600));
        assert_eq!(ModeConfig::default().lock_type(), LockType::None);
    }

    #[test]
    fn open_ended_agent_has_no_duration() {
        let config = ModeConfig::Agent(AgentConfig {
            agent_id: AgentPersonality::Warden,
            duration_seconds: 0,
        });
        assert_eq!(config.fixed_duration_seconds(), None);
        assert_eq!(config.counter_bucket(), Some(CounterBucket::AgentPermanent));
    }

    #[test]
    fn remaining_seconds_boundaries() {
        let session = LockSession {
            operational_state: OperationalState::Locked,
            lock_start_utc: 1000,
            unlock_target_utc: 4600,
            ..Default::default()
        };
        assert_eq!(session.remaining_seconds(1000), 3600);
        assert_eq!(session.remaining_seconds(4600), 0);
        assert_eq!(session.remaining_seconds(9999), 0);

        let untimed = LockSession::default();
        assert_eq!(untimed.remaining_seconds(1000), 0);
    }

    #[test]
    fn counters_credit_saturates() {
        let mut counters = TimeCounters::default();
        counters.credit(CounterBucket::Custom, 100);
        counters.credit(CounterBucket::Custom, u64::MAX);
        assert_eq!(counters.get(CounterBucket::Custom), u64::MAX);
        assert_eq!(counters.get(CounterBucket::AgentBeginner), 0);
    }

    #[test]
    fn enum_byte_mapping_is_stable() {
        for value in 0..=4u8 {
            assert_eq!(LockType::from_u8(value).map(LockType::as_u8), Some(value));
        }
        assert!(LockType::from_u8(5).is_none());
        for value in 0..=6u8 {
            assert_eq!(
                OperationalState::from_u8(value).map(OperationalState::as_u8),
                Some(value)
            );
        }
        assert!(OperationalState::from_u8(7).is_none());
    }

    #[test]
    fn break_duration_is_clamped_to_u16_seconds() {
        let config = KeyholderRemoteConfig {
            service_id: "svc".into(),
            identicon_seed: 1,
            unlock_key_index: 0,
            cleaning_key_index: 0,
            config_key_index: 0,
            break_duration_minutes: u16::MAX,
        };
        assert_eq!(config.break_duration_seconds(), MAX_BREAK_DURATION_MINUTES * 60);
    }

    #[test]
    fn credential_serialization() {
        let cred = Credential::RemoteKey {
            purpose: KeyPurpose::Unlock,
            key: "ABCD".into(),
        };
        let json = serde_json::to_string(&cred).unwrap();
        assert!(json.contains("remote_key"));
        let parsed: Credential = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cred);
    }
}
