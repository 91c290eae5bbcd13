//! Versioned binary codecs for the persisted aggregates
//!
//! Both blobs start with a format version byte and end with a CRC-16 (see
//! [`crate::seal`]). All integers are big-endian. The session blob carries the
//! common session fields followed by a payload that depends on the lock type;
//! the counters blob carries the six bucket totals as `u64`.

use bytes::{Buf, BufMut, BytesMut};
use ckos_api::{
    AgentConfig, AgentPersonality, CustomConfig, KeyholderBasicConfig, KeyholderRemoteConfig,
    LockSession, LockType, ModeConfig, OperationalState, TimeCounters, MAX_GAMES, PIN_LENGTH,
    SERVICE_ID_MAX_LEN,
};
use thiserror::Error;
use tracing::debug;

use crate::{
    seal, unseal, IntegrityError, IntegrityResult, PersistenceStore, StoreError, StoreResult,
};

/// Current session blob format
pub const SESSION_FORMAT_VERSION: u8 = 1;

/// Current counters blob format
pub const COUNTERS_FORMAT_VERSION: u8 = 1;

/// Encode a session into a sealed blob.
///
/// Configuration strings longer than their fixed slots are truncated; callers
/// validate them before they ever reach a session.
pub fn encode_session(session: &LockSession) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(96);

    buf.put_u8(SESSION_FORMAT_VERSION);
    buf.put_u8(session.active_lock_type().as_u8());
    buf.put_u8(session.operational_state.as_u8());
    buf.put_u32(session.lock_start_utc);
    buf.put_u32(session.unlock_target_utc);
    buf.put_u32(session.session_accumulated_seconds);
    buf.put_u32(session.accrual_baseline_utc);
    buf.put_u32(session.break_start_utc);
    buf.put_u16(session.break_allowed_seconds);

    match &session.mode_config {
        ModeConfig::None => {}
        ModeConfig::Agent(agent) => {
            buf.put_u8(agent.agent_id.as_u8());
            buf.put_u32(agent.duration_seconds);
        }
        ModeConfig::Custom(custom) => {
            let games = &custom.game_ids[..custom.game_ids.len().min(MAX_GAMES)];
            buf.put_u32(custom.duration_seconds);
            buf.put_u8(games.len() as u8);
            put_fixed(&mut buf, games, MAX_GAMES);
        }
        ModeConfig::KeyholderBasic(basic) => {
            let pin = &basic.pin.as_bytes()[..basic.pin.len().min(PIN_LENGTH)];
            buf.put_u8(pin.len() as u8);
            put_fixed(&mut buf, pin, PIN_LENGTH);
        }
        ModeConfig::KeyholderRemote(remote) => {
            let sid = &remote.service_id.as_bytes()[..remote.service_id.len().min(SERVICE_ID_MAX_LEN)];
            buf.put_u8(sid.len() as u8);
            put_fixed(&mut buf, sid, SERVICE_ID_MAX_LEN);
            buf.put_u16(remote.identicon_seed);
            buf.put_u32(remote.unlock_key_index);
            buf.put_u32(remote.cleaning_key_index);
            buf.put_u32(remote.config_key_index);
            buf.put_u16(remote.break_duration_minutes);
        }
    }

    seal(buf.to_vec())
}

/// Decode and verify a sealed session blob
pub fn decode_session(frame: &[u8]) -> IntegrityResult<LockSession> {
    let mut buf = unseal(frame)?;

    let version = take_u8(&mut buf)?;
    if version != SESSION_FORMAT_VERSION {
        return Err(IntegrityError::UnsupportedVersion(version));
    }

    let lock_type_byte = take_u8(&mut buf)?;
    let lock_type = LockType::from_u8(lock_type_byte)
        .ok_or_else(|| malformed(format!("unknown lock type {lock_type_byte}")))?;
    let state_byte = take_u8(&mut buf)?;
    let operational_state = OperationalState::from_u8(state_byte)
        .ok_or_else(|| malformed(format!("unknown operational state {state_byte}")))?;

    let lock_start_utc = take_u32(&mut buf)?;
    let unlock_target_utc = take_u32(&mut buf)?;
    let session_accumulated_seconds = take_u32(&mut buf)?;
    let accrual_baseline_utc = take_u32(&mut buf)?;
    let break_start_utc = take_u32(&mut buf)?;
    let break_allowed_seconds = take_u16(&mut buf)?;

    let mode_config = match lock_type {
        LockType::None => ModeConfig::None,
        LockType::Agent => {
            let id = take_u8(&mut buf)?;
            let agent_id = AgentPersonality::from_u8(id)
                .ok_or_else(|| malformed(format!("unknown agent {id}")))?;
            ModeConfig::Agent(AgentConfig {
                agent_id,
                duration_seconds: take_u32(&mut buf)?,
            })
        }
        LockType::Custom => {
            let duration_seconds = take_u32(&mut buf)?;
            let num_games = usize::from(take_u8(&mut buf)?);
            let slots = take_fixed(&mut buf, MAX_GAMES)?;
            if num_games > MAX_GAMES {
                return Err(malformed(format!("{num_games} games exceeds {MAX_GAMES}")));
            }
            ModeConfig::Custom(CustomConfig {
                duration_seconds,
                game_ids: slots[..num_games].to_vec(),
            })
        }
        LockType::KeyholderBasic => {
            let pin = take_string(&mut buf, PIN_LENGTH, "pin")?;
            ModeConfig::KeyholderBasic(KeyholderBasicConfig { pin })
        }
        LockType::KeyholderRemote => {
            let service_id = take_string(&mut buf, SERVICE_ID_MAX_LEN, "service id")?;
            ModeConfig::KeyholderRemote(KeyholderRemoteConfig {
                service_id,
                identicon_seed: take_u16(&mut buf)?,
                unlock_key_index: take_u32(&mut buf)?,
                cleaning_key_index: take_u32(&mut buf)?,
                config_key_index: take_u32(&mut buf)?,
                break_duration_minutes: take_u16(&mut buf)?,
            })
        }
    };

    if buf.has_remaining() {
        return Err(malformed(format!("{} trailing bytes", buf.remaining())));
    }

    Ok(LockSession {
        operational_state,
        mode_config,
        lock_start_utc,
        unlock_target_utc,
        session_accumulated_seconds,
        accrual_baseline_utc,
        break_start_utc,
        break_allowed_seconds,
    })
}

/// Encode lifetime counters into a sealed blob
pub fn encode_counters(counters: &TimeCounters) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(1 + 6 * 8 + 2);
    buf.put_u8(COUNTERS_FORMAT_VERSION);
    for value in counters.as_array() {
        buf.put_u64(value);
    }
    seal(buf.to_vec())
}

/// Decode and verify a sealed counters blob
pub fn decode_counters(frame: &[u8]) -> IntegrityResult<TimeCounters> {
    let mut buf = unseal(frame)?;

    let version = take_u8(&mut buf)?;
    if version != COUNTERS_FORMAT_VERSION {
        return Err(IntegrityError::UnsupportedVersion(version));
    }

    let mut buckets = [0u64; 6];
    for slot in &mut buckets {
        if buf.remaining() < 8 {
            return Err(truncated());
        }
        *slot = buf.get_u64();
    }

    if buf.has_remaining() {
        return Err(malformed(format!("{} trailing bytes", buf.remaining())));
    }

    Ok(TimeCounters::from_array(buckets))
}

/// Failure to load a persisted aggregate
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

/// Read and verify the session blob; `None` if it was never written
pub fn load_session(store: &dyn PersistenceStore, key: &str) -> Result<Option<LockSession>, LoadError> {
    match store.read(key)? {
        Some(bytes) => Ok(Some(decode_session(&bytes)?)),
        None => {
            debug!(key, "No persisted session");
            Ok(None)
        }
    }
}

/// Read and verify the counters blob; `None` if it was never written
pub fn load_counters(
    store: &dyn PersistenceStore,
    key: &str,
) -> Result<Option<TimeCounters>, LoadError> {
    match store.read(key)? {
        Some(bytes) => Ok(Some(decode_counters(&bytes)?)),
        None => {
            debug!(key, "No persisted counters");
            Ok(None)
        }
    }
}

pub fn save_session(store: &dyn PersistenceStore, key: &str, session: &LockSession) -> StoreResult<()> {
    store.write(key, &encode_session(session))
}

fn put_fixed(buf: &mut BytesMut, data: &[u8], width: usize) {
    buf.put_slice(data);
    buf.put_bytes(0, width - data.len());
}

fn malformed(message: String) -> IntegrityError {
    IntegrityError::Malformed(message)
}

fn truncated() -> IntegrityError {
    malformed("unexpected end of blob".to_string())
}

fn take_u8(buf: &mut &[u8]) -> IntegrityResult<u8> {
    if buf.remaining() < 1 {
        return Err(truncated());
    }
    Ok(buf.get_u8())
}

fn take_u16(buf: &mut &[u8]) -> IntegrityResult<u16> {
    if buf.remaining() < 2 {
        return Err(truncated());
    }
    Ok(buf.get_u16())
}

fn take_u32(buf: &mut &[u8]) -> IntegrityResult<u32> {
    if buf.remaining() < 4 {
        return Err(truncated());
    }
    Ok(buf.get_u32())
}

fn take_fixed<'a>(buf: &mut &'a [u8], width: usize) -> IntegrityResult<&'a [u8]> {
    if buf.len() < width {
        return Err(truncated());
    }
    let (slot, rest) = buf.split_at(width);
    *buf = rest;
    Ok(slot)
}

/// Length-prefixed string in a zero-padded slot
fn take_string(buf: &mut &[u8], width: usize, what: &str) -> IntegrityResult<String> {
    let len = usize::from(take_u8(buf)?);
    let slot = take_fixed(buf, width)?;
    if len > width {
        return Err(malformed(format!("{what} length {len} exceeds {width}")));
    }
    String::from_utf8(slot[..len].to_vec())
        .map_err(|_| malformed(format!("{what} is not valid UTF-8")))
}
