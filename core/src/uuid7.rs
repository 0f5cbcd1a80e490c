//! UUIDv7 generation and validation.
//!
//! Layout (RFC 9562, "method 1" counter):
//!
//! ```text
//!  0                   1                   2                   3
//! |          unix_ts_ms (48 bits)         |ver=7| counter (12 bits) |
//! |var=10|             random (62 bits)                             |
//! ```
//!
//! The counter is re-seeded from entropy whenever the millisecond advances
//! and incremented otherwise, so ids from one process are strictly
//! increasing even inside a single millisecond. Counter overflow borrows
//! the next millisecond; a clock that steps backwards keeps the last
//! emitted timestamp.

use std::sync::Mutex;

use rand::RngCore;
use uuid::{Uuid, Variant};

use crate::clock::Clock;

const COUNTER_MAX: u16 = 0x0FFF;
/// Seeds leave the top counter bit clear so a millisecond always has room
/// for at least 2048 increments.
const COUNTER_SEED_MASK: u16 = 0x07FF;

#[derive(Debug, Default)]
struct GeneratorState {
    last_ms: Option<u64>,
    counter: u16,
}

/// Monotonic UUIDv7 generator.
#[derive(Debug)]
pub struct Uuid7Generator {
    state: Mutex<GeneratorState>,
}

static GLOBAL: Uuid7Generator = Uuid7Generator::new();

impl Default for Uuid7Generator {
    fn default() -> Self {
        Self::new()
    }
}

impl Uuid7Generator {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(GeneratorState {
                last_ms: None,
                counter: 0,
            }),
        }
    }

    /// Generate one id for wall-clock millisecond `now_ms`.
    pub fn generate(&self, now_ms: u64, rng: &mut impl RngCore) -> Uuid {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let (ms, counter) = match state.last_ms {
            Some(last) if now_ms <= last => {
                if state.counter < COUNTER_MAX {
                    (last, state.counter + 1)
                } else {
                    (last + 1, seed_counter(rng))
                }
            }
            _ => (now_ms, seed_counter(rng)),
        };
        state.last_ms = Some(ms);
        state.counter = counter;
        drop(state);

        let mut bytes = [0u8; 16];
        bytes[..6].copy_from_slice(&ms.to_be_bytes()[2..]);
        bytes[6] = 0x70 | ((counter >> 8) as u8 & 0x0F);
        bytes[7] = (counter & 0xFF) as u8;
        rng.fill_bytes(&mut bytes[8..]);
        bytes[8] = (bytes[8] & 0x3F) | 0x80;
        Uuid::from_bytes(bytes)
    }
}

fn seed_counter(rng: &mut impl RngCore) -> u16 {
    (rng.next_u32() as u16) & COUNTER_SEED_MASK
}

/// New lowercase canonical UUIDv7 from the process-wide generator.
pub fn new_uuid7(clock: &dyn Clock) -> String {
    let now_ms = u64::try_from(clock.now().timestamp_millis()).unwrap_or(0);
    GLOBAL
        .generate(now_ms, &mut rand::rng())
        .hyphenated()
        .to_string()
}

/// True when `s` is exactly the lowercase 8-4-4-4-12 hex spelling.
pub fn is_canonical_uuid(s: &str) -> bool {
    s.len() == 36
        && s.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_digit() || ('a'..='f').contains(&c),
        })
}

/// True when `s` is a canonical lowercase UUID of version 7, RFC variant.
pub fn is_uuid7(s: &str) -> bool {
    if !is_canonical_uuid(s) {
        return false;
    }
    Uuid::parse_str(s)
        .is_ok_and(|u| u.get_version_num() == 7 && u.get_variant() == Variant::RFC4122)
}

/// Canonical spelling of any UUID notation the `uuid` crate accepts
/// (uppercase, braced, urn, simple). `None` when `s` is not a UUID at all.
pub fn canonicalize_uuid(s: &str) -> Option<String> {
    Uuid::try_parse(s.trim())
        .ok()
        .map(|u| u.hyphenated().to_string())
}

/// Milliseconds since the epoch embedded in a UUIDv7.
pub fn uuid7_timestamp_ms(s: &str) -> Option<u64> {
    if !is_uuid7(s) {
        return None;
    }
    let uuid = Uuid::parse_str(s).ok()?;
    let mut ms = [0u8; 8];
    ms[2..].copy_from_slice(&uuid.as_bytes()[..6]);
    Some(u64::from_be_bytes(ms))
}
