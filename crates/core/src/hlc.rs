use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::CoreError;

pub const MAX_DRIFT_MS: u64 = 300_000; // 5 minutes

/// Current wall-clock time as milliseconds since Unix epoch.
pub fn physical_now() -> Result<u64, CoreError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .map_err(|_| CoreError::InvalidData("system clock before epoch".into()))
}

/// A 12-byte Hybrid Logical Clock timestamp: 8 bytes wall_ms (big-endian
/// u64) followed by 4 bytes counter (big-endian u32). Byte order equals
/// timestamp order.
///
/// Stamped onto every `created`/`modified` audit entry; also the basis of
/// the latest-timestamp-wins merge policy during conflict resolution, which
/// stays meaningful even when replicas carry skewed wall clocks.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct Hlc {
    wall_ms: u64,
    counter: u32,
}

impl Hlc {
    pub fn new(wall_ms: u64, counter: u32) -> Self {
        Self { wall_ms, counter }
    }

    pub fn wall_ms(&self) -> u64 {
        self.wall_ms
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn to_bytes(&self) -> [u8; 12] {
        let mut buf = [0u8; 12];
        buf[..8].copy_from_slice(&self.wall_ms.to_be_bytes());
        buf[8..].copy_from_slice(&self.counter.to_be_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; 12]) -> Self {
        let wall_ms = u64::from_be_bytes(bytes[..8].try_into().unwrap());
        let counter = u32::from_be_bytes(bytes[8..].try_into().unwrap());
        Self { wall_ms, counter }
    }
}

impl Ord for Hlc {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_bytes().cmp(&other.to_bytes())
    }
}

impl PartialOrd for Hlc {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Hlc {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for Hlc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        let arr: [u8; 12] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| serde::de::Error::invalid_length(v.len(), &"12 bytes"))?;
        Ok(Hlc::from_bytes(&arr))
    }
}

/// Generates monotonically increasing HLC timestamps for one process.
pub struct HlcClock {
    wall_ms: u64,
    counter: u32,
}

impl HlcClock {
    pub fn new() -> Self {
        Self {
            wall_ms: 0,
            counter: 0,
        }
    }

    /// Next timestamp, strictly greater than all previously issued ones.
    pub fn tick(&mut self) -> Result<Hlc, CoreError> {
        let now = physical_now()?;
        let hlc = if now > self.wall_ms {
            Hlc::new(now, 0)
        } else {
            Hlc::new(self.wall_ms, self.counter + 1)
        };
        self.wall_ms = hlc.wall_ms;
        self.counter = hlc.counter;
        Ok(hlc)
    }

    /// Merge with a timestamp observed on a replicated document, producing
    /// a timestamp greater than both. Remote timestamps more than
    /// `MAX_DRIFT_MS` ahead of the local wall clock are rejected.
    pub fn receive(&mut self, remote: &Hlc) -> Result<Hlc, CoreError> {
        let now = physical_now()?;
        if remote.wall_ms > now + MAX_DRIFT_MS {
            return Err(CoreError::HlcDriftTooLarge {
                delta_ms: remote.wall_ms - now,
                max_ms: MAX_DRIFT_MS,
            });
        }

        let wall_ms = now.max(self.wall_ms).max(remote.wall_ms);
        let counter = if wall_ms == now && wall_ms > self.wall_ms && wall_ms > remote.wall_ms {
            0
        } else {
            let local = if wall_ms == self.wall_ms { self.counter } else { 0 };
            let theirs = if wall_ms == remote.wall_ms { remote.counter } else { 0 };
            local.max(theirs) + 1
        };

        let hlc = Hlc::new(wall_ms, counter);
        self.wall_ms = hlc.wall_ms;
        self.counter = hlc.counter;
        Ok(hlc)
    }
}

impl Default for HlcClock {
    fn default() -> Self {
        Self::new()
    }
}
