//! Outstation configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Iec104Error, Result};

/// Default IEC 104 port.
pub const DEFAULT_PORT: u16 = 2404;

/// Default common address of ASDU.
pub const DEFAULT_COMMON_ADDRESS: u16 = 7720;

/// Default T0 timeout (connection establishment / write) in seconds.
pub const DEFAULT_T0_TIMEOUT: u64 = 30;

/// Default T1 timeout (send confirmation) in seconds.
pub const DEFAULT_T1_TIMEOUT: u64 = 15;

/// Default T2 timeout (deferred acknowledgement) in seconds.
pub const DEFAULT_T2_TIMEOUT: u64 = 10;

/// Default T3 timeout (idle test frame) in seconds.
pub const DEFAULT_T3_TIMEOUT: u64 = 20;

/// Default W parameter (received I-frames before an S-frame is forced).
pub const DEFAULT_W: u16 = 8;

/// Default and largest frame size (start byte through last ASDU octet).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 255;

/// Smallest frame size that still holds one object of every interrogated category.
pub const MIN_MAX_FRAME_SIZE: usize = 20;

/// Default number of ASDUs held back while data transfer is stopped.
pub const DEFAULT_PRE_DT_CAPACITY: usize = 50;

/// Outstation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (host:port)
    pub bind_address: String,
    /// Common address of ASDU served by this outstation
    pub common_address: u16,
    /// T0: bound on each socket write
    #[serde(with = "duration_secs")]
    pub t0_timeout: Duration,
    /// T1: time to wait for the peer to acknowledge a sent frame
    #[serde(with = "duration_secs")]
    pub t1_timeout: Duration,
    /// T2: time before received I-frames are acknowledged with an S-frame
    #[serde(with = "duration_secs")]
    pub t2_timeout: Duration,
    /// T3: idle time before a TESTFR act is sent
    #[serde(with = "duration_secs")]
    pub t3_timeout: Duration,
    /// W parameter: received I-frames before an S-frame is sent immediately
    pub w: u16,
    /// Largest frame the interrogation packer may produce
    pub max_frame_size: usize,
    /// Capacity of the buffer holding ASDUs until STARTDT
    pub pre_dt_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{}", DEFAULT_PORT),
            common_address: DEFAULT_COMMON_ADDRESS,
            t0_timeout: Duration::from_secs(DEFAULT_T0_TIMEOUT),
            t1_timeout: Duration::from_secs(DEFAULT_T1_TIMEOUT),
            t2_timeout: Duration::from_secs(DEFAULT_T2_TIMEOUT),
            t3_timeout: Duration::from_secs(DEFAULT_T3_TIMEOUT),
            w: DEFAULT_W,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            pre_dt_capacity: DEFAULT_PRE_DT_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Create a new configuration listening on the given address.
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self {
            bind_address: bind_address.into(),
            ..Self::default()
        }
    }

    /// Set common address.
    pub fn common_address(mut self, common_address: u16) -> Self {
        self.common_address = common_address;
        self
    }

    /// Set T0 timeout.
    pub fn t0_timeout(mut self, timeout: Duration) -> Self {
        self.t0_timeout = timeout;
        self
    }

    /// Set T1 timeout.
    pub fn t1_timeout(mut self, timeout: Duration) -> Self {
        self.t1_timeout = timeout;
        self
    }

    /// Set T2 timeout.
    pub fn t2_timeout(mut self, timeout: Duration) -> Self {
        self.t2_timeout = timeout;
        self
    }

    /// Set T3 timeout.
    pub fn t3_timeout(mut self, timeout: Duration) -> Self {
        self.t3_timeout = timeout;
        self
    }

    /// Set W parameter.
    pub fn w(mut self, w: u16) -> Self {
        self.w = w;
        self
    }

    /// Set maximum frame size.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set pre-DT buffer capacity.
    pub fn pre_dt_capacity(mut self, capacity: usize) -> Self {
        self.pre_dt_capacity = capacity;
        self
    }

    /// Check parameter consistency.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("T0", self.t0_timeout),
            ("T1", self.t1_timeout),
            ("T2", self.t2_timeout),
            ("T3", self.t3_timeout),
        ] {
            if value.is_zero() {
                return Err(Iec104Error::Config(format!("{} must be non-zero", name)));
            }
        }
        if self.t2_timeout > self.t1_timeout {
            return Err(Iec104Error::Config(format!(
                "T2 ({:?}) must not exceed T1 ({:?})",
                self.t2_timeout, self.t1_timeout
            )));
        }
        if self.w == 0 {
            return Err(Iec104Error::config("W must be at least 1"));
        }
        if !(MIN_MAX_FRAME_SIZE..=DEFAULT_MAX_FRAME_SIZE).contains(&self.max_frame_size) {
            return Err(Iec104Error::Config(format!(
                "max frame size {} outside {}..={}",
                self.max_frame_size, MIN_MAX_FRAME_SIZE, DEFAULT_MAX_FRAME_SIZE
            )));
        }
        if self.pre_dt_capacity == 0 {
            return Err(Iec104Error::config("pre-DT capacity must be at least 1"));
        }
        Ok(())
    }
}

/// Durations as (fractional) seconds.
mod duration_secs {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
