//! IEC 60870-5-104 Cause of Transmission (COT).
//!
//! Only the lower 6 bits of the COT octet carry the cause; the test (T) and
//! negative (P/N) flags live in bits 7 and 6 and are handled by
//! [`AsduHeader`](super::AsduHeader).

use crate::error::{Iec104Error, Result};

/// Mask selecting the cause bits of the COT octet.
pub const COT_MASK: u8 = 0x3F;

/// Test flag in the COT octet.
pub const COT_TEST_FLAG: u8 = 0x80;

/// Negative confirmation flag in the COT octet.
pub const COT_NEGATIVE_FLAG: u8 = 0x40;

/// Cause of Transmission (COT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cot {
    /// Periodic, cyclic (1)
    Periodic,
    /// Background scan (2)
    Background,
    /// Spontaneous (3)
    Spontaneous,
    /// Initialized (4)
    Initialized,
    /// Request or requested (5)
    Request,
    /// Activation (6)
    Activation,
    /// Activation confirmation (7)
    ActivationConfirm,
    /// Deactivation (8)
    Deactivation,
    /// Deactivation confirmation (9)
    DeactivationConfirm,
    /// Activation termination (10)
    ActivationTermination,
    /// Return information caused by a remote command (11)
    ReturnRemoteCommand,
    /// Return information caused by a local command (12)
    ReturnLocalCommand,
    /// File transfer (13)
    FileTransfer,
    /// Interrogated by station interrogation (20)
    InterrogatedByStation,
    /// Interrogated by group 1..16 interrogation (21-36)
    InterrogatedByGroup(u8),
    /// Requested by general counter request (37)
    RequestedByGeneralCounter,
    /// Requested by group 1..4 counter request (38-41)
    RequestedByGroupCounter(u8),
    /// Unknown type identification (44)
    UnknownTypeId,
    /// Unknown cause of transmission (45)
    UnknownCot,
    /// Unknown common address of ASDU (46)
    UnknownCommonAddress,
    /// Unknown information object address (47)
    UnknownIoa,
}

impl Cot {
    /// Create COT from raw byte value (flags in the upper bits are ignored).
    pub fn from_u8(value: u8) -> Result<Self> {
        let cause = value & COT_MASK;
        match cause {
            1 => Ok(Self::Periodic),
            2 => Ok(Self::Background),
            3 => Ok(Self::Spontaneous),
            4 => Ok(Self::Initialized),
            5 => Ok(Self::Request),
            6 => Ok(Self::Activation),
            7 => Ok(Self::ActivationConfirm),
            8 => Ok(Self::Deactivation),
            9 => Ok(Self::DeactivationConfirm),
            10 => Ok(Self::ActivationTermination),
            11 => Ok(Self::ReturnRemoteCommand),
            12 => Ok(Self::ReturnLocalCommand),
            13 => Ok(Self::FileTransfer),
            20 => Ok(Self::InterrogatedByStation),
            21..=36 => Ok(Self::InterrogatedByGroup(cause - 20)),
            37 => Ok(Self::RequestedByGeneralCounter),
            38..=41 => Ok(Self::RequestedByGroupCounter(cause - 37)),
            44 => Ok(Self::UnknownTypeId),
            45 => Ok(Self::UnknownCot),
            46 => Ok(Self::UnknownCommonAddress),
            47 => Ok(Self::UnknownIoa),
            _ => Err(Iec104Error::UnknownCot(cause)),
        }
    }

    /// Convert to raw cause value.
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Periodic => 1,
            Self::Background => 2,
            Self::Spontaneous => 3,
            Self::Initialized => 4,
            Self::Request => 5,
            Self::Activation => 6,
            Self::ActivationConfirm => 7,
            Self::Deactivation => 8,
            Self::DeactivationConfirm => 9,
            Self::ActivationTermination => 10,
            Self::ReturnRemoteCommand => 11,
            Self::ReturnLocalCommand => 12,
            Self::FileTransfer => 13,
            Self::InterrogatedByStation => 20,
            Self::InterrogatedByGroup(group) => 20 + group,
            Self::RequestedByGeneralCounter => 37,
            Self::RequestedByGroupCounter(group) => 37 + group,
            Self::UnknownTypeId => 44,
            Self::UnknownCot => 45,
            Self::UnknownCommonAddress => 46,
            Self::UnknownIoa => 47,
        }
    }

    /// Check if this is one of the "unknown ..." mirror causes.
    pub const fn is_negative(&self) -> bool {
        matches!(
            self,
            Self::UnknownTypeId | Self::UnknownCot | Self::UnknownCommonAddress | Self::UnknownIoa
        )
    }

    /// Check if this COT indicates an interrogation response.
    pub const fn is_interrogation_response(&self) -> bool {
        matches!(self.as_u8(), 20..=36)
    }
}

impl std::fmt::Display for Cot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InterrogatedByGroup(group) => write!(f, "InterrogatedByGroup{}", group),
            Self::RequestedByGroupCounter(group) => write!(f, "RequestedByGroup{}Counter", group),
            other => write!(f, "{:?}", other),
        }
    }
}
