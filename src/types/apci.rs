//! IEC 60870-5-104 APCI (Application Protocol Control Information).
//!
//! APCI is the 6-byte header of an APDU, containing frame type and sequence numbers.
//!
//! Sequence numbers are kept exactly as they travel in the control field: a
//! 16-bit little-endian value whose least significant bit is the I-format
//! marker. Only even values are therefore valid, and every numbered frame
//! advances the counter by [`SEQ_STEP`], wrapping from 65534 to 0.

use crate::error::{Iec104Error, Result};

/// Start byte for IEC 104 frames.
pub const START_BYTE: u8 = 0x68;

/// Minimum APDU length (APCI only, no ASDU).
pub const MIN_APDU_LENGTH: usize = 4;

/// Maximum APDU length.
pub const MAX_APDU_LENGTH: usize = 253;

/// Size of start byte, length byte and the four control octets.
pub const APCI_SIZE: usize = 6;

/// Increment applied to a sequence field per numbered frame.
pub const SEQ_STEP: u16 = 2;

/// Advance a sequence field by one frame.
#[inline]
pub const fn next_seq(seq: u16) -> u16 {
    seq.wrapping_add(SEQ_STEP)
}

/// Check whether `a` comes strictly before `b` in modulo-65536 sequence order.
#[inline]
pub const fn seq_before(a: u16, b: u16) -> bool {
    let distance = b.wrapping_sub(a);
    distance != 0 && distance <= 0x8000
}

/// APCI frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// I-frame: Information transfer
    IFrame,
    /// S-frame: Supervisory (acknowledgment)
    SFrame,
    /// U-frame: Unnumbered (control)
    UFrame,
}

/// U-frame function codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UFunction {
    /// STARTDT act (Start Data Transfer activation)
    StartDtAct,
    /// STARTDT con (Start Data Transfer confirmation)
    StartDtCon,
    /// STOPDT act (Stop Data Transfer activation)
    StopDtAct,
    /// STOPDT con (Stop Data Transfer confirmation)
    StopDtCon,
    /// TESTFR act (Test Frame activation)
    TestFrAct,
    /// TESTFR con (Test Frame confirmation)
    TestFrCon,
}

impl UFunction {
    /// Get the control field byte for this U-function.
    #[inline]
    pub const fn control_byte(&self) -> u8 {
        match self {
            Self::StartDtAct => 0x07, // 0000 0111
            Self::StartDtCon => 0x0B, // 0000 1011
            Self::StopDtAct => 0x13,  // 0001 0011
            Self::StopDtCon => 0x23,  // 0010 0011
            Self::TestFrAct => 0x43,  // 0100 0011
            Self::TestFrCon => 0x83,  // 1000 0011
        }
    }

    /// Parse U-function from control byte.
    ///
    /// Exactly one function bit may be set; any other pattern is rejected.
    #[inline]
    pub fn from_control_byte(byte: u8) -> Result<Self> {
        match byte {
            0x07 => Ok(Self::StartDtAct),
            0x0B => Ok(Self::StartDtCon),
            0x13 => Ok(Self::StopDtAct),
            0x23 => Ok(Self::StopDtCon),
            0x43 => Ok(Self::TestFrAct),
            0x83 => Ok(Self::TestFrCon),
            _ => Err(Iec104Error::FrameSyntax(format!(
                "invalid U-frame control byte 0x{:02X}",
                byte
            ))),
        }
    }

    /// Human readable name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StartDtAct => "STARTDT act",
            Self::StartDtCon => "STARTDT con",
            Self::StopDtAct => "STOPDT act",
            Self::StopDtCon => "STOPDT con",
            Self::TestFrAct => "TESTFR act",
            Self::TestFrCon => "TESTFR con",
        }
    }
}

/// APCI (Application Protocol Control Information).
///
/// The 6-byte header of an IEC 104 APDU.
///
/// ```text
/// +--------+--------+--------+--------+--------+--------+
/// | 0x68   | Length | CF1    | CF2    | CF3    | CF4    |
/// +--------+--------+--------+--------+--------+--------+
///   Start    APDU     Control Field (4 bytes)
///   Byte     Length
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Apci {
    /// I-frame with send and receive sequence fields.
    IFrame {
        /// Send sequence field (even, 0-65534)
        send_seq: u16,
        /// Receive sequence field (even, 0-65534)
        recv_seq: u16,
    },
    /// S-frame with receive sequence field only.
    SFrame {
        /// Receive sequence field (even, 0-65534)
        recv_seq: u16,
    },
    /// U-frame with function code.
    UFrame {
        /// U-frame function
        function: UFunction,
    },
}

impl Apci {
    /// Create a new I-frame APCI.
    #[inline]
    pub fn i_frame(send_seq: u16, recv_seq: u16) -> Self {
        Self::IFrame { send_seq, recv_seq }
    }

    /// Create a new S-frame APCI.
    #[inline]
    pub fn s_frame(recv_seq: u16) -> Self {
        Self::SFrame { recv_seq }
    }

    /// Create a new U-frame APCI.
    #[inline]
    pub fn u_frame(function: UFunction) -> Self {
        Self::UFrame { function }
    }

    /// Get the frame type.
    #[inline]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::IFrame { .. } => FrameType::IFrame,
            Self::SFrame { .. } => FrameType::SFrame,
            Self::UFrame { .. } => FrameType::UFrame,
        }
    }

    /// Parse APCI from the 4-byte control field.
    pub fn parse(control: &[u8]) -> Result<Self> {
        if control.len() < 4 {
            return Err(Iec104Error::frame_syntax("control field too short"));
        }

        let cf1 = control[0];

        if cf1 & 0x01 == 0 {
            // I-frame: bit 0 = 0
            let send_seq = u16::from_le_bytes([control[0], control[1]]);
            let recv_seq = u16::from_le_bytes([control[2], control[3]]);
            if recv_seq & 0x01 != 0 {
                return Err(Iec104Error::frame_syntax("odd receive sequence in I-frame"));
            }
            Ok(Self::IFrame { send_seq, recv_seq })
        } else if cf1 & 0x03 == 0x01 {
            // S-frame: octet 1 is exactly 0x01, octet 2 is zero
            if cf1 != 0x01 || control[1] != 0x00 {
                return Err(Iec104Error::FrameSyntax(format!(
                    "invalid S-frame control octets 0x{:02X} 0x{:02X}",
                    cf1, control[1]
                )));
            }
            let recv_seq = u16::from_le_bytes([control[2], control[3]]);
            if recv_seq & 0x01 != 0 {
                return Err(Iec104Error::frame_syntax("odd receive sequence in S-frame"));
            }
            Ok(Self::SFrame { recv_seq })
        } else {
            // U-frame: bits 0-1 = 11, trailing octets zero
            let function = UFunction::from_control_byte(cf1)?;
            if control[1..4].iter().any(|b| *b != 0) {
                return Err(Iec104Error::frame_syntax("nonzero trailing octets in U-frame"));
            }
            Ok(Self::UFrame { function })
        }
    }

    /// Encode APCI to 4 bytes of control field.
    #[inline]
    pub fn encode(&self) -> [u8; 4] {
        match self {
            Self::IFrame { send_seq, recv_seq } => {
                let s = (send_seq & !0x01).to_le_bytes();
                let r = (recv_seq & !0x01).to_le_bytes();
                [s[0], s[1], r[0], r[1]]
            }
            Self::SFrame { recv_seq } => {
                let r = (recv_seq & !0x01).to_le_bytes();
                [0x01, 0x00, r[0], r[1]]
            }
            Self::UFrame { function } => [function.control_byte(), 0x00, 0x00, 0x00],
        }
    }

    /// Encode full APDU header (6 bytes: start + length + control).
    ///
    /// `asdu_len` is the length of the ASDU that follows (0 for S-frame and U-frame).
    #[inline]
    pub fn encode_header(&self, asdu_len: usize) -> [u8; 6] {
        let control = self.encode();
        let apdu_len = (MIN_APDU_LENGTH + asdu_len) as u8;
        [
            START_BYTE, apdu_len, control[0], control[1], control[2], control[3],
        ]
    }

    /// Check if this is an I-frame.
    #[inline]
    pub fn is_i_frame(&self) -> bool {
        matches!(self, Self::IFrame { .. })
    }

    /// Check if this is an S-frame.
    #[inline]
    pub fn is_s_frame(&self) -> bool {
        matches!(self, Self::SFrame { .. })
    }

    /// Check if this is a U-frame.
    #[inline]
    pub fn is_u_frame(&self) -> bool {
        matches!(self, Self::UFrame { .. })
    }

    /// Get the send sequence number (I-frame only).
    #[inline]
    pub fn send_seq(&self) -> Option<u16> {
        match self {
            Self::IFrame { send_seq, .. } => Some(*send_seq),
            _ => None,
        }
    }

    /// Get the receive sequence number (I-frame and S-frame).
    #[inline]
    pub fn recv_seq(&self) -> Option<u16> {
        match self {
            Self::IFrame { recv_seq, .. } | Self::SFrame { recv_seq } => Some(*recv_seq),
            _ => None,
        }
    }
}

impl std::fmt::Display for Apci {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IFrame { send_seq, recv_seq } => {
                write!(f, "I(S={}, R={})", send_seq, recv_seq)
            }
            Self::SFrame { recv_seq } => write!(f, "S(R={})", recv_seq),
            Self::UFrame { function } => write!(f, "U({})", function.name()),
        }
    }
}
