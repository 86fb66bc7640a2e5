//! Information elements carried by information objects.
//!
//! Each [`TypeId`] maps to one element layout plus an optional time tag. The
//! mapping is a fixed table ([`Layout::of`]), and every layout has a dedicated
//! pack/unpack pair in this module.

use bytes::{BufMut, BytesMut};

use crate::error::{Iec104Error, Result};
use crate::types::{PointValue, TypeId};

/// Quality bits shared by SIQ, DIQ and QDS octets.
///
/// Bits are stored at their wire positions: IV(7) NT(6) SB(5) BL(4) and, for
/// measured values only, OV(0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quality(u8);

impl Quality {
    const OV: u8 = 0x01;
    const BL: u8 = 0x10;
    const SB: u8 = 0x20;
    const NT: u8 = 0x40;
    const IV: u8 = 0x80;
    const STATUS_MASK: u8 = 0xF0;
    const QDS_MASK: u8 = 0xF1;

    /// Good quality (no flags set).
    pub const GOOD: Self = Self(0);

    /// Invalid quality.
    pub const INVALID: Self = Self(Self::IV);

    /// Quality flags of an SIQ/DIQ octet.
    #[inline]
    pub const fn from_status(byte: u8) -> Self {
        Self(byte & Self::STATUS_MASK)
    }

    /// Quality flags of a QDS octet.
    #[inline]
    pub const fn from_qds(byte: u8) -> Self {
        Self(byte & Self::QDS_MASK)
    }

    /// Raw wire bits.
    #[inline]
    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn overflow(&self) -> bool {
        self.0 & Self::OV != 0
    }

    pub const fn blocked(&self) -> bool {
        self.0 & Self::BL != 0
    }

    pub const fn substituted(&self) -> bool {
        self.0 & Self::SB != 0
    }

    pub const fn not_topical(&self) -> bool {
        self.0 & Self::NT != 0
    }

    pub const fn invalid(&self) -> bool {
        self.0 & Self::IV != 0
    }

    /// Check if the quality is good (all flags false).
    pub const fn is_good(&self) -> bool {
        self.0 == 0
    }
}

/// Double-point information value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoublePointValue {
    /// Indeterminate or intermediate (00)
    Indeterminate = 0,
    /// Determined OFF (01)
    Off = 1,
    /// Determined ON (10)
    On = 2,
    /// Indeterminate (11)
    IndeterminateOrFaulty = 3,
}

impl DoublePointValue {
    /// Parse from byte (lower 2 bits).
    pub fn from_u8(value: u8) -> Self {
        match value & 0x03 {
            0 => Self::Indeterminate,
            1 => Self::Off,
            2 => Self::On,
            _ => Self::IndeterminateOrFaulty,
        }
    }

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Command qualifier shared by SCO, DCO and RCO octets.
///
/// ```text
/// bit 7: S/E (1 = select, 0 = execute)
/// bits 2-6: QU (qualifier of command)
/// bits 0-1: command state
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandQualifier {
    /// Select (true) or execute (false)
    pub select: bool,
    /// Qualifier of command (0-31)
    pub qu: u8,
}

impl CommandQualifier {
    fn from_octet(byte: u8) -> Self {
        Self {
            select: byte & 0x80 != 0,
            qu: (byte >> 2) & 0x1F,
        }
    }

    fn bits(&self) -> u8 {
        ((self.qu & 0x1F) << 2) | if self.select { 0x80 } else { 0 }
    }
}

/// CP24Time2a timestamp (3 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cp24Time2a {
    /// Milliseconds (0-59999)
    pub milliseconds: u16,
    /// Minutes (0-59)
    pub minutes: u8,
    /// Invalid flag
    pub invalid: bool,
}

impl Cp24Time2a {
    pub const SIZE: usize = 3;

    /// Parse from 3 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Iec104Error::invalid_asdu("CP24Time2a too short"));
        }
        Ok(Self {
            milliseconds: u16::from_le_bytes([bytes[0], bytes[1]]),
            minutes: bytes[2] & 0x3F,
            invalid: bytes[2] & 0x80 != 0,
        })
    }

    /// Encode to 3 bytes.
    pub fn to_bytes(&self) -> [u8; 3] {
        let ms = self.milliseconds.to_le_bytes();
        [
            ms[0],
            ms[1],
            (self.minutes & 0x3F) | if self.invalid { 0x80 } else { 0 },
        ]
    }
}

/// CP56Time2a timestamp (7 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cp56Time2a {
    /// Milliseconds (0-59999)
    pub milliseconds: u16,
    /// Minutes (0-59)
    pub minutes: u8,
    /// Hours (0-23)
    pub hours: u8,
    /// Day of month (1-31)
    pub day: u8,
    /// Day of week (1-7, 1=Monday)
    pub day_of_week: u8,
    /// Month (1-12)
    pub month: u8,
    /// Year (0-99, years since 2000)
    pub year: u8,
    /// Invalid flag
    pub invalid: bool,
    /// Summer time flag
    pub summer_time: bool,
}

impl Cp56Time2a {
    pub const SIZE: usize = 7;

    /// Parse from 7 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Iec104Error::invalid_asdu("CP56Time2a too short"));
        }

        Ok(Self {
            milliseconds: u16::from_le_bytes([bytes[0], bytes[1]]),
            minutes: bytes[2] & 0x3F,
            invalid: bytes[2] & 0x80 != 0,
            hours: bytes[3] & 0x1F,
            summer_time: bytes[3] & 0x80 != 0,
            day: bytes[4] & 0x1F,
            day_of_week: (bytes[4] >> 5) & 0x07,
            month: bytes[5] & 0x0F,
            year: bytes[6] & 0x7F,
        })
    }

    /// Encode to 7 bytes.
    pub fn to_bytes(&self) -> [u8; 7] {
        let ms = self.milliseconds.to_le_bytes();
        [
            ms[0],
            ms[1],
            (self.minutes & 0x3F) | if self.invalid { 0x80 } else { 0 },
            (self.hours & 0x1F) | if self.summer_time { 0x80 } else { 0 },
            (self.day & 0x1F) | ((self.day_of_week & 0x07) << 5),
            self.month & 0x0F,
            self.year & 0x7F,
        ]
    }
}

/// Time tag appended to an information element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeTag {
    /// Three-octet binary time
    Cp24(Cp24Time2a),
    /// Seven-octet binary time
    Cp56(Cp56Time2a),
}

/// Typed information element (the payload following the IOA).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Element {
    /// SIQ
    SinglePoint { value: bool, quality: Quality },
    /// DIQ
    DoublePoint {
        value: DoublePointValue,
        quality: Quality,
    },
    /// VTI + QDS
    StepPosition {
        value: i8,
        transient: bool,
        quality: Quality,
    },
    /// BSI + QDS
    Bitstring { value: u32, quality: Quality },
    /// NVA + QDS
    Normalized { value: i16, quality: Quality },
    /// SVA + QDS
    Scaled { value: i16, quality: Quality },
    /// IEEE STD 754 + QDS
    Float { value: f32, quality: Quality },
    /// BCR
    IntegratedTotal {
        counter: i32,
        sequence: u8,
        carry: bool,
        adjusted: bool,
        invalid: bool,
    },
    /// SCO
    SingleCommand {
        state: bool,
        qualifier: CommandQualifier,
    },
    /// DCO
    DoubleCommand {
        state: u8,
        qualifier: CommandQualifier,
    },
    /// RCO
    RegulatingStep {
        state: u8,
        qualifier: CommandQualifier,
    },
    /// NVA + QOS
    SetpointNormalized { value: i16, qos: u8 },
    /// SVA + QOS
    SetpointScaled { value: i16, qos: u8 },
    /// IEEE STD 754 + QOS
    SetpointFloat { value: f32, qos: u8 },
    /// BSI
    BitstringCommand { value: u32 },
    /// COI
    EndOfInit { coi: u8 },
    /// QOI
    Interrogation { qoi: u8 },
    /// QCC
    CounterInterrogation { qcc: u8 },
    /// No element octets
    Read,
    /// CP56Time2a
    ClockSync { time: Cp56Time2a },
    /// FBP (fixed test bit pattern)
    TestPattern { pattern: u16 },
    /// TSC (test sequence counter)
    TestSequence { counter: u16 },
    /// QRP
    ResetProcess { qrp: u8 },
}

/// Element layout selected by a type identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Siq,
    Diq,
    VtiQds,
    BsiQds,
    NvaQds,
    SvaQds,
    FloatQds,
    Bcr,
    Sco,
    Dco,
    Rco,
    NvaQos,
    SvaQos,
    FloatQos,
    Bsi,
    Coi,
    Qoi,
    Qcc,
    Empty,
    Time56,
    Fbp,
    Tsc,
    Qrp,
}

impl ElementKind {
    /// Encoded size of the element (without IOA or time tag).
    pub const fn size(&self) -> usize {
        match self {
            Self::Siq | Self::Diq | Self::Sco | Self::Dco | Self::Rco => 1,
            Self::Coi | Self::Qoi | Self::Qcc | Self::Qrp => 1,
            Self::VtiQds => 2,
            Self::NvaQds | Self::SvaQds => 3,
            Self::NvaQos | Self::SvaQos => 3,
            Self::Fbp | Self::Tsc => 2,
            Self::BsiQds | Self::FloatQds | Self::FloatQos | Self::Bcr => 5,
            Self::Bsi => 4,
            Self::Empty => 0,
            Self::Time56 => Cp56Time2a::SIZE,
        }
    }
}

/// Time tag layout selected by a type identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeTagKind {
    None,
    Cp24,
    Cp56,
}

impl TimeTagKind {
    pub const fn size(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Cp24 => Cp24Time2a::SIZE,
            Self::Cp56 => Cp56Time2a::SIZE,
        }
    }
}

/// Element and time tag layout of one type identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub element: ElementKind,
    pub time_tag: TimeTagKind,
}

impl Layout {
    const fn new(element: ElementKind, time_tag: TimeTagKind) -> Self {
        Self { element, time_tag }
    }

    /// Look up the layout for a type identification.
    pub const fn of(type_id: TypeId) -> Self {
        use ElementKind as E;
        use TimeTagKind as T;
        match type_id {
            TypeId::SinglePoint => Self::new(E::Siq, T::None),
            TypeId::SinglePointTime24 => Self::new(E::Siq, T::Cp24),
            TypeId::SinglePointTime56 => Self::new(E::Siq, T::Cp56),
            TypeId::DoublePoint => Self::new(E::Diq, T::None),
            TypeId::DoublePointTime24 => Self::new(E::Diq, T::Cp24),
            TypeId::DoublePointTime56 => Self::new(E::Diq, T::Cp56),
            TypeId::StepPosition => Self::new(E::VtiQds, T::None),
            TypeId::Bitstring32 => Self::new(E::BsiQds, T::None),
            TypeId::MeasuredNormalized => Self::new(E::NvaQds, T::None),
            TypeId::MeasuredNormalizedTime24 => Self::new(E::NvaQds, T::Cp24),
            TypeId::MeasuredScaled => Self::new(E::SvaQds, T::None),
            TypeId::MeasuredScaledTime24 => Self::new(E::SvaQds, T::Cp24),
            TypeId::MeasuredFloat => Self::new(E::FloatQds, T::None),
            TypeId::MeasuredFloatTime24 => Self::new(E::FloatQds, T::Cp24),
            TypeId::MeasuredFloatTime56 => Self::new(E::FloatQds, T::Cp56),
            TypeId::IntegratedTotals => Self::new(E::Bcr, T::None),
            TypeId::SingleCommand => Self::new(E::Sco, T::None),
            TypeId::SingleCommandTime56 => Self::new(E::Sco, T::Cp56),
            TypeId::DoubleCommand => Self::new(E::Dco, T::None),
            TypeId::DoubleCommandTime56 => Self::new(E::Dco, T::Cp56),
            TypeId::RegulatingStep => Self::new(E::Rco, T::None),
            TypeId::SetpointNormalized => Self::new(E::NvaQos, T::None),
            TypeId::SetpointScaled => Self::new(E::SvaQos, T::None),
            TypeId::SetpointFloat => Self::new(E::FloatQos, T::None),
            TypeId::SetpointFloatTime56 => Self::new(E::FloatQos, T::Cp56),
            TypeId::Bitstring32Command => Self::new(E::Bsi, T::None),
            TypeId::EndOfInit => Self::new(E::Coi, T::None),
            TypeId::InterrogationCommand => Self::new(E::Qoi, T::None),
            TypeId::CounterInterrogation => Self::new(E::Qcc, T::None),
            TypeId::ReadCommand => Self::new(E::Empty, T::None),
            TypeId::ClockSync => Self::new(E::Time56, T::None),
            TypeId::TestCommand => Self::new(E::Fbp, T::None),
            TypeId::ResetProcess => Self::new(E::Qrp, T::None),
            TypeId::TestCommandTime56 => Self::new(E::Tsc, T::Cp56),
        }
    }

    /// Encoded size of element plus time tag.
    pub const fn size(&self) -> usize {
        self.element.size() + self.time_tag.size()
    }
}

impl Element {
    /// Unpack one element of the given layout from the start of `data`.
    pub fn decode(kind: ElementKind, data: &[u8]) -> Result<Self> {
        if data.len() < kind.size() {
            return Err(Iec104Error::invalid_asdu("data too short for element"));
        }

        let element = match kind {
            ElementKind::Siq => Self::SinglePoint {
                value: data[0] & 0x01 != 0,
                quality: Quality::from_status(data[0]),
            },
            ElementKind::Diq => Self::DoublePoint {
                value: DoublePointValue::from_u8(data[0]),
                quality: Quality::from_status(data[0]),
            },
            ElementKind::VtiQds => {
                // 7-bit two's complement value, bit 7 is the transient flag
                let raw = data[0] & 0x7F;
                let value = ((raw << 1) as i8) >> 1;
                Self::StepPosition {
                    value,
                    transient: data[0] & 0x80 != 0,
                    quality: Quality::from_qds(data[1]),
                }
            }
            ElementKind::BsiQds => Self::Bitstring {
                value: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
                quality: Quality::from_qds(data[4]),
            },
            ElementKind::NvaQds => Self::Normalized {
                value: i16::from_le_bytes([data[0], data[1]]),
                quality: Quality::from_qds(data[2]),
            },
            ElementKind::SvaQds => Self::Scaled {
                value: i16::from_le_bytes([data[0], data[1]]),
                quality: Quality::from_qds(data[2]),
            },
            ElementKind::FloatQds => Self::Float {
                value: f32::from_le_bytes([data[0], data[1], data[2], data[3]]),
                quality: Quality::from_qds(data[4]),
            },
            ElementKind::Bcr => Self::IntegratedTotal {
                counter: i32::from_le_bytes([data[0], data[1], data[2], data[3]]),
                sequence: data[4] & 0x1F,
                carry: data[4] & 0x20 != 0,
                adjusted: data[4] & 0x40 != 0,
                invalid: data[4] & 0x80 != 0,
            },
            ElementKind::Sco => Self::SingleCommand {
                state: data[0] & 0x01 != 0,
                qualifier: CommandQualifier::from_octet(data[0]),
            },
            ElementKind::Dco => Self::DoubleCommand {
                state: data[0] & 0x03,
                qualifier: CommandQualifier::from_octet(data[0]),
            },
            ElementKind::Rco => Self::RegulatingStep {
                state: data[0] & 0x03,
                qualifier: CommandQualifier::from_octet(data[0]),
            },
            ElementKind::NvaQos => Self::SetpointNormalized {
                value: i16::from_le_bytes([data[0], data[1]]),
                qos: data[2],
            },
            ElementKind::SvaQos => Self::SetpointScaled {
                value: i16::from_le_bytes([data[0], data[1]]),
                qos: data[2],
            },
            ElementKind::FloatQos => Self::SetpointFloat {
                value: f32::from_le_bytes([data[0], data[1], data[2], data[3]]),
                qos: data[4],
            },
            ElementKind::Bsi => Self::BitstringCommand {
                value: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            },
            ElementKind::Coi => Self::EndOfInit { coi: data[0] },
            ElementKind::Qoi => Self::Interrogation { qoi: data[0] },
            ElementKind::Qcc => Self::CounterInterrogation { qcc: data[0] },
            ElementKind::Empty => Self::Read,
            ElementKind::Time56 => Self::ClockSync {
                time: Cp56Time2a::from_bytes(data)?,
            },
            ElementKind::Fbp => Self::TestPattern {
                pattern: u16::from_le_bytes([data[0], data[1]]),
            },
            ElementKind::Tsc => Self::TestSequence {
                counter: u16::from_le_bytes([data[0], data[1]]),
            },
            ElementKind::Qrp => Self::ResetProcess { qrp: data[0] },
        };
        Ok(element)
    }

    /// Layout this element packs into.
    pub const fn kind(&self) -> ElementKind {
        match self {
            Self::SinglePoint { .. } => ElementKind::Siq,
            Self::DoublePoint { .. } => ElementKind::Diq,
            Self::StepPosition { .. } => ElementKind::VtiQds,
            Self::Bitstring { .. } => ElementKind::BsiQds,
            Self::Normalized { .. } => ElementKind::NvaQds,
            Self::Scaled { .. } => ElementKind::SvaQds,
            Self::Float { .. } => ElementKind::FloatQds,
            Self::IntegratedTotal { .. } => ElementKind::Bcr,
            Self::SingleCommand { .. } => ElementKind::Sco,
            Self::DoubleCommand { .. } => ElementKind::Dco,
            Self::RegulatingStep { .. } => ElementKind::Rco,
            Self::SetpointNormalized { .. } => ElementKind::NvaQos,
            Self::SetpointScaled { .. } => ElementKind::SvaQos,
            Self::SetpointFloat { .. } => ElementKind::FloatQos,
            Self::BitstringCommand { .. } => ElementKind::Bsi,
            Self::EndOfInit { .. } => ElementKind::Coi,
            Self::Interrogation { .. } => ElementKind::Qoi,
            Self::CounterInterrogation { .. } => ElementKind::Qcc,
            Self::Read => ElementKind::Empty,
            Self::ClockSync { .. } => ElementKind::Time56,
            Self::TestPattern { .. } => ElementKind::Fbp,
            Self::TestSequence { .. } => ElementKind::Tsc,
            Self::ResetProcess { .. } => ElementKind::Qrp,
        }
    }

    /// Pack the element into `buf`.
    pub fn encode_to(&self, buf: &mut BytesMut) {
        match *self {
            Self::SinglePoint { value, quality } => {
                buf.put_u8(u8::from(value) | (quality.bits() & Quality::STATUS_MASK));
            }
            Self::DoublePoint { value, quality } => {
                buf.put_u8(value.as_u8() | (quality.bits() & Quality::STATUS_MASK));
            }
            Self::StepPosition {
                value,
                transient,
                quality,
            } => {
                buf.put_u8(((value as u8) & 0x7F) | if transient { 0x80 } else { 0 });
                buf.put_u8(quality.bits());
            }
            Self::Bitstring { value, quality } => {
                buf.put_u32_le(value);
                buf.put_u8(quality.bits());
            }
            Self::Normalized { value, quality } | Self::Scaled { value, quality } => {
                buf.put_i16_le(value);
                buf.put_u8(quality.bits());
            }
            Self::Float { value, quality } => {
                buf.put_f32_le(value);
                buf.put_u8(quality.bits());
            }
            Self::IntegratedTotal {
                counter,
                sequence,
                carry,
                adjusted,
                invalid,
            } => {
                buf.put_i32_le(counter);
                let mut flags = sequence & 0x1F;
                if carry {
                    flags |= 0x20;
                }
                if adjusted {
                    flags |= 0x40;
                }
                if invalid {
                    flags |= 0x80;
                }
                buf.put_u8(flags);
            }
            Self::SingleCommand { state, qualifier } => {
                buf.put_u8(u8::from(state) | qualifier.bits());
            }
            Self::DoubleCommand { state, qualifier } | Self::RegulatingStep { state, qualifier } => {
                buf.put_u8((state & 0x03) | qualifier.bits());
            }
            Self::SetpointNormalized { value, qos } | Self::SetpointScaled { value, qos } => {
                buf.put_i16_le(value);
                buf.put_u8(qos);
            }
            Self::SetpointFloat { value, qos } => {
                buf.put_f32_le(value);
                buf.put_u8(qos);
            }
            Self::BitstringCommand { value } => buf.put_u32_le(value),
            Self::EndOfInit { coi: octet }
            | Self::Interrogation { qoi: octet }
            | Self::CounterInterrogation { qcc: octet }
            | Self::ResetProcess { qrp: octet } => buf.put_u8(octet),
            Self::Read => {}
            Self::ClockSync { time } => buf.put_slice(&time.to_bytes()),
            Self::TestPattern { pattern: word } | Self::TestSequence { counter: word } => {
                buf.put_u16_le(word)
            }
        }
    }

    /// Value a command element asks to write into a register.
    ///
    /// Returns `None` for elements that are not supported commands.
    pub fn command_value(&self) -> Option<PointValue> {
        match *self {
            Self::SingleCommand { state, .. } => Some(PointValue::Bool(state)),
            Self::DoubleCommand { state, .. } => Some(PointValue::Int(i64::from(state))),
            Self::SetpointScaled { value, .. } => Some(PointValue::Int(i64::from(value))),
            Self::SetpointFloat { value, .. } => Some(PointValue::Float(f64::from(value))),
            _ => None,
        }
    }

    /// Build the element a register of `category` reports for `value`.
    ///
    /// Quality is always reported as good.
    pub fn for_category(category: TypeId, value: &PointValue) -> Result<Self> {
        let quality = Quality::GOOD;
        let qualifier = CommandQualifier::default();
        let element = match category {
            TypeId::SinglePoint => Self::SinglePoint {
                value: value.as_bool(),
                quality,
            },
            TypeId::DoublePoint => Self::DoublePoint {
                value: value.as_double_point(),
                quality,
            },
            TypeId::StepPosition => Self::StepPosition {
                value: value.as_step_position(),
                transient: false,
                quality,
            },
            TypeId::Bitstring32 => Self::Bitstring {
                value: value.as_i64() as u32,
                quality,
            },
            TypeId::MeasuredNormalized => Self::Normalized {
                value: value.as_normalized(),
                quality,
            },
            TypeId::MeasuredScaled => Self::Scaled {
                value: value.as_scaled(),
                quality,
            },
            TypeId::MeasuredFloat => Self::Float {
                value: value.as_f64() as f32,
                quality,
            },
            TypeId::SingleCommand => Self::SingleCommand {
                state: value.as_bool(),
                qualifier,
            },
            TypeId::DoubleCommand => Self::DoubleCommand {
                state: value.as_double_point().as_u8(),
                qualifier,
            },
            TypeId::SetpointNormalized => Self::SetpointNormalized {
                value: value.as_normalized(),
                qos: 0,
            },
            TypeId::SetpointScaled => Self::SetpointScaled {
                value: value.as_scaled(),
                qos: 0,
            },
            TypeId::SetpointFloat => Self::SetpointFloat {
                value: value.as_f64() as f32,
                qos: 0,
            },
            other => {
                return Err(Iec104Error::register(format!(
                    "category {} has no element encoding",
                    other.as_u8()
                )))
            }
        };
        Ok(element)
    }
}
