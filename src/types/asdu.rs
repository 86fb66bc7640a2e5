//! IEC 60870-5-104 ASDU (Application Service Data Unit).
//!
//! ASDU contains the actual data (measurements, commands, etc.).
//!
//! ```text
//! +---------+-----+-----+------------+-----------+---------------------+
//! | TypeID  | VSQ | COT | Originator | COA (LE16) | information objects |
//! +---------+-----+-----+------------+-----------+---------------------+
//! ```

use bytes::{BufMut, BytesMut};

use crate::error::{Iec104Error, Result};
use crate::types::{
    Cot, Cp24Time2a, Cp56Time2a, Element, Layout, TimeTag, TimeTagKind, TypeId, COT_NEGATIVE_FLAG,
    COT_TEST_FLAG,
};

/// Size of the fixed ASDU header.
pub const ASDU_HEADER_SIZE: usize = 6;

/// Size of an information object address.
pub const IOA_SIZE: usize = 3;

/// Maximum number of information objects in one ASDU (7-bit NoO).
pub const MAX_OBJECTS: usize = 127;

/// Variable Structure Qualifier (VSQ).
///
/// Defines the structure of information objects in an ASDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vsq {
    /// Number of information objects (1-127)
    pub count: u8,
    /// If true, addresses are sequential (SQ=1)
    pub sequence: bool,
}

impl Vsq {
    /// Create a new VSQ.
    #[inline]
    pub const fn new(count: u8, sequence: bool) -> Self {
        Self { count, sequence }
    }

    /// Parse VSQ from byte.
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        Self {
            count: value & 0x7F,
            sequence: (value & 0x80) != 0,
        }
    }

    /// Encode VSQ to byte.
    #[inline]
    pub const fn as_u8(&self) -> u8 {
        (self.count & 0x7F) | if self.sequence { 0x80 } else { 0 }
    }
}

/// Information Object Address (IOA).
///
/// 3-byte address identifying a specific data point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ioa(pub u32);

impl Ioa {
    /// Create IOA from u32 (lower 24 bits).
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value & 0x00FF_FFFF)
    }

    /// Parse IOA from 3 bytes (little-endian).
    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < IOA_SIZE {
            return Err(Iec104Error::invalid_asdu("IOA too short"));
        }
        Ok(Self(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0])))
    }

    /// Encode IOA to 3 bytes (little-endian).
    #[inline]
    pub fn to_bytes(&self) -> [u8; 3] {
        let b = self.0.to_le_bytes();
        [b[0], b[1], b[2]]
    }

    /// Get the raw value.
    #[inline]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Address `n` positions after this one (SQ=1 addressing).
    #[inline]
    pub fn offset(&self, n: usize) -> Self {
        Self::new(self.0.wrapping_add(n as u32))
    }
}

impl std::fmt::Display for Ioa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ASDU header (fixed part).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsduHeader {
    /// Type identification
    pub type_id: TypeId,
    /// Variable structure qualifier
    pub vsq: Vsq,
    /// Cause of transmission
    pub cot: Cot,
    /// Test flag (if true, this is a test ASDU)
    pub test: bool,
    /// Negative flag (if true, negative confirmation)
    pub negative: bool,
    /// Originator address (0 if not used)
    pub originator: u8,
    /// Common address of ASDU (station address)
    pub common_address: u16,
}

impl AsduHeader {
    /// Create a new ASDU header.
    pub fn new(type_id: TypeId, count: u8, cot: Cot, common_address: u16) -> Self {
        Self {
            type_id,
            vsq: Vsq::new(count, false),
            cot,
            test: false,
            negative: false,
            originator: 0,
            common_address,
        }
    }

    /// Parse ASDU header from bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < ASDU_HEADER_SIZE {
            return Err(Iec104Error::invalid_asdu("ASDU header too short"));
        }

        let type_id = TypeId::from_u8(data[0])?;
        let vsq = Vsq::from_u8(data[1]);
        let cot = Cot::from_u8(data[2])?;

        Ok(Self {
            type_id,
            vsq,
            cot,
            test: data[2] & COT_TEST_FLAG != 0,
            negative: data[2] & COT_NEGATIVE_FLAG != 0,
            originator: data[3],
            common_address: u16::from_le_bytes([data[4], data[5]]),
        })
    }

    /// Encode ASDU header to bytes.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.type_id.as_u8());
        buf.put_u8(self.vsq.as_u8());

        let mut cot_byte = self.cot.as_u8();
        if self.test {
            cot_byte |= COT_TEST_FLAG;
        }
        if self.negative {
            cot_byte |= COT_NEGATIVE_FLAG;
        }
        buf.put_u8(cot_byte);
        buf.put_u8(self.originator);
        buf.put_u16_le(self.common_address);
    }
}

/// Information object: address, element and optional time tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InformationObject {
    /// Information object address
    pub ioa: Ioa,
    /// Information element
    pub element: Element,
    /// Time tag, present for time-tagged type identifications
    pub time: Option<TimeTag>,
}

impl InformationObject {
    /// Create an information object without time tag.
    pub fn new(ioa: Ioa, element: Element) -> Self {
        Self {
            ioa,
            element,
            time: None,
        }
    }

    /// Attach a time tag.
    pub fn with_time(mut self, time: TimeTag) -> Self {
        self.time = Some(time);
        self
    }

    fn encode_time(&self, kind: TimeTagKind, buf: &mut BytesMut) {
        match (kind, self.time) {
            (TimeTagKind::None, _) => {}
            (TimeTagKind::Cp24, Some(TimeTag::Cp24(t))) => buf.put_slice(&t.to_bytes()),
            (TimeTagKind::Cp56, Some(TimeTag::Cp56(t))) => buf.put_slice(&t.to_bytes()),
            // Missing or mismatched tags are sent as zero time.
            (TimeTagKind::Cp24, _) => buf.put_slice(&Cp24Time2a::default().to_bytes()),
            (TimeTagKind::Cp56, _) => buf.put_slice(&Cp56Time2a::default().to_bytes()),
        }
    }
}

fn decode_time(kind: TimeTagKind, data: &[u8]) -> Result<Option<TimeTag>> {
    Ok(match kind {
        TimeTagKind::None => None,
        TimeTagKind::Cp24 => Some(TimeTag::Cp24(Cp24Time2a::from_bytes(data)?)),
        TimeTagKind::Cp56 => Some(TimeTag::Cp56(Cp56Time2a::from_bytes(data)?)),
    })
}

/// Complete ASDU.
///
/// The object count in `header.vsq` is derived from `objects` when encoding.
/// Every element must match the layout of `header.type_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Asdu {
    /// ASDU header
    pub header: AsduHeader,
    /// Information objects
    pub objects: Vec<InformationObject>,
}

impl Asdu {
    /// Create an ASDU with SQ=0 addressing.
    pub fn new(
        type_id: TypeId,
        cot: Cot,
        common_address: u16,
        objects: Vec<InformationObject>,
    ) -> Self {
        let count = objects.len().min(MAX_OBJECTS) as u8;
        Self {
            header: AsduHeader::new(type_id, count, cot, common_address),
            objects,
        }
    }

    /// Create a single-object ASDU.
    pub fn single(
        type_id: TypeId,
        cot: Cot,
        common_address: u16,
        object: InformationObject,
    ) -> Self {
        Self::new(type_id, cot, common_address, vec![object])
    }

    /// Mirror this ASDU back with another cause of transmission.
    ///
    /// Type identification and objects are kept; the negative flag is cleared.
    pub fn mirror(&self, cot: Cot, common_address: u16) -> Self {
        let mut reply = self.clone();
        reply.header.cot = cot;
        reply.header.negative = false;
        reply.header.common_address = common_address;
        reply
    }

    /// Set the negative (P/N) flag.
    pub fn negative(mut self) -> Self {
        self.header.negative = true;
        self
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.header.type_id
    }

    #[inline]
    pub fn cot(&self) -> Cot {
        self.header.cot
    }

    #[inline]
    pub fn common_address(&self) -> u16 {
        self.header.common_address
    }

    /// Decode an ASDU from bytes (after APCI).
    ///
    /// The buffer must hold exactly the number of objects announced in the VSQ.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = AsduHeader::parse(data)?;
        let layout = Layout::of(header.type_id);
        let count = header.vsq.count as usize;
        let body = &data[ASDU_HEADER_SIZE..];

        if count == 0 {
            return Err(Iec104Error::invalid_asdu("ASDU carries no information objects"));
        }

        let expected = if header.vsq.sequence {
            IOA_SIZE + count * layout.size()
        } else {
            count * (IOA_SIZE + layout.size())
        };
        if body.len() != expected {
            return Err(Iec104Error::InvalidAsdu(format!(
                "{} with {} objects needs {} bytes, got {}",
                header.type_id,
                count,
                expected,
                body.len()
            )));
        }

        let mut objects = Vec::with_capacity(count);
        let mut pos = 0;
        let base = if header.vsq.sequence {
            pos = IOA_SIZE;
            Some(Ioa::from_bytes(body)?)
        } else {
            None
        };

        for index in 0..count {
            let ioa = match base {
                Some(base) => base.offset(index),
                None => {
                    let ioa = Ioa::from_bytes(&body[pos..])?;
                    pos += IOA_SIZE;
                    ioa
                }
            };
            let element = Element::decode(layout.element, &body[pos..])?;
            pos += layout.element.size();
            let time = decode_time(layout.time_tag, &body[pos..])?;
            pos += layout.time_tag.size();
            objects.push(InformationObject { ioa, element, time });
        }

        Ok(Self { header, objects })
    }

    /// Encode ASDU to bytes.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_to(&mut buf);
        buf
    }

    /// Encode ASDU directly into the provided buffer.
    pub fn encode_to(&self, buf: &mut BytesMut) {
        let layout = Layout::of(self.header.type_id);
        let mut header = self.header;
        header.vsq.count = self.objects.len().min(MAX_OBJECTS) as u8;
        header.encode(buf);

        for (index, obj) in self.objects.iter().take(MAX_OBJECTS).enumerate() {
            if !header.vsq.sequence || index == 0 {
                buf.put_slice(&obj.ioa.to_bytes());
            }
            obj.element.encode_to(buf);
            obj.encode_time(layout.time_tag, buf);
        }
    }

    /// Calculate the encoded length of this ASDU.
    pub fn encoded_len(&self) -> usize {
        let layout = Layout::of(self.header.type_id);
        let count = self.objects.len().min(MAX_OBJECTS);
        if self.header.vsq.sequence {
            ASDU_HEADER_SIZE + if count > 0 { IOA_SIZE } else { 0 } + count * layout.size()
        } else {
            ASDU_HEADER_SIZE + count * (IOA_SIZE + layout.size())
        }
    }
}

/// Encoded size of one SQ=0 information object of `type_id`.
pub const fn object_size(type_id: TypeId) -> usize {
    IOA_SIZE + Layout::of(type_id).size()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CommandQualifier, DoublePointValue, Quality};

    #[test]
    fn test_vsq() {
        let vsq = Vsq::new(10, false);
        assert_eq!(vsq.as_u8(), 10);

        let vsq = Vsq::new(10, true);
        assert_eq!(vsq.as_u8(), 0x8A);

        let vsq = Vsq::from_u8(0x8A);
        assert_eq!(vsq.count, 10);
        assert!(vsq.sequence);
    }

    #[test]
    fn test_ioa() {
        let ioa = Ioa::new(0x123456);
        let bytes = ioa.to_bytes();
        assert_eq!(bytes, [0x56, 0x34, 0x12]);

        let parsed = Ioa::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.value(), 0x123456);
        assert_eq!(Ioa::new(0xFFFFFF).offset(1), Ioa(0));
    }

    #[test]
    fn test_asdu_header_flags() {
        let mut header = AsduHeader::new(TypeId::SingleCommand, 1, Cot::ActivationConfirm, 7720);
        header.negative = true;
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(&buf[..], &[45, 0x01, 0x47, 0x00, 0x28, 0x1E]);

        let parsed = AsduHeader::parse(&buf).unwrap();
        assert_eq!(parsed, header);
        assert!(!parsed.test);
    }

    #[test]
    fn test_single_command_wire_layout() {
        // C_SC_NA_1, COT=6, COA=7720, IOA=0x001401, SCO=1
        let bytes = [45, 0x01, 0x06, 0x00, 0x28, 0x1E, 0x01, 0x14, 0x00, 0x01];
        let asdu = Asdu::decode(&bytes).unwrap();
        assert_eq!(asdu.type_id(), TypeId::SingleCommand);
        assert_eq!(asdu.cot(), Cot::Activation);
        assert_eq!(asdu.common_address(), 7720);
        assert_eq!(asdu.objects.len(), 1);
        assert_eq!(asdu.objects[0].ioa, Ioa(0x1401));
        assert_eq!(
            asdu.objects[0].element,
            Element::SingleCommand {
                state: true,
                qualifier: CommandQualifier::default()
            }
        );
        assert_eq!(&asdu.encode()[..], &bytes);
    }

    #[test]
    fn test_sequence_addressing() {
        let objects = (0..3)
            .map(|i| {
                InformationObject::new(
                    Ioa(100 + i),
                    Element::Scaled {
                        value: i as i16,
                        quality: Quality::GOOD,
                    },
                )
            })
            .collect();
        let mut asdu = Asdu::new(TypeId::MeasuredScaled, Cot::Periodic, 1, objects);
        asdu.header.vsq.sequence = true;

        let bytes = asdu.encode();
        assert_eq!(bytes.len(), asdu.encoded_len());
        assert_eq!(bytes.len(), ASDU_HEADER_SIZE + IOA_SIZE + 3 * 3);

        let decoded = Asdu::decode(&bytes).unwrap();
        assert_eq!(decoded, asdu);
        assert_eq!(decoded.objects[2].ioa, Ioa(102));
    }

    #[test]
    fn test_time_tagged_objects() {
        let time = Cp56Time2a {
            milliseconds: 1234,
            minutes: 5,
            hours: 6,
            day: 7,
            day_of_week: 1,
            month: 8,
            year: 25,
            invalid: false,
            summer_time: false,
        };
        let obj = InformationObject::new(
            Ioa(3),
            Element::DoublePoint {
                value: DoublePointValue::On,
                quality: Quality::GOOD,
            },
        )
        .with_time(TimeTag::Cp56(time));
        let asdu = Asdu::single(TypeId::DoublePointTime56, Cot::Spontaneous, 1, obj);

        let bytes = asdu.encode();
        assert_eq!(bytes.len(), ASDU_HEADER_SIZE + IOA_SIZE + 1 + 7);
        assert_eq!(Asdu::decode(&bytes).unwrap(), asdu);
    }

    #[test]
    fn test_missing_time_tag_sent_as_zero() {
        let obj = InformationObject::new(
            Ioa(1),
            Element::SinglePoint {
                value: true,
                quality: Quality::GOOD,
            },
        );
        let asdu = Asdu::single(TypeId::SinglePointTime24, Cot::Spontaneous, 1, obj);
        let bytes = asdu.encode();
        assert_eq!(&bytes[bytes.len() - 3..], &[0, 0, 0]);

        let decoded = Asdu::decode(&bytes).unwrap();
        assert_eq!(
            decoded.objects[0].time,
            Some(TimeTag::Cp24(Cp24Time2a::default()))
        );
    }

    #[test]
    fn test_decode_length_mismatch() {
        // Announces two objects, carries one
        let bytes = [45, 0x02, 0x06, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x01];
        assert!(matches!(
            Asdu::decode(&bytes),
            Err(Iec104Error::InvalidAsdu(_))
        ));

        // Trailing garbage
        let bytes = [45, 0x01, 0x06, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x01, 0xFF];
        assert!(Asdu::decode(&bytes).is_err());

        // Zero objects
        let bytes = [100, 0x00, 0x06, 0x00, 0x01, 0x00];
        assert!(Asdu::decode(&bytes).is_err());
    }

    #[test]
    fn test_decode_unknown_type_and_cot() {
        let bytes = [99, 0x01, 0x06, 0x00, 0x01, 0x00, 0, 0, 0, 0];
        assert!(matches!(
            Asdu::decode(&bytes),
            Err(Iec104Error::UnknownTypeId(99))
        ));

        let bytes = [45, 0x01, 0x0F, 0x00, 0x01, 0x00, 0, 0, 0, 0];
        assert!(matches!(
            Asdu::decode(&bytes),
            Err(Iec104Error::UnknownCot(15))
        ));
    }

    #[test]
    fn test_mirror_and_negative() {
        let obj = InformationObject::new(Ioa(9), Element::SetpointScaled { value: 5, qos: 0 });
        let request = Asdu::single(TypeId::SetpointScaled, Cot::Activation, 0xFFFF, obj);

        let confirm = request.mirror(Cot::ActivationConfirm, 7720);
        assert_eq!(confirm.cot(), Cot::ActivationConfirm);
        assert_eq!(confirm.common_address(), 7720);
        assert_eq!(confirm.objects, request.objects);
        assert!(!confirm.header.negative);

        let refused = confirm.negative();
        assert!(refused.header.negative);
        assert_eq!(refused.encode()[2], 0x47);
    }

    #[test]
    fn test_object_size() {
        assert_eq!(object_size(TypeId::SinglePoint), 4);
        assert_eq!(object_size(TypeId::MeasuredFloat), 8);
        assert_eq!(object_size(TypeId::MeasuredFloatTime56), 15);
        assert_eq!(object_size(TypeId::ReadCommand), 3);
    }
}
