//! APDU frames: the tagged union of U, S and I frames.
//!
//! `Frame::decode` and `Frame::encode` are pure functions over complete APDUs
//! as produced by the [`Iec104Codec`](crate::codec::Iec104Codec) reassembler.
//! Malformed input always comes back as an [`Iec104Error`], never a panic.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Iec104Error, Result};
use crate::types::{
    Apci, Asdu, UFunction, APCI_SIZE, ASDU_HEADER_SIZE, MAX_APDU_LENGTH, MIN_APDU_LENGTH,
    START_BYTE,
};

/// An IEC 104 APDU (Application Protocol Data Unit).
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Unnumbered control frame
    U(UFunction),
    /// Supervisory acknowledgement
    S {
        /// Receive sequence field
        recv_seq: u16,
    },
    /// Numbered information frame
    I {
        /// Send sequence field
        send_seq: u16,
        /// Receive sequence field
        recv_seq: u16,
        /// Payload
        asdu: Asdu,
    },
}

impl Frame {
    /// Validate the APCI of a raw APDU and split off the ASDU bytes.
    ///
    /// This is the first half of [`Frame::decode`]; the session uses it on
    /// its own so that sequencing still happens when the ASDU is malformed.
    pub fn split(raw: &[u8]) -> Result<(Apci, &[u8])> {
        if raw.len() < APCI_SIZE {
            return Err(Iec104Error::frame_syntax("APDU shorter than APCI"));
        }
        if raw[0] != START_BYTE {
            return Err(Iec104Error::FrameSyntax(format!(
                "bad start byte 0x{:02X}",
                raw[0]
            )));
        }

        let length = raw[1] as usize;
        if length + 2 != raw.len() {
            return Err(Iec104Error::FrameSyntax(format!(
                "length field {} does not match {} received bytes",
                length,
                raw.len()
            )));
        }

        let apci = Apci::parse(&raw[2..APCI_SIZE])?;
        match apci {
            Apci::IFrame { .. } if length < MIN_APDU_LENGTH + ASDU_HEADER_SIZE => {
                Err(Iec104Error::FrameSyntax(format!(
                    "I-frame length {} too short for an ASDU",
                    length
                )))
            }
            Apci::SFrame { .. } | Apci::UFrame { .. } if length != MIN_APDU_LENGTH => {
                Err(Iec104Error::FrameSyntax(format!(
                    "{} frame with length {}",
                    apci, length
                )))
            }
            _ => Ok((apci, &raw[APCI_SIZE..])),
        }
    }

    /// Decode one complete APDU.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let (apci, payload) = Self::split(raw)?;
        Ok(match apci {
            Apci::UFrame { function } => Self::U(function),
            Apci::SFrame { recv_seq } => Self::S { recv_seq },
            Apci::IFrame { send_seq, recv_seq } => Self::I {
                send_seq,
                recv_seq,
                asdu: Asdu::decode(payload)?,
            },
        })
    }

    /// Encode into a fresh buffer.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_to(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Encode directly into `dst`.
    ///
    /// Fails if the ASDU does not fit into the 253-byte APDU length field.
    pub fn encode_to(&self, dst: &mut BytesMut) -> Result<()> {
        let asdu_len = match self {
            Self::I { asdu, .. } => asdu.encoded_len(),
            _ => 0,
        };
        if asdu_len > MAX_APDU_LENGTH - MIN_APDU_LENGTH {
            return Err(Iec104Error::Codec(format!(
                "ASDU of {} bytes exceeds APDU limit",
                asdu_len
            )));
        }

        dst.reserve(APCI_SIZE + asdu_len);
        dst.put_slice(&self.apci().encode_header(asdu_len));
        if let Self::I { asdu, .. } = self {
            asdu.encode_to(dst);
        }
        Ok(())
    }

    /// Total encoded size including start and length bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::I { asdu, .. } => APCI_SIZE + asdu.encoded_len(),
            _ => APCI_SIZE,
        }
    }

    /// Control field of this frame.
    pub fn apci(&self) -> Apci {
        match self {
            Self::U(function) => Apci::u_frame(*function),
            Self::S { recv_seq } => Apci::s_frame(*recv_seq),
            Self::I {
                send_seq, recv_seq, ..
            } => Apci::i_frame(*send_seq, *recv_seq),
        }
    }

    /// Payload of an I-frame.
    pub fn asdu(&self) -> Option<&Asdu> {
        match self {
            Self::I { asdu, .. } => Some(asdu),
            _ => None,
        }
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.apci())?;
        if let Self::I { asdu, .. } = self {
            write!(
                f,
                " [{}] COT={} CA={} NoO={}",
                asdu.header.type_id,
                asdu.header.cot,
                asdu.header.common_address,
                asdu.objects.len()
            )?;
            if asdu.header.negative {
                write!(f, " P/N")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        CommandQualifier, Cot, Element, InformationObject, Ioa, Quality, TypeId,
    };

    fn interrogation() -> Asdu {
        Asdu::single(
            TypeId::InterrogationCommand,
            Cot::Activation,
            7720,
            InformationObject::new(Ioa(0), Element::Interrogation { qoi: 20 }),
        )
    }

    #[test]
    fn test_u_frame_literal_bytes() {
        let frame = Frame::decode(&[0x68, 0x04, 0x07, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(frame, Frame::U(UFunction::StartDtAct));

        let bytes = Frame::U(UFunction::StartDtCon).encode().unwrap();
        assert_eq!(&bytes[..], &[0x68, 0x04, 0x0B, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_s_frame_literal_bytes() {
        let bytes = Frame::S { recv_seq: 6 }.encode().unwrap();
        assert_eq!(&bytes[..], &[0x68, 0x04, 0x01, 0x00, 0x06, 0x00]);
        assert_eq!(Frame::decode(&bytes).unwrap(), Frame::S { recv_seq: 6 });
    }

    #[test]
    fn test_i_frame_layout() {
        let frame = Frame::I {
            send_seq: 2,
            recv_seq: 4,
            asdu: interrogation(),
        };
        let bytes = frame.encode().unwrap();
        assert_eq!(
            &bytes[..],
            &[
                0x68, 0x0E, 0x02, 0x00, 0x04, 0x00, 100, 0x01, 0x06, 0x00, 0x28, 0x1E, 0x00, 0x00,
                0x00, 20
            ]
        );
        assert_eq!(bytes.len(), frame.encoded_len());
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_roundtrip_all_kinds() {
        let frames = vec![
            Frame::U(UFunction::StartDtAct),
            Frame::U(UFunction::StartDtCon),
            Frame::U(UFunction::StopDtAct),
            Frame::U(UFunction::StopDtCon),
            Frame::U(UFunction::TestFrAct),
            Frame::U(UFunction::TestFrCon),
            Frame::S { recv_seq: 0 },
            Frame::S { recv_seq: 65534 },
            Frame::I {
                send_seq: 65534,
                recv_seq: 0,
                asdu: Asdu::single(
                    TypeId::SingleCommand,
                    Cot::Activation,
                    1,
                    InformationObject::new(
                        Ioa(0x1401),
                        Element::SingleCommand {
                            state: true,
                            qualifier: CommandQualifier { select: true, qu: 0 },
                        },
                    ),
                ),
            },
            Frame::I {
                send_seq: 8,
                recv_seq: 10,
                asdu: Asdu::single(
                    TypeId::MeasuredFloat,
                    Cot::InterrogatedByStation,
                    1,
                    InformationObject::new(
                        Ioa(42),
                        Element::Float {
                            value: -12.25,
                            quality: Quality::GOOD,
                        },
                    ),
                ),
            },
        ];

        for frame in frames {
            let bytes = frame.encode().unwrap();
            assert_eq!(Frame::decode(&bytes).unwrap(), frame, "{}", frame);
        }
    }

    #[test]
    fn test_length_mismatch_rejected() {
        // Length says 5, frame carries 4 control octets
        let err = Frame::decode(&[0x68, 0x05, 0x07, 0x00, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, Iec104Error::FrameSyntax(_)));

        // U-frame padded to a longer APDU
        let err = Frame::decode(&[0x68, 0x05, 0x07, 0x00, 0x00, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, Iec104Error::FrameSyntax(_)));

        // I-frame without room for an ASDU header
        let err = Frame::decode(&[0x68, 0x04, 0x00, 0x00, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, Iec104Error::FrameSyntax(_)));
    }

    #[test]
    fn test_bad_control_octets_rejected() {
        assert!(Frame::decode(&[0x68, 0x04, 0x0F, 0x00, 0x00, 0x00]).is_err());
        assert!(Frame::decode(&[0x68, 0x04, 0x07, 0x00, 0x01, 0x00]).is_err());
        assert!(Frame::decode(&[0x67, 0x04, 0x07, 0x00, 0x00, 0x00]).is_err());
        assert!(Frame::decode(&[]).is_err());
    }

    #[test]
    fn test_split_keeps_apci_when_asdu_is_bad() {
        let raw = [0x68, 0x0A, 0x04, 0x00, 0x02, 0x00, 99, 0x01, 0x06, 0x00, 0x01, 0x00];
        let (apci, payload) = Frame::split(&raw).unwrap();
        assert_eq!(apci, Apci::i_frame(4, 2));
        assert_eq!(payload.len(), 6);
        assert!(matches!(
            Frame::decode(&raw),
            Err(Iec104Error::UnknownTypeId(99))
        ));
    }

    #[test]
    fn test_oversized_asdu_rejected() {
        let objects = (0..40)
            .map(|i| {
                InformationObject::new(
                    Ioa(i),
                    Element::Float {
                        value: 0.0,
                        quality: Quality::GOOD,
                    },
                )
            })
            .collect();
        let frame = Frame::I {
            send_seq: 0,
            recv_seq: 0,
            asdu: Asdu::new(TypeId::MeasuredFloat, Cot::Spontaneous, 1, objects),
        };
        assert!(matches!(frame.encode(), Err(Iec104Error::Codec(_))));
    }

    #[test]
    fn test_display() {
        assert_eq!(Frame::S { recv_seq: 2 }.to_string(), "S(R=2)");
        let frame = Frame::I {
            send_seq: 0,
            recv_seq: 0,
            asdu: interrogation(),
        };
        assert_eq!(
            frame.to_string(),
            "I(S=0, R=0) [C_IC_NA_1] COT=Activation CA=7720 NoO=1"
        );
    }
}
