//! IEC 60870-5-104 stream reassembler for tokio.
//!
//! The decoder only cuts the byte stream into complete APDUs. Decoding the
//! APDU itself is left to [`Frame::decode`], because a `Framed` stream ends
//! as soon as its decoder returns an error and a single malformed frame must
//! not take the connection down with it.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Iec104Error;
use crate::frame::Frame;
use crate::types::{MAX_APDU_LENGTH, MIN_APDU_LENGTH, START_BYTE};

/// IEC 60870-5-104 codec.
///
/// Yields one raw APDU (start byte through last ASDU octet) per item and
/// encodes [`Frame`]s.
///
/// # Example
///
/// ```rust,ignore
/// use tokio_util::codec::Framed;
/// use iec104_honeypot::{Frame, Iec104Codec};
///
/// let mut framed = Framed::new(stream, Iec104Codec::new());
///
/// while let Some(raw) = framed.next().await {
///     let frame = Frame::decode(&raw?)?;
///     println!("Received: {}", frame);
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Iec104Codec {
    // State for handling partial frames
    state: DecodeState,
}

#[derive(Debug, Clone, Default)]
#[allow(clippy::enum_variant_names)]
enum DecodeState {
    #[default]
    WaitingForStart,
    WaitingForLength,
    WaitingForData {
        length: usize,
    },
}

impl Iec104Codec {
    /// Create a new IEC 104 codec.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for Iec104Codec {
    type Item = Bytes;
    type Error = Iec104Error;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        loop {
            match &self.state {
                DecodeState::WaitingForStart => {
                    // Discard everything before the next start byte
                    match src.iter().position(|b| *b == START_BYTE) {
                        Some(skip) => {
                            if skip > 0 {
                                tracing::debug!(skipped = skip, "discarding bytes before start byte");
                            }
                            src.advance(skip);
                        }
                        None => {
                            if !src.is_empty() {
                                tracing::debug!(skipped = src.len(), "discarding bytes before start byte");
                            }
                            src.clear();
                            return Ok(None);
                        }
                    }

                    self.state = DecodeState::WaitingForLength;
                }

                DecodeState::WaitingForLength => {
                    // Need at least 2 bytes (start + length)
                    if src.len() < 2 {
                        return Ok(None);
                    }

                    let length = src[1] as usize;

                    if !(MIN_APDU_LENGTH..=MAX_APDU_LENGTH).contains(&length) {
                        // Invalid length, skip start byte and resync
                        tracing::debug!(length, "invalid APDU length, resyncing");
                        src.advance(1);
                        self.state = DecodeState::WaitingForStart;
                        continue;
                    }

                    self.state = DecodeState::WaitingForData { length };
                }

                DecodeState::WaitingForData { length } => {
                    let total_length = 2 + length; // start + length byte + APDU content

                    if src.len() < total_length {
                        src.reserve(total_length - src.len());
                        return Ok(None);
                    }

                    self.state = DecodeState::WaitingForStart;
                    return Ok(Some(src.split_to(total_length).freeze()));
                }
            }
        }
    }
}

impl Encoder<Frame> for Iec104Codec {
    type Error = Iec104Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        item.encode_to(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UFunction;

    const STARTDT_ACT: [u8; 6] = [0x68, 0x04, 0x07, 0x00, 0x00, 0x00];

    #[test]
    fn test_decode_u_frame() {
        let mut codec = Iec104Codec::new();
        let mut buf = BytesMut::from(&STARTDT_ACT[..]);

        let raw = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&raw[..], &STARTDT_ACT);
        assert_eq!(Frame::decode(&raw).unwrap(), Frame::U(UFunction::StartDtAct));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encode_s_frame() {
        let mut codec = Iec104Codec::new();
        let mut buf = BytesMut::new();

        codec.encode(Frame::S { recv_seq: 100 }, &mut buf).unwrap();

        assert_eq!(&buf[..], &[0x68, 0x04, 0x01, 0x00, 0x64, 0x00]);
    }

    #[test]
    fn test_decode_partial_frame() {
        let mut codec = Iec104Codec::new();

        // Send first part
        let mut buf = BytesMut::from(&[0x68][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[0x04, 0x07]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        // Send remaining part
        buf.extend_from_slice(&[0x00, 0x00, 0x00]);
        let raw = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&raw[..], &STARTDT_ACT);
    }

    #[test]
    fn test_decode_byte_at_a_time() {
        let mut codec = Iec104Codec::new();
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();

        for byte in STARTDT_ACT.iter().chain(STARTDT_ACT.iter()) {
            buf.extend_from_slice(&[*byte]);
            if let Some(raw) = codec.decode(&mut buf).unwrap() {
                frames.push(raw);
            }
        }
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_decode_skip_garbage() {
        let mut codec = Iec104Codec::new();
        // Garbage bytes before valid frame
        let mut buf = BytesMut::from(&[0xFF, 0xAA, 0x00][..]);
        buf.extend_from_slice(&STARTDT_ACT);

        let raw = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&raw[..], &STARTDT_ACT);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_garbage_only_is_dropped() {
        let mut codec = Iec104Codec::new();
        let mut buf = BytesMut::from(&[0x01, 0x02, 0x03][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());

        buf.extend_from_slice(&STARTDT_ACT);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_invalid_length_resyncs() {
        let mut codec = Iec104Codec::new();
        // 0x68 followed by an impossible length, then a real frame
        let mut buf = BytesMut::from(&[0x68, 0x02][..]);
        buf.extend_from_slice(&STARTDT_ACT);

        let raw = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&raw[..], &STARTDT_ACT);

        let mut buf = BytesMut::from(&[0x68, 0xFE][..]);
        buf.extend_from_slice(&STARTDT_ACT);
        let raw = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&raw[..], &STARTDT_ACT);
    }

    #[test]
    fn test_roundtrip_through_codec() {
        let mut codec = Iec104Codec::new();

        for func in [
            UFunction::StartDtAct,
            UFunction::StartDtCon,
            UFunction::StopDtAct,
            UFunction::StopDtCon,
            UFunction::TestFrAct,
            UFunction::TestFrCon,
        ] {
            let mut buf = BytesMut::new();
            codec.encode(Frame::U(func), &mut buf).unwrap();

            let raw = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(Frame::decode(&raw).unwrap(), Frame::U(func));
        }

        for recv_seq in [0, 100, 65534] {
            let mut buf = BytesMut::new();
            codec.encode(Frame::S { recv_seq }, &mut buf).unwrap();

            let raw = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(Frame::decode(&raw).unwrap(), Frame::S { recv_seq });
        }
    }
}
