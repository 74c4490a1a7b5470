// Swarm Frame Codec
// Pure-decimal wire format: every frame is ASCII digits of fixed widths

use kolibri_core::digits::{self, DigitError};
use kolibri_core::{BlockId, DeltaPrefix, NodeId, ProgramId};
use thiserror::Error;

/// Protocol version carried in the 4-digit header field
pub const PROTOCOL_VERSION: u16 = 1;

/// Maximum serialized frame length in bytes
pub const MAX_FRAME_LEN: usize = 128;

const PROTOCOL_VERSION_WIDTH: usize = 4;
const FRAME_CODE_WIDTH: usize = 2;

const HELLO_VERSION_WIDTH: usize = 2;
const HELLO_SERVICES_WIDTH: usize = 4;
const HELLO_REPUTATION_WIDTH: usize = 3;

const PING_NONCE_WIDTH: usize = 10;
const PING_LATENCY_WIDTH: usize = 5;

const PROGRAM_POE_WIDTH: usize = 4;
const PROGRAM_MDL_WIDTH: usize = 5;
const PROGRAM_GAS_WIDTH: usize = 6;

const BLOCK_HEIGHT_WIDTH: usize = 8;
const BLOCK_POE_WIDTH: usize = 4;
const BLOCK_PROGRAM_COUNT_WIDTH: usize = 4;

const FKV_ENTRY_COUNT_WIDTH: usize = 3;
const FKV_SIZE_WIDTH: usize = 6;
const FKV_CHECKSUM_WIDTH: usize = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame too short: {0} bytes")]
    Truncated(usize),

    #[error("frame has {0} trailing bytes")]
    TrailingBytes(usize),

    #[error("unsupported protocol version {0}")]
    BadVersion(u64),

    #[error("unknown frame code {0}")]
    UnknownCode(u64),

    #[error(transparent)]
    Digit(#[from] DigitError),
}

/// Frame discriminant. The index (0..=4) keys per-type tables; `code()` is
/// the 2-digit wire code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameType {
    Hello = 0,
    Ping = 1,
    ProgramOffer = 2,
    BlockOffer = 3,
    FkvDelta = 4,
}

/// Number of frame types
pub const FRAME_TYPE_COUNT: usize = 5;

impl FrameType {
    pub const ALL: [FrameType; FRAME_TYPE_COUNT] = [
        FrameType::Hello,
        FrameType::Ping,
        FrameType::ProgramOffer,
        FrameType::BlockOffer,
        FrameType::FkvDelta,
    ];

    pub fn code(self) -> u8 {
        match self {
            FrameType::Hello => 10,
            FrameType::Ping => 11,
            FrameType::ProgramOffer => 12,
            FrameType::BlockOffer => 13,
            FrameType::FkvDelta => 14,
        }
    }

    pub fn from_code(code: u64) -> Option<FrameType> {
        FrameType::ALL.into_iter().find(|t| u64::from(t.code()) == code)
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelloPayload {
    pub version: u16,
    pub node_id: NodeId,
    pub services: u16,
    pub reputation: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PingPayload {
    pub nonce: u32,
    pub latency_hint_ms: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramOfferPayload {
    pub program_id: ProgramId,
    pub poe_milli: u16,
    pub mdl_score: u16,
    pub gas_used: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockOfferPayload {
    pub block_id: BlockId,
    pub height: u32,
    pub poe_milli: u16,
    pub program_count: u16,
}

/// FKV delta frame payload.
///
/// `prefix`, `entry_count`, `compressed_size` and `checksum` travel on the
/// wire; `raw_size` and the compressed record batch in `data` are handed
/// around in-process only and are empty after `parse`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FkvDeltaPayload {
    pub prefix: DeltaPrefix,
    pub entry_count: u16,
    pub compressed_size: u32,
    pub checksum: u16,
    pub raw_size: u32,
    pub data: Vec<u8>,
}

/// A single swarm protocol message
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Hello(HelloPayload),
    Ping(PingPayload),
    ProgramOffer(ProgramOfferPayload),
    BlockOffer(BlockOfferPayload),
    FkvDelta(FkvDeltaPayload),
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Hello(_) => FrameType::Hello,
            Frame::Ping(_) => FrameType::Ping,
            Frame::ProgramOffer(_) => FrameType::ProgramOffer,
            Frame::BlockOffer(_) => FrameType::BlockOffer,
            Frame::FkvDelta(_) => FrameType::FkvDelta,
        }
    }

    /// Serialize to the pure-decimal wire form.
    pub fn serialize(&self) -> Result<String, CodecError> {
        let mut out = String::with_capacity(MAX_FRAME_LEN);
        digits::write_digits(&mut out, PROTOCOL_VERSION_WIDTH, u64::from(PROTOCOL_VERSION))?;
        digits::write_digits(&mut out, FRAME_CODE_WIDTH, u64::from(self.frame_type().code()))?;

        match self {
            Frame::Hello(p) => {
                digits::write_digits(&mut out, HELLO_VERSION_WIDTH, u64::from(p.version))?;
                out.push_str(p.node_id.as_str());
                digits::write_digits(&mut out, HELLO_SERVICES_WIDTH, u64::from(p.services))?;
                digits::write_digits(&mut out, HELLO_REPUTATION_WIDTH, u64::from(p.reputation))?;
            }
            Frame::Ping(p) => {
                digits::write_digits(&mut out, PING_NONCE_WIDTH, u64::from(p.nonce))?;
                digits::write_digits(&mut out, PING_LATENCY_WIDTH, u64::from(p.latency_hint_ms))?;
            }
            Frame::ProgramOffer(p) => {
                out.push_str(p.program_id.as_str());
                digits::write_digits(&mut out, PROGRAM_POE_WIDTH, u64::from(p.poe_milli))?;
                digits::write_digits(&mut out, PROGRAM_MDL_WIDTH, u64::from(p.mdl_score))?;
                digits::write_digits(&mut out, PROGRAM_GAS_WIDTH, u64::from(p.gas_used))?;
            }
            Frame::BlockOffer(p) => {
                out.push_str(p.block_id.as_str());
                digits::write_digits(&mut out, BLOCK_HEIGHT_WIDTH, u64::from(p.height))?;
                digits::write_digits(&mut out, BLOCK_POE_WIDTH, u64::from(p.poe_milli))?;
                digits::write_digits(&mut out, BLOCK_PROGRAM_COUNT_WIDTH, u64::from(p.program_count))?;
            }
            Frame::FkvDelta(p) => {
                out.push_str(p.prefix.as_str());
                digits::write_digits(&mut out, FKV_ENTRY_COUNT_WIDTH, u64::from(p.entry_count))?;
                digits::write_digits(&mut out, FKV_SIZE_WIDTH, u64::from(p.compressed_size))?;
                digits::write_digits(&mut out, FKV_CHECKSUM_WIDTH, u64::from(p.checksum))?;
            }
        }
        Ok(out)
    }

    /// Parse the pure-decimal wire form.
    pub fn parse(data: &str) -> Result<Frame, CodecError> {
        let bytes = data.as_bytes();
        let header = PROTOCOL_VERSION_WIDTH + FRAME_CODE_WIDTH;
        if bytes.len() < header {
            return Err(CodecError::Truncated(bytes.len()));
        }
        if let Some(offset) = bytes.iter().position(|b| !b.is_ascii_digit()) {
            return Err(DigitError::NonDigit {
                byte: bytes[offset],
                offset,
            }
            .into());
        }
        let proto = digits::read_digits(&bytes[..PROTOCOL_VERSION_WIDTH])?;
        if proto != u64::from(PROTOCOL_VERSION) {
            return Err(CodecError::BadVersion(proto));
        }
        let code = digits::read_digits(&bytes[PROTOCOL_VERSION_WIDTH..header])?;
        let frame_type = FrameType::from_code(code).ok_or(CodecError::UnknownCode(code))?;

        let mut cursor = Cursor {
            bytes,
            offset: header,
        };
        let frame = match frame_type {
            FrameType::Hello => Frame::Hello(HelloPayload {
                version: cursor.take_value(HELLO_VERSION_WIDTH)? as u16,
                node_id: cursor.take_id()?,
                services: cursor.take_value(HELLO_SERVICES_WIDTH)? as u16,
                reputation: cursor.take_value(HELLO_REPUTATION_WIDTH)? as u16,
            }),
            FrameType::Ping => Frame::Ping(PingPayload {
                nonce: cursor.take_value(PING_NONCE_WIDTH)? as u32,
                latency_hint_ms: cursor.take_value(PING_LATENCY_WIDTH)? as u32,
            }),
            FrameType::ProgramOffer => Frame::ProgramOffer(ProgramOfferPayload {
                program_id: cursor.take_id()?,
                poe_milli: cursor.take_value(PROGRAM_POE_WIDTH)? as u16,
                mdl_score: cursor.take_value(PROGRAM_MDL_WIDTH)? as u16,
                gas_used: cursor.take_value(PROGRAM_GAS_WIDTH)? as u32,
            }),
            FrameType::BlockOffer => Frame::BlockOffer(BlockOfferPayload {
                block_id: cursor.take_id()?,
                height: cursor.take_value(BLOCK_HEIGHT_WIDTH)? as u32,
                poe_milli: cursor.take_value(BLOCK_POE_WIDTH)? as u16,
                program_count: cursor.take_value(BLOCK_PROGRAM_COUNT_WIDTH)? as u16,
            }),
            FrameType::FkvDelta => Frame::FkvDelta(FkvDeltaPayload {
                prefix: cursor.take_id()?,
                entry_count: cursor.take_value(FKV_ENTRY_COUNT_WIDTH)? as u16,
                compressed_size: cursor.take_value(FKV_SIZE_WIDTH)? as u32,
                checksum: cursor.take_value(FKV_CHECKSUM_WIDTH)? as u16,
                raw_size: 0,
                data: Vec::new(),
            }),
        };
        if cursor.offset != bytes.len() {
            return Err(CodecError::TrailingBytes(bytes.len() - cursor.offset));
        }
        Ok(frame)
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl Cursor<'_> {
    fn take(&mut self, width: usize) -> Result<&[u8], CodecError> {
        if self.bytes.len() - self.offset < width {
            return Err(CodecError::Truncated(self.bytes.len()));
        }
        let field = &self.bytes[self.offset..self.offset + width];
        self.offset += width;
        Ok(field)
    }

    fn take_value(&mut self, width: usize) -> Result<u64, CodecError> {
        Ok(digits::read_digits(self.take(width)?)?)
    }

    fn take_id<const N: usize>(&mut self) -> Result<kolibri_core::DigitId<N>, CodecError> {
        Ok(kolibri_core::DigitId::from_ascii(self.take(N)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello_frame() -> Frame {
        Frame::Hello(HelloPayload {
            version: 2,
            node_id: NodeId::parse("0000000000004242").unwrap(),
            services: 42,
            reputation: 620,
        })
    }

    #[test]
    fn test_hello_roundtrip() {
        let frame = hello_frame();
        let encoded = frame.serialize().unwrap();
        assert!(encoded.len() <= MAX_FRAME_LEN);
        assert!(encoded.bytes().all(|b| b.is_ascii_digit()));
        assert_eq!(Frame::parse(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_all_variants_roundtrip_under_max_len() {
        let frames = [
            hello_frame(),
            Frame::Ping(PingPayload {
                nonce: 4_294_967_295,
                latency_hint_ms: 99_999,
            }),
            Frame::ProgramOffer(ProgramOfferPayload {
                program_id: ProgramId::parse("1234567890123456").unwrap(),
                poe_milli: 1000,
                mdl_score: 65_535,
                gas_used: 999_999,
            }),
            Frame::BlockOffer(BlockOfferPayload {
                block_id: BlockId::parse("6543210987654321").unwrap(),
                height: 99_999_999,
                poe_milli: 850,
                program_count: 12,
            }),
            Frame::FkvDelta(FkvDeltaPayload {
                prefix: DeltaPrefix::parse("021200000000").unwrap(),
                entry_count: 12,
                compressed_size: 4096,
                checksum: 1234,
                raw_size: 0,
                data: Vec::new(),
            }),
        ];
        for frame in frames {
            let encoded = frame.serialize().unwrap();
            assert!(encoded.len() <= MAX_FRAME_LEN, "frame too long: {encoded}");
            assert_eq!(Frame::parse(&encoded).unwrap(), frame);
        }
    }

    #[test]
    fn test_parse_rejects_bad_version() {
        let mut encoded = hello_frame().serialize().unwrap();
        encoded.replace_range(..4, "0002");
        assert!(matches!(
            Frame::parse(&encoded),
            Err(CodecError::BadVersion(2))
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_code() {
        let mut encoded = hello_frame().serialize().unwrap();
        encoded.replace_range(4..6, "99");
        assert!(matches!(
            Frame::parse(&encoded),
            Err(CodecError::UnknownCode(99))
        ));
    }

    #[test]
    fn test_parse_rejects_trailing_and_non_digit() {
        let encoded = hello_frame().serialize().unwrap();
        assert!(matches!(
            Frame::parse(&format!("{encoded}7")),
            Err(CodecError::TrailingBytes(1))
        ));
        let mut corrupted = encoded;
        corrupted.replace_range(8..9, "x");
        assert!(Frame::parse(&corrupted).is_err());
    }

    #[test]
    fn test_serialize_rejects_oversized_field() {
        let frame = Frame::Hello(HelloPayload {
            version: 2,
            node_id: NodeId::zero(),
            services: 42,
            reputation: 1001, // exceeds 3-digit width
        });
        assert!(frame.serialize().is_err());
    }
}
