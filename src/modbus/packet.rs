use crate::prelude::*;

use bytes::{BufMut, BytesMut};
use nom::{multi::count, number::complete::be_u16};
use nom_derive::{Nom, Parse};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::convert::TryFrom;

/// MBAP header is 7 bytes; `length` covers the unit id plus the PDU.
pub const HEADER_LEN: usize = 7;
pub const PROTOCOL_ID: u16 = 0;
// a read-holding response carries at most 125 registers
pub const MAX_REGISTERS: u16 = 125;
const MAX_FRAME_LEN: usize = 260;

// {{{ FunctionCode
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FunctionCode {
    ReadHoldingRegisters = 0x03,
    // ReadInputRegisters = 0x04,
    // WriteSingleRegister = 0x06,
    // WriteMultipleRegisters = 0x10,
}

const EXCEPTION_FLAG: u8 = 0x80;
// }}}

// {{{ ExceptionCode
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetFailedToRespond = 0x0B,
}

impl ExceptionCode {
    pub fn describe(code: u8) -> &'static str {
        use ExceptionCode::*;

        match Self::try_from(code) {
            Ok(IllegalFunction) => "illegal function",
            Ok(IllegalDataAddress) => "illegal data address",
            Ok(IllegalDataValue) => "illegal data value",
            Ok(ServerDeviceFailure) => "server device failure",
            Ok(Acknowledge) => "acknowledge",
            Ok(ServerDeviceBusy) => "server device busy",
            Ok(MemoryParityError) => "memory parity error",
            Ok(GatewayPathUnavailable) => "gateway path unavailable",
            Ok(GatewayTargetFailedToRespond) => "gateway target failed to respond",
            Err(_) => "unknown exception",
        }
    }
}
// }}}

// {{{ MbapHeader
#[derive(Clone, Copy, Debug, Eq, PartialEq, Nom)]
#[nom(BigEndian)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn new(transaction_id: u16, unit_id: u8, pdu_len: usize) -> Self {
        Self {
            transaction_id,
            protocol_id: PROTOCOL_ID,
            length: (pdu_len + 1) as u16,
            unit_id,
        }
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u16(self.transaction_id);
        buf.put_u16(self.protocol_id);
        buf.put_u16(self.length);
        buf.put_u8(self.unit_id);
    }

    /// Total bytes on the wire for the frame this header starts.
    pub fn frame_len(&self) -> usize {
        6 + self.length as usize
    }
}
// }}}

// {{{ ReadHoldingRequest
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReadHoldingRequest {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub address: u16,
    pub count: u16,
}

impl ReadHoldingRequest {
    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + 5);
        MbapHeader::new(self.transaction_id, self.unit_id, 5).put(&mut buf);
        buf.put_u8(FunctionCode::ReadHoldingRegisters.into());
        buf.put_u16(self.address);
        buf.put_u16(self.count);
        buf.to_vec()
    }

    pub fn decode(input: &[u8]) -> Result<Self> {
        let (rest, header) =
            MbapHeader::parse(input).map_err(|err| anyhow!("bad request header: {}", err))?;

        if rest.len() < 5 {
            bail!("request pdu too short ({} bytes)", rest.len());
        }
        if rest[0] != u8::from(FunctionCode::ReadHoldingRegisters) {
            bail!("unsupported function {:#04x}", rest[0]);
        }

        Ok(Self {
            transaction_id: header.transaction_id,
            unit_id: header.unit_id,
            address: u16::from_be_bytes([rest[1], rest[2]]),
            count: u16::from_be_bytes([rest[3], rest[4]]),
        })
    }
}
// }}}

// {{{ Response
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Response {
    Registers { header: MbapHeader, words: Vec<u16> },
    Exception { header: MbapHeader, function: u8, code: u8 },
}

impl Response {
    pub fn header(&self) -> &MbapHeader {
        match self {
            Self::Registers { header, .. } | Self::Exception { header, .. } => header,
        }
    }

    pub fn transaction_id(&self) -> u16 {
        self.header().transaction_id
    }

    pub fn registers(transaction_id: u16, unit_id: u8, words: Vec<u16>) -> Self {
        Self::Registers {
            header: MbapHeader::new(transaction_id, unit_id, 2 + words.len() * 2),
            words,
        }
    }

    pub fn exception(transaction_id: u16, unit_id: u8, code: ExceptionCode) -> Self {
        Self::Exception {
            header: MbapHeader::new(transaction_id, unit_id, 2),
            function: u8::from(FunctionCode::ReadHoldingRegisters) | EXCEPTION_FLAG,
            code: code.into(),
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(MAX_FRAME_LEN);
        match self {
            Self::Registers { header, words } => {
                header.put(&mut buf);
                buf.put_u8(FunctionCode::ReadHoldingRegisters.into());
                buf.put_u8((words.len() * 2) as u8);
                for word in words {
                    buf.put_u16(*word);
                }
            }
            Self::Exception {
                header,
                function,
                code,
            } => {
                header.put(&mut buf);
                buf.put_u8(*function);
                buf.put_u8(*code);
            }
        }
        buf.to_vec()
    }

    fn decode(header: MbapHeader, pdu: &[u8]) -> Result<Self> {
        let function = *pdu.first().ok_or_else(|| anyhow!("empty pdu"))?;

        if function & EXCEPTION_FLAG != 0 {
            let code = *pdu
                .get(1)
                .ok_or_else(|| anyhow!("exception response without code"))?;
            return Ok(Self::Exception {
                header,
                function,
                code,
            });
        }

        if function != u8::from(FunctionCode::ReadHoldingRegisters) {
            bail!("unexpected function {:#04x} in response", function);
        }

        let byte_count = *pdu
            .get(1)
            .ok_or_else(|| anyhow!("response without byte count"))? as usize;
        let data = &pdu[2..];
        if data.len() < byte_count {
            bail!(
                "response declares {} bytes but carries {}",
                byte_count,
                data.len()
            );
        }

        let (_, words) = count(be_u16::<_, nom::error::Error<&[u8]>>, byte_count / 2)(data)
            .map_err(|err| anyhow!("bad register payload: {}", err))?;

        Ok(Self::Registers { header, words })
    }
}
// }}}

// {{{ FrameDecoder
/// Splits a byte stream into MBAP frames.
#[derive(Debug, Default)]
pub struct FrameDecoder;

impl FrameDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl tokio_util::codec::Decoder for FrameDecoder {
    type Item = Response;
    type Error = anyhow::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let (_, header) = MbapHeader::parse(&src[..HEADER_LEN])
            .map_err(|err| anyhow!("bad response header: {}", err))?;

        if header.protocol_id != PROTOCOL_ID {
            bail!("unexpected protocol id {}", header.protocol_id);
        }
        if header.length < 2 || header.frame_len() > MAX_FRAME_LEN {
            bail!("implausible frame length {}", header.length);
        }

        let frame_len = header.frame_len();
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(frame_len);
        let response = Response::decode(header, &frame[HEADER_LEN..])?;

        Ok(Some(response))
    }
}
// }}}
