//! Encoding and decoding of the ATT PDUs used by the attribute client
use super::constants::*;
use super::error::{AttError, AttErrorCode, AttResult};
use crate::uuid::Uuid;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// ATT packet formats
pub trait AttPacket: Sized {
    /// Opcode for this packet
    fn opcode() -> u8;

    /// Parse packet from bytes, opcode included
    fn parse(data: &[u8]) -> AttResult<Self>;

    /// Serialize packet to bytes
    fn serialize(&self) -> Vec<u8>;
}

/// The response opcode that completes a request, `None` for PDUs that are
/// not requests.
pub fn response_opcode(request_opcode: u8) -> Option<u8> {
    match request_opcode {
        ATT_FIND_INFO_REQ => Some(ATT_FIND_INFO_RSP),
        ATT_READ_BY_TYPE_REQ => Some(ATT_READ_BY_TYPE_RSP),
        ATT_READ_REQ => Some(ATT_READ_RSP),
        ATT_READ_BY_GROUP_TYPE_REQ => Some(ATT_READ_BY_GROUP_TYPE_RSP),
        _ => None,
    }
}

/// Whether `opcode` can answer a request: an error response or one of the
/// response opcodes paired by `response_opcode`.
pub fn is_response_opcode(opcode: u8) -> bool {
    matches!(
        opcode,
        ATT_ERROR_RSP
            | ATT_FIND_INFO_RSP
            | ATT_READ_BY_TYPE_RSP
            | ATT_READ_RSP
            | ATT_READ_BY_GROUP_TYPE_RSP
    )
}

fn read_handle(cursor: &mut Cursor<&[u8]>) -> AttResult<u16> {
    cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| AttError::InvalidPdu)
}

fn push_uuid(packet: &mut Vec<u8>, uuid: &Uuid) {
    if let Some(uuid16) = uuid.as_u16() {
        packet.extend_from_slice(&uuid16.to_le_bytes());
    } else {
        packet.extend_from_slice(uuid.as_bytes_le());
    }
}

/// Requests carrying a handle range and a type, shared by Read By Type and
/// Read By Group Type.
fn parse_range_with_type(opcode: u8, data: &[u8]) -> AttResult<(u16, u16, Uuid)> {
    if data.len() != 7 && data.len() != 21 {
        return Err(AttError::InvalidPdu);
    }
    if data[0] != opcode {
        return Err(AttError::InvalidPdu);
    }

    let mut cursor = Cursor::new(&data[1..]);
    let start_handle = read_handle(&mut cursor)?;
    let end_handle = read_handle(&mut cursor)?;
    let uuid = Uuid::try_from_slice_le(&data[5..]).ok_or(AttError::InvalidPdu)?;

    Ok((start_handle, end_handle, uuid))
}

fn serialize_range_with_type(opcode: u8, start: u16, end: u16, uuid: &Uuid) -> Vec<u8> {
    let mut packet = Vec::with_capacity(21);

    packet.push(opcode);
    packet.extend_from_slice(&start.to_le_bytes());
    packet.extend_from_slice(&end.to_le_bytes());
    push_uuid(&mut packet, uuid);

    packet
}

/// Error response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Request opcode in error
    pub request_opcode: u8,
    /// Attribute handle in error
    pub handle: u16,
    /// Raw error code
    pub code: u8,
}

impl ErrorResponse {
    pub fn new(request_opcode: u8, handle: u16, code: u8) -> Self {
        Self {
            request_opcode,
            handle,
            code,
        }
    }

    pub fn error_code(&self) -> AttErrorCode {
        self.code.into()
    }

    pub fn into_error(self) -> AttError {
        AttError::Protocol(self.error_code(), self.handle)
    }
}

impl AttPacket for ErrorResponse {
    fn opcode() -> u8 {
        ATT_ERROR_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 5 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[2..]);
        let handle = read_handle(&mut cursor)?;

        Ok(Self {
            request_opcode: data[1],
            handle,
            code: data[4],
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(5);

        packet.push(Self::opcode());
        packet.push(self.request_opcode);
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.push(self.code);

        packet
    }
}

/// Read By Group Type Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadByGroupTypeRequest {
    pub start_handle: u16,
    pub end_handle: u16,
    pub group_type: Uuid,
}

impl ReadByGroupTypeRequest {
    /// Request for the next page of primary services
    pub fn primary_services(start_handle: u16) -> Self {
        Self {
            start_handle,
            end_handle: ATT_HANDLE_MAX,
            group_type: Uuid::from_u16(PRIMARY_SERVICE_UUID),
        }
    }
}

impl AttPacket for ReadByGroupTypeRequest {
    fn opcode() -> u8 {
        ATT_READ_BY_GROUP_TYPE_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        let (start_handle, end_handle, group_type) =
            parse_range_with_type(Self::opcode(), data)?;

        Ok(Self {
            start_handle,
            end_handle,
            group_type,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        serialize_range_with_type(
            Self::opcode(),
            self.start_handle,
            self.end_handle,
            &self.group_type,
        )
    }
}

/// Attribute data in Read By Group Type Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeData {
    /// Attribute handle
    pub handle: u16,
    /// Group end handle
    pub end_group_handle: u16,
    /// Attribute value
    pub value: Vec<u8>,
}

/// Read By Group Type Response packet.
///
/// Only the two entry lengths a primary service declaration can produce are
/// accepted: 6 bytes for a 16-bit UUID and 20 bytes for a 128-bit UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadByGroupTypeResponse {
    /// Length of each item
    pub length: u8,
    /// List of attribute data
    pub data: Vec<AttributeData>,
}

impl AttPacket for ReadByGroupTypeResponse {
    fn opcode() -> u8 {
        ATT_READ_BY_GROUP_TYPE_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 2 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let length = data[1];
        if length != ATT_GROUP_ENTRY_LEN_16 && length != ATT_GROUP_ENTRY_LEN_128 {
            return Err(AttError::InvalidPdu);
        }

        let data_list = data[2..]
            .chunks_exact(length as usize)
            .map(|entry| {
                let mut cursor = Cursor::new(entry);
                let handle = read_handle(&mut cursor)?;
                let end_group_handle = read_handle(&mut cursor)?;

                Ok(AttributeData {
                    handle,
                    end_group_handle,
                    value: entry[4..].to_vec(),
                })
            })
            .collect::<AttResult<Vec<_>>>()?;

        if data_list.is_empty() {
            return Err(AttError::InvalidPdu);
        }

        Ok(Self {
            length,
            data: data_list,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::new();

        packet.push(Self::opcode());
        packet.push(self.length);

        for item in &self.data {
            packet.extend_from_slice(&item.handle.to_le_bytes());
            packet.extend_from_slice(&item.end_group_handle.to_le_bytes());
            packet.extend_from_slice(&item.value);
        }

        packet
    }
}

/// Read By Type Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadByTypeRequest {
    pub start_handle: u16,
    pub end_handle: u16,
    pub attribute_type: Uuid,
}

impl ReadByTypeRequest {
    /// Request for the characteristic declarations in `[start, end]`
    pub fn characteristics(start_handle: u16, end_handle: u16) -> Self {
        Self {
            start_handle,
            end_handle,
            attribute_type: Uuid::from_u16(CHARACTERISTIC_UUID),
        }
    }
}

impl AttPacket for ReadByTypeRequest {
    fn opcode() -> u8 {
        ATT_READ_BY_TYPE_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        let (start_handle, end_handle, attribute_type) =
            parse_range_with_type(Self::opcode(), data)?;

        Ok(Self {
            start_handle,
            end_handle,
            attribute_type,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        serialize_range_with_type(
            Self::opcode(),
            self.start_handle,
            self.end_handle,
            &self.attribute_type,
        )
    }
}

/// Handle and value in Read By Type Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValue {
    pub handle: u16,
    pub value: Vec<u8>,
}

/// Read By Type Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadByTypeResponse {
    /// Length of each item
    pub length: u8,
    /// List of handle-value pairs
    pub data: Vec<HandleValue>,
}

impl AttPacket for ReadByTypeResponse {
    fn opcode() -> u8 {
        ATT_READ_BY_TYPE_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 2 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let length = data[1];
        if length < 2 {
            return Err(AttError::InvalidPdu);
        }

        let data_list = data[2..]
            .chunks_exact(length as usize)
            .map(|entry| HandleValue {
                handle: u16::from_le_bytes([entry[0], entry[1]]),
                value: entry[2..].to_vec(),
            })
            .collect::<Vec<_>>();

        if data_list.is_empty() {
            return Err(AttError::InvalidPdu);
        }

        Ok(Self {
            length,
            data: data_list,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::new();

        packet.push(Self::opcode());
        packet.push(self.length);

        for item in &self.data {
            packet.extend_from_slice(&item.handle.to_le_bytes());
            packet.extend_from_slice(&item.value);
        }

        packet
    }
}

/// Find Information Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindInformationRequest {
    pub start_handle: u16,
    pub end_handle: u16,
}

impl AttPacket for FindInformationRequest {
    fn opcode() -> u8 {
        ATT_FIND_INFO_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 5 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let start_handle = read_handle(&mut cursor)?;
        let end_handle = read_handle(&mut cursor)?;

        Ok(Self {
            start_handle,
            end_handle,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(5);

        packet.push(Self::opcode());
        packet.extend_from_slice(&self.start_handle.to_le_bytes());
        packet.extend_from_slice(&self.end_handle.to_le_bytes());

        packet
    }
}

/// Handle-UUID pair in Find Information Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleUuidPair {
    /// 16-bit UUID
    Uuid16(u16, u16),
    /// 128-bit UUID
    Uuid128(u16, Uuid),
}

impl HandleUuidPair {
    pub fn handle(&self) -> u16 {
        match self {
            HandleUuidPair::Uuid16(handle, _) | HandleUuidPair::Uuid128(handle, _) => *handle,
        }
    }
}

/// Find Information Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindInformationResponse {
    /// Format of information data
    pub format: u8,
    /// List of handle-UUID pairs
    pub information_data: Vec<HandleUuidPair>,
}

impl AttPacket for FindInformationResponse {
    fn opcode() -> u8 {
        ATT_FIND_INFO_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 2 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let format = data[1];
        let information_data = match format {
            ATT_FIND_INFO_RSP_FORMAT_16BIT => data[2..]
                .chunks_exact(4)
                .map(|pair| {
                    HandleUuidPair::Uuid16(
                        u16::from_le_bytes([pair[0], pair[1]]),
                        u16::from_le_bytes([pair[2], pair[3]]),
                    )
                })
                .collect::<Vec<_>>(),
            ATT_FIND_INFO_RSP_FORMAT_128BIT => data[2..]
                .chunks_exact(18)
                .map(|pair| {
                    let mut uuid_bytes = [0u8; 16];
                    uuid_bytes.copy_from_slice(&pair[2..]);
                    HandleUuidPair::Uuid128(
                        u16::from_le_bytes([pair[0], pair[1]]),
                        Uuid::from_bytes_le(uuid_bytes),
                    )
                })
                .collect::<Vec<_>>(),
            _ => return Err(AttError::InvalidPdu),
        };

        if information_data.is_empty() {
            return Err(AttError::InvalidPdu);
        }

        Ok(Self {
            format,
            information_data,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::new();

        packet.push(Self::opcode());
        packet.push(self.format);

        for pair in &self.information_data {
            match pair {
                HandleUuidPair::Uuid16(handle, uuid16) => {
                    packet.extend_from_slice(&handle.to_le_bytes());
                    packet.extend_from_slice(&uuid16.to_le_bytes());
                }
                HandleUuidPair::Uuid128(handle, uuid) => {
                    packet.extend_from_slice(&handle.to_le_bytes());
                    packet.extend_from_slice(uuid.as_bytes_le());
                }
            }
        }

        packet
    }
}

/// Read Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub handle: u16,
}

impl AttPacket for ReadRequest {
    fn opcode() -> u8 {
        ATT_READ_REQ
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 3 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = read_handle(&mut cursor)?;

        Ok(Self { handle })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3);

        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());

        packet
    }
}

/// Read Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    pub value: Vec<u8>,
}

impl AttPacket for ReadResponse {
    fn opcode() -> u8 {
        ATT_READ_RSP
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.is_empty() || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        Ok(Self {
            value: data[1..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(1 + self.value.len());

        packet.push(Self::opcode());
        packet.extend_from_slice(&self.value);

        packet
    }
}

/// Write Command packet, never answered by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCommand {
    pub handle: u16,
    pub value: Vec<u8>,
}

impl AttPacket for WriteCommand {
    fn opcode() -> u8 {
        ATT_WRITE_CMD
    }

    fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < 3 || data[0] != Self::opcode() {
            return Err(AttError::InvalidPdu);
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = read_handle(&mut cursor)?;

        Ok(Self {
            handle,
            value: data[3..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(ATT_VALUE_HEADER_SIZE + self.value.len());

        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);

        packet
    }
}

/// Handle Value Notification or Indication. The two share a layout and
/// differ only in the opcode and in whether a confirmation is owed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValueEvent {
    pub indication: bool,
    pub handle: u16,
    pub value: Vec<u8>,
}

impl HandleValueEvent {
    pub fn parse(data: &[u8]) -> AttResult<Self> {
        if data.len() < ATT_VALUE_HEADER_SIZE {
            return Err(AttError::InvalidPdu);
        }

        let indication = match data[0] {
            ATT_HANDLE_VALUE_NTF => false,
            ATT_HANDLE_VALUE_IND => true,
            _ => return Err(AttError::InvalidPdu),
        };

        let mut cursor = Cursor::new(&data[1..]);
        let handle = read_handle(&mut cursor)?;

        Ok(Self {
            indication,
            handle,
            value: data[ATT_VALUE_HEADER_SIZE..].to_vec(),
        })
    }
}

/// Handle Value Confirmation packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValueConfirmation;

impl HandleValueConfirmation {
    pub fn serialize(&self) -> Vec<u8> {
        vec![ATT_HANDLE_VALUE_CONF]
    }
}
