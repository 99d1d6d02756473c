// sdo.rs - server-side SDO protocol: request decoding and response framing
use socketcan::EmbeddedFrame as Frame;
use socketcan::{CanFrame, StandardId};
use std::error::Error;
use std::fmt;

/// COB-ID base for SDO client-to-server requests (0x600 + node id).
pub const SDO_REQUEST_BASE: u16 = 0x600;
/// COB-ID base for SDO server-to-client responses (0x580 + node id).
pub const SDO_RESPONSE_BASE: u16 = 0x580;
/// Mask selecting the function code bits of an 11-bit COB-ID.
pub const FUNCTION_CODE_MASK: u16 = 0x780;
/// Mask selecting the node id bits of an 11-bit COB-ID.
pub const NODE_ID_MASK: u16 = 0x7F;

/// Initiate upload (read) request.
const CCS_UPLOAD_REQUEST: u8 = 0x40;
/// Expedited download (write) request carrying 4 data bytes.
const CCS_DOWNLOAD_4_BYTES: u8 = 0x23;
/// Expedited download (write) request carrying 1 data byte.
const CCS_DOWNLOAD_1_BYTE: u8 = 0x2F;
/// Abort transfer indicator.
const CS_ABORT: u8 = 0x80;

/// SDO data types supported by the expedited codec.
///
/// Anything outside this set (strings, floats, domains) cannot be framed
/// as an expedited upload response and is reported to the client as a
/// general-error abort by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoDataType {
    Unsigned8,
    Unsigned16,
    Unsigned32,
    Signed16,
    Signed32,
}

impl SdoDataType {
    /// Resolve a CiA 306 type code (0x0003..0x0007) to a supported type.
    pub fn from_type_code(code: u16) -> Option<Self> {
        match code {
            0x0003 => Some(Self::Signed16),
            0x0004 => Some(Self::Signed32),
            0x0005 => Some(Self::Unsigned8),
            0x0006 => Some(Self::Unsigned16),
            0x0007 => Some(Self::Unsigned32),
            _ => None,
        }
    }

    /// Parse an EDS `DataType` attribute value such as `0x0005`, `0x05` or `5`.
    ///
    /// The attribute is a hex literal with an optional `0x` prefix.
    pub fn from_eds_type(eds_type: &str) -> Option<Self> {
        let trimmed = eds_type.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let code = u16::from_str_radix(digits, 16).ok()?;
        Self::from_type_code(code)
    }

    /// Command byte of an expedited upload response carrying this type.
    pub fn upload_command(&self) -> u8 {
        match self {
            Self::Unsigned8 => 0x4F,
            Self::Unsigned16 | Self::Signed16 => 0x4B,
            Self::Unsigned32 | Self::Signed32 => 0x43,
        }
    }

    /// Number of significant data bytes in the response payload.
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Unsigned8 => 1,
            Self::Unsigned16 | Self::Signed16 => 2,
            Self::Unsigned32 | Self::Signed32 => 4,
        }
    }
}

impl fmt::Display for SdoDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsigned8 => write!(f, "Unsigned8"),
            Self::Unsigned16 => write!(f, "Unsigned16"),
            Self::Unsigned32 => write!(f, "Unsigned32"),
            Self::Signed16 => write!(f, "Signed16"),
            Self::Signed32 => write!(f, "Signed32"),
        }
    }
}

/// Single-byte SDO abort codes carried in byte 4 of an abort frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AbortCode {
    /// Client command specifier not supported by this node.
    CommandNotSupported = 0x02,
    /// Object does not exist in the object dictionary.
    ObjectNotFound = 0x05,
    /// General error (unsupported data type, unrepresentable value).
    GeneralError = 0x08,
}

impl fmt::Display for AbortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandNotSupported => write!(f, "command not supported (0x02)"),
            Self::ObjectNotFound => write!(f, "object not found (0x05)"),
            Self::GeneralError => write!(f, "general error (0x08)"),
        }
    }
}

/// Classification of a decoded request, switched exhaustively by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Expedited upload (read) request.
    Upload,
    /// Expedited download (write) request with 1 or 4 significant bytes.
    Download { data: [u8; 4], len: usize },
    /// Command specifier outside the expedited subset.
    Unknown,
}

/// A decoded SDO client-to-server request.
#[derive(Debug, Clone, Copy)]
pub struct SdoRequest {
    /// Raw command byte as received.
    pub command: u8,
    pub index: u16,
    pub subindex: u8,
    pub kind: RequestKind,
}

/// Errors raised while decoding a request payload.
#[derive(Debug)]
pub enum SdoFrameError {
    /// The frame carried fewer than the 8 bytes an SDO request requires.
    TooShort(usize),
}

impl fmt::Display for SdoFrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort(len) => write!(f, "SDO frame too short: {} bytes, expected 8", len),
        }
    }
}

impl Error for SdoFrameError {}

/// Errors raised while encoding an upload response.
#[derive(Debug)]
pub enum EncodeError {
    /// The resolved value does not fit the declared data type.
    ValueOutOfRange { value: i64, data_type: SdoDataType },
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValueOutOfRange { value, data_type } => {
                write!(f, "value {} does not fit data type {}", value, data_type)
            }
        }
    }
}

impl Error for EncodeError {}

/// Extract the target node id from a COB-ID if it carries the SDO request
/// function code. Any other function code means "not an SDO request".
pub fn request_node_id(cob_id: u16) -> Option<u8> {
    if cob_id & FUNCTION_CODE_MASK == SDO_REQUEST_BASE {
        Some((cob_id & NODE_ID_MASK) as u8)
    } else {
        None
    }
}

/// Decode an 8-byte request payload into an [`SdoRequest`].
///
/// Short frames are malformed: the address fields cannot be trusted, so no
/// abort can be built from them and the caller should drop the frame.
pub fn decode_request(data: &[u8]) -> Result<SdoRequest, SdoFrameError> {
    if data.len() < 8 {
        return Err(SdoFrameError::TooShort(data.len()));
    }

    let command = data[0];
    let index = u16::from_le_bytes([data[1], data[2]]);
    let subindex = data[3];

    let kind = match command {
        CCS_UPLOAD_REQUEST => RequestKind::Upload,
        CCS_DOWNLOAD_4_BYTES => RequestKind::Download {
            data: [data[4], data[5], data[6], data[7]],
            len: 4,
        },
        CCS_DOWNLOAD_1_BYTE => RequestKind::Download {
            data: [data[4], 0, 0, 0],
            len: 1,
        },
        _ => RequestKind::Unknown,
    };

    Ok(SdoRequest {
        command,
        index,
        subindex,
        kind,
    })
}

/// Encode an expedited upload response payload.
///
/// Layout: command byte from the type table, index little-endian, subindex,
/// then the value little-endian (two's complement for signed types), zero
/// padded to 8 bytes.
pub fn encode_upload_response(
    index: u16,
    subindex: u8,
    data_type: SdoDataType,
    value: i64,
) -> Result<[u8; 8], EncodeError> {
    let out_of_range = |value| EncodeError::ValueOutOfRange { value, data_type };

    let mut payload = [0u8; 8];
    payload[0] = data_type.upload_command();
    payload[1..3].copy_from_slice(&index.to_le_bytes());
    payload[3] = subindex;

    match data_type {
        SdoDataType::Unsigned8 => {
            payload[4] = u8::try_from(value).map_err(|_| out_of_range(value))?;
        }
        SdoDataType::Unsigned16 => {
            let v = u16::try_from(value).map_err(|_| out_of_range(value))?;
            payload[4..6].copy_from_slice(&v.to_le_bytes());
        }
        SdoDataType::Unsigned32 => {
            let v = u32::try_from(value).map_err(|_| out_of_range(value))?;
            payload[4..8].copy_from_slice(&v.to_le_bytes());
        }
        SdoDataType::Signed16 => {
            let v = i16::try_from(value).map_err(|_| out_of_range(value))?;
            payload[4..6].copy_from_slice(&v.to_le_bytes());
        }
        SdoDataType::Signed32 => {
            let v = i32::try_from(value).map_err(|_| out_of_range(value))?;
            payload[4..8].copy_from_slice(&v.to_le_bytes());
        }
    }

    Ok(payload)
}

/// Encode an abort payload echoing the request's index and subindex.
pub fn encode_abort(index: u16, subindex: u8, code: AbortCode) -> [u8; 8] {
    let mut payload = [0u8; 8];
    payload[0] = CS_ABORT;
    payload[1..3].copy_from_slice(&index.to_le_bytes());
    payload[3] = subindex;
    payload[4] = code as u8;
    payload
}

/// Build the CAN frame carrying a response payload on 0x580 + node id.
///
/// Value responses and aborts both use the server-to-client COB-ID.
pub fn build_response_frame(node_id: u8, payload: &[u8; 8]) -> Option<CanFrame> {
    let response_id = StandardId::new(SDO_RESPONSE_BASE + node_id as u16)?;
    CanFrame::new(response_id, payload)
}
