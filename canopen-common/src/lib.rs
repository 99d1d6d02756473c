//! # CANopen Common Library
//!
//! Shared CANopen SDO protocol implementation used by the BMS node emulator.
//!
//! This library provides:
//! - SDO request decoding (expedited transfers only)
//! - SDO response and abort frame encoding
//! - Common data types and error handling

pub mod sdo;

// Re-export commonly used types for convenience
pub use sdo::{
    AbortCode, EncodeError, RequestKind, SdoDataType, SdoFrameError, SdoRequest,
    build_response_frame, decode_request, encode_abort, encode_upload_response, request_node_id,
};
