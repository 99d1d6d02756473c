//! SDO server: answers expedited upload requests for this node's parameters.

use canopen_common::sdo::{
    self, AbortCode, RequestKind, SdoRequest, build_response_frame, encode_abort,
    encode_upload_response,
};
use log::{debug, info, warn};
use socketcan::{CanFrame, EmbeddedFrame};

use crate::eds::ObjectDictionary;
use crate::values::ValueStore;

pub struct SdoServer {
    node_id: u8,
    dictionary: ObjectDictionary,
    values: ValueStore,
}

impl SdoServer {
    pub fn new(node_id: u8, dictionary: ObjectDictionary, values: ValueStore) -> Self {
        Self {
            node_id,
            dictionary,
            values,
        }
    }

    /// Handle an incoming CAN frame.
    ///
    /// Returns `Some(response_frame)` when the frame was an SDO request
    /// addressed to this node; frames for other nodes or other function
    /// codes produce no response at all.
    pub fn handle_frame(&self, frame: &CanFrame) -> Option<CanFrame> {
        let cob_id = match frame.id() {
            socketcan::Id::Standard(std_id) => std_id.as_raw(),
            socketcan::Id::Extended(_) => return None,
        };

        let node_id = sdo::request_node_id(cob_id)?;
        if node_id != self.node_id {
            return None;
        }

        let request = match sdo::decode_request(frame.data()) {
            Ok(request) => request,
            Err(e) => {
                warn!("dropping malformed request on 0x{:03X}: {}", cob_id, e);
                return None;
            }
        };

        let payload = self.respond(&request);
        let frame = build_response_frame(self.node_id, &payload);
        if frame.is_none() {
            warn!("could not build response frame for node {}", self.node_id);
        }
        frame
    }

    fn respond(&self, request: &SdoRequest) -> [u8; 8] {
        match request.kind {
            RequestKind::Upload => {
                debug!(
                    "SDO upload request 0x{:04X}:{:02X}",
                    request.index, request.subindex
                );
                self.respond_upload(request.index, request.subindex)
            }
            RequestKind::Download { len, .. } => {
                // This node is read-only; writes are refused, never dropped.
                info!(
                    "rejecting SDO write of {} byte(s) to 0x{:04X}:{:02X}: node is read-only",
                    len, request.index, request.subindex
                );
                self.abort(
                    request.index,
                    request.subindex,
                    AbortCode::CommandNotSupported,
                )
            }
            RequestKind::Unknown => {
                warn!(
                    "unknown SDO command 0x{:02X} for 0x{:04X}:{:02X}",
                    request.command, request.index, request.subindex
                );
                self.abort(
                    request.index,
                    request.subindex,
                    AbortCode::CommandNotSupported,
                )
            }
        }
    }

    fn respond_upload(&self, index: u16, subindex: u8) -> [u8; 8] {
        let entry = match self.dictionary.get(index, subindex) {
            Some(entry) => entry,
            None => {
                info!("object 0x{:04X}:{:02X} not in dictionary", index, subindex);
                return self.abort(index, subindex, AbortCode::ObjectNotFound);
            }
        };

        let name = match entry.parameter_name.as_deref() {
            Some(name) => name,
            None => {
                warn!("entry 0x{:04X}:{:02X} has no ParameterName", index, subindex);
                return self.abort(index, subindex, AbortCode::ObjectNotFound);
            }
        };

        // A dictionary hit without a simulated value is a configuration gap;
        // the client sees it as a missing object.
        let value = match self.values.get(name) {
            Some(value) => value,
            None => {
                warn!("no simulated value for parameter {:?}", name);
                return self.abort(index, subindex, AbortCode::ObjectNotFound);
            }
        };

        let data_type = match entry.data_type {
            Some(data_type) => data_type,
            None => {
                warn!(
                    "parameter {:?} has an unsupported DataType ({})",
                    name,
                    entry.attribute("DataType").unwrap_or("missing")
                );
                return self.abort(index, subindex, AbortCode::GeneralError);
            }
        };

        match encode_upload_response(index, subindex, data_type, value) {
            Ok(payload) => {
                info!(
                    "SDO response 0x{:04X}:{:02X} {} = {} ({})",
                    index, subindex, name, value, data_type
                );
                payload
            }
            Err(e) => {
                warn!("cannot encode {:?}: {}", name, e);
                self.abort(index, subindex, AbortCode::GeneralError)
            }
        }
    }

    fn abort(&self, index: u16, subindex: u8, code: AbortCode) -> [u8; 8] {
        info!("SDO abort 0x{:04X}:{:02X}: {}", index, subindex, code);
        encode_abort(index, subindex, code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eds::parse_eds;
    use socketcan::StandardId;

    const NODE_ID: u8 = 5;

    fn server() -> SdoServer {
        let dictionary = parse_eds(
            "\
[2100]
ParameterName=BatteryMonitoring
SubNumber=3
[2100sub1]
ParameterName=SOC
DataType=0x0005
[2100sub2]
ParameterName=PackCurrent
DataType=0x0003
[2100sub3]
ParameterName=Temperature
DataType=0x0008
[2101]
ParameterName=CellCount
DataType=0x0005
[2102]
ParameterName=Ghost
DataType=0x0005
",
        )
        .unwrap();
        let values = ValueStore::from_json(
            r#"{"SOC": 42, "PackCurrent": -5, "Temperature": 23, "CellCount": 300}"#,
        )
        .unwrap();
        SdoServer::new(NODE_ID, dictionary, values)
    }

    fn request_frame(cob_id: u16, data: &[u8]) -> CanFrame {
        let id = StandardId::new(cob_id).unwrap();
        CanFrame::new(id, data).unwrap()
    }

    fn response_data(frame: CanFrame) -> [u8; 8] {
        let mut data = [0u8; 8];
        data.copy_from_slice(frame.data());
        data
    }

    #[test]
    fn read_round_trip_unsigned8() {
        let server = server();
        let frame = request_frame(0x605, &[0x40, 0x00, 0x21, 0x01, 0, 0, 0, 0]);
        let response = server.handle_frame(&frame).unwrap();

        match response.id() {
            socketcan::Id::Standard(id) => assert_eq!(id.as_raw(), 0x585),
            socketcan::Id::Extended(_) => panic!("expected a standard id"),
        }
        assert_eq!(
            response_data(response),
            [0x4F, 0x00, 0x21, 0x01, 42, 0, 0, 0]
        );
    }

    #[test]
    fn read_signed16_packs_twos_complement() {
        let server = server();
        let frame = request_frame(0x605, &[0x40, 0x00, 0x21, 0x02, 0, 0, 0, 0]);
        let response = server.handle_frame(&frame).unwrap();
        assert_eq!(
            response_data(response),
            [0x4B, 0x00, 0x21, 0x02, 0xFB, 0xFF, 0, 0]
        );
    }

    #[test]
    fn simple_variable_resolves_at_wire_subindex_zero() {
        let server = server();
        let frame = request_frame(0x605, &[0x40, 0x01, 0x21, 0x00, 0, 0, 0, 0]);
        let response = server.handle_frame(&frame).unwrap();
        // CellCount = 300 does not fit Unsigned8: general error, not a crash.
        assert_eq!(
            response_data(response),
            [0x80, 0x01, 0x21, 0x00, 0x08, 0, 0, 0]
        );
    }

    #[test]
    fn unknown_object_aborts_not_found() {
        let server = server();
        let frame = request_frame(0x605, &[0x40, 0x34, 0x12, 0x09, 0, 0, 0, 0]);
        let response = server.handle_frame(&frame).unwrap();
        assert_eq!(
            response_data(response),
            [0x80, 0x34, 0x12, 0x09, 0x05, 0, 0, 0]
        );
    }

    #[test]
    fn value_store_miss_aborts_not_found() {
        let server = server();
        // Ghost is in the dictionary but has no simulated value.
        let frame = request_frame(0x605, &[0x40, 0x02, 0x21, 0x00, 0, 0, 0, 0]);
        let response = server.handle_frame(&frame).unwrap();
        assert_eq!(
            response_data(response),
            [0x80, 0x02, 0x21, 0x00, 0x05, 0, 0, 0]
        );
    }

    #[test]
    fn unsupported_data_type_aborts_general_error() {
        let server = server();
        // Temperature is declared Real32, outside the expedited table.
        let frame = request_frame(0x605, &[0x40, 0x00, 0x21, 0x03, 0, 0, 0, 0]);
        let response = server.handle_frame(&frame).unwrap();
        assert_eq!(
            response_data(response),
            [0x80, 0x00, 0x21, 0x03, 0x08, 0, 0, 0]
        );
    }

    #[test]
    fn unknown_command_aborts_command_not_supported() {
        let server = server();
        let frame = request_frame(0x605, &[0x10, 0x00, 0x21, 0x01, 0, 0, 0, 0]);
        let response = server.handle_frame(&frame).unwrap();
        assert_eq!(
            response_data(response),
            [0x80, 0x00, 0x21, 0x01, 0x02, 0, 0, 0]
        );
    }

    #[test]
    fn writes_are_refused_with_an_abort() {
        let server = server();
        for command in [0x23u8, 0x2F] {
            let frame = request_frame(0x605, &[command, 0x00, 0x21, 0x01, 99, 0, 0, 0]);
            let response = server.handle_frame(&frame).unwrap();
            assert_eq!(
                response_data(response),
                [0x80, 0x00, 0x21, 0x01, 0x02, 0, 0, 0]
            );
        }
    }

    #[test]
    fn requests_for_other_nodes_are_ignored() {
        let server = server();
        let frame = request_frame(0x606, &[0x40, 0x00, 0x21, 0x01, 0, 0, 0, 0]);
        assert!(server.handle_frame(&frame).is_none());
    }

    #[test]
    fn non_sdo_function_codes_are_ignored() {
        let server = server();
        // TPDO1 from our own node id.
        let frame = request_frame(0x185, &[0x40, 0x00, 0x21, 0x01, 0, 0, 0, 0]);
        assert!(server.handle_frame(&frame).is_none());
    }

    #[test]
    fn short_frames_are_dropped_without_response() {
        let server = server();
        let frame = request_frame(0x605, &[0x40, 0x00, 0x21]);
        assert!(server.handle_frame(&frame).is_none());
    }
}
