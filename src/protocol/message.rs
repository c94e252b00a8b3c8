//! Inbound (and mirrored outbound) message decoding.

use super::{info_type, mode_info_type, MessageType, MIN_FRAME_LEN};
use crate::error::DecodeError;
use crate::types::{AttachEvent, Capabilities, DeviceType, FeedbackCode, HubErrorCode, PortId};

/// Port information payload (message type 0x43).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortInfo {
    /// Info type 0x01.
    ModeInfo {
        capabilities: Option<Capabilities>,
        total_modes: Option<u8>,
        input_modes: Option<u16>,
        output_modes: Option<u16>,
    },
    /// Info type 0x02: one bitmask per allowed combination.
    ModeCombinations(Vec<u16>),
    /// Any other info type.
    Raw(Vec<u8>),
}

/// Port mode information payload (message type 0x44).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeInfo {
    /// Info type 0x00.
    Name(String),
    /// Info type 0x80.
    ValueFormat {
        values: Option<u8>,
        data_type: Option<u8>,
        figures: Option<u8>,
        decimals: Option<u8>,
    },
    /// Any other info type.
    Raw(Vec<u8>),
}

/// A decoded frame.
///
/// Fields are `None` when the frame ended before them. Unknown message types
/// decode to [`Message::Unrecognized`], never to an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    HubPropertyUpdate {
        property: Option<u8>,
        operation: Option<u8>,
        payload: Vec<u8>,
    },
    HubActionRequest {
        action: Option<u8>,
        payload: Vec<u8>,
    },
    AttachedIo {
        port: Option<PortId>,
        event: Option<AttachEvent>,
        device_type: Option<DeviceType>,
        hardware_rev: Option<u32>,
        software_rev: Option<u32>,
    },
    GenericError {
        command_type: Option<u8>,
        error_code: Option<HubErrorCode>,
    },
    PortInformationRequest {
        port: Option<PortId>,
        info_type: Option<u8>,
    },
    PortModeInformationRequest {
        port: Option<PortId>,
        mode: Option<u8>,
        info_type: Option<u8>,
    },
    PortInputFormatSetup {
        port: Option<PortId>,
        mode: Option<u8>,
        delta: Option<u32>,
        notify: Option<bool>,
    },
    PortInformationResponse {
        port: Option<PortId>,
        info_type: Option<u8>,
        info: Option<PortInfo>,
    },
    PortModeInformationResponse {
        port: Option<PortId>,
        mode: Option<u8>,
        info_type: Option<u8>,
        info: Option<ModeInfo>,
    },
    PortValueSingle {
        port: Option<PortId>,
        raw: Vec<u8>,
    },
    PortOutputCommand {
        port: Option<PortId>,
        startup: Option<u8>,
        subcommand: Option<u8>,
        payload: Vec<u8>,
    },
    PortOutputFeedback {
        port: Option<PortId>,
        feedback: Option<FeedbackCode>,
    },
    Unrecognized {
        message_type: u8,
        raw: Vec<u8>,
    },
}

impl Message {
    /// Message type byte this message was decoded from.
    pub fn message_type(&self) -> u8 {
        match self {
            Self::HubPropertyUpdate { .. } => MessageType::HubProperties.as_u8(),
            Self::HubActionRequest { .. } => MessageType::HubActions.as_u8(),
            Self::AttachedIo { .. } => MessageType::HubAttachedIo.as_u8(),
            Self::GenericError { .. } => MessageType::GenericError.as_u8(),
            Self::PortInformationRequest { .. } => MessageType::PortInformationRequest.as_u8(),
            Self::PortModeInformationRequest { .. } => {
                MessageType::PortModeInformationRequest.as_u8()
            }
            Self::PortInputFormatSetup { .. } => MessageType::PortInputFormatSetupSingle.as_u8(),
            Self::PortInformationResponse { .. } => MessageType::PortInformation.as_u8(),
            Self::PortModeInformationResponse { .. } => MessageType::PortModeInformation.as_u8(),
            Self::PortValueSingle { .. } => MessageType::PortValueSingle.as_u8(),
            Self::PortOutputCommand { .. } => MessageType::PortOutputCommand.as_u8(),
            Self::PortOutputFeedback { .. } => MessageType::PortOutputCommandFeedback.as_u8(),
            Self::Unrecognized { message_type, .. } => *message_type,
        }
    }

    /// Port the message refers to, if any.
    pub fn port(&self) -> Option<PortId> {
        match self {
            Self::AttachedIo { port, .. }
            | Self::PortInformationRequest { port, .. }
            | Self::PortModeInformationRequest { port, .. }
            | Self::PortInputFormatSetup { port, .. }
            | Self::PortInformationResponse { port, .. }
            | Self::PortModeInformationResponse { port, .. }
            | Self::PortValueSingle { port, .. }
            | Self::PortOutputCommand { port, .. }
            | Self::PortOutputFeedback { port, .. } => *port,
            _ => None,
        }
    }

    pub fn is_unrecognized(&self) -> bool {
        matches!(self, Self::Unrecognized { .. })
    }
}

/// Decode result with per-field diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub message: Message,
    /// Truncated fields and length-byte disagreements, in the order seen.
    pub issues: Vec<DecodeError>,
}

impl Decoded {
    pub fn is_complete(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.issues
            .iter()
            .any(|issue| matches!(issue, DecodeError::Truncated { .. }))
    }
}

/// Decode a frame into a message.
///
/// Fails only when the buffer is shorter than the 3-byte header; missing
/// fields further in leave the partial message with those fields absent.
pub fn decode(raw: &[u8]) -> Result<Message, DecodeError> {
    decode_detailed(raw).map(|decoded| decoded.message)
}

/// Decode a frame and report truncated fields.
pub fn decode_detailed(raw: &[u8]) -> Result<Decoded, DecodeError> {
    if raw.len() < MIN_FRAME_LEN {
        return Err(DecodeError::short_frame(raw.len()));
    }

    let mut issues = Vec::new();
    let declared = raw[0] as usize;
    if declared > raw.len() {
        issues.push(DecodeError::Truncated {
            field: "frame",
            needed: declared,
            available: raw.len(),
        });
    } else if declared < raw.len() {
        issues.push(DecodeError::LengthMismatch {
            declared,
            actual: raw.len(),
        });
    }

    let message_type = raw[2];
    let mut r = Reader::new(&raw[MIN_FRAME_LEN..]);

    let message = match MessageType::from_u8(message_type) {
        Some(MessageType::HubProperties) => Message::HubPropertyUpdate {
            property: r.u8("property"),
            operation: r.u8("operation"),
            payload: r.rest(),
        },
        Some(MessageType::HubActions) => Message::HubActionRequest {
            action: r.u8("action"),
            payload: r.rest(),
        },
        Some(MessageType::HubAttachedIo) => {
            let port = r.u8("port").map(PortId);
            let event = r.u8("event").map(AttachEvent::from_u8);
            let attached = event.is_some_and(AttachEvent::is_attach);
            let device_type = if attached {
                r.u16_le("device_type").map(DeviceType)
            } else {
                None
            };
            let (hardware_rev, software_rev) = if event == Some(AttachEvent::Attached) {
                (r.optional_u32_le(), r.optional_u32_le())
            } else {
                (None, None)
            };
            Message::AttachedIo {
                port,
                event,
                device_type,
                hardware_rev,
                software_rev,
            }
        }
        Some(MessageType::GenericError) => Message::GenericError {
            command_type: r.u8("command_type"),
            error_code: r.u8("error_code").map(HubErrorCode),
        },
        Some(MessageType::PortInformationRequest) => Message::PortInformationRequest {
            port: r.u8("port").map(PortId),
            info_type: r.u8("info_type"),
        },
        Some(MessageType::PortModeInformationRequest) => Message::PortModeInformationRequest {
            port: r.u8("port").map(PortId),
            mode: r.u8("mode"),
            info_type: r.u8("info_type"),
        },
        Some(MessageType::PortInputFormatSetupSingle) => Message::PortInputFormatSetup {
            port: r.u8("port").map(PortId),
            mode: r.u8("mode"),
            delta: r.u32_le("delta"),
            notify: r.u8("notify").map(|b| b != 0),
        },
        Some(MessageType::PortInformation) => {
            let port = r.u8("port").map(PortId);
            let info_type = r.u8("info_type");
            let info = match info_type {
                Some(info_type::MODE_INFO) => Some(PortInfo::ModeInfo {
                    capabilities: r.u8("capabilities").map(Capabilities::new),
                    total_modes: r.u8("total_modes"),
                    input_modes: r.u16_le("input_modes"),
                    output_modes: r.u16_le("output_modes"),
                }),
                Some(info_type::MODE_COMBINATIONS) => {
                    let mut combos = Vec::new();
                    while let Some(mask) = r.optional_u16_le() {
                        combos.push(mask);
                    }
                    Some(PortInfo::ModeCombinations(combos))
                }
                Some(_) => Some(PortInfo::Raw(r.rest())),
                None => None,
            };
            Message::PortInformationResponse {
                port,
                info_type,
                info,
            }
        }
        Some(MessageType::PortModeInformation) => {
            let port = r.u8("port").map(PortId);
            let mode = r.u8("mode");
            let info_type = r.u8("info_type");
            let info = match info_type {
                Some(mode_info_type::NAME) => {
                    let bytes = r.rest();
                    let name: String = String::from_utf8_lossy(&bytes)
                        .trim_end_matches('\0')
                        .chars()
                        .filter(char::is_ascii)
                        .collect();
                    Some(ModeInfo::Name(name))
                }
                Some(mode_info_type::VALUE_FORMAT) => Some(ModeInfo::ValueFormat {
                    values: r.u8("values"),
                    data_type: r.u8("data_type"),
                    figures: r.u8("figures"),
                    decimals: r.u8("decimals"),
                }),
                Some(_) => Some(ModeInfo::Raw(r.rest())),
                None => None,
            };
            Message::PortModeInformationResponse {
                port,
                mode,
                info_type,
                info,
            }
        }
        Some(MessageType::PortValueSingle) => Message::PortValueSingle {
            port: r.u8("port").map(PortId),
            raw: r.rest(),
        },
        Some(MessageType::PortOutputCommand) => Message::PortOutputCommand {
            port: r.u8("port").map(PortId),
            startup: r.u8("startup"),
            subcommand: r.u8("subcommand"),
            payload: r.rest(),
        },
        Some(MessageType::PortOutputCommandFeedback) => Message::PortOutputFeedback {
            port: r.u8("port").map(PortId),
            feedback: r.u8("feedback").map(FeedbackCode),
        },
        None => Message::Unrecognized {
            message_type,
            raw: raw.to_vec(),
        },
    };

    if let Some(issue) = r.truncation {
        issues.push(issue);
    }

    Ok(Decoded { message, issues })
}

/// Read a little-endian `u16` sensor value (voltage) from a raw port value.
pub fn value_u16_le(raw: &[u8]) -> Option<u16> {
    match raw {
        [a, b, ..] => Some(u16::from_le_bytes([*a, *b])),
        _ => None,
    }
}

/// Read a little-endian `i32` sensor value (motion count) from a raw port value.
pub fn value_i32_le(raw: &[u8]) -> Option<i32> {
    match raw {
        [a, b, c, d, ..] => Some(i32::from_le_bytes([*a, *b, *c, *d])),
        _ => None,
    }
}

/// Bounds-checked little-endian field reader.
///
/// The first missing field is recorded; every later read yields `None`.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    truncation: Option<DecodeError>,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            truncation: None,
        }
    }

    fn take(&mut self, field: &'static str, n: usize) -> Option<&'a [u8]> {
        if self.truncation.is_some() {
            return None;
        }
        let available = self.buf.len() - self.pos;
        if available < n {
            self.truncation = Some(DecodeError::Truncated {
                field,
                needed: n,
                available,
            });
            return None;
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(bytes)
    }

    fn u8(&mut self, field: &'static str) -> Option<u8> {
        self.take(field, 1).map(|b| b[0])
    }

    fn u16_le(&mut self, field: &'static str) -> Option<u16> {
        self.take(field, 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32_le(&mut self, field: &'static str) -> Option<u32> {
        self.take(field, 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Trailing optional field: absence is not a truncation.
    fn optional_u16_le(&mut self) -> Option<u16> {
        if self.truncation.is_some() || self.buf.len() - self.pos < 2 {
            return None;
        }
        self.u16_le("optional")
    }

    fn optional_u32_le(&mut self) -> Option<u32> {
        if self.truncation.is_some() || self.buf.len() - self.pos < 4 {
            return None;
        }
        self.u32_le("optional")
    }

    fn rest(&mut self) -> Vec<u8> {
        if self.truncation.is_some() {
            return Vec::new();
        }
        let rest = self.buf[self.pos..].to_vec();
        self.pos = self.buf.len();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_error() {
        let msg = decode(&[0x05, 0x00, 0x05, 0x01, 0x06]).unwrap();
        assert_eq!(
            msg,
            Message::GenericError {
                command_type: Some(0x01),
                error_code: Some(HubErrorCode(0x06)),
            }
        );
    }

    #[test]
    fn test_attached_io() {
        let decoded = decode_detailed(&[0x06, 0x00, 0x04, 0x32, 0x01, 0x29, 0x00]).unwrap();
        match decoded.message {
            Message::AttachedIo {
                port,
                event,
                device_type,
                hardware_rev,
                ..
            } => {
                assert_eq!(port, Some(PortId(0x32)));
                assert_eq!(event, Some(AttachEvent::Attached));
                assert_eq!(device_type, Some(DeviceType(0x0029)));
                assert_eq!(hardware_rev, None);
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(!decoded.is_truncated());
    }

    #[test]
    fn test_attached_io_with_revisions() {
        let frame = [
            0x0F, 0x00, 0x04, 0x32, 0x01, 0x29, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00,
            0x10,
        ];
        let decoded = decode_detailed(&frame).unwrap();
        assert!(decoded.is_complete());
        match decoded.message {
            Message::AttachedIo {
                hardware_rev,
                software_rev,
                ..
            } => {
                assert_eq!(hardware_rev, Some(0x1000_0000));
                assert_eq!(software_rev, Some(0x1000_0000));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_detached_has_no_device_type() {
        let msg = decode(&[0x05, 0x00, 0x04, 0x32, 0x00]).unwrap();
        assert_eq!(
            msg,
            Message::AttachedIo {
                port: Some(PortId(0x32)),
                event: Some(AttachEvent::Detached),
                device_type: None,
                hardware_rev: None,
                software_rev: None,
            }
        );
    }

    #[test]
    fn test_short_frames() {
        for len in 0..MIN_FRAME_LEN {
            let raw = vec![0x03; len];
            assert!(matches!(
                decode(&raw),
                Err(DecodeError::Truncated { field: "header", .. })
            ));
        }
    }

    #[test]
    fn test_truncated_field_keeps_partial_message() {
        // Attach event with only one device type byte.
        let decoded = decode_detailed(&[0x07, 0x00, 0x04, 0x32, 0x01, 0x29]).unwrap();
        assert!(decoded.is_truncated());
        assert!(decoded.issues.contains(&DecodeError::Truncated {
            field: "device_type",
            needed: 2,
            available: 1,
        }));
        assert_eq!(decoded.message.port(), Some(PortId(0x32)));
    }

    #[test]
    fn test_unrecognized() {
        let raw = [0x04, 0x00, 0x66, 0x01];
        let msg = decode(&raw).unwrap();
        assert_eq!(
            msg,
            Message::Unrecognized {
                message_type: 0x66,
                raw: raw.to_vec(),
            }
        );
        assert_eq!(msg.message_type(), 0x66);
    }

    #[test]
    fn test_port_information() {
        let frame = [0x0B, 0x00, 0x43, 0x32, 0x01, 0x01, 0x02, 0x00, 0x00, 0x03, 0x00];
        let msg = decode(&frame).unwrap();
        assert_eq!(
            msg,
            Message::PortInformationResponse {
                port: Some(PortId(0x32)),
                info_type: Some(0x01),
                info: Some(PortInfo::ModeInfo {
                    capabilities: Some(Capabilities::new(0x01)),
                    total_modes: Some(2),
                    input_modes: Some(0),
                    output_modes: Some(3),
                }),
            }
        );
    }

    #[test]
    fn test_mode_combinations() {
        let msg = decode(&[0x09, 0x00, 0x43, 0x36, 0x02, 0x03, 0x00, 0x0C, 0x00]).unwrap();
        match msg {
            Message::PortInformationResponse { info, .. } => {
                assert_eq!(info, Some(PortInfo::ModeCombinations(vec![0x0003, 0x000C])));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_mode_name() {
        let mut frame = vec![0x00, 0x00, 0x44, 0x35, 0x00, 0x00];
        frame.extend_from_slice(b"VLT L\0\0\0");
        frame[0] = frame.len() as u8;
        let msg = decode(&frame).unwrap();
        match msg {
            Message::PortModeInformationResponse { info, mode, .. } => {
                assert_eq!(mode, Some(0));
                assert_eq!(info, Some(ModeInfo::Name("VLT L".into())));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_value_format() {
        let msg = decode(&[0x0A, 0x00, 0x44, 0x35, 0x00, 0x80, 0x01, 0x01, 0x04, 0x00]).unwrap();
        match msg {
            Message::PortModeInformationResponse { info, .. } => {
                assert_eq!(
                    info,
                    Some(ModeInfo::ValueFormat {
                        values: Some(1),
                        data_type: Some(1),
                        figures: Some(4),
                        decimals: Some(0),
                    })
                );
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_feedback_and_value() {
        assert_eq!(
            decode(&[0x05, 0x00, 0x82, 0x32, 0x0A]).unwrap(),
            Message::PortOutputFeedback {
                port: Some(PortId(0x32)),
                feedback: Some(FeedbackCode::COMPLETED),
            }
        );
        assert_eq!(
            decode(&[0x06, 0x00, 0x45, 0x35, 0x3C, 0x0F]).unwrap(),
            Message::PortValueSingle {
                port: Some(PortId(0x35)),
                raw: vec![0x3C, 0x0F],
            }
        );
    }

    #[test]
    fn test_value_helpers() {
        assert_eq!(value_u16_le(&[0x3C, 0x0F]), Some(3900));
        assert_eq!(value_u16_le(&[0x3C]), None);
        assert_eq!(value_i32_le(&[0xFE, 0xFF, 0xFF, 0xFF]), Some(-2));
        assert_eq!(value_i32_le(&[0x01, 0x00, 0x00]), None);
    }

    #[test]
    fn test_declared_length_longer_than_buffer() {
        let decoded = decode_detailed(&[0x08, 0x00, 0x05, 0x01, 0x06]).unwrap();
        assert!(decoded.is_truncated());
        assert_eq!(
            decoded.message,
            Message::GenericError {
                command_type: Some(0x01),
                error_code: Some(HubErrorCode(0x06)),
            }
        );
    }

    #[test]
    fn test_decode_is_deterministic() {
        let frame = [0x07, 0x00, 0x04, 0x11, 0x01, 0x5B, 0x00];
        assert_eq!(decode_detailed(&frame), decode_detailed(&frame));
    }
}
