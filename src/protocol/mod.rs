//! Hub wire protocol.
//!
//! Encodes outgoing command payloads into frames and decodes inbound frames
//! into typed [`Message`]s. Everything here is stateless.
//!
//! ## Frame Format
//!
//! ```text
//! ┌────────────┬────────────┬──────────────┬──────────────────────┐
//! │ Length (1) │ Hub ID (1) │ Msg Type (1) │ Payload ...          │
//! └────────────┴────────────┴──────────────┴──────────────────────┘
//!   counts every byte      always 0x00
//! ```
//!
//! Multi-byte fields inside payloads are little-endian.

mod codec;
mod command;
mod frame;
mod message;

pub use codec::FrameCodec;
pub use command::{
    speed_to_byte, Command, CommandLayout, IdRange, LightLayout, SoundLayout, MAX_SPEED, MIN_SPEED,
};
pub use frame::{encode, validate};
pub use message::{
    decode, decode_detailed, value_i32_le, value_u16_le, Decoded, Message, ModeInfo, PortInfo,
};

/// Header size in bytes (length + hub id).
pub const HEADER_SIZE: usize = 2;

/// Smallest decodable frame (header + message type).
pub const MIN_FRAME_LEN: usize = 3;

/// Largest frame the single length byte can describe.
pub const MAX_FRAME_LEN: usize = 255;

/// Largest payload (message type included) that fits in a frame.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - HEADER_SIZE;

/// Hub id byte; always zero.
pub const HUB_ID: u8 = 0x00;

/// Message type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    HubProperties = 0x01,
    HubActions = 0x02,
    HubAttachedIo = 0x04,
    GenericError = 0x05,
    PortInformationRequest = 0x21,
    PortModeInformationRequest = 0x22,
    PortInputFormatSetupSingle = 0x41,
    PortInformation = 0x43,
    PortModeInformation = 0x44,
    PortValueSingle = 0x45,
    PortOutputCommand = 0x81,
    PortOutputCommandFeedback = 0x82,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::HubProperties),
            0x02 => Some(Self::HubActions),
            0x04 => Some(Self::HubAttachedIo),
            0x05 => Some(Self::GenericError),
            0x21 => Some(Self::PortInformationRequest),
            0x22 => Some(Self::PortModeInformationRequest),
            0x41 => Some(Self::PortInputFormatSetupSingle),
            0x43 => Some(Self::PortInformation),
            0x44 => Some(Self::PortModeInformation),
            0x45 => Some(Self::PortValueSingle),
            0x81 => Some(Self::PortOutputCommand),
            0x82 => Some(Self::PortOutputCommandFeedback),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Port information request/response info types.
pub mod info_type {
    /// Current port value.
    pub const PORT_VALUE: u8 = 0x00;
    /// Capabilities, mode count and mode masks.
    pub const MODE_INFO: u8 = 0x01;
    /// Possible mode combinations.
    pub const MODE_COMBINATIONS: u8 = 0x02;
}

/// Port mode information request/response info types.
pub mod mode_info_type {
    pub const NAME: u8 = 0x00;
    pub const RAW: u8 = 0x01;
    pub const PCT: u8 = 0x02;
    pub const SI: u8 = 0x03;
    pub const SYMBOL: u8 = 0x04;
    pub const MAPPING: u8 = 0x05;
    pub const VALUE_FORMAT: u8 = 0x80;
}

/// Output sub-command: write direct mode data.
pub const WRITE_DIRECT_MODE_DATA: u8 = 0x51;

/// Hub property: button state.
pub const PROPERTY_BUTTON: u8 = 0x02;

/// Hub property operation: enable updates.
pub const OPERATION_ENABLE_UPDATES: u8 = 0x02;
