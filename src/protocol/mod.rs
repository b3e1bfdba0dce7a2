//! Message protocol client for the instrument application.
//!
//! - [`frame`] - wire header encoding and fragment assembly
//! - [`message`] - the command table
//! - [`client`] - request/response exchange and the bootloader text exchange
//! - [`operations`] - one typed method per command

pub mod client;
pub mod frame;
pub mod message;
pub mod operations;

pub use client::{MessageClient, DOMAPP_READY, ICEBOOT_PROMPT};
pub use frame::{FrameAssembler, FrameHeader, MessageFrame, HEADER_LEN, MAX_PAYLOAD_LEN, STATUS_SUCCESS};
pub use message::{CommandSpec, Facility, MessageType, PayloadLayout};
