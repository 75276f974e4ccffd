//! Byte-framed link between the sensor device and the gateway device.
//!
//! The sender emits one frame per transition, immediately and without flow
//! control. Lost frames are not retransmitted at this layer.

pub mod decoder;
pub mod frame;

pub use decoder::FrameDecoder;
pub use frame::{LinkFrame, FRAME_LEN, SYNC};

use crate::types::Transition;

/// Encode a batch of transitions into one contiguous byte buffer.
pub fn encode_transitions(transitions: &[Transition]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(transitions.len() * FRAME_LEN);
    for &transition in transitions {
        bytes.extend_from_slice(&LinkFrame::from(transition).encode());
    }
    bytes
}
