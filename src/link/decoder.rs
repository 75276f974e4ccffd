//! Incremental frame decoder for the receiving end of the link.

use super::frame::{LinkFrame, FRAME_LEN, SYNC};
use crate::types::Transition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitSync,
    Type,
    Key,
    Checksum,
}

/// Byte-at-a-time decoder: `awaiting sync -> type -> key -> checksum`.
///
/// Anything that does not form a valid frame is dropped silently. After a
/// checksum failure the bytes consumed since the anchor are scanned again for
/// another `0xA5`, so a stray byte in front of a real frame does not cost
/// that frame.
#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
    buf: [u8; FRAME_LEN],
    rejected: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: State::AwaitSync,
            buf: [0; FRAME_LEN],
            rejected: 0,
        }
    }

    /// Feed one byte. Returns the frame it completes, if any.
    pub fn push(&mut self, byte: u8) -> Option<LinkFrame> {
        match self.state {
            State::AwaitSync => {
                if byte == SYNC {
                    self.buf[0] = byte;
                    self.state = State::Type;
                }
                None
            }
            State::Type => {
                self.buf[1] = byte;
                self.state = State::Key;
                None
            }
            State::Key => {
                self.buf[2] = byte;
                self.state = State::Checksum;
                None
            }
            State::Checksum => {
                self.buf[3] = byte;
                self.state = State::AwaitSync;
                match LinkFrame::decode(&self.buf) {
                    Some(frame) => Some(frame),
                    None => {
                        self.rejected += 1;
                        tracing::debug!(bytes = ?self.buf, "dropping frame with bad checksum");
                        self.rescan();
                        None
                    }
                }
            }
        }
    }

    /// Feed a chunk and collect the transitions it completes.
    ///
    /// Frames that pass the checksum but carry an out-of-range type or key
    /// are dropped here.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Transition> {
        let mut transitions = Vec::new();
        for &byte in bytes {
            if let Some(frame) = self.push(byte) {
                match frame.transition() {
                    Some(t) => transitions.push(t),
                    None => {
                        self.rejected += 1;
                        tracing::debug!(?frame, "dropping frame with invalid fields");
                    }
                }
            }
        }
        transitions
    }

    /// Number of frames dropped so far.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    fn rescan(&mut self) {
        let tail = [self.buf[1], self.buf[2], self.buf[3]];
        for byte in tail {
            // Three bytes can never complete a frame on their own.
            let _ = self.push(byte);
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(transitions: &[Transition]) -> Vec<u8> {
        transitions
            .iter()
            .flat_map(|&t| LinkFrame::from(t).encode())
            .collect()
    }

    #[test]
    fn test_decodes_back_to_back_frames() {
        let sent = [Transition::press(3), Transition::release(3), Transition::press(35)];
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(&encode(&sent)), sent.to_vec());
        assert_eq!(decoder.rejected(), 0);
    }

    #[test]
    fn test_decodes_across_chunk_boundaries() {
        let bytes = encode(&[Transition::press(12), Transition::release(12)]);
        let mut decoder = FrameDecoder::new();
        let mut out = Vec::new();
        for chunk in bytes.chunks(3) {
            out.extend(decoder.feed(chunk));
        }
        assert_eq!(out, vec![Transition::press(12), Transition::release(12)]);
    }

    #[test]
    fn test_skips_leading_garbage() {
        let mut bytes = vec![0x00, 0x13, 0xFF];
        bytes.extend(encode(&[Transition::press(1)]));
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(&bytes), vec![Transition::press(1)]);
    }

    #[test]
    fn test_stray_sync_byte_does_not_cost_the_next_frame() {
        let mut bytes = vec![SYNC];
        bytes.extend(encode(&[Transition::release(9)]));
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(&bytes), vec![Transition::release(9)]);
        assert_eq!(decoder.rejected(), 1);
    }

    #[test]
    fn test_corrupted_frame_is_dropped_and_stream_recovers() {
        let mut bytes = encode(&[Transition::press(4)]);
        bytes[2] ^= 0x40;
        bytes.extend(encode(&[Transition::press(5)]));
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(&bytes), vec![Transition::press(5)]);
    }

    #[test]
    fn test_invalid_fields_are_dropped() {
        let frame = LinkFrame {
            frame_type: 1,
            key: 40,
        };
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(&frame.encode()).is_empty());
        assert_eq!(decoder.rejected(), 1);
    }
}
