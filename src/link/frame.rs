//! Fixed 4-byte frame carrying one transition over the inter-device link.
//!
//! ```text
//! +------+------+-----+----------+
//! | 0xA5 | type | key | checksum |
//! +------+------+-----+----------+
//! ```
//!
//! `type` is 1 for a press and 0 for a release; the checksum is the XOR of
//! the three preceding bytes.

use crate::types::{Transition, TransitionKind, KEY_COUNT};

/// Frame anchor byte.
pub const SYNC: u8 = 0xA5;
/// Encoded frame length.
pub const FRAME_LEN: usize = 4;

pub const TYPE_RELEASE: u8 = 0;
pub const TYPE_PRESS: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkFrame {
    pub frame_type: u8,
    pub key: u8,
}

impl LinkFrame {
    pub fn checksum(frame_type: u8, key: u8) -> u8 {
        SYNC ^ frame_type ^ key
    }

    pub fn encode(&self) -> [u8; FRAME_LEN] {
        [
            SYNC,
            self.frame_type,
            self.key,
            Self::checksum(self.frame_type, self.key),
        ]
    }

    /// Parse a complete frame. Returns `None` on a bad anchor or checksum.
    pub fn decode(bytes: &[u8; FRAME_LEN]) -> Option<Self> {
        if bytes[0] != SYNC || bytes[3] != Self::checksum(bytes[1], bytes[2]) {
            return None;
        }
        Some(Self {
            frame_type: bytes[1],
            key: bytes[2],
        })
    }

    /// The transition carried by this frame, if its fields are in range.
    pub fn transition(&self) -> Option<Transition> {
        if self.key as usize >= KEY_COUNT {
            return None;
        }
        let kind = match self.frame_type {
            TYPE_PRESS => TransitionKind::Press,
            TYPE_RELEASE => TransitionKind::Release,
            _ => return None,
        };
        Some(Transition {
            key: self.key,
            kind,
        })
    }
}

impl From<Transition> for LinkFrame {
    fn from(transition: Transition) -> Self {
        Self {
            frame_type: match transition.kind {
                TransitionKind::Press => TYPE_PRESS,
                TransitionKind::Release => TYPE_RELEASE,
            },
            key: transition.key,
        }
    }
}
