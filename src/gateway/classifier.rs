//! Short/long press classification on the gateway device.

use crate::types::{PressKind, PressOutcome, Transition, TransitionKind, KEY_COUNT};

#[derive(Debug, Clone, Copy, Default)]
struct PressSession {
    is_down: bool,
    started_at_ms: u64,
}

/// Tracks the open press of every key and classifies it on release.
pub struct PressClassifier {
    sessions: [PressSession; KEY_COUNT],
    long_press_ms: u64,
}

impl PressClassifier {
    pub fn new(long_press_ms: u64) -> Self {
        Self {
            sessions: [PressSession::default(); KEY_COUNT],
            long_press_ms,
        }
    }

    /// Apply one transition observed at `now_ms`.
    ///
    /// A repeated press of a key already down keeps the original start time.
    /// A release without an open press is ignored.
    pub fn on_transition(&mut self, transition: Transition, now_ms: u64) -> Option<PressOutcome> {
        let session = self.sessions.get_mut(transition.key as usize)?;

        match transition.kind {
            TransitionKind::Press => {
                if !session.is_down {
                    session.is_down = true;
                    session.started_at_ms = now_ms;
                }
                None
            }
            TransitionKind::Release => {
                if !session.is_down {
                    return None;
                }
                session.is_down = false;
                let held_ms = now_ms.saturating_sub(session.started_at_ms);
                Some(PressOutcome {
                    key: transition.key,
                    held_ms,
                    kind: PressKind::classify(held_ms, self.long_press_ms),
                })
            }
        }
    }

    pub fn is_down(&self, key: u8) -> bool {
        self.sessions
            .get(key as usize)
            .map(|s| s.is_down)
            .unwrap_or(false)
    }
}

impl Default for PressClassifier {
    fn default() -> Self {
        Self::new(crate::types::LONG_PRESS_THRESHOLD_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_and_long_boundary() {
        let mut classifier = PressClassifier::default();

        classifier.on_transition(Transition::press(2), 1_000);
        let short = classifier.on_transition(Transition::release(2), 1_599).unwrap();
        assert_eq!(short.kind, PressKind::Short);
        assert_eq!(short.held_ms, 599);
        assert_eq!(short.event_number(), 2);

        classifier.on_transition(Transition::press(2), 2_000);
        let long = classifier.on_transition(Transition::release(2), 2_600).unwrap();
        assert_eq!(long.kind, PressKind::Long);
        assert_eq!(long.event_number(), 38);
    }

    #[test]
    fn test_duplicate_press_keeps_start_time() {
        let mut classifier = PressClassifier::default();
        classifier.on_transition(Transition::press(7), 100);
        assert!(classifier.on_transition(Transition::press(7), 500).is_none());

        let outcome = classifier.on_transition(Transition::release(7), 800).unwrap();
        assert_eq!(outcome.held_ms, 700);
        assert_eq!(outcome.kind, PressKind::Long);
    }

    #[test]
    fn test_orphan_release_is_ignored() {
        let mut classifier = PressClassifier::default();
        assert!(classifier.on_transition(Transition::release(4), 10).is_none());

        classifier.on_transition(Transition::press(4), 20);
        assert!(classifier.on_transition(Transition::release(4), 30).is_some());
        assert!(classifier.on_transition(Transition::release(4), 40).is_none());
        assert!(!classifier.is_down(4));
    }

    #[test]
    fn test_keys_are_independent() {
        let mut classifier = PressClassifier::default();
        classifier.on_transition(Transition::press(0), 0);
        classifier.on_transition(Transition::press(35), 100);

        let first = classifier.on_transition(Transition::release(35), 200).unwrap();
        assert_eq!((first.key, first.held_ms), (35, 100));
        assert!(classifier.is_down(0));
    }
}
