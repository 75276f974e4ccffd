//! Reliability mode and its acknowledgement rule.

use serde::{Deserialize, Serialize};

/// Delivery rule chosen once per boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReliabilityMode {
    /// Any 2xx response counts as delivered.
    Legacy,
    /// A 2xx response must echo the message sequence number.
    Confirmed,
}

impl ReliabilityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReliabilityMode::Legacy => "legacy",
            ReliabilityMode::Confirmed => "confirmed",
        }
    }

    /// Decide whether one delivery attempt succeeded.
    pub fn check_response(&self, status: u16, body: &[u8], seq: u32) -> Result<(), AckRejection> {
        if !(200..300).contains(&status) {
            return Err(AckRejection::Status(status));
        }
        match self {
            ReliabilityMode::Legacy => Ok(()),
            ReliabilityMode::Confirmed => {
                let acked = serde_json::from_slice::<serde_json::Value>(body)
                    .ok()
                    .and_then(|v| v.get("seq").and_then(|s| s.as_u64()))
                    .ok_or(AckRejection::MissingSeq)?;
                if acked == u64::from(seq) {
                    Ok(())
                } else {
                    Err(AckRejection::SeqMismatch {
                        expected: seq,
                        actual: acked,
                    })
                }
            }
        }
    }
}

impl std::fmt::Display for ReliabilityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReliabilityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "legacy" => Ok(ReliabilityMode::Legacy),
            "confirmed" => Ok(ReliabilityMode::Confirmed),
            other => Err(format!("unknown reliability mode '{other}'")),
        }
    }
}

/// Why a response did not count as delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckRejection {
    /// Non-2xx status
    Status(u16),
    /// 2xx without an integer `seq` field
    MissingSeq,
    /// 2xx acknowledging a different message
    SeqMismatch { expected: u32, actual: u64 },
}

impl std::fmt::Display for AckRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AckRejection::Status(status) => write!(f, "host answered with status {status}"),
            AckRejection::MissingSeq => write!(f, "acknowledgement carries no seq"),
            AckRejection::SeqMismatch { expected, actual } => {
                write!(f, "acknowledged seq {actual}, expected {expected}")
            }
        }
    }
}

impl std::error::Error for AckRejection {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_accepts_any_success() {
        let mode = ReliabilityMode::Legacy;
        assert!(mode.check_response(200, b"", 3).is_ok());
        assert!(mode.check_response(204, b"not json", 3).is_ok());
        assert_eq!(mode.check_response(500, b"", 3), Err(AckRejection::Status(500)));
    }

    #[test]
    fn test_confirmed_requires_matching_seq() {
        let mode = ReliabilityMode::Confirmed;
        assert!(mode.check_response(200, br#"{"ok":true,"seq":40}"#, 40).is_ok());
        assert_eq!(
            mode.check_response(200, br#"{"ok":true,"seq":41}"#, 40),
            Err(AckRejection::SeqMismatch {
                expected: 40,
                actual: 41
            })
        );
        assert_eq!(
            mode.check_response(200, br#"{"ok":true}"#, 40),
            Err(AckRejection::MissingSeq)
        );
        assert_eq!(
            mode.check_response(200, br#"{"ok":true,"seq":"40"}"#, 40),
            Err(AckRejection::MissingSeq)
        );
        assert_eq!(
            mode.check_response(401, br#"{"ok":true,"seq":40}"#, 40),
            Err(AckRejection::Status(401))
        );
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("Confirmed".parse::<ReliabilityMode>(), Ok(ReliabilityMode::Confirmed));
        assert_eq!("legacy".parse::<ReliabilityMode>(), Ok(ReliabilityMode::Legacy));
        assert!("fast".parse::<ReliabilityMode>().is_err());
    }
}
