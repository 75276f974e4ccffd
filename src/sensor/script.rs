//! Scripted key holds played through a simulated matrix.

use super::{SensorDevice, SimulatedMatrix};
use crate::types::KEY_COUNT;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

/// Scan period of the simulated device.
const SCAN_PERIOD: Duration = Duration::from_millis(1);

/// One key held for a fixed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptedPress {
    pub key: u8,
    pub hold: Duration,
}

impl std::str::FromStr for ScriptedPress {
    type Err = String;

    /// Parse `KEY:MS`, e.g. `4:900`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, ms) = s
            .split_once(':')
            .ok_or_else(|| format!("expected KEY:MS, got '{s}'"))?;
        let key: u8 = key
            .trim()
            .parse()
            .map_err(|_| format!("invalid key '{key}'"))?;
        if key as usize >= KEY_COUNT {
            return Err(format!("key {key} outside 0..{KEY_COUNT}"));
        }
        let ms: u64 = ms
            .trim()
            .parse()
            .map_err(|_| format!("invalid hold '{ms}'"))?;
        Ok(Self {
            key,
            hold: Duration::from_millis(ms),
        })
    }
}

/// Simulated sensor device writing its frames to a link.
pub struct ScriptedSensor {
    device: SensorDevice<SimulatedMatrix>,
    started: Instant,
}

impl ScriptedSensor {
    pub fn new(debounce_ms: u64) -> Self {
        let mut device = SensorDevice::new(SimulatedMatrix::new(), debounce_ms);
        device.init(0);
        Self {
            device,
            started: Instant::now(),
        }
    }

    /// Hold each key in turn, with `gap` of idle scanning after every release.
    pub async fn play<W>(&mut self, link: &mut W, presses: &[ScriptedPress], gap: Duration) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        for press in presses {
            tracing::debug!(key = press.key, hold_ms = press.hold.as_millis() as u64, "scripted press");
            self.device.io_mut().set_key(press.key, true);
            self.run_for(link, press.hold).await?;
            self.device.io_mut().set_key(press.key, false);
            self.run_for(link, gap).await?;
        }
        Ok(())
    }

    /// Keep scanning for `duration`, forwarding frames to the link.
    pub async fn run_for<W>(&mut self, link: &mut W, duration: Duration) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let until = Instant::now() + duration;
        let mut ticker = tokio::time::interval(SCAN_PERIOD);
        while Instant::now() < until {
            ticker.tick().await;
            let now_ms = self.started.elapsed().as_millis() as u64;
            let bytes = self.device.poll(now_ms);
            if !bytes.is_empty() {
                link.write_all(&bytes).await?;
                link.flush().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::FrameDecoder;
    use crate::types::Transition;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_parse_scripted_press() {
        let press: ScriptedPress = "4:900".parse().unwrap();
        assert_eq!(press.key, 4);
        assert_eq!(press.hold, Duration::from_millis(900));

        assert!("36:100".parse::<ScriptedPress>().is_err());
        assert!("4".parse::<ScriptedPress>().is_err());
        assert!("x:100".parse::<ScriptedPress>().is_err());
    }

    #[tokio::test]
    async fn test_play_emits_press_and_release() {
        let (mut tx, mut rx) = tokio::io::duplex(256);
        let mut sensor = ScriptedSensor::new(5);
        let script = [ScriptedPress {
            key: 9,
            hold: Duration::from_millis(40),
        }];
        sensor.play(&mut tx, &script, Duration::from_millis(30)).await.unwrap();
        drop(tx);

        let mut bytes = Vec::new();
        rx.read_to_end(&mut bytes).await.unwrap();
        let transitions = FrameDecoder::new().feed(&bytes);
        assert_eq!(transitions, vec![Transition::press(9), Transition::release(9)]);
    }
}
