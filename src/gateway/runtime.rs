//! Cooperative gateway loop.
//!
//! The link is serviced on one task. Classified outcomes are numbered and
//! handed to a relay worker through a bounded queue, so retries and backoff
//! never hold up the link.

use super::boot::{ModeSelector, ResetDetector, ResetStatus};
use super::classifier::PressClassifier;
use super::mode::ReliabilityMode;
use super::relay::{RelayClient, RelayError};
use super::screen::Screen;
use super::telemetry::Telemetry;
use super::{DeviceActions, SequenceCounter};
use crate::config::GatewaySettings;
use crate::link::FrameDecoder;
use crate::types::{PressOutcome, RelayMessage, Transition};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

/// How often the reset detector is re-evaluated while the link is quiet.
const RESET_POLL: Duration = Duration::from_millis(50);

/// How long a shutdown waits for queued deliveries before abandoning them.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Reads transitions from the link byte stream.
pub struct LinkReader<R> {
    reader: R,
    decoder: FrameDecoder,
    pending: VecDeque<Transition>,
    buf: [u8; 64],
}

impl<R: AsyncRead + Unpin> LinkReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            buf: [0; 64],
        }
    }

    /// Next decoded transition, or `None` once the link is closed.
    ///
    /// Cancel-safe: bytes are only consumed by a completed read.
    pub async fn next(&mut self) -> std::io::Result<Option<Transition>> {
        loop {
            if let Some(t) = self.pending.pop_front() {
                return Ok(Some(t));
            }
            let n = self.reader.read(&mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.pending.extend(self.decoder.feed(&self.buf[..n]));
        }
    }

    pub fn rejected_frames(&self) -> u64 {
        self.decoder.rejected()
    }
}

/// Why a gateway session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Reset key held during boot; credentials cleared, restart required
    FactoryReset,
    /// The link reached end of stream
    LinkClosed,
    /// Shutdown requested
    Shutdown,
}

pub struct GatewayRuntime {
    settings: GatewaySettings,
    relay: Arc<RelayClient>,
    telemetry: Arc<Telemetry>,
    screen: Arc<dyn Screen>,
    actions: Arc<dyn DeviceActions>,
}

impl GatewayRuntime {
    pub fn new(
        settings: GatewaySettings,
        relay: Arc<RelayClient>,
        telemetry: Arc<Telemetry>,
        screen: Arc<dyn Screen>,
        actions: Arc<dyn DeviceActions>,
    ) -> Self {
        Self {
            settings,
            relay,
            telemetry,
            screen,
            actions,
        }
    }

    /// Run one boot session over `link` until it closes, a factory reset is
    /// requested, or `shutdown` completes.
    pub async fn run<R, F>(&self, link: R, shutdown: F) -> anyhow::Result<SessionEnd>
    where
        R: AsyncRead + Unpin,
        F: Future<Output = ()>,
    {
        let mut link = LinkReader::new(link);
        tokio::pin!(shutdown);

        if let Some(end) = self.reset_window(&mut link, &mut shutdown).await? {
            return Ok(end);
        }

        let mode = match self.select_mode(&mut link, &mut shutdown).await? {
            Ok(mode) => mode,
            Err(end) => return Ok(end),
        };
        self.telemetry.set_mode(mode);
        self.screen.show_status(&format!("Mode: {mode}"));
        tracing::info!(%mode, "reliability mode selected");

        let end = self.relay_loop(&mut link, &mut shutdown, mode).await;
        tracing::info!(
            rejected_frames = link.rejected_frames(),
            "gateway session ended: {end:?}"
        );
        Ok(end)
    }

    async fn reset_window<R, F>(
        &self,
        link: &mut LinkReader<R>,
        shutdown: &mut Pin<&mut F>,
    ) -> anyhow::Result<Option<SessionEnd>>
    where
        R: AsyncRead + Unpin,
        F: Future<Output = ()>,
    {
        let mut detector = ResetDetector::new(
            self.settings.reset_key,
            self.telemetry.uptime_ms(),
            self.settings.reset_window.as_millis() as u64,
            self.settings.reset_hold.as_millis() as u64,
        );

        loop {
            let status = tokio::select! {
                _ = shutdown.as_mut() => return Ok(Some(SessionEnd::Shutdown)),
                next = tokio::time::timeout(RESET_POLL, link.next()) => {
                    let now = self.telemetry.uptime_ms();
                    match next {
                        Ok(Ok(Some(t))) => {
                            if t.is_press() {
                                self.screen.show_status(&format!("key {}", t.key));
                            }
                            detector.on_transition(t, now)
                        }
                        Ok(Ok(None)) => return Ok(Some(SessionEnd::LinkClosed)),
                        Ok(Err(e)) => return Err(e.into()),
                        Err(_) => detector.poll(now),
                    }
                }
            };

            match status {
                ResetStatus::Watching => continue,
                ResetStatus::Elapsed => return Ok(None),
                ResetStatus::Reset => {
                    tracing::warn!(key = self.settings.reset_key, "factory reset requested");
                    self.screen.show_status("Factory reset");
                    self.actions.factory_reset()?;
                    return Ok(Some(SessionEnd::FactoryReset));
                }
            }
        }
    }

    async fn select_mode<R, F>(
        &self,
        link: &mut LinkReader<R>,
        shutdown: &mut Pin<&mut F>,
    ) -> anyhow::Result<Result<ReliabilityMode, SessionEnd>>
    where
        R: AsyncRead + Unpin,
        F: Future<Output = ()>,
    {
        let selector = ModeSelector::new(self.settings.legacy_key, self.settings.confirmed_key);
        self.screen.show_status(&selector.prompt());

        loop {
            tokio::select! {
                _ = shutdown.as_mut() => return Ok(Err(SessionEnd::Shutdown)),
                next = link.next() => match next? {
                    Some(t) => {
                        if let Some(mode) = selector.on_transition(t) {
                            return Ok(Ok(mode));
                        }
                    }
                    None => return Ok(Err(SessionEnd::LinkClosed)),
                },
            }
        }
    }

    async fn relay_loop<R, F>(
        &self,
        link: &mut LinkReader<R>,
        shutdown: &mut Pin<&mut F>,
        mode: ReliabilityMode,
    ) -> SessionEnd
    where
        R: AsyncRead + Unpin,
        F: Future<Output = ()>,
    {
        let (tx, rx) = mpsc::channel(self.settings.queue_depth.max(1));
        let mut worker = tokio::spawn(relay_worker(
            self.relay.clone(),
            mode,
            rx,
            self.telemetry.clone(),
            self.screen.clone(),
        ));

        let mut classifier = PressClassifier::new(self.settings.long_press_ms);
        let mut seq = SequenceCounter::new();

        let end = loop {
            tokio::select! {
                _ = shutdown.as_mut() => break SessionEnd::Shutdown,
                next = link.next() => match next {
                    Ok(Some(t)) => {
                        let now = self.telemetry.uptime_ms();
                        if let Some(outcome) = classifier.on_transition(t, now) {
                            self.dispatch(outcome, &mut seq, &tx);
                        }
                    }
                    Ok(None) => break SessionEnd::LinkClosed,
                    Err(e) => {
                        tracing::error!("link read failed: {e}");
                        break SessionEnd::LinkClosed;
                    }
                },
            }
        };

        // The worker drains what is already queued. A shutdown only waits
        // for the grace period.
        drop(tx);
        let drained = match end {
            SessionEnd::Shutdown => tokio::time::timeout(SHUTDOWN_GRACE, &mut worker).await,
            _ => Ok((&mut worker).await),
        };
        match drained {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("relay worker failed: {e}"),
            Err(_) => {
                worker.abort();
                tracing::warn!("shutdown with deliveries still queued; abandoning them");
            }
        }
        end
    }

    fn dispatch(&self, outcome: PressOutcome, seq: &mut SequenceCounter, tx: &mpsc::Sender<RelayMessage>) {
        let seq = seq.next();
        let message = RelayMessage::from_outcome(
            &outcome,
            seq,
            self.telemetry.device_id(),
            self.telemetry.uptime_ms(),
            self.telemetry.rssi(),
        );
        self.telemetry.record_outcome(outcome.key, seq);
        tracing::info!(
            key = outcome.key,
            held_ms = outcome.held_ms,
            press = %outcome.kind,
            event = message.event,
            seq,
            "press classified"
        );

        if tx.try_send(message).is_err() {
            tracing::warn!(seq, "{}", RelayError::QueueFull);
            self.telemetry.record_delivery(seq, false);
            self.screen.show_status(&format!("send failed #{seq}"));
        }
    }
}

async fn relay_worker(
    relay: Arc<RelayClient>,
    mode: ReliabilityMode,
    mut rx: mpsc::Receiver<RelayMessage>,
    telemetry: Arc<Telemetry>,
    screen: Arc<dyn Screen>,
) {
    while let Some(message) = rx.recv().await {
        match relay.deliver(&message, mode).await {
            Ok(report) => {
                telemetry.record_delivery(message.seq, true);
                screen.show_status(&format!("sent #{}", message.seq));
                tracing::info!(seq = message.seq, attempts = report.attempts, "event relayed");
            }
            Err(e) => {
                telemetry.record_delivery(message.seq, false);
                screen.show_status(&format!("send failed #{}", message.seq));
                tracing::warn!(seq = message.seq, "{e}");
            }
        }
    }
}
