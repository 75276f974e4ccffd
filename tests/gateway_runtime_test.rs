//! End-to-end tests: gateway runtime relaying to a live host listener

#[cfg(all(feature = "gateway", feature = "host"))]
mod runtime_tests {
    use keyrelay::config::GatewaySettings;
    use keyrelay::gateway::relay::{RelayClient, RelayConfig};
    use keyrelay::gateway::runtime::{GatewayRuntime, SessionEnd, SHUTDOWN_GRACE};
    use keyrelay::gateway::{CredentialStore, DeviceActions, LogScreen, ReliabilityMode, Screen, Telemetry};
    use keyrelay::host::listener::{run, ListenerConfig, ListenerState};
    use keyrelay::host::MemorySink;
    use keyrelay::link::encode_transitions;
    use keyrelay::types::{PressKind, Transition};
    use std::net::SocketAddr;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncWriteExt, DuplexStream};

    const RESET_WINDOW: Duration = Duration::from_millis(150);

    fn settings(relay_port: u16) -> GatewaySettings {
        GatewaySettings {
            relay_port,
            initial_backoff: Duration::from_millis(10),
            attempt_timeout: Duration::from_millis(500),
            reset_window: RESET_WINDOW,
            reset_hold: Duration::from_millis(100),
            ..GatewaySettings::default()
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("keyrelay-{name}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    struct Gateway {
        runtime: GatewayRuntime,
        telemetry: Arc<Telemetry>,
        screen: Arc<LogScreen>,
    }

    fn gateway(settings: GatewaySettings, actions: Arc<dyn DeviceActions>) -> Gateway {
        let telemetry = Arc::new(Telemetry::new("gw-test"));
        let screen = Arc::new(LogScreen::new());
        let relay = Arc::new(RelayClient::new(RelayConfig::from_settings(&settings)));
        let runtime = GatewayRuntime::new(settings, relay, telemetry.clone(), screen.clone(), actions);
        Gateway {
            runtime,
            telemetry,
            screen,
        }
    }

    /// Screen that keeps every status line it was shown.
    #[derive(Default)]
    struct RecordingScreen {
        statuses: Mutex<Vec<String>>,
    }

    impl RecordingScreen {
        fn statuses(&self) -> Vec<String> {
            self.statuses.lock().unwrap().clone()
        }
    }

    impl Screen for RecordingScreen {
        fn show_chat(&self, _text: &str) {}

        fn show_status(&self, text: &str) {
            self.statuses.lock().unwrap().push(text.to_string());
        }

        fn clear(&self) {}
    }

    fn recording_gateway(
        settings: GatewaySettings,
        dir: &Path,
    ) -> (GatewayRuntime, Arc<Telemetry>, Arc<RecordingScreen>) {
        let telemetry = Arc::new(Telemetry::new("gw-test"));
        let screen = Arc::new(RecordingScreen::default());
        let relay = Arc::new(RelayClient::new(RelayConfig::from_settings(&settings)));
        let runtime = GatewayRuntime::new(
            settings,
            relay,
            telemetry.clone(),
            screen.clone(),
            Arc::new(CredentialStore::new(dir)),
        );
        (runtime, telemetry, screen)
    }

    /// A host that accepts connections but never answers.
    async fn stalled_host() -> tokio::net::TcpListener {
        tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap()
    }

    async fn start_host(sink: Arc<MemorySink>) -> (SocketAddr, tokio::sync::oneshot::Sender<()>) {
        let config = ListenerConfig::new(0);
        let state = Arc::new(ListenerState::new(&config, sink));
        run(config, state).await.expect("Failed to start listener")
    }

    async fn send(link: &mut DuplexStream, transitions: &[Transition]) {
        link.write_all(&encode_transitions(transitions)).await.unwrap();
    }

    async fn tap(link: &mut DuplexStream, key: u8, hold: Duration) {
        send(link, &[Transition::press(key)]).await;
        tokio::time::sleep(hold).await;
        send(link, &[Transition::release(key)]).await;
    }

    #[tokio::test]
    async fn test_presses_reach_host_in_order() {
        let sink = Arc::new(MemorySink::new());
        let (addr, _host) = start_host(sink.clone()).await;
        let dir = temp_dir("relay");
        let gw = gateway(settings(addr.port()), Arc::new(CredentialStore::new(&dir)));

        let (mut link, link_rx) = tokio::io::duplex(256);
        let driver = async move {
            tokio::time::sleep(RESET_WINDOW + Duration::from_millis(100)).await;
            tap(&mut link, 1, Duration::from_millis(20)).await;
            tap(&mut link, 4, Duration::from_millis(700)).await;
            tap(&mut link, 2, Duration::from_millis(50)).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(link);
        };

        let (end, ()) = tokio::join!(gw.runtime.run(link_rx, std::future::pending::<()>()), driver);
        assert_eq!(end.unwrap(), SessionEnd::LinkClosed);
        assert_eq!(gw.telemetry.mode(), Some(ReliabilityMode::Confirmed));

        let events = sink.key_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].seq, Some(1));
        assert_eq!(events[0].event, 40);
        assert_eq!(events[0].press, PressKind::Long);
        assert_eq!(events[0].device_id.as_deref(), Some("gw-test"));
        assert_eq!(events[1].seq, Some(2));
        assert_eq!(events[1].event, 2);

        let snapshot = gw.telemetry.snapshot();
        assert_eq!(snapshot.last_seq, 2);
        assert_eq!(snapshot.last_ack, Some(2));
        assert_eq!(snapshot.last_post_ok, Some(true));
        assert_eq!(gw.screen.content().status.as_deref(), Some("sent #2"));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_unreachable_host_reports_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dir = temp_dir("unreachable");
        let gw = gateway(settings(port), Arc::new(CredentialStore::new(&dir)));

        let (mut link, link_rx) = tokio::io::duplex(256);
        let driver = async move {
            tokio::time::sleep(RESET_WINDOW + Duration::from_millis(100)).await;
            tap(&mut link, 0, Duration::from_millis(20)).await;
            tap(&mut link, 9, Duration::from_millis(20)).await;
            drop(link);
        };

        let (end, ()) = tokio::join!(gw.runtime.run(link_rx, std::future::pending::<()>()), driver);
        assert_eq!(end.unwrap(), SessionEnd::LinkClosed);
        assert_eq!(gw.telemetry.mode(), Some(ReliabilityMode::Legacy));

        let snapshot = gw.telemetry.snapshot();
        assert_eq!(snapshot.last_seq, 1);
        assert_eq!(snapshot.last_post_ok, Some(false));
        assert_eq!(gw.screen.content().status.as_deref(), Some("send failed #1"));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_reset_key_held_at_boot_clears_credentials() {
        let dir = temp_dir("factory");
        let store = CredentialStore::new(&dir);
        std::fs::write(store.path(), r#"{"ssid":"lab"}"#).unwrap();

        let mut gw_settings = settings(9);
        gw_settings.reset_window = Duration::from_millis(2_000);
        let gw = gateway(gw_settings, Arc::new(store.clone()));

        let (mut link, link_rx) = tokio::io::duplex(256);
        send(&mut link, &[Transition::press(35)]).await;

        let end = gw.runtime.run(link_rx, std::future::pending::<()>()).await;
        assert_eq!(end.unwrap(), SessionEnd::FactoryReset);
        assert!(!store.exists());
        assert_eq!(gw.screen.content().status.as_deref(), Some("Factory reset"));
        drop(link);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_shutdown_ends_session() {
        let dir = temp_dir("shutdown");
        let gw = gateway(settings(9), Arc::new(CredentialStore::new(&dir)));

        let (_link, link_rx) = tokio::io::duplex(256);
        let end = gw
            .runtime
            .run(link_rx, tokio::time::sleep(Duration::from_millis(50)))
            .await;
        assert_eq!(end.unwrap(), SessionEnd::Shutdown);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_full_queue_counts_as_failure() {
        let host = stalled_host().await;
        let dir = temp_dir("queue");
        let gw_settings = GatewaySettings {
            queue_depth: 1,
            max_attempts: 1,
            attempt_timeout: Duration::from_millis(800),
            ..settings(host.local_addr().unwrap().port())
        };
        let (runtime, telemetry, screen) = recording_gateway(gw_settings, &dir);

        let (mut link, link_rx) = tokio::io::duplex(256);
        let observer = screen.clone();
        let driver = async move {
            tokio::time::sleep(RESET_WINDOW + Duration::from_millis(100)).await;
            tap(&mut link, 1, Duration::from_millis(20)).await;
            for key in [2, 3, 4, 5] {
                tap(&mut link, key, Duration::from_millis(20)).await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            // #1 is in flight and #2 waits in the queue; #3 and #4 did not fit.
            tokio::time::sleep(Duration::from_millis(50)).await;
            let early = observer.statuses();
            drop(link);
            early
        };

        let (end, early) = tokio::join!(runtime.run(link_rx, std::future::pending::<()>()), driver);
        assert_eq!(end.unwrap(), SessionEnd::LinkClosed);
        assert!(early.contains(&"send failed #3".to_string()), "{early:?}");
        assert!(early.contains(&"send failed #4".to_string()), "{early:?}");
        assert!(!early.contains(&"send failed #1".to_string()), "{early:?}");

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.last_seq, 4);
        assert_eq!(snapshot.last_post_ok, Some(false));

        let mut failed: Vec<String> = screen
            .statuses()
            .into_iter()
            .filter(|s| s.starts_with("send failed #"))
            .collect();
        failed.sort();
        assert_eq!(failed, ["send failed #1", "send failed #2", "send failed #3", "send failed #4"]);
        drop(host);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_shutdown_does_not_wait_for_queued_retries() {
        let host = stalled_host().await;
        let dir = temp_dir("drain");
        let gw_settings = GatewaySettings {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(5),
            ..settings(host.local_addr().unwrap().port())
        };
        let (runtime, telemetry, _screen) = recording_gateway(gw_settings, &dir);

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let (mut link, link_rx) = tokio::io::duplex(256);
        let driver = async move {
            tokio::time::sleep(RESET_WINDOW + Duration::from_millis(100)).await;
            tap(&mut link, 0, Duration::from_millis(20)).await;
            for key in [6, 7, 8] {
                tap(&mut link, key, Duration::from_millis(20)).await;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            let stopped_at = Instant::now();
            let _ = stop_tx.send(());
            // Keep the link open so the session ends by shutdown.
            (link, stopped_at)
        };

        let shutdown = async move {
            let _ = stop_rx.await;
        };
        let (end, (_link, stopped_at)) = tokio::join!(runtime.run(link_rx, shutdown), driver);
        assert_eq!(end.unwrap(), SessionEnd::Shutdown);
        assert!(stopped_at.elapsed() < SHUTDOWN_GRACE + Duration::from_secs(1));
        assert_eq!(telemetry.snapshot().last_seq, 3);
        drop(host);
        let _ = std::fs::remove_dir_all(dir);
    }
}
