//! Integration tests for the gateway device HTTP surface

#[cfg(feature = "gateway")]
mod api_tests {
    use keyrelay::gateway::api::{serve, ApiState};
    use keyrelay::gateway::{LogScreen, Telemetry};
    use std::net::SocketAddr;
    use std::sync::Arc;

    async fn start() -> (SocketAddr, Arc<LogScreen>, tokio::sync::oneshot::Sender<()>) {
        let screen = Arc::new(LogScreen::new());
        let state = Arc::new(ApiState {
            screen: screen.clone(),
            telemetry: Arc::new(Telemetry::new("gw-api")),
        });
        let (addr, shutdown) = serve(SocketAddr::from(([127, 0, 0, 1], 0)), state)
            .await
            .expect("Failed to start surface");
        (addr, screen, shutdown)
    }

    #[tokio::test]
    async fn test_text_channels() {
        let (addr, screen, _shutdown) = start().await;

        let response = reqwest::get(format!("http://{addr}/msg?t=hello%20there")).await.unwrap();
        assert!(response.status().is_success());
        assert_eq!(screen.content().chat.as_deref(), Some("hello there"));

        let response = reqwest::get(format!("http://{addr}/status?t=ready")).await.unwrap();
        assert!(response.status().is_success());
        assert_eq!(screen.content().status.as_deref(), Some("ready"));

        let response = reqwest::get(format!("http://{addr}/clear")).await.unwrap();
        assert!(response.status().is_success());
        assert_eq!(screen.content().chat, None);
    }

    #[tokio::test]
    async fn test_missing_text_rejected() {
        let (addr, screen, _shutdown) = start().await;

        let response = reqwest::get(format!("http://{addr}/msg")).await.unwrap();
        assert_eq!(response.status().as_u16(), 400);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["ok"], false);

        let response = reqwest::get(format!("http://{addr}/status?t=%20")).await.unwrap();
        assert_eq!(response.status().as_u16(), 400);
        assert_eq!(screen.content().status, None);
    }

    #[tokio::test]
    async fn test_ui_endpoint() {
        let (addr, screen, _shutdown) = start().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{addr}/ui"))
            .json(&serde_json::json!({ "channel": "chat", "text": "build green" }))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        assert_eq!(screen.content().chat.as_deref(), Some("build green"));

        let response = client
            .post(format!("http://{addr}/ui"))
            .json(&serde_json::json!({ "channel": "marquee", "text": "x" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
    }

    #[tokio::test]
    async fn test_health_reports_telemetry() {
        let (addr, _screen, _shutdown) = start().await;

        let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(body["deviceId"], "gw-api");
        assert_eq!(body["ip"], "127.0.0.1");
    }
}
