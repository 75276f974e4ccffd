//! Display collaborator seam.
//!
//! Text layout, wrapping and scrolling belong to the display driver; the
//! gateway only pushes whole strings to one of two channels.

use std::sync::Mutex;

/// A screen attached to the gateway device.
pub trait Screen: Send + Sync {
    /// Show a message on the chat channel.
    fn show_chat(&self, text: &str);
    /// Show a line on the status channel.
    fn show_status(&self, text: &str);
    /// Clear both channels.
    fn clear(&self);
}

/// Screen that logs its content and keeps the last text per channel.
#[derive(Debug, Default)]
pub struct LogScreen {
    content: Mutex<ScreenContent>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScreenContent {
    pub chat: Option<String>,
    pub status: Option<String>,
}

impl LogScreen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(&self) -> ScreenContent {
        self.content.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Screen for LogScreen {
    fn show_chat(&self, text: &str) {
        tracing::info!(channel = "chat", "{text}");
        self.content.lock().unwrap_or_else(|e| e.into_inner()).chat = Some(text.to_string());
    }

    fn show_status(&self, text: &str) {
        tracing::info!(channel = "status", "{text}");
        self.content.lock().unwrap_or_else(|e| e.into_inner()).status = Some(text.to_string());
    }

    fn clear(&self) {
        tracing::info!("screen cleared");
        *self.content.lock().unwrap_or_else(|e| e.into_inner()) = ScreenContent::default();
    }
}
