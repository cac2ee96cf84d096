//! Browser page abstraction.
//!
//! Defines the `PageDriver` trait that abstracts over the browser engine
//! (Chromium via chromiumoxide in production, scripted fakes in tests).
//! Workflows only ever need four capabilities: navigate, evaluate injected
//! JS, read the current URL, read the full HTML.

pub mod chromium;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// A single browser tab the workflows drive.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate to a URL with a timeout.
    async fn navigate(&self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;
    /// Execute JavaScript in the page context and return the JSON result.
    /// Promise results are awaited.
    async fn execute_js(&self, script: &str) -> Result<serde_json::Value>;
    /// Current `location.href`.
    async fn current_url(&self) -> Result<String>;
    /// Full document HTML.
    async fn html(&self) -> Result<String>;
}
