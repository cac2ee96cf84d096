//! Chromium-backed page driver using chromiumoxide.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::Page;
use futures::StreamExt;

use super::{NavigationResult, PageDriver};

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. FACTEUR_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("FACTEUR_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.facteur/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".facteur/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".facteur/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".facteur/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".facteur/chromium/chrome-linux64/chrome"),
                home.join(".facteur/chromium/chrome"),
            ]
        };
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 3. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS locations
    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Owns the browser connection and hands out page drivers.
pub struct ChromiumBrowser {
    browser: Browser,
}

impl ChromiumBrowser {
    /// Launch a headed Chromium instance. The provider portals fight
    /// headless fingerprints, so the default is a visible window.
    pub async fn launch() -> Result<Self> {
        let chrome_path = find_chromium()
            .context("Chromium not found. Set FACTEUR_CHROMIUM_PATH or install Chrome.")?;

        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .with_head()
            .arg("--disable-background-networking")
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        Ok(Self { browser })
    }

    /// Attach to a running browser over its DevTools websocket. This is the
    /// usual mode: the human's real session, with their cookies, does the
    /// browsing while the core drives it.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (browser, mut handler) = Browser::connect(ws_url)
            .await
            .with_context(|| format!("failed to connect to browser at {ws_url}"))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        Ok(Self { browser })
    }

    /// Pick the tab whose URL contains `url_hint`, else the first open tab,
    /// else a fresh blank page.
    pub async fn page(&self, url_hint: Option<&str>) -> Result<ChromiumPage> {
        let pages = self.browser.pages().await.context("failed to list pages")?;

        if let Some(hint) = url_hint {
            for page in &pages {
                let url = page
                    .url()
                    .await
                    .ok()
                    .flatten()
                    .map(|u| u.to_string())
                    .unwrap_or_default();
                if url.contains(hint) {
                    return Ok(ChromiumPage { page: page.clone() });
                }
            }
        }

        if let Some(page) = pages.into_iter().next() {
            return Ok(ChromiumPage { page });
        }

        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;
        Ok(ChromiumPage { page })
    }
}

/// One Chromium tab.
pub struct ChromiumPage {
    page: Page,
}

#[async_trait]
impl PageDriver for ChromiumPage {
    async fn navigate(&self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let start = Instant::now();

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(timeout_ms),
            self.page.goto(url),
        )
        .await;

        let load_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(_response)) => {
                let _ = self.page.wait_for_navigation().await;
                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| url.to_string());
                Ok(NavigationResult {
                    final_url,
                    load_time_ms,
                })
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {timeout_ms}ms"),
        }
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        // Promise-returning scripts (in-page fetch) are awaited by the
        // browser before the value comes back.
        let params = EvaluateParams::builder()
            .expression(script.to_string())
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build evaluate params: {e}"))?;

        let result = self
            .page
            .evaluate(params)
            .await
            .context("JS execution failed")?;

        let value: serde_json::Value = result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert JS result: {e:?}"))?;
        Ok(value)
    }

    async fn current_url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .context("failed to get URL")?
            .map(|u| u.to_string())
            .unwrap_or_default();
        Ok(url)
    }

    async fn html(&self) -> Result<String> {
        let result = self
            .page
            .evaluate("document.documentElement.outerHTML")
            .await
            .context("failed to get HTML")?;

        let html: String = result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert HTML result: {e:?}"))?;
        Ok(html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom;

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_navigate_and_snapshot() {
        let browser = ChromiumBrowser::launch()
            .await
            .expect("failed to launch browser");
        let page = browser.page(None).await.expect("failed to open page");

        page.navigate(
            "data:text/html,<button id='ok'>Télécharger</button>",
            10_000,
        )
        .await
        .expect("navigation failed");

        let snap = dom::capture(&page).await.expect("snapshot failed");
        assert!(snap
            .ids()
            .any(|id| snap.attr(id, "id") == Some("ok") && snap.node(id).tag == "button"));
    }
}
