//! Chromium automation over CDP.
//!
//! Compiled with the `browser` feature. [`ChromiumLauncher`] starts one
//! browser per run, opens an isolated context with a single page and applies
//! the device profile; [`ChromiumSession`] implements [`BrowserSession`] on
//! top of that page.

use crate::config::{BrowserOptions, EngineConfig};
use crate::driver::{BrowserSession, Capture, SessionLauncher};
use crate::emulation::DeviceProfile;
use crate::result::{ComprobarError, ComprobarResult};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as CdpConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetTouchEmulationEnabledParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use chromiumoxide::layout::Point;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde_json::Value;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const IDLE_WINDOW: Duration = Duration::from_millis(500);

/// Switches for the fallback launch in constrained containers
const FALLBACK_ARGS: [&str; 3] = [
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--no-zygote",
];

/// Launches Chromium sessions
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    options: BrowserOptions,
    navigation_timeout: Duration,
}

impl ChromiumLauncher {
    /// Launcher with explicit options
    #[must_use]
    pub fn new(options: BrowserOptions) -> Self {
        Self {
            options,
            navigation_timeout: Duration::from_secs(30),
        }
    }

    /// Launcher for an engine configuration
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            options: config.browser.clone(),
            navigation_timeout: config.navigation_timeout(),
        }
    }

    fn cdp_config(&self, profile: &DeviceProfile, fallback: bool) -> ComprobarResult<CdpConfig> {
        let mut builder = CdpConfig::builder()
            .window_size(profile.viewport.width, profile.viewport.height)
            .request_timeout(self.navigation_timeout);

        if !self.options.headless {
            builder = builder.with_head();
        }
        if fallback || !self.options.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(path) = &self.options.chromium_path {
            builder = builder.chrome_executable(path);
        }
        for arg in &self.options.extra_args {
            builder = builder.arg(arg.as_str());
        }
        if fallback {
            for arg in FALLBACK_ARGS {
                builder = builder.arg(arg);
            }
        }

        builder.build().map_err(|message| launch_error(&message))
    }

    async fn start(
        &self,
        profile: &DeviceProfile,
        fallback: bool,
    ) -> ComprobarResult<(Browser, JoinHandle<()>)> {
        let config = self.cdp_config(profile, fallback)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| launch_error(&e.to_string()))?;

        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        Ok((browser, handle))
    }

    async fn open_page(browser: &mut Browser, profile: &DeviceProfile) -> ComprobarResult<Page> {
        let context = browser
            .create_browser_context(CreateBrowserContextParams::default())
            .await
            .map_err(|e| ComprobarError::page(format!("browser context: {e}")))?;
        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context)
            .build()
            .map_err(ComprobarError::page)?;
        let page = browser
            .new_page(target)
            .await
            .map_err(|e| ComprobarError::page(e.to_string()))?;

        let width = i64::from(profile.viewport.width);
        let height = i64::from(profile.viewport.height);
        let _ = page
            .execute(SetDeviceMetricsOverrideParams::new(
                width,
                height,
                profile.device_scale_factor,
                profile.is_mobile,
            ))
            .await
            .map_err(|e| ComprobarError::page(format!("device metrics: {e}")))?;
        let _ = page
            .execute(SetUserAgentOverrideParams::new(profile.user_agent.clone()))
            .await
            .map_err(|e| ComprobarError::page(format!("user agent: {e}")))?;
        if profile.has_touch {
            let _ = page
                .execute(SetTouchEmulationEnabledParams::new(true))
                .await
                .map_err(|e| ComprobarError::page(format!("touch emulation: {e}")))?;
        }
        Ok(page)
    }
}

/// Classify a launch failure message
fn launch_error(message: &str) -> ComprobarError {
    let lower = message.to_ascii_lowercase();
    let missing = ["could not auto detect", "no such file", "not found", "executable"]
        .iter()
        .any(|needle| lower.contains(needle));
    if missing {
        ComprobarError::BrowserNotFound {
            message: message.to_string(),
        }
    } else {
        ComprobarError::BrowserLaunchError {
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl SessionLauncher for ChromiumLauncher {
    async fn launch(&self, profile: &DeviceProfile) -> ComprobarResult<Box<dyn BrowserSession>> {
        let (mut browser, handler) = match self.start(profile, false).await {
            Ok(started) => started,
            Err(e) if e.is_missing_browser() => return Err(e),
            Err(e) => {
                warn!(error = %e, "browser launch failed, retrying without sandbox");
                self.start(profile, true).await?
            }
        };

        let page = match Self::open_page(&mut browser, profile).await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                handler.abort();
                return Err(e);
            }
        };
        info!(
            profile = %profile.name,
            width = profile.viewport.width,
            height = profile.viewport.height,
            "browser session opened"
        );

        Ok(Box::new(ChromiumSession {
            browser: Some(browser),
            page: Some(page),
            handler: Some(handler),
            navigation_timeout: self.navigation_timeout,
        }))
    }
}

/// One Chromium browser with one page
#[derive(Debug)]
pub struct ChromiumSession {
    browser: Option<Browser>,
    page: Option<Page>,
    handler: Option<JoinHandle<()>>,
    navigation_timeout: Duration,
}

/// Quote a string as a JavaScript literal
fn js_str(value: &str) -> ComprobarResult<String> {
    Ok(serde_json::to_string(value)?)
}

fn not_found(selector: &str) -> ComprobarError {
    ComprobarError::ElementNotFound {
        selector: selector.to_string(),
    }
}

fn input_error(e: impl std::fmt::Display) -> ComprobarError {
    ComprobarError::InputError {
        message: e.to_string(),
    }
}

fn screenshot_error(e: impl std::fmt::Display) -> ComprobarError {
    ComprobarError::ScreenshotError {
        message: e.to_string(),
    }
}

impl ChromiumSession {
    fn page(&self) -> ComprobarResult<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| ComprobarError::page("page is closed"))
    }

    async fn eval(&self, script: String) -> ComprobarResult<Value> {
        let result = self
            .page()?
            .evaluate(script)
            .await
            .map_err(|e| ComprobarError::page(format!("evaluate: {e}")))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn element(&self, selector: &str) -> ComprobarResult<chromiumoxide::element::Element> {
        self.page()?
            .find_element(selector)
            .await
            .map_err(|_| not_found(selector))
    }

    async fn point_of(&self, selector: &str) -> ComprobarResult<Point> {
        self.element(selector)
            .await?
            .clickable_point()
            .await
            .map_err(input_error)
    }

    async fn mouse(
        &self,
        kind: DispatchMouseEventType,
        at: Point,
        button: MouseButton,
    ) -> ComprobarResult<()> {
        let params = DispatchMouseEventParams::builder()
            .r#type(kind)
            .x(at.x)
            .y(at.y)
            .button(button)
            .click_count(1)
            .build()
            .map_err(input_error)?;
        let _ = self.page()?.execute(params).await.map_err(input_error)?;
        Ok(())
    }

    /// Wait until the document is complete and no new resource entries
    /// appear for a short window
    async fn wait_for_network_idle(&self) -> ComprobarResult<()> {
        let deadline = Instant::now() + self.navigation_timeout;
        let mut last_count = -1_i64;
        let mut quiet_since = Instant::now();
        loop {
            let readiness = self
                .eval(
                    "({ready: document.readyState, resources: performance.getEntriesByType('resource').length})"
                        .to_string(),
                )
                .await?;
            let complete = readiness["ready"].as_str() == Some("complete");
            let count = readiness["resources"].as_i64().unwrap_or(0);
            if count != last_count {
                last_count = count;
                quiet_since = Instant::now();
            }
            if complete && quiet_since.elapsed() >= IDLE_WINDOW {
                return Ok(());
            }
            if Instant::now() >= deadline {
                debug!(resources = count, "network did not go idle before the navigation timeout");
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> ComprobarResult<()> {
        let nav_error = |message: String| ComprobarError::NavigationError {
            url: url.to_string(),
            message,
        };
        let page = self.page()?;
        match tokio::time::timeout(self.navigation_timeout, page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(nav_error(e.to_string())),
            Err(_) => {
                return Err(nav_error(format!(
                    "no response within {}s",
                    self.navigation_timeout.as_secs()
                )))
            }
        }
        self.wait_for_network_idle().await
    }

    async fn click(&mut self, selector: &str) -> ComprobarResult<()> {
        let _ = self
            .element(selector)
            .await?
            .click()
            .await
            .map_err(input_error)?;
        Ok(())
    }

    async fn fill(&mut self, selector: &str, text: &str) -> ComprobarResult<()> {
        let element = self.element(selector).await?;
        let _ = self
            .eval(format!(
                "(() => {{ const el = document.querySelector({}); if (el && 'value' in el) {{ el.value = ''; }} }})()",
                js_str(selector)?
            ))
            .await?;
        let _ = element.click().await.map_err(input_error)?;
        let _ = element.type_str(text).await.map_err(input_error)?;
        Ok(())
    }

    async fn select_option(&mut self, selector: &str, value: &str) -> ComprobarResult<()> {
        let outcome = self
            .eval(format!(
                r"(() => {{
  const el = document.querySelector({sel});
  if (!el) {{ return 'missing'; }}
  const want = {val};
  const opt = Array.from(el.options || []).find((o) => o.value === want || o.text.trim() === want);
  if (!opt) {{ return 'no-option'; }}
  el.value = opt.value;
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return 'ok';
}})()",
                sel = js_str(selector)?,
                val = js_str(value)?
            ))
            .await?;
        match outcome.as_str() {
            Some("ok") => Ok(()),
            Some("missing") => Err(not_found(selector)),
            _ => Err(ComprobarError::InputError {
                message: format!("no option '{value}' in {selector}"),
            }),
        }
    }

    async fn scroll_into_view(&mut self, selector: &str) -> ComprobarResult<()> {
        let _ = self
            .element(selector)
            .await?
            .scroll_into_view()
            .await
            .map_err(input_error)?;
        Ok(())
    }

    async fn scroll_by(&mut self, dx: f64, dy: f64) -> ComprobarResult<()> {
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseWheel)
            .x(0.0)
            .y(0.0)
            .delta_x(dx)
            .delta_y(dy)
            .build()
            .map_err(input_error)?;
        let _ = self.page()?.execute(params).await.map_err(input_error)?;
        Ok(())
    }

    async fn scroll_to_bottom(&mut self) -> ComprobarResult<()> {
        let _ = self
            .eval("window.scrollTo(0, document.documentElement.scrollHeight)".to_string())
            .await?;
        Ok(())
    }

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> ComprobarResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.page()?.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ComprobarError::Timeout {
                    ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn count(&mut self, selector: &str) -> ComprobarResult<usize> {
        let count = self
            .eval(format!(
                "document.querySelectorAll({}).length",
                js_str(selector)?
            ))
            .await?;
        Ok(count
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0))
    }

    async fn text_content(&mut self, selector: &str) -> ComprobarResult<String> {
        let text = self
            .eval(format!(
                "(() => {{ const el = document.querySelector({}); return el ? (el.textContent || '') : null; }})()",
                js_str(selector)?
            ))
            .await?;
        match text {
            Value::String(s) => Ok(s),
            _ => Err(not_found(selector)),
        }
    }

    async fn attribute(&mut self, selector: &str, name: &str) -> ComprobarResult<Option<String>> {
        self.element(selector)
            .await?
            .attribute(name)
            .await
            .map_err(|e| ComprobarError::page(e.to_string()))
    }

    async fn property(&mut self, selector: &str, name: &str) -> ComprobarResult<Value> {
        let value = self
            .element(selector)
            .await?
            .property(name)
            .await
            .map_err(|e| ComprobarError::page(e.to_string()))?;
        Ok(value.unwrap_or(Value::Null))
    }

    async fn drag_and_drop(&mut self, source: &str, target: &str) -> ComprobarResult<()> {
        let from = self.point_of(source).await?;
        let to = self.point_of(target).await?;
        self.mouse(DispatchMouseEventType::MouseMoved, from, MouseButton::None)
            .await?;
        self.mouse(DispatchMouseEventType::MousePressed, from, MouseButton::Left)
            .await?;
        self.mouse(DispatchMouseEventType::MouseMoved, to, MouseButton::Left)
            .await?;
        self.mouse(DispatchMouseEventType::MouseReleased, to, MouseButton::Left)
            .await
    }

    async fn upload_file(&mut self, selector: &str, path: &Path) -> ComprobarResult<()> {
        let element = self.element(selector).await?;
        let absolute = path.canonicalize().map_err(|e| ComprobarError::InputError {
            message: format!("file to upload {}: {e}", path.display()),
        })?;
        let params = SetFileInputFilesParams::builder()
            .files(vec![absolute.to_string_lossy().into_owned()])
            .backend_node_id(element.backend_node_id)
            .build()
            .map_err(input_error)?;
        let _ = self.page()?.execute(params).await.map_err(input_error)?;
        Ok(())
    }

    async fn screenshot(&mut self, capture: &Capture) -> ComprobarResult<Vec<u8>> {
        match capture {
            Capture::Element(selector) => self
                .element(selector)
                .await?
                .screenshot(CaptureScreenshotFormat::Png)
                .await
                .map_err(screenshot_error),
            Capture::FullPage => self
                .page()?
                .screenshot(
                    ScreenshotParams::builder()
                        .format(CaptureScreenshotFormat::Png)
                        .full_page(true)
                        .build(),
                )
                .await
                .map_err(screenshot_error),
            Capture::Viewport => {
                let params = CaptureScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build();
                let shot = self
                    .page()?
                    .execute(params)
                    .await
                    .map_err(screenshot_error)?;

                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(&shot.data)
                    .map_err(screenshot_error)
            }
        }
    }

    async fn evaluate(&mut self, script: &str) -> ComprobarResult<Value> {
        self.eval(script.to_string()).await
    }

    async fn dom_snapshot(&mut self) -> ComprobarResult<String> {
        self.page()?
            .content()
            .await
            .map_err(|e| ComprobarError::page(format!("DOM snapshot: {e}")))
    }

    async fn close_page(&mut self) -> ComprobarResult<()> {
        let Some(page) = self.page.take() else {
            return Ok(());
        };
        page.close()
            .await
            .map_err(|e| ComprobarError::page(format!("page close: {e}")))
    }

    async fn close(&mut self) -> ComprobarResult<()> {
        let _ = self.page.take();
        let result = match self.browser.take() {
            Some(mut browser) => {
                let closed = browser.close().await.map(|_| ());
                let _ = browser.wait().await;
                closed.map_err(|e| ComprobarError::BrowserLaunchError {
                    message: format!("browser close: {e}"),
                })
            }
            None => Ok(()),
        };
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary_is_not_found() {
        let e = launch_error("Could not auto detect a chrome executable");
        assert!(e.is_missing_browser());
        let e = launch_error("No such file or directory (os error 2)");
        assert!(e.is_missing_browser());
    }

    #[test]
    fn test_crash_is_launch_error() {
        let e = launch_error("Browser process exited with status 133 before websocket URL");
        assert!(matches!(e, ComprobarError::BrowserLaunchError { .. }));
    }

    #[test]
    fn test_js_str_escapes_quotes() {
        assert_eq!(js_str(r#"a[name="q"]"#).unwrap(), r#""a[name=\"q\"]""#);
    }

    #[test]
    fn test_launcher_takes_config() {
        let config = EngineConfig::default();
        let launcher = ChromiumLauncher::from_config(&config);
        assert_eq!(launcher.navigation_timeout, Duration::from_secs(30));
        assert!(launcher.options.sandbox);
    }
}
