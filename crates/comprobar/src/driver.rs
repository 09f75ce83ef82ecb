//! Automation-session abstraction.
//!
//! The orchestrator and the step handlers only talk to a [`BrowserSession`];
//! [`SessionLauncher`] opens one per run. The Chromium implementation lives in
//! `browser` behind the `browser` feature, and [`MockSession`] is a
//! scriptable in-memory page used by the test suite.
//!
//! Element lookups that match nothing return
//! [`ComprobarError::ElementNotFound`]; waits that expire return
//! [`ComprobarError::Timeout`]. Anything else is an unexpected fault.

use crate::emulation::DeviceProfile;
use crate::result::{ComprobarError, ComprobarResult};
use async_trait::async_trait;
use image::{ImageEncoder, Rgba, RgbaImage};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// What a screenshot covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    /// The whole scrollable page
    FullPage,
    /// The visible viewport
    Viewport,
    /// The first element matching a selector
    Element(String),
}

/// A live page in an isolated browser context
#[async_trait]
pub trait BrowserSession: Send {
    /// Navigate and wait for the network to go idle
    async fn navigate(&mut self, url: &str) -> ComprobarResult<()>;

    /// Click the first element matching `selector`
    async fn click(&mut self, selector: &str) -> ComprobarResult<()>;

    /// Replace the value of an input with `text`
    async fn fill(&mut self, selector: &str, text: &str) -> ComprobarResult<()>;

    /// Choose the option of a `<select>` whose value or label is `value`
    async fn select_option(&mut self, selector: &str, value: &str) -> ComprobarResult<()>;

    /// Scroll an element into view
    async fn scroll_into_view(&mut self, selector: &str) -> ComprobarResult<()>;

    /// Dispatch a wheel event with the given deltas
    async fn scroll_by(&mut self, dx: f64, dy: f64) -> ComprobarResult<()>;

    /// Scroll to the maximum vertical extent
    async fn scroll_to_bottom(&mut self) -> ComprobarResult<()>;

    /// Wait until `selector` matches an element
    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration)
        -> ComprobarResult<()>;

    /// Number of elements matching `selector`
    async fn count(&mut self, selector: &str) -> ComprobarResult<usize>;

    /// Text content of the first match
    async fn text_content(&mut self, selector: &str) -> ComprobarResult<String>;

    /// Attribute of the first match; `None` if the attribute is absent
    async fn attribute(&mut self, selector: &str, name: &str) -> ComprobarResult<Option<String>>;

    /// DOM property of the first match
    async fn property(&mut self, selector: &str, name: &str) -> ComprobarResult<Value>;

    /// Drag `source` onto `target`
    async fn drag_and_drop(&mut self, source: &str, target: &str) -> ComprobarResult<()>;

    /// Set the files of a file input
    async fn upload_file(&mut self, selector: &str, path: &Path) -> ComprobarResult<()>;

    /// Capture a PNG
    async fn screenshot(&mut self, capture: &Capture) -> ComprobarResult<Vec<u8>>;

    /// Evaluate a script in the page and return its JSON result
    async fn evaluate(&mut self, script: &str) -> ComprobarResult<Value>;

    /// Serialized HTML of the current document
    async fn dom_snapshot(&mut self) -> ComprobarResult<String>;

    /// Close the page
    async fn close_page(&mut self) -> ComprobarResult<()>;

    /// Close the browser. Calling it again is a no-op.
    async fn close(&mut self) -> ComprobarResult<()>;
}

/// Opens one session per run
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    /// Launch a browser emulating `profile` and open a page in a fresh context
    async fn launch(&self, profile: &DeviceProfile) -> ComprobarResult<Box<dyn BrowserSession>>;
}

/// An element of the mock page
#[derive(Debug, Clone, Default)]
pub struct MockElement {
    /// Text content
    pub text: String,
    /// Attributes
    pub attributes: HashMap<String, String>,
    /// DOM properties
    pub properties: serde_json::Map<String, Value>,
}

impl MockElement {
    /// Element with the given text
    #[must_use]
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Add an attribute
    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.attributes.insert(name.into(), value.into());
        self
    }

    /// Add a DOM property
    #[must_use]
    pub fn prop(mut self, name: impl Into<String>, value: Value) -> Self {
        let _ = self.properties.insert(name.into(), value);
        self
    }
}

#[derive(Debug)]
struct MockState {
    url: Option<String>,
    elements: HashMap<String, MockElement>,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    navigation_error: Option<String>,
    eval_results: Vec<(String, Value)>,
    screenshot_size: (u32, u32),
    screenshot_color: [u8; 4],
    html: String,
    uploads: Vec<(String, PathBuf)>,
    scroll: (f64, f64),
    call_history: Vec<String>,
    page_closed: bool,
    browser_closed: bool,
    close_calls: usize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            url: None,
            elements: HashMap::new(),
            failing: HashSet::new(),
            hanging: HashSet::new(),
            navigation_error: None,
            eval_results: Vec::new(),
            screenshot_size: (8, 8),
            screenshot_color: [32, 64, 128, 255],
            html: "<html><head></head><body></body></html>".to_string(),
            uploads: Vec::new(),
            scroll: (0.0, 0.0),
            call_history: Vec::new(),
            page_closed: false,
            browser_closed: false,
            close_calls: 0,
        }
    }
}

/// Scriptable in-memory session.
///
/// Clones share state, so a test can keep one handle while the orchestrator
/// owns another and inspect what happened after the run.
#[derive(Debug, Clone, Default)]
pub struct MockSession {
    state: Arc<Mutex<MockState>>,
}

impl MockSession {
    /// Create an empty page
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace an element
    pub fn add_element(&self, selector: impl Into<String>, element: MockElement) {
        let _ = self.state().elements.insert(selector.into(), element);
    }

    /// Remove an element
    pub fn remove_element(&self, selector: &str) {
        let _ = self.state().elements.remove(selector);
    }

    /// Interactions with `selector` raise an unexpected page error
    pub fn fail_on(&self, selector: impl Into<String>) {
        let _ = self.state().failing.insert(selector.into());
    }

    /// Interactions with `selector` never complete
    pub fn hang_on(&self, selector: impl Into<String>) {
        let _ = self.state().hanging.insert(selector.into());
    }

    /// Navigation fails with `message`
    pub fn fail_navigation(&self, message: impl Into<String>) {
        self.state().navigation_error = Some(message.into());
    }

    /// Scripts containing `needle` evaluate to `result`
    pub fn set_eval_result(&self, needle: impl Into<String>, result: Value) {
        self.state().eval_results.push((needle.into(), result));
    }

    /// Size and color of captured screenshots
    pub fn set_screenshot(&self, width: u32, height: u32, color: [u8; 4]) {
        let mut state = self.state();
        state.screenshot_size = (width, height);
        state.screenshot_color = color;
    }

    /// Document returned by [`BrowserSession::dom_snapshot`]
    pub fn set_html(&self, html: impl Into<String>) {
        self.state().html = html.into();
    }

    /// Current text of an element
    #[must_use]
    pub fn text_of(&self, selector: &str) -> Option<String> {
        self.state().elements.get(selector).map(|e| e.text.clone())
    }

    /// Last navigated URL
    #[must_use]
    pub fn current_url(&self) -> Option<String> {
        self.state().url.clone()
    }

    /// Files set on inputs, in order
    #[must_use]
    pub fn uploads(&self) -> Vec<(String, PathBuf)> {
        self.state().uploads.clone()
    }

    /// Accumulated wheel deltas
    #[must_use]
    pub fn scroll_offset(&self) -> (f64, f64) {
        self.state().scroll
    }

    /// Calls made so far, formatted as `method:argument`
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.state().call_history.clone()
    }

    /// Check if a method was called
    #[must_use]
    pub fn was_called(&self, method: &str) -> bool {
        self.state()
            .call_history
            .iter()
            .any(|c| c.split(':').next() == Some(method))
    }

    /// Whether the page was closed
    #[must_use]
    pub fn page_closed(&self) -> bool {
        self.state().page_closed
    }

    /// Whether the browser was closed
    #[must_use]
    pub fn browser_closed(&self) -> bool {
        self.state().browser_closed
    }

    /// How many times `close` was called
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.state().close_calls
    }

    fn record(&self, call: String) {
        self.state().call_history.push(call);
    }

    /// Record the call, then hang, fail, or hand back the element
    async fn touch(&self, method: &str, selector: &str) -> ComprobarResult<MockElement> {
        self.record(format!("{method}:{selector}"));
        let (hanging, failing, element) = {
            let state = self.state();
            (
                state.hanging.contains(selector),
                state.failing.contains(selector),
                state.elements.get(selector).cloned(),
            )
        };
        if hanging {
            std::future::pending::<()>().await;
        }
        if failing {
            return Err(ComprobarError::page(format!(
                "target closed while handling {selector}"
            )));
        }
        element.ok_or_else(|| ComprobarError::ElementNotFound {
            selector: selector.to_string(),
        })
    }

    fn update(&self, selector: &str, f: impl FnOnce(&mut MockElement)) {
        if let Some(element) = self.state().elements.get_mut(selector) {
            f(element);
        }
    }

    fn render_png(&self) -> ComprobarResult<Vec<u8>> {
        let ((width, height), color) = {
            let state = self.state();
            (state.screenshot_size, state.screenshot_color)
        };
        let img = RgbaImage::from_pixel(width, height, Rgba(color));
        let mut buffer = Vec::new();
        image::codecs::png::PngEncoder::new(&mut buffer)
            .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgba8)
            .map_err(|e| ComprobarError::ScreenshotError {
                message: e.to_string(),
            })?;
        Ok(buffer)
    }
}

#[async_trait]
impl BrowserSession for MockSession {
    async fn navigate(&mut self, url: &str) -> ComprobarResult<()> {
        self.record(format!("navigate:{url}"));
        let mut state = self.state();
        if let Some(message) = state.navigation_error.clone() {
            return Err(ComprobarError::NavigationError {
                url: url.to_string(),
                message,
            });
        }
        state.url = Some(url.to_string());
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> ComprobarResult<()> {
        self.touch("click", selector).await.map(|_| ())
    }

    async fn fill(&mut self, selector: &str, text: &str) -> ComprobarResult<()> {
        let _ = self.touch("fill", selector).await?;
        self.update(selector, |e| {
            e.text = text.to_string();
            let _ = e.properties.insert("value".into(), Value::from(text));
        });
        Ok(())
    }

    async fn select_option(&mut self, selector: &str, value: &str) -> ComprobarResult<()> {
        let _ = self.touch("select", selector).await?;
        self.update(selector, |e| {
            let _ = e.properties.insert("value".into(), Value::from(value));
        });
        Ok(())
    }

    async fn scroll_into_view(&mut self, selector: &str) -> ComprobarResult<()> {
        self.touch("scroll_into_view", selector).await.map(|_| ())
    }

    async fn scroll_by(&mut self, dx: f64, dy: f64) -> ComprobarResult<()> {
        self.record(format!("scroll_by:{dx},{dy}"));
        let mut state = self.state();
        state.scroll = (state.scroll.0 + dx, state.scroll.1 + dy);
        Ok(())
    }

    async fn scroll_to_bottom(&mut self) -> ComprobarResult<()> {
        self.record("scroll_to_bottom".to_string());
        Ok(())
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> ComprobarResult<()> {
        match self.touch("wait_for_selector", selector).await {
            Ok(_) => Ok(()),
            Err(ComprobarError::ElementNotFound { .. }) => Err(ComprobarError::Timeout {
                ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            Err(e) => Err(e),
        }
    }

    async fn count(&mut self, selector: &str) -> ComprobarResult<usize> {
        match self.touch("count", selector).await {
            Ok(_) => Ok(1),
            Err(ComprobarError::ElementNotFound { .. }) => Ok(0),
            Err(e) => Err(e),
        }
    }

    async fn text_content(&mut self, selector: &str) -> ComprobarResult<String> {
        Ok(self.touch("text_content", selector).await?.text)
    }

    async fn attribute(&mut self, selector: &str, name: &str) -> ComprobarResult<Option<String>> {
        let element = self.touch("attribute", selector).await?;
        Ok(element.attributes.get(name).cloned())
    }

    async fn property(&mut self, selector: &str, name: &str) -> ComprobarResult<Value> {
        let element = self.touch("property", selector).await?;
        Ok(element.properties.get(name).cloned().unwrap_or(Value::Null))
    }

    async fn drag_and_drop(&mut self, source: &str, target: &str) -> ComprobarResult<()> {
        let _ = self.touch("drag", source).await?;
        let _ = self.touch("drop", target).await?;
        Ok(())
    }

    async fn upload_file(&mut self, selector: &str, path: &Path) -> ComprobarResult<()> {
        let _ = self.touch("upload", selector).await?;
        if !path.exists() {
            return Err(ComprobarError::InputError {
                message: format!("file to upload does not exist: {}", path.display()),
            });
        }
        self.state()
            .uploads
            .push((selector.to_string(), path.to_path_buf()));
        Ok(())
    }

    async fn screenshot(&mut self, capture: &Capture) -> ComprobarResult<Vec<u8>> {
        match capture {
            Capture::Element(selector) => {
                let _ = self.touch("screenshot", selector).await?;
            }
            Capture::FullPage => self.record("screenshot:full".to_string()),
            Capture::Viewport => self.record("screenshot:viewport".to_string()),
        }
        self.render_png()
    }

    async fn evaluate(&mut self, script: &str) -> ComprobarResult<Value> {
        self.record("evaluate".to_string());
        let state = self.state();
        Ok(state
            .eval_results
            .iter()
            .find(|(needle, _)| script.contains(needle.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or(Value::Null))
    }

    async fn dom_snapshot(&mut self) -> ComprobarResult<String> {
        self.record("dom_snapshot".to_string());
        Ok(self.state().html.clone())
    }

    async fn close_page(&mut self) -> ComprobarResult<()> {
        self.record("close_page".to_string());
        self.state().page_closed = true;
        Ok(())
    }

    async fn close(&mut self) -> ComprobarResult<()> {
        self.record("close".to_string());
        let mut state = self.state();
        state.close_calls += 1;
        state.browser_closed = true;
        Ok(())
    }
}

/// Launcher handing out clones of one [`MockSession`]
#[derive(Debug, Clone, Default)]
pub struct MockLauncher {
    session: MockSession,
    failure: Option<(bool, String)>,
    launches: Arc<Mutex<Vec<DeviceProfile>>>,
}

impl MockLauncher {
    /// Launcher for `session`
    #[must_use]
    pub fn new(session: MockSession) -> Self {
        Self {
            session,
            failure: None,
            launches: Arc::default(),
        }
    }

    /// Every launch fails. `missing_binary` picks between "no browser
    /// installed" and "browser crashed on start".
    #[must_use]
    pub fn failing(missing_binary: bool, message: impl Into<String>) -> Self {
        Self {
            failure: Some((missing_binary, message.into())),
            ..Self::default()
        }
    }

    /// The shared session
    #[must_use]
    pub const fn session(&self) -> &MockSession {
        &self.session
    }

    /// Profiles passed to `launch`, in order
    #[must_use]
    pub fn launches(&self) -> Vec<DeviceProfile> {
        self.launches
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionLauncher for MockLauncher {
    async fn launch(&self, profile: &DeviceProfile) -> ComprobarResult<Box<dyn BrowserSession>> {
        if let Ok(mut launches) = self.launches.lock() {
            launches.push(profile.clone());
        }
        match &self.failure {
            Some((true, message)) => Err(ComprobarError::BrowserNotFound {
                message: message.clone(),
            }),
            Some((false, message)) => Err(ComprobarError::BrowserLaunchError {
                message: message.clone(),
            }),
            None => Ok(Box::new(self.session.clone())),
        }
    }
}
