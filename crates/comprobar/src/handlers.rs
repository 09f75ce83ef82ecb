//! Step handlers.
//!
//! One handler per [`StepKind`]. Expected failures (a missing selector, an
//! element that is not there, a wait that expires, an assertion that does
//! not hold) come back as `Ok` with `success: false`. `Err` is reserved for
//! faults the orchestrator treats as unexpected.

use crate::context::ExecutionContext;
use crate::driver::Capture;
use crate::model::{AssertionKind, StepKind, TestStep};
use crate::result::{ComprobarError, ComprobarResult};
use crate::visual_regression::VisualDiffResult;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Key extracted values are stored under when a step names none
pub const DEFAULT_EXTRACT_KEY: &str = "extracted";

/// Outcome of one step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecutionResult {
    /// Whether the step did what it was asked
    pub success: bool,
    /// Why it did not
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Step-specific output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// PNG written by a screenshot step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<PathBuf>,
}

impl StepExecutionResult {
    /// Successful result
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// Failed result
    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Attach output
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Attach a screenshot
    #[must_use]
    pub fn with_screenshot(mut self, path: PathBuf) -> Self {
        self.screenshot_path = Some(path);
        self
    }
}

/// Run one step against the context
pub async fn execute_step(
    step: &TestStep,
    ctx: &mut ExecutionContext<'_>,
) -> ComprobarResult<StepExecutionResult> {
    debug!(step = step.order_index, kind = %step.kind, "executing step");
    let outcome = match step.kind {
        StepKind::Click => click(step, ctx).await,
        StepKind::Input => input(step, ctx).await,
        StepKind::Select => select(step, ctx).await,
        StepKind::Scroll => scroll(step, ctx).await,
        StepKind::WaitForSelector => wait_for_selector(step, ctx).await,
        StepKind::Screenshot => screenshot(step, ctx).await,
        StepKind::Extract => extract(step, ctx).await,
        StepKind::Assert => assert(step, ctx).await,
        StepKind::DragAndDrop => drag_and_drop(step, ctx).await,
        StepKind::FileUpload => file_upload(step, ctx).await,
    };
    match outcome {
        Err(e) if e.is_step_failure() => Ok(StepExecutionResult::fail(e.to_string())),
        other => other,
    }
}

fn require<'a>(step: &TestStep, field: Option<&'a str>, name: &str) -> ComprobarResult<&'a str> {
    field
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ComprobarError::InputError {
            message: format!("{} step requires {name}", step.kind),
        })
}

fn selector(step: &TestStep) -> ComprobarResult<&str> {
    require(step, step.selector.as_deref(), "a selector")
}

fn value(step: &TestStep) -> ComprobarResult<&str> {
    require(step, step.value.as_deref(), "a value")
}

async fn click(step: &TestStep, ctx: &mut ExecutionContext<'_>) -> ComprobarResult<StepExecutionResult> {
    ctx.session.click(selector(step)?).await?;
    Ok(StepExecutionResult::ok())
}

async fn input(step: &TestStep, ctx: &mut ExecutionContext<'_>) -> ComprobarResult<StepExecutionResult> {
    let target = selector(step)?;
    let text = ctx.substitute(value(step)?)?;
    ctx.session.fill(target, &text).await?;
    Ok(StepExecutionResult::ok().with_data(json!({ "value": text })))
}

async fn select(step: &TestStep, ctx: &mut ExecutionContext<'_>) -> ComprobarResult<StepExecutionResult> {
    let target = selector(step)?;
    let option = ctx.substitute(value(step)?)?;
    ctx.session.select_option(target, &option).await?;
    Ok(StepExecutionResult::ok().with_data(json!({ "value": option })))
}

/// Parse `"x,y"` wheel deltas
fn parse_deltas(raw: &str) -> Option<(f64, f64)> {
    let (x, y) = raw.split_once(',')?;
    let dx = x.trim().parse::<f64>().ok()?;
    let dy = y.trim().parse::<f64>().ok()?;
    (dx.is_finite() && dy.is_finite()).then_some((dx, dy))
}

async fn scroll(step: &TestStep, ctx: &mut ExecutionContext<'_>) -> ComprobarResult<StepExecutionResult> {
    if let Some(target) = step.selector.as_deref().filter(|s| !s.is_empty()) {
        ctx.session.scroll_into_view(target).await?;
        return Ok(StepExecutionResult::ok());
    }
    if let Some(raw) = step.value.as_deref().filter(|v| !v.trim().is_empty()) {
        let Some((dx, dy)) = parse_deltas(raw) else {
            return Ok(StepExecutionResult::fail(format!(
                "scroll value must be \"x,y\" deltas, got '{raw}'"
            )));
        };
        ctx.session.scroll_by(dx, dy).await?;
        return Ok(StepExecutionResult::ok().with_data(json!({ "dx": dx, "dy": dy })));
    }
    ctx.session.scroll_to_bottom().await?;
    Ok(StepExecutionResult::ok())
}

async fn wait_for_selector(
    step: &TestStep,
    ctx: &mut ExecutionContext<'_>,
) -> ComprobarResult<StepExecutionResult> {
    let target = selector(step)?;
    let timeout = step
        .meta
        .timeout
        .map_or(ctx.wait_timeout, Duration::from_millis);
    ctx.session.wait_for_selector(target, timeout).await?;
    Ok(StepExecutionResult::ok())
}

/// File stem safe to join onto the run directory
fn file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .trim_end_matches(".png")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        format!("screenshot-{}", Utc::now().timestamp_millis())
    } else {
        stem
    }
}

async fn screenshot(
    step: &TestStep,
    ctx: &mut ExecutionContext<'_>,
) -> ComprobarResult<StepExecutionResult> {
    let stem = step.meta.name.as_deref().map_or_else(
        || format!("screenshot-{}", Utc::now().timestamp_millis()),
        file_stem,
    );
    let capture = match step.selector.as_deref().filter(|s| !s.is_empty()) {
        Some(target) => Capture::Element(target.to_string()),
        None => Capture::FullPage,
    };

    let png = ctx.session.screenshot(&capture).await?;
    tokio::fs::create_dir_all(&ctx.run_dir).await?;
    let path = ctx.run_dir.join(format!("{stem}.png"));
    tokio::fs::write(&path, &png).await?;

    if !step.meta.visual_regression {
        return Ok(StepExecutionResult::ok().with_screenshot(path));
    }

    let threshold = step
        .meta
        .threshold
        .unwrap_or(ctx.comparator.config().threshold);
    let comparator = ctx.comparator.clone();
    let (test_id, key, current) = (ctx.test_id.clone(), step.step_key(), path.clone());
    let diff = tokio::task::spawn_blocking(move || {
        comparator.compare_with_threshold(&test_id, &key, &current, threshold)
    })
    .await
    .unwrap_or_else(|e| VisualDiffResult::closed(format!("Comparison task failed: {e}")));
    let data = serde_json::to_value(&diff)?;
    let result = if diff.passed {
        StepExecutionResult::ok()
    } else {
        StepExecutionResult::fail(format!("visual regression: {}", diff.message))
    };
    Ok(result.with_data(data).with_screenshot(path))
}

async fn extract(step: &TestStep, ctx: &mut ExecutionContext<'_>) -> ComprobarResult<StepExecutionResult> {
    let target = selector(step)?;
    let extracted = if let Some(attribute) = step.meta.attribute.as_deref() {
        ctx.session
            .attribute(target, attribute)
            .await?
            .map_or(Value::Null, Value::String)
    } else if let Some(property) = step.meta.property.as_deref() {
        ctx.session.property(target, property).await?
    } else {
        Value::String(ctx.session.text_content(target).await?.trim().to_string())
    };

    let key = step
        .value
        .as_deref()
        .filter(|k| !k.is_empty())
        .unwrap_or(DEFAULT_EXTRACT_KEY)
        .to_string();
    ctx.set_value(key.clone(), extracted.clone());
    Ok(StepExecutionResult::ok().with_data(json!({ "key": key, "value": extracted })))
}

async fn assert(step: &TestStep, ctx: &mut ExecutionContext<'_>) -> ComprobarResult<StepExecutionResult> {
    let target = selector(step)?;
    let Some(kind) = step.assertion_type else {
        return Ok(StepExecutionResult::fail("assert step requires an assertionType"));
    };

    match kind {
        AssertionKind::Exists => {
            let count = ctx.session.count(target).await?;
            Ok(if count >= 1 {
                StepExecutionResult::ok().with_data(json!({ "count": count }))
            } else {
                StepExecutionResult::fail(format!(
                    "expected '{target}' to exist, found no matching element"
                ))
            })
        }
        AssertionKind::NotExists => {
            let count = ctx.session.count(target).await?;
            Ok(if count == 0 {
                StepExecutionResult::ok()
            } else {
                StepExecutionResult::fail(format!(
                    "expected '{target}' not to exist, found {count} matching element(s)"
                ))
            })
        }
        AssertionKind::Equals | AssertionKind::Contains => {
            // An empty expectation is valid: `equals ""` asserts blank text.
            let Some(expected) = step.assertion_expected.as_deref() else {
                return Err(ComprobarError::InputError {
                    message: format!("{} step requires assertionExpected", step.kind),
                });
            };
            let text = ctx.session.text_content(target).await?;
            let actual = text.trim();
            let data = json!({ "expected": expected, "actual": actual });
            let (holds, relation) = if kind == AssertionKind::Equals {
                (actual == expected.trim(), "equal")
            } else {
                (text.contains(expected), "contain")
            };
            Ok(if holds {
                StepExecutionResult::ok().with_data(data)
            } else {
                StepExecutionResult::fail(format!(
                    "expected '{target}' text to {relation} '{expected}', got '{actual}'"
                ))
                .with_data(data)
            })
        }
    }
}

async fn drag_and_drop(
    step: &TestStep,
    ctx: &mut ExecutionContext<'_>,
) -> ComprobarResult<StepExecutionResult> {
    let source = selector(step)?;
    let target = value(step)?;
    ctx.session.drag_and_drop(source, target).await?;
    Ok(StepExecutionResult::ok())
}

async fn file_upload(
    step: &TestStep,
    ctx: &mut ExecutionContext<'_>,
) -> ComprobarResult<StepExecutionResult> {
    let target = selector(step)?;
    let path = PathBuf::from(value(step)?);
    ctx.session.upload_file(target, &path).await?;
    Ok(StepExecutionResult::ok().with_data(json!({ "file": path })))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::driver::{MockElement, MockSession};
    use crate::model::StepMeta;
    use crate::visual_regression::{VisualRegressionConfig, VisualRegressionTester};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        session: MockSession,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                session: MockSession::new(),
            }
        }

        fn context(&mut self) -> ExecutionContext<'_> {
            let comparator = VisualRegressionTester::new(
                VisualRegressionConfig::default()
                    .with_baseline_dir(self.dir.path().join("baselines"))
                    .with_diff_dir(self.dir.path().join("diffs")),
            );
            let run_dir = self.dir.path().join("runs").join("r1");
            ExecutionContext::new(&mut self.session, run_dir, "t1", comparator)
        }
    }

    fn step(kind: StepKind) -> TestStep {
        TestStep::new(0, kind)
    }

    mod interaction_tests {
        use super::*;

        #[tokio::test]
        async fn test_click_without_selector_fails() {
            let mut fx = Fixture::new();
            let mut ctx = fx.context();
            let result = execute_step(&step(StepKind::Click), &mut ctx).await.unwrap();
            assert!(!result.success);
            assert!(result.error.unwrap().contains("requires a selector"));
        }

        #[tokio::test]
        async fn test_click_missing_element_is_reported() {
            let mut fx = Fixture::new();
            let mut ctx = fx.context();
            let result = execute_step(&step(StepKind::Click).with_selector("#go"), &mut ctx)
                .await
                .unwrap();
            assert!(!result.success);
            assert!(result.error.unwrap().contains("#go"));
        }

        #[tokio::test]
        async fn test_unexpected_fault_propagates() {
            let mut fx = Fixture::new();
            fx.session.add_element("#go", MockElement::default());
            fx.session.fail_on("#go");
            let mut ctx = fx.context();
            let outcome = execute_step(&step(StepKind::Click).with_selector("#go"), &mut ctx).await;
            assert!(matches!(outcome, Err(ComprobarError::PageError { .. })));
        }

        #[tokio::test]
        async fn test_extract_then_input_round_trip() {
            let mut fx = Fixture::new();
            fx.session.add_element("h1", MockElement::with_text("  hello "));
            fx.session.add_element("#msg", MockElement::default());
            let observer = fx.session.clone();
            let mut ctx = fx.context();

            let extract = step(StepKind::Extract).with_selector("h1").with_value("greeting");
            assert!(execute_step(&extract, &mut ctx).await.unwrap().success);

            let input = step(StepKind::Input)
                .with_selector("#msg")
                .with_value("{{greeting}} world");
            let result = execute_step(&input, &mut ctx).await.unwrap();
            assert!(result.success);
            assert_eq!(observer.text_of("#msg").as_deref(), Some("hello world"));
        }

        #[tokio::test]
        async fn test_input_requires_value() {
            let mut fx = Fixture::new();
            fx.session.add_element("#msg", MockElement::default());
            let mut ctx = fx.context();
            let result = execute_step(&step(StepKind::Input).with_selector("#msg"), &mut ctx)
                .await
                .unwrap();
            assert!(!result.success);
        }

        #[tokio::test]
        async fn test_extract_attribute_property_and_default_key() {
            let mut fx = Fixture::new();
            fx.session.add_element(
                "a.next",
                MockElement::with_text("Next")
                    .attr("href", "/page/2")
                    .prop("checked", json!(true)),
            );
            let mut ctx = fx.context();

            let by_attr = step(StepKind::Extract)
                .with_selector("a.next")
                .with_value("href")
                .with_meta(StepMeta {
                    attribute: Some("href".into()),
                    ..StepMeta::default()
                });
            execute_step(&by_attr, &mut ctx).await.unwrap();

            let by_prop = step(StepKind::Extract).with_selector("a.next").with_meta(StepMeta {
                property: Some("checked".into()),
                ..StepMeta::default()
            });
            execute_step(&by_prop, &mut ctx).await.unwrap();

            assert_eq!(ctx.extracted_values["href"], json!("/page/2"));
            assert_eq!(ctx.extracted_values[DEFAULT_EXTRACT_KEY], json!(true));
        }

        #[tokio::test]
        async fn test_scroll_variants() {
            let mut fx = Fixture::new();
            fx.session.add_element("#footer", MockElement::default());
            let observer = fx.session.clone();
            let mut ctx = fx.context();

            let into_view = step(StepKind::Scroll).with_selector("#footer");
            assert!(execute_step(&into_view, &mut ctx).await.unwrap().success);

            let by = step(StepKind::Scroll).with_value("0, 400");
            assert!(execute_step(&by, &mut ctx).await.unwrap().success);
            assert_eq!(observer.scroll_offset(), (0.0, 400.0));

            let bad = step(StepKind::Scroll).with_value("down");
            assert!(!execute_step(&bad, &mut ctx).await.unwrap().success);

            let bottom = step(StepKind::Scroll);
            assert!(execute_step(&bottom, &mut ctx).await.unwrap().success);
            assert!(observer.was_called("scroll_to_bottom"));
        }

        #[tokio::test]
        async fn test_wait_timeout_is_reported() {
            let mut fx = Fixture::new();
            let mut ctx = fx.context();
            let wait = step(StepKind::WaitForSelector)
                .with_selector("#late")
                .with_meta(StepMeta {
                    timeout: Some(1500),
                    ..StepMeta::default()
                });
            let result = execute_step(&wait, &mut ctx).await.unwrap();
            assert!(!result.success);
            assert!(result.error.unwrap().contains("1500ms"));
        }

        #[tokio::test]
        async fn test_drag_and_upload() {
            let mut fx = Fixture::new();
            fx.session.add_element("#card", MockElement::default());
            fx.session.add_element("#lane", MockElement::default());
            fx.session.add_element("input[type=file]", MockElement::default());
            let file = fx.dir.path().join("avatar.png");
            std::fs::write(&file, b"png").unwrap();
            let observer = fx.session.clone();
            let mut ctx = fx.context();

            let drag = step(StepKind::DragAndDrop).with_selector("#card").with_value("#lane");
            assert!(execute_step(&drag, &mut ctx).await.unwrap().success);

            let upload = step(StepKind::FileUpload)
                .with_selector("input[type=file]")
                .with_value(file.to_string_lossy());
            assert!(execute_step(&upload, &mut ctx).await.unwrap().success);
            assert_eq!(observer.uploads()[0].1, file);

            let no_target = step(StepKind::DragAndDrop).with_selector("#card");
            assert!(!execute_step(&no_target, &mut ctx).await.unwrap().success);
        }
    }

    mod assert_tests {
        use super::*;

        fn assertion(kind: AssertionKind, expected: Option<&str>) -> TestStep {
            step(StepKind::Assert)
                .with_selector("h1")
                .with_assertion(kind, expected)
        }

        #[tokio::test]
        async fn test_exists_and_not_exists() {
            let mut fx = Fixture::new();
            fx.session.add_element("h1", MockElement::with_text("Hi"));
            let mut ctx = fx.context();
            let exists = assertion(AssertionKind::Exists, None);
            let absent = assertion(AssertionKind::NotExists, None);
            assert!(execute_step(&exists, &mut ctx).await.unwrap().success);
            assert!(!execute_step(&absent, &mut ctx).await.unwrap().success);
        }

        #[tokio::test]
        async fn test_equals_trims_both_sides() {
            let mut fx = Fixture::new();
            fx.session.add_element("h1", MockElement::with_text("  Welcome back \n"));
            let mut ctx = fx.context();
            let ok = assertion(AssertionKind::Equals, Some(" Welcome back"));
            assert!(execute_step(&ok, &mut ctx).await.unwrap().success);

            let wrong = assertion(AssertionKind::Equals, Some("Welcome"));
            let result = execute_step(&wrong, &mut ctx).await.unwrap();
            assert!(!result.success);
            let message = result.error.unwrap();
            assert!(message.contains("'Welcome'"));
            assert!(message.contains("'Welcome back'"));
        }

        #[tokio::test]
        async fn test_contains() {
            let mut fx = Fixture::new();
            fx.session.add_element("h1", MockElement::with_text("Order #42 confirmed"));
            let mut ctx = fx.context();
            let ok = assertion(AssertionKind::Contains, Some("#42"));
            assert!(execute_step(&ok, &mut ctx).await.unwrap().success);
            let missing = assertion(AssertionKind::Contains, None);
            assert!(!execute_step(&missing, &mut ctx).await.unwrap().success);
        }

        #[tokio::test]
        async fn test_equals_empty_matches_blank_text() {
            let mut fx = Fixture::new();
            fx.session.add_element("h1", MockElement::with_text("  \n "));
            let mut ctx = fx.context();
            let blank = assertion(AssertionKind::Equals, Some(""));
            let result = execute_step(&blank, &mut ctx).await.unwrap();
            assert!(result.success, "{:?}", result.error);

            let missing = assertion(AssertionKind::Equals, None);
            let result = execute_step(&missing, &mut ctx).await.unwrap();
            assert!(result.error.unwrap().contains("requires assertionExpected"));
        }

        #[tokio::test]
        async fn test_missing_assertion_type() {
            let mut fx = Fixture::new();
            let mut ctx = fx.context();
            let result = execute_step(&step(StepKind::Assert).with_selector("h1"), &mut ctx)
                .await
                .unwrap();
            assert!(!result.success);
        }
    }

    mod screenshot_tests {
        use super::*;

        #[tokio::test]
        async fn test_named_screenshot_written() {
            let mut fx = Fixture::new();
            let mut ctx = fx.context();
            let shot = step(StepKind::Screenshot).with_meta(StepMeta {
                name: Some("landing".into()),
                ..StepMeta::default()
            });
            let result = execute_step(&shot, &mut ctx).await.unwrap();
            let path = result.screenshot_path.unwrap();
            assert!(path.ends_with("runs/r1/landing.png"));
            assert!(path.exists());
        }

        #[tokio::test]
        async fn test_element_screenshot_requires_element() {
            let mut fx = Fixture::new();
            let mut ctx = fx.context();
            let shot = step(StepKind::Screenshot).with_selector("#chart");
            assert!(!execute_step(&shot, &mut ctx).await.unwrap().success);
        }

        #[tokio::test]
        async fn test_visual_regression_bootstrap_then_fail() {
            let mut fx = Fixture::new();
            let observer = fx.session.clone();
            let mut ctx = fx.context();
            let shot = TestStep {
                id: Some("hero".into()),
                ..step(StepKind::Screenshot).with_meta(StepMeta {
                    name: Some("hero".into()),
                    visual_regression: true,
                    ..StepMeta::default()
                })
            };

            let first = execute_step(&shot, &mut ctx).await.unwrap();
            assert!(first.success);
            assert!(ctx.comparator.baseline_path("t1", "hero").exists());

            observer.set_screenshot(8, 8, [250, 250, 250, 255]);
            let second = execute_step(&shot, &mut ctx).await.unwrap();
            assert!(!second.success);
            let data = second.data.unwrap();
            assert_eq!(data["similarity"], json!(0.0));
            assert!(data["diffPath"].is_string());
        }
    }
}
