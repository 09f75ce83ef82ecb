//! Subcommand execution

use crate::commands::{
    BaselineArgs, BaselineKey, CompareArgs, DevicesArgs, DiffArgs, OutputFormat, RunArgs,
    ValidateArgs,
};
use crate::error::{CliError, CliResult};
use comprobar::{compare_objects, DeviceProfile, EngineConfig, TestDefinition, VisualRegressionTester};
use serde::Serialize;
use serde_json::Value;
use std::fmt::Write as _;
use std::path::Path;
use tracing::{debug, info};

/// Engine configuration from `--config` (or defaults) plus environment
/// overrides. Subcommand flags are applied on top by the caller.
pub fn load_engine_config(path: Option<&Path>) -> CliResult<EngineConfig> {
    let config = match path {
        Some(path) => {
            debug!(path = %path.display(), "loading engine config");
            EngineConfig::load(path)?
        }
        None => EngineConfig::default().with_env(),
    };
    Ok(config)
}

/// Serialize `value` in a machine format, or use `text` for [`OutputFormat::Text`]
pub fn render<T: Serialize>(
    value: &T,
    format: OutputFormat,
    text: impl FnOnce(&T) -> String,
) -> CliResult<String> {
    Ok(match format {
        OutputFormat::Text => text(value),
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml_ng::to_string(value)?,
    })
}

/// `comprobador validate`
pub fn validate(args: &ValidateArgs) -> CliResult<String> {
    let mut out = String::new();
    let mut invalid = 0usize;
    for path in &args.definitions {
        let checked = TestDefinition::load(path).and_then(|d| {
            let steps = d.ordered_steps()?;
            Ok((d, steps.len()))
        });
        match checked {
            Ok((definition, count)) => {
                let _ = writeln!(
                    out,
                    "OK {}: '{}' with {count} steps against {}",
                    path.display(),
                    definition.id,
                    definition.target_url
                );
            }
            Err(e) => {
                invalid += 1;
                let _ = writeln!(out, "INVALID {}: {e}", path.display());
            }
        }
    }
    if invalid > 0 {
        return Err(CliError::check_failed(format!(
            "{invalid} of {} definitions invalid\n{out}",
            args.definitions.len()
        )));
    }
    Ok(out)
}

fn comparator(config: &EngineConfig, key: &BaselineKey, diffs: Option<&Path>) -> VisualRegressionTester {
    let mut visual = config.visual_config();
    if let Some(dir) = &key.baselines {
        visual = visual.with_baseline_dir(dir);
    }
    if let Some(dir) = diffs {
        visual = visual.with_diff_dir(dir);
    }
    VisualRegressionTester::new(visual)
}

/// `comprobador compare`
pub fn compare(config: &EngineConfig, args: &CompareArgs) -> CliResult<String> {
    if !args.screenshot.is_file() {
        return Err(CliError::invalid_argument(format!(
            "screenshot not found: {}",
            args.screenshot.display()
        )));
    }
    let threshold = args.threshold.unwrap_or(config.visual_threshold);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(CliError::invalid_argument(format!(
            "threshold must be within 0.0-1.0, got {threshold}"
        )));
    }

    let tester = comparator(config, &args.key, args.diffs.as_deref());
    let result =
        tester.compare_with_threshold(&args.key.test, &args.key.step, &args.screenshot, threshold);
    info!(
        test = %args.key.test,
        step = %args.key.step,
        similarity = result.similarity,
        passed = result.passed,
        "screenshot compared"
    );

    let rendered = render(&result, args.format, |r| {
        let mut out = format!("{}: {}\n", if r.passed { "PASS" } else { "FAIL" }, r.message);
        if let Some(path) = &r.diff_path {
            let _ = writeln!(out, "diff image: {}", path.display());
        }
        out
    })?;
    if result.passed {
        Ok(rendered)
    } else {
        Err(CliError::check_failed(rendered))
    }
}

/// `comprobador baseline`
pub fn baseline(config: &EngineConfig, args: &BaselineArgs) -> CliResult<String> {
    if !args.screenshot.is_file() {
        return Err(CliError::invalid_argument(format!(
            "screenshot not found: {}",
            args.screenshot.display()
        )));
    }
    image::image_dimensions(&args.screenshot).map_err(|e| {
        CliError::invalid_argument(format!("{} is not a readable image: {e}", args.screenshot.display()))
    })?;
    let path = comparator(config, &args.key, None).save_baseline(
        &args.key.test,
        &args.key.step,
        &args.screenshot,
    )?;
    Ok(format!("Baseline stored at {}\n", path.display()))
}

fn read_json(path: &Path) -> CliResult<Value> {
    let source = std::fs::read_to_string(path)?;
    serde_json::from_str(&source).map_err(|e| {
        CliError::invalid_argument(format!("{} is not valid JSON: {e}", path.display()))
    })
}

/// `comprobador diff`
pub fn diff(args: &DiffArgs) -> CliResult<String> {
    let expected = read_json(&args.expected)?;
    let actual = read_json(&args.actual)?;
    let result = compare_objects(&expected, &actual, &args.root);

    let rendered = render(&result, args.format, |r| {
        let mut out = format!("{}: {}\n", if r.passed { "MATCH" } else { "MISMATCH" }, r.message);
        for d in &r.differences {
            let _ = writeln!(
                out,
                "  {}: expected {}, actual {}",
                if d.path.is_empty() { "<root>" } else { d.path.as_str() },
                slot(d.expected.as_ref()),
                slot(d.actual.as_ref())
            );
        }
        out
    })?;
    if result.passed {
        Ok(rendered)
    } else {
        Err(CliError::check_failed(rendered))
    }
}

fn slot(value: Option<&Value>) -> String {
    value.map_or_else(|| "<absent>".to_string(), Value::to_string)
}

/// `comprobador devices`
pub fn devices(args: &DevicesArgs) -> CliResult<String> {
    render(&DeviceProfile::presets(), args.format, |profiles| {
        let mut out = String::new();
        for p in profiles {
            let _ = writeln!(
                out,
                "{:<8} {:>4}x{:<4} scale {:<5} {}",
                p.name,
                p.viewport.width,
                p.viewport.height,
                p.device_scale_factor,
                if p.is_mobile { "mobile, touch" } else { "desktop" }
            );
        }
        out
    })
}

/// Apply `run` flags over the loaded configuration
pub fn run_config(mut config: EngineConfig, args: &RunArgs) -> EngineConfig {
    if let Some(dir) = &args.artifacts {
        config = config.with_artifacts_dir(dir);
    }
    if let Some(ms) = args.watchdog_ms {
        config.watchdog_ms = ms;
    }
    if args.headed {
        config.browser.headless = false;
    }
    if let Some(path) = &args.chromium {
        config.browser.chromium_path = Some(path.clone());
    }
    config
}

/// `comprobador run`: execute one definition in Chromium and render the
/// run report
#[cfg(feature = "browser")]
pub async fn run(config: EngineConfig, args: &RunArgs) -> CliResult<String> {
    use comprobar::{ChromiumLauncher, MemoryStore, RunOrchestrator};
    use std::sync::Arc;

    let definition = TestDefinition::load(&args.definition)?;
    let test_id = definition.id.clone();
    let store = Arc::new(MemoryStore::new());
    store.insert_definition(definition);
    let run_id = store.create_run(&test_id, &args.device);

    let launcher = Arc::new(ChromiumLauncher::from_config(&config));
    let orchestrator = RunOrchestrator::new(store.clone(), launcher, config);
    let outcome = orchestrator.run_test(&run_id).await;

    let report = store.report(&run_id)?;
    let rendered = render(&report, args.format, |r| {
        let mut out = format!("Run {} of '{}': {}\n", r.run.id, r.run.test_id, r.run.status);
        for entry in &r.logs {
            let _ = writeln!(out, "  [{:?}] {}", entry.level, entry.message);
        }
        for attachment in &r.attachments {
            let _ = writeln!(out, "  {:?}: {}", attachment.kind, attachment.path.display());
        }
        out
    })?;
    let rendered = match &args.report {
        Some(path) => {
            std::fs::write(path, &rendered)?;
            format!("Report written to {}\n", path.display())
        }
        None => rendered,
    };

    match outcome {
        Ok(()) => Ok(rendered),
        Err(e) => Err(CliError::check_failed(format!("{rendered}{e}"))),
    }
}

/// `comprobador run` without browser support
#[cfg(not(feature = "browser"))]
#[allow(clippy::unused_async)]
pub async fn run(_config: EngineConfig, _args: &RunArgs) -> CliResult<String> {
    Err(CliError::feature_disabled("run", "browser"))
}
