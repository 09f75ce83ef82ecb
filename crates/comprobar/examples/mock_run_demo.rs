//! Mock Run Demo
//!
//! Runs a small test definition end to end against the scriptable mock
//! session, then prints the persisted run report:
//! - YAML test definitions
//! - Value extraction and `{{key}}` substitution
//! - Evidence capture on the first failing step
//!
//! Run with: cargo run --example mock_run_demo -p comprobar

use comprobar::{
    EngineConfig, MemoryStore, MockElement, MockLauncher, MockSession, RunOrchestrator,
    TestDefinition,
};
use std::sync::Arc;

const DEFINITION: &str = r##"
id: signup
name: Newsletter signup
targetUrl: https://example.test/signup
steps:
  - orderIndex: 0
    type: extract
    selector: "#promo-code"
    value: code
  - orderIndex: 1
    type: input
    selector: "#email"
    value: "reader+{{code}}@example.test"
  - orderIndex: 2
    type: click
    selector: "button[type=submit]"
  - orderIndex: 3
    type: assert
    selector: ".toast"
    assertionType: contains
    assertionExpected: Thanks
"##;

#[tokio::main]
async fn main() -> comprobar::ComprobarResult<()> {
    println!("=== Mock Run Demo ===\n");

    let definition = TestDefinition::from_yaml(DEFINITION)?;
    println!("Loaded '{}' with {} steps", definition.name, definition.steps.len());

    let session = MockSession::new();
    session.add_element("#promo-code", MockElement::with_text(" SPRING "));
    session.add_element("#email", MockElement::default());
    session.add_element("button[type=submit]", MockElement::default());
    // No .toast element: the last step fails and the run collects evidence

    let store = Arc::new(MemoryStore::new());
    store.insert_definition(definition);
    let run_id = store.create_run("signup", "mobile");

    let config =
        EngineConfig::default().with_artifacts_dir(std::env::temp_dir().join("comprobar-demo"));
    let orchestrator =
        RunOrchestrator::new(store.clone(), Arc::new(MockLauncher::new(session.clone())), config);

    if let Err(e) = orchestrator.run_test(&run_id).await {
        println!("Run failed: {e}");
    }
    println!("Typed email: {:?}\n", session.text_of("#email"));

    let report = store.report(&run_id)?;
    println!("Status: {}", report.run.status);
    for entry in &report.logs {
        println!("  [{:?}] {:?} {}", entry.level, entry.step_index, entry.message);
    }
    for attachment in &report.attachments {
        println!("  {:?} -> {}", attachment.kind, attachment.path.display());
    }

    println!("\n=== Demo Complete ===");
    Ok(())
}
