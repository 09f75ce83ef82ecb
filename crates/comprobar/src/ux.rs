//! UX signals: navigation timing and an in-page accessibility audit.
//!
//! Both collectors degrade instead of failing. A page that blocks script
//! evaluation still gets a run verdict; its metrics are simply empty and a
//! note says why.

use crate::driver::BrowserSession;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Navigation timing plus approximate LCP, in milliseconds from navigation start
const NAVIGATION_TIMING_SCRIPT: &str = r"(() => {
  const nav = performance.getEntriesByType('navigation')[0];
  const lcp = performance.getEntriesByType('largest-contentful-paint').pop();
  const paint = performance.getEntriesByName('first-contentful-paint')[0];
  if (!nav) { return null; }
  return {
    ttfb: nav.responseStart - nav.startTime,
    domContentLoaded: nav.domContentLoadedEventEnd - nav.startTime,
    load: nav.loadEventEnd > 0 ? nav.loadEventEnd - nav.startTime : null,
    lcp: lcp ? lcp.startTime : (paint ? paint.startTime : null),
  };
})()";

/// Static DOM checks returning `[{rule, target}]`
const ACCESSIBILITY_AUDIT_SCRIPT: &str = r"(() => {
  const out = [];
  const describe = (el) => {
    if (el.id) { return el.tagName.toLowerCase() + '#' + el.id; }
    const cls = (el.getAttribute('class') || '').trim().split(/\s+/).filter(Boolean)[0];
    return el.tagName.toLowerCase() + (cls ? '.' + cls : '');
  };
  const named = (el) => (el.textContent || '').trim() || el.getAttribute('aria-label')
    || el.getAttribute('aria-labelledby') || el.getAttribute('title');
  if (!document.title || !document.title.trim()) { out.push({rule: 'document-title', target: 'title'}); }
  if (!document.documentElement.getAttribute('lang')) { out.push({rule: 'html-lang', target: 'html'}); }
  document.querySelectorAll('img:not([alt])').forEach((el) => out.push({rule: 'image-alt', target: describe(el)}));
  document.querySelectorAll('input:not([type=hidden]):not([type=submit]):not([type=button]), select, textarea')
    .forEach((el) => {
      const labelled = (el.id && document.querySelector('label[for=\'' + el.id + '\']'))
        || el.closest('label') || el.getAttribute('aria-label') || el.getAttribute('aria-labelledby');
      if (!labelled) { out.push({rule: 'label', target: describe(el)}); }
    });
  document.querySelectorAll('button, [role=button]').forEach((el) => {
    if (!named(el)) { out.push({rule: 'button-name', target: describe(el)}); }
  });
  document.querySelectorAll('a[href]').forEach((el) => {
    if (!named(el)) { out.push({rule: 'link-name', target: describe(el)}); }
  });
  return out;
})()";

/// Measurements collected for a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UxMetrics {
    /// Time to first byte
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttfb_ms: Option<f64>,
    /// DOMContentLoaded end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dom_content_loaded_ms: Option<f64>,
    /// Load event end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_time_ms: Option<f64>,
    /// Largest contentful paint, or first contentful paint where LCP is unsupported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub largest_contentful_paint_ms: Option<f64>,
    /// Accessibility issues found
    #[serde(default)]
    pub accessibility_violations: usize,
    /// Free-form observations
    #[serde(default)]
    pub notes: Vec<String>,
}

impl UxMetrics {
    /// Fold a later measurement into this one. Later values overwrite
    /// earlier ones; notes accumulate.
    pub fn merge(&mut self, later: Self) {
        self.ttfb_ms = later.ttfb_ms.or(self.ttfb_ms);
        self.dom_content_loaded_ms = later.dom_content_loaded_ms.or(self.dom_content_loaded_ms);
        self.load_time_ms = later.load_time_ms.or(self.load_time_ms);
        self.largest_contentful_paint_ms = later
            .largest_contentful_paint_ms
            .or(self.largest_contentful_paint_ms);
        self.accessibility_violations = later.accessibility_violations;
        self.notes.extend(later.notes);
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimingSample {
    ttfb: Option<f64>,
    dom_content_loaded: Option<f64>,
    load: Option<f64>,
    lcp: Option<f64>,
}

/// Read navigation timing from the page
pub async fn collect_timing(session: &mut dyn BrowserSession) -> UxMetrics {
    let mut metrics = UxMetrics::default();
    match session.evaluate(NAVIGATION_TIMING_SCRIPT).await {
        Ok(serde_json::Value::Null) => metrics
            .notes
            .push("navigation timing unavailable".to_string()),
        Ok(value) => match serde_json::from_value::<TimingSample>(value) {
            Ok(sample) => {
                metrics.ttfb_ms = sample.ttfb;
                metrics.dom_content_loaded_ms = sample.dom_content_loaded;
                metrics.load_time_ms = sample.load;
                metrics.largest_contentful_paint_ms = sample.lcp;
            }
            Err(e) => metrics
                .notes
                .push(format!("unreadable navigation timing: {e}")),
        },
        Err(e) => {
            warn!(error = %e, "navigation timing collection failed");
            metrics
                .notes
                .push(format!("navigation timing failed: {e}"));
        }
    }
    metrics
}

/// Timing plus an accessibility audit, as persisted on the run
pub async fn collect_ux(
    session: &mut dyn BrowserSession,
    auditor: &dyn AccessibilityAuditor,
) -> UxMetrics {
    let mut metrics = collect_timing(session).await;
    let audit = auditor.audit(session).await;
    metrics.accessibility_violations = audit.violation_count();
    metrics.notes.extend(audit.issues.iter().map(|issue| {
        format!(
            "WCAG {} {}: {}",
            issue.wcag_code,
            issue.description,
            issue.context.as_deref().unwrap_or("page")
        )
    }));
    debug!(
        violations = metrics.accessibility_violations,
        score = audit.score,
        "ux metrics collected"
    );
    metrics
}

/// Severity level of an accessibility issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    /// Blocks use of the page
    Critical,
    /// Should be fixed
    Major,
    /// Nice to fix
    Minor,
    /// Informational
    Info,
}

/// An accessibility issue found during audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessibilityIssue {
    /// WCAG criterion code (e.g., "1.1.1")
    pub wcag_code: String,
    /// Issue description
    pub description: String,
    /// Severity level
    pub severity: Severity,
    /// Element where the issue was found
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl AccessibilityIssue {
    /// Create a new accessibility issue
    #[must_use]
    pub fn new(
        wcag_code: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            wcag_code: wcag_code.into(),
            description: description.into(),
            severity,
            context: None,
        }
    }

    /// Add context
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Issue for a rule id reported by the audit script
    fn from_rule(rule: &str) -> Self {
        let (code, description, severity) = match rule {
            "image-alt" => ("1.1.1", "Image has no alt text", Severity::Major),
            "label" => ("1.3.1", "Form control has no label", Severity::Major),
            "button-name" => ("4.1.2", "Button has no accessible name", Severity::Critical),
            "link-name" => ("2.4.4", "Link has no accessible name", Severity::Minor),
            "document-title" => ("2.4.2", "Page has no title", Severity::Minor),
            "html-lang" => ("3.1.1", "Page language is not set", Severity::Minor),
            other => return Self::new("", other.to_string(), Severity::Info),
        };
        Self::new(code, description, severity)
    }
}

/// Result of an accessibility audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessibilityAudit {
    /// Overall score (0-100)
    pub score: u8,
    /// Issues found
    pub issues: Vec<AccessibilityIssue>,
}

impl Default for AccessibilityAudit {
    fn default() -> Self {
        Self {
            score: 100,
            issues: Vec::new(),
        }
    }
}

impl AccessibilityAudit {
    /// Check if the audit passes
    #[must_use]
    pub fn passes(&self) -> bool {
        self.issues.is_empty() && self.score >= 80
    }

    /// Issues that count as violations (everything above informational)
    #[must_use]
    pub fn violation_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity != Severity::Info)
            .count()
    }

    /// Add an issue
    pub fn add_issue(&mut self, issue: AccessibilityIssue) {
        let deduction = match issue.severity {
            Severity::Critical => 30,
            Severity::Major => 20,
            Severity::Minor => 10,
            Severity::Info => 0,
        };
        self.score = self.score.saturating_sub(deduction);
        self.issues.push(issue);
    }
}

/// Audits the current page of a session
#[async_trait]
pub trait AccessibilityAuditor: Send + Sync {
    /// Run the audit. Failures yield an empty audit.
    async fn audit(&self, session: &mut dyn BrowserSession) -> AccessibilityAudit;
}

/// Static DOM audit evaluated inside the page
#[derive(Debug, Clone, Copy, Default)]
pub struct DomAccessibilityAuditor;

#[derive(Debug, Deserialize)]
struct RuleHit {
    rule: String,
    #[serde(default)]
    target: Option<String>,
}

#[async_trait]
impl AccessibilityAuditor for DomAccessibilityAuditor {
    async fn audit(&self, session: &mut dyn BrowserSession) -> AccessibilityAudit {
        let mut audit = AccessibilityAudit::default();
        let hits = match session.evaluate(ACCESSIBILITY_AUDIT_SCRIPT).await {
            Ok(serde_json::Value::Null) => return audit,
            Ok(value) => match serde_json::from_value::<Vec<RuleHit>>(value) {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(error = %e, "unreadable accessibility audit result");
                    return audit;
                }
            },
            Err(e) => {
                warn!(error = %e, "accessibility audit failed");
                return audit;
            }
        };
        for hit in hits {
            let issue = AccessibilityIssue::from_rule(&hit.rule);
            audit.add_issue(match hit.target {
                Some(target) => issue.with_context(target),
                None => issue,
            });
        }
        audit
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::driver::MockSession;
    use serde_json::json;

    mod merge_tests {
        use super::*;

        #[test]
        fn test_later_values_overwrite_and_notes_accumulate() {
            let mut first = UxMetrics {
                ttfb_ms: Some(100.0),
                load_time_ms: Some(900.0),
                accessibility_violations: 3,
                notes: vec!["initial".into()],
                ..UxMetrics::default()
            };
            first.merge(UxMetrics {
                ttfb_ms: Some(80.0),
                accessibility_violations: 1,
                notes: vec!["final".into()],
                ..UxMetrics::default()
            });
            assert_eq!(first.ttfb_ms, Some(80.0));
            assert_eq!(first.load_time_ms, Some(900.0));
            assert_eq!(first.accessibility_violations, 1);
            assert_eq!(first.notes, vec!["initial", "final"]);
        }

        #[test]
        fn test_serializes_camel_case() {
            let metrics = UxMetrics {
                ttfb_ms: Some(5.0),
                ..UxMetrics::default()
            };
            let value = serde_json::to_value(&metrics).unwrap();
            assert_eq!(value["ttfbMs"], json!(5.0));
            assert_eq!(value["accessibilityViolations"], json!(0));
            assert!(value.get("loadTimeMs").is_none());
        }
    }

    mod collector_tests {
        use super::*;

        #[tokio::test]
        async fn test_collect_timing() {
            let mut session = MockSession::new();
            session.set_eval_result(
                "getEntriesByType('navigation')",
                json!({"ttfb": 12.5, "domContentLoaded": 140.0, "load": null, "lcp": 210.0}),
            );
            let metrics = collect_timing(&mut session).await;
            assert_eq!(metrics.ttfb_ms, Some(12.5));
            assert_eq!(metrics.dom_content_loaded_ms, Some(140.0));
            assert_eq!(metrics.load_time_ms, None);
            assert_eq!(metrics.largest_contentful_paint_ms, Some(210.0));
            assert!(metrics.notes.is_empty());
        }

        #[tokio::test]
        async fn test_missing_timing_degrades_to_note() {
            let mut session = MockSession::new();
            let metrics = collect_timing(&mut session).await;
            assert_eq!(metrics.ttfb_ms, None);
            assert_eq!(metrics.notes.len(), 1);
        }

        #[tokio::test]
        async fn test_dom_audit_counts_issues() {
            let mut session = MockSession::new();
            session.set_eval_result(
                "image-alt",
                json!([
                    {"rule": "image-alt", "target": "img.hero"},
                    {"rule": "button-name", "target": "button#go"},
                    {"rule": "something-new"}
                ]),
            );
            let audit = DomAccessibilityAuditor.audit(&mut session).await;
            assert_eq!(audit.issues.len(), 3);
            assert_eq!(audit.violation_count(), 2);
            assert_eq!(audit.issues[0].wcag_code, "1.1.1");
            assert_eq!(audit.issues[0].context.as_deref(), Some("img.hero"));
            assert_eq!(audit.score, 50);
            assert!(!audit.passes());
        }

        #[tokio::test]
        async fn test_unreadable_audit_degrades_to_zero() {
            let mut session = MockSession::new();
            session.set_eval_result("image-alt", json!("not a list"));
            let audit = DomAccessibilityAuditor.audit(&mut session).await;
            assert_eq!(audit.violation_count(), 0);
            assert!(audit.passes());
        }

        #[tokio::test]
        async fn test_collect_ux_notes_each_issue() {
            let mut session = MockSession::new();
            session.set_eval_result("image-alt", json!([{"rule": "html-lang", "target": "html"}]));
            let metrics = collect_ux(&mut session, &DomAccessibilityAuditor).await;
            assert_eq!(metrics.accessibility_violations, 1);
            assert!(metrics.notes.iter().any(|n| n.starts_with("WCAG 3.1.1")));
        }
    }
}
