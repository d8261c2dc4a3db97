//! Compliance monitoring over the audit trail.
//!
//! Reports are computed from a trailing window of an actor's audit entries.
//! Rules are pluggable: anything implementing [`ComplianceRule`], including
//! plain closures, can be registered at runtime. A background scan checks
//! every actor seen in the window and records violations back into the
//! ledger as `compliance_violation` entries.
//!
//! Decision paths never wait on the monitor; it only takes short snapshots
//! of the ledger.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::IamResult;
use crate::audit::{AuditEntry, AuditEntryBuilder, AuditEventType, AuditLedger, ComplianceFlag};
use crate::config::{ComplianceConfig, span};
use crate::error::require_id;

/// A violation already recorded for an actor is not recorded again within
/// this window.
pub const VIOLATION_SUPPRESSION: Duration = Duration::minutes(60);

// =============================================================================
// Report Types
// =============================================================================

/// Overall compliance status of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceStatus {
    /// No violations.
    Compliant,
    /// Only low or medium severity violations.
    Warning,
    /// At least one high or critical violation.
    Violation,
}

/// Severity of a single violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Low,
    /// Needs review.
    Medium,
    /// Needs prompt action.
    High,
    /// Needs immediate action.
    Critical,
}

impl Severity {
    /// Score deduction for one violation of this severity.
    #[must_use]
    pub fn penalty(&self) -> u8 {
        match self {
            Self::Low => 5,
            Self::Medium => 15,
            Self::High => 30,
            Self::Critical => 50,
        }
    }

    /// Wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rule finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceViolation {
    /// Rule name (e.g. `excessive_emergency_access`).
    pub name: String,
    /// Severity.
    pub severity: Severity,
    /// Human-readable description.
    pub description: String,
    /// Observed count.
    pub observed: usize,
    /// Tolerated count.
    pub threshold: usize,
    /// Suggested remediation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl ComplianceViolation {
    /// Creates a violation.
    pub fn new(
        name: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
        observed: usize,
        threshold: usize,
    ) -> Self {
        Self {
            name: name.into(),
            severity,
            description: description.into(),
            observed,
            threshold,
            recommendation: None,
        }
    }

    /// Attaches a remediation hint.
    #[must_use]
    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }
}

/// Compliance report for one actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceReport {
    /// Subject of the report.
    pub actor_id: String,
    /// Overall status.
    pub status: ComplianceStatus,
    /// Findings.
    pub violations: Vec<ComplianceViolation>,
    /// Remediation hints, one per finding that has one.
    pub recommendations: Vec<String>,
    /// 0-100, 100 meaning no findings.
    pub score: u8,
    /// Window start.
    #[serde(with = "time::serde::rfc3339")]
    pub window_start: OffsetDateTime,
    /// Window end.
    #[serde(with = "time::serde::rfc3339")]
    pub window_end: OffsetDateTime,
    /// When the report was computed.
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
}

impl ComplianceReport {
    fn from_violations(
        actor_id: &str,
        violations: Vec<ComplianceViolation>,
        window_start: OffsetDateTime,
        window_end: OffsetDateTime,
    ) -> Self {
        let status = match violations.iter().map(|v| v.severity).max() {
            None => ComplianceStatus::Compliant,
            Some(Severity::Low | Severity::Medium) => ComplianceStatus::Warning,
            Some(Severity::High | Severity::Critical) => ComplianceStatus::Violation,
        };
        let penalty: u32 = violations.iter().map(|v| u32::from(v.severity.penalty())).sum();
        let score = 100u32.saturating_sub(penalty) as u8;
        let recommendations = violations
            .iter()
            .filter_map(|v| v.recommendation.clone())
            .collect();

        Self {
            actor_id: actor_id.to_string(),
            status,
            violations,
            recommendations,
            score,
            window_start,
            window_end,
            generated_at: OffsetDateTime::now_utc(),
        }
    }

    /// Returns `true` if nothing was found.
    #[must_use]
    pub fn is_compliant(&self) -> bool {
        self.status == ComplianceStatus::Compliant
    }
}

// =============================================================================
// Rules
// =============================================================================

/// One actor's audit entries over a time window.
#[derive(Debug, Clone, Copy)]
pub struct AuditWindow<'a> {
    /// Subject actor.
    pub actor_id: &'a str,
    /// Inclusive start.
    pub start: OffsetDateTime,
    /// Inclusive end.
    pub end: OffsetDateTime,
    entries: &'a [Arc<AuditEntry>],
}

impl<'a> AuditWindow<'a> {
    /// Creates a window over entries already filtered to the actor.
    pub fn new(
        actor_id: &'a str,
        start: OffsetDateTime,
        end: OffsetDateTime,
        entries: &'a [Arc<AuditEntry>],
    ) -> Self {
        Self {
            actor_id,
            start,
            end,
            entries,
        }
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &'a AuditEntry> + 'a {
        self.entries.iter().map(|e| e.as_ref())
    }

    /// Number of entries of `event_type`.
    #[must_use]
    pub fn count(&self, event_type: AuditEventType) -> usize {
        self.entries().filter(|e| e.event_type == event_type).count()
    }

    /// Failed attempts to reach a resource.
    #[must_use]
    pub fn failed_attempts(&self) -> usize {
        self.entries()
            .filter(|e| !e.success && e.event_type.is_access_attempt())
            .count()
    }

    /// Total entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A compliance check over an audit window.
pub trait ComplianceRule: Send + Sync {
    /// Returns a violation if the window breaks the rule.
    fn evaluate(&self, window: &AuditWindow<'_>) -> Option<ComplianceViolation>;
}

impl<F> ComplianceRule for F
where
    F: Fn(&AuditWindow<'_>) -> Option<ComplianceViolation> + Send + Sync,
{
    fn evaluate(&self, window: &AuditWindow<'_>) -> Option<ComplianceViolation> {
        self(window)
    }
}

/// Flags actors that use break-glass access too often.
#[derive(Debug, Clone, Copy)]
pub struct ExcessiveEmergencyAccess {
    /// Tolerated emergency events per window.
    pub max_events: usize,
}

impl ComplianceRule for ExcessiveEmergencyAccess {
    fn evaluate(&self, window: &AuditWindow<'_>) -> Option<ComplianceViolation> {
        let observed = window.count(AuditEventType::EmergencyAccess);
        (observed > self.max_events).then(|| {
            ComplianceViolation::new(
                "excessive_emergency_access",
                Severity::Medium,
                format!(
                    "{observed} emergency access events in the review window (limit {})",
                    self.max_events
                ),
                observed,
                self.max_events,
            )
            .with_recommendation(
                "Review emergency access justifications and confirm standing permissions match the actor's duties",
            )
        })
    }
}

/// Flags actors with many failed access attempts.
#[derive(Debug, Clone, Copy)]
pub struct ExcessiveFailedAccess {
    /// Tolerated failed attempts per window.
    pub max_attempts: usize,
}

impl ComplianceRule for ExcessiveFailedAccess {
    fn evaluate(&self, window: &AuditWindow<'_>) -> Option<ComplianceViolation> {
        let observed = window.failed_attempts();
        (observed > self.max_attempts).then(|| {
            ComplianceViolation::new(
                "excessive_failed_access",
                Severity::High,
                format!(
                    "{observed} failed access attempts in the review window (limit {})",
                    self.max_attempts
                ),
                observed,
                self.max_attempts,
            )
            .with_recommendation(
                "Investigate the failed attempts and consider suspending the actor pending review",
            )
        })
    }
}

// =============================================================================
// Compliance Monitor
// =============================================================================

/// Computes compliance reports and runs the background scan.
pub struct ComplianceMonitor {
    ledger: Arc<AuditLedger>,
    rules: RwLock<Vec<Arc<dyn ComplianceRule>>>,
    lookback: Duration,
    scan_interval: std::time::Duration,
    reported: DashMap<(String, String), OffsetDateTime>,
}

impl fmt::Debug for ComplianceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComplianceMonitor")
            .field("rules", &self.rules.read().len())
            .field("lookback", &self.lookback)
            .field("scan_interval", &self.scan_interval)
            .finish()
    }
}

impl ComplianceMonitor {
    /// Creates a monitor with the built-in rules.
    pub fn new(ledger: Arc<AuditLedger>, config: &ComplianceConfig) -> Self {
        let rules: Vec<Arc<dyn ComplianceRule>> = vec![
            Arc::new(ExcessiveEmergencyAccess {
                max_events: config.max_emergency_events,
            }),
            Arc::new(ExcessiveFailedAccess {
                max_attempts: config.max_failed_attempts,
            }),
        ];
        Self {
            ledger,
            rules: RwLock::new(rules),
            lookback: span(config.lookback_window),
            scan_interval: config.scan_interval,
            reported: DashMap::new(),
        }
    }

    /// Adds a rule.
    pub fn register_rule(&self, rule: impl ComplianceRule + 'static) {
        self.rules.write().push(Arc::new(rule));
    }

    /// Number of registered rules.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }

    /// Reports on `actor_id` over the trailing window ending now.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` if `actor_id` is empty.
    pub fn check_compliance(&self, actor_id: &str) -> IamResult<ComplianceReport> {
        self.check_compliance_at(actor_id, OffsetDateTime::now_utc())
    }

    /// Reports on `actor_id` over the trailing window ending at `at`.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` if `actor_id` is empty.
    pub fn check_compliance_at(
        &self,
        actor_id: &str,
        at: OffsetDateTime,
    ) -> IamResult<ComplianceReport> {
        require_id("actor_id", actor_id)?;
        let start = at - self.lookback;
        let entries: Vec<Arc<AuditEntry>> = self
            .ledger
            .snapshot(Some(start), Some(at))
            .into_iter()
            .filter(|e| e.actor_id == actor_id)
            .collect();
        Ok(self.report(actor_id, start, at, &entries))
    }

    fn report(
        &self,
        actor_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
        entries: &[Arc<AuditEntry>],
    ) -> ComplianceReport {
        let window = AuditWindow::new(actor_id, start, end, entries);
        let rules = self.rules.read().clone();
        let violations = rules.iter().filter_map(|r| r.evaluate(&window)).collect();
        ComplianceReport::from_violations(actor_id, violations, start, end)
    }

    /// Checks every actor active in the window ending at `at`.
    ///
    /// Violations not reported within [`VIOLATION_SUPPRESSION`] are written
    /// to the ledger. Returns the non-compliant reports.
    pub fn scan_at(&self, at: OffsetDateTime) -> Vec<ComplianceReport> {
        let start = at - self.lookback;
        let snapshot = self.ledger.snapshot(Some(start), Some(at));

        let mut by_actor: BTreeMap<&str, Vec<Arc<AuditEntry>>> = BTreeMap::new();
        for entry in &snapshot {
            by_actor
                .entry(entry.actor_id.as_str())
                .or_default()
                .push(entry.clone());
        }

        let mut flagged = Vec::new();
        for (actor_id, entries) in &by_actor {
            let report = self.report(actor_id, start, at, entries);
            if report.is_compliant() {
                continue;
            }
            for violation in &report.violations {
                self.record_violation(actor_id, violation, at);
            }
            flagged.push(report);
        }

        debug!(
            actors = by_actor.len(),
            flagged = flagged.len(),
            "Compliance scan finished"
        );
        flagged
    }

    /// Checks every actor active in the window ending now.
    pub fn scan(&self) -> Vec<ComplianceReport> {
        self.scan_at(OffsetDateTime::now_utc())
    }

    fn record_violation(&self, actor_id: &str, violation: &ComplianceViolation, at: OffsetDateTime) {
        let key = (actor_id.to_string(), violation.name.clone());
        if let Some(last) = self.reported.get(&key)
            && at - *last < VIOLATION_SUPPRESSION
        {
            return;
        }
        self.reported.insert(key, at);

        warn!(
            actor_id = %actor_id,
            rule = %violation.name,
            severity = %violation.severity,
            observed = violation.observed,
            threshold = violation.threshold,
            "Compliance violation"
        );
        self.ledger.record(
            AuditEntryBuilder::new(AuditEventType::ComplianceViolation, actor_id)
                .success(false)
                .detail("rule", violation.name.clone())
                .detail("severity", violation.severity.as_str())
                .detail("description", violation.description.clone())
                .detail("observed", violation.observed as u64)
                .detail("threshold", violation.threshold as u64)
                .flag(ComplianceFlag::PolicyViolation),
        );
    }

    /// Scans at the configured interval until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            interval_secs = self.scan_interval.as_secs(),
            "Compliance monitor started"
        );
        let mut ticker = tokio::time::interval(self.scan_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Compliance monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let flagged = self.scan();
                    if !flagged.is_empty() {
                        info!(flagged = flagged.len(), "Compliance scan flagged actors");
                    }
                }
            }
        }
    }
}
