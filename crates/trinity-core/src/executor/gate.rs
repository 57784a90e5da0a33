//! Verification Gate - Absolute Verification before any artifact lands.
//!
//! Every sub-agent artifact passes through here before it may enter workflow
//! state. For code artifacts that means the relevant test subset plus the
//! constitutional scanner. A rejection is a typed value; the only bypass is
//! an explicit HITL FORCE decision, recorded as a UserApproval with full
//! audit by the executor.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use trinity_models::error::Result;
use trinity_models::{Artifact, ArtifactKind, TrinityError};

use crate::foundation::{ConstitutionScanner, TestStatus, TestSuiteRunner};

/// Typed gate verdict.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Verified,
    Rejected { reasons: Vec<String> },
}

#[async_trait]
pub trait VerificationGate: Send + Sync {
    async fn verify(&self, artifact: &Artifact) -> Result<Verdict>;
}

/// Article II gate: 100% relevant tests green, zero violations.
pub struct AbsoluteVerification {
    tests: Arc<dyn TestSuiteRunner>,
    scanner: Arc<dyn ConstitutionScanner>,
    test_timeout: Duration,
}

impl AbsoluteVerification {
    pub fn new(
        tests: Arc<dyn TestSuiteRunner>,
        scanner: Arc<dyn ConstitutionScanner>,
        test_timeout: Duration,
    ) -> Self {
        Self {
            tests,
            scanner,
            test_timeout,
        }
    }
}

#[async_trait]
impl VerificationGate for AbsoluteVerification {
    async fn verify(&self, artifact: &Artifact) -> Result<Verdict> {
        let mut reasons = Vec::new();

        if artifact.partial {
            reasons.push("partial artifact".to_string());
        }

        // Documents and reviews carry no executable surface; tests and the
        // scanner gate everything that does.
        let needs_tests = matches!(
            artifact.kind,
            ArtifactKind::Code | ArtifactKind::Test | ArtifactKind::Merge
        );
        if needs_tests && reasons.is_empty() {
            match self
                .tests
                .run(self.test_timeout)
                .await
                .map_err(|e| TrinityError::TransientIo(e.to_string()))?
            {
                TestStatus::Passed => {}
                TestStatus::Failed => reasons.push("test suite failed".to_string()),
                TestStatus::Timeout => reasons.push("test suite timed out".to_string()),
            }
            let violations = self
                .scanner
                .scan()
                .await
                .map_err(|e| TrinityError::TransientIo(e.to_string()))?;
            if !violations.is_empty() {
                reasons.push(format!("{} constitutional violations", violations.len()));
            }
        }

        if reasons.is_empty() {
            info!(artifact_id = %artifact.id, task_id = %artifact.task_id, "Artifact verified");
            Ok(Verdict::Verified)
        } else {
            info!(artifact_id = %artifact.id, ?reasons, "Artifact rejected");
            Ok(Verdict::Rejected { reasons })
        }
    }
}

/// Gate that accepts everything except partial artifacts. For wiring tests
/// and for non-code deployments where the repository gate is external.
pub struct AcceptAll;

#[async_trait]
impl VerificationGate for AcceptAll {
    async fn verify(&self, artifact: &Artifact) -> Result<Verdict> {
        if artifact.partial {
            return Ok(Verdict::Rejected {
                reasons: vec!["partial artifact".into()],
            });
        }
        Ok(Verdict::Verified)
    }
}
