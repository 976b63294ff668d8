//! Integration harness.
//!
//! Runs a fixed, linear sequence of stages against an identity service and
//! its store, recording one [`StageResult`] per stage:
//!
//! ```text
//!   connect → sign_up → login → auth_event → current_user → sync_probe → verify → logout
//! ```
//!
//! A failed stage never aborts the run. Stages that depend on it are
//! recorded as skipped, and `logout` runs whenever a session is open so
//! cleanup failures are visible without masking the original outcome.

use crate::identity::{AuthEvent, IdentityService};
use crate::probe::{ProbeConfig, ProbeOutcome, SyncProbe};
use crate::store::{node_at, GraphStore};
use relayprobe_types::{NodePath, TestRecord};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Default bound on waiting for the login event.
pub const DEFAULT_AUTH_EVENT_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Path the test record is written to.
pub const DEFAULT_PATH: &str = "test/data";

/// Harness stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// The store reports a live connection.
    Connect,
    /// Create the test account.
    SignUp,
    /// Log in to the test account.
    Login,
    /// The login event was observed.
    AuthEvent,
    /// The current user matches the test account.
    CurrentUser,
    /// Write-then-read of the test record.
    SyncProbe,
    /// The read result equals the written record.
    Verify,
    /// End the session.
    Logout,
}

impl Stage {
    /// Every stage, in execution order.
    pub const ALL: [Stage; 8] = [
        Stage::Connect,
        Stage::SignUp,
        Stage::Login,
        Stage::AuthEvent,
        Stage::CurrentUser,
        Stage::SyncProbe,
        Stage::Verify,
        Stage::Logout,
    ];

    /// Stage name as it appears in reports.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Connect => "connect",
            Stage::SignUp => "sign_up",
            Stage::Login => "login",
            Stage::AuthEvent => "auth_event",
            Stage::CurrentUser => "current_user",
            Stage::SyncProbe => "sync_probe",
            Stage::Verify => "verify",
            Stage::Logout => "logout",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage completed.
    Passed,
    /// Stage ran and failed.
    Failed,
    /// Stage did not run.
    Skipped,
}

/// Result record for one stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    /// Which stage.
    pub stage: Stage,
    /// How it ended.
    pub status: StageStatus,
    /// Human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time spent in the stage.
    pub elapsed_ms: u64,
}

impl StageResult {
    fn passed(stage: Stage, message: impl Into<String>, started: Instant) -> Self {
        Self {
            stage,
            status: StageStatus::Passed,
            message: Some(message.into()),
            error: None,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn failed(stage: Stage, error: impl Into<String>, started: Instant) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            message: None,
            error: Some(error.into()),
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn skipped(stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            message: Some(reason.into()),
            error: None,
            elapsed_ms: 0,
        }
    }
}

/// Harness configuration.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Test account username.
    pub username: String,
    /// Test account password.
    pub password: String,
    /// Message carried by the test record.
    pub message: String,
    /// Fixed record timestamp; the current time when `None`.
    pub timestamp: Option<i64>,
    /// Slash-separated path the record is written to.
    pub path: String,
    /// Sync probe settings.
    pub probe: ProbeConfig,
    /// Bound on waiting for the login event.
    pub auth_event_timeout: Duration,
}

impl HarnessConfig {
    /// Configuration for the given credentials with default settings.
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            message: TestRecord::DEFAULT_MESSAGE.to_string(),
            timestamp: None,
            path: DEFAULT_PATH.to_string(),
            probe: ProbeConfig::default(),
            auth_event_timeout: DEFAULT_AUTH_EVENT_TIMEOUT,
        }
    }

    /// Set the probe configuration.
    pub fn with_probe(mut self, probe: ProbeConfig) -> Self {
        self.probe = probe;
        self
    }

    /// Pin the record timestamp.
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the record path.
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    fn record(&self) -> TestRecord {
        match self.timestamp {
            Some(ts) => TestRecord::with_timestamp(&self.message, ts, &self.username),
            None => TestRecord::new(&self.message, &self.username),
        }
    }
}

/// Everything a harness run produced.
#[derive(Debug, Clone, Serialize)]
pub struct HarnessReport {
    /// One entry per stage, in execution order.
    pub stages: Vec<StageResult>,
    /// The record that was written, if the probe ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<TestRecord>,
    /// The read result, if the probe succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_result: Option<Value>,
    /// Overall verdict.
    pub success: bool,
}

impl HarnessReport {
    /// True when the record was verified and nothing before logout failed.
    ///
    /// A failed logout is reported but does not change the verdict.
    pub fn success(&self) -> bool {
        self.success
    }

    /// Result for a stage.
    pub fn stage(&self, stage: Stage) -> Option<&StageResult> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    /// Status of a stage.
    pub fn status(&self, stage: Stage) -> Option<StageStatus> {
        self.stage(stage).map(|r| r.status)
    }

    fn verdict(stages: &[StageResult]) -> bool {
        let verified = stages
            .iter()
            .any(|r| r.stage == Stage::Verify && r.status == StageStatus::Passed);
        let clean = stages
            .iter()
            .filter(|r| r.stage != Stage::Logout)
            .all(|r| r.status != StageStatus::Failed);
        verified && clean
    }
}

impl fmt::Display for HarnessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.stages {
            let tag = match result.status {
                StageStatus::Passed => "PASS",
                StageStatus::Failed => "FAIL",
                StageStatus::Skipped => "SKIP",
            };
            write!(f, "[{}] {:<13} {:>6} ms", tag, result.stage, result.elapsed_ms)?;
            if let Some(message) = &result.message {
                write!(f, "  {}", message)?;
            }
            if let Some(error) = &result.error {
                write!(f, "  error: {}", error)?;
            }
            writeln!(f)?;
        }
        write!(f, "{}", if self.success { "PASSED" } else { "FAILED" })
    }
}

/// Stage runner over an identity service.
pub struct Harness<I: IdentityService> {
    identity: I,
    config: HarnessConfig,
}

impl<I: IdentityService> Harness<I> {
    /// Create a harness.
    pub fn new(identity: I, config: HarnessConfig) -> Self {
        Self { identity, config }
    }

    /// The identity service under test.
    pub fn identity(&self) -> &I {
        &self.identity
    }

    /// The harness configuration.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run every stage and collect the results.
    pub async fn run(&self) -> HarnessReport {
        let mut run = Run::default();

        // Subscribe before sign-up so its login event is not missed.
        let mut events = self.identity.subscribe();

        if self.connect(&mut run) {
            self.sign_up(&mut run).await;
            if self.login(&mut run).await {
                self.await_login_event(&mut run, &mut events).await;
                self.check_current_user(&mut run);
                match self.probe(&mut run).await {
                    Some(outcome) => self.verify(&mut run, outcome),
                    None => run.skip(Stage::Verify, "sync probe failed"),
                }
            } else {
                for stage in [Stage::AuthEvent, Stage::CurrentUser, Stage::SyncProbe, Stage::Verify] {
                    run.skip(stage, "login failed");
                }
            }
        } else {
            for stage in &Stage::ALL[1..Stage::ALL.len() - 1] {
                run.skip(*stage, "store not connected");
            }
        }

        self.logout(&mut run).await;
        run.finish()
    }

    fn connect(&self, run: &mut Run) -> bool {
        let started = Instant::now();
        if self.identity.store().is_connected() {
            run.push(StageResult::passed(Stage::Connect, "store connected", started));
            true
        } else {
            run.push(StageResult::failed(Stage::Connect, "store is not connected", started));
            false
        }
    }

    async fn sign_up(&self, run: &mut Run) {
        let started = Instant::now();
        let outcome = self
            .identity
            .sign_up(&self.config.username, &self.config.password)
            .await;

        let result = match (outcome.success, outcome.error) {
            (true, _) => StageResult::passed(
                Stage::SignUp,
                format!("created {}", self.config.username),
                started,
            ),
            (false, Some(error)) if error == "User already exists" => {
                StageResult::skipped(Stage::SignUp, "account already exists")
            }
            (false, error) => StageResult::failed(
                Stage::SignUp,
                error.unwrap_or_else(|| "sign-up failed".to_string()),
                started,
            ),
        };
        run.push(result);
    }

    async fn login(&self, run: &mut Run) -> bool {
        let started = Instant::now();
        let outcome = self
            .identity
            .login(&self.config.username, &self.config.password)
            .await;

        if outcome.success {
            let who = outcome.username.unwrap_or_else(|| self.config.username.clone());
            run.push(StageResult::passed(Stage::Login, format!("logged in as {}", who), started));
            true
        } else {
            let error = outcome.error.unwrap_or_else(|| "login failed".to_string());
            run.push(StageResult::failed(Stage::Login, error, started));
            false
        }
    }

    async fn await_login_event(&self, run: &mut Run, events: &mut broadcast::Receiver<AuthEvent>) {
        let started = Instant::now();
        let username = self.config.username.as_str();

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(AuthEvent::Login { alias, .. }) if alias == username => return Ok(()),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!("Auth event receiver lagged by {}", missed);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err("auth event stream closed".to_string())
                    }
                }
            }
        };

        let result = match tokio::time::timeout(self.config.auth_event_timeout, wait).await {
            Ok(Ok(())) => StageResult::passed(Stage::AuthEvent, AuthEvent::LOGIN, started),
            Ok(Err(error)) => StageResult::failed(Stage::AuthEvent, error, started),
            Err(_) => StageResult::failed(
                Stage::AuthEvent,
                format!("no {} event within {:?}", AuthEvent::LOGIN, self.config.auth_event_timeout),
                started,
            ),
        };
        run.push(result);
    }

    fn check_current_user(&self, run: &mut Run) {
        let started = Instant::now();
        let result = match self.identity.current_user() {
            Some(user) if user.alias == self.config.username => StageResult::passed(
                Stage::CurrentUser,
                format!("{} ({})", user.alias, short_key(&user.pub_key)),
                started,
            ),
            Some(user) => StageResult::failed(
                Stage::CurrentUser,
                format!("expected {}, found {}", self.config.username, user.alias),
                started,
            ),
            None => StageResult::failed(Stage::CurrentUser, "no current user", started),
        };
        run.push(result);
    }

    async fn probe(&self, run: &mut Run) -> Option<ProbeOutcome> {
        let started = Instant::now();
        let record = self.config.record();
        run.record = Some(record.clone());

        let node = match NodePath::parse(&self.config.path)
            .ok()
            .and_then(|path| node_at(self.identity.store(), &path))
        {
            Some(node) => node,
            None => {
                let error = format!("invalid path: {:?}", self.config.path);
                run.push(StageResult::failed(Stage::SyncProbe, error, started));
                return None;
            }
        };

        let value = match record.to_value() {
            Ok(value) => value,
            Err(e) => {
                run.push(StageResult::failed(Stage::SyncProbe, e.to_string(), started));
                return None;
            }
        };

        let probe = SyncProbe::new(self.config.probe.clone());
        match probe.run(&node, value).await {
            Ok(outcome) => {
                let message = format!(
                    "ack {} after {} ms, read after {} ms",
                    outcome.ack,
                    outcome.write_latency.as_millis(),
                    outcome.read_latency.as_millis()
                );
                run.push(StageResult::passed(Stage::SyncProbe, message, started));
                Some(outcome)
            }
            Err(e) => {
                let error = format!("{}: {}", e.kind(), e);
                run.push(StageResult::failed(Stage::SyncProbe, error, started));
                None
            }
        }
    }

    fn verify(&self, run: &mut Run, outcome: ProbeOutcome) {
        let started = Instant::now();
        let result = match &run.record {
            Some(record) if record.matches(&outcome.value) => {
                StageResult::passed(Stage::Verify, "read result matches written record", started)
            }
            Some(_) => StageResult::failed(
                Stage::Verify,
                format!("read result differs: {}", outcome.value),
                started,
            ),
            None => StageResult::failed(Stage::Verify, "no record was written", started),
        };
        run.read_result = Some(outcome.value);
        run.push(result);
    }

    async fn logout(&self, run: &mut Run) {
        if self.identity.current_user().is_none() {
            run.skip(Stage::Logout, "no active session");
            return;
        }

        let started = Instant::now();
        let result = match self.identity.logout().await {
            Ok(()) => StageResult::passed(Stage::Logout, "session ended", started),
            Err(e) => {
                tracing::warn!("Logout failed: {}", e);
                StageResult::failed(Stage::Logout, e.to_string(), started)
            }
        };
        run.push(result);
    }
}

fn short_key(key: &str) -> &str {
    key.get(..16).unwrap_or(key)
}

#[derive(Default)]
struct Run {
    stages: Vec<StageResult>,
    record: Option<TestRecord>,
    read_result: Option<Value>,
}

impl Run {
    fn push(&mut self, result: StageResult) {
        match result.status {
            StageStatus::Failed => tracing::warn!(
                "Stage {} failed: {}",
                result.stage,
                result.error.as_deref().unwrap_or("")
            ),
            _ => tracing::info!("Stage {} {:?}", result.stage, result.status),
        }
        self.stages.push(result);
    }

    fn skip(&mut self, stage: Stage, reason: &str) {
        self.push(StageResult::skipped(stage, reason));
    }

    fn finish(self) -> HarnessReport {
        let success = HarnessReport::verdict(&self.stages);
        HarnessReport {
            stages: self.stages,
            record: self.record,
            read_result: self.read_result,
            success,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{HashParams, MemoryIdentity};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn harness(store: &MemoryStore) -> Harness<MemoryIdentity<MemoryStore>> {
        let identity = MemoryIdentity::with_params(store.clone(), HashParams::fast());
        let config = HarnessConfig::new("testuser_123", "password123").with_timestamp(1_700_000_000_000);
        Harness::new(identity, config)
    }

    fn statuses(report: &HarnessReport) -> Vec<StageStatus> {
        report.stages.iter().map(|r| r.status).collect()
    }

    // ===========================================================================
    // Full runs
    // ===========================================================================

    #[tokio::test]
    async fn full_run_passes() {
        let store = MemoryStore::new();
        let h = harness(&store);

        let report = h.run().await;

        assert!(report.success(), "{}", report);
        assert_eq!(report.stages.len(), Stage::ALL.len());
        let order: Vec<Stage> = report.stages.iter().map(|r| r.stage).collect();
        assert_eq!(order, Stage::ALL.to_vec());
        assert!(statuses(&report).iter().all(|s| *s == StageStatus::Passed));
        assert!(h.identity().current_user().is_none());
    }

    #[tokio::test]
    async fn read_result_is_the_scenario_record() {
        let store = MemoryStore::new();
        let report = harness(&store).run().await;

        assert_eq!(
            report.read_result,
            Some(json!({
                "message": "Hello from Shogun Core + Holster!",
                "timestamp": 1_700_000_000_000_i64,
                "username": "testuser_123",
            }))
        );

        let stored = store.value_at(&NodePath::parse("test/data").unwrap()).unwrap();
        assert_eq!(stored["#"], "test/data");
    }

    #[tokio::test]
    async fn existing_account_still_succeeds() {
        let store = MemoryStore::new();
        let h = harness(&store);
        h.identity().sign_up("testuser_123", "password123").await;
        h.identity().logout().await.unwrap();

        let report = h.run().await;

        assert_eq!(report.status(Stage::SignUp), Some(StageStatus::Skipped));
        assert!(report.success(), "{}", report);
    }

    // ===========================================================================
    // Failure paths
    // ===========================================================================

    #[tokio::test]
    async fn disconnected_store_skips_everything() {
        let store = MemoryStore::new();
        store.set_disconnected(true);

        let report = harness(&store).run().await;

        assert_eq!(report.status(Stage::Connect), Some(StageStatus::Failed));
        for stage in &Stage::ALL[1..] {
            assert_eq!(report.status(*stage), Some(StageStatus::Skipped), "{}", stage);
        }
        assert!(!report.success());
    }

    #[tokio::test]
    async fn login_failure_skips_dependents() {
        let store = MemoryStore::new();
        let h = harness(&store);
        h.identity().sign_up("testuser_123", "different").await;
        h.identity().logout().await.unwrap();

        let report = h.run().await;

        assert_eq!(report.status(Stage::Login), Some(StageStatus::Failed));
        for stage in [Stage::AuthEvent, Stage::CurrentUser, Stage::SyncProbe, Stage::Verify] {
            assert_eq!(report.status(stage), Some(StageStatus::Skipped));
        }
        assert_eq!(report.status(Stage::Logout), Some(StageStatus::Skipped));
        assert!(!report.success());
        assert!(store.puts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn read_timeout_is_recorded_and_logout_still_runs() {
        let store = MemoryStore::new();
        store.withhold_updates(true);
        let h = harness(&store);

        let report = h.run().await;

        let probe = report.stage(Stage::SyncProbe).unwrap();
        assert_eq!(probe.status, StageStatus::Failed);
        assert!(probe.error.as_deref().unwrap().starts_with("read_timeout"));
        assert_eq!(report.status(Stage::Verify), Some(StageStatus::Skipped));
        assert_eq!(report.status(Stage::Logout), Some(StageStatus::Passed));
        assert!(!report.success());
    }

    #[tokio::test]
    async fn error_ack_is_recorded() {
        let store = MemoryStore::new();
        store.fail_next_ack("error: disk full");

        let report = harness(&store).run().await;

        let probe = report.stage(Stage::SyncProbe).unwrap();
        assert!(probe.error.as_deref().unwrap().starts_with("write_error"));
        assert!(!report.success());
    }

    #[tokio::test]
    async fn invalid_path_fails_probe() {
        let store = MemoryStore::new();
        let identity = MemoryIdentity::with_params(store.clone(), HashParams::fast());
        let config = HarnessConfig::new("u", "p").with_path("test//data");

        let report = Harness::new(identity, config).run().await;

        assert_eq!(report.status(Stage::SyncProbe), Some(StageStatus::Failed));
        assert_eq!(report.status(Stage::Verify), Some(StageStatus::Skipped));
    }

    // ===========================================================================
    // Reporting
    // ===========================================================================

    #[test]
    fn logout_failure_does_not_change_verdict() {
        let now = Instant::now();
        let mut stages: Vec<StageResult> = Stage::ALL[..7]
            .iter()
            .map(|s| StageResult::passed(*s, "", now))
            .collect();
        stages.push(StageResult::failed(Stage::Logout, "boom", now));

        assert!(HarnessReport::verdict(&stages));
    }

    #[tokio::test]
    async fn report_serializes_to_json() {
        let store = MemoryStore::new();
        let report = harness(&store).run().await;

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["stages"][5]["stage"], "sync_probe");
        assert_eq!(json["stages"][5]["status"], "passed");
        assert_eq!(json["record"]["username"], "testuser_123");
    }

    #[tokio::test]
    async fn report_display_lists_every_stage() {
        let store = MemoryStore::new();
        let text = harness(&store).run().await.to_string();

        for stage in Stage::ALL {
            assert!(text.contains(stage.name()), "missing {}", stage);
        }
        assert!(text.ends_with("PASSED"));
    }
}
