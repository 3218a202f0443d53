//! Fake collaborators shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use deploybot::deploy::command::CommandOutput;
use deploybot::deploy::pipeline::{Orchestrator, PipelineOptions};
use deploybot::deploy::report::Notification;
use deploybot::deploy::stages::{StageFailure, StageResult, Stages};
use deploybot::errors::{AgentError, StageError};
use deploybot::http::diagnosis::Diagnoser;
use deploybot::http::notify::Notifier;
use deploybot::models::deployment::{DeploymentJob, DeploymentRequest, Stage};

/// Stages that succeed unless told to fail at a given stage
#[derive(Default)]
pub struct FakeStages {
    fail_at: Option<Stage>,
    delay: Duration,
    calls: Mutex<Vec<Stage>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeStages {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn failing_at(stage: Stage) -> Self {
        Self {
            fail_at: Some(stage),
            ..Self::default()
        }
    }

    /// Each fetch takes `delay`, to observe overlapping deployments
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Stage> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn stage(&self, stage: Stage) -> StageResult {
        self.calls.lock().unwrap().push(stage);

        if stage == Stage::Fetch && !self.delay.is_zero() {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        if self.fail_at == Some(stage) {
            let error = match stage {
                Stage::Fetch => StageError::FetchError("fatal: repository not found".to_string()),
                Stage::Install => StageError::InstallError("No matching distribution".to_string()),
                Stage::Start => StageError::StartError("bash: gunicorn: not found".to_string()),
                Stage::Verify => StageError::VerifyTimeoutError {
                    port: 8000,
                    attempts: 10,
                },
            };
            let output = CommandOutput {
                exit_code: Some(1),
                success: false,
                stdout: String::new(),
                stderr: format!("{} went wrong", stage),
            };
            return Err(StageFailure::new(error).with_output(output));
        }

        Ok(CommandOutput {
            exit_code: Some(0),
            success: true,
            stdout: format!("{} ok", stage),
            stderr: String::new(),
        })
    }
}

#[async_trait]
impl Stages for FakeStages {
    async fn fetch(&self, _job: &DeploymentJob) -> StageResult {
        self.stage(Stage::Fetch).await
    }

    async fn install(&self, _job: &DeploymentJob) -> StageResult {
        self.stage(Stage::Install).await
    }

    async fn start(&self, _job: &DeploymentJob) -> StageResult {
        self.stage(Stage::Start).await
    }

    async fn verify(&self, _job: &DeploymentJob) -> StageResult {
        self.stage(Stage::Verify).await
    }
}

/// Diagnoser returning a canned answer or error
pub struct FakeDiagnoser {
    answer: Result<String, String>,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeDiagnoser {
    pub fn answering(text: &str) -> Self {
        Self {
            answer: Ok(text.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: &str) -> Self {
        Self {
            answer: Err(error.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl Diagnoser for FakeDiagnoser {
    async fn diagnose(&self, failure: &str) -> Result<String, AgentError> {
        self.prompts.lock().unwrap().push(failure.to_string());
        self.answer.clone().map_err(AgentError::DiagnosisError)
    }
}

/// Notifier recording every notification
#[derive(Default)]
pub struct FakeNotifier {
    fail: bool,
    pub sent: Mutex<Vec<Notification>>,
}

impl FakeNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), AgentError> {
        self.sent.lock().unwrap().push(notification.clone());
        if self.fail {
            Err(AgentError::NotificationError("gateway unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

pub struct Harness {
    pub stages: Arc<FakeStages>,
    pub diagnoser: Arc<FakeDiagnoser>,
    pub notifier: Arc<FakeNotifier>,
    pub orchestrator: Arc<Orchestrator>,
}

pub fn harness(stages: FakeStages, diagnoser: FakeDiagnoser, notifier: FakeNotifier) -> Harness {
    let stages = Arc::new(stages);
    let diagnoser = Arc::new(diagnoser);
    let notifier = Arc::new(notifier);
    let options = PipelineOptions {
        public_host: Some("203.0.113.7".to_string()),
        ..Default::default()
    };
    let orchestrator = Orchestrator::new(options, stages.clone())
        .with_diagnoser(diagnoser.clone())
        .with_notifier(notifier.clone());

    Harness {
        stages,
        diagnoser,
        notifier,
        orchestrator: Arc::new(orchestrator),
    }
}

/// The example request: repo=https://example/repo, branch=main,
/// target=/srv/app, runtime=3.9, start_cmd="gunicorn app:app", port=8000
pub fn example_request() -> DeploymentRequest {
    serde_json::from_value(example_request_json()).unwrap()
}

pub fn example_request_json() -> serde_json::Value {
    serde_json::json!({
        "repo": "https://example/repo",
        "branch": "main",
        "target": "/srv/app",
        "runtime": "3.9",
        "start_cmd": "gunicorn app:app",
        "port": 8000
    })
}
