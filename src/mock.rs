//! Scripted in-memory [`JobClient`] for tests and dry runs.
//!
//! Each job is registered with a [`MockJob`] script. Time is measured with
//! `tokio::time::Instant`, so flows run against the mock are deterministic
//! under a paused test clock.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::jenkins::{BuildHandle, BuildStatus, JobClient, JobClientError, RemoteState};
use crate::state_machine::{BuildResult, Params};

/// Script for one mocked job.
#[derive(Debug, Clone)]
pub struct MockJob {
    pub duration: Duration,
    /// Result per attempt; the last entry repeats.
    pub results: Vec<BuildResult>,
    pub never_finishes: bool,
    /// Number of initial start requests that fail transiently.
    pub transient_start_errors: u32,
    /// Number of status requests, across all attempts, that fail transiently.
    pub transient_poll_errors: u32,
    /// Delay before every status request answers.
    pub poll_latency: Duration,
    pub unauthorized: bool,
}

impl MockJob {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            results: vec![BuildResult::Success],
            never_finishes: false,
            transient_start_errors: 0,
            transient_poll_errors: 0,
            poll_latency: Duration::ZERO,
            unauthorized: false,
        }
    }

    pub fn result(mut self, result: BuildResult) -> Self {
        self.results = vec![result];
        self
    }

    /// Fail the first `count` attempts, then succeed.
    pub fn fails(mut self, count: usize) -> Self {
        let mut results = vec![BuildResult::Failed; count];
        results.push(BuildResult::Success);
        self.results = results;
        self
    }

    pub fn results(mut self, results: Vec<BuildResult>) -> Self {
        self.results = results;
        self
    }

    pub fn never_finishes(mut self) -> Self {
        self.never_finishes = true;
        self
    }

    pub fn transient_start_errors(mut self, count: u32) -> Self {
        self.transient_start_errors = count;
        self
    }

    pub fn transient_poll_errors(mut self, count: u32) -> Self {
        self.transient_poll_errors = count;
        self
    }

    pub fn poll_latency(mut self, latency: Duration) -> Self {
        self.poll_latency = latency;
        self
    }

    pub fn unauthorized(mut self) -> Self {
        self.unauthorized = true;
        self
    }
}

#[derive(Debug)]
struct MockRun {
    job_name: String,
    build_id: u64,
    started_at: Instant,
    duration: Duration,
    result: Option<BuildResult>,
    params: Params,
    stopped: bool,
}

#[derive(Default)]
struct MockState {
    jobs: HashMap<String, MockJob>,
    runs: Vec<MockRun>,
}

#[derive(Default)]
pub struct MockJobClient {
    state: Mutex<MockState>,
}

impl MockJobClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `job` under its full remote name.
    pub fn job(&self, name: impl Into<String>, job: MockJob) -> &Self {
        self.lock().jobs.insert(name.into(), job);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Job names in the order their attempts were started.
    pub fn started(&self) -> Vec<String> {
        self.lock().runs.iter().map(|r| r.job_name.clone()).collect()
    }

    /// Number of attempts started for `name`.
    pub fn invocations(&self, name: &str) -> usize {
        self.lock().runs.iter().filter(|r| r.job_name == name).count()
    }

    /// Position of the first start of `name` among all starts.
    pub fn order_of(&self, name: &str) -> Option<usize> {
        self.lock().runs.iter().position(|r| r.job_name == name)
    }

    pub fn start_times(&self, name: &str) -> Vec<Instant> {
        self.lock()
            .runs
            .iter()
            .filter(|r| r.job_name == name)
            .map(|r| r.started_at)
            .collect()
    }

    pub fn params_of(&self, name: &str) -> Option<Params> {
        self.lock()
            .runs
            .iter()
            .find(|r| r.job_name == name)
            .map(|r| r.params.clone())
    }

    pub fn stopped(&self, name: &str) -> bool {
        !self.stopped_builds(name).is_empty()
    }

    /// Build numbers of `name` that received a stop request.
    pub fn stopped_builds(&self, name: &str) -> Vec<u64> {
        self.lock()
            .runs
            .iter()
            .filter(|r| r.job_name == name && r.stopped)
            .map(|r| r.build_id)
            .collect()
    }
}

#[async_trait]
impl JobClient for MockJobClient {
    async fn start(
        &self,
        job_name: &str,
        prefix: &str,
        params: &Params,
    ) -> Result<BuildHandle, JobClientError> {
        let full_name = format!("{prefix}{job_name}");
        let mut state = self.lock();
        let Some(job) = state.jobs.get_mut(&full_name) else {
            return Err(JobClientError::Api {
                status: 404,
                message: format!("no such job: {full_name}"),
            });
        };
        if job.unauthorized {
            return Err(JobClientError::Unauthorized {
                status: 401,
                message: "bad credentials".into(),
            });
        }
        if job.transient_start_errors > 0 {
            job.transient_start_errors -= 1;
            return Err(JobClientError::Transient("connection reset".into()));
        }

        let job = job.clone();
        let attempt = state.runs.iter().filter(|r| r.job_name == full_name).count();
        let result = if job.never_finishes {
            None
        } else {
            job.results
                .get(attempt)
                .or(job.results.last())
                .copied()
                .or(Some(BuildResult::Success))
        };
        let ticket = state.runs.len() as u64;
        state.runs.push(MockRun {
            job_name: full_name.clone(),
            build_id: attempt as u64 + 1,
            started_at: Instant::now(),
            duration: job.duration,
            result,
            params: params.clone(),
            stopped: false,
        });
        Ok(BuildHandle::new(full_name, ticket))
    }

    async fn poll(&self, handle: &BuildHandle) -> Result<BuildStatus, JobClientError> {
        let latency = self
            .lock()
            .jobs
            .get(&handle.job_name)
            .map_or(Duration::ZERO, |job| job.poll_latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        let MockState { jobs, runs } = &mut *state;
        let run = runs
            .get(handle.ticket as usize)
            .ok_or_else(|| JobClientError::Protocol(format!("unknown ticket {}", handle.ticket)))?;
        if let Some(job) = jobs.get_mut(&run.job_name)
            && job.transient_poll_errors > 0
        {
            job.transient_poll_errors -= 1;
            return Err(JobClientError::Transient("502 bad gateway".into()));
        }
        if run.stopped {
            return Ok(BuildStatus::finished(run.build_id, BuildResult::Aborted));
        }
        match run.result {
            Some(result) if run.started_at.elapsed() >= run.duration => {
                Ok(BuildStatus::finished(run.build_id, result))
            }
            _ => Ok(BuildStatus {
                state: RemoteState::Running,
                result: None,
                build_id: Some(run.build_id),
            }),
        }
    }

    async fn stop(&self, handle: &BuildHandle) -> Result<(), JobClientError> {
        let mut state = self.lock();
        if let Some(run) = state.runs.get_mut(handle.ticket as usize) {
            run.stopped = true;
        }
        Ok(())
    }
}
