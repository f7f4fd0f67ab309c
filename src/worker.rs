//! Supervised runner for enrichment jobs.
//!
//! `schedule` never blocks and never fails the caller. A supervisor task owns
//! a `JoinSet`, spawns every job into it (jobs for different responses run in
//! parallel), reaps outcomes and keeps the counters shown on `/health`.

use crate::enrichment::{EnrichmentJob, EnrichmentOrchestrator};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use utoipa::ToSchema;

/// How many times a response is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// One attempt, no retry. A failed commit leaves the row pending.
    AtMostOnce,
}

#[derive(Default)]
struct Counters {
    scheduled: AtomicU64,
    completed: AtomicU64,
    degraded: AtomicU64,
    commit_failures: AtomicU64,
    panics: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct RunnerStats {
    pub policy: DeliveryPolicy,
    pub scheduled: u64,
    /// Committed, with or without defaults.
    pub completed: u64,
    /// Committed with at least one step replaced by defaults.
    pub degraded: u64,
    pub commit_failures: u64,
    pub panics: u64,
    /// Could not be handed to the supervisor.
    pub dropped: u64,
    pub in_flight: usize,
}

#[derive(Clone)]
pub struct EnrichmentRunner {
    jobs: mpsc::UnboundedSender<EnrichmentJob>,
    in_flight: Arc<watch::Sender<usize>>,
    counters: Arc<Counters>,
    policy: DeliveryPolicy,
}

impl EnrichmentRunner {
    /// Starts the supervisor on the current tokio runtime.
    pub fn start(orchestrator: Arc<EnrichmentOrchestrator>) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        let (in_flight, _) = watch::channel(0usize);
        let runner = Self {
            jobs,
            in_flight: Arc::new(in_flight),
            counters: Arc::new(Counters::default()),
            policy: DeliveryPolicy::AtMostOnce,
        };

        tokio::spawn(supervise(
            rx,
            orchestrator,
            runner.in_flight.clone(),
            runner.counters.clone(),
        ));
        tracing::info!("✓ Enrichment runner started ({:?})", runner.policy);
        runner
    }

    /// Hands a job to the supervisor and returns immediately.
    pub fn schedule(&self, job: EnrichmentJob) {
        let response_id = job.response_id;
        self.in_flight.send_modify(|n| *n += 1);
        self.counters.scheduled.fetch_add(1, Ordering::Relaxed);

        if self.jobs.send(job).is_err() {
            self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                "✗ Enrichment supervisor is gone, response {} stays pending",
                response_id
            );
        } else {
            tracing::debug!("Scheduled enrichment for response {}", response_id);
        }
    }

    /// Resolves once no scheduled job is still running.
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub fn stats(&self) -> RunnerStats {
        let c = &self.counters;
        RunnerStats {
            policy: self.policy,
            scheduled: c.scheduled.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            degraded: c.degraded.load(Ordering::Relaxed),
            commit_failures: c.commit_failures.load(Ordering::Relaxed),
            panics: c.panics.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            in_flight: *self.in_flight.borrow(),
        }
    }
}

async fn supervise(
    mut rx: mpsc::UnboundedReceiver<EnrichmentJob>,
    orchestrator: Arc<EnrichmentOrchestrator>,
    in_flight: Arc<watch::Sender<usize>>,
    counters: Arc<Counters>,
) {
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            Some(job) = rx.recv() => {
                let orchestrator = orchestrator.clone();
                tasks.spawn(async move { orchestrator.enrich(&job).await });
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                match joined {
                    Ok(Ok(report)) => {
                        counters.completed.fetch_add(1, Ordering::Relaxed);
                        if report.is_degraded() {
                            counters.degraded.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Ok(Err(_)) => {
                        // Already logged with the response id by the orchestrator.
                        counters.commit_failures.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        counters.panics.fetch_add(1, Ordering::Relaxed);
                        tracing::error!("✗ Enrichment task aborted: {}", e);
                    }
                }
                in_flight.send_modify(|n| *n = n.saturating_sub(1));
            }
            else => break,
        }
    }

    tracing::info!("Enrichment supervisor stopped");
}
