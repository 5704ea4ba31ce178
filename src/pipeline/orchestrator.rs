//! Respondent orchestrator - build, gate, accept or reseed.
//!
//! Epistemic foundation:
//! - K_i: Respondents share only read-only plan data; each owns its output slot
//! - K_i: Each attempt draws from its own seed, so results are independent of
//!   thread scheduling
//! - B_i: A respondent may never pass → Unbuildable once max_attempts is spent
//! - I^R: Worker count, attempt ceiling and heartbeat cadence from RunConfig

use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{attempt_seed, GATE_SEED_OFFSET};
use crate::builder::{BuildOutcome, RowBuilder};
use crate::checkpoint::CheckpointManager;
use crate::gate::{diagnose, Coding, DesignMatrix, QualityGate};
use crate::models::{
    AcceptedRespondent, Config, ConjointError, Layout, RespondentDesign, Result, RunStats,
};
use crate::planner::Plan;

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunOutcome {
    /// Accepted respondents (restored and new), ascending by id
    pub accepted: Vec<AcceptedRespondent>,
    /// Respondents that exhausted their attempts
    pub unbuildable: Vec<ConjointError>,
    pub stats: RunStats,
}

impl RunOutcome {
    pub fn is_complete(&self) -> bool {
        self.unbuildable.is_empty()
    }
}

/// Drives every respondent through build → gate until acceptance.
pub struct Orchestrator<'a> {
    layout: &'a Layout,
    plan: &'a Plan,
    config: &'a Config,
    base_seed: u64,
    gate: QualityGate,
}

impl<'a> Orchestrator<'a> {
    pub fn new(layout: &'a Layout, plan: &'a Plan, config: &'a Config, base_seed: u64) -> Self {
        Self {
            layout,
            plan,
            config,
            base_seed,
            gate: QualityGate::new(config.gate.clone()),
        }
    }

    /// Retry loop for one respondent (1-based id).
    ///
    /// B_i(a passing design is found within max_attempts) → Result
    pub fn build_respondent(&self, respondent: usize) -> Result<AcceptedRespondent> {
        let run = &self.config.run;
        let builder = RowBuilder::new(self.layout, self.plan, &self.config.builder);
        let coding = Coding::for_mode(self.plan.mode);

        let mut attempts: u64 = 0;
        let mut build_failures: u64 = 0;
        let mut gate_rejections: u64 = 0;

        loop {
            if run.max_attempts > 0 && attempts >= run.max_attempts {
                return Err(ConjointError::Unbuildable {
                    respondent,
                    attempts,
                    build_failures,
                    gate_rejections,
                });
            }
            attempts += 1;

            let seed = attempt_seed(self.base_seed, respondent, attempts);
            let mut rng = StdRng::seed_from_u64(seed);

            let rows = match builder.build_with_restarts(&mut rng) {
                BuildOutcome::Built(rows) => rows,
                BuildOutcome::NoSolution(reason) => {
                    build_failures += 1;
                    debug!(respondent, attempts, %reason, "Build exhausted");
                    self.heartbeat(respondent, attempts, build_failures, gate_rejections);
                    continue;
                }
            };

            let design = RespondentDesign::new(respondent, rows);
            let x = DesignMatrix::from_design(&design, self.layout, coding);
            let report = self.gate.evaluate(&x, seed.wrapping_add(GATE_SEED_OFFSET));

            if !report.passed {
                gate_rejections += 1;
                debug!(
                    respondent,
                    attempts,
                    rejection = ?report.rejection,
                    rank = report.rank,
                    p = report.p,
                    kappa = report.kappa,
                    "Gate rejected design"
                );
                self.heartbeat(respondent, attempts, build_failures, gate_rejections);
                continue;
            }

            let indicator = match coding {
                Coding::Indicator => x,
                Coding::Reference => DesignMatrix::from_design(&design, self.layout, Coding::Indicator),
            };
            let diagnostics = diagnose(&design, self.layout, &indicator);

            debug!(respondent, attempts, kappa = report.kappa, "Respondent accepted");
            return Ok(AcceptedRespondent {
                design,
                report,
                diagnostics,
                attempts,
                build_failures,
                gate_rejections,
                seed,
            });
        }
    }

    /// Periodic diagnostics that separate structural from statistical failure.
    fn heartbeat(&self, respondent: usize, attempts: u64, build_failures: u64, gate_rejections: u64) {
        let every = self.config.run.heartbeat_every;
        if every > 0 && attempts % every == 0 {
            warn!(
                respondent,
                attempts,
                build_failures,
                gate_rejections,
                "Respondent still searching"
            );
        }
    }

    /// Build every pending respondent on a local worker pool.
    ///
    /// Accepted respondents already in `checkpoint` are kept as-is. Each new
    /// acceptance is persisted before the run moves on.
    pub fn run(&self, mut checkpoint: Option<&mut CheckpointManager>) -> Result<RunOutcome> {
        let start = Instant::now();
        let total = self.config.study.respondents;

        let restored: Vec<AcceptedRespondent> = checkpoint
            .as_deref()
            .map(CheckpointManager::accepted)
            .unwrap_or_default()
            .into_iter()
            .filter(|a| (1..=total).contains(&a.respondent()))
            .collect();
        let pending: Vec<usize> = (1..=total)
            .filter(|id| !restored.iter().any(|a| a.respondent() == *id))
            .collect();

        info!(
            total,
            pending = pending.len(),
            resumed = restored.len(),
            t = self.plan.t,
            e = self.plan.e,
            threads = self.config.run.threads,
            "Starting generation"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.run.threads)
            .build()
            .map_err(|e| ConjointError::Internal(format!("Building thread pool: {e}")))?;

        let pb = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
            .map(|s| s.progress_chars("##-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb.set_position(restored.len() as u64);

        let sink = Mutex::new(checkpoint.as_deref_mut());
        let results: Vec<Result<AcceptedRespondent>> = pool.install(|| {
            pending
                .into_par_iter()
                .map(|respondent| -> Result<AcceptedRespondent> {
                    let accepted = self.build_respondent(respondent)?;
                    let mut guard = sink
                        .lock()
                        .map_err(|_| ConjointError::Internal("checkpoint lock poisoned".into()))?;
                    if let Some(manager) = guard.as_deref_mut() {
                        manager.record_accepted(accepted.clone())?;
                    }
                    drop(guard);
                    pb.inc(1);
                    pb.set_message(format!("respondent {respondent} accepted"));
                    Ok(accepted)
                })
                .collect()
        });

        let mut stats = RunStats {
            total_respondents: total,
            resumed: restored.len(),
            ..Default::default()
        };
        let mut accepted = restored;
        let mut unbuildable = Vec::new();

        for result in results {
            match result {
                Ok(a) => {
                    stats.accepted += 1;
                    stats.total_attempts += a.attempts;
                    stats.build_failures += a.build_failures;
                    stats.gate_rejections += a.gate_rejections;
                    accepted.push(a);
                }
                Err(ConjointError::Unbuildable {
                    respondent,
                    attempts,
                    build_failures,
                    gate_rejections,
                }) => {
                    stats.failed += 1;
                    stats.total_attempts += attempts;
                    stats.build_failures += build_failures;
                    stats.gate_rejections += gate_rejections;
                    warn!(respondent, attempts, "Respondent unbuildable");
                    unbuildable.push(ConjointError::Unbuildable {
                        respondent,
                        attempts,
                        build_failures,
                        gate_rejections,
                    });
                }
                Err(e) => {
                    pb.abandon();
                    return Err(e);
                }
            }
        }
        accepted.sort_by_key(AcceptedRespondent::respondent);

        pb.finish_with_message(format!(
            "Done! {} accepted, {} failed",
            accepted.len(),
            stats.failed
        ));

        stats.runtime_secs = start.elapsed().as_secs_f64();
        stats.finalize();

        info!(
            accepted = stats.accepted,
            resumed = stats.resumed,
            failed = stats.failed,
            attempts = stats.total_attempts,
            build_failures = stats.build_failures,
            gate_rejections = stats.gate_rejections,
            gate_pass_rate = format!("{:.1}%", stats.gate_pass_rate * 100.0),
            throughput = format!("{:.0}/hr", stats.throughput_per_hour),
            "Generation complete"
        );

        Ok(RunOutcome {
            accepted,
            unbuildable,
            stats,
        })
    }
}
