//! Checkpoint state management for resumable runs.
//!
//! Epistemic foundation:
//! - K_i: Checkpoints hold accepted respondents only; partial attempts are
//!   never persisted
//! - K_i: State is persisted to disk atomically (write-then-rename)
//! - K_i: A checkpoint only resumes a run with an identical fingerprint
//! - B_i: Checkpoint file may not exist → fresh state
//! - I^B: Crash during write → backup file provides recovery

use crate::models::{
    AcceptedRespondent, Config, ConjointError, ExposurePolicy, Layout, Result, StudyMode,
};
use crate::planner::Plan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Everything that must match for accepted respondents to be reusable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFingerprint {
    pub mode: StudyMode,
    /// Locked rows per respondent
    pub t: usize,
    /// Exposures per element
    pub e: usize,
    pub base_seed: u64,
    /// Layout names and ids
    pub layout: String,
    pub min_active: usize,
    pub max_active: usize,
    pub exposure_policy: ExposurePolicy,
    /// Hex SHA-256 over the gate thresholds and builder settings
    pub settings: String,
}

impl RunFingerprint {
    /// Fingerprint of a planned run.
    ///
    /// Anything that can change which designs are built or accepted is
    /// folded in, so a checkpoint never mixes respondents from different rules.
    pub fn new(plan: &Plan, layout: &Layout, config: &Config, base_seed: u64) -> Result<Self> {
        let settings = serde_json::to_vec(&(&config.gate, &config.builder))
            .map_err(|e| ConjointError::Internal(format!("Serializing run settings: {e}")))?;

        Ok(Self {
            mode: plan.mode,
            t: plan.t,
            e: plan.e,
            base_seed,
            layout: layout.fingerprint(),
            min_active: plan.min_active,
            max_active: plan.max_active,
            exposure_policy: plan.exposure_policy,
            settings: format!("{:x}", Sha256::digest(&settings)),
        })
    }
}

impl std::fmt::Display for RunFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let policy = match self.exposure_policy {
            ExposurePolicy::Exact => "exact".to_string(),
            ExposurePolicy::Soft { tolerance_cv } => format!("soft({tolerance_cv})"),
        };
        write!(
            f,
            "{} T={} E={} active={}..={} exposure={} seed={} settings={} layout={}",
            self.mode,
            self.t,
            self.e,
            self.min_active,
            self.max_active,
            policy,
            self.base_seed,
            self.settings.get(..12).unwrap_or(&self.settings),
            self.layout
        )
    }
}

/// Checkpoint state for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    pub fingerprint: RunFingerprint,
    /// Respondents requested
    pub total_respondents: usize,
    /// Accepted respondents by 1-based id
    pub accepted: BTreeMap<usize, AcceptedRespondent>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl CheckpointState {
    /// Create a new, empty checkpoint state.
    pub fn new(fingerprint: RunFingerprint, total_respondents: usize) -> Self {
        let now = Utc::now();
        Self {
            fingerprint,
            total_respondents,
            accepted: BTreeMap::new(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Record an accepted respondent. Existing entries are never replaced.
    pub fn record(&mut self, accepted: AcceptedRespondent) -> bool {
        let id = accepted.respondent();
        if self.accepted.contains_key(&id) {
            return false;
        }
        self.accepted.insert(id, accepted);
        self.updated_at = Utc::now();
        true
    }

    pub fn is_accepted(&self, respondent: usize) -> bool {
        self.accepted.contains_key(&respondent)
    }

    /// Respondent ids not yet accepted, ascending.
    pub fn pending_ids(&self) -> Vec<usize> {
        (1..=self.total_respondents)
            .filter(|id| !self.is_accepted(*id))
            .collect()
    }

    /// Check if all respondents are accepted.
    pub fn is_complete(&self) -> bool {
        (1..=self.total_respondents).all(|id| self.is_accepted(id))
    }

    /// Share of requested respondents already accepted, in percent.
    pub fn progress_percent(&self) -> f64 {
        if self.total_respondents == 0 {
            return 100.0;
        }
        let done = (1..=self.total_respondents)
            .filter(|id| self.is_accepted(*id))
            .count();
        (done as f64 / self.total_respondents as f64) * 100.0
    }
}

/// Checkpoint manager for persisting and loading checkpoint state.
pub struct CheckpointManager {
    /// Directory for checkpoint files
    dir: PathBuf,
    /// Path to main checkpoint file
    checkpoint_path: PathBuf,
    /// Path to backup file
    backup_path: PathBuf,
    /// Current state
    state: Option<CheckpointState>,
}

impl CheckpointManager {
    /// Create a new checkpoint manager.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| ConjointError::io("creating checkpoint dir", e))?;

        Ok(Self {
            dir: dir.to_path_buf(),
            checkpoint_path: dir.join("checkpoint.json"),
            backup_path: dir.join("checkpoint.backup.json"),
            state: None,
        })
    }

    /// Check if a checkpoint exists.
    pub fn exists(&self) -> bool {
        self.checkpoint_path.exists()
    }

    /// Initialize a new checkpoint or load the existing one.
    ///
    /// B_i(fingerprints match) → Err(CheckpointMismatch) otherwise
    pub fn init_or_load(
        &mut self,
        fingerprint: RunFingerprint,
        total_respondents: usize,
    ) -> Result<&CheckpointState> {
        let state = if self.exists() {
            let mut state = self.read(&self.checkpoint_path).or_else(|e| {
                warn!(error = %e, "Checkpoint unreadable, trying backup");
                self.read(&self.backup_path)
            })?;
            if state.fingerprint != fingerprint {
                return Err(ConjointError::CheckpointMismatch {
                    expected: fingerprint.to_string(),
                    found: state.fingerprint.to_string(),
                });
            }
            state.total_respondents = total_respondents;
            info!(
                accepted = state.accepted.len(),
                pending = state.pending_ids().len(),
                progress = format!("{:.1}%", state.progress_percent()),
                complete = state.is_complete(),
                "Resuming from checkpoint"
            );
            state
        } else {
            info!(total = total_respondents, "Created new checkpoint");
            CheckpointState::new(fingerprint, total_respondents)
        };

        self.state = Some(state);
        self.save()?;
        self.state()
            .ok_or_else(|| ConjointError::Internal("checkpoint state missing".to_string()))
    }

    fn read(&self, path: &Path) -> Result<CheckpointState> {
        let file = File::open(path).map_err(|e| ConjointError::io("opening checkpoint", e))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader)
            .map_err(|e| ConjointError::ParseError(format!("Invalid checkpoint: {e}")))
    }

    /// Save checkpoint to disk (atomic write).
    pub fn save(&self) -> Result<()> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| ConjointError::Internal("No checkpoint state to save".to_string()))?;

        // Backup existing checkpoint
        if self.checkpoint_path.exists() {
            fs::copy(&self.checkpoint_path, &self.backup_path)
                .map_err(|e| ConjointError::io("backing up checkpoint", e))?;
        }

        // Write to temp file
        let temp_path = self.dir.join("checkpoint.tmp.json");
        let file = File::create(&temp_path)
            .map_err(|e| ConjointError::io("creating temp checkpoint", e))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer(writer, state)
            .map_err(|e| ConjointError::Internal(format!("Serializing checkpoint: {e}")))?;

        // Atomic rename
        fs::rename(&temp_path, &self.checkpoint_path)
            .map_err(|e| ConjointError::io("renaming checkpoint", e))?;

        debug!(accepted = state.accepted.len(), "Checkpoint saved");
        Ok(())
    }

    /// Get reference to state.
    pub fn state(&self) -> Option<&CheckpointState> {
        self.state.as_ref()
    }

    /// Record an accepted respondent and save.
    pub fn record_accepted(&mut self, accepted: AcceptedRespondent) -> Result<()> {
        let changed = match &mut self.state {
            Some(state) => state.record(accepted),
            None => false,
        };
        if changed {
            self.save()?;
        }
        Ok(())
    }

    /// Accepted respondents restored from disk with ids in
    /// `1..=total_respondents`, ascending.
    ///
    /// Entries beyond the current respondent count stay on disk and come
    /// back if the count is raised again.
    pub fn accepted(&self) -> Vec<AcceptedRespondent> {
        self.state
            .as_ref()
            .map(|s| {
                s.accepted
                    .iter()
                    .filter(|(id, _)| **id <= s.total_respondents)
                    .map(|(_, a)| a.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}
