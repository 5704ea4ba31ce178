//! Configuration models for conjoint.
//!
//! All I^R (resolvable ignorance) is parameterized here.
//! The user resolves these unknowns at runtime via config file. Every tuning
//! constant (exposure ratios, retry budgets, gate thresholds) lives in this one
//! immutable struct and is passed explicitly to planner, builder and gate.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{Category, Layout, StudyMode};

/// Top-level configuration for conjoint.
///
/// I^R resolved: All configurable parameters are explicit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Study definition (layout, mode, respondents)
    pub study: StudyConfig,

    /// Planner tuning
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Row builder search budgets
    #[serde(default)]
    pub builder: BuilderConfig,

    /// Quality gate thresholds
    #[serde(default)]
    pub gate: GateConfig,

    /// Orchestration settings
    #[serde(default)]
    pub run: RunConfig,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// Study definition supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyConfig {
    /// Project name (sanitized into output file names)
    #[serde(default = "default_study_name")]
    pub name: String,

    /// Grid or layer mode
    #[serde(default)]
    pub mode: StudyMode,

    /// Maximum active categories per row in grid mode (clipped to #categories)
    #[serde(default = "default_max_active")]
    pub max_active: usize,

    /// Number of respondents (N)
    pub respondents: usize,

    /// Base seed; absent means one is drawn from OS entropy and logged
    #[serde(default)]
    pub seed: Option<u64>,

    /// Ordered categories
    pub categories: Vec<CategorySpec>,
}

fn default_study_name() -> String {
    "study".to_string()
}

fn default_max_active() -> usize {
    4
}

/// One category entry in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySpec {
    pub name: String,
    pub elements: ElementSpec,
}

/// Elements of a category: either a count or explicit ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ElementSpec {
    /// Generate ids `<name>_1 .. <name>_n`
    Count(usize),
    /// Opaque ids supplied by the caller
    Ids(Vec<String>),
}

impl StudyConfig {
    /// Study with generated element ids.
    pub fn new(name: impl Into<String>, mode: StudyMode, respondents: usize) -> Self {
        Self {
            name: name.into(),
            mode,
            max_active: default_max_active(),
            respondents,
            seed: None,
            categories: Vec::new(),
        }
    }

    /// Append a category with `count` generated elements.
    pub fn with_category(mut self, name: impl Into<String>, count: usize) -> Self {
        self.categories.push(CategorySpec {
            name: name.into(),
            elements: ElementSpec::Count(count),
        });
        self
    }

    /// Resolve the category entries into a validated layout.
    pub fn layout(&self) -> crate::models::Result<Layout> {
        Layout::new(
            self.categories
                .iter()
                .map(|spec| match &spec.elements {
                    ElementSpec::Count(n) => Category::with_count(&spec.name, *n),
                    ElementSpec::Ids(ids) => Category {
                        name: spec.name.clone(),
                        elements: ids.clone(),
                    },
                })
                .collect(),
        )
    }

    /// Inclusive bounds on active categories per row.
    ///
    /// K_i: Layer rows are always fully active.
    pub fn activity_bounds(&self, planner: &PlannerConfig) -> (usize, usize) {
        let categories = self.categories.len();
        match self.mode {
            StudyMode::Grid => (planner.min_active, self.max_active.min(categories)),
            StudyMode::Layer => (categories, categories),
        }
    }
}

/// Exposure balancing policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum ExposurePolicy {
    /// Every element is shown exactly E times
    Exact,
    /// Exposure coefficient of variation within each category ≤ tolerance
    Soft {
        #[serde(default = "default_tolerance_cv")]
        tolerance_cv: f64,
    },
}

impl Default for ExposurePolicy {
    fn default() -> Self {
        Self::Exact
    }
}

fn default_tolerance_cv() -> f64 {
    0.05
}

/// Planner tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Minimum exposures per element (E floor)
    #[serde(default = "default_min_exposure")]
    pub min_exposure: usize,

    /// Minimum active categories per row (grid mode)
    #[serde(default = "default_min_active")]
    pub min_active: usize,

    /// Rows above the parameter count P
    #[serde(default = "default_safety_rows")]
    pub safety_rows: usize,

    /// Absences per category ≥ ceil(absence_ratio · E)
    #[serde(default = "default_absence_ratio")]
    pub absence_ratio: f64,

    /// Scale factor applied to the initial row count
    #[serde(default = "default_t_ratio")]
    pub t_ratio: f64,

    /// Patterns to leave unused below visible capacity, when possible
    #[serde(default = "default_capacity_slack")]
    pub capacity_slack: u64,

    /// Exposure policy
    #[serde(default)]
    pub exposure: ExposurePolicy,
}

fn default_min_exposure() -> usize {
    3
}

fn default_min_active() -> usize {
    2
}

fn default_safety_rows() -> usize {
    3
}

fn default_absence_ratio() -> f64 {
    2.0
}

fn default_t_ratio() -> f64 {
    1.10
}

fn default_capacity_slack() -> u64 {
    1
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            min_exposure: default_min_exposure(),
            min_active: default_min_active(),
            safety_rows: default_safety_rows(),
            absence_ratio: default_absence_ratio(),
            t_ratio: default_t_ratio(),
            capacity_slack: default_capacity_slack(),
            exposure: ExposurePolicy::default(),
        }
    }
}

/// Shape of the per-row target active-count sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowMixMode {
    /// Cluster around a single baseline
    Dense,
    /// Push some rows one below and one above the baseline
    #[default]
    Wide,
}

/// Row builder search budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Build attempts per seed before giving up
    #[serde(default = "default_restarts")]
    pub restarts: usize,

    /// Random swap candidates evaluated per violating row
    #[serde(default = "default_swap_tries")]
    pub swap_tries: usize,

    /// Iterations of the grid hard-cap pass
    #[serde(default = "default_hard_cap_swap_tries")]
    pub hard_cap_swap_tries: usize,

    /// Target active-count shaping
    #[serde(default)]
    pub row_mix: RowMixMode,

    /// Fraction of rows moved off the baseline in wide mode
    #[serde(default = "default_widen")]
    pub widen: f64,
}

fn default_restarts() -> usize {
    200
}

fn default_swap_tries() -> usize {
    8000
}

fn default_hard_cap_swap_tries() -> usize {
    30_000
}

fn default_widen() -> f64 {
    0.40
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            restarts: default_restarts(),
            swap_tries: default_swap_tries(),
            hard_cap_swap_tries: default_hard_cap_swap_tries(),
            row_mix: RowMixMode::default(),
            widen: default_widen(),
        }
    }
}

/// Quality gate thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Number of random dependent variables in the stress test (K)
    #[serde(default = "default_random_y")]
    pub random_y: usize,

    /// Condition number upper bound
    #[serde(default = "default_kappa_max")]
    pub kappa_max: f64,

    /// Singular value cutoff for numerical rank
    #[serde(default = "default_rank_tol")]
    pub rank_tol: f64,

    /// Relative tolerance on the normal-equations residual
    #[serde(default = "default_ls_tol")]
    pub ls_tol: f64,

    /// Floor on the minimum per-column tolerance (1 / max VIF)
    #[serde(default = "default_min_tolerance")]
    pub min_tolerance: f64,

    /// Reject designs with duplicate columns
    #[serde(default = "default_true")]
    pub enforce_unique_columns: bool,
}

fn default_random_y() -> usize {
    5
}

fn default_kappa_max() -> f64 {
    1e6
}

fn default_rank_tol() -> f64 {
    1e-12
}

fn default_ls_tol() -> f64 {
    1e-6
}

fn default_min_tolerance() -> f64 {
    1e-6
}

fn default_true() -> bool {
    true
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            random_y: default_random_y(),
            kappa_max: default_kappa_max(),
            rank_tol: default_rank_tol(),
            ls_tol: default_ls_tol(),
            min_tolerance: default_min_tolerance(),
            enforce_unique_columns: default_true(),
        }
    }
}

/// What to do when the preflight cannot lock T.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreflightPolicy {
    /// Surface an infeasibility error
    Abort,
    /// Warn and keep the planner's T in rebuild-until-pass mode
    #[default]
    Degrade,
}

/// Orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Worker threads (0 = all cores)
    #[serde(default)]
    pub threads: usize,

    /// Attempts per respondent before giving up (0 = unbounded)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u64,

    /// Emit a heartbeat every N failed attempts
    #[serde(default = "default_heartbeat_every")]
    pub heartbeat_every: u64,

    /// Preflight failure handling
    #[serde(default)]
    pub on_preflight_failure: PreflightPolicy,
}

fn default_max_attempts() -> u64 {
    5000
}

fn default_heartbeat_every() -> u64 {
    20
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            max_attempts: default_max_attempts(),
            heartbeat_every: default_heartbeat_every(),
            on_preflight_failure: PreflightPolicy::default(),
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output directory (supports ${VAR} expansion)
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    /// Checkpoint directory for resume support
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            checkpoint_dir: None,
        }
    }
}

impl Config {
    /// Configuration with defaults everywhere except the study.
    pub fn new(study: StudyConfig) -> Self {
        Self {
            study,
            planner: PlannerConfig::default(),
            builder: BuilderConfig::default(),
            gate: GateConfig::default(),
            run: RunConfig::default(),
            output: OutputConfig::default(),
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// B_i(file exists) → Result
    /// B_i(file is valid TOML) → Result
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Check cross-field constraints the type system cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let study = &self.study;
        if study.respondents == 0 {
            return Err(ConfigError::Invalid("respondents must be ≥ 1".into()));
        }
        if study.categories.is_empty() {
            return Err(ConfigError::Invalid("at least one category is required".into()));
        }
        study
            .layout()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let (min_active, max_active) = study.activity_bounds(&self.planner);
        if study.mode == StudyMode::Grid && max_active < min_active {
            return Err(ConfigError::Invalid(format!(
                "max_active ({max_active}) < min_active ({min_active}); \
                 increase categories or relax settings"
            )));
        }
        if self.planner.min_exposure == 0 {
            return Err(ConfigError::Invalid("min_exposure must be ≥ 1".into()));
        }
        if self.planner.absence_ratio < 0.0 || !self.planner.absence_ratio.is_finite() {
            return Err(ConfigError::Invalid("absence_ratio must be finite and ≥ 0".into()));
        }
        if !(self.planner.t_ratio.is_finite() && self.planner.t_ratio > 0.0) {
            return Err(ConfigError::Invalid("t_ratio must be finite and > 0".into()));
        }
        if let ExposurePolicy::Soft { tolerance_cv } = self.planner.exposure {
            if !(tolerance_cv.is_finite() && tolerance_cv >= 0.0) {
                return Err(ConfigError::Invalid("tolerance_cv must be finite and ≥ 0".into()));
            }
        }
        if !(0.0..=1.0).contains(&self.builder.widen) {
            return Err(ConfigError::Invalid("widen must lie in [0, 1]".into()));
        }
        if self.builder.restarts == 0 || self.builder.swap_tries == 0 {
            return Err(ConfigError::Invalid("builder budgets must be ≥ 1".into()));
        }
        let gate = &self.gate;
        if gate.random_y == 0 {
            return Err(ConfigError::Invalid("random_y must be ≥ 1".into()));
        }
        for (name, value) in [
            ("kappa_max", gate.kappa_max),
            ("rank_tol", gate.rank_tol),
            ("ls_tol", gate.ls_tol),
            ("min_tolerance", gate.min_tolerance),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!("{name} must be finite and > 0")));
            }
        }
        Ok(())
    }

    /// Output directory with environment variables expanded.
    pub fn output_dir(&self) -> PathBuf {
        expand_path(&self.output.dir)
    }

    /// Checkpoint directory with environment variables expanded.
    pub fn checkpoint_dir(&self) -> Option<PathBuf> {
        self.output.checkpoint_dir.as_deref().map(expand_path)
    }
}

fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(expand_env_vars(&path.to_string_lossy()))
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return s.to_string();
    };

    let mut result = s.to_string();
    for cap in re.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Turn a project name into a file-name-safe slug.
pub fn sanitize_slug(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    let collapsed = match regex::Regex::new(r"\s+") {
        Ok(re) => re.replace_all(&lowered, "_").into_owned(),
        Err(_) => lowered,
    };
    let slug: String = collapsed
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    if slug.is_empty() {
        "project".to_string()
    } else {
        slug
    }
}

/// Annotated example configuration printed by `conjoint example`.
pub const EXAMPLE_CONFIG: &str = r##"# conjoint configuration file

[study]
name = "Snack Study"
mode = "grid"          # "grid" or "layer"
max_active = 4         # grid only: cap on active categories per row
respondents = 50
# seed = 12345         # omit to draw one from OS entropy (logged)

[[study.categories]]
name = "Flavor"
elements = ["vanilla", "cocoa", "berry"]

[[study.categories]]
name = "Pack"
elements = 3           # generates Pack_1 .. Pack_3

[[study.categories]]
name = "Claim"
elements = 3

[[study.categories]]
name = "Price"
elements = 3

[planner]
min_exposure = 3
min_active = 2
safety_rows = 3
absence_ratio = 2.0
t_ratio = 1.10
capacity_slack = 1
exposure = { policy = "exact" }   # or { policy = "soft", tolerance_cv = 0.05 }

[builder]
restarts = 200
swap_tries = 8000
hard_cap_swap_tries = 30000
row_mix = "wide"       # or "dense"
widen = 0.40

[gate]
random_y = 5
kappa_max = 1e6
rank_tol = 1e-12
ls_tol = 1e-6
min_tolerance = 1e-6
enforce_unique_columns = true

[run]
threads = 0            # 0 = all cores
max_attempts = 5000    # 0 = retry until the gate passes
heartbeat_every = 20
on_preflight_failure = "degrade"   # or "abort"

[output]
dir = "output"
# checkpoint_dir = "${HOME}/.cache/conjoint"
"##;

/// Configuration errors.
///
/// Epistemic origin:
/// - B_i falsified: File not found, parse error
/// - I^B materialized: Values that contradict each other
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[study]
name = "Snack Study"
mode = "grid"
max_active = 4
respondents = 5
seed = 42

[[study.categories]]
name = "Flavor"
elements = 4

[[study.categories]]
name = "Pack"
elements = ["pouch", "box", "tin"]

[planner]
exposure = { policy = "soft", tolerance_cv = 0.1 }

[gate]
kappa_max = 1e5
"#;

    #[test]
    fn test_parse_sample_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.study.respondents, 5);
        assert_eq!(config.study.seed, Some(42));
        assert_eq!(config.gate.kappa_max, 1e5);
        assert_eq!(config.gate.random_y, 5);
        assert_eq!(config.builder.swap_tries, 8000);
        assert_eq!(
            config.planner.exposure,
            ExposurePolicy::Soft { tolerance_cv: 0.1 }
        );

        let layout = config.study.layout().unwrap();
        assert_eq!(layout.sizes(), vec![4, 3]);
        assert_eq!(layout.categories()[1].elements[0], "pouch");
        config.validate().unwrap();
    }

    #[test]
    fn test_example_config_is_valid() {
        let config: Config = toml::from_str(EXAMPLE_CONFIG).unwrap();
        config.validate().unwrap();
        assert_eq!(config.study.categories.len(), 4);
        assert_eq!(config.run.max_attempts, 5000);
        assert_eq!(config.builder.row_mix, RowMixMode::Wide);
    }

    #[test]
    fn test_activity_bounds() {
        let study = StudyConfig::new("s", StudyMode::Grid, 1)
            .with_category("A", 3)
            .with_category("B", 3)
            .with_category("C", 3);
        assert_eq!(study.activity_bounds(&PlannerConfig::default()), (2, 3));

        let layer = StudyConfig {
            mode: StudyMode::Layer,
            ..study
        };
        assert_eq!(layer.activity_bounds(&PlannerConfig::default()), (3, 3));
    }

    #[test]
    fn test_validate_rejects_cap_below_min_active() {
        let mut study = StudyConfig::new("s", StudyMode::Grid, 1)
            .with_category("A", 3)
            .with_category("B", 3);
        study.max_active = 1;
        let config = Config::new(study);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_expand_env_vars_leaves_unknown() {
        std::env::set_var("CONJOINT_TEST_DIR", "/tmp/x");
        assert_eq!(expand_env_vars("${CONJOINT_TEST_DIR}/out"), "/tmp/x/out");
        assert_eq!(
            expand_env_vars("${CONJOINT_SURELY_UNSET_VAR}/out"),
            "${CONJOINT_SURELY_UNSET_VAR}/out"
        );
    }

    #[test]
    fn test_sanitize_slug() {
        assert_eq!(sanitize_slug("  Snack Study 2 "), "snack_study_2");
        assert_eq!(sanitize_slug("!!!"), "project");
    }
}
