//! The YAML policy file and its resolution into runtime settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::error::ConfigError;
use super::parse::{parse_duration, parse_start_time};
use crate::domain::classifier::{ResourcePercentages, SparedThresholds};
use crate::domain::eviction::{PinnedPeerPolicy, PolicyOptions};
use crate::domain::handlers::DEFAULT_RECOVERY_GRACE;
use crate::domain::trigger_gate::{TimeWindow, TriggerMode};

pub const CURRENT_API_VERSION: &str = "descheduler.io/v1alpha1";
pub const DEFAULT_CONFIG_FILE: &str = ".descheduler.yaml";

const DEFAULT_MIN_SPARED: ResourcePercentages = ResourcePercentages {
    cpu: 20.0,
    memory: 20.0,
    pods: 10.0,
};
const DEFAULT_MAX_SPARED: ResourcePercentages = ResourcePercentages::uniform(80.0);
const DEFAULT_MAX_EVICT_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyFile {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub spec: PolicySpec,
}

impl Default for PolicyFile {
    fn default() -> Self {
        Self {
            api_version: CURRENT_API_VERSION.to_string(),
            spec: PolicySpec::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicySpec {
    pub dry_run: bool,
    pub triggers: TriggersSpec,
    pub rules: RulesSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriggersSpec {
    #[serde(alias = "on")]
    pub mode: String,
    pub prevent_all_replicas_on_one_node: bool,
    pub min_spared_percentage: PercentagesSpec,
    pub max_spared_percentage: PercentagesSpec,
    pub time: TimeSpec,
    /// Periodic re-evaluation in event mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

impl Default for TriggersSpec {
    fn default() -> Self {
        Self {
            mode: TriggerMode::Event.to_string(),
            prevent_all_replicas_on_one_node: true,
            min_spared_percentage: PercentagesSpec::default(),
            max_spared_percentage: PercentagesSpec::default(),
            time: TimeSpec::default(),
            interval: None,
        }
    }
}

/// Per-resource percentages; missing entries take the threshold's default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PercentagesSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pods: Option<f64>,
}

impl PercentagesSpec {
    fn filled(&self, defaults: ResourcePercentages) -> Self {
        Self {
            cpu: Some(self.cpu.unwrap_or(defaults.cpu)),
            memory: Some(self.memory.unwrap_or(defaults.memory)),
            pods: Some(self.pods.unwrap_or(defaults.pods)),
        }
    }

    fn resolve(
        &self,
        field: &str,
        defaults: ResourcePercentages,
    ) -> Result<ResourcePercentages, Report<ConfigError>> {
        let check = |resource: &str, value: Option<f64>, default: f64| {
            let value = value.unwrap_or(default);
            if (0.0..=100.0).contains(&value) {
                Ok(value)
            } else {
                Err(Report::new(ConfigError::InvalidPercentage {
                    field: format!("{field}.{resource}"),
                    value,
                }))
            }
        };
        Ok(ResourcePercentages {
            cpu: check("cpu", self.cpu, defaults.cpu)?,
            memory: check("memory", self.memory, defaults.memory)?,
            pods: check("pods", self.pods, defaults.pods)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSpec {
    pub from: String,
    #[serde(rename = "for")]
    pub duration: String,
}

impl Default for TimeSpec {
    fn default() -> Self {
        Self {
            from: "23:00".to_string(),
            duration: "1h".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RulesSpec {
    pub hard_eviction: bool,
    pub max_evict_size: usize,
    pub pinned_peer: PinnedPeerPolicy,
    /// Empty means every namespace.
    pub working_namespaces: Vec<String>,
    /// Label selector restricting the watched nodes.
    pub node_selector: String,
    pub recovery_grace_period: String,
}

impl Default for RulesSpec {
    fn default() -> Self {
        Self {
            hard_eviction: false,
            max_evict_size: DEFAULT_MAX_EVICT_SIZE,
            pinned_peer: PinnedPeerPolicy::default(),
            working_namespaces: Vec::new(),
            node_selector: String::new(),
            recovery_grace_period: "5s".to_string(),
        }
    }
}

/// Everything the controller needs, validated.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub dry_run: bool,
    pub mode: TriggerMode,
    pub window: TimeWindow,
    pub interval: Option<Duration>,
    pub thresholds: SparedThresholds,
    pub policy: PolicyOptions,
    pub max_evict: usize,
    pub recovery_grace: Duration,
    pub node_selector: Option<String>,
}

fn duration_field(field: &'static str, value: &str) -> Result<Duration, Report<ConfigError>> {
    parse_duration(value).ok_or_else(|| {
        Report::new(ConfigError::InvalidDuration {
            field,
            value: value.to_string(),
        })
    })
}

impl PolicySpec {
    /// Copy with every default spelled out, for display.
    pub fn normalized(&self) -> Self {
        let mut spec = self.clone();
        spec.triggers.min_spared_percentage =
            spec.triggers.min_spared_percentage.filled(DEFAULT_MIN_SPARED);
        spec.triggers.max_spared_percentage =
            spec.triggers.max_spared_percentage.filled(DEFAULT_MAX_SPARED);
        spec
    }

    pub fn resolve(&self) -> Result<Settings, Report<ConfigError>> {
        let triggers = &self.triggers;
        let rules = &self.rules;

        let mode = triggers.mode.parse::<TriggerMode>().change_context_lazy(|| {
            ConfigError::InvalidMode {
                value: triggers.mode.clone(),
            }
        })?;
        let start: NaiveTime = parse_start_time(&triggers.time.from).ok_or_else(|| {
            Report::new(ConfigError::InvalidStartTime {
                value: triggers.time.from.clone(),
            })
        })?;
        let window = TimeWindow {
            start,
            duration: duration_field("spec.triggers.time.for", &triggers.time.duration)?,
        };
        let interval = triggers
            .interval
            .as_deref()
            .map(|value| duration_field("spec.triggers.interval", value))
            .transpose()?
            .filter(|interval| !interval.is_zero());

        let thresholds = SparedThresholds {
            min_spared: triggers
                .min_spared_percentage
                .resolve("spec.triggers.minSparedPercentage", DEFAULT_MIN_SPARED)?,
            max_spared: triggers
                .max_spared_percentage
                .resolve("spec.triggers.maxSparedPercentage", DEFAULT_MAX_SPARED)?,
        };
        if rules.max_evict_size == 0 {
            return Err(Report::new(ConfigError::InvalidMaxEvictSize));
        }
        let node_selector = Some(rules.node_selector.trim())
            .filter(|selector| !selector.is_empty())
            .map(str::to_string);

        Ok(Settings {
            dry_run: self.dry_run,
            mode,
            window,
            interval,
            thresholds,
            policy: PolicyOptions {
                prevent_co_location: triggers.prevent_all_replicas_on_one_node,
                hard_eviction: rules.hard_eviction,
                pinned_peer: rules.pinned_peer,
                working_namespaces: rules.working_namespaces.clone(),
            },
            max_evict: rules.max_evict_size,
            recovery_grace: if rules.recovery_grace_period.trim().is_empty() {
                DEFAULT_RECOVERY_GRACE
            } else {
                duration_field("spec.rules.recoveryGracePeriod", &rules.recovery_grace_period)?
            },
            node_selector,
        })
    }
}

impl PolicyFile {
    /// Parses a policy document. A document written for another API version
    /// is ignored in favor of the defaults.
    pub fn from_yaml(content: &str, path: &Path) -> Result<Self, Report<ConfigError>> {
        let file: Self = serde_yaml::from_str(content).change_context_lazy(|| {
            ConfigError::Malformed {
                path: path.to_path_buf(),
            }
        })?;
        if file.api_version != CURRENT_API_VERSION {
            warn!(
                "Unexpected apiVersion {:?} in config file {}, expecting {CURRENT_API_VERSION}; using the default config",
                file.api_version,
                path.display()
            );
            return Ok(Self::default());
        }
        Ok(file)
    }
}

/// `$HOME/.descheduler.yaml`, when a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(DEFAULT_CONFIG_FILE))
}

/// Loads the policy from `path`, or from the home directory when no path is
/// given. Only an explicitly named file has to exist.
pub fn load_policy(path: Option<&Path>) -> Result<PolicyFile, Report<ConfigError>> {
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => match default_config_path() {
            Some(path) => (path, false),
            None => {
                info!("No home directory, using the default config");
                return Ok(PolicyFile::default());
            }
        },
    };

    if !required && !path.exists() {
        info!("No config file at {}, using the default config", path.display());
        return Ok(PolicyFile::default());
    }

    let content = std::fs::read_to_string(&path)
        .change_context_lazy(|| ConfigError::Unreadable { path: path.clone() })?;
    info!("Using config file: {}", path.display());
    PolicyFile::from_yaml(&content, &path)
}
