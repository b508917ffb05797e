//! Engine configuration: slab style, border group, user cutoff, ghost
//! velocity, grid pinning, and NUMA placement settings.

use std::fs;

use serde::{Deserialize, Serialize};

use crate::error::CommError;

/// Slab-selection style for ghost acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CommStyle {
    /// One slab geometry from the maximum cutoff, shared by all types.
    #[default]
    Uniform,
    /// Per-type slab geometry from per-type cutoffs.
    Stratified,
}

/// Per-engine-instance communication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommConfig {
    /// Slab-selection style.
    #[serde(default)]
    pub style: CommStyle,
    /// Restrict sent owned particles to this named group; must match the
    /// container's first group.
    #[serde(default)]
    pub border_group: Option<String>,
    /// Floor for the ghost radius beyond the neighbor cutoff.
    #[serde(default)]
    pub ghost_cutoff: f64,
    /// Whether velocity is packed with positions for ghosts.
    #[serde(default)]
    pub ghost_velocity: bool,
    /// User-pinned grid dimensions; 0 means "choose".
    #[serde(default)]
    pub grid_hint: [usize; 3],
    /// NUMA domains per node; 0 disables NUMA-aware placement.
    #[serde(default)]
    pub numa_domains: usize,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            style: CommStyle::Uniform,
            border_group: None,
            ghost_cutoff: 0.0,
            ghost_velocity: false,
            grid_hint: [0; 3],
            numa_domains: 0,
        }
    }
}

impl CommConfig {
    /// Load settings from a JSON file.
    pub fn load(path: &str) -> Result<Self, CommError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| CommError::Config(format!("failed to read {path}: {e}")))?;
        let config: CommConfig = serde_json::from_str(&contents)
            .map_err(|e| CommError::Config(format!("failed to parse {path}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse the token form of the settings surface:
    /// `<uniform|stratified> [group <name>] [cutoff <v>] [ghost_velocity <yes|no>]`.
    pub fn parse_tokens(args: &[&str]) -> Result<Self, CommError> {
        let mut cfg = Self::default();
        let mut iter = args.iter();

        let style = iter
            .next()
            .ok_or_else(|| CommError::UnknownToken("<missing style>".into()))?;
        cfg.style = match *style {
            "uniform" => CommStyle::Uniform,
            "stratified" => CommStyle::Stratified,
            other => return Err(CommError::UnknownToken(other.into())),
        };

        while let Some(key) = iter.next() {
            let value = iter
                .next()
                .ok_or_else(|| CommError::UnknownToken(format!("{key} <missing value>")))?;
            match *key {
                "group" => cfg.border_group = Some((*value).to_string()),
                "cutoff" => {
                    let v: f64 = value
                        .parse()
                        .map_err(|_| CommError::UnknownToken((*value).into()))?;
                    if v < 0.0 {
                        return Err(CommError::InvalidCutoff(v));
                    }
                    cfg.ghost_cutoff = v;
                }
                "ghost_velocity" => {
                    cfg.ghost_velocity = match *value {
                        "yes" => true,
                        "no" => false,
                        other => return Err(CommError::UnknownToken(other.into())),
                    };
                }
                other => return Err(CommError::UnknownToken(other.into())),
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<(), CommError> {
        if !self.ghost_cutoff.is_finite() || self.ghost_cutoff < 0.0 {
            return Err(CommError::InvalidCutoff(self.ghost_cutoff));
        }
        Ok(())
    }
}
