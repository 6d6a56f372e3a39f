use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Tokenizer used for lore token counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    #[default]
    O200kBase,
    Cl100kBase,
    /// Character-based estimate, no BPE tables required.
    Heuristic,
}

impl FromStr for TokenizerKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "o200k_base" | "o200k" => Ok(Self::O200kBase),
            "cl100k_base" | "cl100k" => Ok(Self::Cl100kBase),
            "heuristic" => Ok(Self::Heuristic),
            other => Err(format!("unknown tokenizer: {other}")),
        }
    }
}

/// Description-relative lore placements selected by `@@before_desc`,
/// `@@after_desc`, `@@personality` and `@@scenario`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionTag {
    BeforeDesc,
    AfterDesc,
    Personality,
    Scenario,
}

impl PositionTag {
    pub fn from_decorator(name: &str) -> Option<Self> {
        match name {
            "before_desc" => Some(Self::BeforeDesc),
            "after_desc" => Some(Self::AfterDesc),
            "personality" => Some(Self::Personality),
            "scenario" => Some(Self::Scenario),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeDesc => "before_desc",
            Self::AfterDesc => "after_desc",
            Self::Personality => "personality",
            Self::Scenario => "scenario",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Before,
    After,
}

/// Inserts next to the first message whose text contains `marker`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorRule {
    pub marker: String,
    pub placement: Placement,
}

impl AnchorRule {
    pub fn new(marker: impl Into<String>, placement: Placement) -> Self {
        Self {
            marker: marker.into(),
            placement,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorConfig {
    pub before_desc: AnchorRule,
    pub after_desc: AnchorRule,
    pub personality: AnchorRule,
    pub scenario: AnchorRule,
}

impl AnchorConfig {
    pub fn rule(&self, tag: PositionTag) -> &AnchorRule {
        match tag {
            PositionTag::BeforeDesc => &self.before_desc,
            PositionTag::AfterDesc => &self.after_desc,
            PositionTag::Personality => &self.personality,
            PositionTag::Scenario => &self.scenario,
        }
    }
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            before_desc: AnchorRule::new("{{char.description}}", Placement::Before),
            after_desc: AnchorRule::new("{{char.description}}", Placement::After),
            personality: AnchorRule::new("{{char.personality}}", Placement::After),
            scenario: AnchorRule::new("{{char.scenario}}", Placement::After),
        }
    }
}

fn default_max_recursion_depth() -> usize {
    16
}

fn default_true() -> bool {
    true
}

/// Settings for the context builder and lore scanning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scan window used when a lorebook leaves it unset. `None` scans everything.
    #[serde(default)]
    pub default_scan_depth: Option<usize>,
    /// Upper bound on recursive lore passes.
    #[serde(default = "default_max_recursion_depth")]
    pub max_recursion_depth: usize,
    #[serde(default)]
    pub tokenizer: TokenizerKind,
    #[serde(default = "default_true")]
    pub squash_system_messages: bool,
    #[serde(default)]
    pub anchors: AnchorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_scan_depth: None,
            max_recursion_depth: default_max_recursion_depth(),
            tokenizer: TokenizerKind::default(),
            squash_system_messages: true,
            anchors: AnchorConfig::default(),
        }
    }
}

const CONFIG_FILE_PATH: &str = "monogatari.toml";

fn monogatari_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".monogatari")
}

fn monogatari_config_json_path() -> PathBuf {
    monogatari_dir().join("config.json")
}

fn parse_bool_env(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

impl EngineConfig {
    /// Load from `~/.monogatari/config.json`, else `./monogatari.toml`, else
    /// defaults, then apply `MONOGATARI_*` environment overrides.
    pub fn load() -> Self {
        let mut config = Self::from_file(&monogatari_config_json_path())
            .or_else(|| Self::from_file(Path::new(CONFIG_FILE_PATH)))
            .unwrap_or_default();
        config.apply_env(|name| std::env::var(name).ok());
        config
    }

    /// Read a `.json` or `.toml` config file. Unreadable or malformed files yield `None`.
    pub fn from_file(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        let parsed = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str::<Self>(&content).map_err(|e| e.to_string())
        } else {
            toml::from_str::<Self>(&content).map_err(|e| e.to_string())
        };
        match parsed {
            Ok(config) => Some(config),
            Err(error) => {
                log::warn!("ignoring malformed config {}: {}", path.display(), error);
                None
            }
        }
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(depth) = lookup("MONOGATARI_SCAN_DEPTH") {
            match depth.trim() {
                "-1" | "unlimited" => self.default_scan_depth = None,
                value => match value.parse() {
                    Ok(depth) => self.default_scan_depth = Some(depth),
                    Err(_) => log::warn!(
                        "invalid MONOGATARI_SCAN_DEPTH {value:?}, keeping {:?}",
                        self.default_scan_depth
                    ),
                },
            }
        }
        if let Some(depth) = lookup("MONOGATARI_MAX_RECURSION") {
            match depth.trim().parse() {
                Ok(depth) => self.max_recursion_depth = depth,
                Err(_) => log::warn!(
                    "invalid MONOGATARI_MAX_RECURSION {depth:?}, keeping {}",
                    self.max_recursion_depth
                ),
            }
        }
        if let Some(kind) = lookup("MONOGATARI_TOKENIZER") {
            match kind.parse() {
                Ok(kind) => self.tokenizer = kind,
                Err(error) => log::warn!("{error}, keeping {:?}", self.tokenizer),
            }
        }
        if let Some(squash) = lookup("MONOGATARI_SQUASH_SYSTEM") {
            self.squash_system_messages = parse_bool_env(&squash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parse_bool_env_true_values() {
        for value in ["1", "true", "TRUE", " yes ", "Y", "on"] {
            assert!(parse_bool_env(value), "value {value:?} should be true");
        }
    }

    #[test]
    fn parse_bool_env_false_values() {
        for value in ["0", "false", "no", "off", "", "  "] {
            assert!(!parse_bool_env(value), "value {value:?} should be false");
        }
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("MONOGATARI_SCAN_DEPTH", "5"),
            ("MONOGATARI_TOKENIZER", "heuristic"),
            ("MONOGATARI_SQUASH_SYSTEM", "off"),
        ]);
        let mut config = EngineConfig::default();
        config.apply_env(|name| env.get(name).map(|value| value.to_string()));

        assert_eq!(config.default_scan_depth, Some(5));
        assert_eq!(config.tokenizer, TokenizerKind::Heuristic);
        assert!(!config.squash_system_messages);
        assert_eq!(config.max_recursion_depth, 16);
    }

    #[test]
    fn invalid_env_values_keep_configured_defaults() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("MONOGATARI_SCAN_DEPTH", "deep"),
            ("MONOGATARI_MAX_RECURSION", "-4"),
        ]);
        let mut config = EngineConfig {
            default_scan_depth: Some(3),
            ..EngineConfig::default()
        };
        config.apply_env(|name| env.get(name).map(|value| value.to_string()));

        assert_eq!(config.default_scan_depth, Some(3));
        assert_eq!(config.max_recursion_depth, 16);

        config.apply_env(|name| (name == "MONOGATARI_SCAN_DEPTH").then(|| "unlimited".to_string()));
        assert_eq!(config.default_scan_depth, None);
    }

    #[test]
    fn reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monogatari.toml");
        std::fs::write(
            &path,
            "max_recursion_depth = 3\ntokenizer = \"cl100k_base\"\n\n[anchors.scenario]\nmarker = \"{{char.scenario}}\"\nplacement = \"before\"\n\n[anchors.before_desc]\nmarker = \"{{char.description}}\"\nplacement = \"before\"\n\n[anchors.after_desc]\nmarker = \"{{char.description}}\"\nplacement = \"after\"\n\n[anchors.personality]\nmarker = \"{{char.personality}}\"\nplacement = \"after\"\n",
        )
        .unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.max_recursion_depth, 3);
        assert_eq!(config.tokenizer, TokenizerKind::Cl100kBase);
        assert_eq!(config.anchors.scenario.placement, Placement::Before);
    }

    #[test]
    fn malformed_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(EngineConfig::from_file(&path).is_none());
    }
}
