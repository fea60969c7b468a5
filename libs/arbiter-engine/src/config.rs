// Language configuration management for the Arbiter engine
use anyhow::{bail, Context, Result};
use arbiter_common::types::Language;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const DEFAULT_LANGUAGES_PATH: &str = "config/languages.json";

/// Hard bounds applied to every requested timeout
pub const MIN_TIMEOUT_MS: u64 = 1_000;
pub const MAX_TIMEOUT_MS: u64 = 60_000;

/// Argv templates for one language. Each element is one argument; the
/// placeholders `{source}`, `{workdir}` and `{binary}` are substituted per
/// argument and never passed through a shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageExecution {
    pub source_file: String,
    #[serde(default)]
    pub compile: Option<Vec<String>>,
    pub run: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    pub version: String,
    pub image: String,
    pub execution: LanguageExecution,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u32,
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f32,
    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,
    #[serde(default = "default_scratch_size_mb")]
    pub scratch_size_mb: u32,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_compile_timeout_ms")]
    pub compile_timeout_ms: u64,
    #[serde(default = "default_user")]
    pub user: String,
}

fn default_memory_limit_mb() -> u32 {
    512
}

fn default_cpu_limit() -> f32 {
    1.0
}

fn default_pids_limit() -> i64 {
    64
}

fn default_scratch_size_mb() -> u32 {
    64
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_compile_timeout_ms() -> u64 {
    30_000
}

fn default_user() -> String {
    "65534:65534".to_string()
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl LanguageConfig {
    /// Built-in recipe used when no languages.json is present
    pub fn builtin(language: Language) -> Self {
        let (version, image, execution) = match language {
            Language::Python => (
                "3.12",
                "python:3.12-slim",
                LanguageExecution {
                    source_file: "main.py".to_string(),
                    compile: None,
                    run: args(&["python3", "-u", "{source}"]),
                },
            ),
            Language::Cpp => (
                "17",
                "gcc:13",
                LanguageExecution {
                    source_file: "main.cpp".to_string(),
                    compile: Some(args(&[
                        "g++", "-std=c++17", "-O2", "-pipe", "-o", "{binary}", "{source}",
                    ])),
                    run: args(&["{binary}"]),
                },
            ),
        };

        Self {
            name: language.to_string(),
            version: version.to_string(),
            image: image.to_string(),
            execution,
            memory_limit_mb: default_memory_limit_mb(),
            cpu_limit: default_cpu_limit(),
            pids_limit: default_pids_limit(),
            scratch_size_mb: default_scratch_size_mb(),
            default_timeout_ms: default_timeout_ms(),
            compile_timeout_ms: default_compile_timeout_ms(),
            user: default_user(),
        }
    }

    /// Clamp a requested timeout (or this language's default) into the hard bounds
    pub fn effective_timeout_ms(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_timeout_ms)
            .clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageConfig>,
}

/// Language configuration manager
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<Language, LanguageConfig>,
}

impl LanguageConfigManager {
    /// Load language configurations from a languages.json file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let languages_json: LanguagesJson =
            serde_json::from_str(content).context("Failed to parse languages.json")?;

        let mut configs = HashMap::new();
        for lang in languages_json.languages {
            let language: Language = lang
                .name
                .parse()
                .with_context(|| format!("Unknown language '{}' in languages.json", lang.name))?;
            if lang.execution.run.is_empty() {
                bail!("Language '{}' has an empty run command", lang.name);
            }
            if lang.execution.compile.as_ref().is_some_and(|c| c.is_empty()) {
                bail!("Language '{}' has an empty compile command", lang.name);
            }
            configs.insert(language, lang);
        }

        if configs.is_empty() {
            bail!("No languages configured in languages.json");
        }

        Ok(Self { configs })
    }

    /// Built-in python and cpp recipes
    pub fn builtin() -> Self {
        let configs = Language::ALL
            .iter()
            .map(|lang| (*lang, LanguageConfig::builtin(*lang)))
            .collect();
        Self { configs }
    }

    /// Load from `ARBITER_LANGUAGES_CONFIG` (or config/languages.json),
    /// falling back to the built-in recipes when the default file is absent
    pub fn load_default() -> Result<Self> {
        match std::env::var("ARBITER_LANGUAGES_CONFIG") {
            Ok(path) => Self::load(Path::new(&path)),
            Err(_) => {
                let default_path = Path::new(DEFAULT_LANGUAGES_PATH);
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    Ok(Self::builtin())
                }
            }
        }
    }

    pub fn get_config(&self, language: &Language) -> Option<&LanguageConfig> {
        self.configs.get(language)
    }

    /// Configured languages in a stable order
    pub fn languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.configs.keys().copied().collect();
        languages.sort_by_key(|l| l.as_str());
        languages
    }
}

/// Engine-wide settings that are not per-language
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Cases of one submission run concurrently up to this bound; 1 means sequential
    pub max_parallel_cases: usize,
}

impl EngineSettings {
    pub fn from_env() -> Self {
        let max_parallel_cases = std::env::var("ARBITER_MAX_PARALLEL_CASES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1usize)
            .max(1);
        Self { max_parallel_cases }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_parallel_cases: 1,
        }
    }
}
