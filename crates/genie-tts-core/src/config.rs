//! Configuration loading, validation, and persistence.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TtsError};
use crate::types::SessionKey;

/// Top-level Genie TTS plugin configuration.
///
/// Keys are flat and snake_case so the host's key/value config object maps
/// onto it directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub server_host: String,
    pub server_port: u16,
    pub character_name: String,
    pub onnx_model_dir: String,
    pub ref_audio_path: String,
    pub ref_audio_text: String,

    #[serde(flatten)]
    pub policy: PolicyConfig,

    /// Unload the remote model after `auto_unload_timeout` idle seconds.
    pub auto_unload_enabled: bool,
    pub auto_unload_timeout: u64,
    pub idle_check_interval_secs: u64,
    /// Upper bound on how long a request waits for an on-demand reload.
    pub load_wait_secs: u64,

    /// Total synthesis attempts before giving up.
    pub retry_attempts: u32,
    pub split_sentence: bool,

    pub trim_silence: bool,
    pub silence_threshold_db: f64,
    pub trim_margin_ms: u64,

    /// Seconds a generated file is kept so the host can transmit it.
    pub cleanup_delay_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<String>,

    pub send_text_with_audio: bool,
    pub show_references: bool,
    pub translation_provider_id: String,
    pub translation_language: String,

    /// Text-completion providers available for translation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<ProviderConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".into(),
            server_port: 9999,
            character_name: "misono_mika".into(),
            onnx_model_dir: "/models/misono_mika".into(),
            ref_audio_path: "/models/misono_mika/prompt.wav".into(),
            ref_audio_text: String::new(),
            policy: PolicyConfig::default(),
            auto_unload_enabled: true,
            auto_unload_timeout: 600,
            idle_check_interval_secs: 60,
            load_wait_secs: 10,
            retry_attempts: 3,
            split_sentence: true,
            trim_silence: true,
            silence_threshold_db: -40.0,
            trim_margin_ms: 100,
            cleanup_delay_secs: 10,
            temp_dir: None,
            send_text_with_audio: false,
            show_references: false,
            translation_provider_id: String::new(),
            translation_language: "Simplified Chinese".into(),
            providers: Vec::new(),
            default_provider: None,
            logging: None,
        }
    }
}

/// Session gating policy. Mutated only by admin commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// `true`: blacklist mode (everyone except `disabled_sessions`).
    /// `false`: whitelist mode (only `enabled_sessions`).
    pub global_enable: bool,
    pub enabled_sessions: BTreeSet<SessionKey>,
    pub disabled_sessions: BTreeSet<SessionKey>,
    /// Chance in [0, 1] that an eligible reply is voiced.
    pub prob: f64,
    /// Maximum characters; 0 = unlimited.
    pub text_limit: usize,
    /// Minimum seconds between two syntheses in one session; 0 = off.
    pub cooldown: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            global_enable: true,
            enabled_sessions: BTreeSet::new(),
            disabled_sessions: BTreeSet::new(),
            prob: 1.0,
            text_limit: 200,
            cooldown: 0,
        }
    }
}

impl PolicyConfig {
    /// Turn voice replies on for a session under the current mode.
    pub fn enable_session(&mut self, key: &SessionKey) {
        if self.global_enable {
            self.disabled_sessions.remove(key);
        } else {
            self.enabled_sessions.insert(key.clone());
        }
    }

    /// Turn voice replies off for a session under the current mode.
    pub fn disable_session(&mut self, key: &SessionKey) {
        if self.global_enable {
            self.disabled_sessions.insert(key.clone());
        } else {
            self.enabled_sessions.remove(key);
        }
    }
}

/// An OpenAI-compatible text-completion endpoint used for translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    pub model: String,
}

impl ProviderConfig {
    /// Resolve the API key: check `api_key` field first, then `api_key_env` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "genie_tts_engine=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

static ENV_VAR_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("static pattern"));

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

impl TtsConfig {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        json5::from_str(&substituted)
            .map_err(|e| TtsError::Config(e.to_string()))
    }

    /// Default config file location: `~/.genie_tts/config.json`.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Base URL of the remote TTS server.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.server_host, self.server_port)
    }

    /// Directory holding transient audio files.
    pub fn temp_dir_path(&self) -> PathBuf {
        self.temp_dir
            .as_ref()
            .map(|d| PathBuf::from(shellexpand::tilde(d).as_ref()))
            .unwrap_or_else(|| data_dir().join("temp_audio"))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.auto_unload_timeout)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_secs(self.idle_check_interval_secs.max(1))
    }

    pub fn load_wait(&self) -> Duration {
        Duration::from_secs(self.load_wait_secs)
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_secs(self.cleanup_delay_secs)
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if !self.policy.prob.is_finite() || !(0.0..=1.0).contains(&self.policy.prob) {
            errors.push(format!(
                "prob must be within [0, 1], got {}",
                self.policy.prob
            ));
        }

        if self.server_port == 0 {
            errors.push("server_port cannot be 0".to_string());
        }

        if self.character_name.trim().is_empty() {
            errors.push("character_name is empty".to_string());
        }

        if self.auto_unload_enabled && self.auto_unload_timeout == 0 {
            warnings.push(
                "auto_unload_timeout is 0; the model will be unloaded on every idle check"
                    .to_string(),
            );
        }

        if self.retry_attempts == 0 {
            warnings.push("retry_attempts is 0, using 1".to_string());
        }

        if self.ref_audio_text.is_empty() {
            warnings.push("ref_audio_text is empty".to_string());
        }

        if self.send_text_with_audio && self.providers.is_empty() {
            warnings.push(
                "send_text_with_audio is set but no translation providers are configured"
                    .to_string(),
            );
        }

        (warnings, errors)
    }
}

/// Base directory for Genie TTS data: `~/.genie_tts/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".genie_tts")
}

/// Host-supplied storage that admin policy mutations are written back to.
pub trait ConfigStore: Send + Sync {
    fn save_policy(&self, policy: &PolicyConfig) -> Result<()>;
}

/// Persists policy changes into the JSON5 config file.
///
/// Only the policy keys are rewritten. Every other key keeps its raw,
/// unexpanded value, so `${ENV_VAR}` references never reach the disk as
/// secrets. Comments are not preserved.
pub struct JsonFileConfigStore {
    path: PathBuf,
}

impl JsonFileConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        if !self.path.exists() {
            return Ok(serde_json::Map::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let value = json5::from_str(&raw)
            .map_err(|e| TtsError::Config(e.to_string()))?;
        match value {
            serde_json::Value::Object(fields) => Ok(fields),
            _ => Err(TtsError::Config(format!(
                "{} does not hold a JSON object",
                self.path.display()
            ))),
        }
    }
}

impl ConfigStore for JsonFileConfigStore {
    fn save_policy(&self, policy: &PolicyConfig) -> Result<()> {
        let mut document = self.read_document()?;
        if let serde_json::Value::Object(fields) = serde_json::to_value(policy)? {
            document.extend(fields);
        }
        write_atomic(&self.path, &serde_json::to_string_pretty(&document)?)
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Keeps every saved policy in memory.
#[derive(Default)]
pub struct MemoryConfigStore {
    saved: Mutex<Vec<PolicyConfig>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<PolicyConfig> {
        self.saved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    pub fn save_count(&self) -> usize {
        self.saved.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn save_policy(&self, policy: &PolicyConfig) -> Result<()> {
        self.saved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(policy.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, variable name unique to this test
        unsafe { std::env::set_var("GENIE_TTS_TEST_HOST", "10.0.0.5") };
        let result = substitute_env_vars("host=${GENIE_TTS_TEST_HOST}");
        assert_eq!(result, "host=10.0.0.5");
        unsafe { std::env::remove_var("GENIE_TTS_TEST_HOST") };
    }

    #[test]
    fn test_env_var_missing() {
        let result = substitute_env_vars("x=${GENIE_TTS_DEFINITELY_MISSING}");
        assert_eq!(result, "x=");
    }

    #[test]
    fn test_default_config() {
        let config = TtsConfig::default();
        assert_eq!(config.base_url(), "http://127.0.0.1:9999");
        assert!(config.policy.global_enable);
        assert_eq!(config.policy.prob, 1.0);
        assert_eq!(config.policy.text_limit, 200);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.auto_unload_timeout, 600);
        let (_, errors) = config.validate();
        assert!(errors.is_empty());
    }

    #[test]
    fn test_flat_keys_from_json5() {
        let raw = r#"{
            // host-managed keys
            server_host: "tts.local",
            server_port: 8000,
            global_enable: false,
            prob: 0.5,
            text_limit: 0,
            cooldown: 30,
            enabled_sessions: ["group_1"],
            auto_unload_enabled: false,
        }"#;
        let config: TtsConfig = json5::from_str(raw).unwrap();
        assert_eq!(config.base_url(), "http://tts.local:8000");
        assert!(!config.policy.global_enable);
        assert_eq!(config.policy.prob, 0.5);
        assert_eq!(config.policy.text_limit, 0);
        assert_eq!(config.policy.cooldown, 30);
        assert!(
            config
                .policy
                .enabled_sessions
                .contains(&SessionKey::from("group_1"))
        );
        assert!(!config.auto_unload_enabled);
        assert_eq!(config.character_name, "misono_mika");
    }

    #[test]
    fn test_policy_save_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let store = JsonFileConfigStore::new(path.clone());

        let mut policy = PolicyConfig::default();
        policy.disable_session(&SessionKey::user("5"));
        policy.cooldown = 12;
        store.save_policy(&policy).unwrap();

        let loaded = TtsConfig::load(&path).unwrap();
        assert_eq!(loaded.policy, policy);
        assert_eq!(loaded.character_name, TtsConfig::default().character_name);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_policy_save_keeps_env_references() {
        // SAFETY: test-only, variable name unique to this test
        unsafe { std::env::set_var("GENIE_TTS_TEST_SECRET", "sk-live-123") };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                // translation
                server_port: 8000,
                providers: [{
                    id: "deepseek",
                    base_url: "https://api.deepseek.com",
                    api_key: "${GENIE_TTS_TEST_SECRET}",
                    model: "deepseek-chat",
                }],
            }"#,
        )
        .unwrap();

        let config = TtsConfig::load(&path).unwrap();
        assert_eq!(config.providers[0].api_key.as_deref(), Some("sk-live-123"));

        let mut policy = config.policy.clone();
        policy.disable_session(&SessionKey::user("7"));
        let store = JsonFileConfigStore::new(path.clone());
        store.save_policy(&policy).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("${GENIE_TTS_TEST_SECRET}"));
        assert!(!raw.contains("sk-live-123"));

        let reloaded = TtsConfig::load(&path).unwrap();
        assert_eq!(reloaded.server_port, 8000);
        assert_eq!(reloaded.providers[0].api_key.as_deref(), Some("sk-live-123"));
        assert!(reloaded.policy.disabled_sessions.contains(&SessionKey::user("7")));
        unsafe { std::env::remove_var("GENIE_TTS_TEST_SECRET") };
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = TtsConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, TtsConfig::default());
    }

    #[test]
    fn test_enable_disable_follow_mode() {
        let key = SessionKey::user("1");
        let mut policy = PolicyConfig::default();

        policy.disable_session(&key);
        assert!(policy.disabled_sessions.contains(&key));
        policy.enable_session(&key);
        assert!(!policy.disabled_sessions.contains(&key));

        policy.global_enable = false;
        policy.enable_session(&key);
        assert!(policy.enabled_sessions.contains(&key));
        policy.disable_session(&key);
        assert!(!policy.enabled_sessions.contains(&key));
    }

    #[test]
    fn test_validate_bad_probability() {
        let mut config = TtsConfig::default();
        config.policy.prob = 1.5;
        let (_, errors) = config.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("prob"));
    }

    #[test]
    fn test_validate_rejects_nan_probability() {
        let config: TtsConfig = json5::from_str("{ prob: NaN }").unwrap();
        assert!(config.policy.prob.is_nan());
        let (_, errors) = config.validate();
        assert!(errors.iter().any(|e| e.contains("prob")));
    }

    #[test]
    fn test_provider_resolve_api_key() {
        let provider = ProviderConfig {
            id: "openai".into(),
            base_url: "https://api.openai.com".into(),
            api_key: Some("direct".into()),
            api_key_env: None,
            model: "gpt-4o-mini".into(),
        };
        assert_eq!(provider.resolve_api_key().as_deref(), Some("direct"));
    }

    #[test]
    fn test_memory_store_records_saves() {
        let store = MemoryConfigStore::new();
        assert!(store.last().is_none());
        store.save_policy(&PolicyConfig::default()).unwrap();
        assert_eq!(store.save_count(), 1);
        assert!(store.last().is_some());
    }
}
