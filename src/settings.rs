use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;

/// How the subsystem reacts when an audit event cannot be written
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditFailureMode {
    /// Abort the triggering operation (fail closed)
    Strict,
    /// Log the failure through the fallback channel and let the
    /// triggering operation proceed (fail open)
    Lenient,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StepkeySettings {
    pub webauthn: WebAuthnSettings,
    pub challenge: ChallengeSettings,
    pub elevation: ElevationSettings,
    pub audit: AuditSettings,
    pub policy: PolicySettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebAuthnSettings {
    /// Relying party ID (domain, e.g. "example.com")
    pub rp_id: String,
    pub rp_name: String,
    /// Expected origin in client data (https:// except for localhost)
    pub rp_origin: String,
    /// "required", "preferred", "discouraged"
    pub user_verification: String,
    /// Ceremony timeout hint handed to clients, in seconds
    pub timeout_seconds: u64,
    /// Allow flagging credentials whose attested initial counter is zero
    /// as counter-exempt (stateless authenticators)
    pub allow_counter_exempt: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeSettings {
    /// Challenge validity window in seconds
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevationSettings {
    /// Elevation validity window in seconds
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// Events older than this many days are removed by cleanup
    pub retention_days: u32,
    pub failure_mode: AuditFailureMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicySettings {
    /// Glob-style resource patterns that require elevation even without
    /// an explicit policy record (e.g. "*/manage*")
    #[serde(default)]
    pub protected_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for WebAuthnSettings {
    fn default() -> Self {
        Self {
            rp_id: "localhost".to_string(),
            rp_name: "Stepkey".to_string(),
            rp_origin: "http://localhost:8080".to_string(),
            user_verification: "preferred".to_string(),
            timeout_seconds: 60,
            allow_counter_exempt: true,
        }
    }
}

impl Default for ChallengeSettings {
    fn default() -> Self {
        Self { ttl_seconds: 300 }
    }
}

impl Default for ElevationSettings {
    fn default() -> Self {
        Self { window_seconds: 900 }
    }
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            retention_days: 90,
            // The safer default for a compliance trail: an operation that
            // cannot be audited does not happen.
            failure_mode: AuditFailureMode::Strict,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl StepkeySettings {
    /// Load settings from configuration files and environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Settings file cannot be read or parsed
    /// - Logger initialization fails
    pub fn load() -> anyhow::Result<Self> {
        Self::initialize_environment()?;

        let mut settings = Self::load_base_settings()?;
        Self::apply_env_overrides(&mut settings);
        settings.validate().context("invalid settings")?;

        Ok(settings)
    }

    /// Load `.env` and initialize the logger
    ///
    /// # Errors
    ///
    /// Returns an error if logger initialization fails
    fn initialize_environment() -> anyhow::Result<()> {
        Self::load_env_file();
        env_logger::try_init().context("failed to initialize logger")?;
        Ok(())
    }

    /// Load base settings from TOML file(s) or use defaults
    /// Settings are loaded with the following priority (highest to lowest):
    /// 1. Environment variables (applied separately after loading base settings)
    /// 2. Settings.toml in `STEPKEY_SECRETS_DIR` (if specified and exists)
    /// 3. Settings.toml in current directory (if exists)
    /// 4. Default settings
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file cannot be read or TOML parsing fails
    fn load_base_settings() -> anyhow::Result<Self> {
        let mut settings = Self::default();

        let default_config_path = std::path::PathBuf::from("Settings.toml");
        if default_config_path.exists() {
            let toml_content = fs::read_to_string(&default_config_path)
                .with_context(|| format!("failed to read {}", default_config_path.display()))?;
            settings = basic_toml::from_str(&toml_content)
                .with_context(|| format!("failed to parse {}", default_config_path.display()))?;
            log::info!("Loaded base settings from {}", default_config_path.display());
        }

        if let Ok(secrets_dir) = std::env::var("STEPKEY_SECRETS_DIR") {
            let secrets_path = std::path::Path::new(&secrets_dir).join("Settings.toml");
            if secrets_path.exists() {
                let secrets_toml_content = fs::read_to_string(&secrets_path)
                    .with_context(|| format!("failed to read {}", secrets_path.display()))?;
                settings = basic_toml::from_str(&secrets_toml_content)
                    .with_context(|| format!("failed to parse {}", secrets_path.display()))?;
                log::info!("Overriding settings from {}", secrets_path.display());
            } else {
                log::info!(
                    "STEPKEY_SECRETS_DIR set but no Settings.toml found at: {}",
                    secrets_path.display()
                );
            }
        }

        Ok(settings)
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        Self::apply_webauthn_env_overrides(&mut settings.webauthn);
        Self::apply_challenge_env_overrides(&mut settings.challenge);
        Self::apply_elevation_env_overrides(&mut settings.elevation);
        Self::apply_audit_env_overrides(&mut settings.audit);
        Self::apply_logging_env_overrides(&mut settings.logging);
    }

    fn apply_webauthn_env_overrides(webauthn: &mut WebAuthnSettings) {
        if let Ok(rp_id) = std::env::var("STEPKEY_RP_ID") {
            webauthn.rp_id = rp_id;
        }
        if let Ok(rp_name) = std::env::var("STEPKEY_RP_NAME") {
            webauthn.rp_name = rp_name;
        }
        if let Ok(rp_origin) = std::env::var("STEPKEY_RP_ORIGIN") {
            webauthn.rp_origin = rp_origin;
        }
    }

    pub fn apply_challenge_env_overrides(challenge: &mut ChallengeSettings) {
        Self::apply_numeric_env_override("CHALLENGE_TTL_SECONDS", &mut challenge.ttl_seconds);
    }

    pub fn apply_elevation_env_overrides(elevation: &mut ElevationSettings) {
        Self::apply_numeric_env_override("ELEVATION_WINDOW_SECONDS", &mut elevation.window_seconds);
    }

    pub fn apply_audit_env_overrides(audit: &mut AuditSettings) {
        if let Ok(days_str) = std::env::var("AUDIT_RETENTION_DAYS") {
            if let Ok(days) = days_str.parse::<u32>() {
                audit.retention_days = days;
            }
        }
        if let Ok(mode) = std::env::var("AUDIT_FAILURE_MODE") {
            match mode.to_lowercase().as_str() {
                "strict" => audit.failure_mode = AuditFailureMode::Strict,
                "lenient" => audit.failure_mode = AuditFailureMode::Lenient,
                other => log::warn!("Ignoring unknown AUDIT_FAILURE_MODE: {other}"),
            }
        }
    }

    fn apply_logging_env_overrides(logging: &mut LoggingSettings) {
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            logging.level = log_level;
        }
    }

    /// Helper function to apply numeric environment variable overrides
    fn apply_numeric_env_override(env_var: &str, target: &mut u64) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.parse::<u64>() {
                *target = value;
            }
        }
    }

    /// Load environment variables from .env file
    fn load_env_file() {
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                if let Some((key, value)) = line.split_once('=') {
                    std::env::set_var(key.trim(), value.trim());
                }
            }
        }
    }

    /// Check cross-field settings invariants
    ///
    /// # Errors
    ///
    /// Returns an error if the relying party ID is empty, the origin is
    /// not https (except localhost), or a window/TTL is zero
    pub fn validate(&self) -> Result<(), crate::errors::StepkeyError> {
        use crate::errors::StepkeyError;

        if self.webauthn.rp_id.is_empty() {
            return Err(StepkeyError::ConfigurationError(
                "Relying party ID cannot be empty".into(),
            ));
        }
        if !self.webauthn.rp_origin.starts_with("https://")
            && !self.webauthn.rp_origin.starts_with("http://localhost")
        {
            return Err(StepkeyError::ConfigurationError(
                "Origin must be https:// except for localhost".into(),
            ));
        }
        if self.challenge.ttl_seconds == 0 {
            return Err(StepkeyError::ConfigurationError(
                "Challenge TTL must be positive".into(),
            ));
        }
        if self.elevation.window_seconds == 0 {
            return Err(StepkeyError::ConfigurationError(
                "Elevation window must be positive".into(),
            ));
        }
        Ok(())
    }
}
