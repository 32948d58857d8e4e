use std::{env, fmt::Display, fs::read_to_string, str::FromStr, time::Duration};

use tracing::{info, warn};

use crate::{deeplink::HandoffTiming, error::AppError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Firebase,
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "firebase" => Ok(Backend::Firebase),
            "memory" => Ok(Backend::Memory),
            other => Err(format!("unknown backend {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub backend: Backend,
    pub firebase_project_id: String,
    pub firebase_storage_bucket: String,
    pub firebase_api_key: String,
    pub public_base_url: String,
    pub deep_link_scheme: String,
    pub handoff: HandoffTiming,
    pub sign_out_timeout: Duration,
    pub session_idle_ttl: Duration,
    pub session_sweep_interval: Duration,
    pub cors_max_age: Duration,
    /// Account seeded into the memory backend so the admin pages are reachable locally.
    pub dev_admin: Option<(String, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 1111,
            backend: Backend::Memory,
            firebase_project_id: String::new(),
            firebase_storage_bucket: String::new(),
            firebase_api_key: String::new(),
            public_base_url: "http://localhost:1111".to_string(),
            deep_link_scheme: "hillsgo".to_string(),
            handoff: HandoffTiming::default(),
            sign_out_timeout: Duration::from_secs(5),
            session_idle_ttl: Duration::from_secs(12 * 60 * 60),
            session_sweep_interval: Duration::from_secs(5 * 60),
            cors_max_age: Duration::from_secs(60 * 60),
            dev_admin: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        let backend: Backend = try_load("HILLSGO_BACKEND", "memory")?;

        let (firebase_project_id, firebase_storage_bucket, firebase_api_key) = match backend {
            Backend::Firebase => (
                required("FIREBASE_PROJECT_ID")?,
                required("FIREBASE_STORAGE_BUCKET")?,
                read_secret("FIREBASE_API_KEY")?,
            ),
            Backend::Memory => (String::new(), String::new(), String::new()),
        };

        let dev_admin = match (var("DEV_ADMIN_EMAIL"), var("DEV_ADMIN_PASSWORD")) {
            (Ok(email), Ok(password)) if backend == Backend::Memory => Some((email, password)),
            _ => None,
        };

        Ok(Self {
            port: try_load("RUST_PORT", "1111")?,
            backend,
            firebase_project_id,
            firebase_storage_bucket,
            firebase_api_key,
            public_base_url: try_load::<String>("PUBLIC_BASE_URL", "http://localhost:1111")?
                .trim_end_matches('/')
                .to_string(),
            deep_link_scheme: try_load("DEEP_LINK_SCHEME", "hillsgo")?,
            handoff: HandoffTiming {
                delay: Duration::from_millis(try_load("HANDOFF_DELAY_MS", "1500")?),
                threshold: Duration::from_millis(try_load("HANDOFF_THRESHOLD_MS", "1600")?),
            },
            sign_out_timeout: Duration::from_millis(try_load("SIGN_OUT_TIMEOUT_MS", "5000")?),
            session_idle_ttl: Duration::from_secs(try_load("SESSION_IDLE_TTL_SECS", "43200")?),
            session_sweep_interval: Duration::from_secs(try_load("SESSION_SWEEP_SECS", "300")?),
            cors_max_age: Duration::from_secs(try_load("CORS_MAX_AGE_SECS", "3600")?),
            dev_admin,
        })
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, AppError>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| AppError::Config(format!("Invalid {key} value: {e}")))
}

fn required(key: &str) -> Result<String, AppError> {
    env::var(key).map_err(|_| AppError::Config(format!("{key} must be set")))
}

/// Docker secret first, then an environment variable of the same name.
fn read_secret(secret_name: &str) -> Result<String, AppError> {
    let path = format!("/run/secrets/{secret_name}");

    match read_to_string(&path) {
        Ok(secret) => Ok(secret.trim().to_string()),
        Err(e) => {
            warn!("Failed to read {secret_name} from file: {e}");

            env::var(secret_name)
                .map_err(|_| AppError::Config(format!("Secret {secret_name} is missing")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parsing() {
        assert_eq!("Firebase".parse::<Backend>(), Ok(Backend::Firebase));
        assert_eq!(" memory ".parse::<Backend>(), Ok(Backend::Memory));
        assert!("mongo".parse::<Backend>().is_err());
    }

    #[test]
    fn test_default_handoff_timing() {
        let config = Config::default();
        assert_eq!(config.handoff.delay, Duration::from_millis(1500));
        assert_eq!(config.handoff.threshold, Duration::from_millis(1600));
    }
}
