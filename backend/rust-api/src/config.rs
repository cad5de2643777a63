use std::env;

use crate::models::DifficultyTable;

const MAX_LATE_GRACE_SECONDS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone)]
pub struct AiSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub api_key: String,
    pub folder_id: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://llm.api.cloud.yandex.net/foundationModels/v1/completion"
                .to_string(),
            api_key: String::new(),
            folder_id: String::new(),
            model: "yandexgpt-lite".to_string(),
            temperature: 0.3,
            max_tokens: 800,
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub storage_backend: StorageBackend,
    pub cache_backend: CacheBackend,
    pub mongo_uri: String,
    pub mongo_database: String,
    pub redis_uri: String,
    pub bind_addr: String,
    /// Countdown wake-up period.
    pub tick_interval_ms: u64,
    /// Submissions later than this past the deadline are scored as expired.
    pub late_grace_seconds: u64,
    pub metrics_auth: String,
    pub ai: AiSettings,
    pub difficulty: DifficultyTable,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_backend: StorageBackend::Memory,
            cache_backend: CacheBackend::Memory,
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_database: "mathdrill".to_string(),
            redis_uri: "redis://127.0.0.1:6379/0".to_string(),
            bind_addr: "0.0.0.0:8081".to_string(),
            tick_interval_ms: 1000,
            late_grace_seconds: 2,
            metrics_auth: "admin:changeme".to_string(),
            ai: AiSettings::default(),
            difficulty: DifficultyTable::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, then a local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let env_name = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml, then APP__ overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env_name)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = Config::default();

        let storage_backend = match settings
            .get_string("storage.backend")
            .or_else(|_| env::var("STORAGE_BACKEND"))
            .unwrap_or_else(|_| "mongo".to_string())
            .to_lowercase()
            .as_str()
        {
            "mongo" | "mongodb" => StorageBackend::Mongo,
            "memory" => StorageBackend::Memory,
            other => {
                return Err(config::ConfigError::Message(format!(
                    "unknown storage backend '{}'",
                    other
                )))
            }
        };

        let cache_backend = match settings
            .get_string("cache.backend")
            .or_else(|_| env::var("CACHE_BACKEND"))
            .unwrap_or_else(|_| "redis".to_string())
            .to_lowercase()
            .as_str()
        {
            "redis" => CacheBackend::Redis,
            "memory" => CacheBackend::Memory,
            other => {
                return Err(config::ConfigError::Message(format!(
                    "unknown cache backend '{}'",
                    other
                )))
            }
        };

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or(defaults.mongo_uri);

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or(defaults.mongo_database);

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or(defaults.redis_uri);

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or(defaults.bind_addr);

        let tick_interval_ms = settings
            .get_int("tick_interval_ms")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.tick_interval_ms);

        let late_grace_seconds = settings
            .get_int("late_grace_seconds")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .filter(|v| *v <= MAX_LATE_GRACE_SECONDS)
            .unwrap_or(defaults.late_grace_seconds);

        let metrics_auth = settings
            .get_string("metrics.auth")
            .or_else(|_| env::var("METRICS_AUTH"))
            .unwrap_or(defaults.metrics_auth);

        let ai = load_ai_settings(&settings);

        let difficulty = match settings.get::<DifficultyTable>("difficulty") {
            Ok(table) => table,
            Err(config::ConfigError::NotFound(_)) => DifficultyTable::default(),
            Err(e) => return Err(e),
        };
        difficulty
            .validate()
            .map_err(|e| config::ConfigError::Message(format!("difficulty table: {}", e)))?;

        Ok(Config {
            storage_backend,
            cache_backend,
            mongo_uri,
            mongo_database,
            redis_uri,
            bind_addr,
            tick_interval_ms,
            late_grace_seconds,
            metrics_auth,
            ai,
            difficulty,
        })
    }
}

fn load_ai_settings(settings: &config::Config) -> AiSettings {
    let defaults = AiSettings::default();

    let api_key = settings
        .get_string("ai.api_key")
        .or_else(|_| env::var("YANDEXGPT_API_KEY"))
        .unwrap_or_default();
    let folder_id = settings
        .get_string("ai.folder_id")
        .or_else(|_| env::var("YANDEXGPT_FOLDER_ID"))
        .unwrap_or_default();

    // Without credentials the client cannot work, so it stays off unless
    // explicitly forced on.
    let enabled = settings
        .get_bool("ai.enabled")
        .unwrap_or(!api_key.is_empty() && !folder_id.is_empty());

    AiSettings {
        enabled,
        endpoint: settings
            .get_string("ai.endpoint")
            .or_else(|_| env::var("YANDEXGPT_ENDPOINT"))
            .unwrap_or(defaults.endpoint),
        api_key,
        folder_id,
        model: settings
            .get_string("ai.model")
            .or_else(|_| env::var("YANDEXGPT_MODEL"))
            .unwrap_or(defaults.model),
        temperature: settings
            .get_float("ai.temperature")
            .map(|v| v as f32)
            .unwrap_or(defaults.temperature),
        max_tokens: settings
            .get_int("ai.max_tokens")
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(defaults.max_tokens),
        timeout_seconds: settings
            .get_int("ai.timeout_seconds")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.timeout_seconds),
    }
}
