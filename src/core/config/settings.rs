use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment, parse_f64,
    parse_grading_engine, parse_u16, parse_u32, parse_u64,
};
use super::secret::load_or_create_secret_key;
use super::types::{
    AdminSettings, ApiSettings, ConfigError, CorsSettings, DatabaseSettings, GradingEngine,
    GradingSettings, LlmSettings, RuntimeSettings, SchedulerSettings, SecuritySettings, ServerHost,
    ServerPort, ServerSettings, Settings, TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("ACADAI_HOST", "0.0.0.0");
        let port = env_or_default("ACADAI_PORT", "8000");

        let environment =
            parse_environment(env_optional("ACADAI_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("ACADAI_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "AcadAI API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let secret_key = match env_optional("SECRET_KEY") {
            Some(value) => value,
            None => load_or_create_secret_key(),
        };

        let access_token_expire_minutes = parse_u64(
            "ACCESS_TOKEN_EXPIRE_MINUTES",
            env_or_default("ACCESS_TOKEN_EXPIRE_MINUTES", "10080"),
        )?;
        let algorithm = env_or_default("ALGORITHM", "HS256");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "acadai");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "acadai_db");
        let database_url = env_optional("DATABASE_URL");

        let grading_engine = parse_grading_engine(env_optional("GRADING_ENGINE"))?;
        let keyword_weight = parse_f64(
            "LEXICAL_KEYWORD_WEIGHT",
            env_or_default("LEXICAL_KEYWORD_WEIGHT", "0.4"),
        )?;
        let similarity_weight = parse_f64(
            "LEXICAL_SIMILARITY_WEIGHT",
            env_or_default("LEXICAL_SIMILARITY_WEIGHT", "0.6"),
        )?;
        let similarity_threshold = parse_f64(
            "LEXICAL_SIMILARITY_THRESHOLD",
            env_or_default("LEXICAL_SIMILARITY_THRESHOLD", "0.3"),
        )?;

        let llm_api_key = env_or_default("LLM_API_KEY", "");
        let llm_base_url = env_or_default("LLM_BASE_URL", "https://api.openai.com/v1");
        let llm_model = env_or_default("LLM_MODEL", "gpt-4.1");
        let llm_temperature = parse_f64("LLM_TEMPERATURE", env_or_default("LLM_TEMPERATURE", "0.3"))?;
        let llm_max_tokens = parse_u32("LLM_MAX_TOKENS", env_or_default("LLM_MAX_TOKENS", "200"))?;
        let llm_max_retries = parse_u32("LLM_MAX_RETRIES", env_or_default("LLM_MAX_RETRIES", "3"))?;
        let llm_request_timeout =
            parse_u64("LLM_REQUEST_TIMEOUT", env_or_default("LLM_REQUEST_TIMEOUT", "30"))?;

        let sweeper_interval_seconds = parse_u64(
            "SWEEPER_INTERVAL_SECONDS",
            env_or_default("SWEEPER_INTERVAL_SECONDS", "60"),
        )?;

        let first_superuser_email = env_or_default("FIRST_SUPERUSER_EMAIL", "admin@acadai.local");
        let first_superuser_password = env_or_default("FIRST_SUPERUSER_PASSWORD", "");

        let log_level = env_or_default("ACADAI_LOG_LEVEL", "info");
        let json = env_optional("ACADAI_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            security: SecuritySettings { secret_key, access_token_expire_minutes, algorithm },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
            },
            grading: GradingSettings {
                engine: grading_engine,
                keyword_weight,
                similarity_weight,
                similarity_threshold,
            },
            llm: LlmSettings {
                api_key: llm_api_key,
                base_url: llm_base_url,
                model: llm_model,
                temperature: llm_temperature,
                max_tokens: llm_max_tokens,
                max_retries: llm_max_retries,
                request_timeout: llm_request_timeout,
            },
            scheduler: SchedulerSettings { sweeper_interval_seconds },
            admin: AdminSettings { first_superuser_email, first_superuser_password },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn security(&self) -> &SecuritySettings {
        &self.security
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn grading(&self) -> &GradingSettings {
        &self.grading
    }

    pub(crate) fn llm(&self) -> &LlmSettings {
        &self.llm
    }

    pub(crate) fn scheduler(&self) -> &SchedulerSettings {
        &self.scheduler
    }

    pub(crate) fn admin(&self) -> &AdminSettings {
        &self.admin
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let weights = &self.grading;
        for (field, value) in [
            ("LEXICAL_KEYWORD_WEIGHT", weights.keyword_weight),
            ("LEXICAL_SIMILARITY_WEIGHT", weights.similarity_weight),
            ("LEXICAL_SIMILARITY_THRESHOLD", weights.similarity_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue { field, value: value.to_string() });
            }
        }

        if self.scheduler.sweeper_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "SWEEPER_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.grading.engine == GradingEngine::Llm && self.llm.api_key.is_empty() {
            return Err(ConfigError::MissingSecret("LLM_API_KEY"));
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }
        if self.admin.first_superuser_password.is_empty() {
            return Err(ConfigError::MissingSecret("FIRST_SUPERUSER_PASSWORD"));
        }

        Ok(())
    }
}
