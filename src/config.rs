use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub paystack: PaystackConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Tokens are issued elsewhere, this service only verifies them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaystackConfig {
    pub secret_key: String,
    #[serde(default = "default_paystack_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default = "default_verify_timeout_secs")]
    pub verify_timeout_secs: u64,
}

fn default_paystack_base_url() -> String {
    "https://api.paystack.co".to_string()
}

fn default_verify_timeout_secs() -> u64 {
    15
}

/// Seed values for the platform_settings row, used until an admin edits it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub default_platform_fee_bp: i32,
    pub default_withdrawal_fee_bp: i32,
    pub default_min_withdrawal_amount: i64,
    pub currency: String,
    pub pending_order_ttl_minutes: i64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            default_platform_fee_bp: 500,
            default_withdrawal_fee_bp: 250,
            default_min_withdrawal_amount: 1000,
            currency: "NGN".to_string(),
            pending_order_ttl_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotificationConfig {
    #[serde(default)]
    pub resend_api_key: Option<String>,
    #[serde(default)]
    pub from_email: String,
    #[serde(default)]
    pub from_name: String,
}

impl Config {
    pub fn from_toml() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        use std::io::ErrorKind;

        // no config file: build everything from environment variables
        let config_result = std::fs::read_to_string(&config_path);

        let mut config: Config = match config_result {
            Ok(config_str) => toml::from_str(&config_str)
                .map_err(|e| format!("failed to parse config file: {e}"))?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fn get_env(name: &str) -> Option<String> {
                    env::var(name).ok()
                }
                fn get_env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
                    env::var(name)
                        .ok()
                        .and_then(|v| v.parse::<T>().ok())
                        .unwrap_or(default)
                }

                let database_url = get_env("DATABASE_URL")
                    .ok_or("DATABASE_URL is not set and config.toml was not found")?;
                let platform = PlatformConfig::default();

                Config {
                    server: ServerConfig {
                        host: get_env("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                        port: get_env_parse("SERVER_PORT", 8080u16),
                    },
                    database: DatabaseConfig {
                        url: database_url,
                        max_connections: get_env_parse("DB_MAX_CONNECTIONS", 10u32),
                    },
                    jwt: JwtConfig {
                        secret: get_env("JWT_SECRET")
                            .unwrap_or_else(|| "change-me-in-production".to_string()),
                    },
                    paystack: PaystackConfig {
                        secret_key: get_env("PAYSTACK_SECRET_KEY").unwrap_or_default(),
                        base_url: get_env("PAYSTACK_BASE_URL")
                            .unwrap_or_else(default_paystack_base_url),
                        callback_url: get_env("PAYSTACK_CALLBACK_URL"),
                        verify_timeout_secs: get_env_parse(
                            "PAYSTACK_VERIFY_TIMEOUT_SECS",
                            default_verify_timeout_secs(),
                        ),
                    },
                    platform: PlatformConfig {
                        default_platform_fee_bp: get_env_parse(
                            "PLATFORM_FEE_BP",
                            platform.default_platform_fee_bp,
                        ),
                        default_withdrawal_fee_bp: get_env_parse(
                            "WITHDRAWAL_FEE_BP",
                            platform.default_withdrawal_fee_bp,
                        ),
                        default_min_withdrawal_amount: get_env_parse(
                            "MIN_WITHDRAWAL_AMOUNT",
                            platform.default_min_withdrawal_amount,
                        ),
                        currency: get_env("PLATFORM_CURRENCY").unwrap_or(platform.currency),
                        pending_order_ttl_minutes: get_env_parse(
                            "PENDING_ORDER_TTL_MINUTES",
                            platform.pending_order_ttl_minutes,
                        ),
                    },
                    notifications: NotificationConfig {
                        resend_api_key: get_env("RESEND_API_KEY"),
                        from_email: get_env("FROM_EMAIL").unwrap_or_default(),
                        from_name: get_env("FROM_NAME").unwrap_or_default(),
                    },
                }
            }
            Err(e) => {
                return Err(format!("cannot read config file {config_path}: {e}").into());
            }
        };

        // environment always wins over the file
        if let Ok(v) = env::var("SERVER_HOST") {
            config.server.host = v;
        }
        if let Ok(v) = env::var("SERVER_PORT")
            && let Ok(p) = v.parse()
        {
            config.server.port = p;
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            config.database.url = v;
        }
        if let Ok(v) = env::var("DB_MAX_CONNECTIONS")
            && let Ok(mc) = v.parse()
        {
            config.database.max_connections = mc;
        }
        if let Ok(v) = env::var("JWT_SECRET") {
            config.jwt.secret = v;
        }
        if let Ok(v) = env::var("PAYSTACK_SECRET_KEY") {
            config.paystack.secret_key = v;
        }
        if let Ok(v) = env::var("PAYSTACK_BASE_URL") {
            config.paystack.base_url = v;
        }
        if let Ok(v) = env::var("PAYSTACK_CALLBACK_URL") {
            config.paystack.callback_url = Some(v);
        }
        if let Ok(v) = env::var("PAYSTACK_VERIFY_TIMEOUT_SECS")
            && let Ok(n) = v.parse()
        {
            config.paystack.verify_timeout_secs = n;
        }
        if let Ok(v) = env::var("PLATFORM_FEE_BP")
            && let Ok(n) = v.parse()
        {
            config.platform.default_platform_fee_bp = n;
        }
        if let Ok(v) = env::var("WITHDRAWAL_FEE_BP")
            && let Ok(n) = v.parse()
        {
            config.platform.default_withdrawal_fee_bp = n;
        }
        if let Ok(v) = env::var("MIN_WITHDRAWAL_AMOUNT")
            && let Ok(n) = v.parse()
        {
            config.platform.default_min_withdrawal_amount = n;
        }
        if let Ok(v) = env::var("PLATFORM_CURRENCY") {
            config.platform.currency = v;
        }
        if let Ok(v) = env::var("PENDING_ORDER_TTL_MINUTES")
            && let Ok(n) = v.parse()
        {
            config.platform.pending_order_ttl_minutes = n;
        }
        if let Ok(v) = env::var("RESEND_API_KEY") {
            config.notifications.resend_api_key = Some(v);
        }
        if let Ok(v) = env::var("FROM_EMAIL") {
            config.notifications.from_email = v;
        }
        if let Ok(v) = env::var("FROM_NAME") {
            config.notifications.from_name = v;
        }

        Ok(config)
    }
}
