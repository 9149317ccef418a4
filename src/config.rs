use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub inventory: InventoryConfig,
    pub biometric: BiometricConfig,
    pub bootstrap: BootstrapConfig,
    pub app: AppConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub lock_timeout_ms: u64,
    pub statement_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// `None` outside production means a random secret is generated per process.
    pub token_secret: Option<SecretString>,
    pub token_ttl_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct InventoryConfig {
    /// Attempts per transaction when the store reports contention.
    pub max_tx_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct BiometricConfig {
    pub face_engine_url: Option<String>,
    pub face_engine_timeout_secs: u64,
    pub upload_limit_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub company_name: String,
    pub admin_email: Option<String>,
    pub admin_password: Option<SecretString>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub name: String,
    pub environment: Environment,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

fn var_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(val) => val.parse().with_context(|| format!("Failed to parse {name}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Server configuration
        let host = var_or("SERVER_HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?;
        let port = var_or("SERVER_PORT", 8000u16)?;

        // Database configuration
        let db_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database = DatabaseConfig {
            url: db_url,
            max_connections: var_or("DATABASE_MAX_CONNECTIONS", 10)?,
            min_connections: var_or("DATABASE_MIN_CONNECTIONS", 1)?,
            acquire_timeout_secs: var_or("DATABASE_ACQUIRE_TIMEOUT_SECS", 5)?,
            lock_timeout_ms: var_or("DATABASE_LOCK_TIMEOUT_MS", 2000)?,
            statement_timeout_ms: var_or("DATABASE_STATEMENT_TIMEOUT_MS", 10000)?,
        };

        // App configuration
        let environment = env::var("APP_ENVIRONMENT")
            .ok()
            .and_then(|val| val.parse().ok())
            .unwrap_or_default();
        let app = AppConfig {
            name: env::var("APP_NAME").unwrap_or_else(|_| "Rider Training Backend".to_string()),
            environment,
        };

        // Identity assertions
        let token_secret = env::var("AUTH_TOKEN_SECRET").ok().map(SecretString::from);
        if token_secret.is_none() && environment == Environment::Production {
            bail!("AUTH_TOKEN_SECRET must be set in production");
        }
        let auth = AuthConfig {
            token_secret,
            token_ttl_minutes: var_or("AUTH_TOKEN_TTL_MINUTES", 1440)?,
        };

        let inventory = InventoryConfig {
            max_tx_attempts: var_or("INVENTORY_MAX_TX_ATTEMPTS", 3)?,
        };

        let biometric = BiometricConfig {
            face_engine_url: env::var("FACE_ENGINE_URL").ok(),
            face_engine_timeout_secs: var_or("FACE_ENGINE_TIMEOUT_SECS", 15)?,
            upload_limit_bytes: var_or("FACE_UPLOAD_LIMIT_BYTES", 10 * 1024 * 1024)?,
        };

        let bootstrap = BootstrapConfig {
            company_name: env::var("COMPANY_NAME").unwrap_or_else(|_| "Rider Training".to_string()),
            admin_email: env::var("BOOTSTRAP_ADMIN_EMAIL").ok(),
            admin_password: env::var("BOOTSTRAP_ADMIN_PASSWORD").ok().map(SecretString::from),
        };

        Ok(Config {
            server: ServerConfig { host, port },
            database,
            auth,
            inventory,
            biometric,
            bootstrap,
            app,
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.host, self.server.port)
    }

    pub fn is_production(&self) -> bool {
        self.app.environment == Environment::Production
    }
}

/// Settings for running without an environment, used by tests and local tooling.
impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port: 8000,
            },
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 10,
                min_connections: 1,
                acquire_timeout_secs: 5,
                lock_timeout_ms: 2000,
                statement_timeout_ms: 10000,
            },
            auth: AuthConfig {
                token_secret: None,
                token_ttl_minutes: 1440,
            },
            inventory: InventoryConfig { max_tx_attempts: 3 },
            biometric: BiometricConfig {
                face_engine_url: None,
                face_engine_timeout_secs: 15,
                upload_limit_bytes: 10 * 1024 * 1024,
            },
            bootstrap: BootstrapConfig {
                company_name: "Rider Training".to_string(),
                admin_email: None,
                admin_password: None,
            },
            app: AppConfig {
                name: "Rider Training Backend".to_string(),
                environment: Environment::Development,
            },
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" => Ok(Environment::Production),
            "staging" => Ok(Environment::Staging),
            "development" => Ok(Environment::Development),
            _ => Err(format!("Unknown environment: {}", s)),
        }
    }
}

// Use once_cell for a global config instance that's initialized once
use once_cell::sync::OnceCell;

static CONFIG: OnceCell<Config> = OnceCell::new();

pub fn init() -> Result<&'static Config> {
    CONFIG.get_or_try_init(Config::from_env)
}
