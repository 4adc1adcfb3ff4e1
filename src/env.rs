use dotenv::dotenv;
use std::env;
use std::path::PathBuf;
use url::Url;

use crate::rabbitmq::errors::{RelayError, Result};
use crate::util::read_secret_file;

pub const AMQ_USER: &str = "AMQ_USER";
pub const AMQ_PASSWORD_FILE: &str = "AMQ_PASSWORD_FILE";
pub const AMQ_HOST: &str = "AMQ_HOST";
pub const AMQ_PORT: &str = "AMQ_PORT";
pub const INPUT_QUEUE: &str = "INPUT_QUEUE";
pub const ROUTING_KEY: &str = "ROUTING_KEY";
pub const DB_USER: &str = "DB_USER";
pub const MYSQL_ROOT_PASSWORD_FILE: &str = "MYSQL_ROOT_PASSWORD_FILE";
pub const MYSQL_DATABASE: &str = "MYSQL_DATABASE";

fn default_host() -> String {
    "rabbit".to_string()
}

fn default_port() -> u16 {
    5672
}

fn read_password(path: PathBuf) -> Result<String> {
    read_secret_file(&path).map_err(|source| RelayError::PasswordFile { path, source })
}

/// `%` is the one reserved character `Url` leaves alone in credentials.
fn escape_percent(part: &str) -> String {
    part.replace('%', "%25")
}

/// Broker connection settings resolved from the environment.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    /// Queue handed to `basic_consume`. `None` means "the service's own queue".
    pub input_queue: Option<String>,
    pub routing_key_override: Option<String>,
}

impl BrokerConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let user = lookup(AMQ_USER).ok_or(RelayError::MissingEnv(AMQ_USER))?;
        let password_file = lookup(AMQ_PASSWORD_FILE)
            .map(PathBuf::from)
            .ok_or(RelayError::MissingEnv(AMQ_PASSWORD_FILE))?;
        let password = read_password(password_file)?;

        let port = match lookup(AMQ_PORT) {
            Some(val) => val.parse().map_err(|_| RelayError::InvalidEnv {
                name: AMQ_PORT,
                value: val,
            })?,
            None => default_port(),
        };

        Ok(BrokerConfig {
            user,
            password,
            host: lookup(AMQ_HOST).unwrap_or_else(default_host),
            port,
            input_queue: lookup(INPUT_QUEUE).filter(|q| !q.is_empty()),
            routing_key_override: lookup(ROUTING_KEY).filter(|k| !k.is_empty()),
        })
    }

    /// `amqp://<user>:<password>@<host>:<port>/` with the credentials
    /// percent-encoded.
    pub fn uri(&self) -> Result<String> {
        let invalid_host = || RelayError::InvalidEnv {
            name: AMQ_HOST,
            value: self.host.clone(),
        };
        let mut uri =
            Url::parse(&format!("amqp://{}:{}/", self.host, self.port)).map_err(|_| invalid_host())?;
        uri.set_username(&escape_percent(&self.user))
            .map_err(|_| invalid_host())?;
        uri.set_password(Some(&escape_percent(&self.password)))
            .map_err(|_| invalid_host())?;
        Ok(uri.into())
    }

    /// The routing key to bind with: the override if one is configured.
    pub fn routing_key<'a>(&'a self, requested: &'a str) -> &'a str {
        self.routing_key_override.as_deref().unwrap_or(requested)
    }
}

/// MySQL credentials, for services that keep their results in the database.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub user: String,
    pub password: String,
    pub database: String,
    pub host: String,
    pub port: u16,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let user = lookup(DB_USER).ok_or(RelayError::MissingEnv(DB_USER))?;
        let password_file = lookup(MYSQL_ROOT_PASSWORD_FILE)
            .map(PathBuf::from)
            .ok_or(RelayError::MissingEnv(MYSQL_ROOT_PASSWORD_FILE))?;

        Ok(DatabaseConfig {
            user,
            password: read_password(password_file)?,
            database: lookup(MYSQL_DATABASE).unwrap_or_default(),
            host: "mysql".to_string(),
            port: 3306,
        })
    }

    /// Go-style DSN: `<user>:<password>@tcp(<host>:<port>)/<database>`.
    pub fn connection_string(&self) -> String {
        format!(
            "{}:{}@tcp({}:{})/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}
