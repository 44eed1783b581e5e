//! MongoDB credentials and their resolution into a connection string.

use std::collections::HashMap;
use std::fmt;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

use crate::DbError;

/// Port used when the credentials do not name one.
pub const DEFAULT_PORT: u16 = 27017;

/// Credentials for one MongoDB deployment.
#[derive(Clone, PartialEq, Eq)]
pub enum MongoCredentials {
    /// A full `mongodb://` or `mongodb+srv://` URI.
    ConnectionString {
        connection_string: String,
        database: String,
    },
    /// Discrete connection values.
    Values {
        host: String,
        port: u16,
        user: Option<String>,
        password: Option<String>,
        database: String,
    },
}

/// What a connector needs to open a client.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedConnection {
    pub connection_string: String,
    pub database: String,
}

impl MongoCredentials {
    /// Build credentials from the secret map of an execution context.
    ///
    /// Recognised keys: `configurationType` (`connectionString` or
    /// `values`, default `values`), `connectionString`, `host`, `port`,
    /// `user`, `password`, `database`.
    pub fn from_secrets(secrets: &HashMap<String, String>) -> Result<Self, DbError> {
        let get = |key: &str| {
            secrets
                .get(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        let database = get("database").unwrap_or_default();

        match get("configurationType").as_deref() {
            Some("connectionString") => Ok(Self::ConnectionString {
                connection_string: get("connectionString").unwrap_or_default(),
                database,
            }),
            Some("values") | None => {
                let port = match get("port") {
                    Some(raw) => raw.parse::<u16>().map_err(|_| {
                        DbError::Credentials(format!("port '{raw}' is not a valid port number"))
                    })?,
                    None => DEFAULT_PORT,
                };
                Ok(Self::Values {
                    host: get("host").unwrap_or_default(),
                    port,
                    user: get("user"),
                    password: get("password"),
                    database,
                })
            }
            Some(other) => Err(DbError::Credentials(format!(
                "unknown configuration type '{other}'"
            ))),
        }
    }

    pub fn database(&self) -> &str {
        match self {
            Self::ConnectionString { database, .. } | Self::Values { database, .. } => database,
        }
    }

    /// Validate the credentials and produce the connection string.
    ///
    /// # Errors
    /// [`DbError::Credentials`] when the database name, the connection
    /// string or the host is missing.
    pub fn resolve(&self) -> Result<ResolvedConnection, DbError> {
        if self.database().trim().is_empty() {
            return Err(DbError::Credentials("database name must be set".into()));
        }

        let connection_string = match self {
            Self::ConnectionString { connection_string, .. } => {
                if connection_string.trim().is_empty() {
                    return Err(DbError::Credentials("connection string must be set".into()));
                }
                connection_string.clone()
            }
            Self::Values { host, port, user, password, .. } => {
                if host.trim().is_empty() {
                    return Err(DbError::Credentials("host must be set".into()));
                }
                let auth = match (user, password) {
                    (Some(user), Some(password)) => {
                        format!("{}:{}@", encode(user), encode(password))
                    }
                    (Some(user), None) => format!("{}@", encode(user)),
                    (None, _) => String::new(),
                };
                format!("mongodb://{auth}{host}:{port}/")
            }
        };

        Ok(ResolvedConnection {
            connection_string,
            database: self.database().to_owned(),
        })
    }
}

fn encode(raw: &str) -> String {
    utf8_percent_encode(raw, NON_ALPHANUMERIC).to_string()
}

// Connection strings and passwords stay out of logs.
impl fmt::Debug for MongoCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionString { database, .. } => f
                .debug_struct("ConnectionString")
                .field("connection_string", &"<redacted>")
                .field("database", database)
                .finish(),
            Self::Values { host, port, user, database, .. } => f
                .debug_struct("Values")
                .field("host", host)
                .field("port", port)
                .field("user", user)
                .field("password", &"<redacted>")
                .field("database", database)
                .finish(),
        }
    }
}

impl fmt::Debug for ResolvedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConnection")
            .field("connection_string", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}
