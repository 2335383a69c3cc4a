use std::time::Duration;

use sqlx::postgres::PgConnectOptions;
use sqlx::ConnectOptions;
use tracing::info;

use crate::error::{DbError, DbResult};
use crate::pg::PgConnection;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5432;

/// Bounds opening the session only; calls on an open session never time out.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where to connect. **The password is redacted in `Debug` output.**
#[derive(Clone)]
pub struct DbTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    /// Full connection URL; wins over the fields above when set.
    pub url: Option<String>,
}

impl std::fmt::Debug for DbTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<REDACTED>"))
            .field("database", &self.database)
            .field("url", &self.url.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl Default for DbTarget {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            user: "postgres".to_string(),
            password: None,
            database: "postgres".to_string(),
            url: None,
        }
    }
}

impl DbTarget {
    /// Parse `host:port`. A missing port falls back to [`DEFAULT_PORT`].
    pub fn parse_address(addr: &str) -> DbResult<(String, u16)> {
        let addr = addr.trim();
        match addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| DbError::InvalidAddress(addr.to_string()))?;
                Ok((host.to_string(), port))
            }
            None if !addr.is_empty() => Ok((addr.to_string(), DEFAULT_PORT)),
            _ => Err(DbError::InvalidAddress(addr.to_string())),
        }
    }

    /// `host:port` for log lines; never includes credentials.
    pub fn display_address(&self) -> String {
        match &self.url {
            Some(_) => "<database url>".to_string(),
            None => format!("{}:{}", self.host, self.port),
        }
    }

    fn connect_options(&self) -> DbResult<PgConnectOptions> {
        if let Some(url) = &self.url {
            return url.parse::<PgConnectOptions>().map_err(|source| DbError::Connect {
                target: self.display_address(),
                source,
            });
        }

        let mut opts = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.database);
        if let Some(pw) = &self.password {
            opts = opts.password(pw);
        }
        Ok(opts)
    }
}

/// Open the single database session a run works on.
pub async fn connect(target: &DbTarget) -> DbResult<PgConnection> {
    let opts = target.connect_options()?;
    let session = tokio::time::timeout(CONNECT_TIMEOUT, opts.connect())
        .await
        .map_err(|_| DbError::ConnectTimeout {
            target: target.display_address(),
        })?
        .map_err(|source| DbError::Connect {
            target: target.display_address(),
            source,
        })?;

    info!(target = %target.display_address(), "connected");
    Ok(PgConnection::from_session(session))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        assert_eq!(
            DbTarget::parse_address("db.internal:6543").unwrap(),
            ("db.internal".to_string(), 6543)
        );
        assert_eq!(
            DbTarget::parse_address("localhost").unwrap(),
            ("localhost".to_string(), DEFAULT_PORT)
        );
    }

    #[test]
    fn rejects_bad_addresses() {
        for bad in ["", ":5432", "host:notaport", "host:70000"] {
            assert!(DbTarget::parse_address(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn debug_redacts_credentials() {
        let t = DbTarget {
            password: Some("hunter2".into()),
            url: Some("postgres://u:hunter2@h/db".into()),
            ..DbTarget::default()
        };
        let dbg = format!("{t:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("<REDACTED>"));
    }
}
