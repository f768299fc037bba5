// Redis-backed lease store
//
// Acquisition is `SET NX PX`; refresh and release are Lua scripts so the
// ownership check and the write happen in one atomic step on the server.

use super::LeaseStore;
use crate::config::{Endpoint, Topology};
use crate::{Error, Result};
use async_trait::async_trait;
use redis::aio::ConnectionLike;
use redis::{
    AsyncConnectionConfig, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisError, Script, Value,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const REFRESH_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// First release with `SET ... NX PX`
const MIN_VERSION: (u32, u32, u32) = (2, 6, 12);

impl From<RedisError> for Error {
    fn from(err: RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            Error::BackendUnavailable(err.to_string())
        } else {
            Error::Backend(err.to_string())
        }
    }
}

/// [`LeaseStore`] over any async Redis connection, single node or cluster
pub struct RedisStore<C> {
    conn: C,
    label: String,
    refresh: Script,
    release: Script,
}

impl<C> std::fmt::Debug for RedisStore<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("label", &self.label).finish()
    }
}

impl<C> RedisStore<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    pub fn new(conn: C, label: String) -> Self {
        Self {
            conn,
            label,
            refresh: Script::new(REFRESH_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        }
    }
}

#[async_trait]
impl<C> LeaseStore for RedisStore<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    async fn try_create(&self, name: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Value = redis::cmd("SET")
            .arg(name)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(!matches!(reply, Value::Nil))
    }

    async fn renew(&self, name: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let updated: i64 = self
            .refresh
            .key(name)
            .arg(token)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(updated == 1)
    }

    async fn release(&self, name: &str, token: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(name)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn holder(&self, name: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(name).query_async(&mut conn).await?;
        Ok(value)
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Open a connection for `topology` and wrap it in a store.
///
/// Connecting and every later command are bounded by `timeout`. Single-node
/// servers are probed with `INFO server` and rejected if they predate
/// `SET NX PX`.
pub async fn connect(topology: &Topology, timeout: Duration) -> Result<Arc<dyn LeaseStore>> {
    match topology {
        Topology::Single {
            endpoint,
            database,
            password,
        } => {
            let (addr, label) = match endpoint {
                Endpoint::Tcp { host, port } => {
                    info!("BeatCop will connect to single Redis instance via TCP.");
                    (
                        ConnectionAddr::Tcp(host.clone(), *port),
                        format!("redis://{}:{}/{}", host, port, database),
                    )
                }
                Endpoint::Unix(path) => {
                    info!("BeatCop will connect to single Redis instance via Unix domain socket.");
                    (
                        ConnectionAddr::Unix(path.clone()),
                        format!("redis+unix://{}?db={}", path.display(), database),
                    )
                }
            };
            let info = ConnectionInfo {
                addr,
                redis: RedisConnectionInfo {
                    db: *database,
                    password: password.clone(),
                    ..Default::default()
                },
            };

            let config = AsyncConnectionConfig::new()
                .set_connection_timeout(timeout)
                .set_response_timeout(timeout);
            let client = redis::Client::open(info)?;
            let mut conn = client
                .get_multiplexed_async_connection_with_config(&config)
                .await
                .map_err(|e| Error::BackendUnavailable(e.to_string()))?;

            let server_info: String = redis::cmd("INFO").arg("server").query_async(&mut conn).await?;
            check_version(&server_info)?;

            Ok(Arc::new(RedisStore::new(conn, label)))
        }
        Topology::Cluster { nodes, password } => {
            info!("BeatCop will connect to a Redis Cluster.");
            let urls: Vec<String> = nodes
                .iter()
                .map(|(host, port)| format!("redis://{}:{}/", host, port))
                .collect();
            let label = format!("redis cluster [{}]", urls.join(", "));

            let mut builder = redis::cluster::ClusterClientBuilder::new(urls)
                .connection_timeout(timeout)
                .response_timeout(timeout);
            if let Some(password) = password {
                builder = builder.password(password.clone());
            }
            let client = builder.build()?;
            let conn = client
                .get_async_connection()
                .await
                .map_err(|e| Error::BackendUnavailable(e.to_string()))?;

            Ok(Arc::new(RedisStore::new(conn, label)))
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

/// Reject servers older than [`MIN_VERSION`]. A reply without a
/// `redis_version` line is accepted.
fn check_version(server_info: &str) -> Result<()> {
    let Some(version) = server_info
        .lines()
        .find_map(|line| line.strip_prefix("redis_version:"))
        .map(str::trim)
    else {
        return Ok(());
    };

    match parse_version(version) {
        Some(parsed) if parsed < MIN_VERSION => Err(Error::UnsupportedBackend {
            version: version.to_string(),
        }),
        _ => Ok(()),
    }
}

fn parse_version(version: &str) -> Option<(u32, u32, u32)> {
    let mut parts = version.split('.').map(|part| part.parse::<u32>().ok());
    let major = parts.next()??;
    let minor = parts.next().flatten().unwrap_or(0);
    let patch = parts.next().flatten().unwrap_or(0);
    Some((major, minor, patch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_check() {
        assert!(check_version("# Server\r\nredis_version:7.2.4\r\nredis_mode:standalone\r\n").is_ok());
        assert!(check_version("redis_version:2.6.12\r\n").is_ok());
        assert!(check_version("redis_version:2.6.11\r\n").is_err());
        assert!(check_version("redis_version:2.4.0\r\n").is_err());
        // Cluster proxies and forks may omit the field
        assert!(check_version("# Server\r\n").is_ok());
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("7.2.4"), Some((7, 2, 4)));
        assert_eq!(parse_version("6"), Some((6, 0, 0)));
        assert_eq!(parse_version("x.1"), None);
    }

    #[test]
    fn test_ttl_millis() {
        assert_eq!(ttl_millis(Duration::from_secs(5)), 5000);
        assert_eq!(ttl_millis(Duration::from_micros(1500)), 1);
    }
}
