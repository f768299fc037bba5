//! Configuration file handling.
//!
//! ```toml
//! [redis]
//! host = "127.0.0.1"
//! port = 6379
//!
//! [beatcop]
//! command = "run-cron-jobs --all"
//! timeout = 5000
//! ```

use crate::lease::derive_lock_name;
use crate::supervisor::CommandSpec;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(1);

/// Where a single Redis server listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

/// How to reach the coordination backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    Single {
        endpoint: Endpoint,
        database: i64,
        password: Option<String>,
    },
    Cluster {
        nodes: Vec<(String, u16)>,
        password: Option<String>,
    },
}

/// Lease timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseSettings {
    pub ttl: Duration,
    pub renew_interval: Duration,
    /// Consecutive renewal errors tolerated before the lease counts as lost
    pub failure_tolerance: u32,
}

impl LeaseSettings {
    /// Validated timing. `renew_interval` defaults to a third of `ttl`.
    pub fn new(
        ttl: Duration,
        renew_interval: Option<Duration>,
        failure_tolerance: Option<u32>,
    ) -> Result<Self> {
        if ttl.is_zero() {
            return Err(Error::Configuration("timeout must be positive".to_string()));
        }
        let renew_interval = renew_interval.unwrap_or(ttl / 3);
        if renew_interval.is_zero() || renew_interval >= ttl {
            return Err(Error::Configuration(format!(
                "renew_interval must be between 0 and timeout ({}ms), got {}ms",
                ttl.as_millis(),
                renew_interval.as_millis()
            )));
        }
        let failure_tolerance = failure_tolerance.unwrap_or(1);
        if failure_tolerance == 0 {
            return Err(Error::Configuration("failure_tolerance must be at least 1".to_string()));
        }
        // Past this point we could still believe in a lease the store has expired
        if renew_interval * failure_tolerance >= ttl {
            return Err(Error::Configuration(format!(
                "renew_interval * failure_tolerance ({}ms) must stay below timeout ({}ms)",
                (renew_interval * failure_tolerance).as_millis(),
                ttl.as_millis()
            )));
        }
        Ok(Self {
            ttl,
            renew_interval,
            failure_tolerance,
        })
    }
}

/// Everything the orchestrator needs to guard one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardSettings {
    pub command: CommandSpec,
    pub lock_name: String,
    pub lease: LeaseSettings,
    /// Time between SIGTERM and SIGKILL when stopping the command
    pub kill_grace: Duration,
}

impl GuardSettings {
    /// Defaults for `command`: derived lock name, interval of `ttl / 3`,
    /// no error tolerance.
    pub fn new(command: CommandSpec, ttl: Duration) -> Result<Self> {
        Ok(Self {
            lock_name: derive_lock_name(&command),
            command,
            lease: LeaseSettings::new(ttl, None, None)?,
            kill_grace: DEFAULT_KILL_GRACE,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub topology: Topology,
    pub guard: GuardSettings,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let raw: RawConfig =
            toml::from_str(contents).map_err(|e| Error::Configuration(e.to_string()))?;
        raw.validate()
    }

    /// Replace the lock name, e.g. from the command line
    pub fn with_lock_name(mut self, lock_name: Option<String>) -> Self {
        if let Some(name) = lock_name.filter(|name| !name.is_empty()) {
            self.guard.lock_name = name;
        }
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    redis: RawRedis,
    beatcop: RawBeatcop,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRedis {
    host: Option<String>,
    socket: Option<PathBuf>,
    port: Option<u16>,
    database: Option<i64>,
    password: Option<String>,
    startup_nodes: Option<RawNodes>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawNodes {
    List(Vec<String>),
    /// One `host:port` per line or whitespace-separated
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCommand {
    Line(String),
    Argv(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBeatcop {
    command: RawCommand,
    #[serde(default)]
    shell: bool,
    /// Lease TTL in milliseconds
    timeout: u64,
    renew_interval: Option<u64>,
    failure_tolerance: Option<u32>,
    kill_grace: Option<u64>,
    lockname: Option<String>,
}

impl RawConfig {
    fn validate(self) -> Result<Settings> {
        Ok(Settings {
            topology: self.redis.topology()?,
            guard: self.beatcop.guard()?,
        })
    }
}

impl RawRedis {
    fn topology(self) -> Result<Topology> {
        let single = self.host.is_some() || self.socket.is_some();
        match (single, self.startup_nodes) {
            (true, Some(_)) => Err(Error::Configuration(
                "[redis] must specify one of 'host' or 'startup_nodes', not both".to_string(),
            )),
            (false, None) => Err(Error::Configuration(
                "[redis] must specify either 'host' or 'startup_nodes'".to_string(),
            )),
            (false, Some(nodes)) => {
                if self.database.is_some() {
                    return Err(Error::Configuration(
                        "'database' cannot be used with 'startup_nodes'".to_string(),
                    ));
                }
                Ok(Topology::Cluster {
                    nodes: parse_nodes(nodes)?,
                    password: self.password,
                })
            }
            (true, None) => {
                let endpoint = match (self.host, self.socket) {
                    (Some(_), Some(_)) => {
                        return Err(Error::Configuration(
                            "[redis] must specify one of 'host' or 'socket', not both".to_string(),
                        ))
                    }
                    (None, Some(path)) => Endpoint::Unix(path),
                    (Some(host), None) if host.contains('/') => Endpoint::Unix(PathBuf::from(host)),
                    (Some(host), None) => Endpoint::Tcp {
                        host,
                        port: self.port.unwrap_or(DEFAULT_PORT),
                    },
                    (None, None) => unreachable!("single topology without host or socket"),
                };
                Ok(Topology::Single {
                    endpoint,
                    database: self.database.unwrap_or(0),
                    password: self.password,
                })
            }
        }
    }
}

fn parse_nodes(nodes: RawNodes) -> Result<Vec<(String, u16)>> {
    let entries: Vec<String> = match nodes {
        RawNodes::List(list) => list,
        RawNodes::Text(text) => text.split_whitespace().map(str::to_string).collect(),
    };
    if entries.is_empty() {
        return Err(Error::Configuration("'startup_nodes' is empty".to_string()));
    }
    entries.iter().map(|entry| parse_node(entry)).collect()
}

fn parse_node(entry: &str) -> Result<(String, u16)> {
    let invalid = || Error::Configuration(format!("invalid startup node {:?}, expected host:port", entry));
    let (host, port) = entry.trim().rsplit_once(':').ok_or_else(invalid)?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}

impl RawBeatcop {
    fn guard(self) -> Result<GuardSettings> {
        let command = match (self.shell, self.command) {
            (true, RawCommand::Line(line)) => {
                if line.trim().is_empty() {
                    return Err(Error::Configuration("command is empty".to_string()));
                }
                CommandSpec::shell(line)
            }
            (true, RawCommand::Argv(argv)) => {
                let line = shlex::try_join(argv.iter().map(String::as_str))
                    .map_err(|e| Error::Configuration(format!("cannot quote command: {}", e)))?;
                if line.is_empty() {
                    return Err(Error::Configuration("command is empty".to_string()));
                }
                CommandSpec::shell(line)
            }
            (false, RawCommand::Line(line)) => CommandSpec::parse_direct(&line)?,
            (false, RawCommand::Argv(argv)) => CommandSpec::direct(argv)?,
        };

        let lease = LeaseSettings::new(
            Duration::from_millis(self.timeout),
            self.renew_interval.map(Duration::from_millis),
            self.failure_tolerance,
        )?;

        let lock_name = match self.lockname.filter(|name| !name.is_empty()) {
            Some(name) => name,
            None => derive_lock_name(&command),
        };

        Ok(GuardSettings {
            command,
            lock_name,
            lease,
            kill_grace: self.kill_grace.map(Duration::from_millis).unwrap_or(DEFAULT_KILL_GRACE),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BEATCOP: &str = r#"
[beatcop]
command = "sleep 10"
timeout = 3000
"#;

    fn with_redis(redis: &str) -> String {
        format!("[redis]\n{}\n{}", redis, BEATCOP)
    }

    fn config_error(contents: &str) -> String {
        match Settings::from_toml(contents) {
            Err(Error::Configuration(msg)) => msg,
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_single_tcp() {
        let settings = Settings::from_toml(&with_redis(
            "host = \"10.0.0.5\"\ndatabase = 2\npassword = \"pw\"",
        ))
        .unwrap();
        assert_eq!(
            settings.topology,
            Topology::Single {
                endpoint: Endpoint::Tcp {
                    host: "10.0.0.5".to_string(),
                    port: DEFAULT_PORT
                },
                database: 2,
                password: Some("pw".to_string()),
            }
        );
        assert_eq!(settings.guard.lease.ttl, Duration::from_millis(3000));
        assert_eq!(settings.guard.lease.renew_interval, Duration::from_millis(1000));
        assert_eq!(settings.guard.lease.failure_tolerance, 1);
        assert_eq!(settings.guard.kill_grace, DEFAULT_KILL_GRACE);
    }

    #[test]
    fn test_unix_socket() {
        let explicit = Settings::from_toml(&with_redis("socket = \"/run/redis.sock\"")).unwrap();
        let via_host = Settings::from_toml(&with_redis("host = \"/run/redis.sock\"")).unwrap();
        let expected = Topology::Single {
            endpoint: Endpoint::Unix(PathBuf::from("/run/redis.sock")),
            database: 0,
            password: None,
        };
        assert_eq!(explicit.topology, expected);
        assert_eq!(via_host.topology, expected);
    }

    #[test]
    fn test_cluster_nodes() {
        let list = Settings::from_toml(&with_redis(
            "startup_nodes = [\"10.0.0.1:7000\", \"[::1]:7001\"]",
        ))
        .unwrap();
        assert_eq!(
            list.topology,
            Topology::Cluster {
                nodes: vec![("10.0.0.1".to_string(), 7000), ("::1".to_string(), 7001)],
                password: None,
            }
        );

        let text = Settings::from_toml(&with_redis(
            "startup_nodes = \"\"\"\n10.0.0.1:7000\n10.0.0.2:7000\n\"\"\"",
        ))
        .unwrap();
        match text.topology {
            Topology::Cluster { nodes, .. } => assert_eq!(nodes.len(), 2),
            other => panic!("expected cluster, got {:?}", other),
        }
    }

    #[test]
    fn test_topology_must_be_exactly_one() {
        let both = config_error(&with_redis("host = \"a\"\nstartup_nodes = [\"b:1\"]"));
        assert!(both.contains("not both"));

        let neither = config_error(&with_redis("port = 6379"));
        assert!(neither.contains("either"));

        config_error(&with_redis("host = \"a\"\nsocket = \"/tmp/r.sock\""));
        config_error(&with_redis("startup_nodes = [\"b:1\"]\ndatabase = 1"));
        config_error(&with_redis("startup_nodes = [\"nocolon\"]"));
        config_error(&with_redis("startup_nodes = []"));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        config_error(&with_redis("host = \"a\"\nhots = \"b\""));
    }

    #[test]
    fn test_lease_timing_validation() {
        assert!(LeaseSettings::new(Duration::ZERO, None, None).is_err());
        assert!(LeaseSettings::new(Duration::from_secs(5), Some(Duration::from_secs(5)), None).is_err());
        assert!(LeaseSettings::new(Duration::from_secs(5), Some(Duration::ZERO), None).is_err());
        assert!(LeaseSettings::new(Duration::from_secs(5), None, Some(0)).is_err());

        // 2 x 2s stays below 5s, 3 x 2s does not
        let ok = LeaseSettings::new(Duration::from_secs(5), Some(Duration::from_secs(2)), Some(2));
        assert!(ok.is_ok());
        let too_loose = LeaseSettings::new(Duration::from_secs(5), Some(Duration::from_secs(2)), Some(3));
        assert!(too_loose.is_err());
    }

    #[test]
    fn test_command_modes() {
        let direct = Settings::from_toml(&with_redis("host = \"a\"")).unwrap();
        assert_eq!(
            direct.guard.command,
            CommandSpec::Direct(vec!["sleep".to_string(), "10".to_string()])
        );

        let shell = Settings::from_toml(
            "[redis]\nhost = \"a\"\n[beatcop]\ncommand = \"echo $HOME | wc -c\"\nshell = true\ntimeout = 1000\n",
        )
        .unwrap();
        assert_eq!(shell.guard.command, CommandSpec::shell("echo $HOME | wc -c"));

        let argv = Settings::from_toml(
            "[redis]\nhost = \"a\"\n[beatcop]\ncommand = [\"echo\", \"a b\"]\ntimeout = 1000\n",
        )
        .unwrap();
        assert_eq!(
            argv.guard.command,
            CommandSpec::Direct(vec!["echo".to_string(), "a b".to_string()])
        );

        config_error("[redis]\nhost = \"a\"\n[beatcop]\ncommand = \"\"\ntimeout = 1000\n");
        config_error("[redis]\nhost = \"a\"\n[beatcop]\ncommand = []\ntimeout = 1000\n");
    }

    #[test]
    fn test_lock_name() {
        let derived = Settings::from_toml(&with_redis("host = \"a\"")).unwrap();
        let spec = CommandSpec::parse_direct("sleep 10").unwrap();
        assert_eq!(derived.guard.lock_name, derive_lock_name(&spec));

        let named = Settings::from_toml(
            "[redis]\nhost = \"a\"\n[beatcop]\ncommand = \"x\"\ntimeout = 1000\nlockname = \"nightly\"\n",
        )
        .unwrap();
        assert_eq!(named.guard.lock_name, "nightly");

        let overridden = named.with_lock_name(Some("from-cli".to_string()));
        assert_eq!(overridden.guard.lock_name, "from-cli");
    }

    #[test]
    fn test_load_missing_file() {
        let err = Settings::load(Path::new("/nonexistent/beatcop.toml")).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
