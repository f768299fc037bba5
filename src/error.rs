use thiserror::Error;

/// Process exit codes. Values follow `sysexits.h` where one fits.
pub mod exit {
    pub const SUCCESS: i32 = 0;
    pub const USAGE: i32 = 64;
    pub const NO_HOST: i32 = 68;
    /// The lease was lost while the guarded command was running.
    pub const LEASE_LOST: i32 = 69;
    pub const OS_ERR: i32 = 71;
    /// Another node holds the lock; nothing was spawned.
    pub const NOT_OWNER: i32 = 75;
    pub const PROTOCOL: i32 = 76;
    pub const CONFIG: i32 = 78;

    /// Shell convention for "terminated by signal `sig`".
    pub fn signaled(sig: i32) -> i32 {
        128 + sig
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Coordination backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Coordination backend error: {0}")]
    Backend(String),

    #[error("Redis {version} is too old, at least 2.6.12 is required")]
    UnsupportedBackend { version: String },

    #[error("Could not spawn {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Lease {name:?} is not held")]
    NotHeld { name: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Configuration(_) => exit::CONFIG,
            Error::BackendUnavailable(_) => exit::NO_HOST,
            Error::Backend(_) | Error::UnsupportedBackend { .. } => exit::PROTOCOL,
            Error::Spawn { .. } | Error::Io(_) => exit::OS_ERR,
            Error::NotHeld { .. } => exit::LEASE_LOST,
        }
    }

    /// Whether the error says the backend could not be reached at all, as
    /// opposed to the backend answering with something unexpected.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::BackendUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
