use std::fmt;
use tokio::signal::unix::{signal, Signal, SignalKind};

/// An external request to stop, identified by its signal number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shutdown {
    pub signal: i32,
}

impl Shutdown {
    pub fn exit_code(&self) -> i32 {
        crate::error::exit::signaled(self.signal)
    }
}

impl fmt::Display for Shutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.signal {
            libc::SIGINT => f.write_str("SIGINT"),
            libc::SIGTERM => f.write_str("SIGTERM"),
            libc::SIGHUP => f.write_str("SIGHUP"),
            other => write!(f, "signal {}", other),
        }
    }
}

/// SIGINT, SIGTERM and SIGHUP listeners.
///
/// Install before acquiring the lock: signals that arrive before `recv` is
/// first polled are kept, not lost.
#[derive(Debug)]
pub struct ShutdownSignals {
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
}

impl ShutdownSignals {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    pub async fn recv(&mut self) -> Shutdown {
        let signal = tokio::select! {
            _ = self.interrupt.recv() => libc::SIGINT,
            _ = self.terminate.recv() => libc::SIGTERM,
            _ = self.hangup.recv() => libc::SIGHUP,
        };
        Shutdown { signal }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_exit_code() {
        let shutdown = Shutdown { signal: libc::SIGTERM };
        assert_eq!(shutdown.exit_code(), 143);
        assert_eq!(shutdown.to_string(), "SIGTERM");
    }

    #[tokio::test]
    async fn test_receives_hangup() {
        let mut signals = ShutdownSignals::install().unwrap();
        // SAFETY: raising a signal we have a handler for
        unsafe {
            libc::raise(libc::SIGHUP);
        }
        let shutdown = tokio::time::timeout(std::time::Duration::from_secs(5), signals.recv())
            .await
            .unwrap();
        assert_eq!(shutdown.signal, libc::SIGHUP);
    }
}
