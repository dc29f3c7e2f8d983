use std::io;

/// What the `watch` daemon was asked to do from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Index,
    Dump,
    Shutdown,
}

/// Process signals mapped onto [`Request`]s.
///
/// `SIGUSR1` triggers an index and `SIGUSR2` a counter dump; `SIGINT` and
/// `SIGTERM` stop the daemon.
#[cfg(unix)]
pub struct Signals {
    index: tokio::signal::unix::Signal,
    dump: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            index: signal(SignalKind::user_defined1())?,
            dump: signal(SignalKind::user_defined2())?,
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    pub async fn recv(&mut self) -> Request {
        tokio::select! {
            biased;
            _ = self.interrupt.recv() => Request::Shutdown,
            _ = self.terminate.recv() => Request::Shutdown,
            _ = self.index.recv() => Request::Index,
            _ = self.dump.recv() => Request::Dump,
        }
    }
}

/// Only Ctrl-C is available off unix; indexing then relies on the interval.
#[cfg(not(unix))]
pub struct Signals;

#[cfg(not(unix))]
impl Signals {
    pub fn install() -> io::Result<Self> {
        Ok(Self)
    }

    pub async fn recv(&mut self) -> Request {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Request::Shutdown,
            Err(_) => std::future::pending().await,
        }
    }
}
