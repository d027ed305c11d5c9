//! In-process connection collaborator.
//!
//! [`LoopbackBroker`] accepts connections without touching the network. It
//! checks credentials and virtual hosts, simulates connect and close
//! latency on the reactor's clock and, like a real client library, keeps
//! the connection of the current thread in thread-local bookkeeping that
//! [`ConnectionLifecycle::cleanup_state`] resets.

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    rc::Rc,
    time::Duration,
};

use async_trait::async_trait;
use tidepool_core::{
    Connection, ConnectionError, ConnectionHandle, ConnectionLifecycle, ConnectionOptions,
};

thread_local! {
    /// Connection most recently opened on this thread and not yet cleaned up.
    static CURRENT: RefCell<Option<Rc<LoopbackConnection>>> = const { RefCell::new(None) };
}

/// Connection of the current thread, if any.
pub fn current_connection() -> Option<ConnectionHandle> {
    CURRENT.with(|current| {
        current
            .borrow()
            .clone()
            .map(|connection| connection as ConnectionHandle)
    })
}

fn set_current(connection: Option<Rc<LoopbackConnection>>) {
    CURRENT.with(|current| *current.borrow_mut() = connection);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Closing,
    Closed,
}

/// A connection handed out by [`LoopbackBroker`].
pub struct LoopbackConnection {
    id: u64,
    user: String,
    vhost: String,
    phase: Cell<Phase>,
}

impl LoopbackConnection {
    /// User the connection logged in as.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Virtual host the connection is bound to.
    pub fn vhost(&self) -> &str {
        &self.vhost
    }
}

impl fmt::Debug for LoopbackConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackConnection")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("vhost", &self.vhost)
            .field("phase", &self.phase.get())
            .finish()
    }
}

impl Connection for LoopbackConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_connected(&self) -> bool {
        self.phase.get() == Phase::Open
    }

    fn is_closing(&self) -> bool {
        self.phase.get() == Phase::Closing
    }
}

/// Counters of what a broker has been asked to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Successful connects.
    pub connects: u64,
    /// Rejected or failed connects.
    pub refused: u64,
    /// Completed closes.
    pub closes: u64,
    /// `cleanup_state` calls.
    pub cleanups: u64,
}

/// In-process [`ConnectionLifecycle`].
pub struct LoopbackBroker {
    connect_latency: Duration,
    close_latency: Option<Duration>,
    users: BTreeMap<String, String>,
    vhosts: BTreeSet<String>,
    unreachable: BTreeSet<String>,
    next_id: Cell<u64>,
    open: RefCell<HashMap<u64, Rc<LoopbackConnection>>>,
    stats: Cell<BrokerStats>,
}

impl fmt::Debug for LoopbackBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackBroker")
            .field("connect_latency", &self.connect_latency)
            .field("close_latency", &self.close_latency)
            .field("users", &self.users.keys().collect::<Vec<_>>())
            .field("vhosts", &self.vhosts)
            .field("unreachable", &self.unreachable)
            .field("stats", &self.stats.get())
            .finish()
    }
}

impl Default for LoopbackBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackBroker {
    /// Broker accepting `guest`/`guest` on vhost `/`, with 10ms connect and
    /// close latency.
    pub fn new() -> Self {
        Self {
            connect_latency: Duration::from_millis(10),
            close_latency: Some(Duration::from_millis(10)),
            users: BTreeMap::from([("guest".to_string(), "guest".to_string())]),
            vhosts: BTreeSet::from(["/".to_string()]),
            unreachable: BTreeSet::new(),
            next_id: Cell::new(1),
            open: RefCell::new(HashMap::new()),
            stats: Cell::new(BrokerStats::default()),
        }
    }

    /// Time a connect takes before it succeeds or fails.
    pub fn with_connect_latency(mut self, latency: Duration) -> Self {
        self.connect_latency = latency;
        self
    }

    /// Time a close takes to complete.
    pub fn with_close_latency(mut self, latency: Duration) -> Self {
        self.close_latency = Some(latency);
        self
    }

    /// Closes never complete.
    pub fn with_stalled_close(mut self) -> Self {
        self.close_latency = None;
        self
    }

    /// Accept `user` with `pass`.
    pub fn with_user(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.users.insert(user.into(), pass.into());
        self
    }

    /// Accept connections to `vhost`.
    pub fn with_vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhosts.insert(vhost.into());
        self
    }

    /// Fail every connect to `host` as unreachable.
    pub fn with_unreachable_host(mut self, host: impl Into<String>) -> Self {
        self.unreachable.insert(host.into());
        self
    }

    /// What this broker has done so far.
    pub fn stats(&self) -> BrokerStats {
        self.stats.get()
    }

    /// Number of connections not closed yet.
    pub fn open_connections(&self) -> usize {
        self.open.borrow().len()
    }

    fn bump(&self, f: impl FnOnce(&mut BrokerStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    fn authorize(&self, options: &ConnectionOptions) -> Result<(), ConnectionError> {
        if self.unreachable.contains(&options.host) {
            return Err(ConnectionError::Unreachable {
                host: options.host.clone(),
                port: options.port,
            });
        }
        if self.users.get(&options.user) != Some(&options.pass) {
            return Err(ConnectionError::AccessRefused {
                user: options.user.clone(),
            });
        }
        if !self.vhosts.contains(&options.vhost) {
            return Err(ConnectionError::UnknownVhost {
                vhost: options.vhost.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl ConnectionLifecycle for LoopbackBroker {
    async fn start_connection(
        &self,
        options: &ConnectionOptions,
    ) -> Result<ConnectionHandle, ConnectionError> {
        if options.logging {
            tracing::debug!(
                host = %options.host,
                port = options.port,
                user = %options.user,
                vhost = %options.vhost,
                "loopback connect"
            );
        }

        let handshake = tokio::time::sleep(self.connect_latency);
        let outcome = match options.timeout {
            Some(limit) => tokio::time::timeout(limit, handshake)
                .await
                .map_err(|_| ConnectionError::Timeout(limit))
                .and_then(|()| self.authorize(options)),
            None => {
                handshake.await;
                self.authorize(options)
            }
        };
        if let Err(error) = outcome {
            self.bump(|stats| stats.refused += 1);
            return Err(error);
        }

        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let connection = Rc::new(LoopbackConnection {
            id,
            user: options.user.clone(),
            vhost: options.vhost.clone(),
            phase: Cell::new(Phase::Open),
        });
        self.open.borrow_mut().insert(id, connection.clone());
        set_current(Some(connection.clone()));
        self.bump(|stats| stats.connects += 1);
        if options.logging {
            tracing::debug!(connection = id, "loopback connection open");
        }
        let handle: ConnectionHandle = connection;
        Ok(handle)
    }

    async fn stop_connection(&self, connection: &ConnectionHandle) -> Result<(), ConnectionError> {
        let Some(open) = self.open.borrow().get(&connection.id()).cloned() else {
            return Err(ConnectionError::Closed);
        };
        open.phase.set(Phase::Closing);

        match self.close_latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => std::future::pending::<()>().await,
        }

        open.phase.set(Phase::Closed);
        self.open.borrow_mut().remove(&open.id);
        self.bump(|stats| stats.closes += 1);
        Ok(())
    }

    fn cleanup_state(&self) {
        for (id, connection) in self.open.borrow_mut().drain() {
            tracing::debug!(connection = id, "unclosed connection dropped by cleanup");
            connection.phase.set(Phase::Closed);
        }
        set_current(None);
        self.bump(|stats| stats.cleanups += 1);
    }
}
