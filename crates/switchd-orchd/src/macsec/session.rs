//! MACsec key-agreement session management.
//!
//! Each enabled port gets a spawned supplicant process driven over a
//! line-oriented Unix control socket: a request is a whitespace-joined
//! argument list, and a reply succeeds only when its first token is
//! exactly `OK`. Process spawning and the socket transport are trait
//! seams so the session state machine is testable without a real
//! supplicant.

use super::types::{MacsecPolicy, MacsecProfile};
use async_trait::async_trait;
use log::{info, warn};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default control-socket directory.
const DEFAULT_SOCK_DIR: &str = "/var/run/macsec";

/// Readiness poll budget: attempts and inter-attempt delay.
const DEFAULT_POLL_ATTEMPTS: usize = 10;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors from MACsec session management.
#[derive(Debug, Error)]
pub enum MacsecError {
    #[error("failed to spawn supplicant for {port}: {source}")]
    SpawnFailed {
        port: String,
        #[source]
        source: io::Error,
    },

    #[error("supplicant for {port} not ready after {attempts} attempts")]
    SupplicantNotReady { port: String, attempts: usize },

    #[error("control command '{command}' failed: {reply}")]
    CommandFailed { command: String, reply: String },

    #[error("control socket error: {0}")]
    Socket(#[from] io::Error),

    #[error("no active session for {0}")]
    NoSession(String),
}

/// Lifecycle of one port's supplicant session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Starting,
    Ready,
    Failed,
}

/// A spawned supplicant process.
pub trait SupplicantProcess: Send + Sync {
    /// Process id, if still known.
    fn id(&self) -> Option<u32>;

    /// Terminates the process (signal + wait).
    fn terminate(&mut self) -> io::Result<()>;
}

/// Spawns supplicant processes bound to a per-port control socket.
pub trait SupplicantSpawner: Send + Sync {
    fn spawn(&self, port: &str, socket_path: &Path) -> io::Result<Box<dyn SupplicantProcess>>;
}

/// Issues one request over the control socket and returns the raw reply.
#[async_trait]
pub trait MkaTransport: Send + Sync {
    async fn command(&self, socket_path: &Path, args: &[&str]) -> io::Result<String>;
}

struct MkaSession {
    profile_name: String,
    socket_path: PathBuf,
    state: SessionState,
    process: Box<dyn SupplicantProcess>,
}

/// Manages the supplicant session for every MACsec-enabled port.
pub struct MkaSessionManager {
    spawner: Box<dyn SupplicantSpawner>,
    transport: Box<dyn MkaTransport>,
    sessions: HashMap<String, MkaSession>,
    sock_dir: PathBuf,
    poll_attempts: usize,
    poll_interval: Duration,
}

impl MkaSessionManager {
    /// Creates a manager with the given process and transport seams.
    pub fn new(spawner: Box<dyn SupplicantSpawner>, transport: Box<dyn MkaTransport>) -> Self {
        Self {
            spawner,
            transport,
            sessions: HashMap::new(),
            sock_dir: PathBuf::from(DEFAULT_SOCK_DIR),
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides the readiness poll budget.
    pub fn with_poll_budget(mut self, attempts: usize, interval: Duration) -> Self {
        self.poll_attempts = attempts;
        self.poll_interval = interval;
        self
    }

    /// Overrides the control-socket directory.
    pub fn with_sock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sock_dir = dir.into();
        self
    }

    /// Returns true if the port has an active session.
    pub fn has_session(&self, port: &str) -> bool {
        self.sessions.contains_key(port)
    }

    /// Returns the session state for a port.
    pub fn session_state(&self, port: &str) -> SessionState {
        self.sessions
            .get(port)
            .map(|s| s.state)
            .unwrap_or(SessionState::NotStarted)
    }

    /// Returns the profile name a port's session was built from.
    pub fn session_profile(&self, port: &str) -> Option<&str> {
        self.sessions.get(port).map(|s| s.profile_name.as_str())
    }

    /// Returns all ports with active sessions.
    pub fn active_ports(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    fn socket_path(&self, port: &str) -> PathBuf {
        self.sock_dir.join(port)
    }

    async fn send_expect_ok(&self, socket: &Path, args: &[&str]) -> Result<(), MacsecError> {
        let reply = self.transport.command(socket, args).await?;
        if reply.split_whitespace().next() == Some("OK") {
            Ok(())
        } else {
            Err(MacsecError::CommandFailed {
                command: args.join(" "),
                reply,
            })
        }
    }

    /// Polls the control socket until the supplicant answers a status
    /// query, within the fixed attempt budget.
    async fn wait_ready(&self, port: &str, socket: &Path) -> Result<(), MacsecError> {
        for attempt in 0..self.poll_attempts {
            if self.send_expect_ok(socket, &["STATUS"]).await.is_ok() {
                return Ok(());
            }
            if attempt + 1 < self.poll_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
        Err(MacsecError::SupplicantNotReady {
            port: port.to_string(),
            attempts: self.poll_attempts,
        })
    }

    /// Enables MACsec on a port with the given profile.
    ///
    /// Spawns the supplicant, waits for its control socket, then issues
    /// the configuration sequence, committing the network profile as the
    /// last step. Any command failure aborts and rolls back by disabling
    /// the port.
    pub async fn enable(
        &mut self,
        port: &str,
        profile_name: &str,
        profile: &MacsecProfile,
    ) -> Result<(), MacsecError> {
        let socket = self.socket_path(port);

        let process =
            self.spawner
                .spawn(port, &socket)
                .map_err(|source| MacsecError::SpawnFailed {
                    port: port.to_string(),
                    source,
                })?;
        self.sessions.insert(
            port.to_string(),
            MkaSession {
                profile_name: profile_name.to_string(),
                socket_path: socket.clone(),
                state: SessionState::Starting,
                process,
            },
        );

        if let Err(e) = self.wait_ready(port, &socket).await {
            if let Some(session) = self.sessions.get_mut(port) {
                session.state = SessionState::Failed;
            }
            let _ = self.disable(port).await;
            return Err(e);
        }

        if let Err(e) = self.configure(port, &socket, profile).await {
            warn!("MACsec configuration for {} failed, rolling back: {}", port, e);
            let _ = self.disable(port).await;
            return Err(e);
        }

        if let Some(session) = self.sessions.get_mut(port) {
            session.state = SessionState::Ready;
        }
        info!("MACsec enabled on {} with profile {}", port, profile_name);
        Ok(())
    }

    async fn configure(
        &self,
        port: &str,
        socket: &Path,
        profile: &MacsecProfile,
    ) -> Result<(), MacsecError> {
        self.send_expect_ok(socket, &["INTERFACE_ADD", port]).await?;
        self.send_expect_ok(socket, &["NETWORK_ADD", port]).await?;
        self.send_expect_ok(socket, &["NETWORK_SET", port, "mka_cak", &profile.primary_cak])
            .await?;
        self.send_expect_ok(socket, &["NETWORK_SET", port, "mka_ckn", &profile.primary_ckn])
            .await?;
        self.send_expect_ok(
            socket,
            &["NETWORK_SET", port, "cipher_suite", profile.cipher_suite.as_str()],
        )
        .await?;
        let encrypt = match profile.policy {
            MacsecPolicy::Security => "1",
            MacsecPolicy::IntegrityOnly => "0",
        };
        self.send_expect_ok(socket, &["NETWORK_SET", port, "macsec_encrypt", encrypt])
            .await?;
        if profile.replay_protect {
            let window = profile.replay_window.to_string();
            self.send_expect_ok(socket, &["NETWORK_SET", port, "replay_protect", &window])
                .await?;
        }
        let priority = profile.mka_priority.to_string();
        self.send_expect_ok(socket, &["NETWORK_SET", port, "mka_priority", &priority])
            .await?;
        if let Some(period) = profile.rekey_period {
            let period = period.to_string();
            self.send_expect_ok(socket, &["NETWORK_SET", port, "rekey_period", &period])
                .await?;
        }
        let send_sci = if profile.send_sci { "1" } else { "0" };
        self.send_expect_ok(socket, &["NETWORK_SET", port, "send_sci", send_sci])
            .await?;
        // Commit last: nothing takes effect until the network is enabled.
        self.send_expect_ok(socket, &["NETWORK_ENABLE", port]).await
    }

    /// Disables MACsec on a port.
    ///
    /// De-registers the interface and terminates the supplicant; reports
    /// the first failure but always removes the port from the session
    /// cache.
    pub async fn disable(&mut self, port: &str) -> Result<(), MacsecError> {
        let mut session = self
            .sessions
            .remove(port)
            .ok_or_else(|| MacsecError::NoSession(port.to_string()))?;

        let deregister = self
            .send_expect_ok(&session.socket_path, &["INTERFACE_REMOVE", port])
            .await;
        let terminate = session.process.terminate();

        info!("MACsec disabled on {}", port);
        deregister?;
        terminate?;
        Ok(())
    }

    /// Disables every remaining session on orderly shutdown.
    pub async fn shutdown(&mut self) {
        for port in self.active_ports() {
            if let Err(e) = self.disable(&port).await {
                warn!("shutdown: failed to disable MACsec on {}: {}", port, e);
            }
        }
    }
}

impl Drop for MkaSessionManager {
    fn drop(&mut self) {
        // Sockets are gone at this point; at minimum never leak a
        // supplicant process.
        for (port, session) in self.sessions.iter_mut() {
            if let Err(e) = session.process.terminate() {
                warn!("drop: failed to terminate supplicant for {}: {}", port, e);
            }
        }
    }
}

/// Spawns a real `wpa_supplicant` bound to a per-port control socket.
pub struct WpaSupplicantSpawner {
    binary: PathBuf,
    driver: String,
}

impl WpaSupplicantSpawner {
    pub fn new(binary: impl Into<PathBuf>, driver: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            driver: driver.into(),
        }
    }
}

impl Default for WpaSupplicantSpawner {
    fn default() -> Self {
        Self::new("/sbin/wpa_supplicant", "macsec_linux")
    }
}

struct ChildProcess(std::process::Child);

impl SupplicantProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        Some(self.0.id())
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.0.kill()?;
        self.0.wait().map(|_| ())
    }
}

impl SupplicantSpawner for WpaSupplicantSpawner {
    fn spawn(&self, port: &str, socket_path: &Path) -> io::Result<Box<dyn SupplicantProcess>> {
        let child = std::process::Command::new(&self.binary)
            .arg("-B")
            .arg("-D")
            .arg(&self.driver)
            .arg("-i")
            .arg(port)
            .arg("-g")
            .arg(socket_path)
            .spawn()?;
        Ok(Box::new(ChildProcess(child)))
    }
}

/// Line-oriented request/response over a Unix domain socket.
pub struct UnixSocketTransport;

#[async_trait]
impl MkaTransport for UnixSocketTransport {
    async fn command(&self, socket_path: &Path, args: &[&str]) -> io::Result<String> {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let stream = tokio::net::UnixStream::connect(socket_path).await?;
        let (read_half, mut write_half) = stream.into_split();

        let request = format!("{}\n", args.join(" "));
        write_half.write_all(request.as_bytes()).await?;

        let mut reply = String::new();
        BufReader::new(read_half).read_line(&mut reply).await?;
        Ok(reply.trim_end().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macsec::types::CipherSuite;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn profile() -> MacsecProfile {
        MacsecProfile {
            cipher_suite: CipherSuite::GcmAes128,
            primary_cak: "0123456789abcdef0123456789abcdef".to_string(),
            primary_ckn: "6162636465666768".to_string(),
            policy: MacsecPolicy::Security,
            send_sci: true,
            mka_priority: 255,
            rekey_period: None,
            replay_protect: false,
            replay_window: 0,
        }
    }

    #[derive(Default)]
    struct FakeProcessState {
        spawned: AtomicU32,
        terminated: AtomicU32,
    }

    struct FakeProcess(Arc<FakeProcessState>);

    impl SupplicantProcess for FakeProcess {
        fn id(&self) -> Option<u32> {
            Some(4242)
        }

        fn terminate(&mut self) -> io::Result<()> {
            self.0.terminated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeSpawner {
        state: Arc<FakeProcessState>,
        fail: AtomicBool,
    }

    impl FakeSpawner {
        fn new() -> (Self, Arc<FakeProcessState>) {
            let state = Arc::new(FakeProcessState::default());
            (
                Self {
                    state: Arc::clone(&state),
                    fail: AtomicBool::new(false),
                },
                state,
            )
        }
    }

    impl SupplicantSpawner for FakeSpawner {
        fn spawn(&self, _port: &str, _socket: &Path) -> io::Result<Box<dyn SupplicantProcess>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no binary"));
            }
            self.state.spawned.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeProcess(Arc::clone(&self.state))))
        }
    }

    #[derive(Default)]
    struct FakeTransportState {
        commands: Vec<String>,
        /// Commands answered with a failure reply.
        fail_on: Vec<String>,
        /// STATUS replies to swallow before answering OK.
        unready_polls: usize,
        /// Never answer STATUS successfully.
        never_ready: bool,
    }

    #[derive(Clone)]
    struct FakeTransport(Arc<Mutex<FakeTransportState>>);

    impl FakeTransport {
        fn new() -> (Self, Arc<Mutex<FakeTransportState>>) {
            let state = Arc::new(Mutex::new(FakeTransportState::default()));
            (Self(Arc::clone(&state)), state)
        }
    }

    #[async_trait]
    impl MkaTransport for FakeTransport {
        async fn command(&self, _socket: &Path, args: &[&str]) -> io::Result<String> {
            let mut state = self.0.lock().unwrap();
            let command = args.join(" ");
            state.commands.push(command.clone());

            if args[0] == "STATUS" {
                if state.never_ready {
                    return Ok("FAIL not running".to_string());
                }
                if state.unready_polls > 0 {
                    state.unready_polls -= 1;
                    return Ok("FAIL starting".to_string());
                }
                return Ok("OK running".to_string());
            }
            if state.fail_on.iter().any(|f| command.starts_with(f.as_str())) {
                return Ok("FAIL rejected".to_string());
            }
            Ok("OK".to_string())
        }
    }

    fn manager(
        spawner: FakeSpawner,
        transport: FakeTransport,
    ) -> MkaSessionManager {
        MkaSessionManager::new(Box::new(spawner), Box::new(transport))
            .with_poll_budget(3, Duration::from_millis(1))
            .with_sock_dir("/tmp/mka-test")
    }

    #[tokio::test]
    async fn test_enable_issues_ordered_sequence_commit_last() {
        let (spawner, _proc_state) = FakeSpawner::new();
        let (transport, transport_state) = FakeTransport::new();
        let mut mgr = manager(spawner, transport);

        mgr.enable("Ethernet0", "p1", &profile()).await.unwrap();
        assert_eq!(mgr.session_state("Ethernet0"), SessionState::Ready);
        assert_eq!(mgr.session_profile("Ethernet0"), Some("p1"));

        let commands = transport_state.lock().unwrap().commands.clone();
        let non_status: Vec<&String> =
            commands.iter().filter(|c| !c.starts_with("STATUS")).collect();
        assert_eq!(non_status[0], "INTERFACE_ADD Ethernet0");
        assert_eq!(non_status[1], "NETWORK_ADD Ethernet0");
        assert!(non_status[2].starts_with("NETWORK_SET Ethernet0 mka_cak"));
        assert!(non_status[3].starts_with("NETWORK_SET Ethernet0 mka_ckn"));
        // The commit is the very last command.
        assert_eq!(*non_status.last().unwrap(), "NETWORK_ENABLE Ethernet0");
    }

    #[tokio::test]
    async fn test_enable_polls_within_budget() {
        let (spawner, _proc_state) = FakeSpawner::new();
        let (transport, transport_state) = FakeTransport::new();
        transport_state.lock().unwrap().unready_polls = 2;
        let mut mgr = manager(spawner, transport);

        mgr.enable("Ethernet0", "p1", &profile()).await.unwrap();
        assert_eq!(mgr.session_state("Ethernet0"), SessionState::Ready);

        let status_polls = transport_state
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter(|c| c.starts_with("STATUS"))
            .count();
        assert_eq!(status_polls, 3);
    }

    #[tokio::test]
    async fn test_enable_fails_when_budget_exhausted() {
        let (spawner, proc_state) = FakeSpawner::new();
        let (transport, transport_state) = FakeTransport::new();
        transport_state.lock().unwrap().never_ready = true;
        let mut mgr = manager(spawner, transport);

        let err = mgr.enable("Ethernet0", "p1", &profile()).await.unwrap_err();
        assert!(matches!(
            err,
            MacsecError::SupplicantNotReady { attempts: 3, .. }
        ));
        // The failed session never lingers and the process is reaped.
        assert!(!mgr.has_session("Ethernet0"));
        assert_eq!(proc_state.terminated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_command_failure_rolls_back() {
        let (spawner, proc_state) = FakeSpawner::new();
        let (transport, transport_state) = FakeTransport::new();
        transport_state
            .lock()
            .unwrap()
            .fail_on
            .push("NETWORK_ENABLE".to_string());
        let mut mgr = manager(spawner, transport);

        let err = mgr.enable("Ethernet0", "p1", &profile()).await.unwrap_err();
        assert!(matches!(err, MacsecError::CommandFailed { .. }));
        assert!(!mgr.has_session("Ethernet0"));
        assert_eq!(proc_state.terminated.load(Ordering::SeqCst), 1);

        // Rollback went through interface de-registration.
        let commands = transport_state.lock().unwrap().commands.clone();
        assert!(commands.iter().any(|c| c == "INTERFACE_REMOVE Ethernet0"));
    }

    #[tokio::test]
    async fn test_disable_always_evicts_session() {
        let (spawner, proc_state) = FakeSpawner::new();
        let (transport, transport_state) = FakeTransport::new();
        let mut mgr = manager(spawner, transport);
        mgr.enable("Ethernet0", "p1", &profile()).await.unwrap();

        // De-registration fails, the session is gone regardless.
        transport_state
            .lock()
            .unwrap()
            .fail_on
            .push("INTERFACE_REMOVE".to_string());
        let result = mgr.disable("Ethernet0").await;
        assert!(result.is_err());
        assert!(!mgr.has_session("Ethernet0"));
        assert_eq!(proc_state.terminated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_disables_all() {
        let (spawner, proc_state) = FakeSpawner::new();
        let (transport, _) = FakeTransport::new();
        let mut mgr = manager(spawner, transport);
        mgr.enable("Ethernet0", "p1", &profile()).await.unwrap();
        mgr.enable("Ethernet4", "p1", &profile()).await.unwrap();

        mgr.shutdown().await;
        assert!(mgr.active_ports().is_empty());
        assert_eq!(proc_state.terminated.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_spawn_failure_surfaces() {
        let (spawner, _proc_state) = FakeSpawner::new();
        spawner.fail.store(true, Ordering::SeqCst);
        let (transport, _) = FakeTransport::new();
        let mut mgr = manager(spawner, transport);

        let err = mgr.enable("Ethernet0", "p1", &profile()).await.unwrap_err();
        assert!(matches!(err, MacsecError::SpawnFailed { .. }));
        assert!(!mgr.has_session("Ethernet0"));
    }
}
