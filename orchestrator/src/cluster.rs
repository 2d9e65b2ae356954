//! Cluster Lifecycle Manager
//!
//! Stands up a disposable local zstor cluster for exactly one configuration
//! point and tears it down again:
//!
//! - `zstordb` data-shard servers, one per data or parity shard, each with its
//!   own data and metadata directories
//! - `etcd` metadata-shard coordinators joined into one cluster through a
//!   shared cluster token
//!
//! Every spawned process is owned by a [`ClusterHandle`]. Dropping the handle
//! runs the same teardown as calling [`ClusterHandle::teardown`], so an early
//! return on any error path still stops the servers and removes their
//! directories.

use std::{
    collections::HashSet,
    fmt,
    fs::{self, File},
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream, ToSocketAddrs},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, trace, warn};
use rand::Rng;
use socket2::{Domain, Socket, Type};
use tempfile::TempDir;

use crate::{
    sweep::{DeploymentSpec, ProfileDirs, ProfileMode},
    types::{BenchError, BenchResult, StopFlag},
};

/// Host every local server binds to
pub const LOCAL_HOST: Ipv4Addr = Ipv4Addr::LOCALHOST;

/// Default bound on cluster start-up
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(20);

/// Pause between two readiness polling rounds
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Time a server gets to exit after the termination signal
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

const EXIT_POLL: Duration = Duration::from_millis(20);
const STDERR_TAIL_LINES: usize = 5;

/// An executable plus fixed leading arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub path: PathBuf,
    pub args: Vec<String>,
}

impl Program {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Looks `name` up in `PATH` (or accepts it as-is if it is a path)
    pub fn resolve(name: &str) -> BenchResult<Self> {
        which::which(name)
            .map(Self::new)
            .map_err(|e| BenchError::process(name, format!("binary not found: {e}")))
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.path);
        cmd.args(&self.args);
        cmd
    }

    fn name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| self.path.display().to_string(), |n| n.to_string_lossy().into_owned())
    }
}

/// The three external binaries driven by the orchestrator
#[derive(Debug, Clone)]
pub struct Binaries {
    /// Data-shard server
    pub zstordb: Program,
    /// Metadata-shard coordinator
    pub etcd: Program,
    /// Benchmark client
    pub client: Program,
}

impl Binaries {
    /// Resolves all three binaries up front so a missing one fails before the sweep
    pub fn resolve(zstordb: &str, etcd: &str, client: &str) -> BenchResult<Self> {
        Ok(Self {
            zstordb: Program::resolve(zstordb)?,
            etcd: Program::resolve(etcd)?,
            client: Program::resolve(client)?,
        })
    }
}

/// Check whether something accepts connections on an endpoint
pub trait PortProbe {
    fn is_listening(&self, endpoint: &str) -> bool;
}

/// Probes an endpoint by opening (and immediately closing) a TCP connection
#[derive(Debug, Clone, Copy)]
pub struct TcpConnectProbe {
    pub connect_timeout: Duration,
}

impl Default for TcpConnectProbe {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(200),
        }
    }
}

impl PortProbe for TcpConnectProbe {
    fn is_listening(&self, endpoint: &str) -> bool {
        let Ok(addrs) = endpoint.to_socket_addrs() else {
            return false;
        };
        addrs
            .into_iter()
            .any(|addr| TcpStream::connect_timeout(&addr, self.connect_timeout).is_ok())
    }
}

/// Hands out free local TCP ports, never the same one twice
#[derive(Debug, Default)]
pub struct PortAllocator {
    issued: HashSet<u16>,
}

impl PortAllocator {
    const MAX_ATTEMPTS: usize = 64;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds an ephemeral port, releases it and returns its number
    pub fn allocate(&mut self) -> BenchResult<u16> {
        for _ in 0..Self::MAX_ATTEMPTS {
            let port = pick_free_port()?;
            if self.issued.insert(port) {
                return Ok(port);
            }
            trace!("Port {port} already issued, picking another");
        }
        Err(BenchError::Io(io::Error::new(
            io::ErrorKind::AddrInUse,
            "could not find an unused local port",
        )))
    }
}

/// Opens a socket on an ephemeral local port and closes it again
pub fn pick_free_port() -> BenchResult<u16> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
    socket.bind(&SocketAddr::V4(SocketAddrV4::new(LOCAL_HOST, 0)).into())?;
    let port = socket
        .local_addr()?
        .as_socket()
        .map(|addr| addr.port())
        .ok_or_else(|| io::Error::other("socket has no inet address"))?;
    Ok(port)
}

/// Role of a cluster server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    DataShard,
    MetaShard,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DataShard => "data shard",
            Self::MetaShard => "metadata shard",
        })
    }
}

/// One spawned server and everything needed to stop it
#[derive(Debug)]
pub struct ServerProcess {
    pub name: String,
    pub role: Role,
    /// Client-reachable `host:port`
    pub endpoint: String,
    child: Child,
    stop_signal: libc::c_int,
    grace: Duration,
    stderr_log: PathBuf,
}

impl ServerProcess {
    /// Exit status if the process has already terminated
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Sends the termination signal, then kills the process if it outlives the grace period
    pub fn stop(&mut self) {
        if let Some(status) = self.exit_status() {
            debug!("{} {} already exited ({status})", self.role, self.name);
            return;
        }

        let Ok(pid) = libc::pid_t::try_from(self.child.id()) else {
            self.kill();
            return;
        };
        // SAFETY: `pid` is a child of this process that has not been reaped yet.
        if unsafe { libc::kill(pid, self.stop_signal) } != 0 {
            warn!(
                "Failed to signal {}: {}",
                self.name,
                io::Error::last_os_error()
            );
        }

        let deadline = Instant::now() + self.grace;
        while Instant::now() < deadline {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    debug!("{} {} stopped ({status})", self.role, self.name);
                    return;
                }
                Ok(None) => thread::sleep(EXIT_POLL),
                Err(e) => {
                    warn!("Failed to wait for {}: {e}", self.name);
                    break;
                }
            }
        }

        warn!(
            "Timed out waiting for {} {} to close, killing it",
            self.role, self.name
        );
        self.kill();
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("kill {}: {e}", self.name);
        }
        if let Err(e) = self.child.wait() {
            warn!("Failed to reap {}: {e}", self.name);
        }
    }

    /// Last lines the process wrote to stderr
    #[must_use]
    pub fn stderr_tail(&self) -> String {
        let content = fs::read_to_string(&self.stderr_log).unwrap_or_default();
        let lines: Vec<&str> = content.lines().collect();
        lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n")
    }
}

/// Live cluster of one configuration point
#[derive(Debug, Default)]
pub struct ClusterHandle {
    data_shards: Vec<ServerProcess>,
    meta_shards: Vec<ServerProcess>,
    dirs: Vec<TempDir>,
}

impl ClusterHandle {
    /// `host:port` of every data shard, in spawn order
    #[must_use]
    pub fn data_endpoints(&self) -> Vec<String> {
        self.data_shards.iter().map(|p| p.endpoint.clone()).collect()
    }

    /// Client `host:port` of every metadata shard, in spawn order
    #[must_use]
    pub fn meta_endpoints(&self) -> Vec<String> {
        self.meta_shards.iter().map(|p| p.endpoint.clone()).collect()
    }

    /// Every endpoint that must be listening before the cluster is usable
    #[must_use]
    pub fn endpoints(&self) -> Vec<String> {
        let mut all = self.data_endpoints();
        all.extend(self.meta_endpoints());
        all
    }

    /// Directories created for this cluster
    #[must_use]
    pub fn dirs(&self) -> Vec<PathBuf> {
        self.dirs.iter().map(|d| d.path().to_path_buf()).collect()
    }

    /// Operating-system ids of the live processes
    #[must_use]
    pub fn pids(&self) -> Vec<u32> {
        self.data_shards
            .iter()
            .chain(&self.meta_shards)
            .map(|p| p.child.id())
            .collect()
    }

    /// Describes every server that has already exited, with its stderr tail
    pub fn exited_servers(&mut self) -> Vec<String> {
        self.data_shards
            .iter_mut()
            .chain(self.meta_shards.iter_mut())
            .filter_map(|p| {
                let status = p.exit_status()?;
                Some(format!(
                    "{} {} ({}) exited with {status}: {}",
                    p.role,
                    p.name,
                    p.endpoint,
                    p.stderr_tail()
                ))
            })
            .collect()
    }

    /// Stops all servers and removes their directories
    ///
    /// Metadata shards go first, then data shards. Safe to call repeatedly and
    /// on a partially deployed cluster.
    pub fn teardown(&mut self) {
        if self.meta_shards.is_empty() && self.data_shards.is_empty() && self.dirs.is_empty() {
            return;
        }
        info!(
            "Stopping cluster: {} metadata shard(s), {} data shard(s)",
            self.meta_shards.len(),
            self.data_shards.len()
        );

        for mut server in self.meta_shards.drain(..) {
            server.stop();
        }
        for mut server in self.data_shards.drain(..) {
            server.stop();
        }

        for dir in self.dirs.drain(..) {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => trace!("Removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {e}", path.display()),
            }
        }
    }
}

impl Drop for ClusterHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Blocks until every endpoint accepts connections
///
/// Probes all endpoints once per round, sleeping `interval` between rounds,
/// against a deadline fixed before the first probe.
///
/// # Errors
///
/// - `DeploymentTimeout` naming the endpoints still down at the deadline
/// - `Interrupted` if the stop flag is raised while waiting
pub fn await_ready(
    probe: &dyn PortProbe,
    endpoints: &[String],
    timeout: Duration,
    interval: Duration,
    stop: &StopFlag,
) -> BenchResult<()> {
    let deadline = Instant::now() + timeout;
    loop {
        stop.check()?;

        let pending: Vec<String> = endpoints
            .iter()
            .filter(|endpoint| !probe.is_listening(endpoint))
            .cloned()
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(BenchError::DeploymentTimeout {
                pending,
                timeout_secs: timeout.as_secs(),
            });
        }

        trace!("Waiting for {} endpoint(s): {pending:?}", pending.len());
        thread::sleep(interval);
    }
}

/// Outcome of one benchmark client invocation
#[derive(Debug)]
pub struct ClientRun {
    pub status: ExitStatus,
    pub stderr: String,
}

/// Deploys, probes and drives the local cluster
pub struct ClusterManager {
    binaries: Binaries,
    probe: Box<dyn PortProbe>,
    ready_timeout: Duration,
    poll_interval: Duration,
    stop_grace: Duration,
    stop: StopFlag,
}

impl ClusterManager {
    pub fn new(binaries: Binaries, stop: StopFlag) -> Self {
        Self {
            binaries,
            probe: Box::new(TcpConnectProbe::default()),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stop_grace: DEFAULT_STOP_GRACE,
            stop,
        }
    }

    #[must_use]
    pub fn with_probe(mut self, probe: Box<dyn PortProbe>) -> Self {
        self.probe = probe;
        self
    }

    #[must_use]
    pub fn with_ready_timeout(mut self, timeout: Duration, interval: Duration) -> Self {
        self.ready_timeout = timeout;
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Spawns the data and metadata shards described by `spec`
    ///
    /// Does not wait for readiness; see [`ClusterManager::await_ready`]. If a
    /// spawn fails, everything started so far is torn down when the partial
    /// handle is dropped.
    pub fn deploy(
        &self,
        spec: &DeploymentSpec,
        profile: Option<(ProfileMode, &ProfileDirs)>,
    ) -> BenchResult<ClusterHandle> {
        info!(
            "Deploying cluster: {} data shard(s), {} metadata shard(s), auth {}",
            spec.data_shards,
            spec.meta_shards,
            if spec.auth_required { "on" } else { "off" }
        );

        let mut handle = ClusterHandle::default();
        let mut ports = PortAllocator::new();
        let logs = new_dir("zstor-logs-", &mut handle)?;

        self.spawn_data_shards(spec, profile, &mut ports, &logs, &mut handle)?;
        self.spawn_meta_shards(spec.meta_shards, &mut ports, &logs, &mut handle)?;

        debug!("Cluster endpoints: {:?}", handle.endpoints());
        Ok(handle)
    }

    fn spawn_data_shards(
        &self,
        spec: &DeploymentSpec,
        profile: Option<(ProfileMode, &ProfileDirs)>,
        ports: &mut PortAllocator,
        logs: &Path,
        handle: &mut ClusterHandle,
    ) -> BenchResult<()> {
        for i in 0..spec.data_shards {
            let data_dir = new_dir("zstordb-data-", handle)?;
            let meta_dir = new_dir("zstordb-meta-", handle)?;
            let port = ports.allocate()?;

            let mut cmd = self.binaries.zstordb.command();
            cmd.arg("--listen")
                .arg(format!(":{port}"))
                .arg("--data-dir")
                .arg(&data_dir)
                .arg("--meta-dir")
                .arg(&meta_dir)
                .arg("--jobs")
                .arg(spec.jobs.to_string());

            if let Some((mode, dirs)) = profile {
                let out = PathBuf::from(format!("{}_{i}", dirs.zstordb.display()));
                fs::create_dir_all(&out)?;
                cmd.arg("--profile-mode")
                    .arg(mode.as_str())
                    .arg("--profile-output")
                    .arg(out);
            }
            if !spec.auth_required {
                cmd.arg("--no-auth");
            }

            let name = format!("zstordb-{i}");
            let server = spawn_server(
                cmd,
                &name,
                Role::DataShard,
                format!("{LOCAL_HOST}:{port}"),
                libc::SIGINT,
                self.stop_grace,
                logs,
            )?;
            handle.data_shards.push(server);
        }
        Ok(())
    }

    fn spawn_meta_shards(
        &self,
        count: usize,
        ports: &mut PortAllocator,
        logs: &Path,
        handle: &mut ClusterHandle,
    ) -> BenchResult<()> {
        if count == 0 {
            return Ok(());
        }

        let token = format!("etcd-cluster-{}", rand::rng().random_range(0..100));
        let mut members = Vec::with_capacity(count);
        for i in 0..count {
            let client_port = ports.allocate()?;
            let peer_port = ports.allocate()?;
            members.push((
                format!("node{i}"),
                format!("http://{LOCAL_HOST}:{client_port}"),
                format!("http://{LOCAL_HOST}:{peer_port}"),
                client_port,
            ));
        }
        let initial_cluster = members
            .iter()
            .map(|(name, _, peer, _)| format!("{name}={peer}"))
            .collect::<Vec<_>>()
            .join(",");

        for (name, client_url, peer_url, client_port) in members {
            let data_dir = new_dir("etcd-", handle)?;

            let mut cmd = self.binaries.etcd.command();
            cmd.arg("--name")
                .arg(&name)
                .arg("--initial-advertise-peer-urls")
                .arg(&peer_url)
                .arg("--listen-peer-urls")
                .arg(&peer_url)
                .arg("--listen-client-urls")
                .arg(&client_url)
                .arg("--advertise-client-urls")
                .arg(&client_url)
                .arg("--initial-cluster-token")
                .arg(&token)
                .arg("--initial-cluster")
                .arg(&initial_cluster)
                .arg("--data-dir")
                .arg(&data_dir);

            let server = spawn_server(
                cmd,
                &format!("etcd-{name}"),
                Role::MetaShard,
                format!("{LOCAL_HOST}:{client_port}"),
                libc::SIGTERM,
                self.stop_grace,
                logs,
            )?;
            handle.meta_shards.push(server);
        }
        Ok(())
    }

    /// Waits for every server of `handle` to accept connections
    ///
    /// On timeout, servers that died during start-up are logged with their
    /// exit status and last stderr lines.
    pub fn await_ready(&self, handle: &mut ClusterHandle) -> BenchResult<()> {
        let started = Instant::now();
        let result = await_ready(
            self.probe.as_ref(),
            &handle.endpoints(),
            self.ready_timeout,
            self.poll_interval,
            &self.stop,
        );
        match &result {
            Ok(()) => info!("Cluster ready after {:.2}s", started.elapsed().as_secs_f64()),
            Err(BenchError::DeploymentTimeout { .. }) => {
                for line in handle.exited_servers() {
                    warn!("{line}");
                }
            }
            Err(_) => {}
        }
        result
    }

    /// Runs the benchmark client once and waits for it to exit
    ///
    /// A non-zero exit is logged but not treated as an error; the result
    /// file decides whether the run succeeded.
    pub fn run_client(
        &self,
        config: &Path,
        out: &Path,
        profile: Option<(ProfileMode, &ProfileDirs)>,
    ) -> BenchResult<ClientRun> {
        let program = &self.binaries.client;
        let mut cmd = program.command();
        cmd.arg("--conf")
            .arg(config)
            .arg("--out-benchmark")
            .arg(out)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped());

        if let Some((mode, dirs)) = profile {
            cmd.arg("--profile-mode")
                .arg(mode.as_str())
                .arg("--out-profile")
                .arg(&dirs.client);
        }

        info!("Running benchmark client: {}", config.display());
        let started = Instant::now();
        let output = cmd
            .output()
            .map_err(|e| BenchError::process(program.name(), format!("failed to start: {e}")))?;

        let run = ClientRun {
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if run.status.success() {
            info!(
                "Benchmark client finished in {:.2}s",
                started.elapsed().as_secs_f64()
            );
        } else {
            warn!(
                "Benchmark client exited with {}: {}",
                run.status,
                run.stderr.trim()
            );
        }
        Ok(run)
    }
}

fn new_dir(prefix: &str, handle: &mut ClusterHandle) -> BenchResult<PathBuf> {
    let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
    let path = dir.path().to_path_buf();
    handle.dirs.push(dir);
    Ok(path)
}

fn spawn_server(
    mut cmd: Command,
    name: &str,
    role: Role,
    endpoint: String,
    stop_signal: libc::c_int,
    grace: Duration,
    logs: &Path,
) -> BenchResult<ServerProcess> {
    let stderr_log = logs.join(format!("{name}.stderr"));
    let stderr = File::create(&stderr_log)?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(stderr));

    let program = cmd.get_program().to_string_lossy().into_owned();
    let child = cmd
        .spawn()
        .map_err(|e| BenchError::process(&program, format!("failed to start {name}: {e}")))?;
    debug!("Started {name} (pid {}) on {endpoint}", child.id());

    Ok(ServerProcess {
        name: name.to_string(),
        role,
        endpoint,
        child,
        stop_signal,
        grace,
        stderr_log,
    })
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    struct Listening(bool);

    impl PortProbe for Listening {
        fn is_listening(&self, _endpoint: &str) -> bool {
            self.0
        }
    }

    fn sh(script: &str) -> Program {
        Program::new("sh").with_args(["-c", script, "server"])
    }

    fn binaries(server_script: &str, client_script: &str) -> Binaries {
        Binaries {
            zstordb: sh(server_script),
            etcd: sh(server_script),
            client: sh(client_script),
        }
    }

    fn spec(data_shards: usize, meta_shards: usize) -> DeploymentSpec {
        DeploymentSpec {
            data_shards,
            meta_shards,
            auth_required: false,
            jobs: 0,
        }
    }

    fn process_alive(pid: u32) -> bool {
        Path::new(&format!("/proc/{pid}")).exists()
    }

    #[test]
    fn test_port_allocator_never_repeats() {
        let mut ports = PortAllocator::new();
        let issued: Vec<u16> = (0..32).map(|_| ports.allocate().unwrap()).collect();
        let unique: HashSet<u16> = issued.iter().copied().collect();
        assert_eq!(unique.len(), issued.len());
        assert!(issued.iter().all(|p| *p != 0));
    }

    #[test]
    fn test_tcp_probe() {
        let listener = TcpListener::bind((LOCAL_HOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let probe = TcpConnectProbe::default();
        assert!(probe.is_listening(&format!("{LOCAL_HOST}:{port}")));

        drop(listener);
        assert!(!probe.is_listening(&format!("{LOCAL_HOST}:{port}")));
        assert!(!probe.is_listening("not an endpoint"));
    }

    #[test]
    fn test_await_ready_succeeds_immediately() {
        let started = Instant::now();
        await_ready(
            &Listening(true),
            &["127.0.0.1:1".to_string()],
            Duration::from_secs(5),
            Duration::from_millis(50),
            &StopFlag::new(),
        )
        .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_await_ready_times_out_after_bound() {
        let timeout = Duration::from_millis(300);
        let interval = Duration::from_millis(50);
        let started = Instant::now();
        let err = await_ready(
            &Listening(false),
            &["127.0.0.1:1".to_string(), "127.0.0.1:2".to_string()],
            timeout,
            interval,
            &StopFlag::new(),
        )
        .unwrap_err();
        let elapsed = started.elapsed();

        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_secs(1));
        match err {
            BenchError::DeploymentTimeout { pending, .. } => assert_eq!(pending.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_await_ready_honours_stop_flag() {
        let stop = StopFlag::new();
        stop.trigger();
        let err = await_ready(
            &Listening(false),
            &["127.0.0.1:1".to_string()],
            Duration::from_secs(30),
            Duration::from_millis(50),
            &stop,
        )
        .unwrap_err();
        assert!(matches!(err, BenchError::Interrupted));
    }

    #[test]
    fn test_deploy_and_teardown() {
        let manager = ClusterManager::new(binaries("exec sleep 30", "true"), StopFlag::new())
            .with_stop_grace(Duration::from_secs(2));
        let mut handle = manager.deploy(&spec(3, 2), None).unwrap();

        let data = handle.data_endpoints();
        let meta = handle.meta_endpoints();
        assert_eq!(data.len(), 3);
        assert_eq!(meta.len(), 2);

        let ports: HashSet<&str> = data
            .iter()
            .chain(&meta)
            .filter_map(|e| e.rsplit(':').next())
            .collect();
        assert_eq!(ports.len(), 5);

        let dirs = handle.dirs();
        // log dir + two per data shard + one per metadata shard
        assert_eq!(dirs.len(), 1 + 3 * 2 + 2);
        assert!(dirs.iter().all(|d| d.exists()));
        let pids = handle.pids();
        assert!(pids.iter().all(|pid| process_alive(*pid)));

        handle.teardown();
        assert!(dirs.iter().all(|d| !d.exists()));
        assert!(pids.iter().all(|pid| !process_alive(*pid)));
        assert!(handle.endpoints().is_empty());

        // idempotent
        handle.teardown();
    }

    #[test]
    fn test_teardown_kills_stragglers() {
        let manager = ClusterManager::new(
            binaries("trap '' INT TERM; while true; do sleep 0.1; done", "true"),
            StopFlag::new(),
        )
        .with_stop_grace(Duration::from_millis(200));
        let mut handle = manager.deploy(&spec(1, 1), None).unwrap();
        let pids = handle.pids();

        let started = Instant::now();
        handle.teardown();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(pids.iter().all(|pid| !process_alive(*pid)));
    }

    #[test]
    fn test_drop_tears_down() {
        let manager = ClusterManager::new(binaries("exec sleep 30", "true"), StopFlag::new());
        let handle = manager.deploy(&spec(1, 0), None).unwrap();
        let dirs = handle.dirs();
        let pids = handle.pids();
        drop(handle);
        assert!(dirs.iter().all(|d| !d.exists()));
        assert!(pids.iter().all(|pid| !process_alive(*pid)));
    }

    #[test]
    fn test_deploy_missing_binary_is_process_failure() {
        let mut bins = binaries("exec sleep 30", "true");
        bins.etcd = Program::new("/nonexistent/etcd");
        let manager = ClusterManager::new(bins, StopFlag::new());
        let err = manager.deploy(&spec(1, 1), None).unwrap_err();
        assert!(matches!(err, BenchError::ProcessFailure { .. }));
    }

    #[test]
    fn test_deploy_timeout_reports_dead_server() {
        let manager = ClusterManager::new(binaries("echo boom >&2; exit 3", "true"), StopFlag::new())
            .with_ready_timeout(Duration::from_millis(200), Duration::from_millis(50));
        let mut handle = manager.deploy(&spec(1, 0), None).unwrap();
        let err = manager.await_ready(&mut handle).unwrap_err();
        assert!(matches!(err, BenchError::DeploymentTimeout { .. }));

        thread::sleep(Duration::from_millis(100));
        let exited = handle.exited_servers();
        assert_eq!(exited.len(), 1);
        assert!(exited[0].starts_with("data shard zstordb-0"));
        assert!(exited[0].contains("boom"));
    }

    #[test]
    fn test_profile_flags_create_shard_dirs() {
        let report = tempfile::tempdir().unwrap();
        let dirs = ProfileDirs {
            zstordb: report.path().join("zstordb"),
            client: report.path().join("zstorclient"),
        };
        let manager = ClusterManager::new(binaries("exec sleep 30", "true"), StopFlag::new());
        let handle = manager
            .deploy(&spec(2, 0), Some((ProfileMode::Cpu, &dirs)))
            .unwrap();
        assert!(report.path().join("zstordb_0").is_dir());
        assert!(report.path().join("zstordb_1").is_dir());
        drop(handle);
        // profile output belongs to the report, not the cluster
        assert!(report.path().join("zstordb_0").is_dir());
    }

    #[test]
    fn test_run_client_passes_paths() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("scenarios_config.yaml");
        let out = dir.path().join("benchmark_result.yaml");
        // $1=--conf $2=config $3=--out-benchmark $4=out
        let manager = ClusterManager::new(
            binaries("exec sleep 30", "echo \"$2\" > \"$4\"; echo warn >&2; exit 2"),
            StopFlag::new(),
        );
        let run = manager.run_client(&config, &out, None).unwrap();

        assert!(!run.status.success());
        assert_eq!(run.stderr.trim(), "warn");
        let written = fs::read_to_string(&out).unwrap();
        assert_eq!(written.trim(), config.display().to_string());
    }
}
