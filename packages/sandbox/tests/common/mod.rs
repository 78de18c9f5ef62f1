// ABOUTME: Shared fixtures for sandbox integration tests
// ABOUTME: In-memory container runtime with a toy filesystem and exec emulation, plus a fake process table

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use warden_sandbox::runtime::{
    ContainerDetails, ContainerRuntime, ContainerSpec, ContainerUsage, ExecOutput, ExecSpec,
    Result,
};
use warden_sandbox::{
    MemoryAuditSink, ProcessError, ProcessInfo, ProcessTable, ResourceSample, ResourceSampler,
    RuntimeError, SecurityPolicy, Warden, WardenSettings,
};

pub const TEST_IMAGE: &str = "ubuntu-ai-lab:latest";
pub const TEST_MARKER: &str = "warden_test_agent";
pub const GB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub labels: HashMap<String, String>,
    pub network_mode: String,
    pub networks: Vec<String>,
    pub dirs: BTreeSet<String>,
    pub files: BTreeMap<String, Vec<u8>>,
    pub packet_loss: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    Started(String),
    Finished(String),
}

#[derive(Default)]
struct State {
    images: HashSet<String>,
    containers: BTreeMap<String, FakeContainer>,
    execs: HashMap<String, (String, ExecSpec)>,
    next_id: u64,
    specs: Vec<ContainerSpec>,
    pulls: Vec<String>,
    killed_execs: Vec<String>,
    exec_events: Vec<ExecEvent>,
    exec_argv: Vec<Vec<String>>,
    failing_commands: Vec<String>,
    failing_removals: HashSet<String>,
    failing_kills: bool,
}

/// Container runtime kept entirely in memory
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<State>,
    unavailable: AtomicBool,
    usage: Mutex<Option<ContainerUsage>>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        let runtime = Self::default();
        runtime.add_image(TEST_IMAGE);
        Arc::new(runtime)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RuntimeError::Unavailable(
                "connection refused: /var/run/docker.sock".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn add_image(&self, image: &str) {
        self.lock().images.insert(image.to_string());
    }

    pub fn set_usage(&self, usage: ContainerUsage) {
        *self.usage.lock().unwrap() = Some(usage);
    }

    /// Commands whose joined argv starts with `prefix` exit with status 1
    pub fn fail_commands_starting_with(&self, prefix: &str) {
        self.lock().failing_commands.push(prefix.to_string());
    }

    /// `kill_exec` fails the way an unprivileged host-side SIGKILL does
    pub fn fail_exec_kills(&self) {
        self.lock().failing_kills = true;
    }

    pub fn fail_removal_of(&self, container: &str) {
        self.lock().failing_removals.insert(container.to_string());
    }

    /// Container not created through the sandbox, without the managed label
    pub fn add_foreign_container(&self, name: &str) {
        let mut state = self.lock();
        state.next_id += 1;
        let container = FakeContainer {
            id: format!("foreign{:08}", state.next_id),
            name: name.to_string(),
            image: "postgres:16".to_string(),
            state: "running".to_string(),
            labels: HashMap::new(),
            network_mode: "bridge".to_string(),
            networks: vec!["bridge".to_string()],
            dirs: BTreeSet::from(["/".to_string()]),
            files: BTreeMap::new(),
            packet_loss: false,
        };
        state.containers.insert(name.to_string(), container);
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        let state = self.lock();
        find(&state, name).cloned()
    }

    pub fn container_names(&self) -> Vec<String> {
        self.lock().containers.keys().cloned().collect()
    }

    pub fn set_state(&self, name: &str, new_state: &str) {
        let mut state = self.lock();
        if let Some(container) = find_mut(&mut state, name) {
            container.state = new_state.to_string();
        }
    }

    pub fn write_file(&self, container: &str, path: &str, content: &[u8]) {
        let mut state = self.lock();
        let container = find_mut(&mut state, container).expect("container exists");
        add_parents(&mut container.dirs, path);
        container.files.insert(path.to_string(), content.to_vec());
    }

    pub fn remove_file(&self, container: &str, path: &str) {
        let mut state = self.lock();
        let container = find_mut(&mut state, container).expect("container exists");
        container.files.remove(path);
    }

    /// Files below `dir`, keyed by path relative to it
    pub fn files_under(&self, container: &str, dir: &str) -> BTreeMap<String, Vec<u8>> {
        let state = self.lock();
        let container = find(&state, container).expect("container exists");
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        container
            .files
            .iter()
            .filter_map(|(path, content)| {
                path.strip_prefix(&prefix)
                    .map(|rel| (rel.to_string(), content.clone()))
            })
            .collect()
    }

    pub fn specs(&self) -> Vec<ContainerSpec> {
        self.lock().specs.clone()
    }

    pub fn pulls(&self) -> Vec<String> {
        self.lock().pulls.clone()
    }

    pub fn killed_execs(&self) -> Vec<String> {
        self.lock().killed_execs.clone()
    }

    pub fn exec_events(&self) -> Vec<ExecEvent> {
        self.lock().exec_events.clone()
    }

    pub fn exec_argv(&self) -> Vec<Vec<String>> {
        self.lock().exec_argv.clone()
    }
}

fn find<'a>(state: &'a State, key: &str) -> Option<&'a FakeContainer> {
    state
        .containers
        .get(key)
        .or_else(|| state.containers.values().find(|c| c.id == key))
}

fn find_mut<'a>(state: &'a mut State, key: &str) -> Option<&'a mut FakeContainer> {
    let name = find(state, key)?.name.clone();
    state.containers.get_mut(&name)
}

fn add_parents(dirs: &mut BTreeSet<String>, path: &str) {
    let mut current = String::new();
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    dirs.insert("/".to_string());
    for part in parts.iter().take(parts.len().saturating_sub(1)) {
        current.push('/');
        current.push_str(part);
        dirs.insert(current.clone());
    }
}

fn add_dir(dirs: &mut BTreeSet<String>, path: &str) {
    let path = path.trim_end_matches('/');
    add_parents(dirs, path);
    if !path.is_empty() {
        dirs.insert(path.to_string());
    }
}

fn join(base: &str, rel: &str) -> String {
    let rel = rel.trim_matches('/');
    if base == "/" {
        format!("/{}", rel)
    } else {
        format!("{}/{}", base.trim_end_matches('/'), rel)
    }
}

fn under(path: &str, root: &str) -> bool {
    path == root || path.starts_with(&format!("{}/", root))
}

fn basename(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

fn exit(code: i64, stdout: &str, stderr: &str) -> ExecOutput {
    ExecOutput {
        exit_code: code,
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

/// Apply the filesystem side of a command; `sleep` is handled by the caller
fn emulate(container: &mut FakeContainer, spec: &ExecSpec) -> ExecOutput {
    let argv: Vec<&str> = spec.argv.iter().map(String::as_str).collect();
    let cwd = spec.working_dir.clone().unwrap_or_else(|| "/".to_string());
    let resolve = |p: &str| {
        if p.starts_with('/') {
            p.trim_end_matches('/').to_string()
        } else {
            join(&cwd, p)
        }
    };

    match argv.as_slice() {
        ["python3" | "python", "--version"] => exit(0, "Python 3.11.4\n", ""),
        ["echo", rest @ ..] => exit(0, &format!("{}\n", rest.join(" ")), ""),
        ["sleep", _] => exit(0, "", ""),
        ["ls", rest @ ..] => {
            let dir = rest.first().map(|d| resolve(d)).unwrap_or(cwd.clone());
            if !container.dirs.contains(&dir) {
                return exit(2, "", "ls: cannot access: No such file or directory\n");
            }
            let prefix = if dir == "/" { "/".to_string() } else { format!("{}/", dir) };
            let mut names: BTreeSet<String> = BTreeSet::new();
            for path in container.files.keys().chain(container.dirs.iter()) {
                if let Some(rel) = path.strip_prefix(&prefix) {
                    if let Some(first) = rel.split('/').next().filter(|s| !s.is_empty()) {
                        names.insert(first.to_string());
                    }
                }
            }
            let listing: Vec<String> = names.into_iter().collect();
            exit(0, &format!("{}\n", listing.join("\n")), "")
        }
        ["mkdir", "-p", paths @ ..] => {
            for path in paths {
                add_dir(&mut container.dirs, &resolve(path));
            }
            exit(0, "", "")
        }
        ["rm", "-rf", paths @ ..] => {
            for path in paths {
                let target = resolve(path);
                container.files.retain(|p, _| !under(p, &target));
                container.dirs.retain(|d| !under(d, &target) || d == "/");
            }
            exit(0, "", "")
        }
        ["mv", from, to] => {
            let (from, to) = (resolve(from), resolve(to));
            let exists = container.dirs.contains(&from) || container.files.contains_key(&from);
            if !exists {
                return exit(1, "", "mv: cannot stat: No such file or directory\n");
            }
            if container.dirs.contains(&to) || container.files.contains_key(&to) {
                return exit(1, "", "mv: destination exists\n");
            }
            let rename = |p: &String| format!("{}{}", to, &p[from.len()..]);
            container.files = std::mem::take(&mut container.files)
                .into_iter()
                .map(|(p, c)| if under(&p, &from) { (rename(&p), c) } else { (p, c) })
                .collect();
            container.dirs = std::mem::take(&mut container.dirs)
                .into_iter()
                .map(|d| if under(&d, &from) { rename(&d) } else { d })
                .collect();
            add_parents(&mut container.dirs, &to);
            exit(0, "", "")
        }
        ["cp", from, to] => {
            let (from, to) = (resolve(from), resolve(to));
            match container.files.get(&from).cloned() {
                Some(content) => {
                    container.files.insert(to, content);
                    exit(0, "", "")
                }
                None => exit(1, "", "cp: cannot stat: No such file or directory\n"),
            }
        }
        ["tc", "qdisc", "replace", "dev", _, "root", "netem", "loss", "100%"] => {
            if spec.privileged {
                container.packet_loss = true;
                exit(0, "", "")
            } else {
                exit(2, "", "RTNETLINK answers: Operation not permitted\n")
            }
        }
        [cmd, ..] => exit(127, "", &format!("{}: command not found\n", cmd)),
        [] => exit(126, "", "empty command\n"),
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        self.check()?;
        Ok(self.lock().images.contains(image))
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.check()?;
        let mut state = self.lock();
        state.pulls.push(image.to_string());
        if image.starts_with("missing/") {
            return Err(RuntimeError::NotFound(format!(
                "pull access denied for {}",
                image
            )));
        }
        state.images.insert(image.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.check()?;
        let mut state = self.lock();
        if state.containers.contains_key(&spec.name) {
            return Err(RuntimeError::Fault(format!(
                "Conflict. The container name {} is already in use",
                spec.name
            )));
        }
        state.next_id += 1;
        let id = format!("fake{:012}", state.next_id);

        let mut dirs = BTreeSet::new();
        add_dir(&mut dirs, &spec.working_dir);
        add_dir(&mut dirs, "/scratch");
        let networks = if spec.network_mode == "none" {
            Vec::new()
        } else {
            vec![spec.network_mode.clone()]
        };

        state.specs.push(spec.clone());
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                id: id.clone(),
                name: spec.name.clone(),
                image: spec.image.clone(),
                state: "created".to_string(),
                labels: spec.labels.clone(),
                network_mode: spec.network_mode.clone(),
                networks,
                dirs,
                files: BTreeMap::new(),
                packet_loss: false,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, container: &str) -> Result<()> {
        self.check()?;
        let mut state = self.lock();
        let container = find_mut(&mut state, container)
            .ok_or_else(|| RuntimeError::NotFound(container.to_string()))?;
        container.state = "running".to_string();
        Ok(())
    }

    async fn stop_container(&self, container: &str, _grace: Duration) -> Result<()> {
        self.check()?;
        let mut state = self.lock();
        let container = find_mut(&mut state, container)
            .ok_or_else(|| RuntimeError::NotFound(container.to_string()))?;
        container.state = "exited".to_string();
        Ok(())
    }

    async fn remove_container(&self, container: &str, _force: bool) -> Result<()> {
        self.check()?;
        let mut state = self.lock();
        let name = find(&state, container)
            .map(|c| c.name.clone())
            .ok_or_else(|| RuntimeError::NotFound(container.to_string()))?;
        if state.failing_removals.contains(&name) {
            return Err(RuntimeError::Fault(format!(
                "removal of container {} is already in progress",
                name
            )));
        }
        state.containers.remove(&name);
        Ok(())
    }

    async fn inspect_container(&self, container: &str) -> Result<ContainerDetails> {
        self.check()?;
        let state = self.lock();
        let c = find(&state, container)
            .ok_or_else(|| RuntimeError::NotFound(format!("No such container: {}", container)))?;
        Ok(details(c))
    }

    async fn list_containers(&self, label: &str) -> Result<Vec<ContainerDetails>> {
        self.check()?;
        let (key, value) = label.split_once('=').unwrap_or((label, ""));
        let state = self.lock();
        Ok(state
            .containers
            .values()
            .filter(|c| c.labels.get(key).map(String::as_str) == Some(value))
            .map(details)
            .collect())
    }

    async fn create_exec(&self, container: &str, spec: &ExecSpec) -> Result<String> {
        self.check()?;
        let mut state = self.lock();
        let c = find(&state, container)
            .ok_or_else(|| RuntimeError::NotFound(format!("No such container: {}", container)))?;
        if c.state != "running" {
            return Err(RuntimeError::Fault(format!(
                "Container {} is not running",
                container
            )));
        }
        let name = c.name.clone();
        state.next_id += 1;
        let exec_id = format!("exec{:08}", state.next_id);
        state
            .execs
            .insert(exec_id.clone(), (name, spec.clone()));
        Ok(exec_id)
    }

    async fn start_exec(&self, exec_id: &str) -> Result<ExecOutput> {
        self.check()?;
        let (container, spec) = {
            let mut state = self.lock();
            let (container, spec) = state
                .execs
                .get(exec_id)
                .cloned()
                .ok_or_else(|| RuntimeError::NotFound(exec_id.to_string()))?;
            state.exec_events.push(ExecEvent::Started(exec_id.to_string()));
            state.exec_argv.push(spec.argv.clone());
            (container, spec)
        };

        if let [cmd, secs] = spec.argv.as_slice() {
            if cmd == "sleep" {
                let secs: f64 = secs.parse().unwrap_or(0.0);
                tokio::time::sleep(Duration::from_secs_f64(secs)).await;
            }
        }

        let mut state = self.lock();
        let joined = spec.argv.join(" ");
        let failing = state
            .failing_commands
            .iter()
            .any(|prefix| joined.starts_with(prefix.as_str()));
        let output = if failing {
            exit(1, "", "injected failure\n")
        } else {
            let c = find_mut(&mut state, &container)
                .ok_or_else(|| RuntimeError::NotFound(container.clone()))?;
            emulate(c, &spec)
        };
        state.exec_events.push(ExecEvent::Finished(exec_id.to_string()));
        Ok(output)
    }

    async fn kill_exec(&self, exec_id: &str) -> Result<()> {
        self.check()?;
        let mut state = self.lock();
        if !state.execs.contains_key(exec_id) {
            return Err(RuntimeError::NotFound(exec_id.to_string()));
        }
        if state.failing_kills {
            return Err(RuntimeError::Fault(format!(
                "Failed to signal exec {}: EPERM",
                exec_id
            )));
        }
        state.killed_execs.push(exec_id.to_string());
        Ok(())
    }

    async fn download_archive(
        &self,
        container: &str,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        self.check()?;
        let bytes = {
            let state = self.lock();
            let c = find(&state, container)
                .ok_or_else(|| RuntimeError::NotFound(container.to_string()))?;
            let root = path.trim_end_matches('/');
            if !c.dirs.contains(root) {
                return Err(RuntimeError::NotFound(format!("Could not find the file {}", path)));
            }
            let base = basename(root);
            let strip = |p: &str| format!("{}{}", base, &p[root.len()..]);

            let mut builder = tar::Builder::new(Vec::new());
            for dir in c.dirs.iter().filter(|d| under(d, root)) {
                let mut header = tar::Header::new_gnu();
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                header.set_mode(0o755);
                builder
                    .append_data(&mut header, format!("{}/", strip(dir)), std::io::empty())
                    .map_err(|e| RuntimeError::Fault(e.to_string()))?;
            }
            for (file, content) in c.files.iter().filter(|(p, _)| under(p, root)) {
                let mut header = tar::Header::new_gnu();
                header.set_size(content.len() as u64);
                header.set_mode(0o644);
                builder
                    .append_data(&mut header, strip(file), content.as_slice())
                    .map_err(|e| RuntimeError::Fault(e.to_string()))?;
            }
            builder
                .into_inner()
                .map_err(|e| RuntimeError::Fault(e.to_string()))?
        };

        sink.write_all(&bytes)
            .await
            .map_err(|e| RuntimeError::Fault(e.to_string()))?;
        Ok(bytes.len() as u64)
    }

    async fn upload_archive(&self, container: &str, dest_path: &str, archive: Vec<u8>) -> Result<()> {
        self.check()?;
        let mut state = self.lock();
        let c = find_mut(&mut state, container)
            .ok_or_else(|| RuntimeError::NotFound(container.to_string()))?;
        let dest = dest_path.trim_end_matches('/');
        if !c.dirs.contains(dest) {
            return Err(RuntimeError::NotFound(format!(
                "Could not find the file {}",
                dest_path
            )));
        }

        let mut reader = tar::Archive::new(archive.as_slice());
        let entries = reader
            .entries()
            .map_err(|e| RuntimeError::Fault(e.to_string()))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| RuntimeError::Fault(e.to_string()))?;
            let rel = entry
                .path()
                .map_err(|e| RuntimeError::Fault(e.to_string()))?
                .to_string_lossy()
                .trim_end_matches('/')
                .to_string();
            let target = join(dest, &rel);
            if entry.header().entry_type().is_dir() {
                add_dir(&mut c.dirs, &target);
            } else {
                let mut content = Vec::new();
                entry
                    .read_to_end(&mut content)
                    .map_err(|e| RuntimeError::Fault(e.to_string()))?;
                add_parents(&mut c.dirs, &target);
                c.files.insert(target, content);
            }
        }
        Ok(())
    }

    async fn disconnect_networks(&self, container: &str) -> Result<usize> {
        self.check()?;
        let mut state = self.lock();
        let c = find_mut(&mut state, container)
            .ok_or_else(|| RuntimeError::NotFound(container.to_string()))?;
        let count = c.networks.len();
        c.networks.clear();
        Ok(count)
    }

    async fn stats(&self, container: &str) -> Result<ContainerUsage> {
        self.check()?;
        if find(&self.lock(), container).is_none() {
            return Err(RuntimeError::NotFound(container.to_string()));
        }
        Ok(self.usage.lock().unwrap().unwrap_or(ContainerUsage {
            cpu_fraction: 0.05,
            memory_used_bytes: 64 * 1024 * 1024,
            memory_limit_bytes: 8 * GB,
        }))
    }
}

fn details(c: &FakeContainer) -> ContainerDetails {
    ContainerDetails {
        id: c.id.clone(),
        name: c.name.clone(),
        image: c.image.clone(),
        state: c.state.clone(),
        labels: c.labels.clone(),
        network_mode: Some(c.network_mode.clone()),
        created_at: Utc::now(),
    }
}

/// Process table with a fixed set of processes; killed processes disappear
#[derive(Default)]
pub struct FakeProcessTable {
    processes: Mutex<Vec<ProcessInfo>>,
    kills: Mutex<Vec<u32>>,
    list_delay: Mutex<Duration>,
}

impl FakeProcessTable {
    pub fn with(processes: Vec<ProcessInfo>) -> Arc<Self> {
        Arc::new(Self {
            processes: Mutex::new(processes),
            kills: Mutex::new(Vec::new()),
            list_delay: Mutex::new(Duration::ZERO),
        })
    }

    /// `count` processes named after the test marker, plus one unrelated process
    pub fn marked(count: u32) -> Arc<Self> {
        let mut processes: Vec<ProcessInfo> = (0..count)
            .map(|i| ProcessInfo::new(40_000 + i, format!("{}_{}", TEST_MARKER, i)))
            .collect();
        processes.push(ProcessInfo::new(1, "init"));
        Self::with(processes)
    }

    pub fn kills(&self) -> Vec<u32> {
        self.kills.lock().unwrap().clone()
    }

    /// Make every listing block for `delay`, like a slow /proc scan
    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = delay;
    }
}

impl ProcessTable for FakeProcessTable {
    fn list(&self) -> Vec<ProcessInfo> {
        let delay = *self.list_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.processes.lock().unwrap().clone()
    }

    fn kill(&self, pid: u32) -> std::result::Result<(), ProcessError> {
        self.kills.lock().unwrap().push(pid);
        self.processes.lock().unwrap().retain(|p| p.pid != pid);
        Ok(())
    }
}

/// Sampler returning whatever sample was set last
pub struct FixedSampler {
    sample: Mutex<ResourceSample>,
}

impl FixedSampler {
    pub fn new(cpu_fraction: f64, memory_used_bytes: u64) -> Arc<Self> {
        Arc::new(Self {
            sample: Mutex::new(sample(cpu_fraction, memory_used_bytes)),
        })
    }

    pub fn set(&self, cpu_fraction: f64, memory_used_bytes: u64) {
        *self.sample.lock().unwrap() = sample(cpu_fraction, memory_used_bytes);
    }
}

fn sample(cpu_fraction: f64, memory_used_bytes: u64) -> ResourceSample {
    ResourceSample {
        cpu_fraction,
        memory_used_bytes,
        memory_total_bytes: 32 * GB,
        sampled_at: Utc::now(),
    }
}

#[async_trait]
impl ResourceSampler for FixedSampler {
    async fn sample(&self) -> std::result::Result<ResourceSample, RuntimeError> {
        Ok(*self.sample.lock().unwrap())
    }
}

/// Settings rooted in a temp directory, with `sleep` allowed for timeout tests
pub fn test_settings(dir: &TempDir) -> WardenSettings {
    let temp_root = dir.path().join("tmp");
    std::fs::create_dir_all(&temp_root).unwrap();
    WardenSettings {
        cpu_limit: "80%".to_string(),
        memory_limit: "16GB".to_string(),
        max_processes: 5,
        security_policy: SecurityPolicy::NoNetwork,
        allowed_commands: ["ls", "cp", "python", "python3", "pip", "sleep", "echo"]
            .iter()
            .map(|c| c.to_string())
            .collect(),
        process_marker: TEST_MARKER.to_string(),
        scratch_prefix: "warden_test_scratch_".to_string(),
        temp_root,
        snapshot_dir: dir.path().join("snapshots"),
        ..WardenSettings::default()
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub runtime: Arc<FakeRuntime>,
    pub sampler: Arc<FixedSampler>,
    pub processes: Arc<FakeProcessTable>,
    pub audit: Arc<MemoryAuditSink>,
    pub warden: Warden,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(|_| {}, FakeProcessTable::marked(0))
    }

    pub fn build(
        configure: impl FnOnce(&mut WardenSettings),
        processes: Arc<FakeProcessTable>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(&dir);
        configure(&mut settings);

        let runtime = FakeRuntime::new();
        let sampler = FixedSampler::new(0.10, GB);
        let audit = Arc::new(MemoryAuditSink::new());
        let warden = Warden::build(
            settings,
            runtime.clone(),
            sampler.clone(),
            processes.clone(),
            audit.clone(),
        )
        .unwrap();

        Self {
            dir,
            runtime,
            sampler,
            processes,
            audit,
            warden,
        }
    }

    pub fn container(&self, environment_id: &str) -> String {
        format!("{}-{}", self.warden.settings.container_name_prefix, environment_id)
    }

    pub async fn provision(&self, policy: SecurityPolicy) -> warden_sandbox::IsolatedEnvironment {
        self.warden
            .lifecycle
            .provision_with(TEST_IMAGE, "50%", "8GB", policy)
            .await
            .unwrap()
    }
}
