use rand::RngCore;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tempfile::TempDir;

use crate::artifactory::{ArtifactStore, Permission, RepositoryOutcome};
use crate::config::AutomationConfig;
use crate::error::{AutomationError, AutomationResult};
use crate::git::{Cloner, WorkingCopy};
use crate::gitlab::{MergeRequest, ProjectHost, Variable};
use crate::secrets::ResolvedSecret;
use crate::tower::{Inventory, InventorySource};
use crate::utils::which;

pub fn templates_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("templates")
}

pub fn test_config() -> AutomationConfig {
    AutomationConfig {
        gitlab_api_url: None,
        gitlab_private_token: Some("test-token".to_string()),
        artifactory_admin_user: Some("admin".to_string()),
        artifactory_admin_password: Some("admin-secret".to_string()),
        templates_dir: templates_root(),
        work_root: std::env::temp_dir(),
        git_author_name: "cicdctl-test".to_string(),
        git_author_email: "cicdctl-test@localhost".to_string(),
    }
}

pub fn git_available() -> bool {
    which("git").is_some()
}

fn git(args: &[&str], cwd: &Path) {
    let status = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .unwrap();
    assert!(
        status.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&status.stderr)
    );
}

/// A bare repository under `dir` with no commits at all.
pub fn empty_remote(dir: &Path) -> PathBuf {
    let remote = dir.join("empty.git");
    std::fs::create_dir_all(&remote).unwrap();
    git(&["init", "--quiet", "--bare"], &remote);
    remote
}

/// A bare repository under `dir` with one commit on `main`.
pub fn bare_remote(dir: &Path) -> PathBuf {
    let remote = dir.join("remote.git");
    let seed = dir.join("seed");
    std::fs::create_dir_all(&remote).unwrap();
    std::fs::create_dir_all(&seed).unwrap();
    git(&["init", "--quiet", "--bare"], &remote);
    git(&["symbolic-ref", "HEAD", "refs/heads/main"], &remote);

    git(&["init", "--quiet"], &seed);
    std::fs::write(seed.join("README.md"), "seed\n").unwrap();
    git(&["add", "README.md"], &seed);
    git(
        &[
            "-c",
            "user.name=seed",
            "-c",
            "user.email=seed@localhost",
            "-c",
            "commit.gpgsign=false",
            "commit",
            "--quiet",
            "-m",
            "seed",
        ],
        &seed,
    );
    let remote_str = remote.to_string_lossy().to_string();
    git(&["push", "--quiet", &remote_str, "HEAD:refs/heads/main"], &seed);
    remote
}

// ---------------------------------------------------------------------------
// HTTP stub

#[derive(Debug, Clone)]
pub struct StubRequest {
    pub method: String,
    /// Request target as sent, query string included.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StubRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: u16,
    pub body: String,
}

impl StubResponse {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
        }
    }
}

/// One-request-per-connection HTTP/1.1 server on a loopback port.
pub struct StubServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<StubRequest>>>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StubServer {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&StubRequest) -> StubResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let seen = requests.clone();
        let stop = shutdown.clone();
        let handle = std::thread::spawn(move || {
            for stream in listener.incoming() {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(stream) = stream else {
                    continue;
                };
                if let Some(request) = read_request(&stream) {
                    let response = handler(&request);
                    seen.lock().unwrap().push(request);
                    write_response(stream, &response);
                }
            }
        });

        Self {
            addr,
            requests,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<StubRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn read_request(stream: &TcpStream) -> Option<StubRequest> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = Vec::new();
    loop {
        let mut header = String::new();
        reader.read_line(&mut header).ok()?;
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((key, value)) = header.split_once(':') {
            headers.push((key.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }

    let length = headers
        .iter()
        .find(|(key, _)| key == "content-length")
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).ok()?;

    Some(StubRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

fn write_response(mut stream: TcpStream, response: &StubResponse) {
    let payload = format!(
        "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        response.status,
        response.body.len(),
        response.body
    );
    let _ = stream.write_all(payload.as_bytes());
    let _ = stream.flush();
}

// ---------------------------------------------------------------------------
// In-memory GitLab host and working copy

/// Step at which a fake collaborator is told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeStep {
    CloneRepository,
    Switch,
    Commit,
    Push,
    EnableBuilds,
    SetVariable,
    MergeRequest,
}

fn injected(step: FakeStep) -> AutomationError {
    match step {
        FakeStep::CloneRepository | FakeStep::Switch | FakeStep::Commit | FakeStep::Push => {
            AutomationError::repository(format!("injected {step:?} failure"))
        }
        _ => AutomationError::Provisioning {
            url: "https://gitlab.example.com".to_string(),
            status: 500,
            message: format!("injected {step:?} failure"),
        },
    }
}

pub struct FakeHost {
    path: String,
    ssh_url: String,
    variables: RefCell<BTreeMap<String, String>>,
    set_counts: RefCell<HashMap<String, usize>>,
    calls: RefCell<Vec<String>>,
    fail_at: Cell<Option<FakeStep>>,
    failing_variables: RefCell<HashSet<String>>,
    builds_enabled: Cell<bool>,
    merge_requests: RefCell<Vec<(String, String)>>,
    descriptor: RefCell<Option<String>>,
}

impl FakeHost {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ssh_url: format!("git@gitlab.example.com:{path}.git"),
            variables: RefCell::new(BTreeMap::new()),
            set_counts: RefCell::new(HashMap::new()),
            calls: RefCell::new(Vec::new()),
            fail_at: Cell::new(None),
            failing_variables: RefCell::new(HashSet::new()),
            builds_enabled: Cell::new(false),
            merge_requests: RefCell::new(Vec::new()),
            descriptor: RefCell::new(None),
        }
    }

    pub fn insert_variable(&self, name: &str, value: &str) {
        self.variables
            .borrow_mut()
            .insert(name.to_string(), value.to_string());
    }

    pub fn set_deploy_descriptor(&self, contents: &str) {
        *self.descriptor.borrow_mut() = Some(contents.to_string());
    }

    pub fn fail_at(&self, step: FakeStep) {
        self.fail_at.set(Some(step));
    }

    pub fn fail_set_variable(&self, name: &str) {
        self.failing_variables.borrow_mut().insert(name.to_string());
    }

    pub fn variable(&self, name: &str) -> Option<String> {
        self.variables.borrow().get(name).cloned()
    }

    pub fn set_count(&self, name: &str) -> usize {
        self.set_counts.borrow().get(name).copied().unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn builds_enabled(&self) -> bool {
        self.builds_enabled.get()
    }

    pub fn merge_requests(&self) -> Vec<(String, String)> {
        self.merge_requests.borrow().clone()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn check(&self, step: FakeStep) -> AutomationResult<()> {
        match self.fail_at.get() {
            Some(failing) if failing == step => Err(injected(step)),
            _ => Ok(()),
        }
    }
}

impl ProjectHost for FakeHost {
    fn path(&self) -> &str {
        &self.path
    }

    fn ssh_url(&self) -> &str {
        &self.ssh_url
    }

    fn get_variable(&self, name: &str) -> AutomationResult<Option<Variable>> {
        self.record(format!("get_variable:{name}"));
        Ok(self.variable(name).map(|value| Variable {
            key: name.to_string(),
            value,
        }))
    }

    fn set_variable(&self, secret: &ResolvedSecret) -> AutomationResult<()> {
        let name = secret.name().as_str();
        self.record(format!("set_variable:{name}"));
        self.check(FakeStep::SetVariable)?;
        if self.failing_variables.borrow().contains(name) {
            return Err(injected(FakeStep::SetVariable));
        }
        self.insert_variable(name, secret.expose());
        *self
            .set_counts
            .borrow_mut()
            .entry(name.to_string())
            .or_default() += 1;
        Ok(())
    }

    fn enable_builds(&self) -> AutomationResult<()> {
        self.record("enable_builds".to_string());
        self.check(FakeStep::EnableBuilds)?;
        self.builds_enabled.set(true);
        Ok(())
    }

    fn open_merge_request(
        &self,
        source_branch: &str,
        title: &str,
    ) -> AutomationResult<MergeRequest> {
        self.record("merge_request".to_string());
        self.check(FakeStep::MergeRequest)?;
        let mut requests = self.merge_requests.borrow_mut();
        requests.push((source_branch.to_string(), title.to_string()));
        Ok(MergeRequest {
            iid: requests.len() as u64,
            title: title.to_string(),
            web_url: None,
        })
    }

    fn deploy_descriptor(&self, _branch: Option<&str>) -> AutomationResult<String> {
        self.record("deploy_descriptor".to_string());
        self.descriptor
            .borrow()
            .clone()
            .ok_or_else(|| AutomationError::config("deploy.json not found"))
    }
}

/// What happened to the working copies handed out by a [`FakeCloner`].
#[derive(Default)]
pub struct CopyState {
    branch: RefCell<Option<String>>,
    staged: RefCell<Vec<PathBuf>>,
    committed: RefCell<Vec<PathBuf>>,
    commits: RefCell<Vec<String>>,
    pushes: RefCell<Vec<(String, String)>>,
    destroyed: Cell<usize>,
}

impl CopyState {
    pub fn branch(&self) -> Option<String> {
        self.branch.borrow().clone()
    }

    pub fn staged(&self) -> Vec<PathBuf> {
        self.staged.borrow().clone()
    }

    pub fn committed_files(&self) -> Vec<PathBuf> {
        self.committed.borrow().clone()
    }

    pub fn commits(&self) -> Vec<String> {
        self.commits.borrow().clone()
    }

    pub fn pushes(&self) -> Vec<(String, String)> {
        self.pushes.borrow().clone()
    }

    pub fn destroy_count(&self) -> usize {
        self.destroyed.get()
    }
}

pub struct FakeCloner {
    state: Rc<CopyState>,
    seed: Vec<(PathBuf, String)>,
    fail_at: Cell<Option<FakeStep>>,
}

impl FakeCloner {
    pub fn new() -> Self {
        Self {
            state: Rc::new(CopyState::default()),
            seed: Vec::new(),
            fail_at: Cell::new(None),
        }
    }

    /// Pre-populates every clone with a file.
    pub fn with_file(mut self, path: &str, contents: &str) -> Self {
        self.seed.push((PathBuf::from(path), contents.to_string()));
        self
    }

    pub fn fail_at(&self, step: FakeStep) {
        self.fail_at.set(Some(step));
    }

    pub fn state(&self) -> Rc<CopyState> {
        self.state.clone()
    }
}

impl Default for FakeCloner {
    fn default() -> Self {
        Self::new()
    }
}

impl Cloner for FakeCloner {
    type Copy = FakeCopy;

    fn clone_repository(&self, _remote_url: &str) -> AutomationResult<FakeCopy> {
        if self.fail_at.get() == Some(FakeStep::CloneRepository) {
            return Err(injected(FakeStep::CloneRepository));
        }
        let dir = tempfile::tempdir()
            .map_err(|err| AutomationError::repository(format!("tempdir: {err}")))?;
        for (path, contents) in &self.seed {
            std::fs::write(dir.path().join(path), contents)
                .map_err(|err| AutomationError::io("seed", err))?;
        }
        Ok(FakeCopy {
            root: dir.path().to_path_buf(),
            dir: Some(dir),
            state: self.state.clone(),
            fail_at: self.fail_at.get(),
        })
    }
}

pub struct FakeCopy {
    root: PathBuf,
    dir: Option<TempDir>,
    state: Rc<CopyState>,
    fail_at: Option<FakeStep>,
}

impl FakeCopy {
    fn check(&self, step: FakeStep) -> AutomationResult<()> {
        if self.fail_at == Some(step) {
            return Err(injected(step));
        }
        Ok(())
    }
}

impl WorkingCopy for FakeCopy {
    fn root(&self) -> &Path {
        &self.root
    }

    fn branch(&self) -> Option<&str> {
        None
    }

    fn switch_to_branch(&mut self, name: &str) -> AutomationResult<()> {
        self.check(FakeStep::Switch)?;
        *self.state.branch.borrow_mut() = Some(name.to_string());
        Ok(())
    }

    fn add(&mut self, path: &Path) -> AutomationResult<()> {
        if !self.root.join(path).exists() {
            return Err(AutomationError::repository(format!(
                "cannot stage {}",
                path.display()
            )));
        }
        self.state.staged.borrow_mut().push(path.to_path_buf());
        Ok(())
    }

    fn commit(&mut self, message: &str) -> AutomationResult<()> {
        self.check(FakeStep::Commit)?;
        let staged: Vec<PathBuf> = self.state.staged.borrow_mut().drain(..).collect();
        if staged.is_empty() {
            return Err(AutomationError::repository("nothing staged"));
        }
        self.state.committed.borrow_mut().extend(staged);
        self.state.commits.borrow_mut().push(message.to_string());
        Ok(())
    }

    fn push(&mut self, remote: &str, branch: &str) -> AutomationResult<()> {
        self.check(FakeStep::Push)?;
        self.state
            .pushes
            .borrow_mut()
            .push((remote.to_string(), branch.to_string()));
        Ok(())
    }

    fn destroy(&mut self) {
        self.state.destroyed.set(self.state.destroyed.get() + 1);
        self.dir.take();
    }
}

// ---------------------------------------------------------------------------
// Target systems

/// Call log shared by the [`FakeStore`]s of one test.
#[derive(Clone, Default)]
pub struct StoreLog {
    calls: Rc<RefCell<Vec<String>>>,
    failing: Rc<RefCell<HashSet<String>>>,
}

impl StoreLog {
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn fail_instance(&self, url: &str) {
        self.failing.borrow_mut().insert(url.to_string());
    }
}

pub struct FakeStore {
    url: String,
    log: StoreLog,
}

impl FakeStore {
    pub fn new(url: &str, log: &StoreLog) -> Self {
        Self {
            url: url.to_string(),
            log: log.clone(),
        }
    }

    fn record(&self, call: String) -> AutomationResult<()> {
        self.log.calls.borrow_mut().push(format!("{} {call}", self.url));
        if self.log.failing.borrow().contains(&self.url) {
            return Err(AutomationError::Provisioning {
                url: self.url.clone(),
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

impl ArtifactStore for FakeStore {
    fn create_repository(&self, key: &str) -> AutomationResult<RepositoryOutcome> {
        self.record(format!("create_repository {key}"))?;
        Ok(RepositoryOutcome::Created)
    }

    fn create_or_replace_user(
        &self,
        username: &str,
        password: &ResolvedSecret,
    ) -> AutomationResult<()> {
        self.record(format!("create_or_replace_user {username} {}", password.name()))
    }

    fn grant_permission(
        &self,
        repository: &str,
        username: &str,
        permissions: &[Permission],
    ) -> AutomationResult<()> {
        let codes: String = permissions.iter().map(|permission| permission.code()).collect();
        self.record(format!("grant_permission {repository} {username} {codes}"))
    }
}

impl InventorySource for FakeStore {
    fn inventory(&self, name: &str) -> AutomationResult<Option<Inventory>> {
        self.record(format!("inventory {name}"))?;
        Ok(Some(Inventory {
            id: 1,
            name: name.to_string(),
            variables: "---".to_string(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Entropy

/// Deterministic RNG that fills each draw with a distinct byte.
#[derive(Default)]
pub struct CountingRng {
    draws: Rc<Cell<usize>>,
}

impl CountingRng {
    pub fn draws(&self) -> Rc<Cell<usize>> {
        self.draws.clone()
    }
}

impl RngCore for CountingRng {
    fn next_u32(&mut self) -> u32 {
        self.next_u64() as u32
    }

    fn next_u64(&mut self) -> u64 {
        let mut bytes = [0u8; 8];
        self.fill_bytes(&mut bytes);
        u64::from_le_bytes(bytes)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let draw = self.draws.get() + 1;
        self.draws.set(draw);
        dest.fill(draw as u8);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

pub struct FailingRng;

impl RngCore for FailingRng {
    fn next_u32(&mut self) -> u32 {
        0
    }

    fn next_u64(&mut self) -> u64 {
        0
    }

    fn fill_bytes(&mut self, _dest: &mut [u8]) {
        panic!("FailingRng has no entropy");
    }

    fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
        Err(rand::Error::new(std::io::Error::new(
            std::io::ErrorKind::Other,
            "entropy source unavailable",
        )))
    }
}
