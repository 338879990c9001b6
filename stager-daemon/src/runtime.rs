use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use stager_core::{config, registry, CoreError, ObjectKind, ObjectStatus, SafeName, StagerConfig};
use stager_sync::{
    pipeline::{self, Scope},
    ObjectManager, SyncError,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{
    downloader_status_root, socket_path, verifier_status_root, DEBOUNCE_WINDOW, RESYNC_INTERVAL,
};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// What caused a reconcile job.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Trigger {
    /// An object config was written or deleted.
    Object(ObjectKind, String),
    /// The downloader published or removed a result.
    DownloaderStatus(ObjectKind, String),
    /// The verifier published or removed a result.
    VerifierStatus(ObjectKind, String),
    /// Explicit or periodic reconcile.
    Reconcile(Scope),
}

impl Trigger {
    fn label(&self) -> String {
        match self {
            Trigger::Object(kind, uuid) => format!("object {kind}/{uuid}"),
            Trigger::DownloaderStatus(kind, key) => format!("download {kind}/{key}"),
            Trigger::VerifierStatus(kind, key) => format!("verify {kind}/{key}"),
            Trigger::Reconcile(Scope::All) => "all".to_string(),
            Trigger::Reconcile(Scope::Kind(kind)) => format!("kind {kind}"),
            Trigger::Reconcile(Scope::Object(kind, uuid)) => format!("object {kind}/{uuid}"),
        }
    }
}

struct Job {
    trigger: Trigger,
    source: &'static str,
    respond_to: oneshot::Sender<Result<JobSummary, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub kind: ObjectKind,
    pub uuid: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ObjectStatus> for ObjectSummary {
    fn from(status: &ObjectStatus) -> Self {
        Self {
            kind: status.kind,
            uuid: status.uuid.clone(),
            state: status.state.to_string(),
            error: status.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub trigger: String,
    pub source: String,
    pub applied: Vec<ObjectSummary>,
    pub removed: Vec<String>,
    pub duration_ms: u64,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
///
/// Returns an error if any task fails; an invariant violation in the
/// processor stops every task and surfaces here as a fatal
/// [`DaemonError::Sync`].
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = config::load_at(&home)?;
    ensure_runtime_dirs(&config)?;

    let last_job_at = Arc::new(RwLock::new(0u64));
    let started_at_unix = unix_seconds_now();

    let (job_tx, job_rx) = mpsc::channel::<Job>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let config = config.clone();
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            let result = watcher_task(config, job_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let config = config.clone();
        let last_job_at = last_job_at.clone();
        tokio::spawn(async move {
            let result = processor_task(config, last_job_at, job_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let config = config.clone();
        let job_tx = job_tx.clone();
        let last_job_at = last_job_at.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                config,
                last_job_at,
                job_tx,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let resync_handle = {
        let shutdown = shutdown_tx.clone();
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            let result = resync_task(job_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };
    drop(job_tx);

    let (watcher_result, processor_result, socket_result, resync_result, signal_result) = tokio::join!(
        watcher_handle,
        processor_handle,
        socket_handle,
        resync_handle,
        signal_handle
    );

    // The processor goes first so a fatal error is what the caller sees.
    handle_join("processor", processor_result)?;
    handle_join("watcher", watcher_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("resync", resync_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

/// Canonical roots the watcher classifies events against.
struct WatchRoots {
    /// Copy of the config with `objects_root` canonicalized.
    config: StagerConfig,
    downloader: PathBuf,
    verifier: PathBuf,
}

impl WatchRoots {
    fn new(config: &StagerConfig) -> Self {
        // FSEvents reports real paths (e.g. /private/var/... on macOS).
        let canonical = |p: PathBuf| fs::canonicalize(&p).unwrap_or(p);
        let mut watch_config = config.clone();
        watch_config.objects_root = canonical(config.objects_root.clone());
        Self {
            config: watch_config,
            downloader: canonical(downloader_status_root(config)),
            verifier: canonical(verifier_status_root(config)),
        }
    }

    fn roots(&self) -> [&Path; 3] {
        [&self.config.objects_root, &self.downloader, &self.verifier]
    }

    /// Map a changed path to the job it calls for, if any.
    fn classify(&self, path: &Path) -> Option<Trigger> {
        if path.starts_with(&self.config.objects_root) {
            return match registry::parse_object_path(&self.config, path) {
                Ok(Some((kind, uuid))) => Some(Trigger::Object(kind, uuid)),
                Ok(None) => None,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "ignoring object file");
                    None
                }
            };
        }
        if let Some((kind, key)) = status_key(&self.downloader, "DownloaderStatus", path) {
            return Some(Trigger::DownloaderStatus(kind, key));
        }
        if let Some((kind, key)) = status_key(&self.verifier, "VerifyImageStatus", path) {
            return Some(Trigger::VerifierStatus(kind, key));
        }
        None
    }
}

/// `<root>/<kind>/<topic>/<key>.json` → `(kind, key)`.
fn status_key(root: &Path, topic: &str, path: &Path) -> Option<(ObjectKind, String)> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let [kind, name, file] = parts.as_slice() else {
        return None;
    };
    if name != topic {
        return None;
    }
    let key = file.strip_suffix(".json")?;
    match kind.parse::<ObjectKind>() {
        Ok(kind) => Some((kind, key.to_string())),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "ignoring status record");
            None
        }
    }
}

async fn watcher_task(
    config: StagerConfig,
    job_tx: mpsc::Sender<Job>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let roots = WatchRoots::new(&config);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut _watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;

    let mut watched_dirs = HashSet::new();
    for root in roots.roots() {
        register_tree(&mut _watcher, &mut watched_dirs, root)?;
    }

    let mut debounce = HashMap::<PathBuf, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }

                for path in event.paths {
                    // FSEvents is directory-based; always register parent directory.
                    if let Some(watch_dir) = directory_to_watch(&path) {
                        let under_root = roots.roots().iter().any(|root| watch_dir.starts_with(root));
                        if under_root && watch_dir.exists() {
                            register_tree(&mut _watcher, &mut watched_dirs, &watch_dir)?;
                        }
                    }

                    let Some(trigger) = roots.classify(&path) else {
                        continue;
                    };

                    if !should_process_event(&mut debounce, &path, Instant::now()) {
                        continue;
                    }

                    match enqueue_job(&job_tx, trigger, "watcher").await {
                        Ok(summary) => {
                            tracing::info!(
                                trigger = %summary.trigger,
                                applied = summary.applied.len(),
                                removed = summary.removed.len(),
                                duration_ms = summary.duration_ms,
                                "watcher-triggered reconcile completed",
                            );
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "watcher-triggered reconcile failed");
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Apply jobs one at a time. An invariant violation ends the task with the
/// error after answering the job that hit it.
async fn processor_task(
    config: StagerConfig,
    last_job_at: Arc<RwLock<u64>>,
    mut job_rx: mpsc::Receiver<Job>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let manager = Arc::new(ObjectManager::new(config));

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = job_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();
                let label = job.trigger.label();

                let trigger = job.trigger.clone();
                let worker = manager.clone();
                let result = tokio::task::spawn_blocking(move || process_job(&worker, &trigger))
                    .await
                    .map_err(|err| DaemonError::Protocol(format!("reconcile task join error: {err}")))?;

                match result {
                    Ok((applied, removed)) => {
                        *last_job_at.write().await = unix_seconds_now();
                        let summary = JobSummary {
                            trigger: label,
                            source: job.source.to_string(),
                            applied: applied.iter().map(ObjectSummary::from).collect(),
                            removed: removed.iter().map(|(kind, uuid)| format!("{kind}/{uuid}")).collect(),
                            duration_ms: started.elapsed().as_millis() as u64,
                        };
                        let _ = job.respond_to.send(Ok(summary));
                    }
                    Err(err) if err.is_fatal() => {
                        tracing::error!(trigger = %label, error = %err, "invariant violation; stopping daemon");
                        let _ = job.respond_to.send(Err(err.to_string()));
                        return Err(err.into());
                    }
                    Err(err) => {
                        tracing::warn!(trigger = %label, error = %err, "reconcile failed");
                        let _ = job.respond_to.send(Err(err.to_string()));
                    }
                }
            }
        }
    }

    Ok(())
}

type JobOutcome = (Vec<ObjectStatus>, Vec<(ObjectKind, String)>);

fn process_job(manager: &ObjectManager, trigger: &Trigger) -> Result<JobOutcome, SyncError> {
    let channels = manager.channels();
    match trigger {
        Trigger::Object(kind, uuid) => {
            match registry::load_object(manager.config(), *kind, uuid) {
                Ok(object) => Ok((vec![manager.apply_object(&object)?], vec![])),
                Err(CoreError::ObjectNotFound { .. }) => {
                    let removed = manager.remove_object(*kind, uuid)?;
                    let removed = if removed { vec![(*kind, uuid.clone())] } else { vec![] };
                    Ok((vec![], removed))
                }
                Err(err) => Err(err.into()),
            }
        }
        Trigger::DownloaderStatus(kind, key) => {
            let applied = match channels.downloader_status(*kind).get(key)? {
                Some(status) => manager.update_downloader_status(&status)?,
                None => manager.handle_status_update_safename(*kind, &SafeName::from(key.as_str()), None)?,
            };
            Ok((applied, vec![]))
        }
        Trigger::VerifierStatus(kind, key) => {
            let applied = match channels.verifier_status(*kind).get(key)? {
                Some(status) => manager.update_verifier_status(&status)?,
                None => manager.handle_status_update_safename(*kind, &SafeName::from(key.as_str()), None)?,
            };
            Ok((applied, vec![]))
        }
        Trigger::Reconcile(scope) => {
            let report = pipeline::run(manager.config(), scope.clone())?;
            Ok((report.applied, report.removed))
        }
    }
}

async fn resync_task(
    job_tx: mpsc::Sender<Job>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(RESYNC_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                // The first tick fires immediately: a startup reconcile.
                match enqueue_job(&job_tx, Trigger::Reconcile(Scope::All), "resync").await {
                    Ok(summary) => tracing::debug!(
                        applied = summary.applied.len(),
                        removed = summary.removed.len(),
                        "periodic reconcile completed",
                    ),
                    Err(DaemonError::ChannelClosed(_)) => break,
                    Err(err) => tracing::warn!(error = %err, "periodic reconcile failed"),
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(
    home: PathBuf,
    config: StagerConfig,
    last_job_at: Arc<RwLock<u64>>,
    job_tx: mpsc::Sender<Job>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let config = config.clone();
                let last_job_at = last_job_at.clone();
                let job_tx = job_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        home,
                        config,
                        last_job_at,
                        job_tx,
                        shutdown_tx,
                        started_at_unix,
                    ).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    home: PathBuf,
    config: StagerConfig,
    last_job_at: Arc<RwLock<u64>>,
    job_tx: mpsc::Sender<Job>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => {
                let last = *last_job_at.read().await;
                match build_status_payload(&home, config.clone(), started_at_unix, last).await {
                    Ok(payload) => DaemonResponse::ok(payload),
                    Err(err) => DaemonResponse::error(err.to_string()),
                }
            }
            "reconcile" => match scope_for_request(&request) {
                Ok(scope) => match enqueue_job(&job_tx, Trigger::Reconcile(scope), "socket").await {
                    Ok(summary) => DaemonResponse::ok(json!(summary)),
                    Err(err) => DaemonResponse::error(err.to_string()),
                },
                Err(message) => DaemonResponse::error(message),
            },
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

fn scope_for_request(request: &DaemonRequest) -> Result<Scope, String> {
    let kind = request
        .kind
        .as_deref()
        .map(str::parse::<ObjectKind>)
        .transpose()
        .map_err(|err| err.to_string())?;
    match (kind, request.uuid.clone()) {
        (None, None) => Ok(Scope::All),
        (Some(kind), None) => Ok(Scope::Kind(kind)),
        (Some(kind), Some(uuid)) => Ok(Scope::Object(kind, uuid)),
        (None, Some(_)) => Err("reconcile by uuid needs a kind".to_string()),
    }
}

async fn build_status_payload(
    home: &Path,
    config: StagerConfig,
    started_at_unix: u64,
    last_reconcile_at_unix: u64,
) -> Result<Value, DaemonError> {
    let objects_root = config.objects_root.display().to_string();
    let statuses = tokio::task::spawn_blocking(move || ObjectManager::new(config).all_statuses())
        .await
        .map_err(|err| DaemonError::Protocol(format!("status join error: {err}")))??;
    let objects: Vec<ObjectSummary> = statuses.iter().map(ObjectSummary::from).collect();

    Ok(json!({
        "running": true,
        "started_at_unix": started_at_unix,
        "last_reconcile_at_unix": last_reconcile_at_unix,
        "objects": objects,
        "socket": socket_path(home).display().to_string(),
        "objects_root": objects_root,
    }))
}

async fn enqueue_job(
    job_tx: &mpsc::Sender<Job>,
    trigger: Trigger,
    source: &'static str,
) -> Result<JobSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    job_tx
        .send(Job {
            trigger,
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("job queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("job response"))?;
    outcome.map_err(DaemonError::Protocol)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn register_tree(
    watcher: &mut RecommendedWatcher,
    watched_dirs: &mut HashSet<PathBuf>,
    root: &Path,
) -> Result<(), DaemonError> {
    if !root.exists() {
        fs::create_dir_all(root).map_err(|e| io_err(root, e))?;
    }
    for dir in collect_dirs(root)? {
        let canonical = match fs::canonicalize(&dir) {
            Ok(path) => path,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&dir, err)),
        };
        if watched_dirs.insert(canonical.clone()) {
            watcher.watch(&canonical, RecursiveMode::NonRecursive)?;
            tracing::debug!(path = %canonical.display(), "watching directory");
        }
    }
    Ok(())
}

fn collect_dirs(root: &Path) -> Result<Vec<PathBuf>, DaemonError> {
    let mut dirs = vec![root.to_path_buf()];
    let mut cursor = 0;
    while cursor < dirs.len() {
        let current = dirs[cursor].clone();
        cursor += 1;
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(err) => {
                if err.kind() == ErrorKind::NotFound {
                    continue;
                }
                return Err(io_err(&current, err));
            }
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&current, e))?;
            let ty = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
            if ty.is_dir() {
                dirs.push(entry.path());
            }
        }
    }
    dirs.sort();
    dirs.dedup();
    Ok(dirs)
}

/// Removals matter too: a deleted object config tears the object down.
fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn directory_to_watch(path: &Path) -> Option<PathBuf> {
    if path.is_dir() {
        Some(path.to_path_buf())
    } else {
        path.parent().map(Path::to_path_buf)
    }
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
) -> bool {
    should_process_event_with_threshold(debounce, path, now, DEBOUNCE_WINDOW)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}

fn ensure_runtime_dirs(config: &StagerConfig) -> Result<(), DaemonError> {
    let channels = config.channels();
    let mut dirs = vec![config.root.clone(), config.objects_root.clone()];
    for kind in ObjectKind::all() {
        dirs.push(registry::kind_dir(config, *kind));
        dirs.push(channels.downloader_status(*kind).dir().to_path_buf());
        dirs.push(channels.verifier_status(*kind).dir().to_path_buf());
    }
    for dir in dirs {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Install the fmt subscriber; `RUST_LOG` overrides the default `info`.
///
/// Records from the sync crate's `log` calls are bridged in as well.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
