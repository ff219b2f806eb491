#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use sofi_api::config::{EngineConfig, ServerConfig};
use sofi_api::router::build_app_router;
use sofi_api::state::AppState;
use sofi_engine::cdb::{
    CdbError, CdbLibrary, CdbRecord, MissingCdbLibrary, NodeResult, QuadForces, TrussResult,
    STATUS_END, STATUS_OK,
};

/// Fake engine that copies the model into its result file, so every job's
/// artifact is recognisably its own.
pub const ECHO_ENGINE: &str = r#"[ "$2" = "-b" ] || exit 3
cat "$1" > "${1%.*}.cdb""#;

/// Fake engine that exits without writing a result file.
pub const FAILING_ENGINE: &str = "exit 1";

/// Fake engine that never finishes on its own.
pub const HANGING_ENGINE: &str = "sleep 30";

pub const MULTIPART_BOUNDARY: &str = "sofi-test-boundary";

// ---------------------------------------------------------------------------
// Result database fake
// ---------------------------------------------------------------------------

/// In-memory result database: every opened file serves the same records.
pub struct FakeCdbLibrary {
    records: HashMap<i32, Vec<Vec<u8>>>,
    next_index: AtomicI32,
    cursors: Mutex<HashMap<(i32, i32), usize>>,
    closes: AtomicUsize,
    closes_with_file_present: AtomicUsize,
    open_paths: Mutex<HashMap<i32, PathBuf>>,
    read_status: Option<i32>,
    read_delay: Option<Duration>,
}

impl FakeCdbLibrary {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            next_index: AtomicI32::new(1),
            cursors: Mutex::new(HashMap::new()),
            closes: AtomicUsize::new(0),
            closes_with_file_present: AtomicUsize::new(0),
            open_paths: Mutex::new(HashMap::new()),
            read_status: None,
            read_delay: None,
        }
    }

    /// The sample truss, node and quad records.
    pub fn sample() -> Self {
        Self::new()
            .with(&sample_truss())
            .with(&sample_nodes())
            .with(&sample_quads())
    }

    /// Every read fails with a negative status.
    pub fn failing_reads(mut self) -> Self {
        self.read_status = Some(-3);
        self
    }

    pub fn with<R: CdbRecord>(mut self, rows: &[R]) -> Self {
        self.records
            .insert(R::KEY, rows.iter().map(CdbRecord::encode).collect());
        self
    }

    /// Every read sleeps for `delay` first.
    pub fn slow_reads(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Closes that happened while the database file was still on disk.
    pub fn closes_with_file_present(&self) -> usize {
        self.closes_with_file_present.load(Ordering::SeqCst)
    }
}

impl CdbLibrary for FakeCdbLibrary {
    fn open(&self, path: &Path) -> Result<i32, CdbError> {
        if !path.is_file() {
            return Err(CdbError::Open {
                path: path.to_path_buf(),
                reason: "file does not exist".into(),
            });
        }
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        self.open_paths
            .lock()
            .unwrap()
            .insert(index, path.to_path_buf());
        Ok(index)
    }

    fn get(&self, index: i32, key: i32, _load_case: i32, buf: &mut [u8]) -> i32 {
        if let Some(delay) = self.read_delay {
            std::thread::sleep(delay);
        }
        if let Some(status) = self.read_status {
            return status;
        }
        let mut cursors = self.cursors.lock().unwrap();
        let pos = cursors.entry((index, key)).or_default();
        match self.records.get(&key).and_then(|rows| rows.get(*pos)) {
            Some(row) => {
                buf.copy_from_slice(&row[..buf.len()]);
                *pos += 1;
                STATUS_OK
            }
            None => STATUS_END,
        }
    }

    fn close(&self, index: i32) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        let path = self.open_paths.lock().unwrap().remove(&index);
        if path.is_some_and(|path| path.is_file()) {
            self.closes_with_file_present.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub fn sample_truss() -> Vec<TrussResult> {
    vec![
        TrussResult {
            m_nr: 1,
            m_n: 125.5,
            m_v: 0.002,
            m_nm: 125.5,
        },
        TrussResult {
            m_nr: 2,
            m_n: -80.25,
            m_v: -0.001,
            m_nm: -80.25,
        },
    ]
}

pub fn sample_nodes() -> Vec<NodeResult> {
    vec![NodeResult {
        m_nr: 10,
        m_uz: -0.5,
        m_pz: 205.75,
        ..Default::default()
    }]
}

pub fn sample_quads() -> Vec<QuadForces> {
    vec![QuadForces {
        m_nr: 1001,
        m_mxx: 12.5,
        m_myy: 8.0,
        ..Default::default()
    }]
}

// ---------------------------------------------------------------------------
// Test environment
// ---------------------------------------------------------------------------

/// Build a test `ServerConfig` rooted in `dir`.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default),
/// a short pacing delay and a ten second calculation timeout.
pub fn test_config(dir: &Path, engine: PathBuf) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        engine: EngineConfig {
            executable: engine,
            cdb_library: dir.join("sof_cdb_w-70.dll"),
            workspace_root: dir.join("dat"),
            calculation_timeout_secs: 10,
            pacing_delay_ms: 10,
            workspace_ttl_secs: 3600,
            load_case: 1,
        },
    }
}

/// A scratch directory with a workspace root, a (possibly missing) fake
/// engine and the application state wired to both.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: ServerConfig,
    pub state: AppState,
    pub library: Arc<FakeCdbLibrary>,
}

impl TestEnv {
    /// Environment whose engine runs the given shell script body.
    pub fn with_engine(body: &str) -> Self {
        Self::build(Some(body), |_| {})
    }

    /// Environment whose engine executable does not exist.
    pub fn without_engine() -> Self {
        Self::build(None, |_| {})
    }

    /// Environment whose result database reads come from `library`.
    pub fn with_library(body: &str, library: FakeCdbLibrary) -> Self {
        let library = Arc::new(library);
        Self::assemble(Some(body), |_| {}, library.clone(), library)
    }

    /// Environment whose result database library could not be loaded.
    pub fn with_missing_library(body: &str) -> Self {
        let missing = Arc::new(MissingCdbLibrary::new("sof_cdb_w-70.dll not found"));
        Self::assemble(Some(body), |_| {}, Arc::new(FakeCdbLibrary::sample()), missing)
    }

    pub fn build(engine_body: Option<&str>, customize: impl FnOnce(&mut ServerConfig)) -> Self {
        let library = Arc::new(FakeCdbLibrary::sample());
        Self::assemble(engine_body, customize, library.clone(), library)
    }

    fn assemble(
        engine_body: Option<&str>,
        customize: impl FnOnce(&mut ServerConfig),
        library: Arc<FakeCdbLibrary>,
        cdb_library: Arc<dyn CdbLibrary>,
    ) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::create_dir(dir.path().join("dat")).expect("create workspace root");

        let engine = match engine_body {
            Some(body) => fake_engine(dir.path(), body),
            None => dir.path().join("Sofistik").join("wps.exe"),
        };

        let mut config = test_config(dir.path(), engine);
        customize(&mut config);

        let state = AppState::new(config.clone(), cdb_library);

        Self {
            dir,
            config,
            state,
            library,
        }
    }

    /// Build the full application router with all middleware layers.
    pub fn app(&self) -> Router {
        build_app_router(self.state.clone(), &self.config)
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.config.engine.workspace_root.clone()
    }

    /// Number of job directories currently on disk.
    pub fn workspace_dirs(&self) -> usize {
        std::fs::read_dir(self.workspace_root())
            .expect("read workspace root")
            .count()
    }

    /// Number of jobs the workspace registry still tracks.
    pub async fn registered_jobs(&self) -> usize {
        self.state.workspaces.active_count().await
    }

    /// Wait until every workspace is gone, up to five seconds.
    pub async fn wait_for_empty_workspace(&self) -> bool {
        for _ in 0..100 {
            if self.workspace_dirs() == 0 && self.state.workspaces.active_count().await == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    /// Serve the app on an ephemeral local port.
    pub async fn spawn_server(&self) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        let app = self.app();
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("test server");
        });
        addr
    }
}

/// Write an executable shell script standing in for the engine.
#[cfg(unix)]
pub fn fake_engine(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("wps");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake engine");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod fake engine");
    path
}

#[cfg(not(unix))]
pub fn fake_engine(dir: &Path, _body: &str) -> PathBuf {
    dir.join("wps.exe")
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, json: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// POST a single file as multipart field `field`.
pub async fn post_file(
    app: Router,
    uri: &str,
    field: &str,
    filename: &str,
    content: &[u8],
) -> Response<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());

    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// POST the sample model as `dat_file`.
pub async fn post_model(app: Router, uri: &str) -> Response<Body> {
    post_file(app, uri, "dat_file", "model.dat", SAMPLE_MODEL.as_bytes()).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub const SAMPLE_MODEL: &str = "+prog sofimsha\r\nhead frame\r\nsyst 3d\r\nend\r\n";
