use std::path::PathBuf;
use std::time::Duration;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8011`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `120`).
    ///
    /// Must exceed the calculation timeout, since the calculation endpoints
    /// hold the request open while the engine runs.
    pub request_timeout_secs: u64,
    /// Calculation engine and job workspace settings.
    pub engine: EngineConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `8011`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `120`                      |
    ///
    /// See [`EngineConfig::from_env`] for the engine settings.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8011".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "120".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let engine = EngineConfig::from_env();

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            engine,
        }
    }
}

/// Where the calculation engine lives and how jobs are run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Engine batch executable.
    pub executable: PathBuf,
    /// Native result database library.
    pub cdb_library: PathBuf,
    /// Directory holding one sub-directory per live job.
    pub workspace_root: PathBuf,
    /// Wall-clock limit of one calculation in seconds (default: `60`).
    pub calculation_timeout_secs: u64,
    /// Delay between receiving a streamed model and starting the
    /// calculation, in milliseconds (default: `1000`).
    pub pacing_delay_ms: u64,
    /// How long a workspace may live before the reaper removes it, in
    /// seconds (default: `3600`). Must exceed the calculation timeout.
    pub workspace_ttl_secs: u64,
    /// Load case the result records are read for (default: `1`).
    pub load_case: i32,
}

impl EngineConfig {
    /// Load engine settings from environment variables with defaults.
    ///
    /// | Env Var                    | Default                                            |
    /// |----------------------------|----------------------------------------------------|
    /// | `SOFISTIK_PATH`            | `./Sofistik`                                       |
    /// | `ENGINE_EXECUTABLE`        | `<SOFISTIK_PATH>/wps.exe`                          |
    /// | `CDB_LIBRARY`              | `<SOFISTIK_PATH>/interfaces/64bit/sof_cdb_w-70.dll`|
    /// | `WORKSPACE_ROOT`           | `dat`                                              |
    /// | `CALCULATION_TIMEOUT_SECS` | `60`                                               |
    /// | `PACING_DELAY_MS`          | `1000`                                             |
    /// | `WORKSPACE_TTL_SECS`       | `3600`                                             |
    /// | `CDB_LOAD_CASE`            | `1`                                                |
    pub fn from_env() -> Self {
        let install_dir =
            PathBuf::from(std::env::var("SOFISTIK_PATH").unwrap_or_else(|_| "./Sofistik".into()));

        let executable = std::env::var("ENGINE_EXECUTABLE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| install_dir.join("wps.exe"));

        let cdb_library = std::env::var("CDB_LIBRARY")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                install_dir
                    .join("interfaces")
                    .join("64bit")
                    .join("sof_cdb_w-70.dll")
            });

        let workspace_root =
            PathBuf::from(std::env::var("WORKSPACE_ROOT").unwrap_or_else(|_| "dat".into()));

        let calculation_timeout_secs: u64 = std::env::var("CALCULATION_TIMEOUT_SECS")
            .unwrap_or_else(|_| "60".into())
            .parse()
            .expect("CALCULATION_TIMEOUT_SECS must be a valid u64");

        let pacing_delay_ms: u64 = std::env::var("PACING_DELAY_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("PACING_DELAY_MS must be a valid u64");

        let workspace_ttl_secs: u64 = std::env::var("WORKSPACE_TTL_SECS")
            .unwrap_or_else(|_| "3600".into())
            .parse()
            .expect("WORKSPACE_TTL_SECS must be a valid u64");

        let load_case: i32 = std::env::var("CDB_LOAD_CASE")
            .unwrap_or_else(|_| "1".into())
            .parse()
            .expect("CDB_LOAD_CASE must be a valid i32");

        Self {
            executable,
            cdb_library,
            workspace_root,
            calculation_timeout_secs,
            pacing_delay_ms,
            workspace_ttl_secs,
            load_case,
        }
    }

    pub fn calculation_timeout(&self) -> Duration {
        Duration::from_secs(self.calculation_timeout_secs)
    }

    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }

    pub fn workspace_ttl(&self) -> Duration {
        Duration::from_secs(self.workspace_ttl_secs)
    }
}
