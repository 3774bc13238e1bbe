use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, environment-overridable. Defaults mirror a small
/// single-host deployment; every knob can be tuned without a rebuild.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP API binds to.
    pub bind_addr: String,

    // Broker
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_db: i64,
    /// Namespace prefix for every broker key.
    pub redis_prefix: String,

    // Per-submission limits
    /// Ceiling on a submission's time limit, and the default when absent.
    pub max_execution_time: u64,
    /// Ceiling on a submission's memory limit in MB.
    pub max_memory_mb: u64,
    /// RLIMIT_NPROC applied to each judged child.
    pub max_processes: u64,
    /// RLIMIT_FSIZE and the stdout/stderr capture cap, in bytes.
    pub max_output_size: u64,

    // Worker pool
    pub max_workers: usize,
    /// How long the HTTP handler waits on the per-task results list.
    pub max_latency: Duration,
    /// Tasks RUNNING longer than this are considered stuck.
    pub max_task_execution_time: Duration,
    /// TTL for task hashes and the expiry horizon for cleanup.
    pub result_expiry: Duration,
    /// Grace given to an in-flight task when a worker is asked to shut down.
    pub task_completion_timeout: Duration,

    // Supervisor loops
    pub monitor_interval: Duration,
    pub recover_interval: Duration,
    pub cleanup_interval: Duration,

    // Code execution
    pub code_execution_dir: PathBuf,
    /// Default for submissions that do not set `security_check` explicitly.
    pub security_check: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8000".to_string()),
            redis_host: env_or("REDIS_HOST", "localhost".to_string()),
            redis_port: env_or("REDIS_PORT", 6379),
            redis_db: env_or("REDIS_DB", 0),
            redis_prefix: env_or("REDIS_PREFIX", "gavel".to_string()),
            max_execution_time: env_or("MAX_EXECUTION_TIME", 30),
            max_memory_mb: env_or("MAX_MEMORY", 4 * 1024),
            max_processes: env_or("MAX_PROCESSES", 4),
            max_output_size: env_or("MAX_OUTPUT_SIZE", 16 * 1024 * 1024),
            max_workers: env_or("MAX_WORKERS", default_workers()),
            max_latency: Duration::from_secs(env_or("MAX_LATENCY", 180)),
            max_task_execution_time: Duration::from_secs(env_or("MAX_TASK_EXECUTION_TIME", 150)),
            result_expiry: Duration::from_secs(env_or("RESULT_EXPIRY_TIME", 3600)),
            task_completion_timeout: Duration::from_secs(env_or("TASK_COMPLETION_TIMEOUT", 10)),
            monitor_interval: Duration::from_secs_f64(env_or("MONITOR_INTERVAL", 10.0)),
            recover_interval: Duration::from_secs_f64(env_or("RECOVER_INTERVAL", 0.2)),
            cleanup_interval: Duration::from_secs_f64(env_or("CLEANUP_INTERVAL", 900.0)),
            code_execution_dir: PathBuf::from(env_or(
                "CODE_EXECUTION_DIR",
                "/tmp/gavel".to_string(),
            )),
            security_check: env_or("SECURITY_CHECK", true),
        }
    }

    /// Connection URL for the broker.
    pub fn redis_url(&self) -> String {
        format!(
            "redis://{}:{}/{}",
            self.redis_host, self.redis_port, self.redis_db
        )
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Read an environment variable, falling back to `default` when unset or
/// unparsable. Parse failures are logged rather than fatal.
fn env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, raw, "unparsable value in environment, using default");
                default
            }
        },
        Err(_) => default,
    }
}
