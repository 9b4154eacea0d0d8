use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Process-wide configuration. Built once at startup and shared via `Arc`;
/// nothing mutates it at runtime.
#[derive(Clone, Debug)]
pub struct SandboxConfig {
    /// Root module names a submission may import.
    pub allowed_modules: HashSet<String>,
    /// Builtin capabilities a submission may not reference, directly or
    /// through attribute access.
    pub blocked_builtins: HashSet<String>,
    /// Dunder/reflection attributes flagged as disallowed constructs.
    pub blocked_dunder_attrs: HashSet<String>,
    pub default_timeout: Duration,
    pub max_timeout: Duration,
    pub max_source_bytes: usize,
    pub memory_limit_bytes: u64,
    /// Retained bytes per captured stream; excess is drained and discarded.
    pub max_output_bytes: usize,
    pub max_concurrent_executions: usize,
    pub queue_capacity: usize,
    pub worker_count: usize,
    pub python_path: PathBuf,
}

const DEFAULT_ALLOWED_MODULES: &[&str] = &[
    "math",
    "random",
    "string",
    "re",
    "json",
    "datetime",
    "time",
    "collections",
    "itertools",
    "functools",
    "heapq",
    "bisect",
    "statistics",
    "decimal",
    "fractions",
    "textwrap",
    "unicodedata",
    "copy",
    "enum",
    "dataclasses",
    "typing",
    "operator",
    "array",
    "base64",
    "hashlib",
];

const DEFAULT_BLOCKED_BUILTINS: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "open",
    "globals",
    "locals",
    "vars",
    "__import__",
];

const DEFAULT_BLOCKED_DUNDER_ATTRS: &[&str] = &[
    "__globals__",
    "__builtins__",
    "__subclasses__",
    "__bases__",
    "__mro__",
    "__code__",
    "__getattribute__",
    "__reduce__",
    "__loader__",
];

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            allowed_modules: DEFAULT_ALLOWED_MODULES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            blocked_builtins: DEFAULT_BLOCKED_BUILTINS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            blocked_dunder_attrs: DEFAULT_BLOCKED_DUNDER_ATTRS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_timeout: Duration::from_secs(5),
            max_timeout: Duration::from_secs(30),
            max_source_bytes: 64 * 1024,
            memory_limit_bytes: 256 * 1024 * 1024,
            max_output_bytes: 1024 * 1024,
            max_concurrent_executions: 4,
            queue_capacity: 128,
            worker_count: 2,
            python_path: PathBuf::from("python3"),
        }
    }
}

impl SandboxConfig {
    /// Defaults overridden by `SANDRUN_*` environment variables. Unparsable
    /// values fall back to the default rather than aborting startup.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = env_u64("SANDRUN_DEFAULT_TIMEOUT_SECS") {
            config.default_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("SANDRUN_MAX_TIMEOUT_SECS") {
            config.max_timeout = Duration::from_secs(secs);
        }
        if let Some(bytes) = env_u64("SANDRUN_MAX_SOURCE_BYTES") {
            config.max_source_bytes = bytes as usize;
        }
        if let Some(bytes) = env_u64("SANDRUN_MEMORY_LIMIT_BYTES") {
            config.memory_limit_bytes = bytes;
        }
        if let Some(bytes) = env_u64("SANDRUN_MAX_OUTPUT_BYTES") {
            config.max_output_bytes = bytes as usize;
        }
        if let Some(n) = env_u64("SANDRUN_MAX_CONCURRENT_EXECUTIONS") {
            config.max_concurrent_executions = (n as usize).max(1);
        }
        if let Some(n) = env_u64("SANDRUN_QUEUE_CAPACITY") {
            config.queue_capacity = (n as usize).max(1);
        }
        if let Some(n) = env_u64("SANDRUN_WORKER_COUNT") {
            config.worker_count = (n as usize).max(1);
        }
        if let Ok(path) = std::env::var("SANDRUN_PYTHON_PATH") {
            config.python_path = PathBuf::from(path);
        }
        if let Ok(modules) = std::env::var("SANDRUN_ALLOWED_MODULES") {
            config.allowed_modules = modules
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
        }

        config
    }

    /// Requested timeouts are clamped to the ceiling, never trusted verbatim.
    pub fn clamp_timeout(&self, requested: Duration) -> Duration {
        if requested.is_zero() {
            self.default_timeout.min(self.max_timeout)
        } else {
            requested.min(self.max_timeout)
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
