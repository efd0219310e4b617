use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use ferrodub_foundation::ErrorInfo;

const MAX_ERROR_HISTORY: usize = 100;
const EXPORT_RECENT_ERRORS: usize = 10;

/// Aggregates per-module latencies and a bounded error history across all
/// pipeline tasks.
pub struct MetricsCollector {
    inner: RwLock<CollectorInner>,
}

struct CollectorInner {
    modules: HashMap<String, ModuleMetrics>,
    errors: VecDeque<ErrorInfo>,
    start_time: Instant,
}

/// Running latency accumulator for one module.
#[derive(Debug, Clone)]
pub struct ModuleMetrics {
    pub module: String,
    pub latency_sum: Duration,
    pub latency_count: u64,
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub error_count: u64,
    pub last_update: Option<Instant>,
}

impl ModuleMetrics {
    fn new(module: &str) -> Self {
        Self {
            module: module.to_string(),
            latency_sum: Duration::ZERO,
            latency_count: 0,
            min_latency: Duration::ZERO,
            max_latency: Duration::ZERO,
            error_count: 0,
            last_update: None,
        }
    }

    pub fn average_latency(&self) -> Duration {
        if self.latency_count == 0 {
            return Duration::ZERO;
        }
        self.latency_sum / self.latency_count as u32
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub uptime: Duration,
    pub total_modules: usize,
    pub total_errors: usize,
    pub modules: HashMap<String, ModuleSummary>,
}

#[derive(Debug, Clone)]
pub struct ModuleSummary {
    pub module: String,
    pub average_latency: Duration,
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub measurement_count: u64,
    pub error_count: u64,
    pub last_update: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct MetricsExport {
    pub timestamp: Instant,
    pub uptime: Duration,
    pub modules: Vec<ModuleMetrics>,
    pub recent_errors: Vec<ErrorInfo>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CollectorInner {
                modules: HashMap::new(),
                errors: VecDeque::new(),
                start_time: Instant::now(),
            }),
        }
    }

    pub fn record_latency(&self, module: &str, latency: Duration) {
        let mut inner = self.inner.write();
        let entry = inner
            .modules
            .entry(module.to_string())
            .or_insert_with(|| {
                let mut m = ModuleMetrics::new(module);
                m.min_latency = latency;
                m.max_latency = latency;
                m
            });

        entry.latency_sum += latency;
        entry.latency_count += 1;
        entry.last_update = Some(Instant::now());
        if latency < entry.min_latency {
            entry.min_latency = latency;
        }
        if latency > entry.max_latency {
            entry.max_latency = latency;
        }
    }

    pub fn record_error(&self, mut info: ErrorInfo) {
        tracing::debug!(module = %info.module, operation = %info.operation, "error recorded: {}", info);

        let mut inner = self.inner.write();
        if info.timestamp.is_none() {
            info.timestamp = Some(Instant::now());
        }

        let module = info.module.clone();
        if inner.errors.len() == MAX_ERROR_HISTORY {
            inner.errors.pop_front();
        }
        inner.errors.push_back(info);

        inner
            .modules
            .entry(module.clone())
            .or_insert_with(|| ModuleMetrics::new(&module))
            .error_count += 1;
    }

    pub fn module_metrics(&self, module: &str) -> Option<ModuleMetrics> {
        self.inner.read().modules.get(module).cloned()
    }

    pub fn all_module_metrics(&self) -> HashMap<String, ModuleMetrics> {
        self.inner.read().modules.clone()
    }

    pub fn average_latency(&self, module: &str) -> Duration {
        self.inner
            .read()
            .modules
            .get(module)
            .map(|m| m.average_latency())
            .unwrap_or(Duration::ZERO)
    }

    pub fn error_count(&self, module: &str) -> u64 {
        self.inner
            .read()
            .modules
            .get(module)
            .map(|m| m.error_count)
            .unwrap_or(0)
    }

    pub fn recent_errors(&self, max_count: usize) -> Vec<ErrorInfo> {
        let inner = self.inner.read();
        let count = if max_count == 0 || max_count > inner.errors.len() {
            inner.errors.len()
        } else {
            max_count
        };
        inner
            .errors
            .iter()
            .skip(inner.errors.len() - count)
            .cloned()
            .collect()
    }

    pub fn errors_by_module(&self, module: &str) -> Vec<ErrorInfo> {
        self.inner
            .read()
            .errors
            .iter()
            .filter(|e| e.module == module)
            .cloned()
            .collect()
    }

    pub fn uptime(&self) -> Duration {
        self.inner.read().start_time.elapsed()
    }

    pub fn summary(&self) -> MetricsSummary {
        let inner = self.inner.read();
        let modules = inner
            .modules
            .iter()
            .map(|(name, m)| {
                (
                    name.clone(),
                    ModuleSummary {
                        module: name.clone(),
                        average_latency: m.average_latency(),
                        min_latency: m.min_latency,
                        max_latency: m.max_latency,
                        measurement_count: m.latency_count,
                        error_count: m.error_count,
                        last_update: m.last_update,
                    },
                )
            })
            .collect();

        MetricsSummary {
            uptime: inner.start_time.elapsed(),
            total_modules: inner.modules.len(),
            total_errors: inner.errors.len(),
            modules,
        }
    }

    pub fn export(&self) -> MetricsExport {
        let inner = self.inner.read();
        let recent = inner.errors.len().min(EXPORT_RECENT_ERRORS);
        MetricsExport {
            timestamp: Instant::now(),
            uptime: inner.start_time.elapsed(),
            modules: inner.modules.values().cloned().collect(),
            recent_errors: inner
                .errors
                .iter()
                .skip(inner.errors.len() - recent)
                .cloned()
                .collect(),
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.modules.clear();
        inner.errors.clear();
        inner.start_time = Instant::now();
    }
}
