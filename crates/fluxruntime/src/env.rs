//! The shared execution environment.
//!
//! Every node and graph holds an `Arc<Env>`. The environment owns the worker
//! pool, the node factory (with the numeric and duration conversion ladders
//! pre-registered), and the set of loaded modules.

use crate::factory::NodeFactory;
use crate::module::{Module, ModuleMetadata};
use crate::pool::WorkerPool;
use fluxcore::data::{cast_duration, cast_numeric, DURATION_TAGS, NUMERIC_TAGS};
use fluxcore::{FluxError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Default width of the worker pool.
pub const DEFAULT_WORKER_COUNT: usize = 10;

pub struct Env {
    factory: Arc<NodeFactory>,
    pool: WorkerPool,
    modules: Mutex<HashMap<String, Module>>,
}

impl Env {
    /// Builds an environment around a factory with the default pool width.
    pub fn new(factory: Arc<NodeFactory>) -> Arc<Self> {
        Self::with_workers(factory, DEFAULT_WORKER_COUNT)
    }

    pub fn with_workers(factory: Arc<NodeFactory>, workers: usize) -> Arc<Self> {
        let registry = factory.type_registry();
        registry.register_complete(&NUMERIC_TAGS, cast_numeric);
        registry.register_complete(&DURATION_TAGS, cast_duration);

        Arc::new(Self {
            factory,
            pool: WorkerPool::new(workers),
            modules: Mutex::new(HashMap::new()),
        })
    }

    pub fn factory(&self) -> &Arc<NodeFactory> {
        &self.factory
    }

    pub fn worker_count(&self) -> usize {
        self.pool.width()
    }

    /// Queues a task on the worker pool.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        self.pool.submit(task);
    }

    /// Queues one task per index over `[first, last)`, in index order.
    pub fn submit_sequence(&self, first: u64, last: u64, task: impl Fn(u64) + Send + Sync + 'static) {
        let task = Arc::new(task);
        for index in first..last {
            let task = task.clone();
            self.pool.submit(move || task(index));
        }
    }

    /// Splits `[first, last)` into blocks and queues one task per block that
    /// calls `task` once per index.
    pub fn submit_loop(
        &self,
        first: u64,
        last: u64,
        task: impl Fn(u64) + Send + Sync + 'static,
        num_blocks: usize,
    ) {
        let task = Arc::new(task);
        for (start, end) in self.partition(first, last, num_blocks) {
            let task = task.clone();
            self.pool.submit(move || {
                for index in start..end {
                    task(index);
                }
            });
        }
    }

    /// Splits `[first, last)` into blocks and queues one task per block that
    /// receives the block's range.
    pub fn submit_blocks(
        &self,
        first: u64,
        last: u64,
        task: impl Fn(u64, u64) + Send + Sync + 'static,
        num_blocks: usize,
    ) {
        let task = Arc::new(task);
        for (start, end) in self.partition(first, last, num_blocks) {
            let task = task.clone();
            self.pool.submit(move || task(start, end));
        }
    }

    fn partition(&self, first: u64, last: u64, num_blocks: usize) -> Vec<(u64, u64)> {
        if last <= first {
            return Vec::new();
        }

        let span = last - first;
        let blocks = if num_blocks == 0 {
            self.pool.width() as u64
        } else {
            num_blocks as u64
        }
        .clamp(1, span);

        let base = span / blocks;
        let extra = span % blocks;
        let mut ranges = Vec::with_capacity(blocks as usize);
        let mut cursor = first;
        for index in 0..blocks {
            let len = base + u64::from(index < extra);
            ranges.push((cursor, cursor + len));
            cursor += len;
        }
        ranges
    }

    /// Blocks until the worker pool has drained.
    pub fn wait(&self) {
        self.pool.wait();
    }

    /// A system environment variable's value, or empty when unset.
    pub fn env_var(&self, name: &str) -> String {
        std::env::var(name).unwrap_or_default()
    }

    /// Loads a module archive and registers its node classes with the
    /// factory. Re-loading a module name unloads the previous instance.
    pub fn load_module(&self, archive: &Path) -> Result<ModuleMetadata> {
        let mut module = Module::new(self.factory.clone());
        module.load(archive)?;

        let metadata = module
            .metadata()
            .cloned()
            .ok_or_else(|| FluxError::ModuleLoad("module metadata unavailable after load".into()))?;

        let mut modules = self.modules.lock().unwrap();
        if let Some(mut previous) = modules.remove(&metadata.name) {
            tracing::warn!(module = %metadata.name, "module already loaded, replacing");
            previous.unload();
        }
        modules.insert(metadata.name.clone(), module);

        Ok(metadata)
    }

    /// Unloads a module by name. Returns `false` when it was not loaded.
    pub fn unload_module(&self, name: &str) -> bool {
        let module = self.modules.lock().unwrap().remove(name);
        match module {
            Some(mut module) => module.unload(),
            None => false,
        }
    }

    /// Names of the currently loaded modules.
    pub fn loaded_modules(&self) -> Vec<String> {
        self.modules.lock().unwrap().keys().cloned().collect()
    }
}
