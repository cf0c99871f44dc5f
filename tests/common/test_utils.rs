//! Shared test utilities: temporary module files and fakes for the loader's
//! collaborators.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use modreg::config::{LoaderConfig, RegistryConfig};
use modreg::error::Result;
use modreg::memory::{LabelSink, ModuleEvent, ModuleListObserver};
use modreg::symbols::{SymbolProvider, SymbolProviderFactory, SymbolRequest};
use modreg::{ModuleLoader, ModuleRegistry};
use parking_lot::Mutex;
use tempfile::TempDir;

/// Write `bytes` as `name` inside `dir` and return the path as a string
pub fn write_module(dir: &TempDir, name: &str, bytes: &[u8]) -> String {
    let path: PathBuf = dir.path().join(name);
    std::fs::write(&path, bytes).unwrap();
    path_string(&path)
}

pub fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Config with a fixed system root so trust classification is predictable
pub fn test_config() -> RegistryConfig {
    RegistryConfig {
        loader: LoaderConfig {
            system_root: "C:\\Windows".to_string(),
            ..LoaderConfig::default()
        },
        ..RegistryConfig::default()
    }
}

pub fn new_loader() -> ModuleLoader {
    ModuleLoader::new(Arc::new(ModuleRegistry::new()), test_config())
}

/// Label sink that remembers every label in order
#[derive(Debug, Default)]
pub struct RecordingLabels {
    labels: Mutex<Vec<(u64, String)>>,
}

impl RecordingLabels {
    pub fn labels(&self) -> Vec<(u64, String)> {
        self.labels.lock().clone()
    }

    pub fn get(&self, address: u64) -> Option<String> {
        self.labels
            .lock()
            .iter()
            .find(|(a, _)| *a == address)
            .map(|(_, t)| t.clone())
    }
}

impl LabelSink for RecordingLabels {
    fn set_label(&self, address: u64, text: &str) {
        self.labels.lock().push((address, text.to_string()));
    }
}

/// Observer that remembers every event in order
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ModuleEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<ModuleEvent> {
        self.events.lock().clone()
    }
}

impl ModuleListObserver for RecordingObserver {
    fn modules_changed(&self, event: &ModuleEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Observable state of one [`SlowProvider`]
#[derive(Debug, Default)]
pub struct ProviderState {
    pub loading: AtomicBool,
    pub cancelled: AtomicBool,
    pub dropped: AtomicBool,
    /// Whether another thread could read the registry while cancelling
    pub registry_readable_on_cancel: AtomicBool,
}

/// Provider that stays loading until it is cancelled
pub struct SlowProvider {
    state: Arc<ProviderState>,
    watched: Option<Arc<ModuleRegistry>>,
}

impl SlowProvider {
    fn registry_readable(registry: &Arc<ModuleRegistry>) -> bool {
        let (tx, rx) = mpsc::channel();
        let registry = registry.clone();
        thread::spawn(move || {
            let _ = tx.send(registry.module_list().len());
        });
        rx.recv_timeout(Duration::from_secs(2)).is_ok()
    }
}

impl SymbolProvider for SlowProvider {
    fn name(&self) -> &str {
        "slow"
    }

    fn is_open(&self) -> bool {
        true
    }

    fn is_loading(&self) -> bool {
        self.state.loading.load(Ordering::SeqCst)
    }

    fn cancel_loading(&self) {
        if let Some(registry) = &self.watched {
            let readable = Self::registry_readable(registry);
            self.state
                .registry_readable_on_cancel
                .store(readable, Ordering::SeqCst);
        }
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.loading.store(false, Ordering::SeqCst);
    }
}

impl Drop for SlowProvider {
    fn drop(&mut self) {
        self.state.dropped.store(true, Ordering::SeqCst);
    }
}

/// Factory handing out [`SlowProvider`]s and keeping their state
#[derive(Default)]
pub struct SlowFactory {
    pub attached: AtomicUsize,
    states: Mutex<Vec<Arc<ProviderState>>>,
    watched: Option<Arc<ModuleRegistry>>,
}

impl SlowFactory {
    /// Providers that check, when cancelled, whether `registry` is readable
    pub fn watching(registry: Arc<ModuleRegistry>) -> Self {
        Self {
            watched: Some(registry),
            ..Self::default()
        }
    }

    pub fn state(&self, index: usize) -> Arc<ProviderState> {
        self.states.lock()[index].clone()
    }
}

impl SymbolProviderFactory for SlowFactory {
    fn attach(&self, _request: &SymbolRequest<'_>) -> Result<Box<dyn SymbolProvider>> {
        let state = Arc::new(ProviderState::default());
        state.loading.store(true, Ordering::SeqCst);
        self.states.lock().push(state.clone());
        self.attached.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SlowProvider {
            state,
            watched: self.watched.clone(),
        }))
    }
}
