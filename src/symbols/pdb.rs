//! PDB-backed symbol provider.
//!
//! Public symbols are read with the `pdb` crate, optionally on a background
//! thread. The provider is usable while loading; `cancel_loading` stops the
//! worker between symbols and joins it.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use ::pdb::FallibleIterator;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::SymbolConfig;
use crate::error::{ModuleError, Result};
use crate::symbols::{SymbolProvider, SymbolProviderFactory, SymbolRequest};

fn attach_failed(msg: impl Into<String>) -> ModuleError {
    ModuleError::ProviderAttachFailed(msg.into())
}

#[derive(Default)]
struct Shared {
    open: AtomicBool,
    loading: AtomicBool,
    cancel: AtomicBool,
    publics: RwLock<BTreeMap<u32, String>>,
}

/// Symbols of one module, read from a PDB file
pub struct PdbSymbolProvider {
    path: PathBuf,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PdbSymbolProvider {
    /// Open `path` and load its public symbols, on a worker thread when
    /// `background` is set.
    pub fn open(path: &Path, background: bool) -> Result<Self> {
        let shared = Arc::new(Shared::default());
        shared.loading.store(true, Ordering::SeqCst);

        let provider = Self {
            path: path.to_path_buf(),
            shared: shared.clone(),
            worker: Mutex::new(None),
        };

        if background {
            let path = provider.path.clone();
            let handle = std::thread::Builder::new()
                .name("pdb-loader".to_string())
                .spawn(move || run_loader(&path, &shared))?;
            *provider.worker.lock() = Some(handle);
        } else {
            run_loader(&provider.path, &shared);
            if !provider.is_open() {
                return Err(attach_failed(format!(
                    "failed to read {}",
                    provider.path.display()
                )));
            }
        }

        Ok(provider)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until a background load finishes
    pub fn wait(&self) {
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

fn run_loader(path: &Path, shared: &Shared) {
    match load_publics(path, shared) {
        Ok(count) => {
            shared.open.store(true, Ordering::SeqCst);
            debug!(path = %path.display(), count, "pdb publics loaded");
        }
        Err(LoadStop::Cancelled) => {
            debug!(path = %path.display(), "pdb load cancelled");
        }
        Err(LoadStop::Failed(e)) => {
            warn!(path = %path.display(), error = %e, "pdb load failed");
        }
    }
    shared.loading.store(false, Ordering::SeqCst);
}

enum LoadStop {
    Cancelled,
    Failed(::pdb::Error),
}

impl From<::pdb::Error> for LoadStop {
    fn from(e: ::pdb::Error) -> Self {
        Self::Failed(e)
    }
}

fn load_publics(path: &Path, shared: &Shared) -> std::result::Result<usize, LoadStop> {
    let file = File::open(path).map_err(|e| LoadStop::Failed(::pdb::Error::IoError(e)))?;
    let mut pdb = ::pdb::PDB::open(file)?;
    let address_map = pdb.address_map()?;
    let globals = pdb.global_symbols()?;

    let mut publics = BTreeMap::new();
    let mut iter = globals.iter();
    while let Some(symbol) = iter.next()? {
        if shared.cancel.load(Ordering::Relaxed) {
            return Err(LoadStop::Cancelled);
        }
        if let Ok(::pdb::SymbolData::Public(data)) = symbol.parse() {
            if let Some(rva) = data.offset.to_rva(&address_map) {
                publics.insert(rva.0, data.name.to_string().into_owned());
            }
        }
    }

    let count = publics.len();
    *shared.publics.write() = publics;
    Ok(count)
}

impl SymbolProvider for PdbSymbolProvider {
    fn name(&self) -> &str {
        "pdb"
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    fn is_loading(&self) -> bool {
        self.shared.loading.load(Ordering::SeqCst)
    }

    fn cancel_loading(&self) {
        self.shared.cancel.store(true, Ordering::SeqCst);
        self.wait();
    }

    fn symbol_count(&self) -> usize {
        self.shared.publics.read().len()
    }

    fn symbol_at(&self, rva: u32) -> Option<String> {
        self.shared.publics.read().get(&rva).cloned()
    }
}

impl Drop for PdbSymbolProvider {
    fn drop(&mut self) {
        self.cancel_loading();
    }
}

/// Attaches [`PdbSymbolProvider`]s, locating the PDB next to the embedded
/// path, in the configured search paths, or next to the module.
#[derive(Debug, Clone, Default)]
pub struct PdbSymbolFactory {
    config: SymbolConfig,
}

impl PdbSymbolFactory {
    pub fn new(config: SymbolConfig) -> Self {
        Self { config }
    }

    /// Candidate PDB locations, most specific first
    pub fn candidates(&self, request: &SymbolRequest<'_>) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let embedded = request.symbol_file;
        let file_name = file_name_of(embedded);

        if !embedded.is_empty() {
            out.push(PathBuf::from(embedded));
        }
        if let Some(name) = file_name {
            for dir in &self.config.search_paths {
                out.push(dir.join(name));
            }
        }

        // <module dir>\<module stem>.pdb
        let module_file = file_name_of(request.module_path).unwrap_or(request.module_path);
        let stem = module_file
            .rsplit_once('.')
            .map_or(module_file, |(stem, _)| stem);
        if !stem.is_empty() {
            let dir = &request.module_path[..request.module_path.len() - module_file.len()];
            out.push(PathBuf::from(format!("{}{}.pdb", dir, stem)));
        }
        out
    }

    fn verify(&self, path: &Path, request: &SymbolRequest<'_>) -> Result<()> {
        let Some(expected) = request.codeview.and_then(|cv| cv.guid) else {
            return Ok(());
        };

        let file = File::open(path)?;
        let mut pdb = ::pdb::PDB::open(file)
            .map_err(|e| attach_failed(format!("{}: {}", path.display(), e)))?;
        let info = pdb
            .pdb_information()
            .map_err(|e| attach_failed(format!("{}: {}", path.display(), e)))?;

        if info.guid.to_bytes_le() != expected {
            return Err(attach_failed(format!(
                "{}: GUID {} does not match image",
                path.display(),
                info.guid
            )));
        }
        Ok(())
    }
}

fn file_name_of(path: &str) -> Option<&str> {
    path.rsplit(['\\', '/']).next().filter(|s| !s.is_empty())
}

impl SymbolProviderFactory for PdbSymbolFactory {
    fn attach(&self, request: &SymbolRequest<'_>) -> Result<Box<dyn SymbolProvider>> {
        if request.is_virtual {
            return Err(attach_failed("virtual module has no symbol file"));
        }

        let path = self
            .candidates(request)
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| attach_failed(format!("no pdb found for {}", request.module_path)))?;

        if self.config.verify_signature {
            self.verify(&path, request)?;
        }

        info!(pdb = %path.display(), module = request.module_path, "attaching pdb");
        let provider = PdbSymbolProvider::open(&path, self.config.load_async)?;
        Ok(Box::new(provider))
    }
}
