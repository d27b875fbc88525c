//! Process-wide cache of loaded model libraries.
//!
//! The platform loader hands back the already-mapped image when a path is
//! opened twice, so a changed file on disk is not picked up. Loads are
//! therefore keyed by canonical path and a second load of a live library
//! reuses it, with a warning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use log::{debug, warn};
use once_cell::sync::Lazy;

use crate::error::Result;
use crate::library::NativeLibrary;

static LOADED: Lazy<Mutex<HashMap<PathBuf, Weak<NativeLibrary>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn cache_key(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Load `path`, or return the instance already loaded in this process.
pub fn load_library(path: &Path, warn_on_reload: bool) -> Result<Arc<NativeLibrary>> {
    get_or_load(cache_key(path), warn_on_reload, |p| NativeLibrary::load(p))
}

fn get_or_load(
    key: PathBuf,
    warn_on_reload: bool,
    load: impl FnOnce(&Path) -> Result<NativeLibrary>,
) -> Result<Arc<NativeLibrary>> {
    let mut loaded = LOADED.lock().unwrap_or_else(PoisonError::into_inner);

    if let Some(existing) = loaded.get(&key).and_then(Weak::upgrade) {
        if warn_on_reload {
            warn!(
                "Loading a shared object {} that has already been loaded. \
                 If the file has changed since the last time it was loaded, \
                 this load may not update the library!",
                key.display()
            );
        }
        return Ok(existing);
    }

    let library = Arc::new(load(&key)?);
    loaded.retain(|_, lib| lib.strong_count() > 0);
    loaded.insert(key, Arc::downgrade(&library));
    debug!("{} libraries loaded", loaded.len());
    Ok(library)
}

/// Paths of the libraries currently held by some model.
pub fn loaded_libraries() -> Vec<PathBuf> {
    let loaded = LOADED.lock().unwrap_or_else(PoisonError::into_inner);
    let mut paths: Vec<PathBuf> = loaded
        .iter()
        .filter(|(_, lib)| lib.strong_count() > 0)
        .map(|(path, _)| path.clone())
        .collect();
    paths.sort();
    paths
}
