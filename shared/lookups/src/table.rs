//! Shared harness for the file-backed lookup tables: a single mutex with a
//! writer flag, a background reload thread on a minute-granularity timer,
//! and a save path that validates its own round trip before touching the
//! file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::{LookupError, LookupResult};

/// How long a reader politely waits for an in-flight writer before taking
/// the lock anyway.
const READ_SPIN_LIMIT: u32 = 50;
const READ_SPIN_SLEEP: Duration = Duration::from_millis(2);

/// A parseable/serializable table body.
pub trait TableSource: Default + Send + Sync + 'static {
    fn parse(contents: &str) -> LookupResult<Self>
    where
        Self: Sized;

    fn serialize(&self) -> LookupResult<String>;
}

pub struct ReloadingTable<T: TableSource> {
    path: PathBuf,
    reload_minutes: u32,
    state: Arc<Mutex<T>>,
    locked: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl<T: TableSource> ReloadingTable<T> {
    pub fn new(path: impl Into<PathBuf>, reload_minutes: u32) -> Self {
        Self {
            path: path.into(),
            reload_minutes,
            state: Arc::new(Mutex::new(T::default())),
            locked: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Initial load; on success starts the background reload thread when a
    /// nonzero interval was configured.
    pub fn read(&mut self) -> LookupResult<()> {
        self.reload()?;

        if self.reload_minutes > 0 && self.handle.is_none() {
            let path = self.path.clone();
            let interval = u64::from(self.reload_minutes) * 60;
            let state = Arc::clone(&self.state);
            let locked = Arc::clone(&self.locked);
            let stop = Arc::clone(&self.stop);

            self.handle = Some(std::thread::spawn(move || {
                let mut elapsed = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_secs(1));
                    elapsed += 1;
                    if elapsed >= interval {
                        elapsed = 0;
                        match std::fs::read_to_string(&path).map_err(LookupError::from).and_then(|c| T::parse(&c)) {
                            Ok(fresh) => {
                                locked.store(true, Ordering::SeqCst);
                                *state.lock().expect("lookup mutex poisoned") = fresh;
                                locked.store(false, Ordering::SeqCst);
                                info!(path = %path.display(), "lookup table reloaded");
                            }
                            Err(e) => {
                                // keep the previous in-memory table
                                error!(path = %path.display(), error = %e, "lookup reload failed");
                            }
                        }
                    }
                }
            }));
        }

        Ok(())
    }

    /// Replaces the in-memory state from the backing file.
    pub fn reload(&self) -> LookupResult<()> {
        let contents = std::fs::read_to_string(&self.path)?;
        let fresh = T::parse(&contents)?;

        self.locked.store(true, Ordering::SeqCst);
        *self.state.lock().expect("lookup mutex poisoned") = fresh;
        self.locked.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Serializes the current state back to the backing file, validating
    /// that the output parses to the same serialized form first.
    pub fn commit(&self) -> LookupResult<()> {
        let serialized = self.with(|state| state.serialize())?;

        let reparsed = T::parse(&serialized)?;
        let revalidated = reparsed.serialize()?;
        if revalidated.len() != serialized.len() {
            return Err(LookupError::SaveValidation(self.path.display().to_string()));
        }

        std::fs::write(&self.path, serialized)?;
        Ok(())
    }

    /// Shared read access; spins briefly while a writer holds the table.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let mut spins = 0;
        while self.locked.load(Ordering::SeqCst) && spins < READ_SPIN_LIMIT {
            std::thread::sleep(READ_SPIN_SLEEP);
            spins += 1;
        }
        if spins == READ_SPIN_LIMIT {
            warn!(path = %self.path.display(), "lookup reader waited out a writer");
        }

        f(&self.state.lock().expect("lookup mutex poisoned"))
    }

    /// Exclusive access for entry add/erase operations.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.locked.store(true, Ordering::SeqCst);
        let result = f(&mut self.state.lock().expect("lookup mutex poisoned"));
        self.locked.store(false, Ordering::SeqCst);
        result
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Signals the reload thread to exit and joins it.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl<T: TableSource> Drop for ReloadingTable<T> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
