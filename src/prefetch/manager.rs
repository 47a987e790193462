//! Running prefetch jobs, keyed by area name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::TierStore;
use crate::error::PrefetchError;
use crate::net::Fetcher;

use super::events::EventBus;
use super::job::{AreaPrefetchJob, PrefetchCommand, PrefetchSummary};

/// Handle of a job spawned by [`PrefetchManager::start`].
pub type PrefetchHandle = JoinHandle<Result<PrefetchSummary, PrefetchError>>;

/// Starts, tracks and cancels area prefetches.
///
/// At most one job per area name runs at a time.
pub struct PrefetchManager<S: ?Sized = dyn TierStore, F: ?Sized = dyn Fetcher> {
    job: Arc<AreaPrefetchJob<S, F>>,
    running: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl<S: ?Sized, F: ?Sized> Clone for PrefetchManager<S, F> {
    fn clone(&self) -> Self {
        Self {
            job: self.job.clone(),
            running: self.running.clone(),
        }
    }
}

/// Removes an area from the running map when its task ends, including by panic or abort.
struct RunningEntry {
    running: Arc<Mutex<HashMap<String, CancellationToken>>>,
    area_name: String,
}

impl Drop for RunningEntry {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.area_name);
    }
}

impl<S, F> PrefetchManager<S, F>
where
    S: TierStore + ?Sized + 'static,
    F: Fetcher + ?Sized + 'static,
{
    pub fn new(job: AreaPrefetchJob<S, F>) -> Self {
        Self {
            job: Arc::new(job),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn running(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Event bus the jobs publish to.
    pub fn events(&self) -> &EventBus {
        self.job.events()
    }

    /// Spawn a job for `command`.
    ///
    /// # Errors
    ///
    /// Returns [`PrefetchError::AlreadyRunning`] when a job with the same area
    /// name has not finished yet.
    pub fn start(&self, command: PrefetchCommand) -> Result<PrefetchHandle, PrefetchError> {
        let cancel = CancellationToken::new();
        {
            let mut running = self.running();
            if running.contains_key(&command.area_name) {
                return Err(PrefetchError::AlreadyRunning {
                    area_name: command.area_name,
                });
            }
            running.insert(command.area_name.clone(), cancel.clone());
        }

        info!(area = %command.area_name, "Area prefetch scheduled");

        let job = self.job.clone();
        let entry = RunningEntry {
            running: self.running.clone(),
            area_name: command.area_name.clone(),
        };
        Ok(tokio::spawn(async move {
            let _entry = entry;
            job.run(&command, cancel).await
        }))
    }

    /// Cancel the job for `area_name`. Returns whether one was running.
    pub fn cancel(&self, area_name: &str) -> bool {
        match self.running().get(area_name) {
            Some(token) => {
                debug!(area = area_name, "Cancelling area prefetch");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Names of the jobs still running, sorted.
    pub fn running_areas(&self) -> Vec<String> {
        let mut names: Vec<String> = self.running().keys().cloned().collect();
        names.sort();
        names
    }
}
