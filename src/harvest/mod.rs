//! Harvester: walk the source list, fetch each URL, stage into the inbox.
//!
//! Single-instance via the harvester lock (a held lock is a quiet success,
//! so cron can fire at will). URLs run strictly in order: the worker is
//! the bottleneck and parallel downloads invite upstream throttling. The
//! remote mount is verified before and after every URL; losing it aborts
//! the batch.

pub mod fetcher;
pub mod sources;

use crate::config::{Config, config_root};
use crate::defaults;
use crate::error::{Result, StentorError};
use crate::lock::{LockState, NamedLock};
use crate::mount::{self, Mounter};
use fetcher::{FetchOutcome, Fetcher};
use std::path::PathBuf;
use tokio::sync::watch;

/// Tally of one harvesting pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarvestSummary {
    /// URLs whose files were transferred into the inbox.
    pub fetched: usize,
    /// URLs already in the archive or producing nothing new.
    pub archived: usize,
    pub soft_failures: usize,
    /// True when a peer held the harvester lock and nothing ran.
    pub skipped_lock: bool,
}

pub struct Harvester {
    config: Config,
    lock_dir: PathBuf,
    scratch_dir: Option<PathBuf>,
}

impl Harvester {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            lock_dir: config_root(),
            scratch_dir: None,
        }
    }

    /// Use a different lock directory (tests).
    pub fn with_lock_dir(mut self, dir: PathBuf) -> Self {
        self.lock_dir = dir;
        self
    }

    /// Use a different download scratch root (tests).
    pub fn with_scratch_dir(mut self, dir: PathBuf) -> Self {
        self.scratch_dir = Some(dir);
        self
    }

    /// One harvesting pass over the configured source list.
    pub async fn run(&self, shutdown: &mut watch::Receiver<bool>) -> Result<HarvestSummary> {
        let mut lock = NamedLock::new(&self.lock_dir, defaults::LOCK_HARVESTER);
        match lock.acquire()? {
            LockState::Acquired => {}
            LockState::AcquiredStale => {
                tracing::info!("reclaimed stale harvester lock");
            }
            LockState::Held => {
                tracing::info!("another harvester is running; nothing to do");
                return Ok(HarvestSummary {
                    skipped_lock: true,
                    ..Default::default()
                });
            }
        }

        let entries = sources::load_sources(&self.config.sources_file)?;
        if entries.is_empty() {
            tracing::info!("source list has no entries; nothing to do");
            lock.release();
            return Ok(HarvestSummary::default());
        }
        tracing::info!(urls = entries.len(), "harvest pass starting");

        let inbox = self.config.client_inbox();
        let mut mounter = Mounter::new(
            self.config.mount_cmd.clone(),
            self.config.unmount_cmd.clone(),
        );
        if self.config.remote_required() {
            if let Err(e) = mounter.ensure(&inbox).await {
                lock.release();
                return Err(e);
            }
        } else {
            std::fs::create_dir_all(&inbox)?;
        }

        let result = self.fetch_all(&entries, &inbox, shutdown).await;

        // Symmetric teardown on every path: unmount only what we mounted,
        // release only what we acquired.
        mounter.teardown().await;
        lock.release();
        result
    }

    async fn fetch_all(
        &self,
        entries: &[sources::SourceEntry],
        inbox: &std::path::Path,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<HarvestSummary> {
        let mut fetcher = Fetcher::new(&self.config).with_lock_dir(self.lock_dir.clone());
        if let Some(dir) = &self.scratch_dir {
            fetcher = fetcher.with_scratch_root(dir.clone());
        }
        let mut summary = HarvestSummary::default();

        for entry in entries {
            if *shutdown.borrow() {
                tracing::warn!("shutdown requested; stopping harvest");
                break;
            }
            // A dead mount means every further URL would fail the same
            // way; stop the batch instead of burning through the list.
            if self.config.remote_required()
                && !mount::is_mounted_and_responsive(inbox).await
            {
                return Err(StentorError::TransportLost {
                    message: format!("{} became unresponsive", inbox.display()),
                });
            }

            match fetcher.fetch(entry, inbox).await {
                Ok(FetchOutcome::Transferred(_)) => summary.fetched += 1,
                Ok(FetchOutcome::AlreadyArchived) | Ok(FetchOutcome::NothingNew) => {
                    summary.archived += 1
                }
                Ok(FetchOutcome::SoftFailed) => summary.soft_failures += 1,
                Err(e) => return Err(e),
            }

            if self.config.remote_required()
                && !mount::is_mounted_and_responsive(inbox).await
            {
                return Err(StentorError::TransportLost {
                    message: format!("{} lost after fetch", inbox.display()),
                });
            }
        }

        tracing::info!(
            fetched = summary.fetched,
            archived = summary.archived,
            soft_failures = summary.soft_failures,
            "harvest pass finished"
        );
        Ok(summary)
    }
}
