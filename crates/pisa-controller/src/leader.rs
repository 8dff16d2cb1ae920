//! File-lease leader election
//!
//! Candidates share one lease file holding the current holder and the time of
//! its last renewal. A candidate takes the lease when the file is absent or
//! the holder has not renewed within the lease duration.

use crate::config::LeaderElectionConfig;
use crate::error::{ControllerError, ControllerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaseRecord {
    holder: String,
    renewed_at: DateTime<Utc>,
    lease_duration_secs: u64,
}

impl LeaseRecord {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        (now - self.renewed_at)
            .to_std()
            .map(|age| age > Duration::from_secs(self.lease_duration_secs))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct LeaseLock {
    path: PathBuf,
    identity: String,
    lease_duration: Duration,
}

impl LeaseLock {
    pub fn new(path: impl Into<PathBuf>, identity: impl Into<String>, lease_duration: Duration) -> Self {
        Self {
            path: path.into(),
            identity: identity.into(),
            lease_duration,
        }
    }

    pub fn from_config(config: &LeaderElectionConfig) -> Self {
        let identity = config
            .identity
            .clone()
            .unwrap_or_else(|| format!("pisa-controller-{}", uuid::Uuid::new_v4()));
        Self::new(
            config.lease_path.clone(),
            identity,
            Duration::from_secs(config.lease_duration_secs),
        )
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lease if free or expired, or renew it if already held.
    /// Returns whether this candidate holds the lease afterwards.
    pub async fn try_acquire_or_renew(&self) -> ControllerResult<bool> {
        match self.read().await? {
            None => self.create().await,
            Some(record) if record.holder == self.identity => {
                self.replace().await?;
                Ok(true)
            }
            Some(record) if record.is_expired(Utc::now()) => {
                info!(previous = %record.holder, "Lease expired, taking over");
                self.replace().await?;
                // Another candidate may have replaced it at the same time
                Ok(self
                    .read()
                    .await?
                    .map(|r| r.holder == self.identity)
                    .unwrap_or(false))
            }
            Some(record) => {
                debug!(holder = %record.holder, "Lease held by another candidate");
                Ok(false)
            }
        }
    }

    /// Give up the lease if this candidate holds it
    pub async fn release(&self) -> ControllerResult<()> {
        match self.read().await? {
            Some(record) if record.holder == self.identity => {
                match tokio::fs::remove_file(&self.path).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
            _ => Ok(()),
        }
    }

    async fn read(&self) -> ControllerResult<Option<LeaseRecord>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&text) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Unreadable lease file, treating as expired");
                Ok(Some(LeaseRecord {
                    holder: String::new(),
                    renewed_at: DateTime::<Utc>::MIN_UTC,
                    lease_duration_secs: 0,
                }))
            }
        }
    }

    fn record(&self) -> ControllerResult<Vec<u8>> {
        serde_json::to_vec(&LeaseRecord {
            holder: self.identity.clone(),
            renewed_at: Utc::now(),
            lease_duration_secs: self.lease_duration.as_secs(),
        })
        .map_err(|e| ControllerError::Lease(e.to_string()))
    }

    /// Create the lease file; fails over to `false` if someone else won
    async fn create(&self) -> ControllerResult<bool> {
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await;

        match file {
            Ok(mut file) => {
                file.write_all(&self.record()?).await?;
                file.flush().await?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically overwrite the lease file with a fresh record
    async fn replace(&self) -> ControllerResult<()> {
        let tmp = self
            .path
            .with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, self.record()?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Keep trying to hold `lock`, publishing leadership changes on `is_leader`.
/// Releases the lease when `shutdown` fires.
#[instrument(skip_all, fields(identity = %lock.identity()))]
pub async fn leader_election_task(
    lock: LeaseLock,
    renew_interval: Duration,
    is_leader: watch::Sender<bool>,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(renew_interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        let was_leader = *is_leader.borrow();
        match lock.try_acquire_or_renew().await {
            Ok(true) if !was_leader => {
                info!("Gained leadership");
                is_leader.send_replace(true);
            }
            Ok(true) => debug!("Leadership renewed"),
            Ok(false) if was_leader => {
                tracing::warn!("Lost leadership");
                is_leader.send_replace(false);
            }
            Ok(false) => debug!("Following - will retry"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to renew lease");
                if was_leader {
                    is_leader.send_replace(false);
                }
            }
        }
    }

    if *is_leader.borrow() {
        is_leader.send_replace(false);
        if let Err(e) = lock.release().await {
            tracing::error!(error = %e, "Failed to release lease");
        } else {
            info!("Released leadership");
        }
    }
}
