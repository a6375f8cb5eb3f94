//! Folder lock acquisition with bounded retry
//!
//! ```text
//! acquire → lock request ──success──→ Held
//!               │ failure
//!               ▼
//!         wait retry_delay ──cancelled──→ Abandoned
//!               │
//!         elapsed > ceiling? ──yes──→ Abandoned (exhausted)
//!               │ no
//!               └──→ lock request
//! ```
//!
//! Only one lock request is in flight at a time: the next one is issued only
//! after the previous response was observed and the delay elapsed.

use std::time::{Duration, Instant};

use e2sync_core::config::UploadConfig;
use e2sync_core::{FolderId, LockToken};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::protocol::FolderProtocol;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockStatus {
    #[default]
    Idle,
    Acquiring,
    Held,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockPolicy {
    /// Wait between a failed attempt and the next one
    pub retry_delay: Duration,
    /// No attempt is issued once this much time passed since the first one
    pub ceiling: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self::from(&UploadConfig::default())
    }
}

impl From<&UploadConfig> for LockPolicy {
    fn from(config: &UploadConfig) -> Self {
        Self {
            retry_delay: config.lock_retry_delay(),
            ceiling: config.lock_retry_ceiling(),
        }
    }
}

/// A lock this workflow holds and must release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldLock {
    pub folder_id: FolderId,
    pub token: LockToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockFailure {
    #[error("folder lock not acquired after {attempts} attempts in {elapsed:?}")]
    Exhausted {
        attempts: u32,
        elapsed: Duration,
        last_status: Option<u16>,
    },

    #[error("folder lock abandoned after {attempts} attempts")]
    Abandoned { attempts: u32 },
}

/// Lock bookkeeping owned by one workflow instance.
///
/// `token` is set only after a successful lock response for `folder_id`.
#[derive(Debug, Default)]
pub struct FolderLockState {
    pub folder_id: Option<FolderId>,
    pub token: Option<LockToken>,
    pub status: LockStatus,
    pub first_attempt: Option<Instant>,
    pub attempts: u32,
}

impl FolderLockState {
    pub fn in_progress(&self) -> bool {
        self.status == LockStatus::Acquiring
    }

    /// Take the held lock for release, leaving the state idle.
    pub fn take_held(&mut self) -> Option<HeldLock> {
        if self.status != LockStatus::Held {
            return None;
        }
        let token = self.token.take()?;
        let folder_id = self.folder_id.clone()?;
        self.status = LockStatus::Idle;
        Some(HeldLock { folder_id, token })
    }

    fn begin(&mut self, folder_id: &FolderId, now: Instant) {
        self.folder_id = Some(folder_id.clone());
        self.token = None;
        self.status = LockStatus::Acquiring;
        self.first_attempt = Some(now);
        self.attempts = 0;
    }

    fn abandon(&mut self) -> LockFailure {
        self.status = LockStatus::Abandoned;
        LockFailure::Abandoned {
            attempts: self.attempts,
        }
    }
}

pub struct LockAcquirer<'a, P: ?Sized, C: ?Sized> {
    protocol: &'a P,
    clock: &'a C,
    policy: &'a LockPolicy,
    cancel: &'a CancellationToken,
}

impl<'a, P, C> LockAcquirer<'a, P, C>
where
    P: FolderProtocol + ?Sized,
    C: Clock + ?Sized,
{
    pub fn new(
        protocol: &'a P,
        clock: &'a C,
        policy: &'a LockPolicy,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            protocol,
            clock,
            policy,
            cancel,
        }
    }

    /// Lock `folder_id`, retrying failed attempts until the ceiling or a
    /// cancellation.
    pub async fn acquire(
        &self,
        folder_id: &FolderId,
        state: &mut FolderLockState,
    ) -> Result<HeldLock, LockFailure> {
        let first_attempt = self.clock.now();
        state.begin(folder_id, first_attempt);

        loop {
            if self.cancel.is_cancelled() {
                warn!(folder_id = %folder_id, attempts = state.attempts, "folder lock abandoned");
                return Err(state.abandon());
            }

            state.attempts += 1;
            debug!(folder_id = %folder_id, attempt = state.attempts, "requesting folder lock");

            let last_status = match self.protocol.lock_folder(folder_id).await {
                Ok(grant) if grant.folder_id == *folder_id && !grant.token.is_empty() => {
                    info!(folder_id = %folder_id, attempt = state.attempts, "folder locked");
                    state.token = Some(grant.token.clone());
                    state.status = LockStatus::Held;
                    return Ok(HeldLock {
                        folder_id: grant.folder_id,
                        token: grant.token,
                    });
                }
                Ok(grant) => {
                    warn!(
                        folder_id = %folder_id,
                        granted = %grant.folder_id,
                        "lock response does not carry a usable token for this folder"
                    );
                    None
                }
                Err(e) => {
                    warn!(
                        folder_id = %folder_id,
                        attempt = state.attempts,
                        error = %e,
                        "folder could not be locked"
                    );
                    e.status()
                }
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!(folder_id = %folder_id, attempts = state.attempts, "folder lock abandoned");
                    return Err(state.abandon());
                }
                _ = self.clock.sleep(self.policy.retry_delay) => {}
            }

            let elapsed = self.clock.now().saturating_duration_since(first_attempt);
            if elapsed > self.policy.ceiling {
                warn!(
                    folder_id = %folder_id,
                    attempts = state.attempts,
                    elapsed_secs = elapsed.as_secs(),
                    "giving up on folder lock"
                );
                state.status = LockStatus::Abandoned;
                return Err(LockFailure::Exhausted {
                    attempts: state.attempts,
                    elapsed,
                    last_status,
                });
            }
        }
    }
}
