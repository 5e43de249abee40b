//! Shared audio session handle.
//!
//! Capture runs inside an acquired session; the RAII guard guarantees
//! release on every exit path and gives the process its one-active-session
//! invariant, since both pipelines acquire from the same controller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::SessionError;

/// Hands out exclusive audio session guards.
#[derive(Clone, Default)]
pub struct AudioSessionController {
    active: Arc<AtomicBool>,
}

impl AudioSessionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Activate the audio session for exclusive capture.
    ///
    /// Fails while another guard is live; a second recording session must
    /// not start until the first releases.
    pub fn acquire(&self) -> Result<AudioSessionGuard, SessionError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SessionError::AudioSession(
                "audio session already active".to_string(),
            ));
        }
        debug!("audio session activated");
        Ok(AudioSessionGuard {
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Live audio session; dropping it deactivates the session.
pub struct AudioSessionGuard {
    active: Arc<AtomicBool>,
}

impl Drop for AudioSessionGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
        debug!("audio session deactivated");
    }
}
