//! Capture and recognition permission checks.

use tracing::warn;

/// Outcome of a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Authority deciding whether capture and recognition may proceed.
///
/// Both requests resolve before any audio resource is touched; a denial is
/// a terminal start error.
pub trait PermissionAuthority: Send + Sync {
    fn request_microphone(&self) -> PermissionStatus;
    fn request_recognition(&self) -> PermissionStatus;
}

/// Host-level checks for desktop systems without a permission broker.
///
/// Microphone access is treated as denied when no input device is visible;
/// recognition runs locally and is always granted.
pub struct SystemPermissions;

impl PermissionAuthority for SystemPermissions {
    fn request_microphone(&self) -> PermissionStatus {
        use cpal::traits::HostTrait;

        if cpal::default_host().default_input_device().is_some() {
            PermissionStatus::Granted
        } else {
            warn!("no input device visible, treating microphone access as denied");
            PermissionStatus::Denied
        }
    }

    fn request_recognition(&self) -> PermissionStatus {
        PermissionStatus::Granted
    }
}
