//! Network subsystem hook.

use crate::errors::LxboxResult;

/// The single network notification the lifecycle core emits.
pub trait NetworkNotifier: Send + Sync {
    /// Regenerate static DHCP leases after the container set changed.
    fn update_static_leases(&self) -> LxboxResult<()>;
}

/// Notifier for hosts without managed networking.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNetwork;

impl NetworkNotifier for NoopNetwork {
    fn update_static_leases(&self) -> LxboxResult<()> {
        tracing::trace!("No managed network, skipping static lease update");
        Ok(())
    }
}
