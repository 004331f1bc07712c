//! Persistence of containers and profiles.
//!
//! The store is the source of truth across restarts. Drivers write through
//! [`ContainerStore`]; [`SqliteStore`] is the bundled implementation.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::config::Profile;
use crate::container::ContainerArgs;
use crate::errors::LxboxResult;
use chrono::{DateTime, Utc};

/// Persistence capability used by the runtime and drivers.
pub trait ContainerStore: Send + Sync {
    /// Insert a new container record and return its id.
    ///
    /// Fails with `AlreadyExists` if the name is taken.
    fn container_insert(&self, args: &ContainerArgs) -> LxboxResult<i64>;

    fn container_get(&self, name: &str) -> LxboxResult<Option<ContainerArgs>>;

    /// Replace architecture, ephemeral flag, profiles, config and devices.
    fn container_update(&self, name: &str, args: &ContainerArgs) -> LxboxResult<()>;

    fn container_set_stateful(&self, name: &str, stateful: bool) -> LxboxResult<()>;

    fn container_touch(&self, name: &str, when: DateTime<Utc>) -> LxboxResult<()>;

    /// Remove a container record. Removing a missing record is not an error.
    fn container_remove(&self, name: &str) -> LxboxResult<()>;

    /// All container names, sorted.
    fn container_names(&self) -> LxboxResult<Vec<String>>;

    fn profile_get(&self, name: &str) -> LxboxResult<Option<Profile>>;

    /// Insert or replace a profile.
    fn profile_put(&self, profile: &Profile) -> LxboxResult<()>;

    /// All profile names, sorted.
    fn profile_names(&self) -> LxboxResult<Vec<String>>;
}
