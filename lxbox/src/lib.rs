//! lxbox: container lifecycle core.
//!
//! Turns a declarative [`ContainerArgs`] (profiles, local config, local
//! devices) into a live, validated [`Container`] handle, and attaches to
//! containers persisted by earlier runs.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # fn engines() -> Arc<dyn lxbox::EngineFactory> { unimplemented!() }
//! use lxbox::{ContainerArgs, ContainerRuntime, RuntimeOptions};
//!
//! let runtime = ContainerRuntime::builder(RuntimeOptions::default())
//!     .engine_factory(engines())
//!     .build()?;
//!
//! let mut web = runtime.create(ContainerArgs::new("web"))?;
//! web.start(false)?;
//! # Ok::<(), lxbox::LxboxError>(())
//! ```

pub mod config;
pub mod container;
pub mod db;
pub mod device;
pub mod engine;
pub mod errors;
pub mod idmap;
pub mod network;
pub mod runtime;
pub mod storage;
pub mod util;

pub use config::{ConfigMap, Profile, ValidationError};
pub use container::{Architecture, Container, ContainerArgs, ContainerType, DriverKind};
pub use db::{ContainerStore, SqliteStore};
pub use device::{Device, DeviceSet};
pub use engine::{ContainerStatus, Engine, EngineFactory, EngineState};
pub use errors::{LxboxError, LxboxResult};
pub use idmap::{IdmapEntry, IdmapOptions, IdmapSet};
pub use network::{NetworkNotifier, NoopNetwork};
pub use runtime::options::RuntimeOptions;
pub use runtime::{ContainerRuntime, RuntimeBuilder};
pub use storage::{StorageBackend, StorageKind};
pub use util::init_logging_for;
