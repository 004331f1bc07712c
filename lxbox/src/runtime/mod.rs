pub mod constants;
pub mod layout;
pub mod lock;
pub mod options;

mod core;
pub use core::{ContainerRuntime, RuntimeBuilder};
pub(crate) use core::RuntimeInner;
