//! An embeddable plug-in framework for native applications.
//!
//! `loom` lets a host application discover, install, resolve, start, stop and
//! uninstall plug-ins at runtime. Plug-ins declare typed extension points and
//! contribute configuration against extension points declared by other
//! plug-ins, and may expose symbols that peers resolve dynamically with
//! automatic dependency tracking. See [`loom_core`] for the full API.

pub use loom_core::*;

/// Re-export the common types needed to embed the framework.
pub mod prelude {
    pub use loom_core::prelude::*;
}
