//! Collector Plugin SPI and the registry that owns installed plugins
//! (spec §4.1, §4.2).

mod registry;
mod traits;

pub use registry::{PluginRegistry, RegistryError};
pub use traits::{Collector, CollectorContext, PluginMeta};
