pub mod manager;
pub mod notifiers;
pub mod sinks;
pub mod traits;

pub use manager::PluginManager;
pub use traits::{NotifierPlugin, SinkPlugin};
