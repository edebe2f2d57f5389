pub mod notifier;
pub mod sink;

pub use notifier::{NotificationKind, NotificationResult, NotifierPlugin, RunNotification};
pub use sink::{SinkPlugin, SinkRequest};
