pub mod credentials;
pub mod directories;
pub mod logging;
pub mod notifier;
pub mod shutdown;
