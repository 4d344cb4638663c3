/// Application name
pub const APP_NAME: &str = "Parley";

/// Maximum attachment payload size in bytes (10 MiB).
///
/// Enforced by the sender before transmission; receivers accept whatever
/// arrives.
pub const MAX_ATTACHMENT_SIZE: u64 = 10 * 1024 * 1024;

/// Capacity of the mpsc channels between the connection-manager task and the
/// rest of the application.
pub const CHANNEL_BUFFER: usize = 256;

/// Default bound on how long a connection may stay in `Connecting`.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default base URL of the directory service.
pub const DEFAULT_DIRECTORY_URL: &str = "http://127.0.0.1:8000";
