//! System-wide constants and default paths.

use std::time::Duration;

/// Default directory for runtime state (container metadata, network registry).
pub const DEFAULT_STATE_DIR: &str = "/var/run/hutch";

/// Default directory for image archives, layers, and mount points.
pub const DEFAULT_STORAGE_DIR: &str = "/var/lib/hutch";

/// Name of the per-container metadata file.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Name of the per-container log file written in detached mode.
pub const LOG_FILE_NAME: &str = "container.log";

/// Name of the IPAM allocation store.
pub const IPAM_FILE_NAME: &str = "subnet.json";

/// File descriptor on which the init process receives the user command.
pub const INIT_PIPE_FD: i32 = 3;

/// Environment variable carrying the target pid to the `enter` helper.
pub const ENV_EXEC_PID: &str = "HUTCH_EXEC_PID";

/// Environment variable carrying the command string to the `enter` helper.
pub const ENV_EXEC_CMD: &str = "HUTCH_EXEC_CMD";

/// Number of characters in a generated container ID.
pub const CONTAINER_ID_LEN: usize = 10;

/// Number of endpoint-ID characters used in veth device names.
pub const VETH_NAME_PREFIX_LEN: usize = 5;

/// Prefix of the container-side veth device name.
pub const VETH_PEER_PREFIX: &str = "cif-";

/// Maximum number of unmount attempts during workspace teardown.
pub const UNMOUNT_RETRIES: u32 = 1000;

/// Pause between unmount attempts.
pub const UNMOUNT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// How long `stop` waits after SIGTERM before escalating to SIGKILL.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Polling interval while waiting for a process to exit.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Timestamp layout for `createTime`.
pub const CREATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Network driver registered by default.
pub const DEFAULT_NETWORK_DRIVER: &str = "bridge";

