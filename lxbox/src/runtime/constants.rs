//! Constants for the lxbox runtime.

pub mod envs {
    /// Overrides the runtime home directory.
    pub const LXBOX_HOME: &str = "LXBOX_HOME";
}

/// File naming patterns
pub mod filenames {
    /// Runtime lock file inside the home directory.
    pub const LOCK_FILE: &str = ".lock";

    /// SQLite database inside the db directory.
    pub const DATABASE: &str = "lxbox.db";

    /// Log file prefix inside the logs directory.
    pub const LOG_FILE: &str = "lxbox.log";

    /// Checkpoint directory inside a container directory.
    pub const STATE_DIR: &str = "state";
}

/// Root disk synthesis
pub mod root_disk {
    /// First candidate name for a synthesized root disk.
    pub const BASE_NAME: &str = "root";

    /// Candidates tried (`root`, `root_`, ...) before giving up.
    pub const MAX_NAME_ATTEMPTS: usize = 64;
}

/// Separator between a container name and its snapshot name.
pub const SNAPSHOT_DELIMITER: char = '/';
