//! Process exit codes
//!
//! Follow sysexits.h where a matching code exists.

/// Every cluster deployed
pub const SUCCESS: i32 = 0;

/// At least one cluster failed to deploy
pub const DEPLOY_FAILED: i32 = 1;

/// Invalid manifests, options or cluster configs
pub const VALIDATION_ERROR: i32 = 2;

/// File not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Invalid arguments (sysexits.h EX_USAGE)
pub const USAGE_ERROR: i32 = 64;
