//! Process exit codes of `arx`. Part of the public contract.

pub const SUCCESS: i32 = 0;
pub const RUN_FAILED: i32 = 1; // A phase failed, preflight failed or the export failed
/// Invalid scenario, settings or arguments, or a violated resume invariant.
pub const CONFIG_ERROR: i32 = 2;
pub const INTERRUPTED: i32 = 130; // Cancelled by Ctrl-C
