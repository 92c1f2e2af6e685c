// User-friendly error messages
//
// Provides helpers to convert fatal startup conditions into actionable
// messages that guide users toward solutions.

/// Format a missing process-topology variable error with helpful suggestions
pub fn topology_var_missing_error(var: &str) -> String {
    format!(
        "Required environment variable {} is not set\n\n\
        \x1b[1;33mPossible causes:\x1b[0m\n\
        • The run was launched without a process-group launcher\n\
        • Only part of the topology (RANK / LOCAL_RANK / WORLD_SIZE) was exported\n\n\
        \x1b[1;32mTry:\x1b[0m\n\
        1. Launch under torchrun (exports the full topology):\n\
           \x1b[36mtorchrun --nproc_per_node=4 kiln --config configs/run.toml\x1b[0m\n\n\
        2. For a single-process run, unset all three variables:\n\
           \x1b[36munset RANK LOCAL_RANK WORLD_SIZE\x1b[0m",
        var
    )
}

/// Format a malformed process-topology variable error
pub fn topology_var_invalid_error(var: &str, value: &str) -> String {
    format!(
        "Environment variable {} has a non-integer value: {:?}\n\n\
        \x1b[1;32mTry:\x1b[0m\n\
        1. Check what the launcher exported:\n\
           \x1b[36menv | grep -E 'RANK|WORLD_SIZE'\x1b[0m\n\n\
        2. Export an integer value, e.g.:\n\
           \x1b[36mexport {}=0\x1b[0m",
        var, value, var
    )
}

/// Format an adapter target-module error with the modules that do exist
pub fn adapter_target_error(module: &str, available: &[&str]) -> String {
    format!(
        "Adapter target module '{}' not found in the model\n\n\
        \x1b[1;33mPossible causes:\x1b[0m\n\
        • Typo in [adapter].target_modules\n\
        • Config written for a different model architecture\n\n\
        \x1b[1;32mTry:\x1b[0m\n\
        Available modules: {}",
        module,
        available.join(", ")
    )
}

/// Format a config parse error with helpful suggestions
pub fn config_parse_error(path: &str, error: &str) -> String {
    format!(
        "Failed to parse run configuration {}\n\n\
        \x1b[1;33mError:\x1b[0m {}\n\n\
        \x1b[1;32mTry:\x1b[0m\n\
        1. Check the file syntax:\n\
           \x1b[36mcat {}\x1b[0m\n\n\
        2. Common mistakes:\n\
           • Missing quotes around strings\n\
           • An [adapter] or [sampling] table with missing required keys\n\
           • Invalid TOML syntax",
        path, error, path
    )
}
