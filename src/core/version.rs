//! Build metadata generated by the build script

include!(concat!(env!("OUT_DIR"), "/version.rs"));

/// Version of the dashboard RPC request/response contract
pub fn rpc_schema_version() -> &'static str {
    RPC_SCHEMA_VERSION
}

/// Build time string from the build script (UTC)
pub fn build_time() -> &'static str {
    BUILD_TIME
}

/// Short git hash captured by the build script
pub fn git_hash() -> &'static str {
    GIT_HASH
}

/// One-line description used by `--version` and the startup banner
pub fn long_version() -> String {
    format!(
        "{} (rpc schema {}, built {}, git {})",
        env!("CARGO_PKG_VERSION"),
        RPC_SCHEMA_VERSION,
        BUILD_TIME,
        GIT_HASH
    )
}
