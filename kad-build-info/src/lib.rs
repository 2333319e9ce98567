//! Compile-time build and version metadata for kad-dht binaries.

/// The crate version baked in at compile time via `CARGO_PKG_VERSION`.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The git commit this binary was built from, or "unknown" outside a checkout.
pub const GIT_SHA: &str = match option_env!("VERGEN_GIT_SHA") {
    Some(sha) => sha,
    None => "unknown",
};

/// The git branch this binary was built from, or "unknown" outside a checkout.
pub const GIT_BRANCH: &str = match option_env!("VERGEN_GIT_BRANCH") {
    Some(branch) => branch,
    None => "unknown",
};

/// The UTC timestamp this binary was built at, or "unknown" if unavailable.
pub const BUILD_TIMESTAMP: &str = match option_env!("VERGEN_BUILD_TIMESTAMP") {
    Some(ts) => ts,
    None => "unknown",
};

/// A single human-readable line summarizing the build, suitable for
/// `--version` output and a one-time startup log line.
pub fn one_line() -> String {
    format!(
        "kad-dht {PKG_VERSION} ({GIT_SHA} on {GIT_BRANCH}, built {BUILD_TIMESTAMP})"
    )
}

/// Logs [`one_line`] at info level. Call once during node startup.
pub fn log_version() {
    tracing::info!("{}", one_line());
}
