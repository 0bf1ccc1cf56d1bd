pub mod logging;
pub mod ptr;

/// Component name stamped into the `User-Agent` of every outbound request.
pub const COMPONENT: &str = "chrono-mcp";

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Source revision, injected at build time through `GIT_COMMIT`.
pub const COMMIT: &str = match option_env!("GIT_COMMIT") {
    Some(commit) => commit,
    None => "unknown",
};

/// `<component>/<version>-<commit>`
pub fn user_agent() -> String {
    format!("{COMPONENT}/{VERSION}-{COMMIT}")
}
