/// Contains constant values which are used as arguments to functions and in log messages.
pub mod constants;

/// Contains the error handling tooling.
pub mod error;

/// Contains tools to work with files.
pub(crate) mod file;

/// Contains macros.
pub(crate) mod macros;

/// Contains a local HTTP server for tests against registries and repositories.
#[cfg(test)]
pub(crate) mod test_server;
