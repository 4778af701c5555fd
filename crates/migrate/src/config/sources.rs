use std::fmt;
use std::path::PathBuf;

/// Where a resolved configuration value came from, lowest precedence first
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Built-in default
    Default,
    /// The JSON config file at this path
    File(PathBuf),
    /// A process environment variable
    Env(&'static str),
    /// A command-line flag or a builder call
    Override,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Default => f.write_str("default"),
            ConfigSource::File(path) => write!(f, "config file {}", path.display()),
            ConfigSource::Env(var) => write!(f, "environment ${}", var),
            ConfigSource::Override => f.write_str("command line"),
        }
    }
}
