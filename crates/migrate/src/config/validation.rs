use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Cannot read configuration file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error in '{path}': {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// Create a missing required field error
    pub fn missing_required(field: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingRequired {
            field: field.into(),
            hint: hint.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }
}

/// Trait for validating configuration values
pub trait ConfigValidator<T: ?Sized> {
    /// Validate a configuration value
    fn validate(&self, value: &T) -> Result<(), ConfigError>;
}

/// Database URL validator: the scheme selects the backend
pub struct DatabaseUrlValidator {
    pub schemes: Vec<String>,
}

impl Default for DatabaseUrlValidator {
    fn default() -> Self {
        Self {
            schemes: vec![
                "postgres".to_string(),
                "postgresql".to_string(),
                "sqlite".to_string(),
            ],
        }
    }
}

impl ConfigValidator<str> for DatabaseUrlValidator {
    fn validate(&self, value: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::missing_required(
                "db_connection",
                "Set it in the config file or via DATABASE_URL",
            ));
        }

        let parsed = url::Url::parse(value).map_err(|e| {
            ConfigError::invalid_value("db_connection", redact(value), format!("valid URL ({})", e))
        })?;

        if !self.schemes.iter().any(|s| s == parsed.scheme()) {
            return Err(ConfigError::invalid_value(
                "db_connection",
                redact(value),
                format!("URL with scheme one of: {}", self.schemes.join(", ")),
            ));
        }

        Ok(())
    }
}

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex is valid"));

/// Ledger table name validator; the name is interpolated into SQL
pub struct TableNameValidator {
    pub max_len: usize,
}

impl Default for TableNameValidator {
    fn default() -> Self {
        Self { max_len: 63 }
    }
}

impl ConfigValidator<str> for TableNameValidator {
    fn validate(&self, value: &str) -> Result<(), ConfigError> {
        if value.len() > self.max_len || !IDENTIFIER.is_match(value) {
            return Err(ConfigError::invalid_value(
                "db_dbmi_tablename",
                value,
                format!(
                    "plain SQL identifier ([A-Za-z_][A-Za-z0-9_]*, at most {} chars)",
                    self.max_len
                ),
            ));
        }
        Ok(())
    }
}

/// Strip the password from a connection string before it reaches an error or a log line
pub fn redact(connection: &str) -> String {
    match url::Url::parse(connection) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("****"));
            parsed.to_string()
        }
        _ => connection.to_string(),
    }
}
