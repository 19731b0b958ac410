//! Runtime environment detection.
//!
//! Single source of truth for whether we run in production, development or
//! tests, based on the `TASKBOARD_ENV` environment variable:
//!
//! - `test` - Test mode
//! - `development` or `dev` - Development mode (placeholder server key allowed)
//! - (anything else or unset) - Production mode

/// Runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Development environment.
    Development,
    /// Test environment.
    Test,
}

impl Environment {
    /// Detect current environment from `TASKBOARD_ENV`.
    #[must_use]
    pub fn current() -> Self {
        Self::parse(std::env::var("TASKBOARD_ENV").ok().as_deref())
    }

    /// Interpret a raw `TASKBOARD_ENV` value.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("test") => Self::Test,
            Some("development" | "dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns `true` if this is the development environment.
    #[must_use]
    pub fn is_development(self) -> bool {
        self == Self::Development
    }

    /// Returns `true` if this is the production environment.
    #[must_use]
    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(Environment::parse(Some("test")), Environment::Test);
        assert_eq!(Environment::parse(Some("dev")), Environment::Development);
        assert_eq!(Environment::parse(Some("development")), Environment::Development);
        assert_eq!(Environment::parse(Some("staging")), Environment::Production);
        assert_eq!(Environment::parse(None), Environment::Production);
    }
}
