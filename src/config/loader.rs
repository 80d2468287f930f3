//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GuardConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::security::profile::{Environment, UnknownEnvironment};

/// Environment variable that selects the deployment mode.
pub const ENVIRONMENT_VAR: &str = "BACKSTOCK_ENV";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("BACKSTOCK_ENV: {0}")]
    Environment(#[from] UnknownEnvironment),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Pick the deployment mode: command line, then `BACKSTOCK_ENV`, then file.
pub fn resolve_environment(
    cli: Option<Environment>,
    env_var: Option<&str>,
    file: Environment,
) -> Result<Environment, UnknownEnvironment> {
    if let Some(env) = cli {
        return Ok(env);
    }
    match env_var.map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => value.parse(),
        None => Ok(file),
    }
}

/// Load and validate configuration. Without a path, defaults are used.
pub fn load_config(path: Option<&Path>, cli_env: Option<Environment>) -> Result<GuardConfig, ConfigError> {
    let mut config: GuardConfig = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => GuardConfig::default(),
    };

    let env_var = std::env::var(ENVIRONMENT_VAR).ok();
    config.security.environment = resolve_environment(cli_env, env_var.as_deref(), config.security.environment)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_environment_precedence() {
        let file = Environment::Development;
        assert_eq!(
            resolve_environment(Some(Environment::Testing), Some("production"), file),
            Ok(Environment::Testing)
        );
        assert_eq!(resolve_environment(None, Some("prod"), file), Ok(Environment::Production));
        assert_eq!(resolve_environment(None, Some("  "), file), Ok(file));
        assert_eq!(resolve_environment(None, None, Environment::Testing), Ok(Environment::Testing));
        assert!(resolve_environment(None, Some("staging"), file).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("backstock-guard-{}.toml", std::process::id()));
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "[session]\ncookie_name = \"inv_session\"").unwrap();
        drop(file);

        let config = load_config(Some(&path), Some(Environment::Testing)).unwrap();
        assert_eq!(config.session.cookie_name, "inv_session");
        assert_eq!(config.security.environment, Environment::Testing);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_config(Some(Path::new("/nonexistent/guard.toml")), None).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
