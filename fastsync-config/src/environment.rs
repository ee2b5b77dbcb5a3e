use std::fmt;
use std::io;
use std::str::FromStr;

/// Variable selecting the deployment a run belongs to.
pub const ENVIRONMENT_VAR: &str = "APP_ENVIRONMENT";

/// Deployment a fastsync run belongs to.
///
/// Production and staging log JSON lines to rolling files, development logs to the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Prod,
    Staging,
    Dev,
}

impl Environment {
    const ALL: [Environment; 3] = [Environment::Prod, Environment::Staging, Environment::Dev];

    pub fn name(self) -> &'static str {
        match self {
            Environment::Prod => "prod",
            Environment::Staging => "staging",
            Environment::Dev => "dev",
        }
    }

    /// Reads [`ENVIRONMENT_VAR`]. An unset variable means [`Environment::Prod`].
    pub fn load() -> io::Result<Environment> {
        match std::env::var(ENVIRONMENT_VAR) {
            Ok(value) => value.parse(),
            Err(_) => Ok(Environment::default()),
        }
    }

    /// Stores this environment in [`ENVIRONMENT_VAR`] for later [`Environment::load`] calls.
    pub fn set(self) {
        // SAFETY: called from single threaded startup and test setup only.
        unsafe { std::env::set_var(ENVIRONMENT_VAR, self.name()) }
    }

    pub fn is_prod(self) -> bool {
        self != Environment::Dev
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Environment {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|env| env.name() == wanted)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unknown environment `{wanted}`, expected prod, staging or dev"),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ignores_case_and_whitespace() {
        assert_eq!("DEV".parse::<Environment>().unwrap(), Environment::Dev);
        assert_eq!(
            " staging ".parse::<Environment>().unwrap(),
            Environment::Staging
        );
        assert!("qa".parse::<Environment>().is_err());
    }

    #[test]
    fn test_only_dev_logs_to_terminal() {
        assert!(Environment::Staging.is_prod());
        assert!(Environment::Prod.is_prod());
        assert!(!Environment::Dev.is_prod());
    }
}
