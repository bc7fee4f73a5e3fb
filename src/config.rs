use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub fetch_concurrency: usize,
    pub baseline_tables: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_connections: 5,
            fetch_concurrency: 8,
            baseline_tables: 4,
        }
    }
}

impl Config {
    /// Reads the process environment (after `.env`, if present).
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Config::default();
        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to the results Postgres instance")?;

        Ok(Self {
            database_url,
            max_connections: parse_var("RESULTS_MAX_CONNECTIONS", defaults.max_connections)?,
            fetch_concurrency: parse_var("RESULTS_FETCH_CONCURRENCY", defaults.fetch_concurrency)?
                .max(1),
            baseline_tables: parse_var("RESULTS_BASELINE_TABLES", defaults.baseline_tables)?
                .max(1),
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a number, got `{raw}`")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variables_fall_back_to_defaults() {
        let value: usize = parse_var("RESULTS_TEST_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
    }
}
