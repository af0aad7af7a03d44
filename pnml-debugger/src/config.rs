//! Process-level configuration for the debug adapter binary. Mirrors the
//! CLI-arg-then-env-var precedence the teacher's server used for
//! `--database-url`/`DATABASE_URL`.

/// Resolved startup configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// A workflow file to load immediately instead of waiting for a DAP
    /// `launch` request. Useful for scripted / non-interactive runs.
    pub program: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self { program: parse_program_path() }
    }
}

/// `--program <path>` CLI arg takes precedence over `PNML_PROGRAM`.
fn parse_program_path() -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    if let Some(path) = args.windows(2).find(|w| w[0] == "--program").map(|w| w[1].clone()) {
        return Some(path);
    }
    std::env::var("PNML_PROGRAM").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_program() {
        assert!(Config::default().program.is_none());
    }
}
