//! Command-line interface

use clap::Parser;

/// Policy-driven authorization service
#[derive(Parser, Debug)]
#[command(name = "gatekeeper")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Space-separated list of policies sources (files, folders, Github URLs)
    #[arg(long, default_value = "policies.yaml", env = "POLICIES")]
    pub policies: String,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8080, env = "PORT")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "LOG_FORMAT")]
    pub log_format: Option<String>,

    /// Token for downloading policies from private Github repositories
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,
}

impl Cli {
    /// The policies sources, split on whitespace and cleaned of empties.
    #[must_use]
    pub fn sources(&self) -> Vec<String> {
        self.policies
            .split_whitespace()
            .map(ToString::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sources_split_on_whitespace() {
        let cli = Cli::parse_from([
            "gatekeeper",
            "--policies",
            "policies.yaml  https://github.com/org/repo/p.yaml ",
        ]);
        assert_eq!(
            cli.sources(),
            vec!["policies.yaml", "https://github.com/org/repo/p.yaml"]
        );
    }

    #[test]
    fn defaults_match_the_service_conventions() {
        let cli = Cli::parse_from(["gatekeeper"]);
        assert_eq!(cli.sources(), vec!["policies.yaml"]);
        assert_eq!(cli.port, 8080);
        assert_eq!(cli.host, "0.0.0.0");
    }
}
