// Command-line arguments

use clap::Parser;

/// homeboard - home dashboard backend with an encrypted OAuth credential cache
#[derive(Parser, Debug)]
#[command(name = "homeboard", version, about, long_about = None)]
pub struct Args {
    /// Run the Google consent flow for the calendar binding, then start the server
    #[arg(long)]
    pub login: bool,

    /// Path to a config file (default: ~/.homeboard/config.toml)
    #[arg(long, env = "HOMEBOARD_CONFIG")]
    pub config: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let args = Args::parse_from(["homeboard", "--login", "--config", "/etc/homeboard.toml"]);
        assert!(args.login);
        assert_eq!(args.config.as_deref(), Some("/etc/homeboard.toml"));
    }
}
