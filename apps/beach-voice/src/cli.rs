use clap::Parser;

use crate::config::AppConfig;

#[derive(Parser, Debug, Default)]
#[command(name = "beach-voice")]
#[command(about = "Signaling relay for realtime voice sessions", long_about = None)]
pub struct Cli {
    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, env = "BEACH_VOICE_BIND", value_parser = parse_bind)]
    pub bind: Option<BindAddr>,

    /// Seconds a new control channel may stay silent before it is closed
    #[arg(long)]
    pub auth_timeout_secs: Option<u64>,
}

/// A `host:port` pair. The host may be a name, so this is not a `SocketAddr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindAddr {
    pub host: String,
    pub port: u16,
}

fn parse_bind(value: &str) -> Result<BindAddr, String> {
    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| format!("expected host:port, got `{value}`"))?;
    if host.is_empty() {
        return Err(format!("missing host in `{value}`"));
    }
    let port = port
        .parse()
        .map_err(|err| format!("invalid port `{port}`: {err}"))?;
    Ok(BindAddr {
        host: host.to_string(),
        port,
    })
}

impl Cli {
    /// Applies command-line overrides on top of the environment configuration.
    pub fn apply(&self, mut config: AppConfig) -> AppConfig {
        if let Some(bind) = &self.bind {
            config.bind_host = bind.host.clone();
            config.port = bind.port;
        }
        if let Some(secs) = self.auth_timeout_secs.filter(|secs| *secs > 0) {
            config.auth_timeout_secs = secs;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn overrides_bind_and_timeout() {
        let cli = Cli::try_parse_from(["beach-voice", "--bind", "127.0.0.1:9999", "--auth-timeout-secs", "5"])
            .unwrap();
        let config = cli.apply(AppConfig::default());
        assert_eq!(config.bind_addr(), "127.0.0.1:9999");
        assert_eq!(config.auth_timeout_secs, 5);
    }

    #[test_timeout::timeout]
    fn malformed_bind_is_rejected() {
        for bad in ["nonsense", ":8080", "localhost:http", "localhost:70000"] {
            let err = Cli::try_parse_from(["beach-voice", "--bind", bad]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation, "{bad}");
        }
    }

    #[test_timeout::timeout]
    fn hostname_bind_and_zero_timeout() {
        let cli = Cli {
            bind: Some(parse_bind("localhost:3000").unwrap()),
            auth_timeout_secs: Some(0),
        };
        let config = cli.apply(AppConfig::default());
        assert_eq!(config.bind_addr(), "localhost:3000");
        assert_eq!(config.auth_timeout_secs, 15);
    }
}
