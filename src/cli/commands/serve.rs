//! Serve command - run the HTTP server

use crate::cli::args::ServeArgs;
use crate::config::Config;
use crate::error::IpxResult;
use crate::server;

/// Execute the serve command
pub async fn execute(args: ServeArgs, config: &Config) -> IpxResult<()> {
    let config = with_overrides(config, args);
    server::serve(&config).await
}

/// Apply command-line listener overrides to the loaded configuration
fn with_overrides(config: &Config, args: ServeArgs) -> Config {
    let mut config = config.clone();
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_listener_settings() {
        let config = with_overrides(
            &Config::default(),
            ServeArgs {
                port: Some(9000),
                host: Some("127.0.0.1".to_string()),
            },
        );
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn no_overrides_keep_config() {
        let config = with_overrides(
            &Config::default(),
            ServeArgs {
                port: None,
                host: None,
            },
        );
        assert_eq!(config.server.port, 4321);
        assert_eq!(config.server.host, "0.0.0.0");
    }
}
