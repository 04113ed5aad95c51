//! Relay configuration
//!
//! Command-line flags with environment fallbacks, validated once at startup into a
//! [`Config`] that the rest of the relay reads from.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tunnel_relay_common::constants::{
    AUTH_TIMEOUT_SECS, DEFAULT_CONTROL_ADDR, DEFAULT_HTTP_ADDR, MAX_BODY_SIZE_BYTES,
    PENDING_SWEEP_INTERVAL_SECS, REQUEST_TIMEOUT_SECS,
};

/// CLI arguments for the relay
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(about = "Public relay for reverse HTTP tunnels", long_about = None)]
#[command(version)]
pub struct Args {
    /// Address the control (WebSocket) listener binds to
    #[arg(long, env = "RELAY_CONTROL_ADDR", default_value = DEFAULT_CONTROL_ADDR)]
    pub control_addr: String,

    /// Address the public HTTP listener binds to
    #[arg(long, env = "RELAY_HTTP_ADDR", default_value = DEFAULT_HTTP_ADDR)]
    pub http_addr: String,

    /// Base domain; tunnels are served at <subdomain>.<domain>
    #[arg(short, long, env = "DOMAIN_NAME")]
    pub domain: String,

    /// Scheme used when advertising public URLs
    #[arg(long, default_value = "https")]
    pub scheme: String,

    /// Shared secret clients must present in their auth frame
    #[arg(short, long, env = "RELAY_AUTH_TOKEN")]
    pub token: Option<String>,

    /// Accept HS256 JWTs signed with this secret instead of a shared token
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// SQLite file for identity bindings (in-memory when absent)
    #[arg(long, env = "RELAY_DATABASE")]
    pub database: Option<PathBuf>,

    /// Seconds to wait for a tunnel to answer a forwarded request
    #[arg(long, default_value_t = REQUEST_TIMEOUT_SECS)]
    pub request_timeout: u64,

    /// Seconds a new control connection has to authenticate
    #[arg(long, default_value_t = AUTH_TIMEOUT_SECS)]
    pub auth_timeout: u64,

    /// Largest public request body accepted, in bytes
    #[arg(long, default_value_t = MAX_BODY_SIZE_BYTES)]
    pub max_body_bytes: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// How control clients authenticate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthConfig {
    SharedToken(String),
    Jwt { secret: String },
}

/// Validated relay configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub control_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub domain: String,
    pub scheme: String,
    pub auth: AuthConfig,
    pub database: Option<PathBuf>,
    pub request_timeout: Duration,
    pub auth_timeout: Duration,
    pub sweep_interval: Duration,
    pub max_body_bytes: usize,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self> {
        let control_addr = args
            .control_addr
            .parse()
            .with_context(|| format!("Invalid control address: {}", args.control_addr))?;
        let http_addr = args
            .http_addr
            .parse()
            .with_context(|| format!("Invalid HTTP address: {}", args.http_addr))?;

        let domain = args.domain.trim().trim_matches('.').to_ascii_lowercase();
        if domain.is_empty() {
            bail!("Domain must not be empty");
        }

        let auth = match (non_empty(args.token), non_empty(args.jwt_secret)) {
            (Some(token), None) => AuthConfig::SharedToken(token),
            (None, Some(secret)) => AuthConfig::Jwt { secret },
            (Some(_), Some(_)) => bail!("Provide either --token or --jwt-secret, not both"),
            (None, None) => bail!("An auth token (--token) or JWT secret (--jwt-secret) is required"),
        };

        if args.request_timeout == 0 {
            bail!("Request timeout must be at least one second");
        }
        if args.auth_timeout == 0 {
            bail!("Auth timeout must be at least one second");
        }

        Ok(Self {
            control_addr,
            http_addr,
            domain,
            scheme: args.scheme,
            auth,
            database: args.database,
            request_timeout: Duration::from_secs(args.request_timeout),
            auth_timeout: Duration::from_secs(args.auth_timeout),
            sweep_interval: Duration::from_secs(PENDING_SWEEP_INTERVAL_SECS),
            max_body_bytes: args.max_body_bytes,
        })
    }

    /// Public URL advertised for a subdomain
    pub fn public_url(&self, subdomain: &str) -> String {
        format!("{}://{}.{}", self.scheme, subdomain, self.domain)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            http_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            domain: "localhost".to_string(),
            scheme: "http".to_string(),
            auth: AuthConfig::SharedToken(String::new()),
            database: None,
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            auth_timeout: Duration::from_secs(AUTH_TIMEOUT_SECS),
            sweep_interval: Duration::from_secs(PENDING_SWEEP_INTERVAL_SECS),
            max_body_bytes: MAX_BODY_SIZE_BYTES,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["relay", "--domain", "example.com"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_config_with_shared_token() {
        let config = Config::from_args(args(&["--token", "token-secreto-123"])).unwrap();

        assert_eq!(config.control_addr.to_string(), DEFAULT_CONTROL_ADDR);
        assert_eq!(config.http_addr.to_string(), DEFAULT_HTTP_ADDR);
        assert_eq!(
            config.auth,
            AuthConfig::SharedToken("token-secreto-123".to_string())
        );
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.auth_timeout, Duration::from_secs(10));
        assert!(config.database.is_none());
    }

    #[test]
    fn test_config_with_jwt_secret() {
        let config = Config::from_args(args(&["--jwt-secret", "k", "--request-timeout", "5"]))
            .unwrap();
        assert_eq!(
            config.auth,
            AuthConfig::Jwt {
                secret: "k".to_string()
            }
        );
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_config_requires_exactly_one_auth_mode() {
        assert!(Config::from_args(args(&[])).is_err());
        assert!(Config::from_args(args(&["--token", ""])).is_err());
        assert!(Config::from_args(args(&["--token", "a", "--jwt-secret", "b"])).is_err());
    }

    #[test]
    fn test_config_rejects_zero_timeouts() {
        assert!(Config::from_args(args(&["--token", "t", "--request-timeout", "0"])).is_err());
        assert!(Config::from_args(args(&["--token", "t", "--auth-timeout", "0"])).is_err());
        assert!(Config::from_args(args(&["--token", "t", "--auth-timeout", "1"])).is_ok());
    }

    #[test]
    fn test_config_rejects_bad_address() {
        let result = Config::from_args(args(&["--token", "t", "--http-addr", "nowhere"]));
        assert!(result.is_err());
    }

    #[test]
    fn test_public_url() {
        let config = Config::from_args(args(&["--token", "t"])).unwrap();
        assert_eq!(config.public_url("x7q2"), "https://x7q2.example.com");

        let config = Config {
            domain: "tunnel.test".to_string(),
            scheme: "http".to_string(),
            ..Config::default()
        };
        assert_eq!(config.public_url("abc"), "http://abc.tunnel.test");
    }

    #[test]
    fn test_domain_is_normalized() {
        let argv = vec!["relay", "--domain", "Example.COM.", "--token", "t"];
        let config = Config::from_args(Args::try_parse_from(argv).unwrap()).unwrap();
        assert_eq!(config.domain, "example.com");
    }
}
