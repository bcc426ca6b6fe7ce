//! Configuration, from CLI flags or environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::allocation::DmFailurePolicy;
use crate::classify::{ClassifierConfig, DEFAULT_MARKER};
use crate::gateway::DEFAULT_API_BASE;
use crate::types::UserId;

#[derive(Parser, Debug, Clone)]
#[command(name = "link-dispenser")]
#[command(about = "Hands out single-use links to users who DM or mention the bot")]
pub struct Args {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// The bot account's own user id
    #[arg(long, env = "BOT_USER_ID")]
    pub bot_user_id: String,

    /// JSON Lines ledger of links and their claimants
    #[arg(long, env = "LINKS_FILE")]
    pub links_file: PathBuf,

    /// Plain-text links file loaded into the ledger when it is empty
    #[arg(long, env = "IMPORT_LINKS")]
    pub import_links: Option<PathBuf>,

    /// Hashtag that makes a public mention a request
    #[arg(long, env = "MAGIC_HASHTAG", default_value = DEFAULT_MARKER)]
    pub marker: String,

    /// Consumer secret for CRC challenges and webhook signatures
    #[arg(long, env = "TWITTER_CONSUMER_SECRET", hide_env_values = true)]
    pub consumer_secret: Option<String>,

    /// OAuth 2.0 user access token for sending DMs and replies
    #[arg(long, env = "TWITTER_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: String,

    /// Platform API base URL
    #[arg(long, env = "TWITTER_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Upper bound on one delivery attempt, retries included
    #[arg(long, env = "DELIVERY_TIMEOUT_SECS", default_value_t = 30)]
    pub delivery_timeout_secs: u64,

    /// What to do with a fresh claim whose DM could not be delivered
    #[arg(long, env = "DM_FAILURE_POLICY", value_enum, default_value_t = DmFailurePolicy::Retain)]
    pub dm_failure_policy: DmFailurePolicy,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("bot user id must not be empty")]
    EmptyBotUserId,

    #[error("marker hashtag must not be empty")]
    EmptyMarker,

    #[error("delivery timeout must be at least one second")]
    ZeroDeliveryTimeout,
}

impl Args {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot_user_id.trim().is_empty() {
            return Err(ConfigError::EmptyBotUserId);
        }
        if self.marker().is_empty() {
            return Err(ConfigError::EmptyMarker);
        }
        if self.delivery_timeout_secs == 0 {
            return Err(ConfigError::ZeroDeliveryTimeout);
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    pub fn bot_id(&self) -> UserId {
        UserId::new(self.bot_user_id.trim())
    }

    /// The marker without a leading `#`.
    pub fn marker(&self) -> &str {
        self.marker.trim().trim_start_matches('#')
    }

    pub fn classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig::new(self.bot_id()).with_marker(self.marker())
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec![
            "link-dispenser",
            "--bot-user-id",
            "42",
            "--links-file",
            "/tmp/links.jsonl",
            "--access-token",
            "tok",
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn required_flags_parse() {
        let args = parse(&[]);
        assert_eq!(args.bot_id(), UserId::new("42"));
        assert_eq!(args.links_file, PathBuf::from("/tmp/links.jsonl"));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn overrides_parse() {
        let args = parse(&[
            "--port",
            "8080",
            "--marker",
            "#FreeStuff",
            "--delivery-timeout-secs",
            "5",
            "--dm-failure-policy",
            "release",
        ]);
        assert_eq!(args.listen_addr().port(), 8080);
        assert_eq!(args.marker(), "FreeStuff");
        assert_eq!(args.delivery_timeout(), Duration::from_secs(5));
        assert_eq!(args.dm_failure_policy, DmFailurePolicy::Release);
        assert_eq!(args.classifier_config().marker, "FreeStuff");
    }

    #[test]
    fn missing_bot_id_is_rejected_by_parser() {
        let result = Args::try_parse_from([
            "link-dispenser",
            "--links-file",
            "/tmp/l",
            "--access-token",
            "t",
            "--bot-user-id",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn blank_bot_id_fails_validation() {
        let mut args = parse(&[]);
        args.bot_user_id = "  ".to_string();
        assert_eq!(args.validate(), Err(ConfigError::EmptyBotUserId));
    }

    #[test]
    fn bare_hash_marker_fails_validation() {
        let args = parse(&["--marker", "#"]);
        assert_eq!(args.validate(), Err(ConfigError::EmptyMarker));
    }

    #[test]
    fn zero_timeout_fails_validation() {
        let args = parse(&["--delivery-timeout-secs", "0"]);
        assert_eq!(args.validate(), Err(ConfigError::ZeroDeliveryTimeout));
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let result = Args::try_parse_from([
            "link-dispenser",
            "--bot-user-id",
            "42",
            "--links-file",
            "/tmp/l",
            "--access-token",
            "t",
            "--dm-failure-policy",
            "forget",
        ]);
        assert!(result.is_err());
    }
}
