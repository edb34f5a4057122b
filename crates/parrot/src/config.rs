//! Process configuration.
//!
//! All knobs come in as flags and are frozen into one immutable [`Config`]
//! at startup, shared by reference with everything that needs it.

use std::time::Duration;

use clap::Parser;

/// HTTP to IRC message bridge.
#[derive(Debug, Parser)]
#[command(name = "parrot", version, about)]
pub struct Config {
    /// Bot's nickname.
    #[arg(long, default_value = "parrot")]
    pub nick: String,

    /// NickServ password, sent as IDENTIFY after each successful connect.
    #[arg(long)]
    pub nick_password: Option<String>,

    /// IRC server address (host:port).
    #[arg(long, default_value = "irc.libera.chat:6667")]
    pub irc_address: String,

    /// Connect with SSL (certificate verification disabled).
    #[arg(long)]
    pub ssl: bool,

    /// Default channel for messages, and initial channel.
    #[arg(long, default_value = "parrot")]
    pub default_channel: String,

    /// TCP address of the HTTP server.
    #[arg(long, default_value = "127.0.0.1:5555")]
    pub http_address: String,

    /// Public URL advertised in replies and on the status page.
    /// Derived from --http-address when unset.
    #[arg(long)]
    pub public_url: Option<String>,

    /// Seconds between connection retry attempts.
    #[arg(long, default_value_t = 3)]
    pub retry_interval: u64,
}

impl Config {
    /// The default channel with its protocol prefix.
    pub fn default_channel_name(&self) -> String {
        format!("#{}", self.default_channel)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_interval)
    }

    /// Retry-After value handed to producers while the connection is down.
    /// Always positive, even with a zero retry interval.
    pub fn retry_after_secs(&self) -> u64 {
        (self.retry_interval * 2).max(1)
    }

    /// The URL this bridge advertises for itself.
    pub fn public_url(&self) -> String {
        if let Some(ref url) = self.public_url {
            return url.clone();
        }
        match self.http_address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && host != "0.0.0.0" => {
                format!("http://{host}:{port}/")
            }
            Some((_, port)) => format!("http://localhost:{port}/"),
            None => format!("http://{}/", self.http_address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::parse_from(["parrot"]);
        assert_eq!(config.nick, "parrot");
        assert_eq!(config.nick_password, None);
        assert_eq!(config.irc_address, "irc.libera.chat:6667");
        assert!(!config.ssl);
        assert_eq!(config.default_channel, "parrot");
        assert_eq!(config.http_address, "127.0.0.1:5555");
        assert_eq!(config.retry_interval, 3);
        assert_eq!(config.default_channel_name(), "#parrot");
        assert_eq!(config.retry_after_secs(), 6);
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::parse_from([
            "parrot",
            "--nick",
            "polly",
            "--default-channel",
            "news",
            "--http-address",
            "0.0.0.0:8080",
            "--ssl",
            "--retry-interval",
            "10",
        ]);
        assert_eq!(config.nick, "polly");
        assert_eq!(config.default_channel_name(), "#news");
        assert!(config.ssl);
        assert_eq!(config.retry_delay(), Duration::from_secs(10));
        assert_eq!(config.retry_after_secs(), 20);
    }

    #[test]
    fn retry_after_is_positive_for_zero_interval() {
        let config = Config::parse_from(["parrot", "--retry-interval", "0"]);
        assert_eq!(config.retry_after_secs(), 1);
    }

    #[test]
    fn public_url_derivation() {
        let config = Config::parse_from(["parrot"]);
        assert_eq!(config.public_url(), "http://127.0.0.1:5555/");

        let config = Config::parse_from(["parrot", "--http-address", "0.0.0.0:8080"]);
        assert_eq!(config.public_url(), "http://localhost:8080/");

        let config = Config::parse_from(["parrot", "--http-address", ":5555"]);
        assert_eq!(config.public_url(), "http://localhost:5555/");

        let config = Config::parse_from(["parrot", "--public-url", "https://bot.example.net/"]);
        assert_eq!(config.public_url(), "https://bot.example.net/");
    }
}
