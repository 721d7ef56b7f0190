use crate::game::UserId;
use clap::Parser;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use reqwest::header::{
    COOKIE,
    HeaderMap,
    HeaderValue,
};
use std::{
    path::PathBuf,
    time::Duration,
};
use url::Url;

pub const CHANNEL_PATH: &str = "/_channel";

/// Terminal client for a planning poker game.
#[derive(Parser, Debug)]
#[command(name = "planning-poker", version, about, long_about = None)]
pub struct Cli {
    /// Base URL of the poker server
    #[arg(long, env = "POKER_SERVER")]
    pub server: String,

    /// Game path (e.g. /game/42) or absolute game URL
    #[arg(long, env = "POKER_GAME")]
    pub game: String,

    /// WebSocket URL of the realtime channel [default: ws(s)://<server>/_channel]
    #[arg(long, env = "POKER_CHANNEL")]
    pub channel: Option<String>,

    /// Channel token issued by the server for this game
    #[arg(long, env = "POKER_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Your user id in the game
    #[arg(long, env = "POKER_USER")]
    pub user: String,

    /// Session cookie sent with every HTTP request
    #[arg(long, env = "POKER_COOKIE", hide_env_values = true)]
    pub cookie: Option<String>,

    /// Where log files go [default: ~/.planning-poker/logs]
    #[arg(long, env = "POKER_LOG_DIR")]
    pub log_dir: Option<String>,

    /// Seconds before a channel handshake or HTTP request is given up
    #[arg(long, env = "POKER_TIMEOUT", default_value_t = 10)]
    pub timeout: u64,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_url: Url,
    pub game_url: Url,
    pub channel_url: Url,
    pub token: String,
    pub user: UserId,
    pub cookie: Option<String>,
    pub log_dir: PathBuf,
    pub request_timeout: Duration,
}

impl Cli {
    pub fn into_config(self) -> Result<AppConfig> {
        let server_url = Url::parse(&self.server)
            .wrap_err_with(|| format!("invalid server URL `{}`", self.server))?;
        let game_url = server_url
            .join(&self.game)
            .wrap_err_with(|| format!("invalid game `{}`", self.game))?;
        let channel_url = match self.channel.as_deref() {
            Some(raw) => {
                Url::parse(raw).wrap_err_with(|| format!("invalid channel URL `{raw}`"))?
            }
            None => default_channel_url(&server_url)?,
        };
        if self.token.trim().is_empty() {
            return Err(eyre!("channel token must not be empty"));
        }
        if self.timeout == 0 {
            return Err(eyre!("timeout must be at least one second"));
        }
        Ok(AppConfig {
            server_url,
            game_url,
            channel_url,
            token: self.token,
            user: UserId::new(self.user),
            cookie: self.cookie,
            log_dir: resolve_log_dir(self.log_dir.as_deref())?,
            request_timeout: Duration::from_secs(self.timeout),
        })
    }
}

impl AppConfig {
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = &self.cookie {
            let mut value =
                HeaderValue::from_str(cookie).wrap_err("cookie is not a valid header value")?;
            value.set_sensitive(true);
            headers.insert(COOKIE, value);
        }
        reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(self.request_timeout)
            .timeout(self.request_timeout)
            .build()
            .wrap_err("failed to build HTTP client")
    }
}

pub fn default_channel_url(server_url: &Url) -> Result<Url> {
    let scheme = match server_url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(eyre!("cannot derive a channel URL from `{other}` scheme")),
    };
    let mut url = server_url.join(CHANNEL_PATH)?;
    url.set_scheme(scheme)
        .map_err(|()| eyre!("cannot switch `{server_url}` to {scheme}"))?;
    Ok(url)
}

pub fn default_log_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").wrap_err("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".planning-poker").join("logs"))
}

pub fn resolve_log_dir(dir: Option<&str>) -> Result<PathBuf> {
    match dir {
        Some(raw) => {
            let expanded = shellexpand::tilde(raw);
            Ok(PathBuf::from(expanded.into_owned()))
        }
        None => default_log_dir(),
    }
}
