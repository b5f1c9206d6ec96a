//! Post-merge sync polling.
//!
//! Some repositories are mirrored into another source-control system after
//! merge. When a sync URL prefix is configured, librarian polls
//! `<prefix><merge sha>` until the mirror reports the commit: `200` means
//! synced, `404` means not yet, anything else is an error.

use crate::error::{Error, Result};
use log::{debug, info};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use std::thread;
use std::time::Duration;

pub struct SyncWaiter {
    client: Client,
    url_prefix: String,
    auth_token: Option<String>,
    poll_interval: Duration,
}

impl SyncWaiter {
    pub fn new(url_prefix: &str, auth_token: Option<String>, poll_interval: Duration) -> Self {
        Self {
            client: Client::new(),
            url_prefix: url_prefix.to_string(),
            auth_token: auth_token.filter(|t| !t.is_empty()),
            poll_interval,
        }
    }

    /// Polls until `sha` is reported as synced. There is no timeout.
    pub fn wait_for(&self, sha: &str) -> Result<()> {
        let url = format!("{}{}", self.url_prefix, sha);
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if self.is_synced(&url)? {
                info!("{} synced after {} checks", sha, attempts);
                return Ok(());
            }
            debug!("{} not synced yet", sha);
            thread::sleep(self.poll_interval);
        }
    }

    /// One sync check.
    pub fn is_synced(&self, url: &str) -> Result<bool> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request.send()?;
        classify(url, response.status())
    }
}

fn classify(url: &str, status: StatusCode) -> Result<bool> {
    match status {
        StatusCode::OK => Ok(true),
        StatusCode::NOT_FOUND => Ok(false),
        other => Err(Error::SyncCheck {
            url: url.to_string(),
            message: format!("unexpected status {}", other),
        }),
    }
}
