//! A thin client for the external HTTP peer directory.
//!
//! Peer discovery and public-key lookup are explicitly out of the protocol
//! core — this crate is the narrow interface the core calls through, never
//! the other way around. The node never serves HTTP itself.

use thiserror::Error;

pub struct DirectoryClient {
    base_url: String,
    http: reqwest::Client,
}

impl DirectoryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        DirectoryClient {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    /// `PUT /peers/{name}/key`, body = 64-byte public key. Expects 204.
    pub async fn register(&self, name: &str, public_key: &[u8; 64]) -> Result<(), DirectoryError> {
        tracing::debug!(name, "registering public key with directory");
        let url = format!("{}/peers/{}/key", self.base_url, name);
        let resp = self
            .http
            .put(&url)
            .body(public_key.to_vec())
            .send()
            .await
            .map_err(DirectoryError::Transport)?;
        if resp.status().as_u16() != 204 {
            return Err(DirectoryError::UnexpectedStatus(resp.status().as_u16()));
        }
        Ok(())
    }

    /// `GET /peers/` — newline-separated names, empty lines ignored.
    pub async fn list_peers(&self) -> Result<Vec<String>, DirectoryError> {
        let url = format!("{}/peers/", self.base_url);
        let text = self.get_text(&url).await?;
        Ok(text.lines().filter(|l| !l.is_empty()).map(String::from).collect())
    }

    /// `GET /peers/{name}/key` — a 64-byte key body on 200.
    pub async fn lookup_key(&self, name: &str) -> Result<[u8; 64], DirectoryError> {
        let url = format!("{}/peers/{}/key", self.base_url, name);
        let resp = self.http.get(&url).send().await.map_err(DirectoryError::Transport)?;
        if resp.status().as_u16() != 200 {
            return Err(DirectoryError::UnexpectedStatus(resp.status().as_u16()));
        }
        let bytes = resp.bytes().await.map_err(DirectoryError::Transport)?;
        if bytes.len() != 64 {
            return Err(DirectoryError::MalformedKey(bytes.len()));
        }
        let mut key = [0u8; 64];
        key.copy_from_slice(&bytes);
        Ok(key)
    }

    /// `GET /peers/{name}/addresses` — newline-separated `ip:port` strings.
    pub async fn lookup_addresses(&self, name: &str) -> Result<Vec<String>, DirectoryError> {
        let url = format!("{}/peers/{}/addresses", self.base_url, name);
        let text = self.get_text(&url).await?;
        Ok(text.lines().filter(|l| !l.is_empty()).map(String::from).collect())
    }

    async fn get_text(&self, url: &str) -> Result<String, DirectoryError> {
        let resp = self.http.get(url).send().await.map_err(DirectoryError::Transport)?;
        if resp.status().as_u16() != 200 {
            tracing::warn!(url, status = resp.status().as_u16(), "directory request failed");
            return Err(DirectoryError::UnexpectedStatus(resp.status().as_u16()));
        }
        resp.text().await.map_err(DirectoryError::Transport)
    }
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory server request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("directory server returned unexpected status: {0}")]
    UnexpectedStatus(u16),

    #[error("public key body must be 64 bytes, got {0}")]
    MalformedKey(usize),
}
