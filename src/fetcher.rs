use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Config, HTTP_TIMEOUT_SECS, TOKEN_REFRESH_MARGIN_SECS};
use crate::error::FetchError;
use crate::types::{RawListing, Realm, SourceVersion, TimeLeft};

/// Remote market source: a cheap version probe and the full listing dump.
#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Ask the source which data version it currently publishes for `realm`.
    async fn probe(&self, realm: &Realm) -> Result<SourceVersion, FetchError>;

    /// Download and decode the dump at `dump_url`.
    async fn fetch(&self, realm: &Realm, dump_url: &str) -> Result<Vec<RawListing>, FetchError>;
}

// ---------------------------------------------------------------------------
// BlizzardSource
// ---------------------------------------------------------------------------

struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

/// Auction data source backed by the game data REST API, authenticated with
/// the OAuth client-credentials flow. One instance is shared by every worker;
/// the token is fetched once and reused until shortly before it expires.
pub struct BlizzardSource {
    client: reqwest::Client,
    api_base_url: String,
    oauth_url: String,
    client_id: String,
    client_secret: String,
    locale: String,
    /// Set when raw dumps should be kept on disk.
    spool_dir: Option<PathBuf>,
    token: Mutex<Option<CachedToken>>,
}

impl BlizzardSource {
    pub fn new(cfg: &Config) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_base_url: cfg.api_base_url.trim_end_matches('/').to_string(),
            oauth_url: cfg.oauth_url.clone(),
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            locale: cfg.locale.clone(),
            spool_dir: cfg.keep_raw_dumps.then(|| cfg.temp_dir.clone()),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, FetchError> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.access_token.clone());
            }
        }

        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(FetchError::Auth("CLIENT_ID / CLIENT_SECRET not configured".to_string()));
        }

        let resp = self
            .client
            .post(&self.oauth_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(FetchError::Auth(format!(
                "token endpoint returned {}",
                resp.status()
            )));
        }

        let body: TokenResponse = resp.json().await?;
        let lifetime = body.expires_in.saturating_sub(TOKEN_REFRESH_MARGIN_SECS);
        info!(expires_in = body.expires_in, "OAuth token acquired");

        *guard = Some(CachedToken {
            access_token: body.access_token.clone(),
            refresh_at: Instant::now() + Duration::from_secs(lifetime),
        });
        Ok(body.access_token)
    }

    async fn spool(&self, realm: &Realm, body: &[u8]) {
        let Some(dir) = &self.spool_dir else { return };
        let path = dir.join(format!("{}-{}.json", realm.slug, realm.last_check));
        if let Err(e) = tokio::fs::write(&path, body).await {
            warn!(realm = %realm.slug, "Could not spool raw dump to {}: {e}", path.display());
        } else {
            debug!(realm = %realm.slug, "Raw dump spooled to {}", path.display());
        }
    }
}

#[async_trait]
impl MarketSource for BlizzardSource {
    async fn probe(&self, realm: &Realm) -> Result<SourceVersion, FetchError> {
        let token = self.access_token().await?;
        let url = format!("{}/wow/auction/data/{}", self.api_base_url, realm.slug);

        let resp = self
            .client
            .get(&url)
            .query(&[("locale", self.locale.as_str())])
            .bearer_auth(token)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(FetchError::Status {
                status: resp.status().as_u16(),
                url,
            });
        }

        let body: serde_json::Value = serde_json::from_slice(&resp.bytes().await?)?;
        parse_probe(&body)
    }

    async fn fetch(&self, realm: &Realm, dump_url: &str) -> Result<Vec<RawListing>, FetchError> {
        let resp = self.client.get(dump_url).send().await?;
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                status: resp.status().as_u16(),
                url: dump_url.to_string(),
            });
        }

        let body = resp.bytes().await?;
        self.spool(realm, &body).await;

        let listings = parse_dump(&body)?;
        debug!(realm = %realm.slug, listings = listings.len(), bytes = body.len(), "Dump decoded");
        Ok(listings)
    }
}

// ---------------------------------------------------------------------------
// Payload decoding
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Deserialize)]
struct DumpPayload {
    auctions: Vec<DumpAuction>,
}

#[derive(Deserialize)]
struct DumpAuction {
    auc: u64,
    item: u32,
    #[serde(default)]
    owner: String,
    #[serde(default)]
    buyout: u64,
    quantity: u32,
    #[serde(rename = "timeLeft")]
    time_left: String,
}

/// Read `files[0]` of a metadata response: `lastModified` is epoch
/// milliseconds and is coarsened to whole seconds.
pub fn parse_probe(v: &serde_json::Value) -> Result<SourceVersion, FetchError> {
    let file = v
        .get("files")
        .and_then(|f| f.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| FetchError::Malformed("metadata has no files[0]".to_string()))?;

    let last_modified_ms = file
        .get("lastModified")
        .and_then(|x| x.as_i64().or_else(|| x.as_str().and_then(|s| s.parse().ok())))
        .ok_or_else(|| FetchError::Malformed("metadata has no lastModified".to_string()))?;

    let dump_url = file
        .get("url")
        .and_then(|u| u.as_str())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| FetchError::Malformed("metadata has no url".to_string()))?
        .to_string();

    Ok(SourceVersion {
        last_modified: last_modified_ms / 1000,
        dump_url,
    })
}

/// Decode a listing dump. Bid-only listings (no buyout) and empty stacks carry
/// no unit price and are dropped; an unknown time-left label means the format
/// changed under us and fails the whole dump.
pub fn parse_dump(body: &[u8]) -> Result<Vec<RawListing>, FetchError> {
    let payload: DumpPayload = serde_json::from_slice(body)?;

    let mut listings = Vec::with_capacity(payload.auctions.len());
    let mut dropped = 0usize;
    for a in payload.auctions {
        let time_left = TimeLeft::parse(&a.time_left)
            .ok_or_else(|| FetchError::Malformed(format!("unknown timeLeft {:?}", a.time_left)))?;
        if a.buyout == 0 || a.quantity == 0 {
            dropped += 1;
            continue;
        }
        listings.push(RawListing {
            listing_id: a.auc,
            item_id: a.item,
            owner: a.owner,
            buyout_total: a.buyout,
            stack_size: a.quantity,
            time_left,
        });
    }

    if dropped > 0 {
        debug!(dropped, "Dropped listings without buyout or quantity");
    }
    Ok(listings)
}
