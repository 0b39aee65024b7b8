use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config;
use crate::model::{ItemDetail, RemoteWishlistItem};
use crate::steam::model::{AppDetailsEnvelope, WishlistResp};

pub mod model;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote wishlist unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of the remote catalog. Calls are single-attempt; pacing and
/// retries are the caller's business.
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// Items on the user's wishlist, in the order the remote returned them.
    async fn fetch_wishlist(&self, steam_id: &str) -> Result<Vec<RemoteWishlistItem>, RemoteError>;

    /// Catalog detail for one item; `Ok(None)` when the remote has nothing usable.
    async fn fetch_item_detail(&self, item_id: &str) -> Result<Option<ItemDetail>, RemoteError>;
}

#[derive(Clone)]
pub struct SteamClient {
    http: Client,
    api_base: Url,
    store_base: Url,
    api_key: String,
}

impl fmt::Debug for SteamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SteamClient")
            .field("api_base", &self.api_base)
            .field("store_base", &self.store_base)
            .finish_non_exhaustive()
    }
}

impl SteamClient {
    pub fn from_config(cfg: &config::Steam) -> Result<Self> {
        let api_base = Url::parse(&cfg.api_base).context("invalid steam.api_base")?;
        let store_base = Url::parse(&cfg.store_base).context("invalid steam.store_base")?;
        Self::new(cfg.api_key.clone(), api_base, store_base)
    }

    pub fn new(api_key: String, api_base: Url, store_base: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent("wishlist-sync/0.1")
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            api_base,
            store_base,
            api_key,
        })
    }

    pub fn build_wishlist_request(&self, steam_id: &str) -> Result<reqwest::Request> {
        let endpoint = self
            .api_base
            .join("IWishlistService/GetWishlist/v1/")
            .context("invalid Steam API base URL")?;
        self.http
            .get(endpoint)
            .query(&[("steamid", steam_id), ("key", self.api_key.as_str())])
            .build()
            .context("failed to build wishlist request")
    }

    pub fn build_app_details_request(&self, app_id: &str) -> Result<reqwest::Request> {
        let endpoint = self
            .store_base
            .join("api/appdetails")
            .context("invalid Steam store base URL")?;
        self.http
            .get(endpoint)
            .query(&[("appids", app_id)])
            .build()
            .context("failed to build appdetails request")
    }

    async fn get_text(&self, request: reqwest::Request) -> Result<String> {
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach Steam")?;
        let status = res.status();
        let body = res.text().await.context("failed to read Steam response")?;
        if !status.is_success() {
            anyhow::bail!("steam error {}: {}", status, truncate(&body, 200));
        }
        Ok(body)
    }
}

#[async_trait]
impl RemoteCatalog for SteamClient {
    async fn fetch_wishlist(&self, steam_id: &str) -> Result<Vec<RemoteWishlistItem>, RemoteError> {
        let request = self
            .build_wishlist_request(steam_id)
            .map_err(|e| RemoteError::Unavailable(format!("{e:#}")))?;
        let body = self.get_text(request).await.map_err(|e| {
            warn!(error = %format!("{e:#}"), "wishlist request failed");
            RemoteError::Unavailable(format!("{e:#}"))
        })?;
        parse_wishlist(&body)
    }

    async fn fetch_item_detail(&self, item_id: &str) -> Result<Option<ItemDetail>, RemoteError> {
        let request = match self.build_app_details_request(item_id) {
            Ok(request) => request,
            Err(err) => {
                warn!(item_id, error = %format!("{err:#}"), "cannot build appdetails request");
                return Ok(None);
            }
        };
        match self.get_text(request).await {
            Ok(body) => Ok(parse_app_details(item_id, &body)),
            Err(err) => {
                warn!(item_id, error = %format!("{err:#}"), "appdetails request failed");
                Ok(None)
            }
        }
    }
}

/// Decode a wishlist body into items, keeping the remote's ordering.
pub fn parse_wishlist(body: &str) -> Result<Vec<RemoteWishlistItem>, RemoteError> {
    let resp: WishlistResp = serde_json::from_str(body)
        .map_err(|e| RemoteError::Unavailable(format!("invalid wishlist JSON: {e}")))?;
    let items = match resp {
        WishlistResp::Items { response } => response
            .items
            .into_iter()
            .map(|item| RemoteWishlistItem {
                item_id: item.appid.to_string(),
                added_at: item.date_added,
            })
            .collect(),
        WishlistResp::Keyed { wishlist } => wishlist
            .into_iter()
            .map(|(item_id, item)| RemoteWishlistItem {
                item_id,
                added_at: item.date_added,
            })
            .collect(),
    };
    Ok(items)
}

/// Decode an `appdetails` body. `success: false`, a missing `data` block or an
/// unexpected shape all mean the item is not available.
pub fn parse_app_details(app_id: &str, body: &str) -> Option<ItemDetail> {
    let mut parsed: HashMap<String, AppDetailsEnvelope> = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!(app_id, %err, "unexpected appdetails payload");
            return None;
        }
    };
    let envelope = parsed.remove(app_id)?;
    if !envelope.success {
        return None;
    }
    let data = envelope.data?;
    Some(ItemDetail {
        title: data.name,
        image_url: data.header_image.filter(|s| !s.is_empty()),
        price_formatted: data
            .price_overview
            .and_then(|p| p.final_formatted)
            .filter(|s| !s.is_empty()),
        release_date: data
            .release_date
            .and_then(|r| r.date)
            .filter(|s| !s.is_empty()),
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
