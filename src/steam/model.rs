use serde::Deserialize;
use indexmap::IndexMap;

/// `IWishlistService/GetWishlist` body. Older deployments answered with a map
/// keyed by app id instead of an item list; both are accepted, and the keyed
/// form keeps document order.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum WishlistResp {
    Items { response: WishlistItemsBody },
    Keyed { wishlist: IndexMap<String, KeyedWishlistItem> },
}

/// Steam omits `items` entirely for an empty wishlist.
#[derive(Deserialize, Debug, Default)]
pub struct WishlistItemsBody {
    #[serde(default)]
    pub items: Vec<WishlistItemResp>,
}

#[derive(Deserialize, Debug)]
pub struct WishlistItemResp {
    pub appid: u64,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub date_added: i64,
}

#[derive(Deserialize, Debug)]
pub struct KeyedWishlistItem {
    #[serde(default)]
    pub date_added: i64,
}

/// One entry of the storefront `appdetails` response, keyed by app id.
#[derive(Deserialize, Debug)]
pub struct AppDetailsEnvelope {
    pub success: bool,
    #[serde(default)]
    pub data: Option<AppData>,
}

#[derive(Deserialize, Debug)]
pub struct AppData {
    pub name: String,
    #[serde(default)]
    pub header_image: Option<String>,
    #[serde(default)]
    pub price_overview: Option<PriceOverview>,
    #[serde(default)]
    pub release_date: Option<ReleaseDate>,
}

#[derive(Deserialize, Debug)]
pub struct PriceOverview {
    #[serde(default)]
    pub final_formatted: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ReleaseDate {
    #[serde(default)]
    pub coming_soon: bool,
    #[serde(default)]
    pub date: Option<String>,
}
