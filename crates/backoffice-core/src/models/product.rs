use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Product {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Price in the smallest currency unit
    #[serde(rename = "priceCents")]
    pub price_cents: i64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(rename = "isAvailable", default = "default_available")]
    pub is_available: bool,
    #[serde(rename = "imageUrl", default)]
    pub image_url: Option<String>,
}

fn default_available() -> bool {
    true
}

impl Product {
    pub fn new(name: impl Into<String>, price_cents: i64) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: None,
            price_cents,
            category: None,
            is_available: true,
            image_url: None,
        }
    }

    pub fn display_price(&self) -> String {
        let sign = if self.price_cents < 0 { "-" } else { "" };
        let cents = self.price_cents.unsigned_abs();
        format!("{}{}.{:02}", sign, cents / 100, cents % 100)
    }
}
