use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Menu {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Products in display order
    #[serde(rename = "productIds", default)]
    pub product_ids: Vec<i64>,
    #[serde(rename = "isActive", default)]
    pub is_active: bool,
}

impl Menu {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: None,
            product_ids: Vec::new(),
            is_active: false,
        }
    }

    pub fn display_item_count(&self) -> String {
        match self.product_ids.len() {
            1 => "1 item".to_string(),
            n => format!("{} items", n),
        }
    }
}
