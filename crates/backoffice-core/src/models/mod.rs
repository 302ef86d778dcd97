//! Data models for the catalog managed through the admin API.
//!
//! - `Product`: sellable items with price and availability
//! - `Menu`: ordered groupings of products

pub mod menu;
pub mod product;

pub use menu::Menu;
pub use product::Product;
