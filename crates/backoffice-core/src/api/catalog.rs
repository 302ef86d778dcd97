//! Product and menu CRUD calls.
//!
//! Every call goes through the session coordinator, so expired access tokens
//! are refreshed transparently.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use super::transport::ApiRequest;
use super::ApiError;
use crate::models::{Menu, Product};
use crate::session::SessionCoordinator;

const PRODUCTS_PATH: &str = "/products";
const MENUS_PATH: &str = "/menus";

/// Typed access to the catalog endpoints.
/// Clone is cheap - the coordinator is shared.
#[derive(Clone)]
pub struct CatalogApi {
    session: Arc<SessionCoordinator>,
}

impl CatalogApi {
    pub fn new(session: Arc<SessionCoordinator>) -> Self {
        Self { session }
    }

    async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let response = self.session.execute(request).await?.error_for_status()?;
        response.data()
    }

    async fn send(&self, request: ApiRequest) -> Result<(), ApiError> {
        self.session.execute(request).await?.error_for_status()?;
        Ok(())
    }

    // ===== Products =====

    pub async fn list_products(&self) -> Result<Vec<Product>, ApiError> {
        let products: Vec<Product> = self.fetch(ApiRequest::get(PRODUCTS_PATH)).await?;
        debug!(count = products.len(), "Fetched products");
        Ok(products)
    }

    pub async fn get_product(&self, id: i64) -> Result<Product, ApiError> {
        self.fetch(ApiRequest::get(format!("{}/{}", PRODUCTS_PATH, id)))
            .await
    }

    pub async fn create_product(&self, product: &Product) -> Result<Product, ApiError> {
        self.fetch(ApiRequest::post(PRODUCTS_PATH).with_body(product)?)
            .await
    }

    pub async fn update_product(&self, id: i64, product: &Product) -> Result<Product, ApiError> {
        self.fetch(ApiRequest::put(format!("{}/{}", PRODUCTS_PATH, id)).with_body(product)?)
            .await
    }

    pub async fn delete_product(&self, id: i64) -> Result<(), ApiError> {
        self.send(ApiRequest::delete(format!("{}/{}", PRODUCTS_PATH, id)))
            .await
    }

    // ===== Menus =====

    pub async fn list_menus(&self) -> Result<Vec<Menu>, ApiError> {
        let menus: Vec<Menu> = self.fetch(ApiRequest::get(MENUS_PATH)).await?;
        debug!(count = menus.len(), "Fetched menus");
        Ok(menus)
    }

    pub async fn get_menu(&self, id: i64) -> Result<Menu, ApiError> {
        self.fetch(ApiRequest::get(format!("{}/{}", MENUS_PATH, id)))
            .await
    }

    pub async fn create_menu(&self, menu: &Menu) -> Result<Menu, ApiError> {
        self.fetch(ApiRequest::post(MENUS_PATH).with_body(menu)?)
            .await
    }

    pub async fn update_menu(&self, id: i64, menu: &Menu) -> Result<Menu, ApiError> {
        self.fetch(ApiRequest::put(format!("{}/{}", MENUS_PATH, id)).with_body(menu)?)
            .await
    }

    pub async fn delete_menu(&self, id: i64) -> Result<(), ApiError> {
        self.send(ApiRequest::delete(format!("{}/{}", MENUS_PATH, id)))
            .await
    }
}
