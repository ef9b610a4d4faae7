//! REST client for the HBDM contract API
//!
//! Base URL: https://api.hbdm.com/api/v1
//!
//! # Public Endpoints (no auth required)
//! - GET contract_index - Index price for a symbol
//!
//! # Private Endpoints (signed, POST with JSON body)
//! - contract_account_info / contract_position_info
//! - contract_order / contract_cancel / contract_cancelall
//! - contract_order_info / contract_openorders / contract_hisorders
//!
//! Signed requests carry `AccessKeyId`, `SignatureMethod`,
//! `SignatureVersion`, `Timestamp` and `Signature` in the query string.
//!
//! # Source
//! - REST: https://huobiapi.github.io/docs/dm/v1/en/#restful-market-data-interface
//! - Signing: https://huobiapi.github.io/docs/dm/v1/en/#signature-authentication

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::httpws::auth::{create_signature, sorted_query, ApiCredentials};
use crate::httpws::nonce::NonceStore;
use crate::types::{
    AccountInfoResponse, CancelAllOrdersResponse, CancelOrderResponse, ContractIndexResponse,
    ContractOrderRequest, ContractOrderResponse, ContractPositionResponse, HistoryOrdersQuery,
    OrderInfoResponse, OrdersResponse,
};
use crate::REST_API_BASE;

/// Request timeout unless overridden with [`RestClient::with_timeout`]
pub const DEFAULT_REST_TIMEOUT: Duration = Duration::from_secs(30);

/// REST client for the contract API
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    credentials: Option<ApiCredentials>,
    nonce: Arc<NonceStore>,
    debug: bool,
}

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder().timeout(timeout).build().context("Failed to build HTTP client")
}

impl RestClient {
    /// Create a new REST client with default base URL
    pub fn new() -> Result<Self> {
        Self::with_base_url(REST_API_BASE)
    }

    /// Create a new REST client with custom base URL
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: build_client(DEFAULT_REST_TIMEOUT)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: None,
            nonce: Arc::new(NonceStore::default()),
            debug: false,
        })
    }

    /// Replace the HTTP client with one using `timeout` per request
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = build_client(timeout)?;
        Ok(self)
    }

    /// Use a caller-built HTTP client (proxies, TLS settings, timeouts)
    #[must_use]
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Log every request and raw response body at `debug`
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Attach credentials for the private endpoints
    #[must_use]
    pub fn with_credentials(mut self, credentials: ApiCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Use `store` for client order ids instead of `data/nonce`
    #[must_use]
    pub fn with_nonce_store(mut self, store: NonceStore) -> Self {
        self.nonce = Arc::new(store);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Host and request path the signature covers for `resource`
    fn signing_target(&self, resource: &str) -> Result<(String, String)> {
        let url = url::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid base URL {}", self.base_url))?;
        let host = url.host_str().context("Base URL has no host")?.to_string();
        let path = format!("{}/{}", url.path().trim_end_matches('/'), resource);
        Ok((host, path))
    }

    /// Signed query string for `method` + `resource`
    fn signed_query(&self, method: &Method, resource: &str) -> Result<String> {
        let credentials = self
            .credentials
            .as_ref()
            .filter(|c| c.is_valid())
            .with_context(|| format!("API credentials required for {}", resource))?;

        let (host, path) = self.signing_target(resource)?;
        let mut params = credentials.signing_params(Utc::now());
        let signature =
            create_signature(&params, method.as_str(), &host, &path, &credentials.secret_key);
        params.insert("Signature".to_string(), signature);

        Ok(sorted_query(&params))
    }

    /// Send one request and decode the response
    ///
    /// GET sends `payload` as query parameters, POST as a JSON body.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        resource: &str,
        payload: Map<String, Value>,
        signed: bool,
    ) -> Result<T> {
        let mut url = format!("{}/{}", self.base_url, resource);
        if signed {
            url = format!("{}?{}", url, self.signed_query(&method, resource)?);
        }
        if self.debug {
            debug!("{} {} payload {}", method, url, serde_json::Value::Object(payload.clone()));
        } else {
            debug!("{} {}", method, resource);
        }

        let mut builder =
            self.client.request(method.clone(), &url).header("Accept", "application/json");
        builder = if method == Method::GET {
            let query: Vec<(String, String)> =
                payload.into_iter().map(|(k, v)| (k, query_value(v))).collect();
            builder.query(&query)
        } else {
            builder.json(&payload)
        };

        let response = builder.send().await.context("HTTP request failed")?;

        let status = response.status();
        let body = response.text().await.context("Failed to read response body")?;
        if self.debug {
            debug!("{} {} -> {}: {}", method, resource, status, body);
        }
        if !status.is_success() && status != StatusCode::UNAUTHORIZED {
            anyhow::bail!("HTTP {} for {}: {}", status, resource, body);
        }

        let json: Value = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse JSON from {}", resource))?;
        check_api_error(&json)?;

        serde_json::from_value(json).with_context(|| format!("Unexpected {} response", resource))
    }

    /// Index price for a symbol
    ///
    /// Endpoint: GET contract_index?symbol={symbol}
    pub async fn contract_index(&self, symbol: &str) -> Result<ContractIndexResponse> {
        let payload = object(json!({ "symbol": symbol }));
        self.request(Method::GET, "contract_index", payload, false).await
    }

    /// Margin account for one symbol, or all when `None`
    ///
    /// Endpoint: POST contract_account_info
    pub async fn account_info(&self, symbol: Option<&str>) -> Result<AccountInfoResponse> {
        let mut payload = Map::new();
        insert_opt(&mut payload, "symbol", symbol);
        self.request(Method::POST, "contract_account_info", payload, true).await
    }

    /// Open positions for one symbol, or all when `None`
    ///
    /// Endpoint: POST contract_position_info
    pub async fn position_info(&self, symbol: Option<&str>) -> Result<ContractPositionResponse> {
        let mut payload = Map::new();
        insert_opt(&mut payload, "symbol", symbol);
        self.request(Method::POST, "contract_position_info", payload, true).await
    }

    /// Place an order; `client_order_id` is drawn from the nonce store
    ///
    /// Endpoint: POST contract_order
    pub async fn place_order(&self, order: &ContractOrderRequest) -> Result<ContractOrderResponse> {
        let client_order_id = self.nonce.next().await.context("Failed to allocate client_order_id")?;

        let mut payload = object(serde_json::to_value(order).context("Failed to encode order")?);
        payload.insert("client_order_id".to_string(), json!(client_order_id));

        info!(
            "Placing {} {} {} x{} @ {} (client_order_id {})",
            order.direction, order.offset, order.symbol, order.volume, order.price, client_order_id
        );
        self.request(Method::POST, "contract_order", payload, true).await
    }

    /// Cancel by exchange order id and/or client order id (comma separated lists allowed)
    ///
    /// Endpoint: POST contract_cancel
    pub async fn cancel_order(
        &self,
        symbol: &str,
        order_id: Option<&str>,
        client_order_id: Option<&str>,
    ) -> Result<CancelOrderResponse> {
        if order_id.is_none() && client_order_id.is_none() {
            anyhow::bail!("cancel_order needs order_id or client_order_id");
        }

        let mut payload = object(json!({ "symbol": symbol }));
        insert_opt(&mut payload, "order_id", order_id);
        insert_opt(&mut payload, "client_order_id", client_order_id);
        self.request(Method::POST, "contract_cancel", payload, true).await
    }

    /// Cancel every open order for a symbol
    ///
    /// Endpoint: POST contract_cancelall
    pub async fn cancel_all_orders(&self, symbol: &str) -> Result<CancelAllOrdersResponse> {
        let payload = object(json!({ "symbol": symbol }));
        self.request(Method::POST, "contract_cancelall", payload, true).await
    }

    /// Endpoint: POST contract_order_info
    pub async fn order_info(
        &self,
        order_id: Option<&str>,
        client_order_id: Option<&str>,
        symbol: Option<&str>,
    ) -> Result<OrderInfoResponse> {
        let mut payload = Map::new();
        insert_opt(&mut payload, "order_id", order_id);
        insert_opt(&mut payload, "client_order_id", client_order_id);
        insert_opt(&mut payload, "symbol", symbol);
        self.request(Method::POST, "contract_order_info", payload, true).await
    }

    /// Endpoint: POST contract_openorders
    pub async fn open_orders(
        &self,
        symbol: Option<&str>,
        page_index: Option<u32>,
        page_size: Option<u32>,
    ) -> Result<OrdersResponse> {
        let mut payload = Map::new();
        insert_opt(&mut payload, "symbol", symbol);
        insert_opt(&mut payload, "page_index", page_index);
        insert_opt(&mut payload, "page_size", page_size);
        self.request(Method::POST, "contract_openorders", payload, true).await
    }

    /// Endpoint: POST contract_hisorders
    pub async fn history_orders(&self, query: &HistoryOrdersQuery) -> Result<OrdersResponse> {
        let payload = object(serde_json::to_value(query).context("Failed to encode query")?);
        self.request(Method::POST, "contract_hisorders", payload, true).await
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn insert_opt<V: Into<Value>>(payload: &mut Map<String, Value>, key: &str, value: Option<V>) {
    if let Some(value) = value {
        payload.insert(key.to_string(), value.into());
    }
}

fn query_value(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Error envelope: `err_code` + `err_msg`, or `status: "error"`
fn check_api_error(json: &Value) -> Result<()> {
    if let (Some(code), Some(msg)) = (json.get("err_code"), json.get("err_msg")) {
        anyhow::bail!("API error {}: {}", code, query_value(msg.clone()));
    }

    if json.get("status").and_then(Value::as_str) == Some("error") {
        anyhow::bail!("API returned status error: {}", json);
    }

    Ok(())
}
