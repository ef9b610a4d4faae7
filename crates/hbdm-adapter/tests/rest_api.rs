use std::collections::BTreeMap;
use std::time::Duration;

use hbdm_adapter::{
    create_signature, ApiCredentials, ContractOrderRequest, HistoryOrdersQuery, NonceStore,
    RestClient,
};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> RestClient {
    RestClient::with_base_url(&format!("{}/api/v1", server.uri()))
        .unwrap()
        .with_credentials(ApiCredentials::new("test-access-key", "test-secret-key"))
}

fn temp_nonce() -> NonceStore {
    NonceStore::new(
        std::env::temp_dir().join(format!("hbdm-rest-{}", uuid::Uuid::new_v4())).join("nonce"),
    )
}

fn order() -> ContractOrderRequest {
    ContractOrderRequest {
        symbol: "BTC".to_string(),
        contract_type: "quarter".to_string(),
        contract_code: None,
        price: 3900.5,
        volume: 1,
        direction: "buy".to_string(),
        offset: "open".to_string(),
        lever_rate: 20,
        order_price_type: "limit".to_string(),
    }
}

async fn mount_ok(server: &MockServer, resource: &str, body: Value) {
    Mock::given(method("POST"))
        .and(path(format!("/api/v1/{}", resource)))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_contract_index_unwraps_single_element() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/contract_index"))
        .and(query_param("symbol", "BTC"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok", "ts": 1,
            "data": [{"symbol": "BTC", "index_price": 3800.12, "index_ts": 1490759594752i64}]
        })))
        .mount(&server)
        .await;

    let resp = RestClient::with_base_url(&format!("{}/api/v1", server.uri()))
        .unwrap()
        .contract_index("BTC")
        .await
        .unwrap();

    assert_eq!(resp.data.symbol, "BTC");
    assert_eq!(resp.data.price, 3800.12);
    assert_eq!(resp.data.ts, 1490759594752);

    // public endpoint, no signature
    let requests = server.received_requests().await.unwrap();
    assert!(!requests[0].url.query_pairs().any(|(k, _)| k == "Signature"));
}

#[tokio::test]
async fn test_private_request_is_signed() {
    let server = MockServer::start().await;
    mount_ok(
        &server,
        "contract_account_info",
        json!({"status": "ok", "ts": 1, "data": [{"symbol": "BTC", "margin_balance": 1.5}]}),
    )
    .await;

    let resp = client(&server).account_info(Some("BTC")).await.unwrap();
    assert_eq!(resp.data[0].margin_balance, 1.5);

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    let query: BTreeMap<String, String> = request.url.query_pairs().into_owned().collect();

    assert_eq!(query["AccessKeyId"], "test-access-key");
    assert_eq!(query["SignatureMethod"], "HmacSHA256");
    assert_eq!(query["SignatureVersion"], "2");

    let mut signed = query.clone();
    let signature = signed.remove("Signature").unwrap();
    let expected = create_signature(
        &signed,
        "POST",
        "127.0.0.1",
        "/api/v1/contract_account_info",
        "test-secret-key",
    );
    assert_eq!(signature, expected);

    let body: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body, json!({"symbol": "BTC"}));
}

#[tokio::test]
async fn test_place_order_uses_nonce_for_client_order_id() {
    let server = MockServer::start().await;
    mount_ok(
        &server,
        "contract_order",
        json!({"status": "ok", "ts": 1, "data": {"order_id": 633766664829804544i64, "client_order_id": 1}}),
    )
    .await;

    let client = client(&server).with_nonce_store(temp_nonce());
    let resp = client.place_order(&order()).await.unwrap();
    assert_eq!(resp.data.order_id, 633766664829804544);
    client.place_order(&order()).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let bodies: Vec<Value> =
        requests.iter().map(|r| serde_json::from_slice(&r.body).unwrap()).collect();
    assert_eq!(bodies[0]["client_order_id"], 2);
    assert_eq!(bodies[1]["client_order_id"], 3);
    assert_eq!(bodies[0]["lever_rate"], 20);
    assert!(bodies[0].get("contract_code").is_none());
}

#[tokio::test]
async fn test_error_envelope_is_error() {
    let server = MockServer::start().await;
    mount_ok(
        &server,
        "contract_cancelall",
        json!({"status": "error", "err_code": 1051, "err_msg": "No cancellable orders", "ts": 1}),
    )
    .await;

    let err = client(&server).cancel_all_orders("BTC").await.unwrap_err();
    assert!(err.to_string().contains("1051"), "got {}", err);
}

#[tokio::test]
async fn test_http_failure_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/contract_openorders"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = client(&server).open_orders(Some("BTC"), Some(1), Some(20)).await.unwrap_err();
    assert!(err.to_string().contains("HTTP 500"), "got {}", err);
}

#[tokio::test]
async fn test_unauthorized_body_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/contract_position_info"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "status": "error", "err_code": 1004, "err_msg": "Incorrect Access key", "ts": 1
        })))
        .mount(&server)
        .await;

    let err = client(&server).position_info(None).await.unwrap_err();
    assert!(err.to_string().contains("Incorrect Access key"), "got {}", err);
}

#[tokio::test]
async fn test_cancel_and_query_payloads() {
    let server = MockServer::start().await;
    mount_ok(
        &server,
        "contract_cancel",
        json!({"status": "ok", "ts": 1, "errors": [], "successes": ["123"]}),
    )
    .await;
    mount_ok(
        &server,
        "contract_order_info",
        json!({"status": "ok", "ts": 1, "data": [{"order_id": 123, "symbol": "BTC", "status": 6}]}),
    )
    .await;
    mount_ok(
        &server,
        "contract_hisorders",
        json!({"status": "ok", "ts": 1, "data": {"orders": [], "total_page": 1, "current_page": 1, "total_size": 0}}),
    )
    .await;

    let client = client(&server);

    let cancel = client.cancel_order("BTC", Some("123"), None).await.unwrap();
    assert_eq!(cancel.successes, vec!["123".to_string()]);

    let info = client.order_info(Some("123"), None, Some("BTC")).await.unwrap();
    assert_eq!(info.data[0].order_id, 123);

    let query = HistoryOrdersQuery {
        symbol: "BTC".to_string(),
        trade_type: 0,
        order_type: 1,
        status: "0".to_string(),
        create_date: 7,
        page_index: None,
        page_size: Some(50),
    };
    let history = client.history_orders(&query).await.unwrap();
    assert_eq!(history.data.total_page, Some(1));

    let requests = server.received_requests().await.unwrap();
    let bodies: Vec<Value> =
        requests.iter().map(|r| serde_json::from_slice(&r.body).unwrap()).collect();
    assert_eq!(bodies[0], json!({"symbol": "BTC", "order_id": "123"}));
    assert_eq!(bodies[1], json!({"order_id": "123", "symbol": "BTC"}));
    assert_eq!(bodies[2]["type"], 1);
    assert_eq!(bodies[2]["page_size"], 50);
    assert!(bodies[2].get("page_index").is_none());
}

#[tokio::test]
async fn test_private_call_without_credentials_fails_locally() {
    let server = MockServer::start().await;
    let client = RestClient::with_base_url(&format!("{}/api/v1", server.uri())).unwrap();

    assert!(client.account_info(None).await.is_err());
    assert!(client.cancel_order("BTC", None, None).await.is_err());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_custom_timeout_applies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/contract_index"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(500))
                .set_body_json(json!({"status": "ok", "ts": 1, "data": []})),
        )
        .mount(&server)
        .await;

    let client = RestClient::with_base_url(&format!("{}/api/v1", server.uri()))
        .unwrap()
        .with_timeout(Duration::from_millis(50))
        .unwrap();

    let err = client.contract_index("BTC").await.unwrap_err();
    assert!(err.to_string().contains("HTTP request failed"), "got {}", err);
}

#[tokio::test]
async fn test_custom_http_client_is_used() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/contract_index"))
        .and(header("x-desk", "options"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok", "ts": 1,
            "data": [{"symbol": "ETH", "index_price": 120.5, "index_ts": 1}]
        })))
        .mount(&server)
        .await;

    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert("x-desk", reqwest::header::HeaderValue::from_static("options"));
    let http = reqwest::Client::builder().default_headers(headers).build().unwrap();

    let resp = RestClient::with_base_url(&format!("{}/api/v1", server.uri()))
        .unwrap()
        .with_http_client(http)
        .with_debug(true)
        .contract_index("ETH")
        .await
        .unwrap();
    assert_eq!(resp.data.price, 120.5);
}
