mod utils;

use reqwest::Client;
use serde_json::{Value, json};
use utils::{USER, delete_json, get_json, post_json, put_json, wait_for};
use webhook_platform::outbound::webhook::hmac_signer::{parse_signature_header, verify};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Setup {
    addr: String,
    client: Client,
    receiver: MockServer,
    secret: String,
    endpoint_id: String,
    event_id: String,
}

/// Server with one endpoint pointing at a receiver answering `status`, subscribed to `order.created`.
async fn setup(status: u16) -> Setup {
    let addr = utils::spawn_server().await;
    let client = Client::new();

    let receiver = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(status).set_body_string("received"))
        .mount(&receiver)
        .await;

    let (code, endpoint) = post_json(
        &client,
        &format!("{addr}/api/endpoints"),
        USER,
        json!({"name": "orders", "url": format!("{}/hook", receiver.uri())}),
    )
    .await;
    assert_eq!(code, 201);
    let endpoint_id = endpoint["id"].as_str().unwrap().to_string();
    let secret = endpoint["secret"].as_str().unwrap().to_string();
    assert_eq!(secret.len(), 64);

    let (code, event) = post_json(
        &client,
        &format!("{addr}/api/events"),
        USER,
        json!({"name": "order.created", "endpoint_ids": [endpoint["id"]]}),
    )
    .await;
    assert_eq!(code, 201);
    assert_eq!(event["endpoint_ids"].as_array().unwrap().len(), 1);
    let event_id = event["id"].as_str().unwrap().to_string();

    Setup {
        addr,
        client,
        receiver,
        secret,
        endpoint_id,
        event_id,
    }
}

async fn trigger(s: &Setup, body: Value) -> (u16, Value) {
    post_json(
        &s.client,
        &format!("{}/api/webhooks/trigger/order.created", s.addr),
        USER,
        body,
    )
    .await
}

#[tokio::test]
async fn test_missing_user_header_is_unauthorized() {
    let addr = utils::spawn_server().await;
    let response = Client::new()
        .get(format!("{addr}/api/endpoints"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Unauthenticated");
}

#[tokio::test]
async fn test_trigger_delivers_signed_webhook() {
    let s = setup(200).await;

    let (code, body) = trigger(&s, json!({"payload": {"id": 42}})).await;
    assert_eq!(code, 200);
    assert_eq!(body["message"], "Webhook event triggered successfully");
    assert_eq!(body["event"], "order.created");
    assert_eq!(body["deliveries_created"], 1);
    assert_eq!(body["deliveries"][0]["status"], "pending");

    let id = body["deliveries"][0]["id"].as_str().unwrap().to_string();
    let url = format!("{}/api/deliveries/{id}", s.addr);
    let delivery = wait_for(&s.client, &url, USER, |d| d["status"] == "success").await;

    assert_eq!(delivery["status"], "success");
    assert_eq!(delivery["attempt_count"], 1);
    assert_eq!(delivery["response_code"], 200);
    assert_eq!(delivery["response_body"], "received");
    assert!(delivery["delivered_at"].is_string());
    assert_eq!(delivery["event"]["name"], "order.created");

    let requests = s.receiver.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.headers.get("x-webhook-event").unwrap(), "order.created");
    assert_eq!(request.headers.get("x-webhook-delivery").unwrap(), id.as_str());
    assert_eq!(
        request.headers.get("user-agent").unwrap(),
        "Webhook-Management-Platform/1.0"
    );

    let header = request.headers.get("x-webhook-signature").unwrap().to_str().unwrap();
    let signature = parse_signature_header(header).unwrap();
    assert!(verify(&request.body, s.secret.as_bytes(), &signature));
    assert_eq!(serde_json::from_slice::<Value>(&request.body).unwrap(), json!({"id": 42}));

    let (_, stats) = get_json(&s.client, &format!("{}/api/deliveries/stats", s.addr), USER).await;
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["successful"], 1);
    assert_eq!(stats["success_rate"], 100.0);
}

#[tokio::test]
async fn test_failed_attempt_is_retry_eligible() {
    let s = setup(500).await;

    let (_, body) = trigger(&s, json!({"payload": {"id": 1}})).await;
    let id = body["deliveries"][0]["id"].as_str().unwrap().to_string();
    let url = format!("{}/api/deliveries/{id}", s.addr);

    let delivery = wait_for(&s.client, &url, USER, |d| d["status"] == "failed").await;
    assert_eq!(delivery["attempt_count"], 1);
    assert_eq!(delivery["response_code"], 500);
    assert!(delivery["next_retry_at"].is_string());

    let (code, retried) = post_json(&s.client, &format!("{url}/retry"), USER, json!({})).await;
    assert_eq!(code, 200);
    assert_eq!(retried["message"], "Delivery retry initiated");

    let delivery = wait_for(&s.client, &url, USER, |d| d["attempt_count"] == 2).await;
    assert_eq!(delivery["attempt_count"], 2);
}

#[tokio::test]
async fn test_trigger_validation_and_lookup_errors() {
    let s = setup(200).await;

    let (code, _) = trigger(&s, json!({"data": {}})).await;
    assert_eq!(code, 422);

    let (code, _) = trigger(&s, json!({"payload": [1, 2]})).await;
    assert_eq!(code, 422);

    let (code, body) = post_json(
        &s.client,
        &format!("{}/api/webhooks/trigger/unknown.event", s.addr),
        USER,
        json!({"payload": {}}),
    )
    .await;
    assert_eq!(code, 404);
    assert_eq!(body["message"], "Event not found");

    // Events are scoped to their owner.
    let (code, _) = post_json(
        &s.client,
        &format!("{}/api/webhooks/trigger/order.created", s.addr),
        "user-2",
        json!({"payload": {}}),
    )
    .await;
    assert_eq!(code, 404);
}

#[tokio::test]
async fn test_event_without_active_endpoints() {
    let addr = utils::spawn_server().await;
    let client = Client::new();

    let (code, _) = post_json(
        &client,
        &format!("{addr}/api/events"),
        USER,
        json!({"name": "user.deleted"}),
    )
    .await;
    assert_eq!(code, 201);

    let (code, body) = post_json(
        &client,
        &format!("{addr}/api/webhooks/trigger/user.deleted"),
        USER,
        json!({"payload": {"id": 1}}),
    )
    .await;
    assert_eq!(code, 200);
    assert_eq!(body["deliveries_created"], 0);
    assert_eq!(body["message"], "No active endpoints configured for this event");
}

#[tokio::test]
async fn test_duplicate_event_name_is_rejected() {
    let s = setup(200).await;

    let (code, body) = post_json(
        &s.client,
        &format!("{}/api/events", s.addr),
        USER,
        json!({"name": "order.created"}),
    )
    .await;
    assert_eq!(code, 422);
    assert_eq!(body["message"], "The name has already been taken.");
}

#[tokio::test]
async fn test_invalid_endpoint_url_is_rejected() {
    let addr = utils::spawn_server().await;

    let (code, _) = post_json(
        &Client::new(),
        &format!("{addr}/api/endpoints"),
        USER,
        json!({"name": "bad", "url": "not a url"}),
    )
    .await;
    assert_eq!(code, 422);
}

#[tokio::test]
async fn test_delivery_access_rules() {
    let s = setup(200).await;

    let (_, body) = trigger(&s, json!({"payload": {"id": 7}})).await;
    let id = body["deliveries"][0]["id"].as_str().unwrap().to_string();
    let url = format!("{}/api/deliveries/{id}", s.addr);
    wait_for(&s.client, &url, USER, |d| d["status"] == "success").await;

    let (code, _) = get_json(&s.client, &url, "intruder").await;
    assert_eq!(code, 403);

    let (code, body) = post_json(&s.client, &format!("{url}/retry"), "intruder", json!({})).await;
    assert_eq!(code, 403);
    assert_eq!(body["message"], "Forbidden");

    let (code, body) = post_json(&s.client, &format!("{url}/retry"), USER, json!({})).await;
    assert_eq!(code, 400);
    assert_eq!(body["message"], "Only failed deliveries can be retried");

    let (code, _) = get_json(&s.client, &format!("{}/api/deliveries/nope", s.addr), USER).await;
    assert_eq!(code, 404);
}

#[tokio::test]
async fn test_delivery_listing_filters() {
    let s = setup(200).await;

    for i in 0..3 {
        trigger(&s, json!({"payload": {"id": i}})).await;
    }

    let list_url = format!("{}/api/deliveries?status=success", s.addr);
    let page = wait_for(&s.client, &list_url, USER, |p| p["total"] == 3).await;
    assert_eq!(page["total"], 3);
    assert_eq!(page["per_page"], 20);
    assert_eq!(page["current_page"], 1);
    assert_eq!(page["data"].as_array().unwrap().len(), 3);

    let (_, pending) = get_json(
        &s.client,
        &format!("{}/api/deliveries?status=pending", s.addr),
        USER,
    )
    .await;
    assert_eq!(pending["total"], 0);

    let (_, other) = get_json(&s.client, &format!("{}/api/deliveries", s.addr), "user-2").await;
    assert_eq!(other["total"], 0);

    let (code, _) = get_json(
        &s.client,
        &format!("{}/api/deliveries?status=bogus", s.addr),
        USER,
    )
    .await;
    assert_eq!(code, 422);
}

#[tokio::test]
async fn test_out_of_range_page_is_empty() {
    let s = setup(200).await;
    trigger(&s, json!({"payload": {"id": 1}})).await;

    let (code, page) = get_json(
        &s.client,
        &format!("{}/api/deliveries?page={}", s.addr, usize::MAX),
        USER,
    )
    .await;
    assert_eq!(code, 200);
    assert_eq!(page["total"], 1);
    assert!(page["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_delivery_listing_date_range() {
    let s = setup(200).await;
    for i in 0..2 {
        trigger(&s, json!({"payload": {"id": i}})).await;
    }

    let today = time::OffsetDateTime::now_utc().date();
    let tomorrow = today.next_day().unwrap();
    let yesterday = today.previous_day().unwrap();
    let list = |query: String| format!("{}/api/deliveries?{query}", s.addr);

    let (_, page) = get_json(&s.client, &list(format!("from_date={yesterday}&to_date={today}")), USER).await;
    assert_eq!(page["total"], 2);

    let (_, page) = get_json(&s.client, &list(format!("from_date={tomorrow}")), USER).await;
    assert_eq!(page["total"], 0);

    let (_, page) = get_json(&s.client, &list(format!("to_date={yesterday}")), USER).await;
    assert_eq!(page["total"], 0);

    let (code, body) = get_json(&s.client, &list("from_date=yesterday".to_string()), USER).await;
    assert_eq!(code, 422);
    assert_eq!(body["message"], "The from date is not a valid date.");
}

#[tokio::test]
async fn test_endpoint_show_update_and_delete() {
    let s = setup(200).await;
    let url = format!("{}/api/endpoints/{}", s.addr, s.endpoint_id);

    let (code, endpoint) = get_json(&s.client, &url, USER).await;
    assert_eq!(code, 200);
    assert_eq!(endpoint["name"], "orders");
    assert_eq!(endpoint["events"][0]["name"], "order.created");
    assert!(endpoint.get("secret").is_none());

    let (code, _) = get_json(&s.client, &url, "intruder").await;
    assert_eq!(code, 403);
    let (code, _) = put_json(&s.client, &url, "intruder", json!({"is_active": false})).await;
    assert_eq!(code, 403);
    let (code, _) = delete_json(&s.client, &url, "intruder").await;
    assert_eq!(code, 403);

    let (code, _) = put_json(&s.client, &url, USER, json!({"url": "ftp://nope"})).await;
    assert_eq!(code, 422);

    // Deactivated endpoints drop out of the fanout.
    let (code, updated) = put_json(&s.client, &url, USER, json!({"is_active": false})).await;
    assert_eq!(code, 200);
    assert_eq!(updated["active"], false);
    assert_eq!(updated["name"], "orders");

    let (_, body) = trigger(&s, json!({"payload": {"id": 1}})).await;
    assert_eq!(body["deliveries_created"], 0);

    put_json(&s.client, &url, USER, json!({"is_active": true})).await;
    let (_, body) = trigger(&s, json!({"payload": {"id": 2}})).await;
    assert_eq!(body["deliveries_created"], 1);

    let (code, body) = delete_json(&s.client, &url, USER).await;
    assert_eq!(code, 200);
    assert_eq!(body["message"], "Endpoint deleted successfully");

    let (code, _) = get_json(&s.client, &url, USER).await;
    assert_eq!(code, 404);
    let (_, page) = get_json(&s.client, &format!("{}/api/deliveries", s.addr), USER).await;
    assert_eq!(page["total"], 0);
    let (_, event) = get_json(&s.client, &format!("{}/api/events/{}", s.addr, s.event_id), USER).await;
    assert!(event["endpoint_ids"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_event_show_update_and_delete() {
    let s = setup(200).await;
    let url = format!("{}/api/events/{}", s.addr, s.event_id);

    let (_, body) = trigger(&s, json!({"payload": {"id": 1}})).await;
    let delivery_id = body["deliveries"][0]["id"].as_str().unwrap().to_string();

    let (code, event) = get_json(&s.client, &url, USER).await;
    assert_eq!(code, 200);
    assert_eq!(event["endpoints"][0]["id"], s.endpoint_id.as_str());
    assert_eq!(event["deliveries"][0]["id"], delivery_id.as_str());

    let (code, _) = get_json(&s.client, &url, "intruder").await;
    assert_eq!(code, 403);
    let (code, _) = get_json(&s.client, &format!("{}/api/events/not-an-id", s.addr), USER).await;
    assert_eq!(code, 404);

    post_json(
        &s.client,
        &format!("{}/api/events", s.addr),
        USER,
        json!({"name": "order.updated"}),
    )
    .await;
    let (code, body) = put_json(&s.client, &url, USER, json!({"name": "order.updated"})).await;
    assert_eq!(code, 422);
    assert_eq!(body["message"], "The name has already been taken.");

    // Clearing the subscriptions empties the fanout.
    let (code, updated) = put_json(
        &s.client,
        &url,
        USER,
        json!({"description": "orders", "endpoint_ids": []}),
    )
    .await;
    assert_eq!(code, 200);
    assert_eq!(updated["description"], "orders");
    assert!(updated["endpoint_ids"].as_array().unwrap().is_empty());

    let (_, body) = trigger(&s, json!({"payload": {"id": 2}})).await;
    assert_eq!(body["deliveries_created"], 0);

    let (code, body) = delete_json(&s.client, &url, USER).await;
    assert_eq!(code, 200);
    assert_eq!(body["message"], "Event deleted successfully");

    let (code, _) = get_json(
        &s.client,
        &format!("{}/api/deliveries/{delivery_id}", s.addr),
        USER,
    )
    .await;
    assert_eq!(code, 404);
    let (_, body) = trigger(&s, json!({"payload": {"id": 3}})).await;
    assert_eq!(body["message"], "Event not found");
}
