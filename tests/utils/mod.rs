#![allow(dead_code)]

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use webhook_platform::{config::Config, server::Server};

pub const USER: &str = "user-1";

pub async fn spawn_server() -> String {
    let config = {
        let mut config = Config::load().unwrap();
        config.server.host = "localhost".to_string();
        config.server.port = 0;
        config
    };

    let server = Server::new(&config).await.unwrap();

    let port = server.port();
    tokio::spawn(server.run());

    format!("http://{}:{}", config.server.host, port)
}

/// POST `body` as `user`, returning status and parsed JSON.
pub async fn post_json(client: &Client, url: &str, user: &str, body: Value) -> (u16, Value) {
    let response = client
        .post(url)
        .header("X-User-Id", user)
        .json(&body)
        .send()
        .await
        .expect("Failed to execute request.");
    let status = response.status().as_u16();
    (status, response.json().await.unwrap_or(Value::Null))
}

pub async fn put_json(client: &Client, url: &str, user: &str, body: Value) -> (u16, Value) {
    let response = client
        .put(url)
        .header("X-User-Id", user)
        .json(&body)
        .send()
        .await
        .expect("Failed to execute request.");
    let status = response.status().as_u16();
    (status, response.json().await.unwrap_or(Value::Null))
}

pub async fn delete_json(client: &Client, url: &str, user: &str) -> (u16, Value) {
    let response = client
        .delete(url)
        .header("X-User-Id", user)
        .send()
        .await
        .expect("Failed to execute request.");
    let status = response.status().as_u16();
    (status, response.json().await.unwrap_or(Value::Null))
}

pub async fn get_json(client: &Client, url: &str, user: &str) -> (u16, Value) {
    let response = client
        .get(url)
        .header("X-User-Id", user)
        .send()
        .await
        .expect("Failed to execute request.");
    let status = response.status().as_u16();
    (status, response.json().await.unwrap_or(Value::Null))
}

/// Poll `url` until `done` holds for the JSON body, or give up after ~5s.
pub async fn wait_for(client: &Client, url: &str, user: &str, done: impl Fn(&Value) -> bool) -> Value {
    let mut body = Value::Null;
    for _ in 0..100 {
        body = get_json(client, url, user).await.1;
        if done(&body) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    body
}
