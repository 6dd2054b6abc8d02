pub async fn home() -> &'static str {
    "Webhook Delivery Platform"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_home() {
        let response = home().await;
        assert_eq!(response, "Webhook Delivery Platform");
    }
}
