use std::sync::Arc;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::ports::{DeliveryStore, EndpointStore, EventStore, StoreError, WorkQueue};
use crate::domain::{DeliveryError, DeliveryId, DeliveryRecord, Precondition, StatusKind};
use crate::outbound::webhook::hmac_signer::{format_signature_header, sign};
use crate::outbound::webhook::http_client::{OutgoingWebhook, WebhookHttpClient, truncate_excerpt};
use crate::outbound::webhook::retry_strategy::RetryStrategy;

pub const DEFAULT_MAX_EXCEPTIONS: u32 = 3;

/// What a single worker execution did to its record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The record was missing or no longer `pending`; nothing was touched.
    Skipped,

    Delivered {
        status_code: u16,
    },

    /// `next_retry_at` is `None` once the budget is spent.
    Failed {
        status_code: Option<u16>,
        next_retry_at: Option<OffsetDateTime>,
    },

    /// Terminal failure without retry.
    Abandoned,

    /// The record changed while the attempt was in flight and the result was discarded.
    Superseded,
}

/// Worker pool that drains the delivery queue and sends webhooks.
///
/// Call [`DeliveryService::start`] to launch the workers. Each attempt runs in
/// its own task so a panic is observed at the worker boundary and recorded as
/// a terminal failure instead of taking the worker down.
///
/// Per attempt:
/// 1. Claim the record with a conditional `pending → retrying` update.
/// 2. Resolve its endpoint and event.
/// 3. Serialize the payload once, sign that buffer and send it.
/// 4. Write the outcome back, scheduling the next attempt from the [`RetryStrategy`].
pub struct DeliveryService {
    endpoints: Arc<dyn EndpointStore>,
    events: Arc<dyn EventStore>,
    deliveries: Arc<dyn DeliveryStore>,
    queue: Arc<dyn WorkQueue>,

    /// HTTP client reused across all requests.
    http_client: WebhookHttpClient,

    retry_strategy: RetryStrategy,

    /// Consecutive infrastructure errors tolerated before a record is abandoned.
    max_exceptions: u32,
}

impl DeliveryService {
    pub fn new(
        endpoints: Arc<dyn EndpointStore>,
        events: Arc<dyn EventStore>,
        deliveries: Arc<dyn DeliveryStore>,
        queue: Arc<dyn WorkQueue>,
        http_client: WebhookHttpClient,
    ) -> Self {
        Self {
            endpoints,
            events,
            deliveries,
            queue,
            http_client,
            retry_strategy: RetryStrategy::default(),
            max_exceptions: DEFAULT_MAX_EXCEPTIONS,
        }
    }

    /// Override the retry strategy.
    pub fn with_retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = strategy;
        self
    }

    pub fn with_max_exceptions(mut self, max_exceptions: u32) -> Self {
        self.max_exceptions = max_exceptions;
        self
    }

    pub fn retry_strategy(&self) -> &RetryStrategy {
        &self.retry_strategy
    }

    /// Spawn `worker_count` workers on the queue.
    ///
    /// Workers exit once the queue is closed, after finishing the attempt they
    /// are running.
    pub fn start(self: Arc<Self>, worker_count: usize) -> Vec<JoinHandle<()>> {
        info!(
            worker_count,
            lane = %self.queue.lane(),
            "Webhook delivery service starting"
        );

        (0..worker_count)
            .map(|worker| {
                let service = self.clone();
                tokio::spawn(async move { service.run_worker(worker).await })
            })
            .collect()
    }

    async fn run_worker(self: Arc<Self>, worker: usize) {
        while let Some(task) = self.queue.dequeue().await {
            let delivery_id = task.delivery_id;
            let service = self.clone();
            let attempt = tokio::spawn(async move { service.process(delivery_id).await });

            match attempt.await {
                Ok(Ok(outcome)) => {
                    debug!(worker, delivery_id = %delivery_id, ?outcome, "Attempt finished");
                }
                Ok(Err(e)) => {
                    // Claim or write-back hit the store; the recovery sweep reconciles.
                    error!(worker, delivery_id = %delivery_id, error = %e, "Attempt aborted");
                }
                Err(join_error) => {
                    error!(
                        worker,
                        delivery_id = %delivery_id,
                        error = %join_error,
                        "Attempt panicked"
                    );
                    self.abandon_in_flight(delivery_id, format!("Worker panicked: {join_error}"))
                        .await;
                }
            }
        }

        info!(worker, "Webhook delivery worker stopped");
    }

    /// Execute one attempt for the given delivery.
    pub async fn process(&self, delivery_id: DeliveryId) -> Result<AttemptOutcome, DeliveryError> {
        let Some(record) = self.deliveries.delivery(delivery_id).await? else {
            warn!(delivery_id = %delivery_id, "Delivery not found, dropping task");
            return Ok(AttemptOutcome::Skipped);
        };

        if record.kind() != StatusKind::Pending {
            debug!(
                delivery_id = %delivery_id,
                status = %record.kind(),
                "Delivery is not pending, dropping duplicate task"
            );
            return Ok(AttemptOutcome::Skipped);
        }

        let expected = record.precondition();
        let mut record = record;
        if record.begin_attempt(OffsetDateTime::now_utc()).is_err()
            || !self.deliveries.update_if(expected, record.clone()).await?
        {
            debug!(delivery_id = %delivery_id, "Delivery claimed by another worker");
            return Ok(AttemptOutcome::Skipped);
        }

        debug!(
            delivery_id = %delivery_id,
            attempt = record.attempt_count,
            "Processing delivery"
        );

        let endpoint = match self.endpoints.endpoint(record.endpoint_id).await {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => return self.abandon(record, "Endpoint no longer exists").await,
            Err(e) => return self.record_exception(record, e).await,
        };

        let event = match self.events.event(record.event_id).await {
            Ok(Some(event)) => event,
            Ok(None) => return self.abandon(record, "Event no longer exists").await,
            Err(e) => return self.record_exception(record, e).await,
        };

        let body = match serde_json::to_vec(&record.payload) {
            Ok(body) => body,
            Err(e) => {
                return self
                    .abandon(record, &format!("Payload could not be serialized: {e}"))
                    .await;
            }
        };

        let signature = format_signature_header(&sign(&body, endpoint.secret.as_bytes()));
        let webhook = OutgoingWebhook {
            url: &endpoint.url,
            event_name: &event.name,
            delivery_id: delivery_id.to_string(),
            timestamp: OffsetDateTime::now_utc().unix_timestamp(),
            signature,
            body,
        };

        let result = self.http_client.send_webhook(webhook).await;
        let now = OffsetDateTime::now_utc();
        let attempt = record.attempt_count;

        let outcome = match result {
            Ok(response) if RetryStrategy::is_success_status(response.status_code) => {
                info!(
                    delivery_id = %delivery_id,
                    endpoint_id = %endpoint.id,
                    attempt,
                    status_code = response.status_code,
                    response_time_ms = response.response_time_ms,
                    "Webhook delivered successfully"
                );
                let status_code = response.status_code;
                record
                    .record_success(status_code, response.body, now)
                    .map_err(|e| DeliveryError::InvalidState(e.to_string()))?;
                AttemptOutcome::Delivered { status_code }
            }
            Ok(response) => {
                let next_retry_at = self.retry_strategy.next_retry_at(attempt, now);
                warn!(
                    delivery_id = %delivery_id,
                    endpoint_id = %endpoint.id,
                    attempt,
                    max_tries = self.retry_strategy.max_tries(),
                    status_code = response.status_code,
                    will_retry = next_retry_at.is_some(),
                    "Webhook endpoint returned an error status"
                );
                let status_code = Some(response.status_code);
                record
                    .record_failure(status_code, response.body, next_retry_at, now)
                    .map_err(|e| DeliveryError::InvalidState(e.to_string()))?;
                AttemptOutcome::Failed {
                    status_code,
                    next_retry_at,
                }
            }
            Err(e) if e.is_transport() => {
                let next_retry_at = self.retry_strategy.next_retry_at(attempt, now);
                error!(
                    delivery_id = %delivery_id,
                    endpoint_id = %endpoint.id,
                    attempt,
                    max_tries = self.retry_strategy.max_tries(),
                    error = %e,
                    will_retry = next_retry_at.is_some(),
                    "Webhook delivery failed"
                );
                let excerpt = truncate_excerpt(&e.to_string(), self.http_client.body_limit());
                record
                    .record_failure(None, excerpt, next_retry_at, now)
                    .map_err(|e| DeliveryError::InvalidState(e.to_string()))?;
                AttemptOutcome::Failed {
                    status_code: None,
                    next_retry_at,
                }
            }
            Err(e) => return self.abandon(record, &e.to_string()).await,
        };

        self.write_back(attempt, record, outcome).await
    }

    /// Terminal failure for unrecoverable input.
    async fn abandon(
        &self,
        mut record: DeliveryRecord,
        reason: &str,
    ) -> Result<AttemptOutcome, DeliveryError> {
        error!(delivery_id = %record.id, reason, "Webhook delivery abandoned");
        let attempt = record.attempt_count;
        record
            .abandon(reason.to_string(), OffsetDateTime::now_utc())
            .map_err(|e| DeliveryError::InvalidState(e.to_string()))?;
        self.write_back(attempt, record, AttemptOutcome::Abandoned).await
    }

    /// Count an infrastructure error, abandoning the record once the breaker trips.
    async fn record_exception(
        &self,
        mut record: DeliveryRecord,
        err: StoreError,
    ) -> Result<AttemptOutcome, DeliveryError> {
        let now = OffsetDateTime::now_utc();
        let attempt = record.attempt_count;
        let next_retry_at = self.retry_strategy.next_retry_at(attempt, now);

        record
            .record_exception(err.to_string(), next_retry_at, now)
            .map_err(|e| DeliveryError::InvalidState(e.to_string()))?;

        if record.exception_count >= self.max_exceptions {
            error!(
                delivery_id = %record.id,
                exception_count = record.exception_count,
                error = %err,
                "Too many consecutive errors, abandoning delivery"
            );
            let reason = format!(
                "Abandoned after {} consecutive errors: {err}",
                record.exception_count
            );
            record
                .abandon(reason, now)
                .map_err(|e| DeliveryError::InvalidState(e.to_string()))?;
            return self.write_back(attempt, record, AttemptOutcome::Abandoned).await;
        }

        warn!(
            delivery_id = %record.id,
            exception_count = record.exception_count,
            error = %err,
            "Delivery attempt hit an infrastructure error"
        );
        let outcome = AttemptOutcome::Failed {
            status_code: None,
            next_retry_at: record.next_retry_at(),
        };
        self.write_back(attempt, record, outcome).await
    }

    /// Persist the result, provided the record is still the one we claimed.
    async fn write_back(
        &self,
        attempt_count: u32,
        record: DeliveryRecord,
        outcome: AttemptOutcome,
    ) -> Result<AttemptOutcome, DeliveryError> {
        let expected = Precondition {
            status: StatusKind::Retrying,
            attempt_count,
        };
        let delivery_id = record.id;

        if self.deliveries.update_if(expected, record).await? {
            Ok(outcome)
        } else {
            warn!(delivery_id = %delivery_id, "Delivery changed during attempt, result discarded");
            Ok(AttemptOutcome::Superseded)
        }
    }

    async fn abandon_in_flight(&self, delivery_id: DeliveryId, reason: String) {
        let record = match self.deliveries.delivery(delivery_id).await {
            Ok(Some(record)) if record.kind() == StatusKind::Retrying => record,
            Ok(_) => return,
            Err(e) => {
                error!(delivery_id = %delivery_id, error = %e, "Could not load panicked delivery");
                return;
            }
        };

        let attempt = record.attempt_count;
        let mut record = record;
        if record.abandon(reason, OffsetDateTime::now_utc()).is_ok()
            && let Err(e) = self.write_back(attempt, record, AttemptOutcome::Abandoned).await
        {
            error!(delivery_id = %delivery_id, error = %e, "Could not record panicked delivery");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Endpoint, EndpointId, Event, EventId, OwnerId};
    use crate::infrastructure::InMemoryStore;
    use crate::outbound::webhook::delivery_queue::DeliveryQueue;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        store: Arc<InMemoryStore>,
        queue: Arc<DeliveryQueue>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(InMemoryStore::new()),
                queue: Arc::new(DeliveryQueue::new()),
            }
        }

        fn service(&self) -> DeliveryService {
            self.service_with_endpoints(self.store.clone())
        }

        fn service_with_endpoints(&self, endpoints: Arc<dyn EndpointStore>) -> DeliveryService {
            DeliveryService::new(
                endpoints,
                self.store.clone(),
                self.store.clone(),
                self.queue.clone(),
                WebhookHttpClient::new().unwrap(),
            )
        }

        async fn pending(&self, url: &str) -> DeliveryId {
            let owner = OwnerId::from("user-1");
            let endpoint = Endpoint::new(owner.clone(), url.to_string(), "secret".to_string());
            let event = Event::new(owner, "order.created".to_string()).subscribe_to([endpoint.id]);
            let record = DeliveryRecord::pending(
                event.id,
                endpoint.id,
                json!({"id": 42}),
                OffsetDateTime::now_utc(),
            );
            let id = record.id;
            self.store.insert_endpoint(endpoint).await.unwrap();
            self.store.insert_event(event).await.unwrap();
            self.store.insert_delivery(record).await.unwrap();
            id
        }

        async fn record(&self, id: DeliveryId) -> DeliveryRecord {
            self.store.delivery(id).await.unwrap().unwrap()
        }
    }

    /// Endpoint store that fails on lookup, optionally by panicking.
    struct BrokenEndpoints {
        panic: AtomicBool,
    }

    #[async_trait]
    impl EndpointStore for BrokenEndpoints {
        async fn insert_endpoint(&self, _: Endpoint) -> Result<(), StoreError> {
            Ok(())
        }

        async fn endpoint(&self, _: EndpointId) -> Result<Option<Endpoint>, StoreError> {
            if self.panic.load(Ordering::SeqCst) {
                panic!("endpoint lookup exploded");
            }
            Err(StoreError::Unavailable("connection reset".to_string()))
        }

        async fn endpoints_for_owner(&self, _: &OwnerId) -> Result<Vec<Endpoint>, StoreError> {
            Ok(Vec::new())
        }

        async fn active_for_event(&self, _: EventId) -> Result<Vec<Endpoint>, StoreError> {
            Ok(Vec::new())
        }

        async fn update_endpoint(&self, _: Endpoint) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn delete_endpoint(&self, _: EndpointId) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    async fn rearm(fx: &Fixture, id: DeliveryId) {
        let mut record = fx.record(id).await;
        let expected = record.precondition();
        record.rearm(OffsetDateTime::now_utc()).unwrap();
        assert!(fx.store.update_if(expected, record).await.unwrap());
    }

    #[tokio::test]
    async fn test_successful_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let fx = Fixture::new();
        let id = fx.pending(&server.uri()).await;

        let outcome = fx.service().process(id).await.unwrap();
        assert_eq!(outcome, AttemptOutcome::Delivered { status_code: 200 });

        let record = fx.record(id).await;
        assert_eq!(record.kind(), StatusKind::Success);
        assert_eq!(record.attempt_count, 1);
        assert_eq!(record.response_code, Some(200));
        assert_eq!(record.response_body.as_deref(), Some("ok"));
        assert!(record.delivered_at().is_some());
        assert_eq!(record.next_retry_at(), None);
    }

    #[tokio::test]
    async fn test_error_status_schedules_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&server)
            .await;

        let fx = Fixture::new();
        let id = fx.pending(&server.uri()).await;
        let before = OffsetDateTime::now_utc();

        fx.service().process(id).await.unwrap();

        let record = fx.record(id).await;
        assert_eq!(record.kind(), StatusKind::Failed);
        assert_eq!(record.attempt_count, 1);
        assert_eq!(record.response_code, Some(500));

        let next = record.next_retry_at().unwrap();
        let delay = next - before;
        assert!(delay >= time::Duration::seconds(60));
        assert!(delay < time::Duration::seconds(65));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(5)
            .mount(&server)
            .await;

        let fx = Fixture::new();
        let id = fx.pending(&server.uri()).await;
        let service = fx.service();

        for attempt in 1..=5 {
            service.process(id).await.unwrap();
            let record = fx.record(id).await;
            assert_eq!(record.attempt_count, attempt);
            if attempt < 5 {
                assert!(record.is_retry_eligible());
                rearm(&fx, id).await;
            }
        }

        let record = fx.record(id).await;
        assert_eq!(record.kind(), StatusKind::Failed);
        assert_eq!(record.next_retry_at(), None);
    }

    #[tokio::test]
    async fn test_transport_failure_records_null_code() {
        let fx = Fixture::new();
        // Nothing listens on port 9 locally.
        let id = fx.pending("http://127.0.0.1:9/hook").await;

        let outcome = fx.service().process(id).await.unwrap();
        assert!(matches!(
            outcome,
            AttemptOutcome::Failed {
                status_code: None,
                next_retry_at: Some(_)
            }
        ));

        let record = fx.record(id).await;
        assert_eq!(record.response_code, None);
        assert!(record.response_body.is_some());
    }

    #[tokio::test]
    async fn test_malformed_url_is_abandoned() {
        let fx = Fixture::new();
        let id = fx.pending("not a url").await;

        let outcome = fx.service().process(id).await.unwrap();
        assert_eq!(outcome, AttemptOutcome::Abandoned);

        let record = fx.record(id).await;
        assert_eq!(record.kind(), StatusKind::Failed);
        assert!(!record.is_retry_eligible());
        assert_eq!(record.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_duplicate_task_is_noop() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let fx = Fixture::new();
        let id = fx.pending(&server.uri()).await;
        let service = fx.service();

        service.process(id).await.unwrap();
        let after_first = fx.record(id).await;

        let outcome = service.process(id).await.unwrap();
        assert_eq!(outcome, AttemptOutcome::Skipped);
        assert_eq!(fx.record(id).await, after_first);
    }

    #[tokio::test]
    async fn test_store_errors_trip_the_breaker() {
        let fx = Fixture::new();
        let id = fx.pending("http://127.0.0.1:9/hook").await;
        let service = fx.service_with_endpoints(Arc::new(BrokenEndpoints {
            panic: AtomicBool::new(false),
        }));

        for count in 1..=2 {
            service.process(id).await.unwrap();
            let record = fx.record(id).await;
            assert_eq!(record.exception_count, count);
            assert!(record.is_retry_eligible());
            rearm(&fx, id).await;
        }

        let outcome = service.process(id).await.unwrap();
        assert_eq!(outcome, AttemptOutcome::Abandoned);

        let record = fx.record(id).await;
        assert_eq!(record.exception_count, 3);
        assert!(!record.is_retry_eligible());
    }

    #[tokio::test]
    async fn test_panic_is_recorded_as_terminal_failure() {
        let fx = Fixture::new();
        let id = fx.pending("http://127.0.0.1:9/hook").await;
        let service = Arc::new(fx.service_with_endpoints(Arc::new(BrokenEndpoints {
            panic: AtomicBool::new(true),
        })));

        let workers = service.start(1);
        fx.queue.enqueue(id, None).await.unwrap();

        let mut record = fx.record(id).await;
        for _ in 0..100 {
            if record.kind() == StatusKind::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            record = fx.record(id).await;
        }

        assert_eq!(record.kind(), StatusKind::Failed);
        assert!(!record.is_retry_eligible());
        assert!(record.response_body.unwrap().contains("panicked"));

        fx.queue.close().await;
        for worker in workers {
            worker.await.unwrap();
        }
    }
}
