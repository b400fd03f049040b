//! In-memory fakes for every port plus catalog fixtures.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;

use coursemart_catalog::{
    AccessLimits, ContentUnitId, CourseLevel, CourseModule, DownloadFile, DownloadFormat, Product,
    ProductId, ProductKind, Topic,
};
use coursemart_core::{AggregateId, ExpectedVersion, UserId};
use coursemart_events::{EventEnvelope, InMemoryEventBus};
use coursemart_infra::event_store::{
    EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent,
};
use coursemart_pricing::Amount;
use coursemart_purchasing::{Purchase, PurchaseId};
use coursemart_workflow::ports::{
    CheckoutRequest, CheckoutSession, GatewaySession, Notifier, PaymentGateway, ProofStorage,
    ProofUpload, UserDirectory, UserProfile,
};
use coursemart_workflow::{MarketConfig, Marketplace, NewProduct, Ports};

pub struct FakeGateway {
    pub status: Mutex<String>,
    pub delay: Mutex<Option<Duration>>,
    pub fail: AtomicBool,
    pub sessions_opened: AtomicUsize,
    pub retrievals: AtomicUsize,
    pub requests: Mutex<Vec<CheckoutRequest>>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self {
            status: Mutex::new("paid".to_string()),
            delay: Mutex::new(None),
            fail: AtomicBool::new(false),
            sessions_opened: AtomicUsize::new(0),
            retrievals: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl FakeGateway {
    pub fn set_status(&self, status: &str) {
        *self.status.lock().unwrap() = status.to_string();
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait::async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> anyhow::Result<CheckoutSession> {
        self.pause().await;
        if self.fail.load(Ordering::SeqCst) {
            bail!("gateway rejected the request");
        }
        let n = self.sessions_opened.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request);
        Ok(CheckoutSession {
            session_id: format!("cs_test_{n}"),
            url: format!("https://checkout.example/pay/cs_test_{n}"),
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> anyhow::Result<GatewaySession> {
        self.pause().await;
        self.retrievals.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            bail!("gateway unreachable");
        }
        let status = self.status.lock().unwrap().clone();
        let payment_intent_id = (status == "paid").then(|| format!("pi_{session_id}"));
        Ok(GatewaySession {
            session_id: session_id.to_string(),
            payment_status: status,
            payment_intent_id,
        })
    }
}

#[derive(Default)]
pub struct FakeProofStorage {
    pub stored: Mutex<Vec<(PurchaseId, String)>>,
}

#[async_trait::async_trait]
impl ProofStorage for FakeProofStorage {
    async fn store(&self, purchase: PurchaseId, upload: &ProofUpload) -> anyhow::Result<String> {
        let url = format!("https://proofs.example/{purchase}/{}", upload.file_name);
        self.stored.lock().unwrap().push((purchase, url.clone()));
        Ok(url)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub fail: AtomicBool,
    pub approved: Mutex<Vec<(UserId, PurchaseId, usize)>>,
    pub rejected: Mutex<Vec<(UserId, String)>>,
}

impl RecordingNotifier {
    pub fn approved_count(&self) -> usize {
        self.approved.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_approved(
        &self,
        user: &UserProfile,
        products: &[Product],
        purchase: &Purchase,
    ) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("smtp connection refused");
        }
        self.approved
            .lock()
            .unwrap()
            .push((user.id, purchase.id_typed(), products.len()));
        Ok(())
    }

    async fn notify_rejected(&self, user: &UserProfile, reason: &str) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("smtp connection refused");
        }
        self.rejected
            .lock()
            .unwrap()
            .push((user.id, reason.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeUsers {
    pub profiles: Mutex<HashMap<UserId, UserProfile>>,
}

impl FakeUsers {
    pub fn register(&self, name: &str) -> UserId {
        let id = UserId::new();
        self.profiles.lock().unwrap().insert(
            id,
            UserProfile {
                id,
                name: name.to_string(),
                email: Some(format!("{}@example.com", name.to_lowercase().replace(' ', "."))),
            },
        );
        id
    }
}

#[async_trait::async_trait]
impl UserDirectory for FakeUsers {
    async fn profile(&self, user: UserId) -> anyhow::Result<Option<UserProfile>> {
        Ok(self.profiles.lock().unwrap().get(&user).cloned())
    }
}

/// In-memory store that fails the next append to one aggregate type once
/// armed.
pub struct FlakyStore {
    inner: InMemoryEventStore,
    aggregate_type: &'static str,
    armed: AtomicBool,
}

impl FlakyStore {
    pub fn new(aggregate_type: &'static str) -> Self {
        Self {
            inner: InMemoryEventStore::new(),
            aggregate_type,
            armed: AtomicBool::new(false),
        }
    }

    pub fn fail_next_append(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

impl EventStore for FlakyStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let targeted = events
            .first()
            .is_some_and(|e| e.aggregate_type == self.aggregate_type);
        if targeted && self.armed.swap(false, Ordering::SeqCst) {
            return Err(EventStoreError::Unavailable("disk hiccup".to_string()));
        }
        self.inner.append(events, expected_version)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.inner.load_stream(aggregate_id)
    }

    fn load_by_type(&self, aggregate_type: &str) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.inner.load_by_type(aggregate_type)
    }
}

pub struct TestMarket {
    pub market: Marketplace,
    pub gateway: Arc<FakeGateway>,
    pub proofs: Arc<FakeProofStorage>,
    pub notifier: Arc<RecordingNotifier>,
    pub users: Arc<FakeUsers>,
}

impl TestMarket {
    pub fn new() -> Self {
        Self::with_config(MarketConfig {
            gateway_timeout_ms: 200,
            ..MarketConfig::default()
        })
    }

    pub fn with_config(config: MarketConfig) -> Self {
        Self::build(config, Arc::new(InMemoryEventStore::new()))
    }

    pub fn with_store(store: Arc<dyn EventStore>) -> Self {
        Self::build(
            MarketConfig {
                gateway_timeout_ms: 200,
                ..MarketConfig::default()
            },
            store,
        )
    }

    fn build(config: MarketConfig, store: Arc<dyn EventStore>) -> Self {
        let gateway = Arc::new(FakeGateway::default());
        let proofs = Arc::new(FakeProofStorage::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let users = Arc::new(FakeUsers::default());
        let ports = Ports {
            gateway: gateway.clone(),
            proofs: proofs.clone(),
            notifier: notifier.clone(),
            users: users.clone(),
        };
        Self {
            market: Marketplace::with_infrastructure(
                config,
                ports,
                store,
                Arc::new(InMemoryEventBus::<EventEnvelope<serde_json::Value>>::new()),
            ),
            gateway,
            proofs,
            notifier,
            users,
        }
    }

    pub fn buyer(&self, name: &str) -> UserId {
        self.users.register(name)
    }

    /// A one-module course with the given topic ids.
    pub fn course(&self, title: &str, base_usd_cents: i64, topics: &[&str]) -> Product {
        self.market
            .catalog()
            .create(NewProduct {
                title: title.to_string(),
                category: Some("Data".to_string()),
                kind: course_kind(topics),
                base_price: Some(Amount::from_cents(base_usd_cents)),
                legacy_price: None,
                is_free: false,
                limits: AccessLimits::default(),
            })
            .unwrap()
    }

    pub fn download(&self, title: &str, base_usd_cents: i64, files: &[&str], limits: AccessLimits) -> Product {
        self.market
            .catalog()
            .create(NewProduct {
                title: title.to_string(),
                category: None,
                kind: ProductKind::Download {
                    format: DownloadFormat::Ebook,
                    files: files
                        .iter()
                        .map(|id| DownloadFile {
                            id: ContentUnitId::new(*id),
                            name: format!("{id}.pdf"),
                            url: format!("https://files.example/{id}.pdf"),
                            preview: false,
                        })
                        .collect(),
                    author: Some("Ana Torres".to_string()),
                    extensions: Default::default(),
                },
                base_price: Some(Amount::from_cents(base_usd_cents)),
                legacy_price: None,
                is_free: false,
                limits,
            })
            .unwrap()
    }

    /// Buy `products` through the manual path and approve the purchase.
    pub async fn grant(&self, user: UserId, products: &[ProductId]) -> Purchase {
        let purchases = self.market.purchases();
        let purchase = purchases
            .create(user, products, "peru", yape())
            .unwrap();
        purchases
            .submit_proof(user, purchase.id_typed(), "https://proofs.example/receipt.jpg")
            .unwrap();
        purchases
            .approve(UserId::new(), purchase.id_typed(), None)
            .await
            .unwrap()
    }
}

pub fn yape() -> coursemart_purchasing::PaymentMethod {
    coursemart_purchasing::PaymentMethod::manual(
        coursemart_purchasing::PaymentMethodKind::Yape,
        "Yape",
    )
}

pub fn course_kind(topics: &[&str]) -> ProductKind {
    ProductKind::Course {
        modules: vec![CourseModule {
            title: "Fundamentals".to_string(),
            topics: topics
                .iter()
                .map(|id| Topic {
                    id: ContentUnitId::new(*id),
                    title: format!("Topic {id}"),
                    video_url: None,
                    duration: None,
                })
                .collect(),
        }],
        duration: Some("12 hours".to_string()),
        level: CourseLevel::Beginner,
        instructor: Some("Ana Torres".to_string()),
    }
}

pub fn unit(id: &str) -> ContentUnitId {
    ContentUnitId::new(id)
}

pub fn jpeg(bytes: usize) -> ProofUpload {
    ProofUpload {
        file_name: "receipt.jpg".to_string(),
        content_type: "image/jpeg".to_string(),
        bytes: vec![0xFF; bytes],
    }
}
