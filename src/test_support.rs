//! Shared fixtures for service tests: an in-memory SQLite database with the
//! real migrations applied, plus in-process stand-ins for the collaborators.

use crate::config::PaystackConfig;
use crate::entities::{
    UserRole, event_entity as ev, ticket_entity as tk, ticket_type_entity as tt,
    user_entity as users,
};
use crate::error::{AppError, AppResult};
use crate::external::{
    AuthorizationHandle, GatewayVerification, Notification, NotificationSink, PaymentGateway,
    PaystackGateway, TicketAssetPipeline, TicketAssets, VerificationOutcome,
};
use crate::models::PlatformSettings;
use crate::services::FixedSettings;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub async fn setup_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:".to_string());
    // one connection: every handle sees the same in-memory database. It also
    // serializes statements, so concurrent tests race the status claims but
    // never interleave inside the guarded `sold` update; the guard itself is
    // covered by exercising it against a stale read.
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await.expect("connect sqlite");
    Migrator::up(&db, None).await.expect("run migrations");
    db
}

pub fn settings(platform_fee_bp: i32, withdrawal_fee_bp: i32) -> PlatformSettings {
    PlatformSettings {
        platform_fee_bp,
        withdrawal_fee_bp,
        min_withdrawal_amount: 1000,
        currency: "NGN".to_string(),
    }
}

pub fn fixed_settings() -> Arc<FixedSettings> {
    Arc::new(FixedSettings(settings(500, 250)))
}

pub async fn seed_user(db: &DatabaseConnection, role: UserRole, email: &str) -> users::Model {
    let now = Utc::now();
    users::ActiveModel {
        email: Set(email.to_string()),
        full_name: Set(email.split('@').next().unwrap_or(email).to_string()),
        role: Set(role),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("seed user")
}

pub async fn seed_event(db: &DatabaseConnection, organizer_id: i64) -> ev::Model {
    let now = Utc::now();
    ev::ActiveModel {
        organizer_id: Set(organizer_id),
        title: Set("Lagos Jazz Night".to_string()),
        description: Set(None),
        venue: Set(Some("Eko Hotel".to_string())),
        starts_at: Set(now + Duration::days(30)),
        ends_at: Set(None),
        is_published: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("seed event")
}

pub async fn seed_ticket_type(
    db: &DatabaseConnection,
    event_id: i64,
    price: i64,
    quantity: i32,
) -> tt::Model {
    let now = Utc::now();
    tt::ActiveModel {
        event_id: Set(event_id),
        name: Set(format!("Tier {price}")),
        price: Set(price),
        quantity: Set(quantity),
        sold: Set(0),
        max_per_order: Set(10),
        sale_starts_at: Set(Some(now - Duration::days(1))),
        sale_ends_at: Set(Some(now + Duration::days(10))),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("seed ticket type")
}

#[derive(Debug, Clone)]
pub enum Scripted {
    Decline(String),
    TransportError,
    Hang,
    Amount(i64),
    NoEcho,
    Unpaid,
    Currency(String),
}

/// Payment gateway that remembers what was initialised and, unless told
/// otherwise, confirms it with the original amount and metadata.
#[derive(Default)]
pub struct ScriptedGateway {
    intents: Mutex<HashMap<String, (i64, Value)>>,
    scripts: Mutex<HashMap<String, Scripted>>,
    pub verify_calls: AtomicUsize,
    pub fail_initialize: AtomicBool,
}

impl ScriptedGateway {
    pub fn script(&self, reference: &str, behaviour: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .insert(reference.to_string(), behaviour);
    }

    pub fn verify_count(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn initialize(
        &self,
        _email: &str,
        amount: i64,
        _currency: &str,
        reference: &str,
        metadata: &Value,
    ) -> AppResult<AuthorizationHandle> {
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(AppError::ExternalApiError("gateway unavailable".into()));
        }
        self.intents
            .lock()
            .unwrap()
            .insert(reference.to_string(), (amount, metadata.clone()));
        Ok(AuthorizationHandle {
            authorization_url: format!("https://checkout.test/{reference}"),
            access_code: format!("ac_{reference}"),
            reference: reference.to_string(),
        })
    }

    async fn verify(&self, reference: &str) -> AppResult<GatewayVerification> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().unwrap().get(reference).cloned();
        let intent = self.intents.lock().unwrap().get(reference).cloned();
        let Some((amount, metadata)) = intent else {
            return Ok(GatewayVerification {
                outcome: VerificationOutcome::Failure("reference not found".into()),
                amount_confirmed: 0,
                currency: String::new(),
                metadata_echo: None,
            });
        };

        let mut verification = GatewayVerification {
            outcome: VerificationOutcome::Success,
            amount_confirmed: amount,
            currency: "NGN".to_string(),
            metadata_echo: Some(metadata),
        };
        match script {
            None => {}
            Some(Scripted::Decline(reason)) => {
                verification.outcome = VerificationOutcome::Failure(reason)
            }
            Some(Scripted::TransportError) => {
                return Err(AppError::ExternalApiError("connection reset".into()));
            }
            Some(Scripted::Hang) => {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            }
            Some(Scripted::Amount(confirmed)) => verification.amount_confirmed = confirmed,
            Some(Scripted::NoEcho) => verification.metadata_echo = None,
            Some(Scripted::Unpaid) => {
                verification.outcome = VerificationOutcome::Pending("ongoing".into())
            }
            Some(Scripted::Currency(currency)) => verification.currency = currency,
        }
        Ok(verification)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub delivered: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn snapshot(&self) -> Vec<Notification> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, notification: &Notification) -> AppResult<()> {
        self.delivered.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Asset pipeline whose success can be switched at runtime
#[derive(Default)]
pub struct SwitchableAssets {
    pub failing: AtomicBool,
    pub rendered: Mutex<Vec<String>>,
}

#[async_trait]
impl TicketAssetPipeline for SwitchableAssets {
    async fn render(&self, ticket: &tk::Model) -> AppResult<TicketAssets> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::ExternalApiError("storage unavailable".into()));
        }
        self.rendered.lock().unwrap().push(ticket.qr_payload());
        Ok(TicketAssets {
            qr_code_url: format!("https://cdn.test/qr/{}.png", ticket.ticket_number),
            pdf_url: format!("https://cdn.test/pdf/{}.pdf", ticket.ticket_number),
        })
    }
}

/// Polls `check` until it holds or about a second passes
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    check()
}

/// Answers every request with the same HTTP status line and JSON body.
/// Returns the server's base URL.
pub async fn serve_canned(status_line: &'static str, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let addr = listener.local_addr().expect("listener address");
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let response = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}

pub fn paystack_at(base_url: &str) -> PaystackGateway {
    PaystackGateway::new(PaystackConfig {
        secret_key: "sk_test_local".to_string(),
        base_url: base_url.to_string(),
        callback_url: None,
        verify_timeout_secs: 5,
    })
}
