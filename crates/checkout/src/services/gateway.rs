//! Payment gateway trait with HTTP and in-memory implementations.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use domain::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::verifier::PaymentVerifier;

/// Buyer contact details forwarded to the gateway's checkout page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Request to open a gateway session for one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    /// Amount to collect, in minor units.
    pub amount: Money,
    pub currency: String,
    /// Merchant-side reference; the order number.
    pub receipt: String,
    pub contact: Contact,
}

/// A session opened by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySession {
    /// Gateway-side reference that later callbacks quote back.
    pub gateway_order_id: String,
    pub amount: Money,
    pub currency: String,
}

/// Errors talking to the payment gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network failure, timeout or 5xx.
    #[error("gateway unreachable: {0}")]
    Unavailable(String),

    /// The gateway answered but refused the request.
    #[error("gateway rejected the request: {0}")]
    Rejected(String),
}

/// Outbound session creation with the external payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(&self, request: SessionRequest) -> Result<GatewaySession, GatewayError>;
}

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
    notes: CreateOrderNotes<'a>,
}

#[derive(Debug, Serialize)]
struct CreateOrderNotes<'a> {
    contact: &'a str,
    email: Option<&'a str>,
    phone: Option<&'a str>,
    order_number: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    id: String,
}

/// Gateway client speaking the `POST /v1/orders` session API.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[tracing::instrument(skip(self, request), fields(receipt = %request.receipt))]
    async fn create_session(&self, request: SessionRequest) -> Result<GatewaySession, GatewayError> {
        let body = CreateOrderBody {
            amount: request.amount.minor(),
            currency: &request.currency,
            receipt: &request.receipt,
            notes: CreateOrderNotes {
                contact: &request.contact.name,
                email: request.contact.email.as_deref(),
                phone: request.contact.phone.as_deref(),
                order_number: &request.receipt,
            },
        };

        let response = self
            .client
            .post(format!("{}/v1/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::Unavailable(format!("status {status}")));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(format!("status {status}: {detail}")));
        }

        let created: CreateOrderResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        Ok(GatewaySession {
            gateway_order_id: created.id,
            amount: request.amount,
            currency: request.currency,
        })
    }
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    sessions: HashMap<String, SessionRequest>,
    next_id: u32,
    fail_on_create: bool,
    delay: Option<std::time::Duration>,
}

/// Sandbox gateway for tests and local runs.
///
/// Sessions get sequential ids (`order_SBX0001`, ...). [`sign`](Self::sign)
/// produces the signature a real gateway would attach to a successful
/// payment callback.
#[derive(Debug, Clone)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
    signer: PaymentVerifier,
}

impl InMemoryPaymentGateway {
    pub fn new(signer: PaymentVerifier) -> Self {
        Self {
            state: Arc::default(),
            signer,
        }
    }

    /// Makes subsequent session calls fail as unreachable.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_create = fail;
    }

    /// Delays every session call, to exercise caller timeouts.
    pub fn set_delay(&self, delay: Option<std::time::Duration>) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .delay = delay;
    }

    pub fn session_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sessions
            .len()
    }

    /// Returns the request a session was opened with.
    pub fn session(&self, gateway_order_id: &str) -> Option<SessionRequest> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sessions
            .get(gateway_order_id)
            .cloned()
    }

    pub fn sign(&self, gateway_order_id: &str, gateway_payment_id: &str) -> String {
        self.signer.sign(gateway_order_id, gateway_payment_id)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_session(&self, request: SessionRequest) -> Result<GatewaySession, GatewayError> {
        let delay = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.fail_on_create {
            return Err(GatewayError::Unavailable("sandbox offline".to_string()));
        }

        state.next_id += 1;
        let gateway_order_id = format!("order_SBX{:04}", state.next_id);
        let session = GatewaySession {
            gateway_order_id: gateway_order_id.clone(),
            amount: request.amount,
            currency: request.currency.clone(),
        };
        state.sessions.insert(gateway_order_id, request);

        Ok(session)
    }
}
