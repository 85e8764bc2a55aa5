use crate::config::PaystackConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationHandle {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Success,
    /// definitive: the payment did not and will not succeed
    Failure(String),
    /// the customer has not finished paying yet
    Pending(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayVerification {
    pub outcome: VerificationOutcome,
    pub amount_confirmed: i64,
    pub currency: String,
    /// metadata exactly as it was sent at initialisation, if the provider returned it
    pub metadata_echo: Option<Value>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Provider name stored on the transaction
    fn name(&self) -> &'static str;

    async fn initialize(
        &self,
        email: &str,
        amount: i64,
        currency: &str,
        reference: &str,
        metadata: &Value,
    ) -> AppResult<AuthorizationHandle>;

    /// Asks the provider what happened to `reference`. Transport problems,
    /// throttling and auth trouble are errors the caller may retry; only a
    /// definitive "not paid" answer is a `Failure` outcome.
    async fn verify(&self, reference: &str) -> AppResult<GatewayVerification>;
}

#[derive(Debug, Serialize)]
struct InitializeRequest<'a> {
    email: &'a str,
    amount: i64,
    currency: &'a str,
    reference: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
    metadata: &'a Value,
}

#[derive(Debug, Deserialize)]
struct PaystackEnvelope<T> {
    status: bool,
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    access_code: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    gateway_response: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
}

/// Paystack returns metadata either as the object we sent or, for some
/// channels, as a JSON string. An empty string means none.
fn normalize_metadata(raw: Option<Value>) -> Option<Value> {
    match raw {
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => serde_json::from_str(&s).ok(),
        Some(Value::Null) | None => None,
        Some(other) => Some(other),
    }
}

fn to_verification(data: VerifyData) -> GatewayVerification {
    let outcome = match data.status.as_str() {
        "success" => VerificationOutcome::Success,
        "failed" | "reversed" => VerificationOutcome::Failure(
            data.gateway_response
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| format!("payment status is {}", data.status)),
        ),
        // ongoing, pending, processing, queued, abandoned
        other => VerificationOutcome::Pending(other.to_string()),
    };
    GatewayVerification {
        outcome,
        amount_confirmed: data.amount,
        currency: data.currency,
        metadata_echo: normalize_metadata(data.metadata),
    }
}

#[derive(Clone)]
pub struct PaystackGateway {
    client: Client,
    config: PaystackConfig,
}

impl PaystackGateway {
    pub fn new(config: PaystackConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn secret_key(&self) -> AppResult<&str> {
        if self.config.secret_key.trim().is_empty() {
            return Err(AppError::ConfigError(
                "Paystack secret key is not configured".to_string(),
            ));
        }
        Ok(&self.config.secret_key)
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    fn name(&self) -> &'static str {
        "paystack"
    }

    async fn initialize(
        &self,
        email: &str,
        amount: i64,
        currency: &str,
        reference: &str,
        metadata: &Value,
    ) -> AppResult<AuthorizationHandle> {
        let key = self.secret_key()?;
        let url = format!("{}/transaction/initialize", self.config.base_url);
        let body = InitializeRequest {
            email,
            amount,
            currency,
            reference,
            callback_url: self.config.callback_url.as_deref(),
            metadata,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let envelope: PaystackEnvelope<InitializeData> = response.json().await?;
        match envelope.data {
            Some(data) if status.is_success() && envelope.status => {
                log::info!("Paystack payment initialized: reference={reference}");
                Ok(AuthorizationHandle {
                    authorization_url: data.authorization_url,
                    access_code: data.access_code,
                    reference: data.reference,
                })
            }
            _ => {
                log::error!(
                    "Paystack initialize failed: reference={reference}, http={status}, message={}",
                    envelope.message
                );
                Err(AppError::ExternalApiError(format!(
                    "payment initialization failed: {}",
                    envelope.message
                )))
            }
        }
    }

    async fn verify(&self, reference: &str) -> AppResult<GatewayVerification> {
        let key = self.secret_key()?;
        let url = format!("{}/transaction/verify/{}", self.config.base_url, reference);

        let response = self.client.get(&url).bearer_auth(key).send().await?;
        let status = response.status();
        let body = response.text().await?;
        let verification = verify_reply(status, &body);
        if let Err(e) = &verification {
            log::warn!("Paystack verify for {reference} not usable: {e}");
        }
        verification
    }
}

/// Interprets a verify reply. A 404, or a 400 saying the reference does not
/// exist, is the provider's final answer; any other non-success reply
/// (429, 401, 403, 5xx) says nothing about the payment.
fn verify_reply(status: StatusCode, body: &str) -> AppResult<GatewayVerification> {
    let envelope = serde_json::from_str::<PaystackEnvelope<VerifyData>>(body);

    if status.is_success() {
        return match envelope {
            Ok(PaystackEnvelope {
                status: true,
                data: Some(data),
                ..
            }) => Ok(to_verification(data)),
            Ok(envelope) => Err(AppError::ExternalApiError(format!(
                "Paystack verify returned no payment: {}",
                envelope.message
            ))),
            Err(e) => Err(AppError::ExternalApiError(format!(
                "Paystack verify reply unreadable: {e}"
            ))),
        };
    }

    let message = match &envelope {
        Ok(envelope) => envelope.message.clone(),
        Err(_) => body.chars().take(200).collect(),
    };
    let unknown_reference = status == StatusCode::NOT_FOUND
        || (status == StatusCode::BAD_REQUEST && message.to_lowercase().contains("not found"));
    if unknown_reference {
        return Ok(GatewayVerification {
            outcome: VerificationOutcome::Failure(message),
            amount_confirmed: 0,
            currency: String::new(),
            metadata_echo: None,
        });
    }
    Err(AppError::ExternalApiError(format!(
        "Paystack verify returned {status}: {message}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verify_payload_maps_to_outcome() {
        let body = json!({
            "status": true,
            "message": "Verification successful",
            "data": {
                "status": "success",
                "amount": 500000,
                "currency": "NGN",
                "gateway_response": "Successful",
                "metadata": { "transaction_id": 9 }
            }
        });
        let envelope: PaystackEnvelope<VerifyData> = serde_json::from_value(body).unwrap();
        let verification = to_verification(envelope.data.unwrap());
        assert_eq!(verification.outcome, VerificationOutcome::Success);
        assert_eq!(verification.amount_confirmed, 500000);
        assert_eq!(verification.metadata_echo, Some(json!({ "transaction_id": 9 })));
    }

    #[test]
    fn declined_payment_carries_gateway_reason() {
        let data: VerifyData = serde_json::from_value(json!({
            "status": "failed",
            "amount": 100,
            "currency": "NGN",
            "gateway_response": "Declined by issuer",
            "metadata": ""
        }))
        .unwrap();
        let verification = to_verification(data);
        assert_eq!(
            verification.outcome,
            VerificationOutcome::Failure("Declined by issuer".into())
        );
        assert!(verification.metadata_echo.is_none());
    }

    #[test]
    fn unfinished_payment_is_not_a_failure() {
        let data: VerifyData = serde_json::from_value(json!({
            "status": "abandoned",
            "amount": 100,
            "currency": "NGN",
            "metadata": null
        }))
        .unwrap();
        assert_eq!(
            to_verification(data).outcome,
            VerificationOutcome::Pending("abandoned".into())
        );
    }

    #[test]
    fn stringified_metadata_is_parsed() {
        let raw = Some(Value::String(r#"{"event_id":3}"#.into()));
        assert_eq!(normalize_metadata(raw), Some(json!({ "event_id": 3 })));
        assert_eq!(normalize_metadata(Some(Value::String("  ".into()))), None);
    }

    #[tokio::test]
    async fn missing_secret_key_is_a_config_error() {
        let gateway = PaystackGateway::new(PaystackConfig {
            secret_key: String::new(),
            base_url: "http://127.0.0.1:9".into(),
            callback_url: None,
            verify_timeout_secs: 1,
        });
        assert!(matches!(
            gateway.verify("TXN-x").await,
            Err(AppError::ConfigError(_))
        ));
    }

    #[test]
    fn throttling_and_auth_replies_are_retryable() {
        for status in [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::BAD_GATEWAY,
        ] {
            let reply = verify_reply(status, r#"{"status":false,"message":"Try again"}"#);
            assert!(
                matches!(reply, Err(AppError::ExternalApiError(_))),
                "{status} must not settle the payment"
            );
        }
        assert!(matches!(
            verify_reply(StatusCode::OK, "<html>maintenance</html>"),
            Err(AppError::ExternalApiError(_))
        ));
    }

    #[test]
    fn unknown_reference_is_a_final_failure() {
        let body = r#"{"status":false,"message":"Transaction reference not found"}"#;
        for status in [StatusCode::BAD_REQUEST, StatusCode::NOT_FOUND] {
            assert_eq!(
                verify_reply(status, body).unwrap().outcome,
                VerificationOutcome::Failure("Transaction reference not found".into())
            );
        }
        // a 400 about something else is not an answer about the payment
        assert!(matches!(
            verify_reply(
                StatusCode::BAD_REQUEST,
                r#"{"status":false,"message":"Invalid key"}"#
            ),
            Err(AppError::ExternalApiError(_))
        ));
    }

    #[tokio::test]
    async fn rate_limited_verify_is_an_error() {
        let base_url = crate::test_support::serve_canned(
            "429 Too Many Requests",
            r#"{"status":false,"message":"Too many requests"}"#,
        )
        .await;
        let gateway = crate::test_support::paystack_at(&base_url);
        assert!(matches!(
            gateway.verify("TXN-x").await,
            Err(AppError::ExternalApiError(_))
        ));
    }
}
