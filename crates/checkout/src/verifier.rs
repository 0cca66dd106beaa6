//! Payment Verifier: authenticates gateway results before they may touch
//! order or inventory state.
//!
//! A successful gateway result carries a signature computed by the gateway as
//! the lowercase hex HMAC-SHA256 of `"{gateway_order_id}|{gateway_payment_id}"`
//! under the shared key secret. The verifier recomputes it and compares in
//! constant time. Only a passing verification yields a [`VerifiedPayment`],
//! and [`OrderLifecycle::commit`] accepts nothing else.
//!
//! [`OrderLifecycle::commit`]: crate::lifecycle::OrderLifecycle::commit

use chrono::{DateTime, Utc};
use common::{AttemptId, OrderId};
use domain::PaymentAttempt;
use hmac::{Hmac, Mac, digest::InvalidLength};
use serde::Serialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Why a gateway result was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// The payment id or the signature is empty.
    MissingField,
    /// The signature is not valid hex.
    BadEncoding,
    SignatureMismatch,
    /// The attempt already reached a terminal status.
    AlreadyConsumed,
    /// No attempt was opened under the referenced session.
    UnknownAttempt,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::MissingField => "missing_field",
            RejectionReason::BadEncoding => "bad_encoding",
            RejectionReason::SignatureMismatch => "signature_mismatch",
            RejectionReason::AlreadyConsumed => "already_consumed",
            RejectionReason::UnknownAttempt => "unknown_attempt",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of [`PaymentVerifier::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub ok: bool,
    pub reason: Option<RejectionReason>,
}

impl From<Result<(), RejectionReason>> for Verification {
    fn from(result: Result<(), RejectionReason>) -> Self {
        match result {
            Ok(()) => Self {
                ok: true,
                reason: None,
            },
            Err(reason) => Self {
                ok: false,
                reason: Some(reason),
            },
        }
    }
}

/// Proof that a gateway result passed verification.
///
/// Can only be constructed inside this crate, by [`PaymentVerifier::authorize`].
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    attempt: PaymentAttempt,
}

impl VerifiedPayment {
    pub(crate) fn new(attempt: PaymentAttempt) -> Self {
        Self { attempt }
    }

    pub fn order_id(&self) -> OrderId {
        self.attempt.order_id
    }

    pub fn attempt_id(&self) -> AttemptId {
        self.attempt.id
    }

    pub fn gateway_payment_id(&self) -> &str {
        self.attempt.gateway_payment_id.as_deref().unwrap_or_default()
    }

    /// The attempt as it must be stored once the payment commits.
    pub(crate) fn paid_attempt(&self) -> &PaymentAttempt {
        &self.attempt
    }
}

/// Checks gateway signatures against the shared key secret.
#[derive(Clone)]
pub struct PaymentVerifier {
    mac: HmacSha256,
}

impl PaymentVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, InvalidLength> {
        Ok(Self {
            mac: HmacSha256::new_from_slice(secret.as_ref())?,
        })
    }

    /// Computes the signature the gateway sends for a successful payment.
    pub fn sign(&self, gateway_order_id: &str, gateway_payment_id: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(signing_payload(gateway_order_id, gateway_payment_id).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Checks a gateway result for `attempt` without side effects.
    pub fn verify(
        &self,
        attempt: &PaymentAttempt,
        gateway_payment_id: &str,
        signature: &str,
    ) -> Verification {
        self.check(attempt, gateway_payment_id, signature).into()
    }

    /// Verifies a gateway result and, on success, issues the commit token.
    pub fn authorize(
        &self,
        attempt: &PaymentAttempt,
        gateway_payment_id: &str,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifiedPayment, RejectionReason> {
        self.check(attempt, gateway_payment_id, signature)?;

        let mut paid = attempt.clone();
        paid.mark_paid(gateway_payment_id, signature, now)
            .map_err(|_| RejectionReason::AlreadyConsumed)?;
        Ok(VerifiedPayment::new(paid))
    }

    /// Returns true if `signature` authenticates the pair, regardless of
    /// the attempt's status.
    pub fn signature_matches(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> bool {
        self.check_signature(gateway_order_id, gateway_payment_id, signature)
            .is_ok()
    }

    fn check(
        &self,
        attempt: &PaymentAttempt,
        gateway_payment_id: &str,
        signature: &str,
    ) -> Result<(), RejectionReason> {
        if gateway_payment_id.trim().is_empty() || signature.trim().is_empty() {
            return Err(RejectionReason::MissingField);
        }
        if !attempt.is_pending() {
            return Err(RejectionReason::AlreadyConsumed);
        }
        self.check_signature(&attempt.gateway_order_id, gateway_payment_id, signature)
    }

    fn check_signature(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> Result<(), RejectionReason> {
        let expected = hex::decode(signature.trim()).map_err(|_| RejectionReason::BadEncoding)?;

        let mut mac = self.mac.clone();
        mac.update(signing_payload(gateway_order_id, gateway_payment_id).as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| RejectionReason::SignatureMismatch)
    }
}

impl std::fmt::Debug for PaymentVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentVerifier").finish_non_exhaustive()
    }
}

fn signing_payload(gateway_order_id: &str, gateway_payment_id: &str) -> String {
    format!("{gateway_order_id}|{gateway_payment_id}")
}

#[cfg(test)]
mod tests {
    use domain::Money;

    use super::*;

    fn verifier() -> PaymentVerifier {
        PaymentVerifier::new("test_secret").unwrap()
    }

    fn attempt() -> PaymentAttempt {
        PaymentAttempt::new(
            OrderId::new(),
            1,
            "order_GW1",
            Money::from_minor(50_000),
            "INR",
            Utc::now(),
        )
    }

    #[test]
    fn test_valid_signature_passes() {
        let verifier = verifier();
        let attempt = attempt();
        let signature = verifier.sign("order_GW1", "pay_1");

        let result = verifier.verify(&attempt, "pay_1", &signature);
        assert!(result.ok);
        assert_eq!(result.reason, None);
    }

    #[test]
    fn test_known_vector() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        let verifier = PaymentVerifier::new("key").unwrap();
        let mut mac = verifier.mac.clone();
        mac.update(b"The quick brown fox jumps over the lazy dog");
        assert_eq!(
            hex::encode(mac.finalize().into_bytes()),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn test_tampered_payment_id_fails() {
        let verifier = verifier();
        let signature = verifier.sign("order_GW1", "pay_1");

        let result = verifier.verify(&attempt(), "pay_2", &signature);
        assert!(!result.ok);
        assert_eq!(result.reason, Some(RejectionReason::SignatureMismatch));
    }

    #[test]
    fn test_other_secret_fails() {
        let forged = PaymentVerifier::new("attacker").unwrap().sign("order_GW1", "pay_1");
        let result = verifier().verify(&attempt(), "pay_1", &forged);
        assert_eq!(result.reason, Some(RejectionReason::SignatureMismatch));
    }

    #[test]
    fn test_missing_and_malformed_fields() {
        let verifier = verifier();
        let attempt = attempt();

        assert_eq!(
            verifier.verify(&attempt, "", "abcd").reason,
            Some(RejectionReason::MissingField)
        );
        assert_eq!(
            verifier.verify(&attempt, "pay_1", "").reason,
            Some(RejectionReason::MissingField)
        );
        assert_eq!(
            verifier.verify(&attempt, "pay_1", "not-hex!").reason,
            Some(RejectionReason::BadEncoding)
        );
    }

    #[test]
    fn test_consumed_attempt_fails() {
        let verifier = verifier();
        let mut attempt = attempt();
        let signature = verifier.sign("order_GW1", "pay_1");
        attempt.mark_paid("pay_1", &signature, Utc::now()).unwrap();

        let result = verifier.verify(&attempt, "pay_1", &signature);
        assert_eq!(result.reason, Some(RejectionReason::AlreadyConsumed));
        assert!(verifier.signature_matches("order_GW1", "pay_1", &signature));
    }

    #[test]
    fn test_authorize_issues_paid_attempt() {
        let verifier = verifier();
        let attempt = attempt();
        let signature = verifier.sign("order_GW1", "pay_1");

        let token = verifier
            .authorize(&attempt, "pay_1", &signature, Utc::now())
            .unwrap();
        assert_eq!(token.attempt_id(), attempt.id);
        assert_eq!(token.order_id(), attempt.order_id);
        assert_eq!(token.gateway_payment_id(), "pay_1");
        assert!(token.paid_attempt().is_paid());

        assert!(verifier
            .authorize(&attempt, "pay_1", "00", Utc::now())
            .is_err());
    }
}
