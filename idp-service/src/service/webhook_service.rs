//! # Event Bus
//!
//! Webhook fan-out with at-least-once delivery.
//!
//! ## Pipeline
//!
//! ```text
//! emit(event)                      dispatcher worker (leader only)
//!     │                                   │
//!     ▼                                   ▼
//! select target webhooks         claim due deliveries
//!     │                          (conditional update, SKIP LOCKED)
//!     ▼                                   │
//! enqueue rows (status=pending)          ▼
//!                                 POST body + HMAC header
//!                                        │
//!                          ┌─────────────┴─────────────┐
//!                          ▼                           ▼
//!                    2xx: succeeded          else: backoff retry,
//!                                            parked as failed after
//!                                            max_attempts
//! ```
//!
//! Fan-out targets: events carrying an application id go to that
//! application's webhooks; global user events go to the webhooks of
//! every application the user holds a profile in (that is what keeps
//! product shadow tables converged).
//!
//! The HTTP POST always happens outside the claim transaction; a worker
//! crash mid-flight leaves the row claimable, hence at-least-once.

use chrono::{Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use shared::config::WebhookConfig;
use shared::errors::ApiError;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::WebhookEvent;
use crate::repository::{UserRepository, WebhookRepository};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Service for webhook fan-out and delivery.
pub struct WebhookService {
    webhooks: WebhookRepository,
    users: UserRepository,
    http: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookService {
    pub fn new(webhooks: WebhookRepository, users: UserRepository, config: WebhookConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_default();

        Self {
            webhooks,
            users,
            http,
            config,
        }
    }

    // =========================================================================
    // EMISSION
    // =========================================================================

    /// Fans an event out to its target webhooks as queued deliveries.
    ///
    /// Emission never fails the calling flow: enqueue errors are logged
    /// and dropped - the sync pull covers the gap.
    pub async fn emit(&self, event: WebhookEvent) {
        if let Err(e) = self.try_emit(event).await {
            warn!(error = %e, "Failed to enqueue webhook deliveries");
        }
    }

    async fn try_emit(&self, event: WebhookEvent) -> Result<(), ApiError> {
        let event_name = event.event_type();
        let user_id = event.user_id();
        let application_id = event.application_id();
        let envelope = event.into_envelope();
        let body = serde_json::to_value(&envelope).map_err(|e| ApiError::InternalError {
            message: e.to_string(),
        })?;

        // Application-scoped events go to that application's hooks;
        // global user events go to every application the user is in
        let targets = match application_id {
            Some(app_id) => self.webhooks.list_for_application(app_id).await?,
            None => {
                let profiles = self.users.list_profiles(user_id).await?;
                let mut hooks = Vec::new();
                for profile in profiles {
                    hooks.extend(
                        self.webhooks
                            .list_for_application(profile.application_id)
                            .await?,
                    );
                }
                hooks
            }
        };

        for hook in targets.iter().filter(|h| h.wants(event_name)) {
            self.webhooks.enqueue(hook.id, event_name, &body).await?;
        }

        Ok(())
    }

    // =========================================================================
    // SIGNING
    // =========================================================================

    /// Hex HMAC-SHA256 over the exact body bytes.
    pub fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Backoff before attempt `n` (1-based): `base * 2^(n-1)` seconds
    /// plus up to half the base of jitter.
    fn backoff_seconds(&self, attempt: u32) -> i64 {
        use rand::Rng as _;
        let base = self.config.base_backoff_seconds as i64;
        let exp = base.saturating_mul(1i64 << (attempt.saturating_sub(1)).min(16));
        let jitter = rand::thread_rng().gen_range(0..=(base / 2).max(1));
        exp + jitter
    }

    // =========================================================================
    // DISPATCHER
    // =========================================================================

    /// Runs the delivery loop until the process exits. Exactly one
    /// instance should run (leader); the SKIP LOCKED claim keeps extra
    /// instances harmless.
    pub async fn run_dispatcher(self: Arc<Self>) {
        info!(
            poll_interval = self.config.poll_interval_seconds,
            max_attempts = self.config.max_attempts,
            "Webhook dispatcher started"
        );

        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
            self.config.poll_interval_seconds,
        ));

        loop {
            ticker.tick().await;
            if let Err(e) = self.dispatch_batch(32).await {
                warn!(error = %e, "Webhook dispatch batch failed");
            }
        }
    }

    /// Claims and delivers one batch. Public for tests and for drain-on-
    /// shutdown.
    pub async fn dispatch_batch(&self, limit: i64) -> Result<usize, ApiError> {
        let claimed = self.webhooks.claim_due(limit).await?;
        let count = claimed.len();

        for delivery in claimed {
            // Hook may have been deleted since enqueue
            let hook = match self.webhooks.find_by_id(delivery.webhook_id).await? {
                Some(h) => h,
                None => {
                    self.webhooks
                        .mark_failed(
                            delivery.id,
                            None,
                            "webhook deleted",
                            Utc::now(),
                            // Parks immediately
                            delivery.attempt_count + 1,
                        )
                        .await?;
                    continue;
                }
            };

            let body = serde_json::to_vec(&delivery.payload).unwrap_or_default();
            let signature = Self::sign(&hook.secret, &body);

            let outcome = self
                .http
                .post(&hook.url)
                .header("Content-Type", "application/json")
                .header(SIGNATURE_HEADER, signature)
                .body(body)
                .send()
                .await;

            match outcome {
                Ok(response) if response.status().is_success() => {
                    self.webhooks
                        .mark_succeeded(delivery.id, response.status().as_u16() as i32)
                        .await?;
                }
                Ok(response) => {
                    let next = Utc::now()
                        + ChronoDuration::seconds(
                            self.backoff_seconds(delivery.attempt_count as u32 + 1),
                        );
                    self.webhooks
                        .mark_failed(
                            delivery.id,
                            Some(response.status().as_u16() as i32),
                            &format!("non-2xx response: {}", response.status()),
                            next,
                            self.config.max_attempts as i32,
                        )
                        .await?;
                }
                Err(e) => {
                    let next = Utc::now()
                        + ChronoDuration::seconds(
                            self.backoff_seconds(delivery.attempt_count as u32 + 1),
                        );
                    self.webhooks
                        .mark_failed(
                            delivery.id,
                            None,
                            &format!("request error: {e}"),
                            next,
                            self.config.max_attempts as i32,
                        )
                        .await?;
                }
            }
        }

        Ok(count)
    }

}

impl std::fmt::Debug for WebhookService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookService")
            .field("max_attempts", &self.config.max_attempts)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_stable_hmac() {
        let body = br#"{"event":"user.login","payload":{}}"#;
        let sig1 = WebhookService::sign("secret", body);
        let sig2 = WebhookService::sign("secret", body);

        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 64); // HMAC-SHA256 hex

        // Different secret, different signature
        assert_ne!(sig1, WebhookService::sign("other", body));
        // Different body, different signature
        assert_ne!(sig1, WebhookService::sign("secret", b"{}"));
    }

    #[test]
    fn test_signature_matches_receiver_computation() {
        // What a product backend would compute to verify
        let secret = "whsec_test";
        let body = b"payload-bytes";

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let expected = hex::encode(mac.finalize().into_bytes());

        assert_eq!(WebhookService::sign(secret, body), expected);
    }
}
