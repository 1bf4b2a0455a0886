use std::sync::Arc;

use pns_core::{DeliveryOutcome, PushMatch, PushNotification};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::client::FcmProvider;
use crate::response::ResponseHandler;

/// One multicast request for up to [`super::MULTICAST_LIMIT`] matches of a client
pub struct FcmDeliveryTask {
    pub notification: Arc<PushNotification>,
    pub matches: Vec<PushMatch>,
    /// Body shared by all chunks of the client
    pub message: Arc<Map<String, Value>>,
    pub provider: Arc<dyn FcmProvider>,
    pub handler: Arc<ResponseHandler>,
}

impl FcmDeliveryTask {
    pub async fn run(self) {
        let registration_ids: Vec<Value> = self
            .matches
            .iter()
            .map(|m| Value::String(m.token.value.clone()))
            .collect();
        let mut body = (*self.message).clone();
        body.insert("registration_ids".into(), Value::Array(registration_ids));

        debug!(
            topic = %self.notification.topic,
            user_id = self.notification.user_id,
            context_id = self.notification.context_id,
            count = self.matches.len(),
            "Sending FCM notification"
        );
        let response = match self.provider.send(&Value::Object(body)).await {
            Ok(response) => response,
            Err(e) => {
                let outcome = DeliveryOutcome::TransportError(e.to_string());
                for push_match in &self.matches {
                    self.handler.handle(&outcome, push_match).await;
                }
                return;
            }
        };

        if response.results.len() != self.matches.len() {
            warn!(
                expected = self.matches.len(),
                actual = response.results.len(),
                "FCM result count does not match registration ids"
            );
        }
        for (i, push_match) in self.matches.iter().enumerate() {
            let Some(result) = response.results.get(i) else {
                let outcome = DeliveryOutcome::TransportError("No FCM result".into());
                self.handler.handle(&outcome, push_match).await;
                continue;
            };
            self.handler.handle(&result.outcome(), push_match).await;
            if let Some(canonical) = result.canonical_id(&push_match.token.value) {
                self.handler.replace_token(push_match, canonical).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fcm::client::{FcmResult, MulticastResponse};
    use crate::response::{DeadTokenPolicy, PruneScope};
    use crate::testing::RecordingStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pns_core::{PushError, PushResult, Token};
    use serde_json::json;

    struct StubProvider {
        response: PushResult<MulticastResponse>,
        sent: Mutex<Vec<Value>>,
    }

    impl StubProvider {
        fn new(response: PushResult<MulticastResponse>) -> Arc<Self> {
            Arc::new(Self {
                response,
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl FcmProvider for StubProvider {
        async fn send(&self, body: &Value) -> PushResult<MulticastResponse> {
            self.sent.lock().push(body.clone());
            self.response.clone()
        }
    }

    fn push_match(token: &str) -> PushMatch {
        PushMatch {
            user_id: 3,
            context_id: 1,
            client: "android".into(),
            topic: "ox:mail:new".into(),
            transport_id: "fcm".into(),
            token: Token::new(token),
        }
    }

    fn task(tokens: &[&str], provider: &Arc<StubProvider>, store: &Arc<RecordingStore>) -> FcmDeliveryTask {
        let message = json!({"notification": {"icon": "ic_mail"}});
        FcmDeliveryTask {
            notification: Arc::new(PushNotification::new("ox:mail:new", 3, 1)),
            matches: tokens.iter().map(|t| push_match(t)).collect(),
            message: Arc::new(message.as_object().cloned().unwrap_or_default()),
            provider: Arc::clone(provider) as _,
            handler: Arc::new(
                ResponseHandler::new("fcm", Arc::clone(store) as _, DeadTokenPolicy::fcm_default())
                    .with_scope(PruneScope::Token),
            ),
        }
    }

    fn result(message_id: Option<&str>, registration_id: Option<&str>, error: Option<&str>) -> FcmResult {
        FcmResult {
            message_id: message_id.map(Into::into),
            registration_id: registration_id.map(Into::into),
            error: error.map(Into::into),
        }
    }

    #[tokio::test]
    async fn test_results_are_applied_in_order() {
        let provider = StubProvider::new(Ok(MulticastResponse {
            success: 2,
            failure: 2,
            canonical_ids: 1,
            results: vec![
                result(Some("0:1"), None, None),
                result(Some("0:2"), Some("reg-canonical"), None),
                result(None, None, Some("NotRegistered")),
                result(None, None, Some("Unavailable")),
            ],
        }));
        let store = Arc::new(RecordingStore::default());

        task(&["reg-a", "reg-b", "reg-c", "reg-d"], &provider, &store)
            .run()
            .await;

        let sent = provider.sent.lock();
        assert_eq!(sent[0]["registration_ids"], json!(["reg-a", "reg-b", "reg-c", "reg-d"]));
        assert_eq!(sent[0]["notification"]["icon"], "ic_mail");

        let updated = store.updated();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].0.token, "reg-b");
        assert_eq!(updated[0].1, "reg-canonical");
        assert_eq!(store.removed_tokens(), vec![("reg-c".to_string(), "fcm".to_string())]);
    }

    #[tokio::test]
    async fn test_failed_request_keeps_registrations() {
        let provider = StubProvider::new(Err(PushError::io("connection refused")));
        let store = Arc::new(RecordingStore::default());

        task(&["reg-a", "reg-b"], &provider, &store).run().await;

        assert_eq!(store.attempts(), 0);
        assert!(store.updated().is_empty());
    }

    #[tokio::test]
    async fn test_missing_results_keep_registrations() {
        let provider = StubProvider::new(Ok(MulticastResponse {
            results: vec![result(None, None, Some("NotRegistered"))],
            ..Default::default()
        }));
        let store = Arc::new(RecordingStore::default());

        task(&["reg-a", "reg-b"], &provider, &store).run().await;

        assert_eq!(store.removed_tokens().len(), 1);
        assert_eq!(store.removed_tokens()[0].0, "reg-a");
    }
}
