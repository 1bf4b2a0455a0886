//! Line-delimited JSON command interface.
//!
//! Each input line holds one command object tagged by `command`; each
//! command is answered by exactly one reply line.

use pns_config::ConfigSource;
use pns_core::{
    PushNotification, PushSubscription, PushSubscriptionStore, RegistrationResult,
    SubscriptionDescription,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::bootstrap::PushService;

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Subscribe(PushSubscription),
    Unsubscribe(SubscriptionDescription),
    Notify(PushNotification),
    Subscriptions { user_id: i32, context_id: i32 },
    Reload,
}

/// Execute a single command line and build its reply
pub async fn handle_line(service: &PushService, line: &str) -> Value {
    let command: Command = match serde_json::from_str(line) {
        Ok(command) => command,
        Err(e) => {
            warn!(error = %e, "Rejected malformed command");
            return failure(format!("Malformed command: {e}"));
        }
    };
    debug!(?command, "Handling command");

    match command {
        Command::Subscribe(subscription) => {
            match service
                .store
                .register(subscription, service.restrictions())
                .await
            {
                Ok(RegistrationResult::Created) => json!({"ok": true, "result": "created"}),
                Ok(RegistrationResult::Updated) => json!({"ok": true, "result": "updated"}),
                Ok(RegistrationResult::Conflict {
                    user_id,
                    context_id,
                }) => json!({
                    "ok": false,
                    "error": "Token already registered by another user",
                    "user_id": user_id,
                    "context_id": context_id,
                }),
                Err(e) => failure(e.to_string()),
            }
        }
        Command::Unsubscribe(description) => match service.store.unregister(&description).await {
            Ok(removed) => json!({"ok": true, "removed": removed}),
            Err(e) => failure(e.to_string()),
        },
        Command::Notify(notification) => {
            let report = service.dispatcher.dispatch(notification).await;
            json!({
                "ok": true,
                "matched": report.matched,
                "disabled": report.disabled,
                "submitted": report.submitted,
            })
        }
        Command::Subscriptions {
            user_id,
            context_id,
        } => match service.store.subscriptions_for(user_id, context_id).await {
            Ok(subscriptions) => json!({"ok": true, "subscriptions": subscriptions}),
            Err(e) => failure(e.to_string()),
        },
        Command::Reload => match service.manager.reload(ConfigSource::Api) {
            Ok(changed) => json!({"ok": true, "changed": changed}),
            Err(e) => failure(e.to_string()),
        },
    }
}

fn failure(message: String) -> Value {
    json!({"ok": false, "error": message})
}

/// Serve commands until the reader is exhausted
pub async fn run<R, W>(service: &PushService, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let reply = handle_line(service, line).await;
        let mut out = reply.to_string();
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pns_config::{AppConfig, ConfigurationManager};
    use std::sync::Arc;

    fn service(config: AppConfig) -> PushService {
        let manager = Arc::new(ConfigurationManager::with_config("unused.toml", config));
        PushService::build(manager).unwrap()
    }

    const SUBSCRIBE: &str = r#"{"command":"subscribe","user_id":3,"context_id":1,"token":{"value":"abc123"},"client":"mobile","transport_id":"apns","topics":["ox:mail:*"]}"#;

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let service = service(AppConfig::default());
        assert_eq!(handle_line(&service, SUBSCRIBE).await["result"], "created");
        assert_eq!(handle_line(&service, SUBSCRIBE).await["result"], "updated");
        assert_eq!(service.store.len(), 1);

        let listed = handle_line(
            &service,
            r#"{"command":"subscriptions","user_id":3,"context_id":1}"#,
        )
        .await;
        assert_eq!(listed["subscriptions"][0]["token"]["value"], "abc123");

        let reply = handle_line(
            &service,
            r#"{"command":"unsubscribe","user_id":3,"context_id":1,"token":"abc123","client":"mobile","transport_id":"apns"}"#,
        )
        .await;
        assert_eq!(reply["removed"], true);
        assert!(service.store.is_empty());
    }

    #[tokio::test]
    async fn test_shared_token_conflict() {
        let service = service(AppConfig::default());
        handle_line(&service, SUBSCRIBE).await;
        let other_user = SUBSCRIBE.replace(r#""user_id":3"#, r#""user_id":4"#);
        let reply = handle_line(&service, &other_user).await;
        assert_eq!(reply["ok"], false);
        assert_eq!(reply["user_id"], 3);
    }

    #[tokio::test]
    async fn test_notify_without_transports() {
        let service = service(AppConfig::default());
        handle_line(&service, SUBSCRIBE).await;
        let reply = handle_line(
            &service,
            r#"{"command":"notify","topic":"ox:mail:new","user_id":3,"context_id":1}"#,
        )
        .await;
        assert_eq!(reply["ok"], true);
        assert_eq!(reply["submitted"], 0);
    }

    #[tokio::test]
    async fn test_malformed_lines_are_answered() {
        let service = service(AppConfig::default());
        let input = b"not json\n\n{\"command\":\"launch\"}\n".to_vec();
        let mut output = Vec::new();
        run(&service, input.as_slice(), &mut output).await.unwrap();

        let replies: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(|r| r["ok"] == false));
    }
}
