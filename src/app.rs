use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::channel::{self, WhatsAppCloudChannel};
use crate::config::{AppConfig, WhatsAppConfig};
use crate::dispatch::{Dispatcher, SendOptions, SendOutcome};
use crate::error::{Error, Result};
use crate::llm::OpenAiModel;
use crate::ports::{
    ChannelConnection, ConversationStore, LanguageModel, LeadStore, LiveBus, ReservationDesk,
    TravelSearch,
};
use crate::quote::{windows::WeekdayPatternPolicy, QuoteProcessor, QuoteQueue};
use crate::realtime::RealtimeHub;
use crate::scheduler::AssistantScheduler;
use crate::search::HttpTravelSearch;
use crate::sequencer::Sequencer;
use crate::store::PgStore;
use crate::types::{InboundRecord, MediaKind, MediaRef};

const DEFAULT_AGENT_LABEL: &str = "Asesor";

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Concrete collaborators handed to [`assemble`].
pub struct Adapters {
    pub channel: Arc<dyn ChannelConnection>,
    pub store: Arc<dyn ConversationStore>,
    pub leads: Arc<dyn LeadStore>,
    pub reservations: Arc<dyn ReservationDesk>,
    pub model: Arc<dyn LanguageModel>,
    pub search: Arc<dyn TravelSearch>,
}

pub struct AppState {
    whatsapp: WhatsAppConfig,
    channel: Arc<dyn ChannelConnection>,
    store: Arc<dyn ConversationStore>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<AssistantScheduler>,
    realtime: Arc<RealtimeHub>,
}

/// Wires the assistant core together and starts the quote worker.
pub fn assemble(config: &AppConfig, adapters: Adapters) -> Arc<AppState> {
    let realtime = Arc::new(RealtimeHub::default());
    let bus: Arc<dyn LiveBus> = realtime.clone();

    let dispatcher = Arc::new(Dispatcher::new(
        adapters.channel.clone(),
        adapters.store.clone(),
        bus.clone(),
        config.assistant.dedupe_window,
    ));

    let (quotes, jobs) = QuoteQueue::channel();
    let processor = Arc::new(QuoteProcessor::new(
        dispatcher.clone(),
        adapters.search,
        adapters.leads,
        bus.clone(),
        Arc::new(WeekdayPatternPolicy::default()),
        config.quote.clone(),
        config.pacing.clone(),
        config.retry.clone(),
    ));
    tokio::spawn(processor.run(jobs));

    let sequencer = Arc::new(Sequencer::new(
        dispatcher.clone(),
        bus,
        adapters.reservations,
        quotes,
        config.pacing.clone(),
    ));
    let scheduler = Arc::new(AssistantScheduler::new(
        adapters.store.clone(),
        adapters.model,
        sequencer,
        config.assistant.clone(),
        config.retry.clone(),
    ));

    Arc::new(AppState {
        whatsapp: config.whatsapp.clone(),
        channel: adapters.channel,
        store: adapters.store,
        dispatcher,
        scheduler,
        realtime,
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/webhooks/whatsapp",
            get(whatsapp_webhook_verify).post(whatsapp_webhook_event),
        )
        .route("/api/chats/{phone}/messages", post(post_agent_message))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "now": now_iso(),
        "channelReady": state.channel.is_ready(),
        "activeTurns": state.scheduler.active_turns().await,
        "liveClients": state.realtime.client_count().await,
    }))
}

async fn whatsapp_webhook_verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let mode = params.get("hub.mode").map(String::as_str).unwrap_or("");
    let verify_token = params
        .get("hub.verify_token")
        .map(String::as_str)
        .unwrap_or("");
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();
    let expected = state.whatsapp.verify_token.as_str();

    if mode == "subscribe" && !challenge.is_empty() && !expected.is_empty() && verify_token == expected {
        return (StatusCode::OK, challenge).into_response();
    }

    (
        StatusCode::FORBIDDEN,
        Json(json!({ "error": "invalid webhook verification token" })),
    )
        .into_response()
}

async fn whatsapp_webhook_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature_header = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok());
    if !channel::verify_signature(&state.whatsapp.app_secret, signature_header, &body) {
        warn!("whatsapp webhook rejected: bad signature");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid webhook signature" })),
        )
            .into_response();
    }

    let payload = serde_json::from_slice::<Value>(&body).unwrap_or_else(|_| json!({}));
    let messages = channel::inbound_messages(&payload, &state.whatsapp.phone_number_id);

    let mut processed = 0usize;
    for message in messages {
        let record = InboundRecord {
            id: Uuid::new_v4().to_string(),
            recipient: message.from.clone(),
            display_name: message.profile_name.clone(),
            text: message.text.clone(),
            channel_message_id: message.message_id.clone(),
            created_at: Utc::now(),
        };
        match state.store.append_inbound(&record).await {
            Ok(true) => {}
            Ok(false) => {
                info!(
                    recipient = %record.recipient,
                    channel_message_id = ?record.channel_message_id,
                    "redelivered webhook message ignored"
                );
                continue;
            }
            Err(err) => {
                warn!(recipient = %record.recipient, error = %err, "inbound message could not be stored");
                continue;
            }
        }
        state
            .realtime
            .publish(
                "message:new",
                json!({ "recipient": record.recipient, "message": record }),
            )
            .await;
        state
            .scheduler
            .schedule(&record.recipient, record.display_name.as_deref())
            .await;
        processed += 1;
    }

    (
        StatusCode::OK,
        Json(json!({ "received": true, "processed": processed })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentMessageBody {
    #[serde(default)]
    text: String,
    #[serde(default)]
    media_url: Option<String>,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    agent_name: Option<String>,
}

async fn post_agent_message(
    State(state): State<Arc<AppState>>,
    Path(phone): Path<String>,
    Json(body): Json<AgentMessageBody>,
) -> impl IntoResponse {
    let Some(recipient) = channel::normalize_phone(&phone) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid phone number" })),
        )
            .into_response();
    };

    let media = body
        .media_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(|url| MediaRef {
            url: url.to_string(),
            kind: body
                .media_type
                .as_deref()
                .and_then(MediaKind::parse)
                .unwrap_or(MediaKind::Image),
        });
    let label = body
        .agent_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_AGENT_LABEL);

    let outcome = state
        .dispatcher
        .send(
            &recipient,
            &body.text,
            media,
            body.file_name.as_deref(),
            SendOptions::agent(label),
        )
        .await;

    match outcome {
        Ok(SendOutcome::Sent { message_id }) => (
            StatusCode::OK,
            Json(json!({ "ok": true, "messageId": message_id })),
        )
            .into_response(),
        Ok(SendOutcome::Suppressed) => (
            StatusCode::OK,
            Json(json!({ "ok": true, "suppressed": true })),
        )
            .into_response(),
        Ok(SendOutcome::Empty) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "text or mediaUrl is required" })),
        )
            .into_response(),
        Err(Error::ChannelNotReady) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "whatsapp channel not ready" })),
        )
            .into_response(),
        Err(err) => {
            warn!(recipient = %recipient, error = %err, "agent message failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (client_id, mut rx) = state.realtime.register().await;
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    state
        .realtime
        .emit_to_client(
            client_id,
            "ready",
            json!({ "channelReady": state.channel.is_ready() }),
        )
        .await;

    while let Some(Ok(message)) = ws_receiver.next().await {
        let text = match message {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(envelope) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        if envelope.get("event").and_then(Value::as_str) == Some("ping") {
            state
                .realtime
                .emit_to_client(client_id, "pong", json!({ "now": now_iso() }))
                .await;
        }
    }

    state.realtime.unregister(client_id).await;
    send_task.abort();
}

pub async fn run(config: AppConfig) -> Result<()> {
    let http = reqwest::Client::new();
    let store = Arc::new(PgStore::connect(&config.database_url).await?);
    info!("postgres connected and migrated");

    let adapters = Adapters {
        channel: Arc::new(WhatsAppCloudChannel::new(
            http.clone(),
            config.whatsapp.clone(),
        )),
        store: store.clone(),
        leads: store.clone(),
        reservations: store,
        model: Arc::new(OpenAiModel::new(
            http.clone(),
            config.openai.clone(),
            config.assistant.agency_name.clone(),
            config.assistant.prompt_notes.clone(),
            config.quote.max_windows,
        )),
        search: Arc::new(HttpTravelSearch::new(http, config.search.clone())),
    };
    let app = router(assemble(&config, adapters));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(port = config.port, "agency chat server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    use super::*;
    use crate::fakes::{
        FakeChannel, FakeReservations, MemoryLeads, MemoryStore, ScriptedModel, ScriptedSearch,
    };

    struct Harness {
        state: Arc<AppState>,
        store: Arc<MemoryStore>,
        channel: Arc<FakeChannel>,
        model: Arc<ScriptedModel>,
    }

    fn harness() -> Harness {
        let mut config = AppConfig::default();
        config.whatsapp.app_secret = "s3cret".into();
        config.whatsapp.verify_token = "hola-token".into();
        config.whatsapp.phone_number_id = "1098".into();

        let store = Arc::new(MemoryStore::default());
        let channel = Arc::new(FakeChannel::default());
        let model = Arc::new(ScriptedModel::default());
        let state = assemble(
            &config,
            Adapters {
                channel: channel.clone(),
                store: store.clone(),
                leads: Arc::new(MemoryLeads::default()),
                reservations: Arc::new(FakeReservations::default()),
                model: model.clone(),
                search: Arc::new(ScriptedSearch::default()),
            },
        );
        Harness {
            state,
            store,
            channel,
            model,
        }
    }

    fn sign(body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(b"s3cret").unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn webhook_body(text: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "metadata": { "phone_number_id": "1098" },
                        "contacts": [{ "wa_id": "5215512345678", "profile": { "name": "Lucía" } }],
                        "messages": [{
                            "id": "wamid.in.1",
                            "from": "5215512345678",
                            "type": "text",
                            "text": { "body": text }
                        }]
                    }
                }]
            }]
        }))
        .unwrap()
    }

    fn query(pairs: &[(&str, &str)]) -> Query<HashMap<String, String>> {
        Query(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn verification_echoes_the_challenge_for_the_right_token() {
        let h = harness();
        let ok = whatsapp_webhook_verify(
            State(h.state.clone()),
            query(&[
                ("hub.mode", "subscribe"),
                ("hub.verify_token", "hola-token"),
                ("hub.challenge", "1158201444"),
            ]),
        )
        .await
        .into_response();
        assert_eq!(ok.status(), StatusCode::OK);

        let denied = whatsapp_webhook_verify(
            State(h.state),
            query(&[
                ("hub.mode", "subscribe"),
                ("hub.verify_token", "otro"),
                ("hub.challenge", "1158201444"),
            ]),
        )
        .await
        .into_response();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unsigned_webhooks_are_rejected() {
        let h = harness();
        let body = webhook_body("Hola");
        let response = whatsapp_webhook_event(State(h.state), HeaderMap::new(), Bytes::from(body))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(h.store.last_inbound_text("5215512345678").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn signed_webhook_starts_an_assistant_turn() {
        let h = harness();
        h.model.reply(&["¡Hola Lucía! ¿A dónde te gustaría viajar?"]);

        let body = webhook_body("Hola, quiero cotizar un viaje");
        let mut headers = HeaderMap::new();
        headers.insert("x-hub-signature-256", sign(&body).parse().unwrap());
        let response = whatsapp_webhook_event(State(h.state.clone()), headers, Bytes::from(body))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(h.state.scheduler.active_turns().await, 1);

        tokio::time::sleep(Duration::from_secs(60)).await;

        let calls = h.model.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "5215512345678");
        assert_eq!(calls[0].1, "Hola, quiero cotizar un viaje");
        assert_eq!(calls[0].2, "Lucía");
        assert_eq!(
            h.channel.transcript(),
            vec!["text:¡Hola Lucía! ¿A dónde te gustaría viajar?"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn redelivered_webhook_runs_one_turn() {
        let h = harness();
        h.model.reply(&["¡Claro! ¿Para cuántas personas?"]);
        h.model.reply(&["¡Claro! ¿Para cuántas personas?"]);

        let body = webhook_body("Quiero ir a Cancún en marzo");
        for expected in [1, 0] {
            let mut headers = HeaderMap::new();
            headers.insert("x-hub-signature-256", sign(&body).parse().unwrap());
            let response =
                whatsapp_webhook_event(State(h.state.clone()), headers, Bytes::from(body.clone()))
                    .await
                    .into_response();
            assert_eq!(response.status(), StatusCode::OK);
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let reply: Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(reply["processed"], expected);

            tokio::time::sleep(Duration::from_secs(60)).await;
        }

        assert_eq!(h.model.calls().len(), 1);
        assert_eq!(
            h.channel.transcript(),
            vec!["text:¡Claro! ¿Para cuántas personas?"]
        );
    }

    #[tokio::test]
    async fn agent_send_reports_unavailable_channel() {
        let h = harness();
        h.channel.set_ready(false);
        let response = post_agent_message(
            State(h.state),
            Path("+52 1 55 1234 5678".to_string()),
            Json(AgentMessageBody {
                text: "Te comparto la cotización".into(),
                media_url: None,
                media_type: None,
                file_name: None,
                agent_name: Some("Mariana".into()),
            }),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn agent_send_goes_out_as_the_agent() {
        let h = harness();
        let response = post_agent_message(
            State(h.state),
            Path("5215512345678".to_string()),
            Json(AgentMessageBody {
                text: "Te comparto el itinerario".into(),
                media_url: Some("https://cdn.example.com/itinerario.pdf".into()),
                media_type: Some("document".into()),
                file_name: None,
                agent_name: Some("Mariana".into()),
            }),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let outbound = h.store.outbound();
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].sender_label.as_deref(), Some("Mariana"));
        assert_eq!(
            h.channel.transcript(),
            vec!["document:https://cdn.example.com/itinerario.pdf"]
        );
    }
}
