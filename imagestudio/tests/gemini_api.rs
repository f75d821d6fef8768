use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use imagestudio::client::{GeminiClient, GenerateError, ImageGenerator};
use imagestudio::config::StudioConfig;
use imagestudio::controller::{StudioController, KEY_ERROR_MESSAGE};
use imagestudio::key_selection::{ApiKeyStore, KeyCapability, KeySelector};
use imagestudio::settings::{ImageModel, SettingsPatch};
use serde_json::{json, Value};

const PNG_B64: &str = "iVBORw0KGgo=";

#[derive(Debug, Clone)]
struct RecordedRequest {
    call: String,
    api_key: Option<String>,
    body: Value,
}

#[derive(Clone, Default)]
struct MockGemini {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockGemini {
    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Behaviour is picked by the API key so one server covers every case.
async fn generate_content(
    State(mock): State<MockGemini>,
    Path(call): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, String) {
    let api_key = headers
        .get("x-goog-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    mock.requests.lock().unwrap().push(RecordedRequest {
        call,
        api_key: api_key.clone(),
        body,
    });

    match api_key.as_deref() {
        Some("good") => (
            StatusCode::OK,
            json!({
                "candidates": [{
                    "content": { "parts": [
                        { "text": "Here is your image." },
                        { "inlineData": { "mimeType": "image/png", "data": PNG_B64 } }
                    ]},
                    "finishReason": "STOP"
                }]
            })
            .to_string(),
        ),
        Some("chatty") => (
            StatusCode::OK,
            json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "I only speak words." }] },
                    "finishReason": "STOP"
                }]
            })
            .to_string(),
        ),
        Some("overloaded") => (StatusCode::SERVICE_UNAVAILABLE, "overloaded".to_string()),
        _ => (
            StatusCode::NOT_FOUND,
            json!({
                "error": {
                    "code": 404,
                    "message": "Requested entity was not found.",
                    "status": "NOT_FOUND"
                }
            })
            .to_string(),
        ),
    }
}

async fn spawn_mock() -> (String, MockGemini) {
    let mock = MockGemini::default();
    let router = Router::new()
        .route("/v1beta/models/:call", post(generate_content))
        .with_state(mock.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    (format!("http://{addr}/v1beta"), mock)
}

fn config_for(api_base: &str, api_key: Option<&str>) -> StudioConfig {
    StudioConfig {
        api_base: api_base.to_string(),
        api_key: api_key.map(str::to_string),
        request_timeout_secs: 10,
        output_dir: None,
    }
}

struct StoreSelector {
    store: ApiKeyStore,
    replacement: String,
}

#[async_trait]
impl KeySelector for StoreSelector {
    async fn has_selected_api_key(&self) -> bool {
        self.store.is_set().await
    }

    async fn open_select_key(&self) {
        self.store.set(self.replacement.clone()).await;
    }
}

#[tokio::test]
async fn generation_lands_in_history() {
    let (api_base, mock) = spawn_mock().await;
    let client = GeminiClient::new(&config_for(&api_base, Some("good")), ApiKeyStore::new()).expect("client");
    let mut controller = StudioController::new(KeyCapability::Unavailable);
    controller.change_model(ImageModel::Pro).await;
    controller.change_settings(SettingsPatch {
        prompt: Some("a cat".into()),
        use_search: Some(true),
        ..Default::default()
    });

    controller.generate(&client).await;

    assert_eq!(controller.error(), None);
    let history = controller.history().items();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].prompt, "a cat");
    assert_eq!(history[0].src, format!("data:image/png;base64,{PNG_B64}"));

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].call, "gemini-3-pro-image-preview:generateContent");
    assert_eq!(requests[0].api_key.as_deref(), Some("good"));
    assert_eq!(requests[0].body["contents"][0]["parts"][0]["text"], json!("a cat"));
    assert_eq!(requests[0].body["generationConfig"]["imageConfig"]["imageSize"], json!("1K"));
    assert_eq!(requests[0].body["tools"], json!([{ "googleSearch": {} }]));
}

#[tokio::test]
async fn revoked_key_reprompts_and_recovers() {
    let (api_base, mock) = spawn_mock().await;
    let store = ApiKeyStore::new();
    store.set("revoked").await;
    let client = GeminiClient::new(&config_for(&api_base, None), store.clone()).expect("client");
    let mut controller = StudioController::new(KeyCapability::available(StoreSelector {
        store: store.clone(),
        replacement: "good".into(),
    }));
    controller.change_model(ImageModel::Pro).await;
    assert!(controller.is_key_ready());
    controller.change_settings(SettingsPatch::prompt("a cat"));

    controller.generate(&client).await;

    assert_eq!(controller.error(), Some(KEY_ERROR_MESSAGE));
    assert!(!controller.is_key_ready());
    assert!(controller.is_key_prompt_open());
    assert!(controller.history().is_empty());

    controller.generate(&client).await;
    assert_eq!(mock.requests().len(), 1, "blocked until a key is re-selected");

    controller.select_api_key().await;
    controller.generate(&client).await;
    assert_eq!(controller.error(), None);
    assert_eq!(controller.history().len(), 1);
    assert_eq!(mock.requests()[1].api_key.as_deref(), Some("good"));
}

#[tokio::test]
async fn client_reports_api_message_verbatim() {
    let (api_base, _mock) = spawn_mock().await;
    let client = GeminiClient::new(&config_for(&api_base, Some("revoked")), ApiKeyStore::new()).expect("client");
    let mut controller = StudioController::new(KeyCapability::Unavailable);
    controller.change_settings(SettingsPatch::prompt("a cat"));
    let settings = controller.settings().clone();

    let err = client.generate_image(&settings).await.expect_err("404");
    assert!(matches!(err, GenerateError::Api { status: 404, .. }));
    assert!(err.is_entity_not_found());
    assert_eq!(err.to_string(), "Requested entity was not found.");
}

#[tokio::test]
async fn other_failures_surface_generic_message() {
    let (api_base, _mock) = spawn_mock().await;

    let client = GeminiClient::new(&config_for(&api_base, Some("chatty")), ApiKeyStore::new()).expect("client");
    let mut controller = StudioController::new(KeyCapability::Unavailable);
    controller.change_settings(SettingsPatch::prompt("a cat"));
    controller.generate(&client).await;
    assert_eq!(
        controller.error(),
        Some("Failed to generate image: No image was returned by the model. I only speak words.")
    );
    assert!(!controller.is_loading());

    let client = GeminiClient::new(&config_for(&api_base, Some("overloaded")), ApiKeyStore::new()).expect("client");
    controller.generate(&client).await;
    assert_eq!(controller.error(), Some("Failed to generate image: overloaded"));
    assert!(!controller.is_key_prompt_open());
    assert!(controller.history().is_empty());
}
