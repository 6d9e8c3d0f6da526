//! Classifier boundary: `POST /analyze`.
//!
//! A stateless request translator in front of the Gemini API. It attaches
//! a fixed system instruction, forwards the caller's chunk, demands a
//! schema-constrained JSON reply, parses it, and passes it through
//! unmodified. No retries; a missing `GEMINI_API_KEY` turns every request
//! into a 500 until fixed.

use std::net::SocketAddr;
use std::sync::OnceLock;

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

const GEMINI_API_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-preview-09-2025:generateContent";

const SYSTEM_PROMPT: &str = r#"
You are 'Clarity', an expert AI assistant specialized in real-time call analysis.
Your job is to analyze the user-provided 'newChunk' of a conversation.

You must do TWO things:
1.  **Analyze for Alerts:** Identify ANY instances of THREE specific categories *within this chunk*:
    * **PRESSURE:** Language creating urgency, fear, or manipulation.
    * **JARGON:** Complex or technical terms.
    * **MULTI_QUESTION:** A single sentence asking two or more questions.
2.  **Summarize Chunk:** Provide a very concise, 1-sentence summary of *only this chunk*.

You MUST respond with a JSON object that matches this exact schema:
{
  "alerts": [
    {
      "type": "PRESSURE" | "JARGON" | "MULTI_QUESTION",
      "title": "Alert Title",
      "message": "A simple one-sentence explanation.",
      "suggestion": "A short, actionable tip for the user."
    }
  ],
  "summaryChunk": "A 1-sentence summary of *only* the new chunk."
}

- For **PRESSURE**, the title should be "Pressure Tactic Detected".
- For **JARGON**, the title should be "Jargon: '[The Term]'".
- For **MULTI_QUESTION**, the title should be "Multi-Part Question".

- If you find *no* issues, return an empty array: { "alerts": [] }
- The summaryChunk must *always* be provided.

**Example Request:**
{ "newChunk": "This is a final notice, your account will be suspended. What is your name and date of birth?" }

**Example Response:**
{
  "alerts": [
    {
      "type": "PRESSURE",
      "title": "Pressure Tactic Detected",
      "message": "The speaker is using urgency and threatening a negative consequence.",
      "suggestion": "I will not be rushed. I will hang up and verify this myself."
    },
    {
      "type": "MULTI_QUESTION",
      "title": "Multi-Part Question",
      "message": "The speaker asked for two pieces of information at once.",
      "suggestion": "You can ask: 'Can you please ask for that one at a time?'"
    }
  ],
  "summaryChunk": "The speaker gave a 'final notice' and asked for the user's name and date of birth."
}
"#;

static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| Client::builder().build().expect("Failed to build HTTP client"))
}

#[derive(Debug, Deserialize)]
struct AnalyzeBody {
    #[serde(rename = "newChunk", default)]
    new_chunk: Option<String>,
}

pub fn router() -> Router {
    // Non-POST methods on the route answer 405 via axum's method routing.
    Router::new().route("/analyze", post(analyze))
}

/// Bind and serve the proxy until the process exits.
pub async fn serve(addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Analyze proxy listening on {}", addr);
    axum::serve(listener, router()).await
}

async fn analyze(Json(body): Json<AnalyzeBody>) -> (StatusCode, Json<Value>) {
    let Some(chunk) = body.new_chunk.filter(|c| !c.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "newChunk is required" })),
        );
    };

    let api_key = match std::env::var("GEMINI_API_KEY") {
        Ok(key) if !key.is_empty() => key,
        _ => {
            log::error!("GEMINI_API_KEY not set, refusing analyze request");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Server configuration error: GEMINI_API_KEY not set" })),
            );
        }
    };

    let response = match http_client()
        .post(GEMINI_API_URL)
        .query(&[("key", api_key.as_str())])
        .json(&gemini_request(&chunk))
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            log::error!("Error reaching Gemini: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to get response from AI" })),
            );
        }
    };

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        log::error!("Gemini API error ({}): {}", status, body);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Failed to get response from AI" })),
        );
    }

    let data: Value = match response.json().await {
        Ok(data) => data,
        Err(e) => {
            log::error!("Failed to read Gemini response: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Invalid AI response structure" })),
            );
        }
    };

    match extract_analysis(&data) {
        Ok(analysis) => (StatusCode::OK, Json(analysis)),
        Err(message) => {
            log::error!("Invalid Gemini response: {}", data);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": message })),
            )
        }
    }
}

/// The generateContent payload: system instruction, the caller's chunk,
/// and a response schema constraining the reply to the alert contract.
fn gemini_request(chunk: &str) -> Value {
    json!({
        "systemInstruction": {
            "parts": [{ "text": SYSTEM_PROMPT }],
        },
        "contents": [
            {
                "role": "user",
                "parts": [{ "text": chunk }],
            }
        ],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "OBJECT",
                "properties": {
                    "alerts": {
                        "type": "ARRAY",
                        "items": {
                            "type": "OBJECT",
                            "properties": {
                                "type": { "type": "STRING" },
                                "title": { "type": "STRING" },
                                "message": { "type": "STRING" },
                                "suggestion": { "type": "STRING" },
                            },
                            "required": ["type", "title", "message", "suggestion"],
                        },
                    },
                    "summaryChunk": { "type": "STRING" }
                },
                "required": ["alerts", "summaryChunk"],
            },
            "temperature": 0.1,
        },
    })
}

/// Pull the schema-constrained JSON text out of the first candidate and
/// parse it. The result is passed through to the caller unmodified.
fn extract_analysis(data: &Value) -> Result<Value, &'static str> {
    let text = data
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.get(0))
        .and_then(|p| p.get("text"))
        .and_then(|t| t.as_str())
        .ok_or("Invalid AI response structure")?;

    serde_json::from_str(text).map_err(|_| "Invalid AI response structure")
}
