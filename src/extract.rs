//! Extraction adapter.
//!
//! Wraps the opaque LLM extractor and absorbs all of its failure modes.
//! Whatever happens (no text, not an invoice, timeout, model error,
//! unparseable JSON) the adapter returns a well-shaped
//! [`ExtractionOutcome`] so downstream reconciliation and UI code never
//! need a null check. Only `success = true` means the fields came from the
//! model.

use crate::config::LlmSection;
use crate::reconcile::RawExtraction;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The prompt instructing the model to extract structured invoice fields.
const SYSTEM_PROMPT: &str = r#"Du bist ein spezialisierter KI-Assistent für die Extraktion von Daten aus deutschen Geschäftsrechnungen.
Extrahiere die folgenden Informationen aus dem Rechnungstext und gib sie in genau diesem JSON-Format zurück:

```json
{
    "Lieferantename": "Name des Unternehmens, das die Rechnung ausgestellt hat",
    "Rechnungsdatum": "Datum im Format DD.MM.YYYY oder YYYY-MM-DD",
    "Gesamtbetrag": "Betrag mit Währung, z.B. 1.234,56 EUR",
    "Empfängerfirma": "Name des Empfängerunternehmens",
    "Rechnungsnummer": "Rechnungsnummer/Kennung",
    "Mehrwertsteuerbetrag": "MwSt-Betrag mit Währung",
    "Leistungsbeschreibung": "Beschreibung der Waren oder Dienstleistungen"
}
```

Wichtige Hinweise:
1. Achte auf deutsche Datumsformate (oft TT.MM.JJJJ) und das deutsche Zahlenformat (Komma als Dezimaltrennzeichen, z.B. 1.234,56 €).
2. Die Mehrwertsteuer kann als "MwSt.", "USt.", "Umsatzsteuer" oder "19%" gekennzeichnet sein.
3. Die Rechnung kann "Rechnung", "Faktura" oder "Invoice" genannt werden.
4. Falls eine Information nicht gefunden werden kann, gib "Nicht gefunden" zurück.

Gib NUR das JSON zurück, ohne zusätzlichen Text davor oder danach."#;

/// Truncate very long invoice texts to stay within context limits.
const MAX_PROMPT_CHARS: usize = 12_000;

/// Keywords at least one of which must appear (case-insensitively) in the
/// extracted text for a document to be treated as an invoice at all.
const INVOICE_KEYWORDS: [&str; 3] = ["rechnung", "invoice", "faktura"];

/// Uniform result envelope for one extraction attempt.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub fields: RawExtraction,
    pub success: bool,
    pub error: Option<String>,
    /// The document was rejected before the model was even called.
    pub skipped: bool,
}

impl ExtractionOutcome {
    fn failure(fields: RawExtraction, error: impl Into<String>) -> Self {
        Self {
            fields,
            success: false,
            error: Some(error.into()),
            skipped: false,
        }
    }

    pub fn no_text() -> Self {
        Self::failure(RawExtraction::new(), "No text could be extracted from PDF")
    }

    pub fn not_an_invoice() -> Self {
        Self {
            fields: RawExtraction::new(),
            success: false,
            error: Some("Document does not appear to be an invoice".to_string()),
            skipped: true,
        }
    }

    fn timed_out(timeout: Duration) -> Self {
        Self::failure(
            placeholder_fields(
                "Not available - AI timeout",
                "AI processing timed out. Please input data manually.",
            ),
            format!("Model processing timed out after {} seconds", timeout.as_secs()),
        )
    }

    fn model_error(detail: &str) -> Self {
        Self::failure(
            placeholder_fields(
                "Not available - AI error",
                "AI processing error. Please input data manually.",
            ),
            format!("Error during model processing: {detail}"),
        )
    }

    fn parse_error(detail: &str) -> Self {
        Self::failure(
            placeholder_fields(
                "Not available - JSON parsing error",
                "Error parsing AI result. Please input data manually.",
            ),
            format!("Failed to parse JSON: {detail}"),
        )
    }

    fn success(fields: RawExtraction) -> Self {
        Self {
            fields,
            success: true,
            error: None,
            skipped: false,
        }
    }

    /// Full outcome as JSON, stored on the pending record for forensic
    /// replay.
    pub fn to_json(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert("success".to_string(), Value::Bool(self.success));
        if let Some(ref error) = self.error {
            map.insert("error".to_string(), Value::String(error.clone()));
        }
        if self.skipped {
            map.insert("skipped".to_string(), Value::Bool(true));
        }
        Value::Object(map)
    }
}

/// A failure record that still fills every canonical field, so the
/// validation form renders and the human can take over.
fn placeholder_fields(supplier_note: &str, description: &str) -> RawExtraction {
    let mut fields = RawExtraction::new();
    fields.insert("Lieferantename".into(), Value::String(supplier_note.into()));
    fields.insert("Rechnungsdatum".into(), Value::String(String::new()));
    fields.insert("Gesamtbetrag".into(), Value::String("0".into()));
    fields.insert("Empfängerfirma".into(), Value::String(String::new()));
    fields.insert("Rechnungsnummer".into(), Value::String(String::new()));
    fields.insert("Mehrwertsteuerbetrag".into(), Value::String("0".into()));
    fields.insert("Leistungsbeschreibung".into(), Value::String(description.into()));
    fields
}

/// Does the combined text (including any OCR output) look like an invoice?
pub fn looks_like_invoice(text: &str, ocr_text: &str) -> bool {
    let combined = format!("{text} {ocr_text}").to_lowercase();
    INVOICE_KEYWORDS.iter().any(|kw| combined.contains(kw))
}

/// The opaque model call. Implemented over HTTP in production; tests
/// inject fakes.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, BoxError>;
}

/// Runs the extractor with a hard wall-clock deadline.
pub struct Extractor {
    client: Arc<dyn ModelClient>,
    timeout: Duration,
}

impl Extractor {
    pub fn new(client: Arc<dyn ModelClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Extract structured fields from document text.
    ///
    /// The model call runs as a spawned task raced against the deadline.
    /// On expiry the task is abandoned rather than cancelled (the
    /// underlying extractor has no cooperative cancellation) and a
    /// placeholder failure record is returned immediately.
    pub async fn extract(&self, text: &str, ocr_text: &str) -> ExtractionOutcome {
        if text.trim().is_empty() && ocr_text.trim().is_empty() {
            warn!("no extractable text, flagging for manual input");
            return ExtractionOutcome::no_text();
        }
        if !looks_like_invoice(text, ocr_text) {
            info!("document contains no invoice keywords, skipping model call");
            return ExtractionOutcome::not_an_invoice();
        }

        let prompt = build_prompt(if text.trim().is_empty() { ocr_text } else { text });
        let client = Arc::clone(&self.client);
        let task = tokio::spawn(async move { client.complete(&prompt).await });

        match tokio::time::timeout(self.timeout, task).await {
            Err(_) => {
                warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "model call timed out, abandoning task"
                );
                ExtractionOutcome::timed_out(self.timeout)
            }
            Ok(Err(join_error)) => {
                warn!(error = %join_error, "model task failed");
                ExtractionOutcome::model_error(&join_error.to_string())
            }
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "model call failed");
                ExtractionOutcome::model_error(&e.to_string())
            }
            Ok(Ok(Ok(content))) => parse_model_output(&content),
        }
    }
}

fn build_prompt(text: &str) -> String {
    let text: String = text.chars().take(MAX_PROMPT_CHARS).collect();
    format!("{SYSTEM_PROMPT}\n\nINVOICE TEXT:\n{text}")
}

/// Parse the model's reply into a field bag, tolerating markdown fences
/// and surrounding prose.
fn parse_model_output(content: &str) -> ExtractionOutcome {
    let stripped = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let Some(json_str) = extract_json_object(stripped) else {
        return ExtractionOutcome::parse_error("no JSON object found in model response");
    };

    match serde_json::from_str::<Value>(json_str) {
        Ok(Value::Object(fields)) => {
            info!(fields = fields.len(), "model extraction successful");
            ExtractionOutcome::success(fields)
        }
        Ok(_) => ExtractionOutcome::parse_error("model response is not a JSON object"),
        Err(e) => ExtractionOutcome::parse_error(&e.to_string()),
    }
}

/// Extract the outermost JSON object from a string that may contain
/// surrounding text (e.g. thinking tokens).
fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&s[start..=end])
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI-compatible chat-completions client (Ollama and friends).
pub struct HttpModelClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f64,
}

impl HttpModelClient {
    pub fn new(llm: &LlmSection) -> Self {
        Self {
            client: Client::new(),
            base_url: llm.base_url.clone(),
            model: llm.model.clone(),
            // Required by the API shape even for local backends.
            api_key: llm.api_key.clone().unwrap_or_else(|| "ollama".to_string()),
            temperature: llm.temperature,
        }
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn complete(&self, prompt: &str) -> Result<String, BoxError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.temperature,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("LLM API error {status}: {body}").into());
        }

        let chat_response: ChatResponse = response.json().await?;
        let content = chat_response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or("Empty response from LLM")?;
        Ok(content)
    }
}
