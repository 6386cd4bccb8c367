// src/llm_extract.rs

use crate::config::GeminiSection;
use crate::error::ExtractError;
use crate::file_encode::EncodedFile;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// The prompt that instructs the model to read a receipt image into JSON.
const RECEIPT_PROMPT: &str = r#"You are an intelligent receipt parser.

From the provided image, extract all receipt fields and return strictly in this JSON format:

{
  "vendor": "string",
  "date": "YYYY-MM-DD",
  "amount": float,
  "category": "string",
  "bill_number": "string or null",
  "order_id": "string or null",
  "payment_method": "string or null",
  "payment_status": "Paid",
  "tax": float or null,
  "discount": float or null,
  "service_charge": float or null,
  "tip": float or null,
  "currency": "string (e.g., INR, USD, EUR, etc.) - must be detected from the receipt",
  "customer_name": "string or null",
  "customer_email": "string or null",
  "customer_phone": "string or null",
  "items": [
    {
      "name": "string",
      "quantity": float or null,
      "unit": "string or null",
      "price": float or null,
      "total": float or null
    }
  ] or null,
  "remarks": "string or null",
  "location": "string or null",
  "billing_address": "string or null",
  "shipping_address": "string or null"
}

Return only valid JSON. No explanation or markdown."#;

/// Anything that can turn an encoded receipt into the model's raw text reply.
#[async_trait]
pub trait ReceiptModel: Send + Sync {
    async fn complete(&self, file: &EncodedFile) -> Result<String, ExtractError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 2],
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ReplyPart>,
}

#[derive(Debug, Deserialize)]
struct ReplyPart {
    text: Option<String>,
}

/// Endpoint details with the credential checked.
struct ResolvedEndpoint<'a> {
    base_url: &'a str,
    model: &'a str,
    api_key: &'a str,
}

impl ResolvedEndpoint<'_> {
    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            urlencoding::encode(self.api_key)
        )
    }
}

fn resolve_endpoint(gemini: &GeminiSection) -> Result<ResolvedEndpoint<'_>, ExtractError> {
    let api_key = gemini
        .api_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .ok_or(ExtractError::MissingCredential)?;
    Ok(ResolvedEndpoint {
        base_url: &gemini.base_url,
        model: &gemini.model,
        api_key,
    })
}

/// Gemini `generateContent` client. One request per receipt, no retries.
pub struct GeminiClient {
    client: Client,
    gemini: GeminiSection,
}

impl GeminiClient {
    pub fn new(gemini: &GeminiSection) -> Result<Self, ExtractError> {
        let mut builder = Client::builder();
        if let Some(secs) = gemini.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            client: builder.build()?,
            gemini: gemini.clone(),
        })
    }
}

#[async_trait]
impl ReceiptModel for GeminiClient {
    async fn complete(&self, file: &EncodedFile) -> Result<String, ExtractError> {
        let endpoint = resolve_endpoint(&self.gemini)?;
        info!(model = %endpoint.model, payload_len = file.data.len(), "Calling Gemini");

        let request = GenerateRequest {
            contents: [Content {
                parts: [
                    Part::Text {
                        text: RECEIPT_PROMPT,
                    },
                    Part::Inline {
                        inline_data: InlineData {
                            mime_type: file.mime_type,
                            data: &file.data,
                        },
                    },
                ],
            }],
        };

        let response = self
            .client
            .post(endpoint.url())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(status = %status, "Gemini returned an error status");
            return Err(ExtractError::MalformedUpstreamResponse(format!(
                "status {status}: {}",
                snippet(&body)
            )));
        }

        let reply = reply_text(&body)?;
        debug!(reply = %reply, "Gemini raw output");
        Ok(reply)
    }
}

/// Pull `candidates[0].content.parts[0].text` out of a response envelope.
fn reply_text(body: &str) -> Result<String, ExtractError> {
    let envelope: GenerateResponse = serde_json::from_str(body).map_err(|e| {
        ExtractError::MalformedUpstreamResponse(format!("{e}: {}", snippet(body)))
    })?;

    envelope
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
        .ok_or_else(|| {
            ExtractError::MalformedUpstreamResponse(format!(
                "no candidate text in response: {}",
                snippet(body)
            ))
        })
}

fn snippet(body: &str) -> &str {
    match body.char_indices().nth(500) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
