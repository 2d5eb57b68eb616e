use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use reqwest::Client;
use tracing::{debug, warn};

use super::sse::SseDecoder;
use super::{GenerateContentRequest, GenerateContentResponse};
use crate::config::Config;
use crate::error::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Stream of partial responses from `streamGenerateContent`.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<GenerateContentResponse>> + Send>>;

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Build a client from the resolved API key. A missing key is reported
    /// here, before any request is attempted.
    pub fn from_config(config: &Config) -> Result<Self> {
        let key = config.resolve_api_key().ok_or(Error::MissingApiKey)?;
        Ok(Self::new(&key))
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, method)
    }

    async fn post(&self, url: &str, request: &GenerateContentRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(status, "Gemini request rejected");
            return Err(Error::Api { status, body });
        }

        Ok(response)
    }

    pub async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        let url = self.endpoint(model, "generateContent");
        debug!(model, turns = request.contents.len(), "generateContent");

        let response = self.post(&url, request).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn stream_generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<ResponseStream> {
        let url = format!("{}?alt=sse", self.endpoint(model, "streamGenerateContent"));
        debug!(model, turns = request.contents.len(), "streamGenerateContent");

        let response = self.post(&url, request).await?;
        Ok(decode_sse_stream(response.bytes_stream()))
    }
}

struct SseState<S> {
    bytes: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

/// Turn a byte stream carrying server-sent events into parsed responses.
/// The first transport or parse error ends the stream.
pub fn decode_sse_stream<S, B, E>(bytes: S) -> ResponseStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<Error> + Send + 'static,
{
    let state = SseState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    let stream = futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(payload) = state.pending.pop_front() {
                if payload.trim() == "[DONE]" {
                    continue;
                }
                return match serde_json::from_str::<GenerateContentResponse>(&payload) {
                    Ok(response) => Some((Ok(response), state)),
                    Err(e) => {
                        state.finished = true;
                        state.pending.clear();
                        Some((Err(Error::from(e)), state))
                    }
                };
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(chunk.as_ref());
                    state.pending.extend(events);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.finished = true;
                    state.pending.extend(state.decoder.finish());
                }
            }
        }
    });

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn chunk(text: &str) -> std::result::Result<Vec<u8>, Error> {
        Ok(text.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_decode_sse_stream_yields_responses_in_order() {
        let body = vec![
            chunk("data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}]}}]}\r\n\r\n"),
            chunk("data: {\"candidates\":[{\"content\":{\"parts\":[{\"te"),
            chunk("xt\":\"lo\"}]}}]}\r\n\r\n"),
        ];

        let responses: Vec<_> = decode_sse_stream(stream::iter(body)).collect().await;
        let texts: Vec<String> = responses
            .into_iter()
            .map(|r| r.unwrap().text().unwrap())
            .collect();
        assert_eq!(texts, vec!["Hel".to_string(), "lo".to_string()]);
    }

    #[tokio::test]
    async fn test_decode_sse_stream_stops_after_transport_error() {
        let body = vec![
            chunk("data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}]}}]}\n\n"),
            Err(Error::Api { status: 503, body: "connection reset".to_string() }),
            chunk("data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"lo\"}]}}]}\n\n"),
        ];

        let responses: Vec<_> = decode_sse_stream(stream::iter(body)).collect().await;
        assert_eq!(responses.len(), 2);
        assert!(responses[0].is_ok());
        assert!(responses[1].is_err());
    }

    #[tokio::test]
    async fn test_decode_sse_stream_reports_malformed_event() {
        let body = vec![chunk("data: {not json}\n\n")];
        let responses: Vec<_> = decode_sse_stream(stream::iter(body)).collect().await;
        assert_eq!(responses.len(), 1);
        assert!(matches!(responses[0], Err(Error::Decode(_))));
    }

    #[test]
    fn test_missing_key_fails_before_any_request() {
        let config = Config::default();
        // Environment may carry a key on developer machines
        if config.resolve_api_key().is_none() {
            assert!(matches!(GeminiClient::from_config(&config), Err(Error::MissingApiKey)));
        }
    }

    #[test]
    fn test_endpoint_format() {
        let client = GeminiClient::new("k").with_base_url("http://localhost:8080/v1beta/");
        assert_eq!(
            client.endpoint("gemini-3-pro-preview", "generateContent"),
            "http://localhost:8080/v1beta/models/gemini-3-pro-preview:generateContent"
        );
    }
}
