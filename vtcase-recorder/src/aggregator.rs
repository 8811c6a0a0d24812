//! Collects captured exchanges from every proxied connection, orders them
//! chronologically, and turns the raw bytes into decompressed
//! `ParsedExchange`s ready for the canonicalizer.
//!
//! Grounded on `sort_recorded_data_chronologically` in
//! `original_source/vts-qa-recorder/vts-recording/recorder.py`.

use crate::capture::CapturedExchange;
use std::time::SystemTime;
use vtcase_http::{HttpRequest, HttpResponse};
use vtcase_model::ParsedExchange;

#[derive(thiserror::Error, Debug)]
pub enum AggregatorError {
    #[error("failed to parse captured request: {0}")]
    Request(#[source] vtcase_http::MessageError),
    #[error("failed to parse captured response: {0}")]
    Response(#[source] vtcase_http::MessageError),
    #[error("failed to decode body: {0}")]
    Encoding(#[from] vtcase_http::EncodingError),
}

#[derive(Default)]
pub struct Aggregator {
    items: Vec<(SystemTime, CapturedExchange)>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: CapturedExchange) {
        self.items.push((item.captured_at, item));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sorts by capture time, parses, and decompresses every exchange.
    pub async fn into_parsed_exchanges(mut self) -> Result<Vec<ParsedExchange>, AggregatorError> {
        self.items.sort_by_key(|(t, _)| *t);
        let mut out = Vec::with_capacity(self.items.len());
        for (_, raw) in self.items {
            out.push(parse_and_decode(raw).await?);
        }
        Ok(out)
    }
}

async fn parse_and_decode(raw: CapturedExchange) -> Result<ParsedExchange, AggregatorError> {
    let request = vtcase_http::parse_request(&raw.request).map_err(AggregatorError::Request)?;
    let response = vtcase_http::parse_response(&raw.response).map_err(AggregatorError::Response)?;

    let request_tokens = vtcase_http::content_encoding_tokens(&request.headers);
    let request_body = vtcase_http::decode_body(&request_tokens, &request.body).await?;
    let response_tokens = vtcase_http::content_encoding_tokens(&response.headers);
    let response_body = vtcase_http::decode_body(&response_tokens, &response.body).await?;

    Ok(ParsedExchange {
        request: HttpRequest {
            body: request_body,
            ..request
        },
        response: HttpResponse {
            body: response_body,
            ..response
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn sorts_before_parsing() {
        let now = SystemTime::now();
        let mut agg = Aggregator::new();
        agg.push(CapturedExchange {
            request: b"GET /b HTTP/1.1\r\nHost: t\r\n\r\n".to_vec(),
            response: b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec(),
            captured_at: now + Duration::from_secs(1),
        });
        agg.push(CapturedExchange {
            request: b"GET /a HTTP/1.1\r\nHost: t\r\n\r\n".to_vec(),
            response: b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec(),
            captured_at: now,
        });
        let parsed = agg.into_parsed_exchanges().await.unwrap();
        assert_eq!(parsed[0].request.uri, "/a");
        assert_eq!(parsed[1].request.uri, "/b");
    }
}
