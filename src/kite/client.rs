//! Kite REST client
//!
//! Blocking HTTP client for the Kite Connect API with circuit breaker and
//! token bucket rate limiting around every call. Callers are engine worker
//! threads, so requests deliberately block the issuing thread.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::blocking::{Client, Response};

use super::error::{KiteError, KiteResult};
use super::types::*;
use super::{BrokerClient, API_BASE_URL};
use crate::common::{CircuitBreaker, CircuitBreakerConfig, RateLimiter, RateLimiterConfig};

/// Session credentials issued outside the engine
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub access_token: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            access_token: access_token.into(),
        }
    }

    fn authorization(&self) -> String {
        format!("token {}:{}", self.api_key, self.access_token)
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub rate_limiter: RateLimiterConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            rate_limiter: RateLimiterConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_second: usize) -> Self {
        self.rate_limiter = self.rate_limiter.with_rate(requests_per_second);
        self
    }
}

/// Kite Connect HTTP client
pub struct KiteClient {
    http: Client,
    credentials: Credentials,
    base_url: String,
    rate_limiter: RateLimiter,
    breaker: Mutex<CircuitBreaker>,
}

impl KiteClient {
    pub fn new(credentials: Credentials) -> Self {
        Self::with_config(credentials, ClientConfig::default())
    }

    pub fn with_config(credentials: Credentials, config: ClientConfig) -> Self {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            credentials,
            base_url: API_BASE_URL.to_string(),
            rate_limiter: RateLimiter::new(config.rate_limiter),
            breaker: Mutex::new(CircuitBreaker::new(config.circuit_breaker)),
        }
    }

    /// Point the client at a non-default API host
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Download the full instrument dump for an exchange (CSV)
    pub fn instruments(&self, exchange: &str) -> KiteResult<Vec<InstrumentRow>> {
        let url = format!("{}/instruments/{}", self.base_url, exchange);
        let body = self.guarded(|| {
            let response = self.request(self.http.get(&url))?;
            response.text().map_err(KiteError::from)
        })?;

        let mut reader = csv::Reader::from_reader(body.as_bytes());
        let mut rows = Vec::new();
        for row in reader.deserialize() {
            let row: InstrumentRow = row.map_err(|e| KiteError::Parse(e.to_string()))?;
            rows.push(row);
        }
        Ok(rows)
    }

    fn request(&self, builder: reqwest::blocking::RequestBuilder) -> KiteResult<Response> {
        let response = builder
            .header("X-Kite-Version", "3")
            .header("Authorization", self.credentials.authorization())
            .send()?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else if status.as_u16() == 403 {
            let body = response.text().unwrap_or_default();
            Err(KiteError::Auth(body))
        } else {
            let body = response.text().unwrap_or_default();
            Err(KiteError::Api(format!("{status}: {body}")))
        }
    }

    /// Run one API call inside the rate limiter and circuit breaker
    fn guarded<T>(&self, call: impl FnOnce() -> KiteResult<T>) -> KiteResult<T> {
        if !self.breaker.lock().unwrap().can_attempt() {
            return Err(KiteError::CircuitOpen);
        }
        self.rate_limiter.acquire();

        let result = call();
        let mut breaker = self.breaker.lock().unwrap();
        match &result {
            Ok(_) => breaker.record_success(),
            Err(KiteError::Network(_)) | Err(KiteError::Api(_)) => breaker.record_failure(),
            // Auth and parse problems say nothing about service health
            Err(_) => {}
        }
        result
    }
}

impl BrokerClient for KiteClient {
    fn place_order(&self, params: &PlaceOrderParams) -> KiteResult<String> {
        let url = format!("{}/orders/{}", self.base_url, params.variety);
        let form = [
            ("exchange", params.exchange.clone()),
            ("tradingsymbol", params.trading_symbol.clone()),
            ("transaction_type", params.transaction_type.as_str().to_string()),
            ("quantity", params.quantity.to_string()),
            ("product", params.product.clone()),
            ("order_type", params.order_type.as_str().to_string()),
            ("validity", params.validity.clone()),
        ];

        self.guarded(|| {
            let response = self.request(self.http.post(&url).form(&form))?;
            let ack: Envelope<OrderAck> = response
                .json()
                .map_err(|e| KiteError::Parse(e.to_string()))?;
            Ok(ack.data.order_id)
        })
    }

    fn ltp(&self, keys: &[String]) -> KiteResult<HashMap<String, LtpQuote>> {
        let url = format!("{}/quote/ltp", self.base_url);
        let query: Vec<(&str, &str)> = keys.iter().map(|k| ("i", k.as_str())).collect();

        self.guarded(|| {
            let response = self.request(self.http.get(&url).query(&query))?;
            let quotes: Envelope<HashMap<String, LtpQuote>> = response
                .json()
                .map_err(|e| KiteError::Parse(e.to_string()))?;
            Ok(quotes.data)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_header() {
        let creds = Credentials::new("key", "token123");
        assert_eq!(creds.authorization(), "token key:token123");
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::default()
            .with_timeout(Duration::from_secs(60))
            .with_rate_limit(20);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.rate_limiter.max_requests_per_second, 20);
    }

    #[test]
    fn test_base_url_override() {
        let client = KiteClient::new(Credentials::new("k", "t")).with_base_url("http://localhost:1");
        assert_eq!(client.base_url, "http://localhost:1");
    }
}
