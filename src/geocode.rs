//! Place name → coordinates, the one geocoding contract the gateway needs.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AstroError;
use crate::gateway::{GatewayError, GeocodeConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Coordinates {
    /// `lat,lon` as the data provider expects it.
    pub fn to_query_value(&self) -> String {
        format!("{},{}", self.lat, self.lon)
    }
}

#[async_trait]
pub trait PlaceResolver: Send + Sync {
    async fn resolve(&self, place: &str) -> Result<Coordinates, GatewayError>;
}

/// Nominatim-style search endpoint: `GET {url}?q=..&format=json&limit=1`.
#[derive(Debug, Clone)]
pub struct HttpGeocoder {
    http: reqwest::Client,
    url: String,
    user_agent: String,
}

impl HttpGeocoder {
    pub fn new(config: &GeocodeConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| GatewayError::Internal {
                message: format!("build geocoder client: {err}"),
            })?;
        Ok(Self {
            http,
            url: config.url.trim().to_string(),
            user_agent: config.user_agent.clone(),
        })
    }
}

#[async_trait]
impl PlaceResolver for HttpGeocoder {
    async fn resolve(&self, place: &str) -> Result<Coordinates, GatewayError> {
        let place = place.trim();
        if place.is_empty() {
            return Err(GatewayError::validation("place is required"));
        }

        let matches = crate::utils::http::send_json::<Vec<Value>>(
            self.http
                .get(self.url.as_str())
                .header(reqwest::header::USER_AGENT, self.user_agent.as_str())
                .query(&[("q", place), ("format", "json"), ("limit", "1")]),
        )
        .await?;

        let Some(first) = matches.first() else {
            return Err(GatewayError::UpstreamRejected {
                status: 404,
                message: format!("no match for place {place:?}"),
            });
        };
        Ok(parse_match(first)?)
    }
}

fn parse_match(value: &Value) -> Result<Coordinates, AstroError> {
    let lat = coordinate(value, "lat")?;
    let lon = coordinate(value, "lon")?;
    Ok(Coordinates {
        lat,
        lon,
        display_name: value
            .get("display_name")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Geocoders disagree on whether coordinates are numbers or strings.
fn coordinate(value: &Value, field: &str) -> Result<f64, AstroError> {
    let parsed = match value.get(field) {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(raw)) => raw.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|coordinate| coordinate.is_finite())
        .ok_or_else(|| AstroError::InvalidResponse(format!("geocode match has no usable {field}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::GET, MockServer};

    fn geocoder(url: String) -> HttpGeocoder {
        HttpGeocoder::new(&GeocodeConfig {
            url,
            user_agent: "astro-gateway-test".to_string(),
            timeout_ms: 5_000,
        })
        .expect("geocoder")
    }

    #[test]
    fn parses_string_and_numeric_coordinates() {
        let coords = parse_match(&serde_json::json!({
            "lat": "51.5072", "lon": -0.1276, "display_name": "London"
        }))
        .expect("coords");
        assert_eq!(coords.lat, 51.5072);
        assert_eq!(coords.lon, -0.1276);
        assert_eq!(coords.to_query_value(), "51.5072,-0.1276");

        assert!(parse_match(&serde_json::json!({ "lat": "north", "lon": 1 })).is_err());
    }

    #[tokio::test]
    async fn empty_place_is_rejected_locally() {
        let err = geocoder("http://127.0.0.1:9/search".to_string())
            .resolve("  ")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));
    }

    #[tokio::test]
    async fn resolves_first_match_with_user_agent() {
        if crate::utils::test_support::should_skip_httpmock() {
            return;
        }
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/search")
                    .query_param("q", "Lagos")
                    .query_param("format", "json")
                    .query_param("limit", "1")
                    .header("user-agent", "astro-gateway-test");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"[{"lat":"6.4550","lon":"3.3941","display_name":"Lagos, Nigeria"}]"#);
            })
            .await;

        let coords = geocoder(server.url("/search"))
            .resolve("Lagos")
            .await
            .expect("coords");
        mock.assert_async().await;
        assert_eq!(coords.display_name.as_deref(), Some("Lagos, Nigeria"));
        assert_eq!(coords.lat, 6.455);
    }

    #[tokio::test]
    async fn empty_result_is_no_match() {
        if crate::utils::test_support::should_skip_httpmock() {
            return;
        }
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/search");
                then.status(200)
                    .header("content-type", "application/json")
                    .body("[]");
            })
            .await;

        let err = geocoder(server.url("/search"))
            .resolve("Atlantis")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamRejected { status: 404, .. }));
        assert!(err.to_string().contains("no match"));
    }
}
