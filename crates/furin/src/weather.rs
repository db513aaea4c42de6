//! OpenWeatherMap current-weather client.
//!
//! One endpoint, two query forms (city name or coordinates), metric
//! units throughout. The decision input downstream is `wind.speed` in
//! meters per second.

use serde::Deserialize;

use crate::location::Place;

const BASE_URL: &str = "https://api.openweathermap.org/data/2.5/weather";
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Weather API errors
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("No API key: set OPENWEATHER_API_KEY or weather.api_key")]
    MissingKey,
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Weather API rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Decode error: {0}")]
    Decode(String),
}

/// A single current-weather reading.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentConditions {
    /// Sustained wind speed in m/s; the chime decision input
    pub wind_speed_mps: f64,
    pub wind_gust_mps: Option<f64>,
    pub wind_deg: Option<f64>,
    pub temperature_c: Option<f64>,
    pub description: Option<String>,
    /// Station/city name echoed by the API
    pub station: Option<String>,
}

/// Client for the current-weather endpoint.
pub struct WeatherClient {
    http: reqwest::Client,
    api_key: String,
}

impl WeatherClient {
    pub fn new(api_key: Option<String>) -> Result<Self, ApiError> {
        let api_key = api_key.ok_or(ApiError::MissingKey)?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Http(e.to_string()))?;
        Ok(Self { http, api_key })
    }

    /// Fetch current conditions for a place.
    pub async fn current(&self, place: &Place) -> Result<CurrentConditions, ApiError> {
        let url = request_url(BASE_URL, place, &self.api_key)?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            // Error bodies carry {"cod": ..., "message": ...}; cod may be
            // a string or a number, so the HTTP status is authoritative.
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.message)
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let payload: WeatherResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        conditions_from_payload(payload)
    }
}

/// Build the request URL for a place. The key rides as a query param, so
/// never log the result.
fn request_url(base: &str, place: &Place, api_key: &str) -> Result<reqwest::Url, ApiError> {
    let mut params: Vec<(&str, String)> = match place {
        Place::City(city) => vec![("q", city.clone())],
        Place::Coordinates {
            latitude,
            longitude,
        } => vec![("lat", latitude.to_string()), ("lon", longitude.to_string())],
    };
    params.push(("appid", api_key.to_string()));
    params.push(("units", "metric".to_string()));
    reqwest::Url::parse_with_params(base, params).map_err(|e| ApiError::Http(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    #[serde(default)]
    weather: Vec<WeatherEntry>,
    main: Option<MainSection>,
    wind: Option<WindSection>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WeatherEntry {
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MainSection {
    temp: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WindSection {
    speed: f64,
    gust: Option<f64>,
    deg: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

fn conditions_from_payload(payload: WeatherResponse) -> Result<CurrentConditions, ApiError> {
    let wind = payload
        .wind
        .ok_or_else(|| ApiError::Decode("response missing wind section".to_string()))?;
    Ok(CurrentConditions {
        wind_speed_mps: wind.speed,
        wind_gust_mps: wind.gust,
        wind_deg: wind.deg,
        temperature_c: payload.main.and_then(|m| m.temp),
        description: payload.weather.into_iter().next().and_then(|w| w.description),
        station: payload.name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "coord": {"lon": -0.1278, "lat": 51.5074},
        "weather": [{"id": 721, "main": "Haze", "description": "haze", "icon": "50d"}],
        "main": {"temp": 11.3, "feels_like": 10.6, "pressure": 1012, "humidity": 81},
        "wind": {"speed": 6.2, "deg": 250, "gust": 9.8},
        "name": "London",
        "cod": 200
    }"#;

    #[test]
    fn decode_full_payload() {
        let payload: WeatherResponse = serde_json::from_str(SAMPLE).unwrap();
        let conditions = conditions_from_payload(payload).unwrap();
        assert!((conditions.wind_speed_mps - 6.2).abs() < 1e-9);
        assert_eq!(conditions.wind_gust_mps, Some(9.8));
        assert_eq!(conditions.wind_deg, Some(250.0));
        assert_eq!(conditions.temperature_c, Some(11.3));
        assert_eq!(conditions.description.as_deref(), Some("haze"));
        assert_eq!(conditions.station.as_deref(), Some("London"));
    }

    #[test]
    fn decode_minimal_payload() {
        let payload: WeatherResponse =
            serde_json::from_str(r#"{"wind": {"speed": 0.4}}"#).unwrap();
        let conditions = conditions_from_payload(payload).unwrap();
        assert!((conditions.wind_speed_mps - 0.4).abs() < 1e-9);
        assert_eq!(conditions.wind_gust_mps, None);
        assert_eq!(conditions.station, None);
    }

    #[test]
    fn missing_wind_section_is_decode_error() {
        let payload: WeatherResponse =
            serde_json::from_str(r#"{"name": "Nowhere"}"#).unwrap();
        assert!(matches!(
            conditions_from_payload(payload),
            Err(ApiError::Decode(_))
        ));
    }

    #[test]
    fn error_body_message_decodes_with_string_cod() {
        let body: ErrorBody =
            serde_json::from_str(r#"{"cod": "404", "message": "city not found"}"#).unwrap();
        assert_eq!(body.message.as_deref(), Some("city not found"));
    }

    #[test]
    fn city_url_is_percent_encoded() {
        let url = request_url(BASE_URL, &Place::City("Rio de Janeiro".to_string()), "k").unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("q=Rio+de+Janeiro") || query.contains("q=Rio%20de%20Janeiro"));
        assert!(query.contains("units=metric"));
        assert!(query.contains("appid=k"));
    }

    #[test]
    fn coordinate_url_carries_both_axes() {
        let place = Place::Coordinates {
            latitude: 51.5074,
            longitude: -0.1278,
        };
        let url = request_url(BASE_URL, &place, "k").unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("lat=51.5074"));
        assert!(query.contains("lon=-0.1278"));
        assert!(!query.contains("q="));
    }

    #[test]
    fn missing_key_is_a_startup_error() {
        assert!(matches!(WeatherClient::new(None), Err(ApiError::MissingKey)));
    }
}
