//! Location resolution: explicit config, or auto-discovery from the
//! public IP via ipinfo.io. Resolution happens once at startup; the
//! polling loop never re-resolves.

use serde::Deserialize;

use crate::config::LocationConfig;

const IPINFO_URL: &str = "https://ipinfo.io/json";

/// What the weather query should ask for.
#[derive(Debug, Clone, PartialEq)]
pub enum Place {
    City(String),
    Coordinates { latitude: f64, longitude: f64 },
}

impl std::fmt::Display for Place {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Place::City(city) => write!(f, "{}", city),
            Place::Coordinates {
                latitude,
                longitude,
            } => write!(f, "({:.4}, {:.4})", latitude, longitude),
        }
    }
}

/// Location the monitor will watch, plus whatever labels discovery gave us.
#[derive(Debug, Clone)]
pub struct ResolvedLocation {
    pub place: Place,
    pub city: Option<String>,
    pub country: Option<String>,
}

impl ResolvedLocation {
    /// Human label for logs: "London, GB" when known, else the raw place.
    pub fn label(&self) -> String {
        match (&self.city, &self.country) {
            (Some(city), Some(country)) => format!("{}, {}", city, country),
            (Some(city), None) => city.clone(),
            _ => self.place.to_string(),
        }
    }
}

/// Location errors
#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("Discovery request failed: {0}")]
    Http(String),
    #[error("Discovery response had no usable location")]
    Empty,
}

impl From<reqwest::Error> for LocationError {
    fn from(err: reqwest::Error) -> Self {
        LocationError::Http(err.to_string())
    }
}

/// Wire shape of the ipinfo.io response; only the fields we read.
#[derive(Debug, Deserialize)]
struct IpInfo {
    city: Option<String>,
    country: Option<String>,
    /// "lat,lon" as a single string, e.g. "51.5074,-0.1278"
    loc: Option<String>,
}

/// Resolve the location to watch.
///
/// Explicit coordinates win, then an explicit city; otherwise the public
/// IP is geolocated. Discovery failure falls back to the configured
/// fallback city with a warning rather than aborting startup.
pub async fn resolve_location(
    config: &LocationConfig,
    http: &reqwest::Client,
) -> ResolvedLocation {
    if let (Some(latitude), Some(longitude)) = (config.latitude, config.longitude) {
        return ResolvedLocation {
            place: Place::Coordinates {
                latitude,
                longitude,
            },
            city: config.city.clone(),
            country: None,
        };
    }
    if let Some(city) = &config.city {
        return ResolvedLocation {
            place: Place::City(city.clone()),
            city: Some(city.clone()),
            country: None,
        };
    }

    log::info!("Detecting location from public IP...");
    match discover(http).await {
        Ok(resolved) => {
            log::info!("Location found: {}", resolved.label());
            resolved
        }
        Err(e) => {
            log::warn!(
                "Could not detect location ({}), defaulting to {}",
                e,
                config.fallback_city
            );
            ResolvedLocation {
                place: Place::City(config.fallback_city.clone()),
                city: Some(config.fallback_city.clone()),
                country: None,
            }
        }
    }
}

async fn discover(http: &reqwest::Client) -> Result<ResolvedLocation, LocationError> {
    let info: IpInfo = http
        .get(IPINFO_URL)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    location_from_ipinfo(info)
}

/// Turn an ipinfo payload into a resolved location. Coordinates from the
/// `loc` field are preferred; a city name alone is still usable.
fn location_from_ipinfo(info: IpInfo) -> Result<ResolvedLocation, LocationError> {
    let coords = info.loc.as_deref().and_then(parse_loc);
    let place = match (coords, &info.city) {
        (Some((latitude, longitude)), _) => Place::Coordinates {
            latitude,
            longitude,
        },
        (None, Some(city)) => Place::City(city.clone()),
        (None, None) => return Err(LocationError::Empty),
    };
    Ok(ResolvedLocation {
        place,
        city: info.city,
        country: info.country,
    })
}

/// Parse ipinfo's "lat,lon" string.
fn parse_loc(loc: &str) -> Option<(f64, f64)> {
    let (lat, lon) = loc.split_once(',')?;
    let latitude: f64 = lat.trim().parse().ok()?;
    let longitude: f64 = lon.trim().parse().ok()?;
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return None;
    }
    Some((latitude, longitude))
}
