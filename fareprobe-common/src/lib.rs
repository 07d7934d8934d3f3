//! Common types and utilities shared across fareprobe crates.
//!
//! This crate defines the route/price data model, the persistence seams, the
//! observability helpers, and the shared error type used throughout the
//! workspace. It is intentionally lightweight so that every crate can depend
//! on it without pulling in the browser or database stacks.
//!
//! # Overview
//!
//! - [`AddressRecord`], [`Route`]: corpus entries and the pair chosen per iteration
//! - [`PriceQuote`], [`RouteResult`], [`DirectionRecord`]: what gets persisted
//! - [`persistence`]: `AddressCorpus`, `RouteSink` and `DirectionSink` traits
//! - [`observability`]: Centralised tracing/logging initialisation
//! - [`ProbeError`] and [`Result`]: Shared error handling
//!
//! # Examples
//!
//! Parsing a rendered price line:
//!
//! ```rust
//! use fareprobe_common::PriceQuote;
//!
//! let quote = PriceQuote::parse("$12.34 - $15.60").unwrap();
//! assert_eq!(quote.low, "12.34 - ");
//! assert_eq!(quote.high.as_deref(), Some("15.60"));
//! ```
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod observability;
pub mod persistence;

/// Meters in one statute mile, as used for the route distance bounds.
pub const METERS_PER_MILE: f64 = 1609.34;

/// Delimiter the estimate page renders between price figures.
pub const CURRENCY_DELIMITER: char = '$';

/// Immutable corpus entry. Field names on the wire match the corpus columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressRecord {
    /// Stable hash of the address, used as the foreign key in derived records.
    #[serde(rename = "HASH")]
    pub id: String,
    #[serde(rename = "LAT")]
    pub latitude: f64,
    #[serde(rename = "LON")]
    pub longitude: f64,
    #[serde(rename = "NUMBER")]
    pub house_number: String,
    #[serde(rename = "STREET")]
    pub street: String,
    #[serde(rename = "POSTCODE")]
    pub postcode: String,
}

impl AddressRecord {
    /// Text typed into the estimate form: street, number, postcode.
    pub fn display_text(&self) -> String {
        format!("{} {} {}", self.street, self.house_number, self.postcode)
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// Latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Pickup/destination pair chosen for one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub pickup: AddressRecord,
    pub destination: AddressRecord,
    /// Great-circle distance between the two addresses.
    pub distance_meters: f64,
    /// How many candidate pairs were drawn before this one was accepted.
    pub draws: u64,
}

impl Route {
    pub fn distance_in_miles(&self) -> f64 {
        meters_to_miles(self.distance_meters)
    }
}

pub fn meters_to_miles(meters: f64) -> f64 {
    meters / METERS_PER_MILE
}

/// One scraped price line.
///
/// The rendered text is split on [`CURRENCY_DELIMITER`]; segments are kept
/// verbatim, no numeric parsing happens here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Text before the first delimiter (product name, or empty).
    pub label: String,
    pub low: String,
    pub high: Option<String>,
}

impl PriceQuote {
    /// Split a rendered price line. Returns `None` when the text carries no
    /// currency delimiter at all.
    pub fn parse(text: &str) -> Option<Self> {
        let mut segments = text.split(CURRENCY_DELIMITER);
        let label = segments.next()?.to_string();
        let low = segments.next()?.to_string();
        let high = segments.next().map(str::to_string);
        Some(Self { label, low, high })
    }
}

/// Price result for one successful iteration. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResult {
    pub pickup_id: String,
    pub destination_id: String,
    pub distance_meters: f64,
    pub prices: Vec<PriceQuote>,
    pub timestamp: DateTime<Utc>,
}

impl RouteResult {
    pub fn new(route: &Route, prices: Vec<PriceQuote>) -> Self {
        Self {
            pickup_id: route.pickup.id.clone(),
            destination_id: route.destination.id.clone(),
            distance_meters: route.distance_meters,
            prices,
            timestamp: Utc::now(),
        }
    }
}

/// Raw directions payload captured from the intercepted network call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionRecord {
    pub pickup_id: String,
    pub destination_id: String,
    pub payload: serde_json::Value,
}

/// Error types used across the fareprobe system.
#[derive(thiserror::Error, Debug)]
pub enum ProbeError {
    /// Sampling could not produce a usable pair.
    #[error("Corpus exhausted after {draws} draws: {detail}")]
    CorpusExhausted { draws: u64, detail: String },

    /// The result marker did not become visible in time.
    #[error("Pricing results did not render within {waited_ms}ms")]
    ResultTimeout { waited_ms: u64 },

    /// Every acquisition attempt timed out.
    #[error("Could not resolve pricing results within {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },

    /// A write to one of the sinks failed.
    #[error("Write to {sink} failed: {source}")]
    PersistenceWrite {
        sink: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A driver (browser, WebDriver session) reported an error.
    #[error("Driver error: {0}")]
    Driver(#[from] anyhow::Error),
}

/// Convenient alias for results that use [`ProbeError`].
pub type Result<T> = std::result::Result<T, ProbeError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn address(id: &str) -> AddressRecord {
        AddressRecord {
            id: id.to_string(),
            latitude: 34.05,
            longitude: -118.24,
            house_number: "221".to_string(),
            street: "S Grand Ave".to_string(),
            postcode: "90012".to_string(),
        }
    }

    #[test]
    fn price_line_keeps_segments_verbatim() {
        let quote = PriceQuote::parse("$12.34 - $15.60").unwrap();
        assert_eq!(quote.label, "");
        assert_eq!(quote.low, "12.34 - ");
        assert_eq!(quote.high.as_deref(), Some("15.60"));
    }

    #[test]
    fn price_line_with_label_and_single_figure() {
        let quote = PriceQuote::parse("UberX $23").unwrap();
        assert_eq!(quote.label, "UberX ");
        assert_eq!(quote.low, "23");
        assert_eq!(quote.high, None);
    }

    #[test]
    fn text_without_delimiter_is_not_a_quote() {
        assert_eq!(PriceQuote::parse("Fare unavailable"), None);
        assert_eq!(PriceQuote::parse(""), None);
    }

    #[test]
    fn display_text_orders_street_number_postcode() {
        assert_eq!(address("a").display_text(), "S Grand Ave 221 90012");
    }

    #[test]
    fn address_uses_corpus_field_names() {
        let raw = serde_json::json!({
            "HASH": "abc",
            "LAT": 34.2,
            "LON": -118.5,
            "NUMBER": "10",
            "STREET": "Main St",
            "POSTCODE": "91401"
        });
        let rec: AddressRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(rec.id, "abc");
        assert_eq!(rec.coordinates().longitude, -118.5);
    }

    #[test]
    fn route_result_copies_ids_and_distance() {
        let route = Route {
            pickup: address("p"),
            destination: address("d"),
            distance_meters: 16_093.4,
            draws: 3,
        };
        assert!((route.distance_in_miles() - 10.0).abs() < 1e-9);
        let result = RouteResult::new(&route, vec![]);
        assert_eq!(result.pickup_id, "p");
        assert_eq!(result.destination_id, "d");
        assert_eq!(result.distance_meters, 16_093.4);
        assert!(result.prices.is_empty());
    }
}
