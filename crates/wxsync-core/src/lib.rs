//! Core domain model shared by the wxsync fetch, normalize and store stages.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "wxsync-core";

/// Identifier of a city in the weather provider's catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CityId(pub i64);

impl CityId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for CityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for CityId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Unvalidated observation document returned by the provider for one city.
///
/// The document is kept as loose JSON; it is only ever read by the
/// normalizer and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation {
    pub requested_id: CityId,
    pub document: JsonValue,
}

impl RawObservation {
    pub fn new(requested_id: CityId, document: JsonValue) -> Self {
        Self {
            requested_id,
            document,
        }
    }
}

/// Fully validated weather row, one per city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub city_id: CityId,
    pub city_name: String,
    pub weather_description: String,
    pub temperature: f64,
    pub pressure: i32,
    pub humidity: i32,
    pub visibility: i32,
    pub wind_speed: f64,
    pub wind_dir: i32,
    pub clouds_all: i32,
}

/// The ten persisted columns, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordField {
    CityId,
    CityName,
    WeatherDescription,
    Temperature,
    Pressure,
    Humidity,
    Visibility,
    WindSpeed,
    WindDir,
    CloudsAll,
}

impl RecordField {
    pub const ALL: [RecordField; 10] = [
        RecordField::CityId,
        RecordField::CityName,
        RecordField::WeatherDescription,
        RecordField::Temperature,
        RecordField::Pressure,
        RecordField::Humidity,
        RecordField::Visibility,
        RecordField::WindSpeed,
        RecordField::WindDir,
        RecordField::CloudsAll,
    ];

    pub fn column(self) -> &'static str {
        match self {
            RecordField::CityId => "city_id",
            RecordField::CityName => "city_name",
            RecordField::WeatherDescription => "weather_description",
            RecordField::Temperature => "temperature",
            RecordField::Pressure => "pressure",
            RecordField::Humidity => "humidity",
            RecordField::Visibility => "visibility",
            RecordField::WindSpeed => "wind_speed",
            RecordField::WindDir => "wind_dir",
            RecordField::CloudsAll => "clouds_all",
        }
    }

    /// JSON pointer into a provider document where this field lives.
    pub fn source_pointer(self) -> &'static str {
        match self {
            RecordField::CityId => "/id",
            RecordField::CityName => "/name",
            RecordField::WeatherDescription => "/weather/0/description",
            RecordField::Temperature => "/main/temp",
            RecordField::Pressure => "/main/pressure",
            RecordField::Humidity => "/main/humidity",
            RecordField::Visibility => "/visibility",
            RecordField::WindSpeed => "/wind/speed",
            RecordField::WindDir => "/wind/deg",
            RecordField::CloudsAll => "/clouds/all",
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Column names of the weather table, primary key first.
pub const WEATHER_COLUMNS: [&str; 10] = [
    "city_id",
    "city_name",
    "weather_description",
    "temperature",
    "pressure",
    "humidity",
    "visibility",
    "wind_speed",
    "wind_dir",
    "clouds_all",
];
