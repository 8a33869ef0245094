//! Projection of raw provider documents into fixed-shape weather records.
//!
//! Validation is all-or-nothing: the first document missing a required field
//! rejects the whole batch, so persistence only ever sees complete records.

use std::fmt;

use serde_json::Value as JsonValue;
use thiserror::Error;
use wxsync_core::{CityId, NormalizedRecord, RawObservation, RecordField};

pub mod catalogue;

pub use catalogue::{CatalogueEntry, CatalogueError, CityCatalogue, CitySelector};

pub const CRATE_NAME: &str = "wxsync-normalize";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    Missing,
    WrongType,
    OutOfRange,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ViolationKind::Missing => "missing",
            ViolationKind::WrongType => "wrongly typed",
            ViolationKind::OutOfRange => "out of range",
        })
    }
}

/// Why a batch was rejected: which document (by position) and which field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid data received: document {index} (city {city_id}): {kind} field {field}")]
pub struct ValidationError {
    pub index: usize,
    pub city_id: CityId,
    pub field: RecordField,
    pub kind: ViolationKind,
}

/// Normalize a whole batch, failing on the first incomplete document.
pub fn normalize(docs: &[RawObservation]) -> Result<Vec<NormalizedRecord>, ValidationError> {
    docs.iter()
        .enumerate()
        .map(|(index, doc)| normalize_one(index, doc))
        .collect()
}

/// Normalize a single document; `index` is only used for error reporting.
pub fn normalize_one(index: usize, doc: &RawObservation) -> Result<NormalizedRecord, ValidationError> {
    let reader = DocReader {
        index,
        city_id: doc.requested_id,
        document: &doc.document,
    };

    Ok(NormalizedRecord {
        city_id: CityId(reader.int(RecordField::CityId)?),
        city_name: reader.text(RecordField::CityName)?,
        weather_description: reader.text(RecordField::WeatherDescription)?,
        temperature: reader.real(RecordField::Temperature)?,
        pressure: reader.int32(RecordField::Pressure)?,
        humidity: reader.int32(RecordField::Humidity)?,
        visibility: reader.int32(RecordField::Visibility)?,
        wind_speed: reader.real(RecordField::WindSpeed)?,
        wind_dir: reader.int32(RecordField::WindDir)?,
        clouds_all: reader.int32(RecordField::CloudsAll)?,
    })
}

struct DocReader<'a> {
    index: usize,
    city_id: CityId,
    document: &'a JsonValue,
}

impl<'a> DocReader<'a> {
    fn fail(&self, field: RecordField, kind: ViolationKind) -> ValidationError {
        ValidationError {
            index: self.index,
            city_id: self.city_id,
            field,
            kind,
        }
    }

    fn lookup(&self, field: RecordField) -> Result<&'a JsonValue, ValidationError> {
        match self.document.pointer(field.source_pointer()) {
            Some(JsonValue::Null) | None => Err(self.fail(field, ViolationKind::Missing)),
            Some(value) => Ok(value),
        }
    }

    fn text(&self, field: RecordField) -> Result<String, ValidationError> {
        self.lookup(field)?
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| self.fail(field, ViolationKind::WrongType))
    }

    fn real(&self, field: RecordField) -> Result<f64, ValidationError> {
        let value = self
            .lookup(field)?
            .as_f64()
            .ok_or_else(|| self.fail(field, ViolationKind::WrongType))?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(self.fail(field, ViolationKind::OutOfRange))
        }
    }

    fn int(&self, field: RecordField) -> Result<i64, ValidationError> {
        let value = self.lookup(field)?;
        if let Some(v) = value.as_i64() {
            return Ok(v);
        }
        if value.is_u64() {
            return Err(self.fail(field, ViolationKind::OutOfRange));
        }
        // Some stations report integral readings as floats, e.g. `1012.0`.
        match value.as_f64() {
            Some(v) if v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 => {
                Ok(v as i64)
            }
            Some(_) => Err(self.fail(field, ViolationKind::WrongType)),
            None => Err(self.fail(field, ViolationKind::WrongType)),
        }
    }

    fn int32(&self, field: RecordField) -> Result<i32, ValidationError> {
        let value = self.int(field)?;
        i32::try_from(value).map_err(|_| self.fail(field, ViolationKind::OutOfRange))
    }
}
