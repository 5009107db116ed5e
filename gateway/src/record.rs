//! The plate record - the unit of ingestion
//!
//! Records are built from wire `PlateRequest`s and moved (never shared) through
//! the ingestion queue to the worker.

use crate::proto::PlateRequest;
use std::fmt;

/// One optical density reading for a plate well
///
/// Absent source values map to zero values; no field is required.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub plate: i32,
    pub well: String,
    pub runtime: i32,
    pub optical_density: f32,
    pub run: String,
    pub corrected_optical_density: f32,
}

impl Record {
    pub fn new(
        plate: i32,
        well: impl Into<String>,
        runtime: i32,
        optical_density: f32,
        run: impl Into<String>,
        corrected_optical_density: f32,
    ) -> Self {
        Self {
            plate,
            well: well.into().trim().to_string(),
            runtime,
            optical_density,
            run: run.into().trim().to_string(),
            corrected_optical_density,
        }
    }
}

impl From<PlateRequest> for Record {
    fn from(req: PlateRequest) -> Self {
        Record::new(
            req.plate,
            req.well,
            req.runtime,
            req.optical_density,
            req.run,
            req.corrected_optical_density,
        )
    }
}

impl From<Record> for PlateRequest {
    fn from(record: Record) -> Self {
        PlateRequest {
            plate: record.plate,
            well: record.well,
            runtime: record.runtime,
            optical_density: record.optical_density,
            run: record.run,
            corrected_optical_density: record.corrected_optical_density,
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "plate={} well={} runtime={} optical_density={} run={} corrected_optical_density={}",
            self.plate,
            self.well,
            self.runtime,
            self.optical_density,
            self.run,
            self.corrected_optical_density
        )
    }
}
