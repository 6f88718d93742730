// Normalized, timestamped reading

use serde::{Deserialize, Serialize};

use super::{Field, Readings};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    /// Epoch milliseconds, stamped by the engine clock on arrival.
    pub timestamp: i64,
    pub readings: Readings,
}

impl Sample {
    pub fn new(timestamp: i64, readings: Readings) -> Self {
        Self {
            timestamp,
            readings,
        }
    }

    pub fn value(&self, field: Field) -> f64 {
        self.readings.get(field)
    }
}
