// Canonical electrical quantities and the fixed 8-field reading record

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the eight quantities every sample carries. Wire names are camelCase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Voltage,
    Current,
    Power,
    Frequency,
    Apparent,
    Reactive,
    Energy,
    PowerFactor,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Voltage,
        Field::Current,
        Field::Power,
        Field::Frequency,
        Field::Apparent,
        Field::Reactive,
        Field::Energy,
        Field::PowerFactor,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Voltage => "voltage",
            Field::Current => "current",
            Field::Power => "power",
            Field::Frequency => "frequency",
            Field::Apparent => "apparent",
            Field::Reactive => "reactive",
            Field::Energy => "energy",
            Field::PowerFactor => "powerFactor",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown field `{0}`")]
pub struct UnknownField(pub String);

impl FromStr for Field {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| UnknownField(s.to_string()))
    }
}

/// All eight quantities of one reading (or per-field sums/averages of many).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Readings {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub frequency: f64,
    pub apparent: f64,
    pub reactive: f64,
    pub energy: f64,
    pub power_factor: f64,
}

impl Readings {
    pub fn from_fn(mut f: impl FnMut(Field) -> f64) -> Self {
        let mut out = Readings::default();
        for field in Field::ALL {
            *out.get_mut(field) = f(field);
        }
        out
    }

    pub fn get(&self, field: Field) -> f64 {
        match field {
            Field::Voltage => self.voltage,
            Field::Current => self.current,
            Field::Power => self.power,
            Field::Frequency => self.frequency,
            Field::Apparent => self.apparent,
            Field::Reactive => self.reactive,
            Field::Energy => self.energy,
            Field::PowerFactor => self.power_factor,
        }
    }

    pub fn get_mut(&mut self, field: Field) -> &mut f64 {
        match field {
            Field::Voltage => &mut self.voltage,
            Field::Current => &mut self.current,
            Field::Power => &mut self.power,
            Field::Frequency => &mut self.frequency,
            Field::Apparent => &mut self.apparent,
            Field::Reactive => &mut self.reactive,
            Field::Energy => &mut self.energy,
            Field::PowerFactor => &mut self.power_factor,
        }
    }

    /// Field-wise `self += other`.
    pub fn accumulate(&mut self, other: &Readings) {
        for field in Field::ALL {
            *self.get_mut(field) += other.get(field);
        }
    }

    pub fn map(&self, mut f: impl FnMut(f64) -> f64) -> Readings {
        Readings::from_fn(|field| f(self.get(field)))
    }
}
