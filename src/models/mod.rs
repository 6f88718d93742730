// Domain models shared by the engine, persistence and routes

mod field;
mod sample;
mod series;

pub use field::{Field, Readings, UnknownField};
pub use sample::Sample;
pub use series::{BucketSpec, LabelFormat, Resolution, Series, UnknownResolution};
