use crate::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("metric name must be non-empty")]
    InvalidName,

    #[error("metric `{name}` is a {registered}, cannot record a {requested} sample")]
    KindMismatch {
        name: String,
        registered: MetricKind,
        requested: MetricKind,
    },

    #[error("metric `{name}` rejected non-finite value {value}")]
    InvalidValue { name: String, value: f64 },

    #[error("metrics are frozen; the run has been finalized")]
    Frozen,
}
