use time::macros::datetime;
use water_client::{domain::reading::ML_PER_LITER, Reading};

use crate::pipeline::{Envelope, PipelineError, Transform};

/// Pure validation of an incoming `Reading`.
///
/// Rules:
/// - device id must not be blank.
/// - liters must be non-negative and milliliters within `0..=999`.
/// - timestamp must be within a broad sanity window [2000-01-01, 2100-01-01).
pub fn validate_reading(env: Envelope<Reading>) -> Result<Envelope<Reading>, PipelineError> {
    let r = &env.payload;

    if r.device_id.trim().is_empty() {
        return Err(PipelineError::Transform("deviceId must not be blank".to_string()));
    }

    if r.liters < 0 {
        return Err(PipelineError::Transform(format!(
            "liters must be non-negative, got {} for {}",
            r.liters, r.reading_id
        )));
    }

    if !(0..ML_PER_LITER).contains(&r.milliliters) {
        return Err(PipelineError::Transform(format!(
            "milliliters must be within 0..=999, got {} for {}",
            r.milliliters, r.reading_id
        )));
    }

    let min_ts = datetime!(2000-01-01 00:00:00 UTC).unix_timestamp();
    let max_ts = datetime!(2100-01-01 00:00:00 UTC).unix_timestamp();

    if r.timestamp < min_ts || r.timestamp >= max_ts {
        return Err(PipelineError::Transform(format!(
            "timestamp {} out of allowed range",
            r.timestamp
        )));
    }

    Ok(env)
}

#[derive(Clone, Default)]
pub struct ReadingValidation;

#[async_trait::async_trait]
impl Transform<Reading, Reading> for ReadingValidation {
    async fn apply(&self, input: Envelope<Reading>) -> Result<Envelope<Reading>, PipelineError> {
        match validate_reading(input) {
            Ok(env) => Ok(env),
            Err(e) => {
                metrics::counter!("validation_reading_rejected_total").increment(1);
                Err(e)
            }
        }
    }
}
