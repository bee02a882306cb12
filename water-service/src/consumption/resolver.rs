use water_client::Reading;

/// Cumulative meter value (milliliters) in effect at each boundary.
///
/// `readings` must be sorted by ascending timestamp. The value at boundary `k`
/// is the total of the latest reading with `timestamp < boundaries[k]` whose
/// total is positive; when no such reading exists the running value is carried
/// forward, starting from `baseline` (or 0). Malformed readings are skipped.
pub fn resolve_boundary_values(
    readings: &[Reading],
    boundaries: &[i64],
    baseline: Option<i64>,
) -> Vec<i64> {
    debug_assert!(readings.windows(2).all(|p| p[0].timestamp <= p[1].timestamp));

    let mut pending = readings.iter().peekable();

    boundaries
        .iter()
        .scan(baseline.unwrap_or(0), |running, &boundary| {
            while let Some(reading) = pending.next_if(|r| r.timestamp < boundary) {
                match reading.total_milliliters() {
                    Some(total) if total > 0 => *running = total,
                    Some(_) => {}
                    None => {
                        metrics::counter!("consumption_readings_skipped_total").increment(1);
                        tracing::warn!(
                            device_id = %reading.device_id,
                            reading_id = %reading.reading_id,
                            liters = reading.liters,
                            milliliters = reading.milliliters,
                            "skipping malformed reading"
                        );
                    }
                }
            }
            Some(*running)
        })
        .collect()
}
