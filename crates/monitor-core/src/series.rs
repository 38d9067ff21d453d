//! Flat time series of one attribute across several things, ready for
//! charting.

use serde::Serialize;
use time::OffsetDateTime;

use crate::engine::{ApiContext, SyncEngine};
use crate::error::Result;

/// What to collect.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesOptions {
    /// Kind of thing listing to read.
    pub kind: String,
    /// Attribute to read from each thing.
    pub state: String,
    pub since: Option<OffsetDateTime>,
    pub until: Option<OffsetDateTime>,
    /// Read at most this many things.
    pub max_things: usize,
    /// Values at or above this are treated as sensor glitches and dropped.
    pub ceiling: Option<f64>,
}

impl Default for SeriesOptions {
    fn default() -> Self {
        Self {
            kind: "temperature".to_string(),
            state: "temperature".to_string(),
            since: None,
            until: None,
            max_things: 5,
            ceiling: Some(150.0),
        }
    }
}

/// One value of the series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    /// Label of the reporting thing.
    pub label: String,
    pub value: f64,
}

/// Collect the series, refreshing things and states as needed.
///
/// Points are ordered by date; ties keep the thing order.
pub async fn collect(
    engine: &SyncEngine,
    ctx: &ApiContext,
    options: &SeriesOptions,
) -> Result<Vec<SeriesPoint>> {
    let things = engine.things(ctx, &options.kind, false).await?;

    let mut points = Vec::new();
    for thing in things.iter().take(options.max_things) {
        let states = engine
            .states(ctx, &thing.id, Some(&options.state), options.since, options.until)
            .await?;
        points.extend(states.iter().filter_map(|state| {
            let value = state.numeric_value()?;
            if options.ceiling.is_some_and(|ceiling| value >= ceiling) {
                return None;
            }
            Some(SeriesPoint {
                date: state.date,
                label: thing.display_name().to_string(),
                value,
            })
        }));
    }

    points.sort_by_key(|point| point.date);
    Ok(points)
}
