//! Assembles one agent-day: sample the chain and dwell times, then resolve
//! a location for every chain position in order.

use anyhow::Result;
use rand_xorshift::XorShiftRng;

use zone_model::{ActivityType, LocationCatalog, LocationID, RoutingProvider};

use crate::activities::{sample_activity_chain, sample_dwell_times};
use crate::destination::DestinationFinder;
use crate::population::{Activity, Agent};
use crate::strata::{DayType, StrataTable};

/// Walk the sampled chain and pin every activity to a location. Fixed
/// activities use the agent's assigned locations; flexible ones are sampled
/// with the previous activity's zone as origin, so each choice depends on
/// where the agent already is. That sequential dependency is the point —
/// don't reorder it.
pub fn build_day_schedule(
    agent: &Agent,
    catalog: &LocationCatalog,
    finder: &DestinationFinder,
    router: &dyn RoutingProvider,
    table: &StrataTable,
    day_type: DayType,
    start: ActivityType,
    start_location: LocationID,
    rng: &mut XorShiftRng,
) -> Result<Vec<Activity>> {
    let key = agent.strata_key(day_type);
    let record = sample_activity_chain(table, key, start, rng)?;
    let dwells = sample_dwell_times(table, key, record, rng)?;

    let mut activities: Vec<Activity> = Vec::with_capacity(record.chain.len());
    for (idx, (kind, dwell)) in record.chain.iter().zip(dwells.into_iter()).enumerate() {
        let location = if idx == 0 {
            start_location
        } else if let Some(fixed) = agent.fixed_location(*kind) {
            fixed
        } else {
            let origin_zone = catalog.zone_of(activities[idx - 1].location);
            finder.sample_destination(catalog, router, origin_zone, *kind, rng)?
        };
        activities.push(Activity {
            kind: *kind,
            dwell,
            location,
        });
    }
    Ok(activities)
}
