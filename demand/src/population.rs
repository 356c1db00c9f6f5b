//! Agents, their diaries, and the factory creating the synthetic
//! population.

use anyhow::Result;
use rand::Rng;
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};

use genutil::{sample_weighted, WeightedPool};
use zone_model::{
    ActivityType, Distance, Duration, Location, LocationCatalog, LocationID, LonLat, Mode,
    RoutingProvider,
};

use crate::config::PopulationConfig;
use crate::destination::DestinationFinder;
use crate::strata::{AgeGroup, DayType, HomGroup, MobilityGroup, StrataKey};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sex {
    Female,
    Male,
}

/// One synthetic person. Created once by the factory; only its diaries grow
/// during simulation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    pub id: usize,
    pub hom_group: HomGroup,
    pub mobility_group: MobilityGroup,
    pub age: usize,
    pub sex: Sex,
    pub car_available: bool,
    pub home: LocationID,
    pub work: LocationID,
    pub school: LocationID,
    pub diaries: Vec<Diary>,
}

impl Agent {
    pub fn strata_key(&self, day_type: DayType) -> StrataKey {
        StrataKey {
            day_type,
            hom_group: self.hom_group,
            mobility_group: self.mobility_group,
            age: AgeGroup::from_age(self.age),
        }
    }

    /// The agent's fixed location for an activity, if it has one.
    pub fn fixed_location(&self, activity: ActivityType) -> Option<LocationID> {
        match activity {
            ActivityType::Home => Some(self.home),
            ActivityType::Work => Some(self.work),
            ActivityType::School => Some(self.school),
            _ => None,
        }
    }
}

/// One simulated day of one agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Diary {
    pub day: usize,
    pub day_type: DayType,
    pub activities: Vec<Activity>,
    /// Filled by mode choice; trips[i] connects activities[i] to
    /// activities[i+1].
    pub trips: Vec<Trip>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Activity {
    pub kind: ActivityType,
    /// None means "until the end of the day"; only ever the last entry.
    pub dwell: Option<Duration>,
    pub location: LocationID,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trip {
    pub mode: Option<Mode>,
    pub time: Duration,
    pub distance: Distance,
    pub path: Option<Vec<LonLat>>,
}

/// Create the population: homes drawn by building population without
/// replacement (each resident occupies a distinct slot), demographics from
/// configured shares, work and school via the calibrated destination finder.
pub fn generate_population(
    catalog: &LocationCatalog,
    finder: &DestinationFinder,
    router: &dyn RoutingProvider,
    config: &PopulationConfig,
    num_agents: usize,
    rng: &mut XorShiftRng,
) -> Result<Vec<Agent>> {
    let buildings = catalog.all_buildings();
    if buildings.is_empty() {
        bail!("can't populate a catalog without buildings");
    }
    let capacities: Vec<usize> = buildings
        .iter()
        .map(|id| match catalog.get(*id) {
            Location::Building(b) => b.attraction.population.round() as usize,
            _ => 0,
        })
        .collect();
    let mut pool = WeightedPool::new(capacities.clone());

    let hom_groups = [
        HomGroup::Working,
        HomGroup::NonWorking,
        HomGroup::PupilStudent,
    ];
    let mobility_groups = [MobilityGroup::CarUser, MobilityGroup::CarOther, MobilityGroup::Other];

    let mut agents = Vec::with_capacity(num_agents);
    for id in 0..num_agents {
        // More agents than residents: refill the pool and keep going.
        if pool.is_empty() {
            pool = WeightedPool::new(capacities.clone());
        }
        let home = match pool.draw(rng) {
            Some(idx) => buildings[idx],
            // All capacities are zero; any building will do.
            None => buildings[rng.gen_range(0..buildings.len())],
        };

        let hom_group = hom_groups[sample_weighted(&config.hom_group_shares, rng)];
        let mobility_group = mobility_groups[sample_weighted(&config.mobility_group_shares, rng)];
        let age = match hom_group {
            HomGroup::PupilStudent => rng.gen_range(6..30),
            _ => rng.gen_range(18..90),
        };
        let sex = if rng.gen_bool(config.share_female) {
            Sex::Female
        } else {
            Sex::Male
        };
        let car_available =
            mobility_group == MobilityGroup::CarUser || rng.gen_bool(config.car_availability);

        let home_zone = catalog.zone_of(home);
        let work =
            finder.sample_destination(catalog, router, home_zone, ActivityType::Work, rng)?;
        let school =
            finder.sample_destination(catalog, router, home_zone, ActivityType::School, rng)?;

        agents.push(Agent {
            id,
            hom_group,
            mobility_group,
            age,
            sex,
            car_available,
            home,
            work,
            school,
            diaries: Vec::new(),
        });
    }
    Ok(agents)
}
