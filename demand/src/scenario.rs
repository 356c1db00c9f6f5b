//! The top-level driver: calibrate, create agents, then simulate every
//! agent-day in bounded parallel chunks. One master RNG forks a child per
//! agent, so output depends only on the seed, never on scheduling.

use anyhow::Result;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};

use genutil::{fork_rng, parallel_map, prettyprint_usize, Parallelism};
use zone_model::{
    ActivityType, AttractionProfile, BuildingInput, LocationCatalog, LonLat, Pt2D,
    RoutingProvider, ZoneInput,
};

use crate::calibration::OdMatrix;
use crate::config::Config;
use crate::destination::DestinationFinder;
use crate::mode_choice::choose_modes;
use crate::population::{generate_population, Agent, Diary};
use crate::schedule::build_day_schedule;
use crate::strata::StrataTable;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub agents: Vec<Agent>,
}

impl Scenario {
    /// Run the whole pipeline. `od_matrix` is optional; without it the
    /// gravity model runs uncalibrated.
    pub fn generate(
        config: &Config,
        catalog: &LocationCatalog,
        router: &dyn RoutingProvider,
        od_matrix: Option<&OdMatrix>,
        num_agents: usize,
    ) -> Result<Scenario> {
        let mut master_rng = XorShiftRng::seed_from_u64(config.rng_seed);

        let mut finder = DestinationFinder::new(config.deterrence.clone());
        if let Some(od) = od_matrix {
            finder.calibrate(catalog, router, od)?;
        }
        let table = config.strata_table()?;

        info!("creating {} agents", prettyprint_usize(num_agents));
        let mut agents = generate_population(
            catalog,
            &finder,
            router,
            &config.population,
            num_agents,
            &mut master_rng,
        )?;

        let parallelism = match config.num_workers {
            Some(n) => Parallelism::Polite(n),
            None => Parallelism::Fastest,
        };
        info!(
            "simulating {} days for {} agents",
            config.day_plan.len(),
            prettyprint_usize(agents.len())
        );

        let mut simulated = Vec::with_capacity(agents.len());
        while !agents.is_empty() {
            let rest = agents.split_off(config.chunk_size.min(agents.len()));
            let chunk = std::mem::replace(&mut agents, rest);
            // Fork every child RNG here, in agent order, before any worker
            // runs. The pool's scheduling then can't affect the draws.
            let requests: Vec<(Agent, XorShiftRng)> = chunk
                .into_iter()
                .map(|agent| (agent, fork_rng(&mut master_rng)))
                .collect();
            let results = parallel_map(parallelism, "simulating agents", requests, |(agent, rng)| {
                simulate_agent(agent, catalog, &finder, router, &table, config, rng)
            });
            for result in results {
                simulated.push(result?);
            }
        }

        Ok(Scenario { agents: simulated })
    }

    /// Total trips across all agents and days.
    pub fn num_trips(&self) -> usize {
        self.agents
            .iter()
            .flat_map(|a| &a.diaries)
            .map(|d| d.trips.len())
            .sum()
    }
}

/// Simulate every day of one agent's plan. Days chain: a day whose last
/// activity isn't at home starts the next day wherever the agent ended up.
fn simulate_agent(
    mut agent: Agent,
    catalog: &LocationCatalog,
    finder: &DestinationFinder,
    router: &dyn RoutingProvider,
    table: &StrataTable,
    config: &Config,
    mut rng: XorShiftRng,
) -> Result<Agent> {
    let mut start = ActivityType::Home;
    let mut start_location = agent.home;
    for (day, day_type) in config.day_plan.iter().enumerate() {
        let activities = build_day_schedule(
            &agent,
            catalog,
            finder,
            router,
            table,
            *day_type,
            start,
            start_location,
            &mut rng,
        )?;
        let trips = choose_modes(
            &agent,
            &activities,
            catalog,
            router,
            &config.mode_choice,
            &mut rng,
        )?;

        let last = activities.last().unwrap();
        if last.kind == ActivityType::Home {
            start = ActivityType::Home;
            start_location = agent.home;
        } else {
            start = ActivityType::Other;
            start_location = last.location;
        }
        agent.diaries.push(Diary {
            day,
            day_type: *day_type,
            activities,
            trips,
        });
    }
    Ok(agent)
}

/// A synthetic square town for the demo binary and tests: `num_zones` zones
/// on a line, each with housing, a shop, an office, and a school somewhere
/// in it.
pub fn demo_town(num_zones: usize, rng: &mut XorShiftRng) -> LocationCatalog {
    use rand::Rng;

    let mut zone_inputs = Vec::new();
    for z in 0..num_zones {
        let base_x = (z as f64) * 2000.0;
        let mut buildings = Vec::new();
        let building = |x: f64, y: f64, attraction: AttractionProfile| BuildingInput {
            center: Pt2D::new(x, y),
            gps: LonLat::new(8.0 + x / 111_000.0, 50.0 + y / 111_000.0),
            od_zone: Some(format!("zone-{}", z)),
            in_focus_area: true,
            attraction,
        };
        for _ in 0..5 {
            let x = base_x + rng.gen_range(0.0..1000.0);
            let y = rng.gen_range(0.0..1000.0);
            buildings.push(building(
                x,
                y,
                AttractionProfile {
                    population: rng.gen_range(5.0..50.0),
                    ..Default::default()
                },
            ));
        }
        buildings.push(building(
            base_x + 500.0,
            1200.0,
            AttractionProfile {
                shops: 3.0,
                offices: 5.0,
                ..Default::default()
            },
        ));
        buildings.push(building(
            base_x + 800.0,
            1400.0,
            AttractionProfile {
                schools: 1.0,
                ..Default::default()
            },
        ));
        zone_inputs.push(ZoneInput {
            od_zone: Some(format!("zone-{}", z)),
            buildings,
        });
    }
    LocationCatalog::new(zone_inputs, Vec::new())
}
