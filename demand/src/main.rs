//! Runs the engine against a synthetic town and prints a mode split, mostly
//! a smoke test and a seed for profiling.

#[macro_use]
extern crate log;

use std::collections::BTreeMap;

use anyhow::Result;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use structopt::StructOpt;

use demand::{demo_town, Config, DayType, Scenario};
use zone_model::{BeelineRouter, Distance, Mode};

#[derive(StructOpt)]
#[structopt(name = "demand", about = "Generate synthetic daily travel demand for a demo town")]
struct Args {
    /// How many agents to simulate
    #[structopt(long, default_value = "1000")]
    agents: usize,
    /// How many days to simulate, cycling Monday through Sunday
    #[structopt(long, default_value = "2")]
    days: usize,
    /// How many zones the demo town gets
    #[structopt(long, default_value = "5")]
    zones: usize,
    #[structopt(long, default_value = "42")]
    seed: u64,
    /// Worker threads; defaults to one per CPU
    #[structopt(long)]
    workers: Option<usize>,
    /// Write the full scenario as JSON here
    #[structopt(long)]
    output: Option<String>,
}

fn main() -> Result<()> {
    genutil::logger::setup();
    let args = Args::from_args();

    let week = [
        DayType::Mo,
        DayType::Tu,
        DayType::We,
        DayType::Th,
        DayType::Fr,
        DayType::Sa,
        DayType::So,
    ];
    let mut config = Config::default_demo();
    config.rng_seed = args.seed;
    config.num_workers = args.workers;
    config.day_plan = (0..args.days).map(|d| week[d % week.len()]).collect();

    let mut town_rng = XorShiftRng::seed_from_u64(args.seed);
    let catalog = demo_town(args.zones, &mut town_rng);
    let router = BeelineRouter::default();

    let scenario = Scenario::generate(&config, &catalog, &router, None, args.agents)?;

    let mut trips_per_mode: BTreeMap<Mode, usize> = BTreeMap::new();
    let mut distance_per_mode: BTreeMap<Mode, Distance> = BTreeMap::new();
    for agent in &scenario.agents {
        for diary in &agent.diaries {
            for trip in &diary.trips {
                if let Some(mode) = trip.mode {
                    *trips_per_mode.entry(mode).or_insert(0) += 1;
                    *distance_per_mode.entry(mode).or_insert(Distance::ZERO) += trip.distance;
                }
            }
        }
    }

    info!(
        "{} agents made {} trips",
        scenario.agents.len(),
        scenario.num_trips()
    );
    for (mode, count) in &trips_per_mode {
        info!(
            "  {}: {} trips, {:.1} km total",
            mode,
            count,
            distance_per_mode[mode].to_km()
        );
    }

    if let Some(path) = args.output {
        std::fs::write(&path, serde_json::to_string_pretty(&scenario)?)?;
        info!("wrote {}", path);
    }
    Ok(())
}
