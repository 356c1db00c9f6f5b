//! The travel demand engine: stratified activity-chain and dwell-time
//! sampling, gravity-model destination choice with OD calibration,
//! per-agent schedule assembly, and two-stage multinomial-logit mode
//! choice, fanned out concurrently per agent.

#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

mod activities;
mod calibration;
mod config;
mod destination;
mod mode_choice;
mod population;
mod scenario;
mod schedule;
mod strata;

pub use self::activities::{sample_activity_chain, sample_dwell_times};
pub use self::calibration::{CalibrationFactors, OdMatrix};
pub use self::config::{
    Config, LogNormalDist, ModeChoiceConfig, ModeCoefficients, PopulationConfig, StrataGroupRecord,
};
pub use self::destination::{DestinationFinder, DeterrenceFunction};
pub use self::mode_choice::{choose_modes, segment_tours, Tour};
pub use self::population::{generate_population, Activity, Agent, Diary, Sex, Trip};
pub use self::scenario::{demo_town, Scenario};
pub use self::schedule::build_day_schedule;
pub use self::strata::{
    ActivityChainRecord, AgeGroup, DayType, GaussianMixture, HomGroup, MobilityGroup, StrataKey,
    StrataTable,
};
