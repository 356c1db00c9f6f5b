//! Immutable run configuration. The engine owns no file formats; whoever
//! drives it hands over these structures already deserialized. The demo
//! defaults are loosely calibrated to German household travel survey
//! magnitudes, enough for the binary to run standalone.

use std::collections::BTreeMap;

use anyhow::Result;
use rand_distr::{Distribution, StandardNormal};
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};

use zone_model::{ActivityType, Distance, Duration, Mode, Speed};

use crate::destination::DeterrenceFunction;
use crate::population::Sex;
use crate::strata::{
    ActivityChainRecord, DayType, GaussianMixture, HomGroup, StrataKey, StrataTable,
};

/// One stratified bucket of observed activity chains, as produced by the
/// offline survey analysis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrataGroupRecord {
    pub key: StrataKey,
    /// How many survey respondents fed this bucket; thin buckets are skipped
    /// at lookup time.
    pub sample_size: usize,
    pub chains: Vec<ActivityChainRecord>,
}

/// A log-normal distribution over distances in meters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LogNormalDist {
    pub shape: f64,
    pub scale: f64,
}

impl LogNormalDist {
    pub fn sample(&self, rng: &mut XorShiftRng) -> Distance {
        let z: f64 = StandardNormal.sample(rng);
        Distance::meters(self.scale * (self.shape * z).exp())
    }
}

/// Multinomial-logit coefficients for one mode.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModeCoefficients {
    pub intercept: f64,
    /// Per minute of travel time.
    pub time: f64,
    pub log_time: f64,
    /// Per kilometer traveled.
    pub distance: f64,
    pub log_distance: f64,
    pub by_hom_group: BTreeMap<HomGroup, f64>,
    pub by_sex: BTreeMap<Sex, f64>,
    pub car_available: f64,
    pub by_purpose: BTreeMap<ActivityType, f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModeChoiceConfig {
    pub tour: BTreeMap<Mode, ModeCoefficients>,
    pub trip: BTreeMap<Mode, ModeCoefficients>,
    /// Speed constants for the no-route-found fallback model.
    pub fallback_speeds: BTreeMap<Mode, Speed>,
    /// Beeline-to-network stretch applied in the fallback model.
    pub fallback_detour_factor: f64,
    /// Imputed round-trip distance for trips that start and end at the same
    /// fixed location (a lunch outing from the office, say).
    pub round_trip_distances: BTreeMap<ActivityType, LogNormalDist>,
    /// When walk and transit times are within this threshold, transit gets
    /// the penalty below before the tour-level logit runs.
    pub transit_walk_threshold: Duration,
    pub transit_penalty: Duration,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PopulationConfig {
    /// Working / non-working / pupil-student shares.
    pub hom_group_shares: Vec<f64>,
    /// Car-user / car-other / other shares.
    pub mobility_group_shares: Vec<f64>,
    pub share_female: f64,
    /// Chance that an agent outside the car-user group still has a car.
    pub car_availability: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub rng_seed: u64,
    pub day_plan: Vec<DayType>,
    /// Strata buckets below this sample size degrade to broader ones.
    pub min_sample_size: usize,
    /// Agents per concurrency chunk.
    pub chunk_size: usize,
    /// None means one worker per CPU.
    pub num_workers: Option<usize>,
    pub deterrence: BTreeMap<ActivityType, DeterrenceFunction>,
    pub mode_choice: ModeChoiceConfig,
    pub population: PopulationConfig,
    pub strata_groups: Vec<StrataGroupRecord>,
}

impl Config {
    pub fn strata_table(&self) -> Result<StrataTable> {
        StrataTable::new(self.strata_groups.clone(), self.min_sample_size)
    }

    /// Built-in values plausible enough to run the demo without any input
    /// data.
    pub fn default_demo() -> Config {
        Config {
            rng_seed: 42,
            day_plan: vec![DayType::Mo, DayType::Tu],
            min_sample_size: 30,
            chunk_size: 5000,
            num_workers: None,
            deterrence: default_deterrence(),
            mode_choice: default_mode_choice(),
            population: PopulationConfig {
                hom_group_shares: vec![0.5, 0.35, 0.15],
                mobility_group_shares: vec![0.55, 0.25, 0.2],
                share_female: 0.5,
                car_availability: 0.3,
            },
            strata_groups: default_strata_groups(),
        }
    }
}

fn default_deterrence() -> BTreeMap<ActivityType, DeterrenceFunction> {
    let mut map = BTreeMap::new();
    map.insert(
        ActivityType::Home,
        DeterrenceFunction::LogNorm {
            shape: 1.1,
            scale: 5000.0,
        },
    );
    map.insert(
        ActivityType::Work,
        DeterrenceFunction::LogNorm {
            shape: 1.1,
            scale: 9000.0,
        },
    );
    map.insert(
        ActivityType::School,
        DeterrenceFunction::LogNorm {
            shape: 1.0,
            scale: 3000.0,
        },
    );
    map.insert(
        ActivityType::Shopping,
        DeterrenceFunction::LogNormPower {
            shape: 1.2,
            scale: 2500.0,
            exponent: -0.3,
        },
    );
    map.insert(
        ActivityType::Business,
        DeterrenceFunction::PowerExpo {
            alpha: 0.4,
            beta: -3e-4,
        },
    );
    map.insert(
        ActivityType::Other,
        DeterrenceFunction::LogNorm {
            shape: 1.3,
            scale: 4000.0,
        },
    );
    map
}

fn default_mode_choice() -> ModeChoiceConfig {
    let mut tour = BTreeMap::new();
    tour.insert(
        Mode::Walk,
        ModeCoefficients {
            intercept: 0.0,
            time: -0.06,
            ..Default::default()
        },
    );
    tour.insert(
        Mode::Bike,
        ModeCoefficients {
            intercept: -0.4,
            time: -0.045,
            by_purpose: [(ActivityType::Shopping, -0.3)].into_iter().collect(),
            ..Default::default()
        },
    );
    tour.insert(
        Mode::Transit,
        ModeCoefficients {
            intercept: -0.8,
            time: -0.03,
            log_time: -0.2,
            by_hom_group: [(HomGroup::PupilStudent, 0.8)].into_iter().collect(),
            ..Default::default()
        },
    );
    tour.insert(
        Mode::CarDriver,
        ModeCoefficients {
            intercept: -0.6,
            time: -0.025,
            distance: -0.02,
            car_available: 1.4,
            by_hom_group: [(HomGroup::PupilStudent, -1.2)].into_iter().collect(),
            by_purpose: [(ActivityType::Shopping, 0.4), (ActivityType::Business, 0.3)]
                .into_iter()
                .collect(),
            ..Default::default()
        },
    );
    tour.insert(
        Mode::CarPassenger,
        ModeCoefficients {
            intercept: -1.9,
            time: -0.025,
            ..Default::default()
        },
    );
    // Trip-level coefficients mirror the tour level; surveys fit them
    // separately, but the demo reuses one set.
    let trip = tour.clone();

    let fallback_speeds = Mode::all()
        .into_iter()
        .map(|m| (m, zone_model::default_speed(m)))
        .collect();

    let mut round_trip_distances = BTreeMap::new();
    for (activity, scale) in [
        (ActivityType::Home, 1500.0),
        (ActivityType::Work, 1000.0),
        (ActivityType::School, 800.0),
    ] {
        round_trip_distances.insert(activity, LogNormalDist { shape: 0.8, scale });
    }

    ModeChoiceConfig {
        tour,
        trip,
        fallback_speeds,
        fallback_detour_factor: 1.3,
        round_trip_distances,
        transit_walk_threshold: Duration::minutes(3),
        transit_penalty: Duration::minutes(20),
    }
}

fn diag_mixture(means: Vec<f64>, stddevs_min: Vec<f64>) -> Option<GaussianMixture> {
    let n = means.len();
    let covariances = (0..n)
        .map(|i| {
            (0..n)
                .map(|j| {
                    if i == j {
                        stddevs_min[i] * stddevs_min[i]
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect();
    Some(GaussianMixture {
        weights: vec![1.0],
        means: vec![means],
        covariances: vec![covariances],
    })
}

fn default_strata_groups() -> Vec<StrataGroupRecord> {
    use zone_model::ActivityType::{Business, Home, Other, School, Shopping, Work};

    let chain = |chain: Vec<ActivityType>, weight: f64, mixture: Option<GaussianMixture>| {
        ActivityChainRecord {
            chain,
            weight,
            dwell_mixture: mixture,
        }
    };

    let base_chains = vec![
        chain(vec![Home], 100.0, None),
        chain(
            vec![Home, Work, Home],
            180.0,
            diag_mixture(vec![450.0, 510.0], vec![60.0, 90.0]),
        ),
        chain(
            vec![Home, Work, Shopping, Home],
            60.0,
            diag_mixture(vec![450.0, 490.0, 40.0], vec![60.0, 80.0, 20.0]),
        ),
        chain(
            vec![Home, School, Home],
            50.0,
            diag_mixture(vec![470.0, 330.0], vec![45.0, 60.0]),
        ),
        chain(
            vec![Home, Shopping, Home],
            80.0,
            diag_mixture(vec![600.0, 45.0], vec![120.0, 25.0]),
        ),
        chain(
            vec![Home, Business, Home],
            20.0,
            diag_mixture(vec![480.0, 120.0], vec![90.0, 60.0]),
        ),
        chain(
            vec![Home, Other, Home],
            70.0,
            diag_mixture(vec![620.0, 90.0], vec![150.0, 50.0]),
        ),
        chain(vec![Other, Home], 30.0, diag_mixture(vec![25.0], vec![15.0])),
        chain(
            vec![Other, Shopping, Home],
            10.0,
            diag_mixture(vec![20.0, 40.0], vec![10.0, 20.0]),
        ),
    ];

    vec![
        // One specific bucket so demographics actually matter in the demo,
        // and the wildcard everything falls back to.
        StrataGroupRecord {
            key: StrataKey {
                day_type: DayType::Undefined,
                hom_group: HomGroup::Working,
                mobility_group: crate::strata::MobilityGroup::Undefined,
                age: crate::strata::AgeGroup::Undefined,
            },
            sample_size: 5000,
            chains: vec![
                chain(vec![Home], 40.0, None),
                chain(
                    vec![Home, Work, Home],
                    260.0,
                    diag_mixture(vec![440.0, 520.0], vec![50.0, 80.0]),
                ),
                chain(
                    vec![Home, Work, Shopping, Home],
                    90.0,
                    diag_mixture(vec![445.0, 500.0, 35.0], vec![50.0, 70.0, 15.0]),
                ),
                chain(vec![Other, Home], 20.0, diag_mixture(vec![20.0], vec![10.0])),
            ],
        },
        StrataGroupRecord {
            key: StrataKey::UNDEFINED,
            sample_size: 10_000,
            chains: base_chains,
        },
    ]
}
