//! Two-stage mode choice: tours anchored at home pick one mode for the whole
//! round trip (the bike or car has to come back), everything left over picks
//! per trip from the modes that don't drag a vehicle along.

use std::collections::BTreeMap;

use anyhow::Result;
use rand_xorshift::XorShiftRng;

use genutil::sample_weighted;
use zone_model::{
    default_speed, ActivityType, Distance, Duration, Location, LocationCatalog, Mode,
    RoutingProvider,
};

use crate::config::{ModeChoiceConfig, ModeCoefficients};
use crate::population::{Activity, Agent, Trip};

/// Hard floors applied before the logit's logarithmic terms.
const MIN_TIME: Duration = Duration::const_seconds(60.0);
const MIN_DISTANCE: Distance = Distance::const_meters(1.0);

/// A maximal run of consecutive trips ending when the agent arrives back
/// home, or when the day does.
#[derive(Clone, Debug, PartialEq)]
pub struct Tour {
    /// Indices into the diary's trip list.
    pub trips: Vec<usize>,
    /// The tour's first trip leaves from home.
    pub home_anchored: bool,
    /// The tour's last trip arrives at home.
    pub closed: bool,
}

/// Cut a day's activity sequence into tours. `activities` must have at least
/// two entries for any trips to exist; trip i connects activities i and i+1.
pub fn segment_tours(activities: &[Activity]) -> Vec<Tour> {
    let mut tours = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    for trip in 0..activities.len().saturating_sub(1) {
        current.push(trip);
        if activities[trip + 1].kind == ActivityType::Home {
            flush_tour(&mut tours, &mut current, activities);
        }
    }
    flush_tour(&mut tours, &mut current, activities);
    tours
}

fn flush_tour(tours: &mut Vec<Tour>, current: &mut Vec<usize>, activities: &[Activity]) {
    if current.is_empty() {
        return;
    }
    let trips = std::mem::take(current);
    let home_anchored = activities[trips[0]].kind == ActivityType::Home;
    let closed = activities[trips[trips.len() - 1] + 1].kind == ActivityType::Home;
    tours.push(Tour {
        trips,
        home_anchored,
        closed,
    });
}

/// Travel metrics for one trip under one mode, after routing fallbacks.
#[derive(Clone, Debug)]
struct ModeOption {
    time: Duration,
    distance: Distance,
    path: Option<Vec<zone_model::LonLat>>,
    only_walked: bool,
}

struct TripCandidate {
    options: BTreeMap<Mode, ModeOption>,
    /// The activity this trip serves, used for purpose-specific
    /// coefficients.
    purpose: ActivityType,
}

fn fallback_speed(config: &ModeChoiceConfig, mode: Mode) -> zone_model::Speed {
    config
        .fallback_speeds
        .get(&mode)
        .copied()
        .unwrap_or_else(|| default_speed(mode))
}

/// Route one trip under every mode, filling in the constant-speed model when
/// the router finds nothing. Trips that stay at one location get an imputed
/// round-trip distance instead of a route.
fn precompute_trip(
    origin: &Location,
    destination: &Location,
    purpose: ActivityType,
    router: &dyn RoutingProvider,
    config: &ModeChoiceConfig,
    rng: &mut XorShiftRng,
) -> TripCandidate {
    let mut options = BTreeMap::new();

    if origin.id() == destination.id() {
        // A round trip from one place; the survey only tells us the trip
        // happened, so draw a distance for it. Purposes without a fitted
        // distribution fall back to the location's self distance, clamped
        // because a single building's is zero.
        let distance = match config.round_trip_distances.get(&purpose) {
            Some(dist) => dist.sample(rng),
            None => (origin.self_distance() * 2.0).max(MIN_DISTANCE),
        };
        for mode in Mode::all() {
            options.insert(
                mode,
                ModeOption {
                    time: distance / fallback_speed(config, mode),
                    distance,
                    path: None,
                    only_walked: false,
                },
            );
        }
        return TripCandidate { options, purpose };
    }

    let beeline = origin.gps().gps_dist_meters(destination.gps());
    for mode in Mode::all() {
        let result = router.route(mode, origin, destination, None);
        let option = if result.succeeded {
            ModeOption {
                time: result.time,
                distance: result.distance,
                path: result.path,
                only_walked: result.only_walked,
            }
        } else {
            let distance = beeline * config.fallback_detour_factor;
            ModeOption {
                time: distance / fallback_speed(config, mode),
                distance,
                path: None,
                only_walked: false,
            }
        };
        options.insert(mode, option);
    }
    TripCandidate { options, purpose }
}

fn utility(
    coef: &ModeCoefficients,
    agent: &Agent,
    purpose: ActivityType,
    time: Duration,
    distance: Distance,
) -> f64 {
    let mins = time.max(MIN_TIME).to_minutes();
    let km = distance.max(MIN_DISTANCE).to_km();
    let mut u = coef.intercept
        + coef.time * mins
        + coef.log_time * mins.ln()
        + coef.distance * km
        + coef.log_distance * km.ln();
    if let Some(x) = coef.by_hom_group.get(&agent.hom_group) {
        u += x;
    }
    if let Some(x) = coef.by_sex.get(&agent.sex) {
        u += x;
    }
    if agent.car_available {
        u += coef.car_available;
    }
    if let Some(x) = coef.by_purpose.get(&purpose) {
        u += x;
    }
    u
}

/// Sample one mode from utilities via the softmax, excluding modes the agent
/// can't use. Subtracting the maximum keeps the exponentials finite.
fn sample_logit(
    coefficients: &BTreeMap<Mode, ModeCoefficients>,
    agent: &Agent,
    purpose: ActivityType,
    metrics: &BTreeMap<Mode, (Duration, Distance)>,
    allowed: impl Fn(Mode) -> bool,
    rng: &mut XorShiftRng,
) -> Result<Mode> {
    let mut modes = Vec::new();
    let mut utilities = Vec::new();
    for (mode, coef) in coefficients {
        if !allowed(*mode) {
            continue;
        }
        if mode.needs_car() && !agent.car_available {
            continue;
        }
        let (time, distance) = match metrics.get(mode) {
            Some(x) => *x,
            None => continue,
        };
        modes.push(*mode);
        utilities.push(utility(coef, agent, purpose, time, distance));
    }
    if modes.is_empty() {
        bail!("no feasible mode for agent {}", agent.id);
    }
    let max = utilities.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let weights: Vec<f64> = utilities.iter().map(|u| (u - max).exp()).collect();
    Ok(modes[sample_weighted(&weights, rng)])
}

/// The activity a tour is for: the destination the agent spends the longest
/// at. A closed tour's final trip arrives home, which isn't a purpose, so
/// that destination never enters the scan.
fn tour_purpose(tour: &Tour, activities: &[Activity]) -> ActivityType {
    let scan = if tour.closed && tour.trips.len() > 1 {
        &tour.trips[..tour.trips.len() - 1]
    } else {
        &tour.trips[..]
    };
    let mut best: Option<(Duration, ActivityType)> = None;
    for &trip in scan {
        let act = &activities[trip + 1];
        if let Some(dwell) = act.dwell {
            if best.map(|(d, _)| dwell > d).unwrap_or(true) {
                best = Some((dwell, act.kind));
            }
        }
    }
    match best {
        Some((_, kind)) => kind,
        None => activities[tour.trips[tour.trips.len() - 1] + 1].kind,
    }
}

/// Assign a mode to every trip of one day and produce the trip records.
pub fn choose_modes(
    agent: &Agent,
    activities: &[Activity],
    catalog: &LocationCatalog,
    router: &dyn RoutingProvider,
    config: &ModeChoiceConfig,
    rng: &mut XorShiftRng,
) -> Result<Vec<Trip>> {
    let mut candidates = Vec::new();
    for i in 0..activities.len().saturating_sub(1) {
        let origin = catalog.get(activities[i].location);
        let destination = catalog.get(activities[i + 1].location);
        candidates.push(precompute_trip(
            origin,
            destination,
            activities[i + 1].kind,
            router,
            config,
            rng,
        ));
    }

    let mut chosen: Vec<Option<Mode>> = vec![None; candidates.len()];
    for tour in segment_tours(activities) {
        if !(tour.home_anchored && tour.closed) {
            continue;
        }
        // Sum the tour's metrics per mode, then nudge transit if it's just
        // shadowing the walk times.
        let mut metrics: BTreeMap<Mode, (Duration, Distance)> = BTreeMap::new();
        for mode in Mode::all() {
            let mut time = Duration::ZERO;
            let mut distance = Distance::ZERO;
            for &trip in &tour.trips {
                let option = &candidates[trip].options[&mode];
                time = time + option.time;
                distance = distance + option.distance;
            }
            metrics.insert(mode, (time, distance));
        }
        let walk_time = metrics[&Mode::Walk].0;
        if let Some((transit_time, _)) = metrics.get_mut(&Mode::Transit) {
            if (*transit_time - walk_time).abs() <= config.transit_walk_threshold {
                *transit_time = *transit_time + config.transit_penalty;
            }
        }

        let purpose = tour_purpose(&tour, activities);
        let mode = sample_logit(&config.tour, agent, purpose, &metrics, |_| true, rng)?;
        for &trip in &tour.trips {
            chosen[trip] = Some(mode);
        }
    }

    // Open or away-anchored tours: per-trip choice, sans vehicle modes.
    for (i, candidate) in candidates.iter().enumerate() {
        if chosen[i].is_some() {
            continue;
        }
        let metrics: BTreeMap<Mode, (Duration, Distance)> = candidate
            .options
            .iter()
            .map(|(mode, o)| (*mode, (o.time, o.distance)))
            .collect();
        let mode = sample_logit(
            &config.trip,
            agent,
            candidate.purpose,
            &metrics,
            |m| !m.vehicle_continuity(),
            rng,
        )?;
        chosen[i] = Some(mode);
    }

    let mut trips = Vec::with_capacity(candidates.len());
    for (candidate, mode) in candidates.into_iter().zip(chosen) {
        let mut mode = mode.unwrap();
        // A transit trip that never boarded anything is a walk.
        if mode == Mode::Transit && candidate.options[&Mode::Transit].only_walked {
            mode = Mode::Walk;
        }
        let option = &candidate.options[&mode];
        trips.push(Trip {
            mode: Some(mode),
            time: option.time,
            distance: option.distance,
            path: option.path.clone(),
        });
    }
    Ok(trips)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::destination::DestinationFinder;
    use crate::population::generate_population;
    use rand::SeedableRng;
    use zone_model::{BeelineRouter, RouteResult};

    fn act(kind: ActivityType) -> Activity {
        Activity {
            kind,
            dwell: Some(Duration::hours(1)),
            location: zone_model::LocationID(0),
        }
    }

    #[test]
    fn work_day_is_one_closed_tour() {
        use ActivityType::*;
        let activities = vec![act(Home), act(Work), act(Shopping), act(Home)];
        let tours = segment_tours(&activities);
        assert_eq!(
            tours,
            vec![Tour {
                trips: vec![0, 1, 2],
                home_anchored: true,
                closed: true,
            }]
        );
    }

    #[test]
    fn overnight_day_splits_at_the_home_arrival() {
        use ActivityType::*;
        let activities = vec![act(Work), act(Home), act(School), act(Other)];
        let tours = segment_tours(&activities);
        assert_eq!(
            tours,
            vec![
                Tour {
                    trips: vec![0],
                    home_anchored: false,
                    closed: true,
                },
                Tour {
                    trips: vec![1, 2],
                    home_anchored: true,
                    closed: false,
                },
            ]
        );
    }

    #[test]
    fn tour_purpose_skips_the_closing_home_arrival() {
        use ActivityType::*;
        let with_dwell = |kind, mins: Option<usize>| Activity {
            kind,
            dwell: mins.map(Duration::minutes),
            location: zone_model::LocationID(0),
        };
        // The long stay at home between the two tours belongs to neither of
        // their purposes.
        let activities = vec![
            with_dwell(Home, Some(480)),
            with_dwell(Shopping, Some(30)),
            with_dwell(Home, Some(600)),
            with_dwell(Work, Some(480)),
            with_dwell(Home, None),
        ];
        let tours = segment_tours(&activities);
        assert_eq!(tours.len(), 2);
        assert_eq!(tour_purpose(&tours[0], &activities), Shopping);
        assert_eq!(tour_purpose(&tours[1], &activities), Work);
    }

    #[test]
    fn all_home_day_has_no_tours() {
        assert!(segment_tours(&[act(ActivityType::Home)]).is_empty());
        assert!(segment_tours(&[]).is_empty());
    }

    fn demo_setup() -> (Config, zone_model::LocationCatalog, Vec<Agent>) {
        let config = Config::default_demo();
        let mut rng = XorShiftRng::seed_from_u64(42);
        let catalog = crate::scenario::demo_town(4, &mut rng);
        let finder = DestinationFinder::new(config.deterrence.clone());
        let router = BeelineRouter::default();
        let agents =
            generate_population(&catalog, &finder, &router, &config.population, 20, &mut rng)
                .unwrap();
        (config, catalog, agents)
    }

    fn day(agent: &Agent) -> Vec<Activity> {
        use ActivityType::*;
        vec![
            Activity {
                kind: Home,
                dwell: Some(Duration::hours(8)),
                location: agent.home,
            },
            Activity {
                kind: Work,
                dwell: Some(Duration::hours(8)),
                location: agent.work,
            },
            Activity {
                kind: Home,
                dwell: None,
                location: agent.home,
            },
        ]
    }

    #[test]
    fn home_anchored_tours_keep_one_mode() {
        let (config, catalog, agents) = demo_setup();
        let router = BeelineRouter::default();
        let mut rng = XorShiftRng::seed_from_u64(7);
        for agent in &agents {
            let activities = day(agent);
            let trips = choose_modes(
                agent,
                &activities,
                &catalog,
                &router,
                &config.mode_choice,
                &mut rng,
            )
            .unwrap();
            assert_eq!(trips.len(), 2);
            // One tour, one mode. Transit demotion is the only exception.
            if trips.iter().all(|t| t.mode != Some(Mode::Walk)) {
                assert_eq!(trips[0].mode, trips[1].mode);
            }
            for trip in &trips {
                assert!(trip.time > Duration::ZERO);
                assert!(trip.distance > Distance::ZERO);
            }
        }
    }

    #[test]
    fn carless_agents_never_drive() {
        let (config, catalog, agents) = demo_setup();
        let router = BeelineRouter::default();
        let mut rng = XorShiftRng::seed_from_u64(11);
        for agent in agents.iter().filter(|a| !a.car_available) {
            let trips = choose_modes(
                agent,
                &day(agent),
                &catalog,
                &router,
                &config.mode_choice,
                &mut rng,
            )
            .unwrap();
            for trip in &trips {
                assert_ne!(trip.mode, Some(Mode::CarDriver));
            }
        }
    }

    #[test]
    fn away_anchored_trips_avoid_vehicle_modes() {
        let (config, catalog, agents) = demo_setup();
        let router = BeelineRouter::default();
        let mut rng = XorShiftRng::seed_from_u64(13);
        let agent = &agents[0];
        use ActivityType::*;
        // Starts away from home and never returns: every trip is resolved
        // individually.
        let activities = vec![
            Activity {
                kind: Other,
                dwell: Some(Duration::hours(1)),
                location: agent.work,
            },
            Activity {
                kind: Shopping,
                dwell: None,
                location: agent.school,
            },
        ];
        for _ in 0..20 {
            let trips = choose_modes(
                agent,
                &activities,
                &catalog,
                &router,
                &config.mode_choice,
                &mut rng,
            )
            .unwrap();
            assert_eq!(trips.len(), 1);
            let mode = trips[0].mode.unwrap();
            assert!(!mode.vehicle_continuity(), "got {}", mode);
        }
    }

    #[test]
    fn same_building_round_trip_has_positive_metrics() {
        let (config, catalog, agents) = demo_setup();
        let router = BeelineRouter::default();
        let mut rng = XorShiftRng::seed_from_u64(19);
        let agent = &agents[0];
        use ActivityType::*;
        // An errand inside the home building; Shopping has no fitted
        // round-trip distribution in the demo config.
        assert!(!config
            .mode_choice
            .round_trip_distances
            .contains_key(&Shopping));
        let activities = vec![
            Activity {
                kind: Home,
                dwell: Some(Duration::hours(8)),
                location: agent.home,
            },
            Activity {
                kind: Shopping,
                dwell: Some(Duration::hours(1)),
                location: agent.home,
            },
            Activity {
                kind: Home,
                dwell: None,
                location: agent.home,
            },
        ];
        let trips = choose_modes(
            agent,
            &activities,
            &catalog,
            &router,
            &config.mode_choice,
            &mut rng,
        )
        .unwrap();
        for trip in &trips {
            assert!(trip.distance > Distance::ZERO);
            assert!(trip.time > Duration::ZERO);
        }
    }

    /// A provider whose transit routes never leave the sidewalk.
    struct WalkingTransit;
    impl RoutingProvider for WalkingTransit {
        fn route(
            &self,
            mode: Mode,
            from: &Location,
            to: &Location,
            _departure: Option<Duration>,
        ) -> RouteResult {
            let distance = from.gps().gps_dist_meters(to.gps()).max(Distance::meters(100.0));
            RouteResult {
                distance,
                time: distance / default_speed(mode),
                path: Some(vec![from.gps(), to.gps()]),
                succeeded: true,
                only_walked: mode == Mode::Transit,
            }
        }
    }

    #[test]
    fn walking_only_transit_demotes_to_walk() {
        let (mut config, catalog, agents) = demo_setup();
        // Make transit irresistible so the demotion actually triggers.
        for table in [&mut config.mode_choice.tour, &mut config.mode_choice.trip] {
            for coef in table.values_mut() {
                coef.intercept = -100.0;
            }
            table.get_mut(&Mode::Transit).unwrap().intercept = 100.0;
        }
        config.mode_choice.transit_penalty = Duration::ZERO;

        let agent = &agents[0];
        let mut rng = XorShiftRng::seed_from_u64(17);
        let trips = choose_modes(
            agent,
            &day(agent),
            &catalog,
            &WalkingTransit,
            &config.mode_choice,
            &mut rng,
        )
        .unwrap();
        for trip in &trips {
            assert_eq!(trip.mode, Some(Mode::Walk));
        }
    }
}
