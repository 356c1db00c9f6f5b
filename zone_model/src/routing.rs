use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Distance, Duration, Location, LonLat, Speed};

/// Travel modes the engine decides between.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Mode {
    Walk,
    Bike,
    Transit,
    CarDriver,
    CarPassenger,
}

impl Mode {
    pub fn all() -> Vec<Mode> {
        vec![
            Mode::Walk,
            Mode::Bike,
            Mode::Transit,
            Mode::CarDriver,
            Mode::CarPassenger,
        ]
    }

    /// Modes that carry a personal vehicle along: once picked for one trip
    /// of a tour, the vehicle has to come home, so the whole tour sticks
    /// with it.
    pub fn vehicle_continuity(self) -> bool {
        matches!(self, Mode::CarDriver | Mode::Bike)
    }

    /// Does the agent need a car available for this?
    pub fn needs_car(self) -> bool {
        matches!(self, Mode::CarDriver)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Mode::Walk => "walk",
                Mode::Bike => "bike",
                Mode::Transit => "transit",
                Mode::CarDriver => "car (driver)",
                Mode::CarPassenger => "car (passenger)",
            }
        )
    }
}

/// What the external router answers for one (mode, origin, destination)
/// query.
#[derive(Clone, Debug)]
pub struct RouteResult {
    pub distance: Distance,
    pub time: Duration,
    pub path: Option<Vec<LonLat>>,
    /// False means no route was found; the caller applies its fallback
    /// model. Providers must not error for unreachable pairs.
    pub succeeded: bool,
    /// A transit query that found no actual transit leg, just walking.
    pub only_walked: bool,
}

impl RouteResult {
    pub fn not_found() -> RouteResult {
        RouteResult {
            distance: Distance::ZERO,
            time: Duration::ZERO,
            path: None,
            succeeded: false,
            only_walked: false,
        }
    }
}

/// The external routing engine. Implementations may hit a network service or
/// a cached matrix; the engine assumes neither and tolerates a cold provider
/// on every call.
pub trait RoutingProvider: Send + Sync {
    fn route(
        &self,
        mode: Mode,
        from: &Location,
        to: &Location,
        departure: Option<Duration>,
    ) -> RouteResult;
}

/// Straight-line fallback router: haversine distance scaled by a per-mode
/// detour factor, at a constant per-mode speed. Also the stand-in provider
/// for tests and the demo.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BeelineRouter {
    pub detour_factors: BTreeMap<Mode, f64>,
    pub speeds: BTreeMap<Mode, Speed>,
}

impl Default for BeelineRouter {
    fn default() -> BeelineRouter {
        let mut detour_factors = BTreeMap::new();
        let mut speeds = BTreeMap::new();
        for mode in Mode::all() {
            detour_factors.insert(
                mode,
                match mode {
                    Mode::Walk => 1.2,
                    Mode::Bike => 1.3,
                    Mode::Transit => 1.5,
                    Mode::CarDriver | Mode::CarPassenger => 1.4,
                },
            );
            speeds.insert(mode, default_speed(mode));
        }
        BeelineRouter {
            detour_factors,
            speeds,
        }
    }
}

pub fn default_speed(mode: Mode) -> Speed {
    Speed::km_per_hour(match mode {
        Mode::Walk => 5.0,
        Mode::Bike => 15.0,
        Mode::Transit => 25.0,
        Mode::CarDriver | Mode::CarPassenger => 40.0,
    })
}

impl RoutingProvider for BeelineRouter {
    fn route(
        &self,
        mode: Mode,
        from: &Location,
        to: &Location,
        _departure: Option<Duration>,
    ) -> RouteResult {
        let beeline = from.gps().gps_dist_meters(to.gps());
        let distance = beeline * self.detour_factors[&mode];
        RouteResult {
            distance,
            time: distance / self.speeds[&mode],
            path: None,
            succeeded: true,
            only_walked: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AttractionProfile, Building, LocationID, Pt2D};

    fn building_at(lon: f64, lat: f64) -> Location {
        Location::Building(Building {
            id: LocationID(0),
            center: Pt2D::new(0.0, 0.0),
            gps: LonLat::new(lon, lat),
            od_zone: None,
            in_focus_area: true,
            zone: LocationID(0),
            attraction: AttractionProfile::default(),
        })
    }

    #[test]
    fn beeline_router_scales_by_mode() {
        let router = BeelineRouter::default();
        let a = building_at(7.46, 51.51);
        let b = building_at(7.47, 51.51);
        let walk = router.route(Mode::Walk, &a, &b, None);
        let car = router.route(Mode::CarDriver, &a, &b, None);
        assert!(walk.succeeded && car.succeeded);
        assert!(car.distance > walk.distance);
        assert!(walk.time > car.time);
    }
}
