//! Gravity-model destination choice: attraction-weighted, distance-decayed
//! sampling over zones, then buildings within the chosen zone.

use std::collections::BTreeMap;

use anyhow::Result;
use rand::Rng;
use rand_xorshift::XorShiftRng;

use genutil::{build_cumulative, sample_cumulative};
use zone_model::{
    ActivityType, Distance, Location, LocationCatalog, LocationID, Mode, RoutingProvider,
};

use crate::calibration::CalibrationFactors;

/// The log-transformed distance-decay term of the gravity model, fitted
/// offline per activity type.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum DeterrenceFunction {
    /// Log-normal density over trip distance.
    LogNorm { shape: f64, scale: f64 },
    /// Log-normal with an extra power-law term.
    LogNormPower {
        shape: f64,
        scale: f64,
        exponent: f64,
    },
    /// Combined power-law and exponential decay.
    PowerExpo { alpha: f64, beta: f64 },
}

impl DeterrenceFunction {
    /// The decay in log space; the gravity weight is attraction × exp(this).
    pub fn log_decay(&self, distance: Distance) -> f64 {
        // ln(0) would make every same-spot trip infinitely attractive.
        let d = distance.inner_meters().max(1.0);
        match self {
            DeterrenceFunction::LogNorm { shape, scale } => {
                let z = (d / scale).ln();
                -z * z / (2.0 * shape * shape) - (shape * d * (2.0 * std::f64::consts::PI).sqrt()).ln()
            }
            DeterrenceFunction::LogNormPower {
                shape,
                scale,
                exponent,
            } => {
                DeterrenceFunction::LogNorm {
                    shape: *shape,
                    scale: *scale,
                }
                .log_decay(distance)
                    + exponent * d.ln()
            }
            DeterrenceFunction::PowerExpo { alpha, beta } => alpha * d.ln() + beta * d,
        }
    }
}

/// Picks destinations for flexible activities. Immutable once calibrated;
/// shared read-only across workers.
#[derive(Clone, Debug)]
pub struct DestinationFinder {
    deterrence: BTreeMap<ActivityType, DeterrenceFunction>,
    /// Which mode's travel distance feeds the deterrence function.
    routing_mode: Mode,
    pub(crate) factors: Option<CalibrationFactors>,
}

impl DestinationFinder {
    pub fn new(deterrence: BTreeMap<ActivityType, DeterrenceFunction>) -> DestinationFinder {
        DestinationFinder {
            deterrence,
            routing_mode: Mode::CarDriver,
            factors: None,
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.factors.is_some()
    }

    fn deterrence(&self, activity: ActivityType) -> Result<&DeterrenceFunction> {
        self.deterrence
            .get(&activity)
            .ok_or_else(|| anyhow!("no deterrence function configured for {}", activity))
    }

    /// Travel distance feeding the gravity decay. A trip staying at one
    /// location uses that location's self distance.
    fn trip_distance(
        &self,
        router: &dyn RoutingProvider,
        origin: &Location,
        destination: &Location,
    ) -> Distance {
        if origin.id() == destination.id() {
            return origin.self_distance();
        }
        let result = router.route(self.routing_mode, origin, destination, None);
        if result.succeeded {
            result.distance
        } else {
            origin.gps().gps_dist_meters(destination.gps())
        }
    }

    /// Unnormalized probability that each candidate is the destination of
    /// `activity` for a trip starting at `origin`. Home placement has no
    /// origin; use [`DestinationFinder::weights_no_origin`] for it.
    pub fn weights_for_origin(
        &self,
        catalog: &LocationCatalog,
        router: &dyn RoutingProvider,
        origin: LocationID,
        destinations: &[LocationID],
        activity: ActivityType,
    ) -> Result<Vec<f64>> {
        if activity == ActivityType::Home {
            bail!("home isn't a trip destination; its weights are origin-free");
        }
        let deterrence = self.deterrence(activity)?;
        let origin_loc = catalog.get(origin);

        // An agent stranded in an off-map zone can only do the activities
        // that zone transfers; anything else keeps it in place.
        if let Some(dummy) = origin_loc.as_dummy() {
            if !dummy.transfer_activities.contains_key(&activity) {
                if !destinations.contains(&origin) {
                    bail!(
                        "off-map zone {} can't stay put for {}; it isn't among the candidates",
                        dummy.od_zone,
                        activity
                    );
                }
                return Ok(destinations
                    .iter()
                    .map(|id| if *id == origin { 1.0 } else { 0.0 })
                    .collect());
            }
        }

        let calibrate_work = activity == ActivityType::Work && self.factors.is_some();
        let mut weights = Vec::with_capacity(destinations.len());
        for id in destinations {
            let dest = catalog.get(*id);
            let mut w = dest.attraction(activity);
            if w > 0.0 {
                w *= deterrence
                    .log_decay(self.trip_distance(router, origin_loc, dest))
                    .exp();
            }
            if calibrate_work {
                let factors = self.factors.as_ref().unwrap();
                w *= factors.first_order(ActivityType::Work, dest.od_zone());
                w *= factors.second_order(origin_loc.od_zone(), dest.od_zone());
            }
            weights.push(w);
        }
        Ok(fallback_to_indicator(catalog, destinations, weights))
    }

    /// Pure attraction weights, no distance decay. Used for home placement
    /// and for choosing a building inside an already-chosen zone, where
    /// distance differences are negligible.
    pub fn weights_no_origin(
        &self,
        catalog: &LocationCatalog,
        destinations: &[LocationID],
        activity: ActivityType,
    ) -> Vec<f64> {
        let calibrated = matches!(activity, ActivityType::Home | ActivityType::Work)
            && self.factors.is_some();
        let weights = destinations
            .iter()
            .map(|id| {
                let dest = catalog.get(*id);
                let mut w = dest.attraction(activity);
                if calibrated {
                    w *= self
                        .factors
                        .as_ref()
                        .unwrap()
                        .first_order(activity, dest.od_zone());
                }
                w
            })
            .collect();
        fallback_to_indicator(catalog, destinations, weights)
    }

    /// Two-stage sampling: a zone by origin-aware gravity weights, then a
    /// building inside it by origin-free attraction. Dummy zones are their
    /// own destination.
    pub fn sample_destination(
        &self,
        catalog: &LocationCatalog,
        router: &dyn RoutingProvider,
        origin_zone: LocationID,
        activity: ActivityType,
        rng: &mut XorShiftRng,
    ) -> Result<LocationID> {
        let zones = catalog.zones();
        let weights = self.weights_for_origin(catalog, router, origin_zone, zones, activity)?;
        let zone_id = zones[sample_cumulative(&build_cumulative(&weights), rng.gen_range(0.0..1.0))];

        match catalog.get(zone_id) {
            Location::Aggregate(zone) => {
                let weights = self.weights_no_origin(catalog, &zone.members, activity);
                let idx = sample_cumulative(&build_cumulative(&weights), rng.gen_range(0.0..1.0));
                Ok(zone.members[idx])
            }
            _ => Ok(zone_id),
        }
    }
}

/// A zero total weight would make the cumulative distribution degenerate.
/// Real locations degrade to an indicator (any of them, uniformly); dummy
/// zones stay unreachable.
fn fallback_to_indicator(
    catalog: &LocationCatalog,
    destinations: &[LocationID],
    weights: Vec<f64>,
) -> Vec<f64> {
    if weights.iter().sum::<f64>() > 0.0 {
        return weights;
    }
    destinations
        .iter()
        .map(|id| match catalog.get(*id) {
            Location::Dummy(_) => 0.0,
            _ => 1.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::collections::BTreeMap as Map;
    use zone_model::{
        AttractionProfile, BeelineRouter, BuildingInput, DummyInput, LonLat, Pt2D, ZoneInput,
    };

    pub fn default_deterrence() -> BTreeMap<ActivityType, DeterrenceFunction> {
        ActivityType::all()
            .into_iter()
            .map(|a| {
                (
                    a,
                    DeterrenceFunction::LogNorm {
                        shape: 1.1,
                        scale: 5000.0,
                    },
                )
            })
            .collect()
    }

    fn building(x: f64, population: f64, shops: f64) -> BuildingInput {
        BuildingInput {
            center: Pt2D::new(x, 0.0),
            gps: LonLat::new(x / 100_000.0, 50.0),
            od_zone: None,
            in_focus_area: true,
            attraction: AttractionProfile {
                population,
                shops,
                ..Default::default()
            },
        }
    }

    fn catalog_with_dummy(transfer: Vec<(ActivityType, f64)>) -> LocationCatalog {
        LocationCatalog::new(
            vec![
                ZoneInput {
                    od_zone: None,
                    buildings: vec![building(0.0, 50.0, 0.0), building(100.0, 20.0, 2.0)],
                },
                ZoneInput {
                    od_zone: None,
                    buildings: vec![building(5000.0, 10.0, 5.0)],
                },
            ],
            vec![DummyInput {
                gps: LonLat::new(1.0, 50.0),
                od_zone: "far".to_string(),
                transfer_activities: transfer.into_iter().collect::<Map<_, _>>(),
            }],
        )
    }

    #[test]
    fn home_is_rejected_by_origin_aware_weights() {
        let catalog = catalog_with_dummy(vec![]);
        let finder = DestinationFinder::new(default_deterrence());
        let router = BeelineRouter::default();
        assert!(finder
            .weights_for_origin(
                &catalog,
                &router,
                catalog.zones()[0],
                catalog.zones(),
                ActivityType::Home
            )
            .is_err());
    }

    #[test]
    fn dummy_without_home_transfer_gets_zero_home_mass() {
        let catalog = catalog_with_dummy(vec![(ActivityType::Work, 1.0)]);
        let finder = DestinationFinder::new(default_deterrence());
        let weights = finder.weights_no_origin(&catalog, catalog.zones(), ActivityType::Home);
        // Zones in order: two aggregates, then the dummy.
        assert!(weights[0] > 0.0);
        assert_eq!(weights[2], 0.0);
    }

    #[test]
    fn dummy_origin_with_disallowed_activity_is_one_hot() {
        let catalog = catalog_with_dummy(vec![(ActivityType::Work, 1.0)]);
        let finder = DestinationFinder::new(default_deterrence());
        let router = BeelineRouter::default();
        let dummy = catalog.zones()[2];
        let weights = finder
            .weights_for_origin(&catalog, &router, dummy, catalog.zones(), ActivityType::Shopping)
            .unwrap();
        assert_eq!(weights[0], 0.0);
        assert_eq!(weights[1], 0.0);
        assert_eq!(weights[2], 1.0);

        // An allowed activity routes like everywhere else; the dummy
        // contributes its configured weight.
        let weights = finder
            .weights_for_origin(&catalog, &router, dummy, catalog.zones(), ActivityType::Work)
            .unwrap();
        assert!(weights[2] > 0.0);
    }

    #[test]
    fn stranded_dummy_needs_itself_among_the_candidates() {
        let catalog = catalog_with_dummy(vec![(ActivityType::Work, 1.0)]);
        let finder = DestinationFinder::new(default_deterrence());
        let router = BeelineRouter::default();
        let dummy = catalog.zones()[2];
        // With the dummy cut out of the slice, the stay-put answer has
        // nowhere to go; an all-zero vector would sample garbage.
        assert!(finder
            .weights_for_origin(
                &catalog,
                &router,
                dummy,
                &catalog.zones()[..2],
                ActivityType::Shopping
            )
            .is_err());
    }

    #[test]
    fn zero_attraction_falls_back_to_indicator() {
        let catalog = catalog_with_dummy(vec![]);
        let finder = DestinationFinder::new(default_deterrence());
        // Nothing in the catalog has school attraction.
        let weights = finder.weights_no_origin(&catalog, catalog.zones(), ActivityType::School);
        assert_eq!(weights[0], 1.0);
        assert_eq!(weights[1], 1.0);
        assert_eq!(weights[2], 0.0);
    }

    #[test]
    fn two_stage_sampling_returns_buildings_from_real_zones() {
        let catalog = catalog_with_dummy(vec![]);
        let finder = DestinationFinder::new(default_deterrence());
        let router = BeelineRouter::default();
        let mut rng = XorShiftRng::seed_from_u64(42);
        for _ in 0..50 {
            let dest = finder
                .sample_destination(
                    &catalog,
                    &router,
                    catalog.zones()[0],
                    ActivityType::Shopping,
                    &mut rng,
                )
                .unwrap();
            match catalog.get(dest) {
                Location::Building(b) => assert!(b.attraction.shops > 0.0),
                other => panic!("sampled a non-building: {:?}", other.id()),
            }
        }
    }
}
