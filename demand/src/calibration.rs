//! Calibrates the gravity model against an external origin-destination
//! matrix, solving for multiplicative corrections that make simulated flows
//! reproduce the observed ones.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use zone_model::{ActivityType, LocationCatalog, LocationID, RoutingProvider};

use crate::destination::DestinationFinder;

/// Observed commuter flows between external zones, tagged by the activity
/// pair they describe (currently only home→work is supported).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OdMatrix {
    pub origin_activity: ActivityType,
    pub destination_activity: ActivityType,
    /// origin tag → destination tag → observed trips.
    pub rows: BTreeMap<String, BTreeMap<String, f64>>,
}

/// Correction factor tables, read-only once computed. Missing entries read
/// as no-op (1.0); sparse by design, since second-order pairs grow with the
/// square of the zone count.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CalibrationFactors {
    first_order_home: BTreeMap<String, f64>,
    first_order_work: BTreeMap<String, f64>,
    second_order: BTreeMap<(String, String), f64>,
}

impl CalibrationFactors {
    /// Destination-only correction. Activities other than home and work are
    /// uncalibrated, as are locations outside OD coverage.
    pub fn first_order(&self, activity: ActivityType, od_zone: Option<&str>) -> f64 {
        let map = match activity {
            ActivityType::Home => &self.first_order_home,
            ActivityType::Work => &self.first_order_work,
            _ => return 1.0,
        };
        match od_zone {
            Some(tag) => map.get(tag).cloned().unwrap_or(1.0),
            None => 1.0,
        }
    }

    /// Origin×destination correction for home→work flows.
    pub fn second_order(&self, origin: Option<&str>, destination: Option<&str>) -> f64 {
        match (origin, destination) {
            (Some(o), Some(d)) => self
                .second_order
                .get(&(o.to_string(), d.to_string()))
                .cloned()
                .unwrap_or(1.0),
            _ => 1.0,
        }
    }
}

impl DestinationFinder {
    /// Solve for the correction factors once, before any agent-level
    /// sampling, and activate them for all subsequent weight computations.
    pub fn calibrate(
        &mut self,
        catalog: &LocationCatalog,
        router: &dyn RoutingProvider,
        od: &OdMatrix,
    ) -> Result<()> {
        if self.is_calibrated() {
            bail!("calibration factors are read-only once computed");
        }
        if od.origin_activity != ActivityType::Home
            || od.destination_activity != ActivityType::Work
        {
            bail!(
                "unsupported OD activity pair {} -> {}; only home -> work is calibratable",
                od.origin_activity,
                od.destination_activity
            );
        }
        for (origin, row) in &od.rows {
            for (destination, trips) in row {
                if *trips < 0.0 {
                    bail!(
                        "negative OD entry {} for {} -> {}",
                        trips,
                        origin,
                        destination
                    );
                }
            }
        }

        let zones = catalog.zones();

        // Only OD rows whose origin intersects the focus area say anything
        // about the population we synthesize.
        let focus_tags: BTreeSet<&str> = zones
            .iter()
            .filter(|z| catalog.get(**z).in_focus_area())
            .filter_map(|z| catalog.get(*z).od_zone())
            .collect();
        let rows: BTreeMap<&String, &BTreeMap<String, f64>> = od
            .rows
            .iter()
            .filter(|(origin, _)| focus_tags.contains(origin.as_str()))
            .collect();

        // The model's prior: where homes land, and one uncalibrated gravity
        // step from each home zone to every work zone.
        let home_weights = self.weights_no_origin(catalog, zones, ActivityType::Home);
        let home_total: f64 = home_weights.iter().sum();
        if home_total <= 0.0 {
            bail!("model home mass is non-positive; the catalog has no residential attraction");
        }
        let p_home: Vec<f64> = home_weights.iter().map(|w| w / home_total).collect();

        let mut work_rows: Vec<Option<Vec<f64>>> = vec![None; zones.len()];
        let mut p_work = vec![0.0; zones.len()];
        for (idx, origin) in zones.iter().enumerate() {
            if p_home[idx] == 0.0 {
                continue;
            }
            let weights =
                self.weights_for_origin(catalog, router, *origin, zones, ActivityType::Work)?;
            let total: f64 = weights.iter().sum();
            if total <= 0.0 {
                continue;
            }
            for (j, w) in weights.iter().enumerate() {
                p_work[j] += p_home[idx] * w / total;
            }
            work_rows[idx] = Some(weights);
        }

        let mut factors = CalibrationFactors::default();
        factors.first_order_home = first_order_factors(
            catalog,
            zones,
            &p_home,
            &rows_mass(&rows, MassAxis::Origins),
        )?;
        factors.first_order_work = first_order_factors(
            catalog,
            zones,
            &p_work,
            &rows_mass(&rows, MassAxis::Destinations),
        )?;

        // Second-order: compare each observed origin row against the model's
        // transition mass out of that row's zones.
        for (origin_tag, observed_row) in &rows {
            let observed_total: f64 = observed_row.values().sum();

            let mut model_row: BTreeMap<&str, f64> = BTreeMap::new();
            for (idx, origin) in zones.iter().enumerate() {
                if catalog.get(*origin).od_zone() != Some(origin_tag.as_str()) {
                    continue;
                }
                let weights = match &work_rows[idx] {
                    Some(w) => w,
                    None => continue,
                };
                let total: f64 = weights.iter().sum();
                for (j, w) in weights.iter().enumerate() {
                    if let Some(tag) = catalog.get(zones[j]).od_zone() {
                        *model_row.entry(tag).or_insert(0.0) += p_home[idx] * w / total;
                    }
                }
            }
            let model_total: f64 = model_row.values().sum();

            for destination_tag in observed_row.keys() {
                // An unreachable origin row carries no calibration signal.
                let factor = if observed_total <= 0.0 || model_total <= 0.0 {
                    1.0
                } else {
                    let observed_share = observed_row[destination_tag] / observed_total;
                    let model_share =
                        model_row.get(destination_tag.as_str()).cloned().unwrap_or(0.0)
                            / model_total;
                    if model_share <= 0.0 {
                        1.0
                    } else {
                        observed_share / model_share
                    }
                };
                factors
                    .second_order
                    .insert((origin_tag.to_string(), destination_tag.clone()), factor);
            }
        }

        info!(
            "calibrated {} home, {} work and {} pair factors",
            factors.first_order_home.len(),
            factors.first_order_work.len(),
            factors.second_order.len()
        );
        self.factors = Some(factors);
        Ok(())
    }
}

enum MassAxis {
    Origins,
    Destinations,
}

fn rows_mass(
    rows: &BTreeMap<&String, &BTreeMap<String, f64>>,
    axis: MassAxis,
) -> BTreeMap<String, f64> {
    let mut mass: BTreeMap<String, f64> = BTreeMap::new();
    for (origin, row) in rows {
        for (destination, trips) in row.iter() {
            let tag = match axis {
                MassAxis::Origins => (*origin).clone(),
                MassAxis::Destinations => destination.clone(),
            };
            *mass.entry(tag).or_insert(0.0) += trips;
        }
    }
    mass
}

/// observed share ÷ modeled share per OD tag. Zero model mass can never be
/// calibrated up, so those tags read 0.
fn first_order_factors(
    catalog: &LocationCatalog,
    zones: &[LocationID],
    model: &[f64],
    observed: &BTreeMap<String, f64>,
) -> Result<BTreeMap<String, f64>> {
    let mut model_by_tag: BTreeMap<&str, f64> = BTreeMap::new();
    for (idx, zone) in zones.iter().enumerate() {
        if let Some(tag) = catalog.get(*zone).od_zone() {
            *model_by_tag.entry(tag).or_insert(0.0) += model[idx];
        }
    }
    let model_total: f64 = model_by_tag.values().sum();
    let observed_total: f64 = observed.values().sum();
    if observed_total <= 0.0 || model_total <= 0.0 {
        bail!(
            "can't calibrate: observed mass {}, modeled mass {}. Check the OD matrix for \
             negative values and make sure it intersects the focus area",
            observed_total,
            model_total
        );
    }

    let mut factors = BTreeMap::new();
    for (tag, model_mass) in model_by_tag {
        let observed_share = observed.get(tag).cloned().unwrap_or(0.0) / observed_total;
        let model_share = model_mass / model_total;
        let factor = if model_share <= 0.0 {
            0.0
        } else {
            observed_share / model_share
        };
        factors.insert(tag.to_string(), factor);
    }
    Ok(factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::DeterrenceFunction;
    use zone_model::{
        AttractionProfile, BeelineRouter, BuildingInput, LonLat, Pt2D, ZoneInput,
    };

    fn tagged_zone(tag: &str, lon: f64, population: f64, offices: f64) -> ZoneInput {
        ZoneInput {
            od_zone: Some(tag.to_string()),
            buildings: vec![
                BuildingInput {
                    center: Pt2D::new(lon * 100_000.0, 0.0),
                    gps: LonLat::new(lon, 50.0),
                    od_zone: Some(tag.to_string()),
                    in_focus_area: true,
                    attraction: AttractionProfile {
                        population,
                        offices,
                        ..Default::default()
                    },
                },
                BuildingInput {
                    center: Pt2D::new(lon * 100_000.0 + 50.0, 50.0),
                    gps: LonLat::new(lon + 0.0005, 50.0),
                    od_zone: Some(tag.to_string()),
                    in_focus_area: true,
                    attraction: AttractionProfile {
                        population: population / 2.0,
                        offices: offices / 2.0,
                        ..Default::default()
                    },
                },
            ],
        }
    }

    fn deterrence() -> BTreeMap<ActivityType, DeterrenceFunction> {
        ActivityType::all()
            .into_iter()
            .map(|a| {
                (
                    a,
                    DeterrenceFunction::LogNorm {
                        shape: 1.1,
                        scale: 8000.0,
                    },
                )
            })
            .collect()
    }

    fn test_catalog() -> LocationCatalog {
        LocationCatalog::new(
            vec![
                tagged_zone("A", 7.40, 100.0, 10.0),
                tagged_zone("B", 7.45, 50.0, 40.0),
                tagged_zone("C", 7.52, 10.0, 20.0),
            ],
            Vec::new(),
        )
    }

    /// Build the OD matrix the uncalibrated model itself would produce.
    fn model_consistent_od(
        finder: &DestinationFinder,
        catalog: &LocationCatalog,
        router: &dyn RoutingProvider,
    ) -> OdMatrix {
        let zones = catalog.zones();
        let home = finder.weights_no_origin(catalog, zones, ActivityType::Home);
        let home_total: f64 = home.iter().sum();

        let mut rows: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        for (idx, origin) in zones.iter().enumerate() {
            let origin_tag = catalog.get(*origin).od_zone().unwrap().to_string();
            let weights = finder
                .weights_for_origin(catalog, router, *origin, zones, ActivityType::Work)
                .unwrap();
            let total: f64 = weights.iter().sum();
            for (j, w) in weights.iter().enumerate() {
                let dest_tag = catalog.get(zones[j]).od_zone().unwrap().to_string();
                *rows
                    .entry(origin_tag.clone())
                    .or_default()
                    .entry(dest_tag)
                    .or_insert(0.0) += 1000.0 * (home[idx] / home_total) * (w / total);
            }
        }
        OdMatrix {
            origin_activity: ActivityType::Home,
            destination_activity: ActivityType::Work,
            rows,
        }
    }

    #[test]
    fn self_consistent_od_yields_unit_factors() {
        let catalog = test_catalog();
        let router = BeelineRouter::default();
        let mut finder = DestinationFinder::new(deterrence());
        let od = model_consistent_od(&finder, &catalog, &router);

        finder.calibrate(&catalog, &router, &od).unwrap();
        let factors = finder.factors.as_ref().unwrap();
        for tag in ["A", "B", "C"] {
            assert!(
                (factors.first_order(ActivityType::Home, Some(tag)) - 1.0).abs() < 1e-9,
                "home factor for {}",
                tag
            );
            assert!(
                (factors.first_order(ActivityType::Work, Some(tag)) - 1.0).abs() < 1e-9,
                "work factor for {}",
                tag
            );
            for dest in ["A", "B", "C"] {
                assert!(
                    (factors.second_order(Some(tag), Some(dest)) - 1.0).abs() < 1e-9,
                    "pair factor {} -> {}",
                    tag,
                    dest
                );
            }
        }
    }

    #[test]
    fn unsupported_activity_pair_is_rejected() {
        let catalog = test_catalog();
        let router = BeelineRouter::default();
        let mut finder = DestinationFinder::new(deterrence());
        let od = OdMatrix {
            origin_activity: ActivityType::Home,
            destination_activity: ActivityType::Shopping,
            rows: BTreeMap::new(),
        };
        assert!(finder.calibrate(&catalog, &router, &od).is_err());
    }

    #[test]
    fn non_intersecting_od_fails_with_diagnostic() {
        let catalog = test_catalog();
        let router = BeelineRouter::default();
        let mut finder = DestinationFinder::new(deterrence());
        let mut rows = BTreeMap::new();
        rows.insert("nowhere".to_string(), {
            let mut row = BTreeMap::new();
            row.insert("elsewhere".to_string(), 100.0);
            row
        });
        let od = OdMatrix {
            origin_activity: ActivityType::Home,
            destination_activity: ActivityType::Work,
            rows,
        };
        let err = finder.calibrate(&catalog, &router, &od).unwrap_err();
        assert!(err.to_string().contains("focus area"), "{}", err);
    }

    #[test]
    fn calibration_is_write_once() {
        let catalog = test_catalog();
        let router = BeelineRouter::default();
        let mut finder = DestinationFinder::new(deterrence());
        let od = model_consistent_od(&finder, &catalog, &router);
        finder.calibrate(&catalog, &router, &od).unwrap();
        assert!(finder.calibrate(&catalog, &router, &od).is_err());
    }
}
