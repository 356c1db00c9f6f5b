use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Distance, LonLat, Pt2D};

/// Every spatial unit (building, aggregated zone, off-map dummy zone) gets
/// one handle in a single flat namespace.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationID(pub usize);

impl fmt::Display for LocationID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Location #{}", self.0)
    }
}

/// What somebody does at a place. Home, Work and School are fixed per agent;
/// the rest are resolved per trip by the destination finder.
#[derive(
    Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ActivityType {
    Home,
    Work,
    School,
    Shopping,
    Business,
    Other,
}

impl ActivityType {
    pub fn all() -> Vec<ActivityType> {
        vec![
            ActivityType::Home,
            ActivityType::Work,
            ActivityType::School,
            ActivityType::Shopping,
            ActivityType::Business,
            ActivityType::Other,
        ]
    }

    /// Fixed activities happen at one of the agent's assigned locations.
    pub fn is_fixed(self) -> bool {
        matches!(
            self,
            ActivityType::Home | ActivityType::Work | ActivityType::School
        )
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ActivityType::Home => "home",
                ActivityType::Work => "work",
                ActivityType::School => "school",
                ActivityType::Shopping => "shopping",
                ActivityType::Business => "business",
                ActivityType::Other => "other",
            }
        )
    }
}

/// OSM-derived landuse classes, collapsed the way the importer collapses
/// them.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Landuse {
    Residential,
    Commercial,
    Industrial,
    Recreational,
    Agriculture,
    Forest,
    None,
}

/// The precomputed pull a location exerts on different activities. Zones sum
/// these over their member buildings once, at construction.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AttractionProfile {
    pub population: f64,
    pub shops: f64,
    pub offices: f64,
    pub schools: f64,
    pub universities: f64,
    /// Total footprint area per landuse class, in square meters.
    pub areas: BTreeMap<Landuse, f64>,
}

impl AttractionProfile {
    pub fn add(&mut self, other: &AttractionProfile) {
        self.population += other.population;
        self.shops += other.shops;
        self.offices += other.offices;
        self.schools += other.schools;
        self.universities += other.universities;
        for (landuse, area) in &other.areas {
            *self.areas.entry(*landuse).or_insert(0.0) += area;
        }
    }

    fn area(&self, landuse: Landuse) -> f64 {
        self.areas.get(&landuse).cloned().unwrap_or(0.0)
    }

    /// Unnormalized attraction of this location for one activity. The area
    /// terms are scaled down so that counted amenities dominate where
    /// they're mapped and footprints take over where they're not.
    pub fn for_activity(&self, activity: ActivityType) -> f64 {
        match activity {
            ActivityType::Home => self.population,
            ActivityType::Work => {
                self.offices
                    + 0.5 * self.shops
                    + 1e-4 * (self.area(Landuse::Commercial) + self.area(Landuse::Industrial))
            }
            ActivityType::School => self.schools + self.universities,
            ActivityType::Shopping => self.shops + 1e-4 * self.area(Landuse::Commercial),
            ActivityType::Business => self.offices + self.shops,
            ActivityType::Other => {
                self.shops
                    + self.offices
                    + self.schools
                    + 1e-3 * self.population
                    + 1e-4 * self.area(Landuse::Recreational)
            }
        }
    }
}

/// One mapped building, with its attraction attributes extracted upstream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Building {
    pub id: LocationID,
    pub center: Pt2D,
    pub gps: LonLat,
    /// Tag of the external origin-destination zone containing this building,
    /// if the OD data covers it.
    pub od_zone: Option<String>,
    pub in_focus_area: bool,
    /// The aggregate zone this building belongs to.
    pub zone: LocationID,
    pub attraction: AttractionProfile,
}

/// A grid cell aggregating many buildings, used as the first stage of
/// destination sampling. Immutable after construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AggregateZone {
    pub id: LocationID,
    pub center: Pt2D,
    pub gps: LonLat,
    pub od_zone: Option<String>,
    pub in_focus_area: bool,
    pub members: Vec<LocationID>,
    /// Sum over members, computed once.
    pub attraction: AttractionProfile,
    /// Average distance between two points of the zone, used as the
    /// within-zone travel distance.
    pub mean_self_distance: Distance,
}

/// A destination outside mapped coverage. Only reachable for the activity
/// types the calibration input enables; everything else reads weight 0
/// (unreachable). Never decomposes into buildings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DummyZone {
    pub id: LocationID,
    pub gps: LonLat,
    pub od_zone: String,
    /// Per permitted activity, the share of that activity's demand this
    /// off-map zone absorbs.
    pub transfer_activities: BTreeMap<ActivityType, f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Location {
    Building(Building),
    Aggregate(AggregateZone),
    Dummy(DummyZone),
}

impl Location {
    pub fn id(&self) -> LocationID {
        match self {
            Location::Building(b) => b.id,
            Location::Aggregate(z) => z.id,
            Location::Dummy(d) => d.id,
        }
    }

    pub fn gps(&self) -> LonLat {
        match self {
            Location::Building(b) => b.gps,
            Location::Aggregate(z) => z.gps,
            Location::Dummy(d) => d.gps,
        }
    }

    /// Travel distance for a trip starting and ending here.
    pub fn self_distance(&self) -> Distance {
        match self {
            Location::Building(_) => Distance::ZERO,
            Location::Aggregate(z) => z.mean_self_distance,
            Location::Dummy(_) => Distance::meters(1.0),
        }
    }

    pub fn in_focus_area(&self) -> bool {
        match self {
            Location::Building(b) => b.in_focus_area,
            Location::Aggregate(z) => z.in_focus_area,
            Location::Dummy(_) => false,
        }
    }

    pub fn od_zone(&self) -> Option<&str> {
        match self {
            Location::Building(b) => b.od_zone.as_deref(),
            Location::Aggregate(z) => z.od_zone.as_deref(),
            Location::Dummy(d) => Some(&d.od_zone),
        }
    }

    pub fn as_dummy(&self) -> Option<&DummyZone> {
        match self {
            Location::Dummy(d) => Some(d),
            _ => None,
        }
    }

    /// Raw attraction of this location for one activity, before any distance
    /// decay or calibration. The dummy convention: activities outside the
    /// transfer set read 0.
    pub fn attraction(&self, activity: ActivityType) -> f64 {
        match self {
            Location::Building(b) => b.attraction.for_activity(activity),
            Location::Aggregate(z) => z.attraction.for_activity(activity),
            Location::Dummy(d) => d.transfer_activities.get(&activity).cloned().unwrap_or(0.0),
        }
    }
}

/// Inputs for catalog construction; the grid itself (which buildings form a
/// zone) is decided upstream.
#[derive(Clone, Debug)]
pub struct BuildingInput {
    pub center: Pt2D,
    pub gps: LonLat,
    pub od_zone: Option<String>,
    pub in_focus_area: bool,
    pub attraction: AttractionProfile,
}

#[derive(Clone, Debug)]
pub struct ZoneInput {
    pub od_zone: Option<String>,
    pub buildings: Vec<BuildingInput>,
}

#[derive(Clone, Debug)]
pub struct DummyInput {
    pub gps: LonLat,
    pub od_zone: String,
    pub transfer_activities: BTreeMap<ActivityType, f64>,
}

/// The read-only set of all location handles. Shared freely across worker
/// threads; nothing here mutates after construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocationCatalog {
    locations: Vec<Location>,
    /// Aggregate and dummy zones, the candidates for stage-one sampling.
    zones: Vec<LocationID>,
    buildings: Vec<LocationID>,
}

impl LocationCatalog {
    pub fn new(zone_inputs: Vec<ZoneInput>, dummy_inputs: Vec<DummyInput>) -> LocationCatalog {
        let mut locations = Vec::new();
        let mut zones = Vec::new();
        let mut buildings = Vec::new();

        for input in zone_inputs {
            if input.buildings.is_empty() {
                continue;
            }
            let zone_id = LocationID(locations.len());
            // Reserve the zone's slot now; members follow it.
            locations.push(Location::Dummy(DummyZone {
                id: zone_id,
                gps: LonLat::new(0.0, 0.0),
                od_zone: String::new(),
                transfer_activities: BTreeMap::new(),
            }));
            zones.push(zone_id);

            let mut members = Vec::new();
            let mut attraction = AttractionProfile::default();
            let mut in_focus_area = false;
            let centers: Vec<Pt2D> = input.buildings.iter().map(|b| b.center).collect();
            let center = Pt2D::center(&centers);
            let gps = {
                let lon = input.buildings.iter().map(|b| b.gps.longitude).sum::<f64>()
                    / (input.buildings.len() as f64);
                let lat = input.buildings.iter().map(|b| b.gps.latitude).sum::<f64>()
                    / (input.buildings.len() as f64);
                LonLat::new(lon, lat)
            };
            let mean_self_distance = Distance::meters(
                centers
                    .iter()
                    .map(|pt| pt.dist_to(center).inner_meters())
                    .sum::<f64>()
                    / (centers.len() as f64),
            );

            for b in input.buildings {
                let id = LocationID(locations.len());
                attraction.add(&b.attraction);
                in_focus_area |= b.in_focus_area;
                members.push(id);
                buildings.push(id);
                locations.push(Location::Building(Building {
                    id,
                    center: b.center,
                    gps: b.gps,
                    od_zone: b.od_zone,
                    in_focus_area: b.in_focus_area,
                    zone: zone_id,
                    attraction: b.attraction,
                }));
            }

            locations[zone_id.0] = Location::Aggregate(AggregateZone {
                id: zone_id,
                center,
                gps,
                od_zone: input.od_zone,
                in_focus_area,
                members,
                attraction,
                mean_self_distance,
            });
        }

        for input in dummy_inputs {
            let id = LocationID(locations.len());
            zones.push(id);
            locations.push(Location::Dummy(DummyZone {
                id,
                gps: input.gps,
                od_zone: input.od_zone,
                transfer_activities: input.transfer_activities,
            }));
        }

        LocationCatalog {
            locations,
            zones,
            buildings,
        }
    }

    pub fn get(&self, id: LocationID) -> &Location {
        &self.locations[id.0]
    }

    /// All stage-one sampling candidates: aggregates first, then dummies.
    pub fn zones(&self) -> &[LocationID] {
        &self.zones
    }

    pub fn all_buildings(&self) -> &[LocationID] {
        &self.buildings
    }

    pub fn num_locations(&self) -> usize {
        self.locations.len()
    }

    /// The enclosing aggregate zone of any location. Zones and dummies
    /// resolve to themselves.
    pub fn zone_of(&self, id: LocationID) -> LocationID {
        match self.get(id) {
            Location::Building(b) => b.zone,
            Location::Aggregate(z) => z.id,
            Location::Dummy(d) => d.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn test_building(x: f64, y: f64, population: f64, shops: f64) -> BuildingInput {
        BuildingInput {
            center: Pt2D::new(x, y),
            gps: LonLat::new(x / 100_000.0, y / 100_000.0),
            od_zone: None,
            in_focus_area: true,
            attraction: AttractionProfile {
                population,
                shops,
                ..Default::default()
            },
        }
    }

    #[test]
    fn zone_aggregates_members() {
        let catalog = LocationCatalog::new(
            vec![ZoneInput {
                od_zone: Some("A".to_string()),
                buildings: vec![
                    test_building(0.0, 0.0, 10.0, 1.0),
                    test_building(100.0, 0.0, 5.0, 0.0),
                ],
            }],
            Vec::new(),
        );
        assert_eq!(catalog.zones().len(), 1);
        let zone_id = catalog.zones()[0];
        match catalog.get(zone_id) {
            Location::Aggregate(z) => {
                assert_eq!(z.members.len(), 2);
                assert_eq!(z.attraction.population, 15.0);
                assert_eq!(z.attraction.shops, 1.0);
                assert!(z.mean_self_distance > Distance::ZERO);
            }
            _ => panic!("expected an aggregate"),
        }
        for b in catalog.all_buildings() {
            assert_eq!(catalog.zone_of(*b), zone_id);
        }
    }

    #[test]
    fn dummy_attraction_follows_transfer_set() {
        let mut transfer = BTreeMap::new();
        transfer.insert(ActivityType::Work, 2.5);
        let catalog = LocationCatalog::new(
            Vec::new(),
            vec![DummyInput {
                gps: LonLat::new(0.0, 0.0),
                od_zone: "X".to_string(),
                transfer_activities: transfer,
            }],
        );
        let dummy = catalog.get(catalog.zones()[0]);
        assert_eq!(dummy.attraction(ActivityType::Work), 2.5);
        assert_eq!(dummy.attraction(ActivityType::Home), 0.0);
        assert_eq!(dummy.self_distance(), Distance::meters(1.0));
    }
}
