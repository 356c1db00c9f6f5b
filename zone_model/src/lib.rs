//! The spatial model the demand engine runs against: type-safe units, a
//! minimal planar/GPS geometry, the polymorphic location catalog
//! (buildings, aggregated zones, off-map dummy zones), and the routing
//! collaborator interface.
//!
//! Map ingestion (OSM extraction, CRS transforms, grid construction) happens
//! upstream; this crate only holds the already-built catalog.

mod geometry;
mod locations;
mod routing;
mod units;

pub use crate::geometry::{LonLat, Pt2D};
pub use crate::locations::{
    ActivityType, AggregateZone, AttractionProfile, Building, BuildingInput, DummyInput, DummyZone,
    Landuse, Location, LocationCatalog, LocationID, ZoneInput,
};
pub use crate::routing::{default_speed, BeelineRouter, Mode, RouteResult, RoutingProvider};
pub use crate::units::{Distance, Duration, Speed};
