use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Distance;

/// Longitude is x, latitude is y.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LonLat {
    pub longitude: f64,
    pub latitude: f64,
}

impl LonLat {
    pub fn new(lon: f64, lat: f64) -> LonLat {
        LonLat {
            longitude: lon,
            latitude: lat,
        }
    }

    /// Haversine distance.
    pub fn gps_dist_meters(self, other: LonLat) -> Distance {
        let earth_radius_m = 6_371_000.0;
        let lon1 = self.longitude.to_radians();
        let lon2 = other.longitude.to_radians();
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();

        let delta_lat = lat2 - lat1;
        let delta_lon = lon2 - lon1;

        let a = (delta_lat / 2.0).sin().powi(2)
            + (delta_lon / 2.0).sin().powi(2) * lat1.cos() * lat2.cos();
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        Distance::meters(earth_radius_m * c)
    }
}

impl fmt::Display for LonLat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "LonLat({}, {})", self.longitude, self.latitude)
    }
}

/// A point in a planar projection of the modeled area, in meters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pt2D {
    pub x: f64,
    pub y: f64,
}

impl Pt2D {
    pub fn new(x: f64, y: f64) -> Pt2D {
        Pt2D { x, y }
    }

    pub fn dist_to(self, other: Pt2D) -> Distance {
        Distance::meters(((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt())
    }

    pub fn center(pts: &[Pt2D]) -> Pt2D {
        let len = pts.len() as f64;
        Pt2D {
            x: pts.iter().map(|p| p.x).sum::<f64>() / len,
            y: pts.iter().map(|p| p.y).sum::<f64>() / len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_sanity() {
        // Roughly one degree of latitude.
        let a = LonLat::new(7.46, 51.51);
        let b = LonLat::new(7.46, 52.51);
        let d = a.gps_dist_meters(b).inner_meters();
        assert!((d - 111_195.0).abs() < 500.0, "{}", d);
    }
}
