//! Vehicle position as carried in relay announcements.

use libm::{atan2f, cosf, round, sinf, sqrtf};

const EARTH_RADIUS_KM: f32 = 6_371.0;
const DEGREES_PER_UNIT: f32 = 1e-7;
const UNITS_PER_DEGREE: f64 = 1e7;

/// Position in integer wire units: latitude/longitude in 1e-7 degrees, altitude in metres
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct Position {
    pub lat: i32,
    pub lon: i32,
    pub alt: i16,
}

impl Position {
    pub const fn new(lat: i32, lon: i32, alt: i16) -> Self {
        Position { lat, lon, alt }
    }

    /// Converts decimal degrees to wire units, rounding to the nearest 1e-7 degree
    pub fn from_degrees(lat: f64, lon: f64, alt: i16) -> Self {
        Position {
            lat: round(lat * UNITS_PER_DEGREE) as i32,
            lon: round(lon * UNITS_PER_DEGREE) as i32,
            alt,
        }
    }

    /// Great-circle distance in kilometres (haversine, altitude ignored)
    pub fn distance_km(&self, other: &Position) -> f32 {
        let lat1 = (self.lat as f32 * DEGREES_PER_UNIT).to_radians();
        let lat2 = (other.lat as f32 * DEGREES_PER_UNIT).to_radians();
        let d_lat = lat2 - lat1;
        let d_lon = ((other.lon as f32 - self.lon as f32) * DEGREES_PER_UNIT).to_radians();

        let sin_dlat = sinf(d_lat / 2.0);
        let sin_dlon = sinf(d_lon / 2.0);
        let a = sin_dlat * sin_dlat + cosf(lat1) * cosf(lat2) * sin_dlon * sin_dlon;
        let c = 2.0 * atan2f(sqrtf(a), sqrtf(1.0 - a));
        EARTH_RADIUS_KM * c
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn same_point_is_zero_distance() {
        let p = Position::from_degrees(47.5, 19.0, 120);
        assert!(p.distance_km(&p) < 1e-3);
    }

    #[test]
    fn one_degree_of_latitude() {
        let a = Position::from_degrees(0.0, 0.0, 0);
        let b = Position::from_degrees(1.0, 0.0, 0);
        let d = a.distance_km(&b);
        assert!((d - 111.19).abs() < 0.5, "distance {}", d);
    }

    #[test]
    fn degrees_keep_full_wire_precision() {
        assert_eq!(
            Position::from_degrees(47.4979123, 19.0402305, 120),
            Position::new(474_979_123, 190_402_305, 120)
        );
        assert_eq!(
            Position::from_degrees(-33.8688197, -151.2092955, 0),
            Position::new(-338_688_197, -1_512_092_955, 0)
        );
    }

    #[test]
    fn distance_is_symmetric() {
        let a = Position::from_degrees(47.1, 18.9, 0);
        let b = Position::from_degrees(47.3, 19.4, 0);
        assert!((a.distance_km(&b) - b.distance_km(&a)).abs() < 1e-3);
    }
}
