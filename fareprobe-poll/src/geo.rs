use fareprobe_common::Coordinates;

/// WGS-84 equatorial radius.
pub const EARTH_RADIUS_METERS: f64 = 6_378_137.0;

/// Distance between two points on the globe.
pub trait Geodesic: Send + Sync {
    fn distance_meters(&self, from: Coordinates, to: Coordinates) -> f64;
}

/// Great-circle distance on a sphere, via the spherical law of cosines,
/// rounded to whole meters.
#[derive(Debug, Clone, Copy, Default)]
pub struct SphericalEarth;

impl Geodesic for SphericalEarth {
    fn distance_meters(&self, from: Coordinates, to: Coordinates) -> f64 {
        let (lat1, lat2) = (from.latitude.to_radians(), to.latitude.to_radians());
        let delta_lon = (from.longitude - to.longitude).to_radians();
        // Rounding can push the cosine just outside [-1, 1] for identical points.
        let cos_angle = (lat1.sin() * lat2.sin() + lat1.cos() * lat2.cos() * delta_lon.cos())
            .clamp(-1.0, 1.0);
        (cos_angle.acos() * EARTH_RADIUS_METERS).round()
    }
}
