//! Great-circle math for leg geometry.
//!
//! All positions are radians, all distances nautical miles, all bearings
//! true and in radians (0 = north, positive clockwise).

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

pub const EARTH_RADIUS_NM: f64 = 3440.065;
pub const FT_PER_NM: f64 = 6076.12;
pub const M_TO_FT: f64 = 3.28084;

/// A position on the sphere, radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat_rad: f64,
    pub lon_rad: f64,
}

impl GeoPoint {
    pub fn from_deg(lat_deg: f64, lon_deg: f64) -> Self {
        Self {
            lat_rad: lat_deg.to_radians(),
            lon_rad: lon_deg.to_radians(),
        }
    }

    pub fn lat_deg(&self) -> f64 {
        self.lat_rad.to_degrees()
    }

    pub fn lon_deg(&self) -> f64 {
        self.lon_rad.to_degrees()
    }

    /// Great-circle distance to `other` using the haversine formula.
    pub fn gc_dist_nm(&self, other: GeoPoint) -> f64 {
        let dphi = other.lat_rad - self.lat_rad;
        let dlambda = other.lon_rad - self.lon_rad;
        let a = (dphi / 2.0).sin().powi(2)
            + self.lat_rad.cos() * other.lat_rad.cos() * (dlambda / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_NM * a.sqrt().atan2((1.0 - a).sqrt())
    }

    /// Initial great-circle bearing towards `other`, radians in (-pi, pi].
    pub fn gc_bearing_rad(&self, other: GeoPoint) -> f64 {
        let dlambda = other.lon_rad - self.lon_rad;
        let x = dlambda.sin() * other.lat_rad.cos();
        let y = self.lat_rad.cos() * other.lat_rad.sin()
            - self.lat_rad.sin() * other.lat_rad.cos() * dlambda.cos();
        x.atan2(y)
    }
}

/// Project a point along `bearing_rad` for `dist_nm`.
pub fn pos_from_brng_dist(origin: GeoPoint, bearing_rad: f64, dist_nm: f64) -> GeoPoint {
    if dist_nm.abs() <= f64::EPSILON {
        return origin;
    }

    let ad = dist_nm / EARTH_RADIUS_NM;
    let sin_lat1 = origin.lat_rad.sin();
    let cos_lat1 = origin.lat_rad.cos();

    let sin_lat2 = sin_lat1 * ad.cos() + cos_lat1 * ad.sin() * bearing_rad.cos();
    let lat2 = sin_lat2.clamp(-1.0, 1.0).asin();

    let y = bearing_rad.sin() * ad.sin() * cos_lat1;
    let x = ad.cos() - sin_lat1 * sin_lat2;
    let mut lon2 = origin.lon_rad + y.atan2(x);
    lon2 = (lon2 + PI).rem_euclid(2.0 * PI) - PI;

    GeoPoint {
        lat_rad: lat2,
        lon_rad: lon2,
    }
}

/// Intersection of two great-circle rays given by a point and a bearing each.
///
/// Returns `None` when the rays are antipodal/parallel or the intersection is
/// numerically degenerate.
pub fn pos_from_intc(
    p1: GeoPoint,
    brng1_rad: f64,
    p2: GeoPoint,
    brng2_rad: f64,
) -> Option<GeoPoint> {
    let dist12 = p1.gc_dist_nm(p2) / EARTH_RADIUS_NM;
    if dist12 <= f64::EPSILON {
        return Some(p1);
    }

    let theta12 = p1.gc_bearing_rad(p2);
    let theta21 = p2.gc_bearing_rad(p1);

    let ang1 = normalize_rad(brng1_rad - theta12);
    let ang2 = normalize_rad(theta21 - brng2_rad);

    if ang1.sin() == 0.0 && ang2.sin() == 0.0 {
        return None; // coincident paths
    }
    if ang1.sin() * ang2.sin() < 0.0 {
        return None; // rays diverge
    }

    let ang1 = ang1.abs();
    let ang2 = ang2.abs();

    let ang3 = (-ang1.cos() * ang2.cos() + ang1.sin() * ang2.sin() * dist12.cos()).acos();
    let dist13 = (dist12.sin() * ang1.sin() * ang2.sin())
        .atan2(ang2.cos() + ang1.cos() * ang3.cos());

    Some(pos_from_brng_dist(p1, brng1_rad, dist13 * EARTH_RADIUS_NM))
}

/// First intersection, along the ray from `start` with bearing `brng_rad`, of
/// a circle of `radius_nm` around `center`.
///
/// Picks the solution closest ahead of `start` (consistent with the direction
/// of travel); returns `None` when the ray never comes within `radius_nm` of
/// the center.
pub fn pos_from_dme_intc(
    start: GeoPoint,
    brng_rad: f64,
    center: GeoPoint,
    radius_nm: f64,
) -> Option<GeoPoint> {
    let dist_sc = start.gc_dist_nm(center) / EARTH_RADIUS_NM;
    let radius = radius_nm / EARTH_RADIUS_NM;
    let brng_sc = start.gc_bearing_rad(center);

    // Cross-track distance from the center to the ray.
    let dxt = (dist_sc.sin() * normalize_rad(brng_sc - brng_rad).sin()).asin();
    if dxt.abs() > radius {
        return None;
    }

    // Along-track distance of the abeam point, then back off along the ray.
    let dat = (dist_sc.cos() / dxt.cos()).clamp(-1.0, 1.0).acos();
    let half_chord = (radius.cos() / dxt.cos()).clamp(-1.0, 1.0).acos();

    let d1 = dat - half_chord;
    let d2 = dat + half_chord;
    let along = if d1 > 0.0 { d1 } else { d2 };
    if along <= 0.0 {
        return None;
    }

    Some(pos_from_brng_dist(start, brng_rad, along * EARTH_RADIUS_NM))
}

/// Normalize an angle into (-pi, pi].
pub fn normalize_rad(ang_rad: f64) -> f64 {
    let mut a = ang_rad.rem_euclid(2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    }
    a
}

/// True when `ang1` is clockwise of `ang2` across the shorter arc.
pub fn is_ang_greater(ang1_rad: f64, ang2_rad: f64) -> bool {
    normalize_rad(ang1_rad - ang2_rad) > 0.0
}

/// Signed turn from `from_brng` onto `to_brng`, radians in (-pi, pi].
/// Positive is a right turn, negative a left turn.
pub fn turn_angle_rad(from_brng_rad: f64, to_brng_rad: f64) -> f64 {
    normalize_rad(to_brng_rad - from_brng_rad)
}
