//! Leg geometry: turns every supported path terminator into a flyable
//! great-circle path with turn anticipation at the joints.
//!
//! The pass runs over the whole leg list front to back. Each leg's start
//! depends on the previous leg's resolved geometry, so a single forward
//! sweep settles the route; running the sweep again without an intervening
//! edit changes nothing.

use crate::arena::{HEAD, TAIL};
use crate::models::{
    Fix, FixKind, Leg, LegPath, PathTerm, SegCategory, INTC_LEG_NAME,
};
use crate::plan::PlanState;
use crate::spatial::{
    is_ang_greater, normalize_rad, pos_from_brng_dist, pos_from_dme_intc, pos_from_intc,
    GeoPoint, FT_PER_NM,
};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

/// Tuning constants of the geometry pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometryConfig {
    /// Assumed turn radius, nm.
    pub turn_radius_nm: f64,
    /// Assumed climb gradient for altitude-terminated legs, ft per nm.
    pub clb_rate_ft_per_nm: f64,
    /// RNP fallback inside procedures, nm.
    pub rnp_proc_nm: f64,
    /// RNP fallback enroute, nm.
    pub rnp_enrt_nm: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            turn_radius_nm: 1.0,
            clb_rate_ft_per_nm: 500.0,
            rnp_proc_nm: 1.0,
            rnp_enrt_nm: 3.0,
        }
    }
}

/// Runway context for climb legs that begin on a runway.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunwayContext {
    pub dep_len_ft: Option<f64>,
    pub arr_len_ft: Option<f64>,
}

/// Full recompute sweep. Also normalizes leg types around discontinuities:
/// doubled discontinuities collapse, the leg after one restarts as IF, and
/// an IF with a live predecessor joins as DF (or CF after legs that cannot
/// be followed by a direct).
pub fn recompute(
    plan: &mut PlanState,
    cfg: &GeometryConfig,
    rwys: RunwayContext,
    hdg_trk_diff_deg: f64,
) {
    let mut curr = plan.legs.next(HEAD);
    while curr != TAIL {
        let next = plan.legs.next(curr);
        let prev = plan.legs.prev(curr);

        // A gap needs real legs on both sides; leading, trailing and doubled
        // discontinuities are dropped.
        if plan.legs.get(curr).is_discon
            && (prev == HEAD || next == TAIL || plan.legs.get(prev).is_discon)
        {
            let seg = plan.legs.get(curr).seg;
            debug!(slot = curr, "dropping stray discontinuity");
            plan.delete_segment(seg, false, false, false);
            curr = next;
            continue;
        }

        if plan.legs.get(prev).is_discon {
            if let Some(leg) = plan.legs.get_mut(curr).leg.as_mut() {
                leg.leg_type = PathTerm::IF;
            }
        } else if prev != HEAD
            && plan.legs.get(curr).leg.as_ref().map(|l| l.leg_type) == Some(PathTerm::IF)
        {
            let prev_tp = plan.legs.get(prev).leg.as_ref().map(|l| l.leg_type);
            let joined = match prev_tp {
                Some(tp) if tp.not_followed_by_df() => PathTerm::CF,
                _ => PathTerm::DF,
            };
            if let Some(leg) = plan.legs.get_mut(curr).leg.as_mut() {
                leg.leg_type = joined;
            }
        }

        if !plan.legs.get(curr).is_discon {
            calculate_leg(plan, curr, cfg, rwys, hdg_trk_diff_deg);
        }

        // Displays draw the gap on the leg before it.
        let next_disc = next != TAIL && plan.legs.get(next).is_discon;
        plan.legs.get_mut(curr).path.has_disc = next_disc;

        curr = next;
    }
}

fn rnp_nm(plan: &PlanState, leg_slot: usize, cfg: &GeometryConfig) -> f64 {
    let node = plan.legs.get(leg_slot);
    if let Some(leg) = &node.leg {
        if leg.rnp_nm != 0.0 {
            return leg.rnp_nm;
        }
    }
    let cat = plan.segs.get(node.seg).category;
    if cat != Some(SegCategory::Enroute) {
        cfg.rnp_proc_nm
    } else {
        cfg.rnp_enrt_nm
    }
}

fn alt_pseudo_fix(pos: GeoPoint, alt_ft: f64) -> Fix {
    Fix {
        id: format!("({})", alt_ft as i64),
        pos,
        kind: FixKind::Waypoint,
    }
}

/// End of an altitude-terminated climb: out along the course until the
/// gradient reaches the target, plus the runway run when departing from one.
fn xa_end_point(
    start: GeoPoint,
    crs_true_rad: f64,
    alt_ft: f64,
    rwy_len_ft: Option<f64>,
    cfg: &GeometryConfig,
) -> GeoPoint {
    let mut clb_nm = alt_ft / cfg.clb_rate_ft_per_nm;
    if let Some(len_ft) = rwy_len_ft {
        clb_nm += len_ft / FT_PER_NM;
    }
    pos_from_brng_dist(start, crs_true_rad, clb_nm)
}

/// Where the leg after `prev` begins, given `prev`'s resolved path. The
/// second value reports a bypassed course intercept: the interception point
/// lies behind the previous leg, so the new leg never gets flown.
fn leg_start(
    prev_path: &LegPath,
    prev_leg: &Leg,
    next: &Leg,
    cfg: &GeometryConfig,
) -> (GeoPoint, bool) {
    let r = cfg.turn_radius_nm;

    if prev_leg.leg_type == PathTerm::IF {
        if let Some(fix) = &prev_leg.main_fix {
            return (fix.pos, false);
        }
    }

    if next.leg_type.is_turn_offsettable() {
        let brng1 = prev_path.end.gc_bearing_rad(prev_path.start);
        if next.leg_type == PathTerm::DF {
            if let Some(fix) = &next.main_fix {
                // Tangent from the fix onto whichever turn circle is nearer.
                let p1 = pos_from_brng_dist(prev_path.end, brng1 + PI / 2.0, r);
                let p2 = pos_from_brng_dist(prev_path.end, brng1 - PI / 2.0, r);
                let d1 = fix.pos.gc_dist_nm(p1);
                let d2 = fix.pos.gc_dist_nm(p2);

                let (ctr, dist, right) = if d1 < d2 { (p1, d1, true) } else { (p2, d2, false) };
                if dist <= f64::EPSILON {
                    return (prev_path.end, false);
                }
                let theta = (r / dist).clamp(-1.0, 1.0).acos();
                let ang_main = ctr.gc_bearing_rad(fix.pos);
                let ang_end = ctr.gc_bearing_rad(prev_path.end);
                let mut ang_doub = if right {
                    ang_end - ang_main - theta
                } else {
                    ang_main - theta - ang_end
                };
                if ang_doub < 0.0 {
                    ang_doub += 2.0 * PI;
                }

                if (ang_doub / 2.0 - PI / 2.0).abs() > f64::EPSILON {
                    let offs_nm = r * (ang_doub / 2.0).tan();
                    return (pos_from_brng_dist(prev_path.end, brng1 + PI, offs_nm), false);
                }
                let side = if right { PI / 2.0 } else { -PI / 2.0 };
                return (pos_from_brng_dist(ctr, brng1 + side, r), false);
            }
            return (prev_path.end, false);
        }

        // Course/heading legs: roll-out point past the previous end.
        let crs_rad = next.outbd_crs_true_rad();
        let brng1 = if brng1 < 0.0 { brng1 + 2.0 * PI } else { brng1 };
        let mut turn = (crs_rad - brng1).abs();
        if turn > PI {
            turn = 2.0 * PI - turn;
        }
        let theta = turn / 2.0;
        if theta.sin() != 0.0 && theta.cos() != 0.0 {
            let offs_nm = r * theta.cos() / theta.sin();
            return (pos_from_brng_dist(prev_path.end, brng1 + PI, offs_nm), false);
        }
        return (prev_path.end, false);
    }

    match next.leg_type {
        PathTerm::TF => {
            if let Some(fix) = &prev_leg.main_fix {
                return (fix.pos, false);
            }
            (prev_path.end, false)
        }
        PathTerm::CF => {
            let Some(fix) = &next.main_fix else {
                return (prev_path.end, false);
            };
            let curr_brng_rad = prev_path.true_trk_deg.to_radians();
            let brng_to_fix = prev_path.start.gc_bearing_rad(fix.pos);
            let mut brng_next_rad = next.outbd_crs_true_rad();

            let left_turn = is_ang_greater(curr_brng_rad, brng_next_rad);
            let brng_gr = is_ang_greater(brng_to_fix, curr_brng_rad);

            // The intercept sits behind the current track when the inbound
            // course points back across it; the whole leg is then bypassed.
            let mut is_bp = true;
            if brng_gr != left_turn {
                brng_next_rad += PI;
                is_bp = false;
            }

            let intc = pos_from_intc(prev_path.start, curr_brng_rad, fix.pos, brng_next_rad)
                .unwrap_or(fix.pos);
            (intc, is_bp)
        }
        PathTerm::FA | PathTerm::FC | PathTerm::FD | PathTerm::FM => {
            if let Some(fix) = &next.main_fix {
                return (fix.pos, false);
            }
            (prev_path.end, false)
        }
        _ => (prev_path.end, false),
    }
}

fn calculate_leg(
    plan: &mut PlanState,
    slot: usize,
    cfg: &GeometryConfig,
    rwys: RunwayContext,
    hdg_trk_diff_deg: f64,
) {
    let Some(curr_leg) = plan.legs.get(slot).leg.clone() else {
        return;
    };

    {
        let path = &mut plan.legs.get_mut(slot).path;
        path.is_rwy = curr_leg
            .main_fix
            .as_ref()
            .map(|f| f.kind == FixKind::Runway)
            .unwrap_or(false);
        path.is_arc = false;
        path.is_finite = false;
        path.is_bypassed = false;
        path.is_to_inhibited = false;
        path.turn_rad_nm = -1.0;
    }

    let prev = plan.legs.prev(slot);
    let mut is_bypassed = false;
    if prev != HEAD && !plan.legs.get(prev).is_discon {
        if let Some(prev_leg) = plan.legs.get(prev).leg.clone() {
            let prev_path = plan.legs.get(prev).path;
            let (start, bp) = leg_start(&prev_path, &prev_leg, &curr_leg, cfg);
            is_bypassed = bp;
            plan.legs.get_mut(slot).path.start = start;

            if prev_path.turn_rad_nm != -1.0 {
                // A pending intercept resolves now that its endpoint exists.
                if matches!(prev_leg.leg_type, PathTerm::VI | PathTerm::CI) {
                    let prev_node = plan.legs.get_mut(prev);
                    prev_node.path.end = start;
                    if let Some(l) = prev_node.leg.as_mut() {
                        l.main_fix = Some(Fix {
                            id: INTC_LEG_NAME.to_string(),
                            pos: start,
                            kind: FixKind::Waypoint,
                        });
                        l.outbd_dist_time = prev_node.path.start.gc_dist_nm(start);
                        l.outbd_dist_as_time = false;
                    }
                }

                if !curr_leg.leg_type.is_turn_offsettable()
                    && prev_leg.leg_type.has_geometry()
                {
                    let rnp = rnp_nm(plan, slot, cfg);
                    let prev_r = prev_path.turn_rad_nm;
                    let turn_offs_nm = ((prev_r + rnp) * (prev_r + rnp) - prev_r * prev_r).sqrt();

                    let prev_start = prev_path.start;
                    let dist_nm = prev_start.gc_dist_nm(start);

                    // Turns of 90 degrees or more keep the full leg; the
                    // anticipation arc cannot shortcut them.
                    let prev_trk = prev_path.true_trk_deg.to_radians();
                    let next_trk = prev_start.gc_bearing_rad(start);
                    let sharp = normalize_rad(next_trk - prev_trk).abs() >= PI / 2.0;
                    plan.legs.get_mut(slot).path.is_to_inhibited = sharp;

                    if !sharp && turn_offs_nm < dist_nm {
                        let brng_rad = prev_start.gc_bearing_rad(start);
                        let trimmed =
                            pos_from_brng_dist(prev_start, brng_rad, dist_nm - turn_offs_nm);
                        plan.legs.get_mut(prev).path.end = trimmed;
                    }
                }
            }
        }
    }

    if is_bypassed {
        // The leg never gets flown; carry the previous geometry forward so
        // followers still anchor on a resolved path.
        let prev_path = plan.legs.get(prev).path;
        let path = &mut plan.legs.get_mut(slot).path;
        *path = prev_path;
        path.is_bypassed = true;
        return;
    }

    match curr_leg.leg_type {
        PathTerm::IF => {
            if let Some(fix) = &curr_leg.main_fix {
                let path = &mut plan.legs.get_mut(slot).path;
                path.start = fix.pos;
                path.end = fix.pos;
                path.is_finite = true;
                path.turn_rad_nm = 0.0;
            }
        }
        PathTerm::CA | PathTerm::VA | PathTerm::FA => {
            let rwy_len = climb_runway_len(plan, prev, rwys);

            let mut crs_rad = curr_leg.outbd_crs_true_rad();
            if curr_leg.leg_type == PathTerm::VA {
                crs_rad += hdg_trk_diff_deg.to_radians();
            }

            let start = plan.legs.get(slot).path.start;
            let end = xa_end_point(start, crs_rad, curr_leg.alt1_ft, rwy_len, cfg);

            let path = &mut plan.legs.get_mut(slot).path;
            path.true_trk_deg = crs_rad.to_degrees().rem_euclid(360.0);
            path.end = end;
            path.is_finite = true;
            path.turn_rad_nm = cfg.turn_radius_nm;

            if let Some(l) = plan.legs.get_mut(slot).leg.as_mut() {
                l.main_fix = Some(alt_pseudo_fix(end, curr_leg.alt1_ft));
                l.outbd_dist_time = curr_leg.alt1_ft / cfg.clb_rate_ft_per_nm;
                l.outbd_dist_as_time = false;
            }
        }
        PathTerm::VI | PathTerm::CI => {
            // Course is fixed now; the endpoint waits for the next leg.
            let next = plan.legs.next(slot);
            let next_tp = plan.legs.get(next).leg.as_ref().map(|l| l.leg_type);
            if next != TAIL && next_tp.map(|t| t.ends_intercept()).unwrap_or(false) {
                let mut crs_rad = curr_leg.outbd_crs_true_rad();
                if curr_leg.leg_type == PathTerm::VI {
                    crs_rad += hdg_trk_diff_deg.to_radians();
                }
                let path = &mut plan.legs.get_mut(slot).path;
                path.true_trk_deg = crs_rad.to_degrees().rem_euclid(360.0);
                path.is_finite = true;
                path.turn_rad_nm = cfg.turn_radius_nm;
            }
        }
        PathTerm::TF | PathTerm::CF | PathTerm::DF => {
            if let Some(fix) = &curr_leg.main_fix {
                let start = plan.legs.get(slot).path.start;
                let end = fix.pos;
                let brng_rad = start.gc_bearing_rad(end);
                let dist_nm = start.gc_dist_nm(end);

                let path = &mut plan.legs.get_mut(slot).path;
                path.end = end;
                path.true_trk_deg = brng_rad.to_degrees().rem_euclid(360.0);
                path.is_finite = true;
                path.turn_rad_nm = cfg.turn_radius_nm;

                if let Some(l) = plan.legs.get_mut(slot).leg.as_mut() {
                    l.outbd_dist_time = dist_nm;
                    l.outbd_dist_as_time = false;
                }
            }
        }
        PathTerm::FC => {
            let start = plan.legs.get(slot).path.start;
            let crs_rad = curr_leg.outbd_crs_true_rad();
            let end = pos_from_brng_dist(start, crs_rad, curr_leg.outbd_dist_time);

            let path = &mut plan.legs.get_mut(slot).path;
            path.end = end;
            path.true_trk_deg = crs_rad.to_degrees().rem_euclid(360.0);
            path.is_finite = true;
            path.turn_rad_nm = cfg.turn_radius_nm;
        }
        PathTerm::FD | PathTerm::CD | PathTerm::VD => {
            if let Some(navaid) = &curr_leg.ref_navaid {
                let start = plan.legs.get(slot).path.start;
                let mut crs_rad = curr_leg.outbd_crs_true_rad();
                if curr_leg.leg_type == PathTerm::VD {
                    crs_rad += hdg_trk_diff_deg.to_radians();
                }
                if let Some(end) =
                    pos_from_dme_intc(start, crs_rad, navaid.pos, curr_leg.outbd_dist_time)
                {
                    let path = &mut plan.legs.get_mut(slot).path;
                    path.end = end;
                    path.true_trk_deg = crs_rad.to_degrees().rem_euclid(360.0);
                    path.is_finite = true;
                    path.turn_rad_nm = cfg.turn_radius_nm;
                }
            }
        }
        _ => {}
    }
}

fn climb_runway_len(plan: &PlanState, prev: usize, rwys: RunwayContext) -> Option<f64> {
    if prev == HEAD {
        return None;
    }
    let prev_node = plan.legs.get(prev);
    if plan.segs.get(prev_node.seg).category == Some(SegCategory::DepRwy) {
        return rwys.dep_len_ft;
    }
    let from_rwy = prev_node
        .leg
        .as_ref()
        .and_then(|l| l.main_fix.as_ref())
        .map(|f| f.kind == FixKind::Runway)
        .unwrap_or(false);
    if from_rwy {
        return rwys.arr_len_ft;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Leg;

    fn tf(id: &str, lat: f64, lon: f64) -> Leg {
        Leg::tf_to(Fix {
            id: id.into(),
            pos: GeoPoint::from_deg(lat, lon),
            ..Fix::default()
        })
    }

    fn seeded_plan() -> PlanState {
        let mut plan = PlanState::new();
        let mut first = tf("AAA", 47.0, -122.0);
        first.leg_type = PathTerm::IF;
        let legs = [tf("BBB", 46.5, -121.5), tf("CCC", 46.0, -121.0)];
        plan.add_legs(first, &legs, SegCategory::Enroute, "V1", None);
        plan
    }

    #[test]
    fn track_legs_resolve_start_end_and_track() {
        let mut plan = seeded_plan();
        recompute(&mut plan, &GeometryConfig::default(), RunwayContext::default(), 0.0);

        let slots: Vec<usize> = plan.legs.iter_slots().collect();
        let first = plan.legs.get(slots[0]);
        assert_eq!(first.leg.as_ref().unwrap().leg_type, PathTerm::IF);
        assert_eq!(first.path.turn_rad_nm, 0.0);

        let second = plan.legs.get(slots[1]);
        assert!(second.path.is_finite);
        let end = second.path.end;
        assert!((end.lat_deg() - 46.5).abs() < 1e-9);
        // Southeast-ish track.
        assert!(second.path.true_trk_deg > 90.0 && second.path.true_trk_deg < 180.0);
    }

    #[test]
    fn recompute_is_idempotent() {
        let mut plan = seeded_plan();
        let cfg = GeometryConfig::default();
        recompute(&mut plan, &cfg, RunwayContext::default(), 0.0);
        let first: Vec<LegPath> = plan.legs.iter_slots().map(|s| plan.legs.get(s).path).collect();
        recompute(&mut plan, &cfg, RunwayContext::default(), 0.0);
        let second: Vec<LegPath> = plan.legs.iter_slots().map(|s| plan.legs.get(s).path).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn leg_after_discontinuity_becomes_if() {
        let mut plan = seeded_plan();
        let bbb = plan.legs.nth(1).unwrap();
        plan.delete_singl_leg(bbb);
        recompute(&mut plan, &GeometryConfig::default(), RunwayContext::default(), 0.0);

        let slots: Vec<usize> = plan.legs.iter_slots().collect();
        let after = plan
            .legs
            .get(*slots.last().unwrap());
        assert_eq!(after.leg.as_ref().unwrap().leg_type, PathTerm::IF);
        // The leg before the gap carries the flag for drawing.
        let before = plan.legs.get(slots[0]);
        assert!(before.path.has_disc);
    }

    #[test]
    fn climb_leg_extends_along_course() {
        let mut plan = PlanState::new();
        let rwy = Leg {
            leg_type: PathTerm::IF,
            main_fix: Some(Fix {
                id: "RW16C".into(),
                pos: GeoPoint::from_deg(47.46, -122.31),
                kind: FixKind::Runway,
            }),
            ..Leg::default()
        };
        let climb = Leg {
            leg_type: PathTerm::CA,
            outbd_crs_deg: 160.0,
            outbd_crs_true: true,
            alt1_ft: 1000.0,
            ..Leg::default()
        };
        plan.add_legs(rwy, &[climb], SegCategory::DepRwy, "RW16C", None);

        let cfg = GeometryConfig::default();
        let rwys = RunwayContext {
            dep_len_ft: Some(2.0 * FT_PER_NM),
            arr_len_ft: None,
        };
        recompute(&mut plan, &cfg, rwys, 0.0);

        let slots: Vec<usize> = plan.legs.iter_slots().collect();
        let climb_node = plan.legs.get(slots[1]);
        // 1000 ft at 500 ft/nm plus a 2 nm runway run.
        let dist = climb_node.path.start.gc_dist_nm(climb_node.path.end);
        assert!((dist - 4.0).abs() < 0.1);
        assert_eq!(climb_node.leg.as_ref().unwrap().main_fix.as_ref().unwrap().id, "(1000)");
    }

    #[test]
    fn intercept_leg_resolves_against_follower() {
        let mut plan = PlanState::new();
        let start = Leg {
            leg_type: PathTerm::IF,
            main_fix: Some(Fix {
                id: "STRT".into(),
                pos: GeoPoint::from_deg(45.0, -120.0),
                ..Fix::default()
            }),
            ..Leg::default()
        };
        // Northbound intercept of a westbound course into the fix.
        let intc = Leg {
            leg_type: PathTerm::CI,
            outbd_crs_deg: 0.0,
            outbd_crs_true: true,
            ..Leg::default()
        };
        let join = Leg {
            leg_type: PathTerm::CF,
            outbd_crs_deg: 270.0,
            outbd_crs_true: true,
            main_fix: Some(Fix {
                id: "JOIN".into(),
                pos: GeoPoint::from_deg(46.0, -121.0),
                ..Fix::default()
            }),
            ..Leg::default()
        };
        plan.add_legs(start, &[intc, join], SegCategory::Enroute, "PROC", None);

        recompute(&mut plan, &GeometryConfig::default(), RunwayContext::default(), 0.0);

        let slots: Vec<usize> = plan.legs.iter_slots().collect();
        let intc_node = plan.legs.get(slots[1]);
        assert_eq!(
            intc_node.leg.as_ref().unwrap().main_fix.as_ref().unwrap().id,
            INTC_LEG_NAME
        );
        // Resolved endpoint sits near the follower's inbound course
        // latitude, short of it by the turn-anticipation trim.
        assert!((intc_node.path.end.lat_deg() - 46.0).abs() < 0.1);
    }

    #[test]
    fn doubled_discontinuities_collapse() {
        let mut plan = seeded_plan();
        // Delete two adjacent legs; the second deletion runs against the
        // discontinuity boundary and may stack gaps.
        let bbb = plan.legs.nth(1).unwrap();
        plan.delete_singl_leg(bbb);
        recompute(&mut plan, &GeometryConfig::default(), RunwayContext::default(), 0.0);

        let mut last_disc = false;
        for slot in plan.legs.iter_slots() {
            let d = plan.legs.get(slot).is_discon;
            assert!(!(d && last_disc), "adjacent discontinuities survived");
            last_disc = d;
        }
        // A leading discontinuity is dropped outright.
        assert!(!plan.legs.first().map(|s| plan.legs.get(s).is_discon).unwrap_or(false));
    }
}
