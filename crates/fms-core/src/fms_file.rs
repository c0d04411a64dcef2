//! X-Plane style `.fms` route files.
//!
//! Export writes the current selection (airports, runways, procedures) plus
//! the enroute fix list. Import replays the file against the navigation
//! database through the normal selection operations, so an imported route
//! goes through exactly the validation a hand-built one does. Any failure
//! clears the plan and surfaces as a [`FplnError::File`]-family error.

use crate::error::{FplnError, Result};
use crate::models::{Fix, FixKind, SegCategory, SnapshotRef, NONE_TRANS};
use crate::navdata::ProcKind;
use crate::router::Fpln;
use crate::spatial::GeoPoint;
use std::path::Path;
use tracing::{debug, warn};

const FMS_VERSION: &str = "1100";

fn strip_rw(id: &str) -> &str {
    id.strip_prefix("RW").unwrap_or(id)
}

fn bad(msg: impl Into<String>) -> FplnError {
    FplnError::File(msg.into())
}

impl Fpln {
    pub fn export_fms(&self, path: &Path) -> Result<()> {
        let out = self.to_fms()?;
        std::fs::write(path, out)?;
        debug!(path = %path.display(), "route exported");
        Ok(())
    }

    /// Serialize the route. Needs both airports; everything else is written
    /// only when selected.
    pub fn to_fms(&self) -> Result<String> {
        let st = self.st();
        let dep = st
            .dep
            .clone()
            .ok_or_else(|| FplnError::Incompatible("no departure airport to save".to_string()))?;
        let arr = st
            .arr
            .clone()
            .ok_or_else(|| FplnError::Incompatible("no arrival airport to save".to_string()))?;

        let dep_rwy = st.plan.category_ref(SegCategory::DepRwy).name.clone();
        let sid = st.plan.category_ref(SegCategory::Sid).name.clone();
        let sid_trans = st.plan.category_ref(SegCategory::SidTrans).name.clone();
        let star = st.plan.category_ref(SegCategory::Star).name.clone();
        let star_trans = st.plan.category_ref(SegCategory::StarTrans).name.clone();
        let appch = st.plan.category_ref(SegCategory::Approach).name.clone();
        let appch_trans = st
            .plan
            .category_ref(SegCategory::ApproachTrans)
            .name
            .clone();
        let arr_rwy = st.arr_rwy.clone();

        let mut rows: Vec<String> = Vec::new();
        rows.push(format!(
            "1 {} ADEP {:.6} {:.6} {:.6}",
            dep.icao,
            dep.elevation_ft,
            dep.pos.lat_deg(),
            dep.pos.lon_deg()
        ));
        for slot in st.plan.legs.iter_slots() {
            let node = st.plan.legs.get(slot);
            if node.is_discon {
                continue;
            }
            let seg = st.plan.segs.get(node.seg);
            if seg.category != Some(SegCategory::Enroute) {
                continue;
            }
            let Some(fix) = node.leg.as_ref().and_then(|l| l.main_fix.as_ref()) else {
                continue;
            };
            let via = if seg.is_direct { "DRCT" } else { seg.name.as_str() };
            rows.push(format!(
                "{} {} {} 0.000000 {:.6} {:.6}",
                fix.kind.type_code(),
                fix.id,
                via,
                fix.pos.lat_deg(),
                fix.pos.lon_deg()
            ));
        }
        rows.push(format!(
            "1 {} ADES {:.6} {:.6} {:.6}",
            arr.icao,
            arr.elevation_ft,
            arr.pos.lat_deg(),
            arr.pos.lon_deg()
        ));
        drop(st);

        let mut out = String::new();
        out.push_str("I\n");
        out.push_str(FMS_VERSION);
        out.push_str(" Version\n");
        out.push_str(&format!("CYCLE {}\n", self.nav.data_cycle().cycle));
        out.push_str(&format!("ADEP {}\n", dep.icao));
        if !dep_rwy.is_empty() {
            out.push_str(&format!("DEPRWY RW{dep_rwy}\n"));
        }
        if !sid.is_empty() {
            out.push_str(&format!("SID {sid}\n"));
        }
        if !sid_trans.is_empty() {
            out.push_str(&format!("SIDTRANS {sid_trans}\n"));
        }
        out.push_str(&format!("ADES {}\n", arr.icao));
        if !arr_rwy.is_empty() {
            out.push_str(&format!("DESRWY RW{arr_rwy}\n"));
        }
        if !star.is_empty() {
            out.push_str(&format!("STAR {star}\n"));
        }
        if !star_trans.is_empty() {
            out.push_str(&format!("STARTRANS {star_trans}\n"));
        }
        // A runway-only selection carries no approach procedure.
        if !appch.is_empty() && appch != arr_rwy {
            out.push_str(&format!("APP {appch}\n"));
            if !appch_trans.is_empty() {
                out.push_str(&format!("APPTRANS {appch_trans}\n"));
            }
        }
        out.push_str(&format!("NUMENR {}\n", rows.len()));
        for row in rows {
            out.push_str(&row);
            out.push('\n');
        }
        Ok(out)
    }

    pub fn load_fms(&self, path: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(path)?;
        self.from_fms(&raw)
    }

    /// Replay a route file. On any error the plan is cleared rather than
    /// left half-loaded.
    pub fn from_fms(&self, raw: &str) -> Result<()> {
        match self.replay_fms(raw) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "route file import failed, clearing plan");
                self.clear();
                Err(e)
            }
        }
    }

    fn replay_fms(&self, raw: &str) -> Result<()> {
        let mut lines = raw.lines().map(str::trim).filter(|l| !l.is_empty());

        let first = lines.next().ok_or_else(|| bad("empty route file"))?;
        if first != "I" && first != "A" {
            return Err(bad("unrecognized route file header"));
        }
        let ver = lines.next().unwrap_or("");
        if ver.split_whitespace().next() != Some(FMS_VERSION) {
            return Err(bad(format!("unsupported route file version: {ver}")));
        }

        let mut kv: Vec<(String, String)> = Vec::new();
        let mut numenr = 0usize;
        for line in &mut lines {
            let Some((key, val)) = line.split_once(' ') else {
                continue;
            };
            if key == "NUMENR" {
                numenr = val
                    .trim()
                    .parse()
                    .map_err(|_| bad(format!("bad enroute count: {val}")))?;
                break;
            }
            kv.push((key.to_string(), val.trim().to_string()));
        }
        let get = |k: &str| {
            kv.iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.as_str())
                .unwrap_or("")
        };

        if let Ok(cycle) = get("CYCLE").parse::<u32>() {
            let have = self.nav.data_cycle().cycle;
            if cycle != have {
                return Err(bad(format!(
                    "route cycle {cycle} does not match database cycle {have}"
                )));
            }
        }

        let adep = get("ADEP");
        let ades = get("ADES");
        if adep.is_empty() || ades.is_empty() {
            return Err(bad("route file names no airports"));
        }
        self.set_departure(adep)?;
        self.set_arrival(ades)?;

        let dep_rwy = get("DEPRWY");
        if !dep_rwy.is_empty() {
            self.set_dep_rwy(strip_rw(dep_rwy))?;
        }
        let sid = get("SID");
        if !sid.is_empty() {
            self.set_procedure(ProcKind::Sid, sid)?;
        }
        let sid_trans = get("SIDTRANS");
        if !sid_trans.is_empty() && sid_trans != NONE_TRANS {
            self.set_procedure_transition(ProcKind::Sid, sid_trans)?;
        }

        let mut awy_last: Option<String> = None;
        let mut end_last: Option<String> = None;
        for _ in 0..numenr {
            let line = lines
                .next()
                .ok_or_else(|| bad("route file ends inside the enroute list"))?;
            let f: Vec<&str> = line.split_whitespace().collect();
            if f.len() < 6 {
                return Err(bad(format!("malformed enroute row: {line}")));
            }
            let via = f[2];
            if via == "ADEP" || via == "ADES" {
                continue;
            }
            let code: u8 = f[0]
                .parse()
                .map_err(|_| bad(format!("malformed enroute row: {line}")))?;
            let lat: f64 = f[4]
                .parse()
                .map_err(|_| bad(format!("malformed enroute row: {line}")))?;
            let lon: f64 = f[5]
                .parse()
                .map_err(|_| bad(format!("malformed enroute row: {line}")))?;
            let fix = Fix {
                id: f[1].to_string(),
                pos: GeoPoint::from_deg(lat, lon),
                kind: FixKind::from_type_code(code).unwrap_or_default(),
            };

            if via == "DRCT" {
                self.flush_awy(&mut awy_last, &mut end_last)?;
                let tail = SnapshotRef {
                    node: None,
                    version: self.version(),
                };
                self.insert_direct(fix, tail)?;
            } else {
                if awy_last.as_deref() != Some(via) {
                    self.flush_awy(&mut awy_last, &mut end_last)?;
                    self.add_airway(None, via)?;
                    awy_last = Some(via.to_string());
                }
                end_last = Some(fix.awy_uid());
            }
        }
        // A file can end on an airway row; the exit still has to land.
        self.flush_awy(&mut awy_last, &mut end_last)?;

        let des_rwy = get("DESRWY");
        if !des_rwy.is_empty() {
            self.set_arr_rwy(strip_rw(des_rwy))?;
        }
        let star = get("STAR");
        if !star.is_empty() {
            self.set_procedure(ProcKind::Star, star)?;
        }
        let star_trans = get("STARTRANS");
        if !star_trans.is_empty() && star_trans != NONE_TRANS {
            self.set_procedure_transition(ProcKind::Star, star_trans)?;
        }
        let appch = get("APP");
        if !appch.is_empty() {
            self.set_procedure(ProcKind::Approach, appch)?;
        }
        let appch_trans = get("APPTRANS");
        if !appch_trans.is_empty() && appch_trans != NONE_TRANS {
            self.set_procedure_transition(ProcKind::Approach, appch_trans)?;
        }
        Ok(())
    }

    fn flush_awy(&self, awy: &mut Option<String>, end: &mut Option<String>) -> Result<()> {
        if let (Some(_), Some(end_uid)) = (awy.take(), end.take()) {
            self.set_airway_exit(None, &end_uid)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navdata::NavDb;
    use std::sync::Arc;

    fn fpln() -> Fpln {
        Fpln::new(Arc::new(NavDb::demo()))
    }

    fn build_full_route(fp: &Fpln) {
        fp.set_departure("KSEA").unwrap();
        fp.set_arrival("KPDX").unwrap();
        fp.set_dep_rwy("16C").unwrap();
        fp.set_procedure(ProcKind::Sid, "CHINS6").unwrap();
        fp.set_procedure_transition(ProcKind::Sid, "YKM").unwrap();
        fp.add_airway(None, "V23").unwrap();
        let laker = fp.nav.find_fix("LAKER", None, None).unwrap().awy_uid();
        fp.set_airway_exit(None, &laker).unwrap();
        fp.set_procedure(ProcKind::Star, "HHOOD5").unwrap();
        fp.set_arr_rwy("28L").unwrap();
        fp.set_procedure(ProcKind::Approach, "I28L").unwrap();
    }

    fn fix_ids(fp: &Fpln) -> Vec<String> {
        fp.leg_window(0, 100)
            .map(|(_, rows)| {
                rows.iter()
                    .filter_map(|r| {
                        r.data
                            .leg
                            .as_ref()
                            .and_then(|l| l.main_fix.as_ref())
                            .map(|f| f.id.clone())
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn export_writes_selection_and_enroute_rows() {
        let fp = fpln();
        build_full_route(&fp);
        let out = fp.to_fms().unwrap();

        assert!(out.starts_with("I\n1100 Version\n"));
        assert!(out.contains("CYCLE 2508\n"));
        assert!(out.contains("ADEP KSEA\n"));
        assert!(out.contains("DEPRWY RW16C\n"));
        assert!(out.contains("SID CHINS6\n"));
        assert!(out.contains("SIDTRANS YKM\n"));
        assert!(out.contains("ADES KPDX\n"));
        assert!(out.contains("DESRWY RW28L\n"));
        assert!(out.contains("STAR HHOOD5\n"));
        assert!(out.contains("APP I28L\n"));
        assert!(out.contains(" BUFMN V23 "));
        assert!(out.contains(" LAKER V23 "));
    }

    #[test]
    fn import_round_trips_the_route() {
        let src = fpln();
        build_full_route(&src);
        let raw = src.to_fms().unwrap();

        let dst = fpln();
        dst.from_fms(&raw).unwrap();

        assert_eq!(dst.departure(), Some("KSEA".to_string()));
        assert_eq!(dst.arrival(), Some("KPDX".to_string()));
        assert_eq!(dst.dep_rwy(), "16C");
        assert_eq!(dst.arr_rwy(), "28L");
        assert_eq!(dst.selected_procedure(ProcKind::Sid), "CHINS6");
        assert_eq!(dst.selected_transition(ProcKind::Sid), "YKM");
        assert_eq!(dst.selected_procedure(ProcKind::Star), "HHOOD5");
        assert_eq!(dst.selected_procedure(ProcKind::Approach), "I28L");

        let ids = fix_ids(&dst);
        for want in ["RW16C", "RADDY", "CHINS", "ELN", "YKM", "BUFMN", "LAKER"] {
            assert!(ids.contains(&want.to_string()), "missing {want} in {ids:?}");
        }
    }

    #[test]
    fn cycle_mismatch_is_a_file_error() {
        let src = fpln();
        build_full_route(&src);
        let raw = src.to_fms().unwrap().replace("CYCLE 2508", "CYCLE 2401");

        let dst = fpln();
        let err = dst.from_fms(&raw).unwrap_err();
        assert!(matches!(err, FplnError::File(_)));
        // A failed import leaves no half-loaded route behind.
        assert_eq!(dst.leg_count(), 0);
        assert!(dst.departure().is_none());
    }

    #[test]
    fn unknown_header_is_rejected() {
        let dst = fpln();
        assert!(matches!(
            dst.from_fms("X\n9999 Version\n"),
            Err(FplnError::File(_))
        ));
        assert!(matches!(dst.from_fms(""), Err(FplnError::File(_))));
    }

    #[test]
    fn export_needs_both_airports() {
        let fp = fpln();
        fp.set_departure("KSEA").unwrap();
        assert!(matches!(fp.to_fms(), Err(FplnError::Incompatible(_))));
    }
}
