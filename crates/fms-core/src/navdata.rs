//! Navigation database collaborators: airports, runways, procedures and
//! airways the route engine resolves names against.
//!
//! The engine only sees the [`NavDataProvider`] trait. [`NavDb`] is the
//! in-memory implementation, loadable from JSON and shipping a small
//! built-in dataset for demos and tests.

use crate::error::{FplnError, Result};
use crate::models::{Fix, FixKind, Leg, PathTerm, NONE_TRANS};
use crate::spatial::GeoPoint;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Procedure families the databases are keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcKind {
    Sid,
    Star,
    Approach,
}

/// AIRAC-style validity window of the loaded data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCycle {
    pub cycle: u32,
    pub valid_from: NaiveDate,
    pub valid_to: NaiveDate,
}

impl DataCycle {
    pub fn is_current(&self, date: NaiveDate) -> bool {
        date >= self.valid_from && date <= self.valid_to
    }
}

impl Default for DataCycle {
    fn default() -> Self {
        Self {
            cycle: 2508,
            valid_from: NaiveDate::from_ymd_opt(2025, 8, 7).unwrap(),
            valid_to: NaiveDate::from_ymd_opt(2025, 9, 3).unwrap(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirportData {
    pub icao: String,
    pub pos: GeoPoint,
    pub elevation_ft: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunwayData {
    /// Normalized id with the RW prefix, e.g. `RW16C`.
    pub id: String,
    pub pos: GeoPoint,
    pub impl_length_ft: f64,
}

/// One named procedure: a common (`NONE`-transition) core plus
/// runway-specific and enroute-transition leg sequences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Procedure {
    #[serde(default)]
    pub common: Vec<Leg>,
    #[serde(default)]
    pub runways: HashMap<String, Vec<Leg>>,
    #[serde(default)]
    pub transitions: HashMap<String, Vec<Leg>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AirportRecord {
    pub data: AirportData,
    #[serde(default)]
    pub runways: Vec<RunwayData>,
    #[serde(default)]
    pub sids: HashMap<String, Procedure>,
    #[serde(default)]
    pub stars: HashMap<String, Procedure>,
    #[serde(default)]
    pub approaches: HashMap<String, Procedure>,
}

impl Default for AirportData {
    fn default() -> Self {
        Self {
            icao: String::new(),
            pos: GeoPoint::default(),
            elevation_ft: 0.0,
        }
    }
}

/// What the route engine asks of a navigation database.
pub trait NavDataProvider: Send + Sync {
    fn airport(&self, icao: &str) -> Option<AirportData>;
    fn runways(&self, icao: &str) -> Vec<RunwayData>;
    fn runway(&self, icao: &str, id: &str) -> Option<RunwayData>;

    fn proc_names(&self, icao: &str, kind: ProcKind) -> Vec<String>;
    /// True when the named procedure has legs joining the given runway.
    fn proc_serves_rwy(&self, icao: &str, kind: ProcKind, proc: &str, rwy: &str) -> bool;
    /// Leg sequence of a procedure joined with `with`: a runway id, an
    /// enroute transition name, or `NONE` for the common core.
    fn proc_legs(&self, icao: &str, kind: ProcKind, proc: &str, with: &str) -> Vec<Leg>;
    fn proc_transitions(&self, icao: &str, kind: ProcKind, proc: &str) -> Vec<String>;
    fn has_proc(&self, icao: &str, kind: ProcKind, proc: &str) -> bool;

    fn awy_has_fix(&self, awy: &str, fix_uid: &str) -> bool;
    /// Ordered fixes along `awy` from one named point to another, both
    /// inclusive. Empty when either endpoint is off the airway.
    fn awy_path(&self, awy: &str, start_uid: &str, end_uid: &str) -> Vec<Fix>;
    /// Path along `awy` from `start_uid` to the first junction shared with
    /// `next_awy`, both endpoints inclusive.
    fn awy_join_path(&self, awy: &str, start_uid: &str, next_awy: &str) -> Vec<Fix>;
    fn fix_by_awy_uid(&self, uid: &str) -> Option<Fix>;

    /// Best database match for a plain fix id, nearest to `near` when given.
    fn find_fix(&self, id: &str, kind: Option<FixKind>, near: Option<GeoPoint>) -> Option<Fix>;

    fn data_cycle(&self) -> DataCycle;
}

/// Runway id an approach name encodes, e.g. `I16C` or `R28L-Y` map to
/// `16C` and `28L`.
pub fn appr_runway(appr: &str) -> String {
    let mut rw = String::new();
    for ch in appr.chars() {
        if rw.len() < 2 && ch.is_ascii_digit() {
            rw.push(ch);
        } else if !rw.is_empty() && matches!(ch, 'L' | 'R' | 'C') {
            rw.push(ch);
            break;
        } else if !rw.is_empty() {
            break;
        }
    }
    normalize_rwy_id(&rw)
}

/// `4` becomes `04`, stray whitespace is dropped.
pub fn normalize_rwy_id(id: &str) -> String {
    let id: String = id.trim().chars().collect();
    if id.len() == 1 || (id.len() == 2 && !id.as_bytes()[1].is_ascii_digit()) {
        format!("0{id}")
    } else {
        id
    }
}

/// In-memory navigation database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NavDb {
    #[serde(default)]
    pub cycle: DataCycle,
    #[serde(default)]
    pub airports: HashMap<String, AirportRecord>,
    #[serde(default)]
    pub fixes: Vec<Fix>,
    /// Ordered point sequences, one per airway name.
    #[serde(default)]
    pub airways: HashMap<String, Vec<Fix>>,
}

impl NavDb {
    pub fn from_json(raw: &str) -> Result<NavDb> {
        serde_json::from_str(raw).map_err(|e| FplnError::File(e.to_string()))
    }

    pub fn load(path: &std::path::Path) -> Result<NavDb> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    fn procs(&self, icao: &str, kind: ProcKind) -> Option<&HashMap<String, Procedure>> {
        let rec = self.airports.get(icao)?;
        Some(match kind {
            ProcKind::Sid => &rec.sids,
            ProcKind::Star => &rec.stars,
            ProcKind::Approach => &rec.approaches,
        })
    }

    fn awy_positions(&self, awy: &str, start_uid: &str, end_uid: &str) -> Option<(usize, usize)> {
        let pts = self.airways.get(awy)?;
        let s = pts.iter().position(|f| f.awy_uid() == start_uid)?;
        let e = pts.iter().position(|f| f.awy_uid() == end_uid)?;
        Some((s, e))
    }
}

impl NavDataProvider for NavDb {
    fn airport(&self, icao: &str) -> Option<AirportData> {
        self.airports.get(icao).map(|r| r.data.clone())
    }

    fn runways(&self, icao: &str) -> Vec<RunwayData> {
        self.airports
            .get(icao)
            .map(|r| r.runways.clone())
            .unwrap_or_default()
    }

    fn runway(&self, icao: &str, id: &str) -> Option<RunwayData> {
        let want = if id.starts_with("RW") {
            id.to_string()
        } else {
            format!("RW{}", normalize_rwy_id(id))
        };
        self.airports
            .get(icao)?
            .runways
            .iter()
            .find(|r| r.id == want)
            .cloned()
    }

    fn proc_names(&self, icao: &str, kind: ProcKind) -> Vec<String> {
        let mut out: Vec<String> = self
            .procs(icao, kind)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    fn proc_serves_rwy(&self, icao: &str, kind: ProcKind, proc: &str, rwy: &str) -> bool {
        if kind == ProcKind::Approach {
            return appr_runway(proc) == normalize_rwy_id(rwy);
        }
        self.procs(icao, kind)
            .and_then(|m| m.get(proc))
            .map(|p| p.runways.contains_key(rwy))
            .unwrap_or(false)
    }

    fn proc_legs(&self, icao: &str, kind: ProcKind, proc: &str, with: &str) -> Vec<Leg> {
        let Some(p) = self.procs(icao, kind).and_then(|m| m.get(proc)) else {
            return Vec::new();
        };
        if with == NONE_TRANS || with.is_empty() {
            return p.common.clone();
        }
        if let Some(legs) = p.runways.get(with) {
            return legs.clone();
        }
        p.transitions.get(with).cloned().unwrap_or_default()
    }

    fn proc_transitions(&self, icao: &str, kind: ProcKind, proc: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .procs(icao, kind)
            .and_then(|m| m.get(proc))
            .map(|p| p.transitions.keys().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    fn has_proc(&self, icao: &str, kind: ProcKind, proc: &str) -> bool {
        self.procs(icao, kind)
            .map(|m| m.contains_key(proc))
            .unwrap_or(false)
    }

    fn awy_has_fix(&self, awy: &str, fix_uid: &str) -> bool {
        self.airways
            .get(awy)
            .map(|pts| pts.iter().any(|f| f.awy_uid() == fix_uid))
            .unwrap_or(false)
    }

    fn awy_path(&self, awy: &str, start_uid: &str, end_uid: &str) -> Vec<Fix> {
        let Some((s, e)) = self.awy_positions(awy, start_uid, end_uid) else {
            return Vec::new();
        };
        let pts = &self.airways[awy];
        if s <= e {
            pts[s..=e].to_vec()
        } else {
            let mut out = pts[e..=s].to_vec();
            out.reverse();
            out
        }
    }

    fn awy_join_path(&self, awy: &str, start_uid: &str, next_awy: &str) -> Vec<Fix> {
        let Some(next_pts) = self.airways.get(next_awy) else {
            return Vec::new();
        };
        let junction = next_pts
            .iter()
            .find(|f| self.awy_has_fix(awy, &f.awy_uid()));
        match junction {
            Some(j) => self.awy_path(awy, start_uid, &j.awy_uid()),
            None => Vec::new(),
        }
    }

    fn fix_by_awy_uid(&self, uid: &str) -> Option<Fix> {
        self.fixes.iter().find(|f| f.awy_uid() == uid).cloned()
    }

    fn find_fix(&self, id: &str, kind: Option<FixKind>, near: Option<GeoPoint>) -> Option<Fix> {
        let mut cand: Vec<&Fix> = self
            .fixes
            .iter()
            .filter(|f| f.id == id && kind.map(|k| f.kind == k).unwrap_or(true))
            .collect();
        if cand.is_empty() {
            return None;
        }
        if let Some(p) = near {
            cand.sort_by(|a, b| {
                a.pos
                    .gc_dist_nm(p)
                    .partial_cmp(&b.pos.gc_dist_nm(p))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        Some(cand[0].clone())
    }

    fn data_cycle(&self) -> DataCycle {
        self.cycle
    }
}

fn fix(id: &str, lat: f64, lon: f64, kind: FixKind) -> Fix {
    Fix {
        id: id.into(),
        pos: GeoPoint::from_deg(lat, lon),
        kind,
    }
}

fn tf(f: Fix) -> Leg {
    Leg::tf_to(f)
}

fn if_leg(f: Fix) -> Leg {
    Leg {
        leg_type: PathTerm::IF,
        main_fix: Some(f),
        ..Leg::default()
    }
}

impl NavDb {
    /// Small Pacific-Northwest dataset: KSEA and KPDX with one SID, one
    /// STAR, one approach and the V23 airway between them.
    pub fn demo() -> NavDb {
        let ykm = fix("YKM", 46.570, -120.445, FixKind::Vhf);
        let eln = fix("ELN", 47.025, -120.458, FixKind::Vhf);
        let raddy = fix("RADDY", 47.161, -121.980, FixKind::Waypoint);
        let chins = fix("CHINS", 47.066, -121.402, FixKind::Waypoint);
        let bufmn = fix("BUFMN", 46.233, -121.000, FixKind::Waypoint);
        let laker = fix("LAKER", 45.833, -121.400, FixKind::Waypoint);
        let hhood = fix("HHOOD", 45.600, -121.900, FixKind::Waypoint);
        let minne = fix("MINNE", 45.520, -122.300, FixKind::Waypoint);

        let ksea_rw16c = fix("RW16C", 47.463, -122.310, FixKind::Runway);
        let kpdx_rw28l = fix("RW28L", 45.586, -122.585, FixKind::Runway);

        let mut ksea = AirportRecord {
            data: AirportData {
                icao: "KSEA".into(),
                pos: GeoPoint::from_deg(47.449, -122.309),
                elevation_ft: 433.0,
            },
            runways: vec![
                RunwayData {
                    id: "RW16C".into(),
                    pos: ksea_rw16c.pos,
                    impl_length_ft: 9426.0,
                },
                RunwayData {
                    id: "RW34R".into(),
                    pos: GeoPoint::from_deg(47.437, -122.308),
                    impl_length_ft: 9426.0,
                },
            ],
            ..AirportRecord::default()
        };

        let chins6 = Procedure {
            common: vec![tf(chins.clone())],
            runways: HashMap::from([(
                "16C".to_string(),
                vec![
                    Leg {
                        leg_type: PathTerm::CA,
                        outbd_crs_deg: 161.0,
                        outbd_crs_true: true,
                        alt1_ft: 1100.0,
                        ..Leg::default()
                    },
                    tf(raddy.clone()),
                    tf(chins.clone()),
                ],
            )]),
            transitions: HashMap::from([(
                "YKM".to_string(),
                vec![tf(chins.clone()), tf(eln.clone()), tf(ykm.clone())],
            )]),
        };
        ksea.sids.insert("CHINS6".into(), chins6);

        let mut kpdx = AirportRecord {
            data: AirportData {
                icao: "KPDX".into(),
                pos: GeoPoint::from_deg(45.589, -122.597),
                elevation_ft: 31.0,
            },
            runways: vec![
                RunwayData {
                    id: "RW28L".into(),
                    pos: kpdx_rw28l.pos,
                    impl_length_ft: 8000.0,
                },
                RunwayData {
                    id: "RW10R".into(),
                    pos: GeoPoint::from_deg(45.583, -122.551),
                    impl_length_ft: 8000.0,
                },
            ],
            ..AirportRecord::default()
        };

        let hhood5 = Procedure {
            common: vec![tf(hhood.clone()), tf(minne.clone())],
            runways: HashMap::from([(
                "28L".to_string(),
                vec![tf(minne.clone()), tf(kpdx_rw28l.clone())],
            )]),
            transitions: HashMap::from([(
                "LAKER".to_string(),
                vec![tf(laker.clone()), tf(hhood.clone())],
            )]),
        };
        kpdx.stars.insert("HHOOD5".into(), hhood5);

        let i28l = Procedure {
            common: vec![
                if_leg(minne.clone()),
                Leg {
                    leg_type: PathTerm::CF,
                    outbd_crs_deg: 279.0,
                    outbd_crs_true: true,
                    main_fix: Some(kpdx_rw28l.clone()),
                    ..Leg::default()
                },
                // Missed approach.
                Leg {
                    leg_type: PathTerm::CA,
                    outbd_crs_deg: 279.0,
                    outbd_crs_true: true,
                    alt1_ft: 2000.0,
                    ..Leg::default()
                },
                tf(hhood.clone()),
            ],
            ..Procedure::default()
        };
        kpdx.approaches.insert("I28L".into(), i28l);

        let v23 = vec![ykm.clone(), bufmn.clone(), laker.clone()];
        let v4 = vec![eln.clone(), ykm.clone()];

        NavDb {
            cycle: DataCycle::default(),
            airports: HashMap::from([("KSEA".to_string(), ksea), ("KPDX".to_string(), kpdx)]),
            fixes: vec![
                ykm, eln, raddy, chins, bufmn, laker, hhood, minne, ksea_rw16c, kpdx_rw28l,
            ],
            airways: HashMap::from([("V23".to_string(), v23), ("V4".to_string(), v4)]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approach_names_encode_runways() {
        assert_eq!(appr_runway("I16C"), "16C");
        assert_eq!(appr_runway("R28L-Y"), "28L");
        assert_eq!(appr_runway("VDM4"), "04");
        assert_eq!(appr_runway("I08"), "08");
    }

    #[test]
    fn demo_db_lookups() {
        let db = NavDb::demo();
        assert!(db.airport("KSEA").is_some());
        assert!(db.airport("EGLL").is_none());
        assert!(db.runway("KSEA", "16C").is_some());
        assert!(db.runway("KSEA", "RW16C").is_some());
        assert!(db.has_proc("KSEA", ProcKind::Sid, "CHINS6"));
        assert!(db.proc_serves_rwy("KSEA", ProcKind::Sid, "CHINS6", "16C"));
        assert!(!db.proc_serves_rwy("KSEA", ProcKind::Sid, "CHINS6", "34R"));
        assert!(db.proc_serves_rwy("KPDX", ProcKind::Approach, "I28L", "28L"));
        assert_eq!(db.proc_transitions("KSEA", ProcKind::Sid, "CHINS6"), vec!["YKM"]);
    }

    #[test]
    fn airway_paths_run_both_directions() {
        let db = NavDb::demo();
        let ykm = db.find_fix("YKM", None, None).unwrap();
        let laker = db.find_fix("LAKER", None, None).unwrap();

        let fwd = db.awy_path("V23", &ykm.awy_uid(), &laker.awy_uid());
        assert_eq!(
            fwd.iter().map(|f| f.id.as_str()).collect::<Vec<_>>(),
            vec!["YKM", "BUFMN", "LAKER"]
        );
        let back = db.awy_path("V23", &laker.awy_uid(), &ykm.awy_uid());
        assert_eq!(back.first().unwrap().id, "LAKER");
        assert!(db.awy_path("V23", &ykm.awy_uid(), "NOPE_0_0").is_empty());
    }

    #[test]
    fn airway_junction_path() {
        let db = NavDb::demo();
        let eln = db.find_fix("ELN", None, None).unwrap();
        // V4 joins V23 at YKM.
        let path = db.awy_join_path("V4", &eln.awy_uid(), "V23");
        assert_eq!(
            path.iter().map(|f| f.id.as_str()).collect::<Vec<_>>(),
            vec!["ELN", "YKM"]
        );
    }

    #[test]
    fn json_round_trip() {
        let db = NavDb::demo();
        let raw = serde_json::to_string(&db).unwrap();
        let back = NavDb::from_json(&raw).unwrap();
        assert_eq!(back.data_cycle(), db.data_cycle());
        assert_eq!(back.proc_names("KSEA", ProcKind::Sid), vec!["CHINS6"]);
    }
}
