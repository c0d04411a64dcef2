//! Route orchestration: airports, runways, procedures, airways and direct
//! edits, resolved against a navigation database and applied to the
//! underlying segment store.
//!
//! [`Fpln`] is the unit other layers hold: one flight plan behind a mutex,
//! edited through name-level operations and read through versioned
//! snapshots. Procedure selections interlock; changing the departure runway
//! re-applies the SID and its transition, picking an approach re-applies the
//! STAR, and a failed selection cleans up whatever the old one left behind.

use crate::arena::{HEAD, TAIL};
use crate::error::{FplnError, Result};
use crate::geometry::{self, GeometryConfig, RunwayContext};
use crate::models::{
    cat_rank, Fix, FixKind, Leg, PathTerm, ProjectedLeg, SegCategory, Segment, SnapshotRef,
    MISSED_APPR_SEG_NAME, NONE_TRANS,
};
use crate::navdata::{appr_runway, normalize_rwy_id, AirportData, NavDataProvider, ProcKind, RunwayData};
use crate::plan::{LegRow, PlanState, SegRow};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Everything mutable about one route, kept behind the plan mutex.
pub(crate) struct RouteState {
    pub(crate) plan: PlanState,
    pub(crate) dep: Option<AirportData>,
    pub(crate) arr: Option<AirportData>,
    pub(crate) dep_rwy_data: Option<RunwayData>,
    /// Arrival runway id without the RW prefix; set by the runway or
    /// approach selection.
    pub(crate) arr_rwy: String,
    pub(crate) arr_rwy_data: Option<RunwayData>,
    pub(crate) act_leg: Option<usize>,
    version_calc: u64,
}

impl RouteState {
    fn new() -> RouteState {
        RouteState {
            plan: PlanState::new(),
            dep: None,
            arr: None,
            dep_rwy_data: None,
            arr_rwy: String::new(),
            arr_rwy_data: None,
            act_leg: None,
            version_calc: 0,
        }
    }

    fn clone_state(&self) -> RouteState {
        let mut plan = PlanState::new();
        plan.copy_from(&self.plan);
        RouteState {
            plan,
            dep: self.dep.clone(),
            arr: self.arr.clone(),
            dep_rwy_data: self.dep_rwy_data.clone(),
            arr_rwy: self.arr_rwy.clone(),
            arr_rwy_data: self.arr_rwy_data.clone(),
            act_leg: self.act_leg,
            version_calc: 0,
        }
    }
}

/// One flight plan bound to a navigation database.
pub struct Fpln {
    pub(crate) nav: Arc<dyn NavDataProvider>,
    cfg: GeometryConfig,
    pub(crate) state: Mutex<RouteState>,
}

impl Fpln {
    pub fn new(nav: Arc<dyn NavDataProvider>) -> Fpln {
        Self::with_config(nav, GeometryConfig::default())
    }

    pub fn with_config(nav: Arc<dyn NavDataProvider>, cfg: GeometryConfig) -> Fpln {
        Fpln {
            nav,
            cfg,
            state: Mutex::new(RouteState::new()),
        }
    }

    pub(crate) fn st(&self) -> MutexGuard<'_, RouteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ---- airports and runways ----

    /// Select the departure airport. Resets the whole plan and clears any
    /// arrival selection, even when re-selecting the same airport.
    pub fn set_departure(&self, icao: &str) -> Result<()> {
        let ap = self
            .nav
            .airport(icao)
            .ok_or_else(|| FplnError::NotFound(icao.to_string()))?;
        debug!(icao, "set departure");
        let mut st = self.st();
        st.plan.reset(false);
        st.dep = Some(ap);
        st.arr = None;
        st.dep_rwy_data = None;
        st.arr_rwy.clear();
        st.arr_rwy_data = None;
        st.act_leg = None;
        Ok(())
    }

    /// Select the arrival airport. Requires a departure; keeps the departure
    /// runway and drops everything downstream of it.
    pub fn set_arrival(&self, icao: &str) -> Result<()> {
        let ap = self
            .nav
            .airport(icao)
            .ok_or_else(|| FplnError::NotFound(icao.to_string()))?;
        let mut st = self.st();
        if st.dep.is_none() {
            return Err(FplnError::Incompatible(
                "departure airport not set".to_string(),
            ));
        }
        if st.arr.as_ref().map(|a| a.icao == icao).unwrap_or(false) {
            return Ok(());
        }
        debug!(icao, "set arrival");
        st.plan.reset(true);
        st.arr = Some(ap);
        st.arr_rwy.clear();
        st.arr_rwy_data = None;
        Ok(())
    }

    pub fn departure(&self) -> Option<String> {
        self.st().dep.as_ref().map(|a| a.icao.clone())
    }

    pub fn arrival(&self) -> Option<String> {
        self.st().arr.as_ref().map(|a| a.icao.clone())
    }

    /// Departure runway ids (without the RW prefix), filtered down to those
    /// served by the selected SID when one is set.
    pub fn dep_runways(&self) -> Vec<String> {
        let st = self.st();
        let Some(dep) = st.dep.clone() else {
            return Vec::new();
        };
        let sid = st.plan.category_ref(SegCategory::Sid).name.clone();
        drop(st);
        self.nav
            .runways(&dep.icao)
            .into_iter()
            .map(|r| r.id.trim_start_matches("RW").to_string())
            .filter(|id| {
                sid.is_empty() || self.nav.proc_serves_rwy(&dep.icao, ProcKind::Sid, &sid, id)
            })
            .collect()
    }

    pub fn arr_runways(&self) -> Vec<String> {
        let st = self.st();
        let Some(arr) = st.arr.clone() else {
            return Vec::new();
        };
        let star = st.plan.category_ref(SegCategory::Star).name.clone();
        drop(st);
        self.nav
            .runways(&arr.icao)
            .into_iter()
            .map(|r| r.id.trim_start_matches("RW").to_string())
            .filter(|id| {
                star.is_empty() || self.nav.proc_serves_rwy(&arr.icao, ProcKind::Star, &star, id)
            })
            .collect()
    }

    /// Selected departure runway id, empty when none.
    pub fn dep_rwy(&self) -> String {
        self.st().plan.category_ref(SegCategory::DepRwy).name.clone()
    }

    pub fn arr_rwy(&self) -> String {
        self.st().arr_rwy.clone()
    }

    /// Select the departure runway. The runway leg anchors the plan; a SID
    /// and transition already selected are re-applied for the new runway.
    pub fn set_dep_rwy(&self, rwy: &str) -> Result<()> {
        let rwy = normalize_rwy_id(rwy);
        let mut guard = self.st();
        let st = &mut *guard;
        let dep = st
            .dep
            .clone()
            .ok_or_else(|| FplnError::Incompatible("departure airport not set".to_string()))?;
        let data = self
            .nav
            .runway(&dep.icao, &rwy)
            .ok_or_else(|| FplnError::NotFound(format!("{} runway {rwy}", dep.icao)))?;
        if st.plan.category_ref(SegCategory::DepRwy).name == rwy {
            return Ok(());
        }
        debug!(icao = %dep.icao, rwy = %rwy, "set departure runway");

        let sid = st.plan.category_ref(SegCategory::Sid).name.clone();
        let sid_trans = st.plan.category_ref(SegCategory::SidTrans).name.clone();
        st.plan.delete_ref(SegCategory::SidTrans);
        st.plan.delete_ref(SegCategory::Sid);
        st.plan.delete_ref(SegCategory::DepRwy);

        let leg = Leg {
            leg_type: PathTerm::IF,
            main_fix: Some(Fix {
                id: data.id.clone(),
                pos: data.pos,
                kind: FixKind::Runway,
            }),
            ..Leg::default()
        };
        st.plan.add_legs(leg, &[], SegCategory::DepRwy, &rwy, None);
        st.plan.set_ref_name(SegCategory::DepRwy, &rwy);
        st.dep_rwy_data = Some(data);

        if !sid.is_empty() {
            self.set_sid_star_locked(st, &sid, false, false);
        }
        if !sid_trans.is_empty() {
            self.set_proc_trans_locked(st, ProcKind::Sid, &sid_trans);
        }
        Ok(())
    }

    /// Select the arrival runway. A staged or selected STAR is materialized
    /// for it and the runway itself lands as the final approach fix.
    pub fn set_arr_rwy(&self, rwy: &str) -> Result<()> {
        let rwy = normalize_rwy_id(rwy);
        let mut guard = self.st();
        let st = &mut *guard;
        let arr = st
            .arr
            .clone()
            .ok_or_else(|| FplnError::Incompatible("arrival airport not set".to_string()))?;
        let data = self
            .nav
            .runway(&arr.icao, &rwy)
            .ok_or_else(|| FplnError::NotFound(format!("{} runway {rwy}", arr.icao)))?;
        if st.arr_rwy == rwy {
            return Ok(());
        }
        debug!(icao = %arr.icao, rwy = %rwy, "set arrival runway");

        let star = st.plan.category_ref(SegCategory::Star).name.clone();
        st.plan.delete_ref(SegCategory::ApproachTrans);
        st.arr_rwy = rwy.clone();
        st.arr_rwy_data = Some(data.clone());

        if !star.is_empty() {
            self.set_sid_star_locked(st, &star, true, false);
        }

        let leg = Leg::tf_to(Fix {
            id: data.id.clone(),
            pos: data.pos,
            kind: FixKind::Runway,
        });
        st.plan.add_legs(leg, &[], SegCategory::Approach, &rwy, None);
        st.plan.set_ref_name(SegCategory::Approach, &rwy);
        Ok(())
    }

    // ---- procedures ----

    /// Procedure names available for the current selection, filtered by the
    /// selected runway when one is set.
    pub fn procedures(&self, kind: ProcKind) -> Vec<String> {
        let st = self.st();
        let (arpt, rwy) = match kind {
            ProcKind::Sid => (
                st.dep.clone(),
                st.plan.category_ref(SegCategory::DepRwy).name.clone(),
            ),
            ProcKind::Star | ProcKind::Approach => (st.arr.clone(), st.arr_rwy.clone()),
        };
        drop(st);
        let Some(ap) = arpt else {
            return Vec::new();
        };
        self.nav
            .proc_names(&ap.icao, kind)
            .into_iter()
            .filter(|n| rwy.is_empty() || self.nav.proc_serves_rwy(&ap.icao, kind, n, &rwy))
            .collect()
    }

    /// Transition names of the currently selected procedure of `kind`.
    pub fn procedure_transitions(&self, kind: ProcKind) -> Vec<String> {
        let st = self.st();
        let (arpt, proc) = match kind {
            ProcKind::Sid => (
                st.dep.clone(),
                st.plan.category_ref(SegCategory::Sid).name.clone(),
            ),
            ProcKind::Star => (
                st.arr.clone(),
                st.plan.category_ref(SegCategory::Star).name.clone(),
            ),
            ProcKind::Approach => (
                st.arr.clone(),
                st.plan.category_ref(SegCategory::Approach).name.clone(),
            ),
        };
        drop(st);
        match arpt {
            Some(ap) if !proc.is_empty() => self.nav.proc_transitions(&ap.icao, kind, &proc),
            _ => Vec::new(),
        }
    }

    /// Name of the selected procedure of `kind`, empty when none.
    pub fn selected_procedure(&self, kind: ProcKind) -> String {
        let st = self.st();
        let cat = match kind {
            ProcKind::Sid => SegCategory::Sid,
            ProcKind::Star => SegCategory::Star,
            ProcKind::Approach => SegCategory::Approach,
        };
        st.plan.category_ref(cat).name.clone()
    }

    pub fn selected_transition(&self, kind: ProcKind) -> String {
        let st = self.st();
        let cat = match kind {
            ProcKind::Sid => SegCategory::SidTrans,
            ProcKind::Star => SegCategory::StarTrans,
            ProcKind::Approach => SegCategory::ApproachTrans,
        };
        st.plan.category_ref(cat).name.clone()
    }

    /// Select a SID, STAR or approach by name. Selecting an approach derives
    /// the arrival runway from its name and re-applies the STAR.
    pub fn set_procedure(&self, kind: ProcKind, name: &str) -> Result<()> {
        let mut guard = self.st();
        let st = &mut *guard;
        let arpt = match kind {
            ProcKind::Sid => st.dep.clone(),
            ProcKind::Star | ProcKind::Approach => st.arr.clone(),
        };
        let Some(ap) = arpt else {
            return Err(FplnError::Incompatible("airport not set".to_string()));
        };
        debug!(icao = %ap.icao, proc = name, ?kind, "set procedure");

        let ok = match kind {
            ProcKind::Sid => self.set_sid_star_locked(st, name, false, true),
            ProcKind::Star => self.set_sid_star_locked(st, name, true, true),
            ProcKind::Approach => self.set_appch_locked(st, name),
        };
        if ok {
            Ok(())
        } else if !self.nav.has_proc(&ap.icao, kind, name) {
            Err(FplnError::NotFound(name.to_string()))
        } else {
            Err(FplnError::Incompatible(format!(
                "{name} does not serve the selected runway"
            )))
        }
    }

    /// Select an enroute transition for the procedure of `kind`. `NONE`
    /// clears the transition.
    pub fn set_procedure_transition(&self, kind: ProcKind, trans: &str) -> Result<()> {
        let mut guard = self.st();
        let st = &mut *guard;
        if self.set_proc_trans_locked(st, kind, trans) {
            return Ok(());
        }
        let cat = match kind {
            ProcKind::Sid => SegCategory::Sid,
            ProcKind::Star => SegCategory::Star,
            ProcKind::Approach => SegCategory::Approach,
        };
        if st.plan.category_ref(cat).name.is_empty() {
            Err(FplnError::Incompatible(
                "no procedure selected for this transition".to_string(),
            ))
        } else {
            Err(FplnError::NotFound(trans.to_string()))
        }
    }

    /// Common SID/STAR selection path. Without a runway the choice is staged
    /// by name and materialized once a runway pins the leg sequence down.
    /// `reset_rwy` controls how much a failed selection tears down.
    fn set_sid_star_locked(
        &self,
        st: &mut RouteState,
        proc: &str,
        is_star: bool,
        reset_rwy: bool,
    ) -> bool {
        let (kind, cat, trans_cat) = if is_star {
            (ProcKind::Star, SegCategory::Star, SegCategory::StarTrans)
        } else {
            (ProcKind::Sid, SegCategory::Sid, SegCategory::SidTrans)
        };
        let arpt = if is_star { st.arr.clone() } else { st.dep.clone() };
        let rwy = if is_star {
            st.arr_rwy.clone()
        } else {
            st.plan.category_ref(SegCategory::DepRwy).name.clone()
        };

        if let Some(ap) = arpt {
            if self.nav.has_proc(&ap.icao, kind, proc) {
                if rwy.is_empty() {
                    st.plan.delete_ref(trans_cat);
                    st.plan.delete_ref(cat);
                    st.plan.set_ref_name(cat, proc);
                    return true;
                }

                let legs_rwy = self.nav.proc_legs(&ap.icao, kind, proc, &rwy);
                let legs_common = self.nav.proc_legs(&ap.icao, kind, proc, NONE_TRANS);
                if !legs_rwy.is_empty() || !legs_common.is_empty() {
                    // SIDs run runway part first, STARs common part first;
                    // the shared boundary fix appears in both parts once.
                    let (first, second) = if is_star {
                        (&legs_common, &legs_rwy)
                    } else {
                        (&legs_rwy, &legs_common)
                    };
                    let mut merged: Vec<Leg> = first.clone();
                    let skip = if first.is_empty() { 0 } else { 1.min(second.len()) };
                    merged.extend_from_slice(&second[skip..]);

                    let trans_nm = st.plan.category_ref(trans_cat).name.clone();
                    st.plan.delete_ref(trans_cat);
                    if self.add_fpl_seg(st, &merged, cat, proc, None, true) {
                        if !trans_nm.is_empty() {
                            self.set_proc_trans_locked(st, kind, &trans_nm);
                        }
                        return true;
                    }
                }
            }
        }

        // Selection failed; drop what the old one left behind.
        st.plan.delete_ref(trans_cat);
        st.plan.delete_ref(cat);
        if reset_rwy && is_star {
            st.arr_rwy.clear();
            st.arr_rwy_data = None;
            st.plan.delete_ref(SegCategory::ApproachTrans);
            st.plan.delete_ref(SegCategory::Approach);
        }
        false
    }

    /// Approach selection: derives the runway from the approach name, splits
    /// the legs at the runway fix and re-applies the STAR for the new runway.
    fn set_appch_locked(&self, st: &mut RouteState, appch: &str) -> bool {
        let Some(arr) = st.arr.clone() else {
            return false;
        };
        if self.nav.has_proc(&arr.icao, ProcKind::Approach, appch) {
            let curr_star = st.plan.category_ref(SegCategory::Star).name.clone();
            let curr_star_trans = st.plan.category_ref(SegCategory::StarTrans).name.clone();
            let curr_appch_trans = st
                .plan
                .category_ref(SegCategory::ApproachTrans)
                .name
                .clone();
            st.plan.delete_ref(SegCategory::StarTrans);
            st.plan.delete_ref(SegCategory::Star);
            st.plan.delete_ref(SegCategory::ApproachTrans);

            let legs = self
                .nav
                .proc_legs(&arr.icao, ProcKind::Approach, appch, NONE_TRANS);
            let tmp_rwy = appr_runway(appch);
            if !legs.is_empty() && self.set_appch_legs(st, appch, &tmp_rwy, &legs) {
                st.arr_rwy = tmp_rwy;
                st.arr_rwy_data = self.nav.runway(&arr.icao, &st.arr_rwy);
                if !curr_star.is_empty() {
                    self.set_sid_star_locked(st, &curr_star, true, false);
                }
                if !curr_star_trans.is_empty() {
                    self.set_proc_trans_locked(st, ProcKind::Star, &curr_star_trans);
                }
                if !curr_appch_trans.is_empty() {
                    self.set_proc_trans_locked(st, ProcKind::Approach, &curr_appch_trans);
                }
                return true;
            }
        }

        st.arr_rwy.clear();
        st.arr_rwy_data = None;
        st.plan.delete_ref(SegCategory::StarTrans);
        st.plan.delete_ref(SegCategory::Star);
        st.plan.delete_ref(SegCategory::ApproachTrans);
        st.plan.delete_ref(SegCategory::Approach);
        false
    }

    /// Split approach legs at the runway fix: everything through the runway
    /// forms the approach proper, everything from it the missed approach.
    fn set_appch_legs(&self, st: &mut RouteState, appch: &str, rwy: &str, legs: &[Leg]) -> bool {
        let rwy_full = format!("RW{rwy}");
        let split = legs.iter().position(|l| {
            l.main_fix
                .as_ref()
                .map(|f| f.id == rwy || f.id == rwy_full)
                .unwrap_or(false)
        });
        let Some(idx) = split else {
            return false;
        };

        let added = self.add_fpl_seg(st, &legs[..=idx], SegCategory::Approach, appch, None, true);
        if added && legs.len() > idx + 1 {
            // The go-around run re-opens on the runway fix so its stitch
            // merges away on insert.
            if let Some(appr_seg) = st.plan.category_ref(SegCategory::Approach).segment {
                let seg_ins = st.plan.segs.next(appr_seg);
                self.add_fpl_seg(
                    st,
                    &legs[idx..],
                    SegCategory::Approach,
                    MISSED_APPR_SEG_NAME,
                    Some(seg_ins),
                    false,
                );
            }
        }
        added
    }

    fn set_proc_trans_locked(&self, st: &mut RouteState, kind: ProcKind, trans: &str) -> bool {
        let trans = if trans == NONE_TRANS { "" } else { trans };
        let (cat, trans_cat, arpt) = match kind {
            ProcKind::Sid => (SegCategory::Sid, SegCategory::SidTrans, st.dep.clone()),
            ProcKind::Star => (SegCategory::Star, SegCategory::StarTrans, st.arr.clone()),
            ProcKind::Approach => (
                SegCategory::Approach,
                SegCategory::ApproachTrans,
                st.arr.clone(),
            ),
        };
        let Some(ap) = arpt else {
            return false;
        };
        let proc = st.plan.category_ref(cat).name.clone();
        if proc.is_empty() {
            st.plan.delete_ref(trans_cat);
            return false;
        }
        if trans.is_empty() {
            st.plan.delete_ref(trans_cat);
            return true;
        }
        if st.plan.category_ref(cat).segment.is_none() {
            // Procedure staged by name only; remember the transition for
            // when a runway materializes both.
            st.plan.delete_ref(trans_cat);
            st.plan.set_ref_name(trans_cat, trans);
            return true;
        }

        let legs = self.nav.proc_legs(&ap.icao, kind, &proc, trans);
        if legs.is_empty() {
            st.plan.delete_ref(trans_cat);
            return false;
        }
        let added = self.add_fpl_seg(st, &legs, trans_cat, trans, None, true);
        if !added {
            st.plan.delete_ref(trans_cat);
        }
        added
    }

    /// Insert a leg run as a named segment and report whether the category
    /// reference ended up on a segment of that category.
    fn add_fpl_seg(
        &self,
        st: &mut RouteState,
        legs: &[Leg],
        cat: SegCategory,
        name: &str,
        next: Option<usize>,
        set_ref: bool,
    ) -> bool {
        let Some((start, rest)) = legs.split_first() else {
            return false;
        };
        st.plan.add_legs(start.clone(), rest, cat, name, next);
        if set_ref {
            st.plan.set_ref_name(cat, name);
        }
        st.plan
            .category_ref(cat)
            .segment
            .map(|s| st.plan.segs.get(s).category == Some(cat))
            .unwrap_or(false)
    }

    // ---- enroute edits ----

    fn resolve_seg(&self, st: &RouteState, r: Option<SnapshotRef>) -> Result<usize> {
        match r {
            None => Ok(TAIL),
            Some(r) => st
                .plan
                .resolve_seg_ref(r)
                .ok_or(FplnError::InvalidReference),
        }
    }

    fn entry_fix(&self, st: &RouteState, seg: usize) -> Result<Fix> {
        let slot = st.plan.end_before(seg);
        if slot == HEAD {
            return Err(FplnError::Incompatible(
                "airway needs a preceding fix".to_string(),
            ));
        }
        st.plan
            .legs
            .get(slot)
            .leg
            .as_ref()
            .and_then(|l| l.main_fix.clone())
            .ok_or_else(|| FplnError::Incompatible("airway needs a preceding fix".to_string()))
    }

    /// Stage an airway before `next` (tail when `None`). The airway stays an
    /// open placeholder until an exit fix, or a following airway whose
    /// junction pins it down, commits its legs.
    pub fn add_airway(&self, next: Option<SnapshotRef>, awy: &str) -> Result<()> {
        let mut guard = self.st();
        let st = &mut *guard;
        let next_seg = self.resolve_seg(st, next)?;
        let prev = st.plan.segs.prev(next_seg);

        let enrt = cat_rank(Some(SegCategory::Enroute));
        let prev_ok = prev == HEAD || cat_rank(st.plan.segs.get(prev).category) <= enrt;
        let next_ok = next_seg == TAIL || cat_rank(st.plan.segs.get(next_seg).category) >= enrt;
        if !prev_ok || !next_ok {
            return Err(FplnError::Incompatible(
                "airway must join the enroute portion".to_string(),
            ));
        }

        let prev_data = st.plan.segs.get(prev).clone();
        if prev != HEAD
            && prev_data.end.is_none()
            && !prev_data.is_discon
            && !prev_data.is_direct
        {
            // The previous airway is still open; the new one fixes its exit
            // at their first shared junction.
            let entry = self.entry_fix(st, prev)?;
            let pts = self
                .nav
                .awy_join_path(&prev_data.name, &entry.awy_uid(), awy);
            if pts.is_empty() {
                return Err(FplnError::NotFound(format!(
                    "no junction between {} and {awy}",
                    prev_data.name
                )));
            }
            st.plan.delete_segment(prev, true, false, false);
            self.add_awy_seg(st, &prev_data.name, next_seg, &pts);
        } else {
            let entry = self.entry_fix(st, prev)?;
            if !self.nav.awy_has_fix(awy, &entry.awy_uid()) {
                return Err(FplnError::NotFound(format!(
                    "{awy} does not pass through {}",
                    entry.id
                )));
            }
        }

        debug!(awy, "stage airway");
        st.plan
            .segs
            .insert_before(
                Segment {
                    name: awy.to_string(),
                    category: Some(SegCategory::Enroute),
                    is_direct: false,
                    is_discon: false,
                    end: None,
                },
                next_seg,
            )
            .ok_or(FplnError::Exhausted)?;
        st.plan.bump();
        Ok(())
    }

    /// Commit the airway preceding `next` by naming its exit fix (an airway
    /// uid). A fix off the airway falls back to a direct leg.
    pub fn set_airway_exit(&self, next: Option<SnapshotRef>, end_uid: &str) -> Result<()> {
        let mut guard = self.st();
        let st = &mut *guard;
        let next_seg = self.resolve_seg(st, next)?;
        let prev = st.plan.segs.prev(next_seg);
        if prev == HEAD {
            return Err(FplnError::InvalidReference);
        }
        let prev_data = st.plan.segs.get(prev).clone();
        let anchor_leg = st.plan.end_before(st.plan.segs.prev(prev));

        let in_awy = !prev_data.is_direct
            && !prev_data.is_discon
            && self.nav.awy_has_fix(&prev_data.name, end_uid);

        if anchor_leg != HEAD && in_awy {
            let entry = self.entry_fix(st, st.plan.segs.prev(prev))?;
            let pts = self.nav.awy_path(&prev_data.name, &entry.awy_uid(), end_uid);
            if pts.is_empty() {
                return Err(FplnError::NotFound(end_uid.to_string()));
            }
            st.plan.delete_segment(prev, true, true, false);
            self.add_awy_seg(st, &prev_data.name, next_seg, &pts);
            Ok(())
        } else {
            let fix = self
                .nav
                .fix_by_awy_uid(end_uid)
                .ok_or_else(|| FplnError::NotFound(end_uid.to_string()))?;
            if prev_data.end.is_none() {
                st.plan.delete_segment(prev, true, true, false);
            }
            let next_leg = st.plan.legs.next(anchor_leg);
            st.plan.add_direct_leg(Leg::tf_to(fix), next_leg);
            Ok(())
        }
    }

    fn add_awy_seg(&self, st: &mut RouteState, awy: &str, next_seg: usize, pts: &[Fix]) {
        let legs: Vec<Leg> = pts.iter().cloned().map(Leg::tf_to).collect();
        st.plan.add_legs(
            legs[0].clone(),
            &legs[1..],
            SegCategory::Enroute,
            awy,
            Some(next_seg),
        );
    }

    /// Collapse an enroute airway to a direct to its exit fix.
    pub fn delete_airway(&self, seg: SnapshotRef) -> Result<()> {
        let mut guard = self.st();
        let st = &mut *guard;
        let slot = st
            .plan
            .resolve_seg_ref(seg)
            .ok_or(FplnError::InvalidReference)?;
        if slot <= TAIL {
            return Err(FplnError::InvalidReference);
        }
        let data = st.plan.segs.get(slot).clone();
        if data.is_discon || data.is_direct || data.category != Some(SegCategory::Enroute) {
            return Err(FplnError::Incompatible(
                "only a named enroute airway can be deleted".to_string(),
            ));
        }
        if let Some(act) = st.act_leg {
            if st.plan.legs.get(act).seg == slot {
                return Err(FplnError::InvalidReference);
            }
        }
        st.plan.delete_segment(slot, true, false, true);
        Ok(())
    }

    /// Delete the waypoint a segment ends on.
    pub fn delete_seg_end(&self, seg: SnapshotRef) -> Result<()> {
        let mut guard = self.st();
        let st = &mut *guard;
        let slot = st
            .plan
            .resolve_seg_ref(seg)
            .ok_or(FplnError::InvalidReference)?;
        if slot <= TAIL {
            return Err(FplnError::InvalidReference);
        }
        let end = st
            .plan
            .segs
            .get(slot)
            .end
            .ok_or(FplnError::InvalidReference)?;
        if st.act_leg == Some(end) {
            return Err(FplnError::InvalidReference);
        }
        if !st.plan.delete_singl_leg(end) {
            return Err(FplnError::Incompatible(
                "cannot delete a discontinuity".to_string(),
            ));
        }
        Ok(())
    }

    /// Go direct between two legs, dropping everything between them. The
    /// endpoints may be given in either order.
    pub fn direct_to(&self, from: SnapshotRef, to: SnapshotRef) -> Result<()> {
        let mut guard = self.st();
        let st = &mut *guard;
        let mut from_slot = st
            .plan
            .resolve_leg_ref(from)
            .ok_or(FplnError::InvalidReference)?;
        let mut to_slot = st
            .plan
            .resolve_leg_ref(to)
            .ok_or(FplnError::InvalidReference)?;
        if from_slot == TAIL
            || to_slot == TAIL
            || st.plan.legs.get(from_slot).is_discon
            || st.plan.legs.get(to_slot).is_discon
        {
            return Err(FplnError::InvalidReference);
        }
        let pf = st
            .plan
            .legs
            .position(from_slot)
            .ok_or(FplnError::InvalidReference)?;
        let pt = st
            .plan
            .legs
            .position(to_slot)
            .ok_or(FplnError::InvalidReference)?;
        if pf == pt {
            return Err(FplnError::Incompatible(
                "direct-to needs two distinct legs".to_string(),
            ));
        }
        if pf > pt {
            std::mem::swap(&mut from_slot, &mut to_slot);
        }

        // An active leg inside the dropped span falls back to the leg the
        // direct starts from.
        if let Some(act) = st.act_leg {
            if let Some(pa) = st.plan.legs.position(act) {
                if pa > pf.min(pt) && pa < pf.max(pt) {
                    st.act_leg = Some(from_slot);
                }
            }
        }

        debug!("direct between legs");
        st.plan.delete_range(from_slot, to_slot);
        Ok(())
    }

    /// Insert a direct leg to `fix` before the referenced leg (tail when the
    /// reference's node is `None`). Duplicating a neighbor is a no-op.
    pub fn insert_direct(&self, fix: Fix, next: SnapshotRef) -> Result<()> {
        let mut guard = self.st();
        let st = &mut *guard;
        let next_slot = st
            .plan
            .resolve_leg_ref(next)
            .ok_or(FplnError::InvalidReference)?;
        if st.plan.category_ref(SegCategory::DepRwy).segment.is_none() {
            return Err(FplnError::Incompatible(
                "no departure runway selected".to_string(),
            ));
        }

        let leg = Leg::tf_to(fix);
        let prev_slot = st.plan.legs.prev(next_slot);
        let dup = |n: &Option<Leg>| n.as_ref().map(|l| l.same_fix(&leg)).unwrap_or(false);
        if dup(&st.plan.legs.get(prev_slot).leg) || dup(&st.plan.legs.get(next_slot).leg) {
            return Ok(());
        }

        let before = st.plan.legs.len();
        st.plan.add_direct_leg(leg, next_slot);
        if st.plan.legs.len() == before {
            return Err(FplnError::Exhausted);
        }
        Ok(())
    }

    /// Delete a single leg, leaving a discontinuity when the route continues.
    pub fn delete_leg(&self, r: SnapshotRef) -> Result<()> {
        let mut guard = self.st();
        let st = &mut *guard;
        let slot = st
            .plan
            .resolve_leg_ref(r)
            .ok_or(FplnError::InvalidReference)?;
        if slot == TAIL || st.act_leg == Some(slot) {
            return Err(FplnError::InvalidReference);
        }
        if !st.plan.delete_singl_leg(slot) {
            return Err(FplnError::Incompatible(
                "cannot delete a discontinuity".to_string(),
            ));
        }
        Ok(())
    }

    // ---- active leg ----

    pub fn set_active_leg(&self, r: SnapshotRef) -> Result<()> {
        let mut st = self.st();
        let slot = st
            .plan
            .resolve_leg_ref(r)
            .ok_or(FplnError::InvalidReference)?;
        if slot == TAIL || st.plan.legs.get(slot).is_discon {
            return Err(FplnError::InvalidReference);
        }
        st.act_leg = Some(slot);
        Ok(())
    }

    pub fn active_leg(&self) -> Option<SnapshotRef> {
        let st = self.st();
        st.act_leg.map(|s| SnapshotRef {
            node: Some(s),
            version: st.plan.version(),
        })
    }

    /// Advance the active leg past discontinuities; `None` when the route
    /// ran out, which also clears the active leg.
    pub fn sequence(&self) -> Option<SnapshotRef> {
        let mut st = self.st();
        let act = st.act_leg?;
        let mut next = st.plan.legs.next(act);
        while next != TAIL && st.plan.legs.get(next).is_discon {
            next = st.plan.legs.next(next);
        }
        if next == TAIL {
            st.act_leg = None;
            None
        } else {
            st.act_leg = Some(next);
            Some(SnapshotRef {
                node: Some(next),
                version: st.plan.version(),
            })
        }
    }

    // ---- recompute and snapshots ----

    /// Recompute leg geometry when the plan changed since the last pass.
    /// `hdg_trk_diff_deg` is the current wind-driven heading/track split
    /// applied to heading legs.
    pub fn update(&self, hdg_trk_diff_deg: f64) {
        let mut st = self.st();
        if st.version_calc == st.plan.version() {
            return;
        }
        if let Some(act) = st.act_leg {
            if !st.plan.legs.is_live(act) || st.plan.legs.get(act).is_discon {
                st.act_leg = None;
            }
        }
        let rwys = RunwayContext {
            dep_len_ft: st.dep_rwy_data.as_ref().map(|r| r.impl_length_ft),
            arr_len_ft: st.arr_rwy_data.as_ref().map(|r| r.impl_length_ft),
        };
        geometry::recompute(&mut st.plan, &self.cfg, rwys, hdg_trk_diff_deg);
        st.version_calc = st.plan.version();
    }

    pub fn version(&self) -> u64 {
        self.st().plan.version()
    }

    pub fn leg_count(&self) -> usize {
        self.st().plan.legs.len()
    }

    pub fn seg_count(&self) -> usize {
        self.st().plan.segs.len()
    }

    pub fn leg_window(&self, start: usize, len: usize) -> Option<(u64, Vec<LegRow>)> {
        self.st().plan.leg_window(start, len)
    }

    pub fn seg_window(&self, start: usize, len: usize) -> Option<(u64, Vec<SegRow>)> {
        self.st().plan.seg_window(start, len)
    }

    /// Reference to the `index`th leg under the current version.
    pub fn leg_ref(&self, index: usize) -> Option<SnapshotRef> {
        let st = self.st();
        st.plan.legs.nth(index).map(|slot| SnapshotRef {
            node: Some(slot),
            version: st.plan.version(),
        })
    }

    /// Resolved geometry for map displays, at most `max_count` entries from
    /// the front of the route. Discontinuities and unresolved legs are
    /// skipped.
    pub fn projected_legs(&self, max_count: usize) -> Vec<ProjectedLeg> {
        let st = self.st();
        st.plan
            .legs
            .iter_slots()
            .filter_map(|s| {
                let n = st.plan.legs.get(s);
                if n.is_discon || !n.path.is_finite {
                    return None;
                }
                Some(ProjectedLeg {
                    path: n.path,
                    end_fix: n.leg.as_ref().and_then(|l| l.main_fix.clone()),
                })
            })
            .take(max_count)
            .collect()
    }

    /// Replace this plan with a structural copy of `other`. Slot indices
    /// carry over, so the active leg stays on the same waypoint.
    pub fn copy_from(&self, other: &Fpln) {
        let cloned = other.st().clone_state();
        *self.st() = cloned;
    }

    /// Drop the whole route, airports included.
    pub fn clear(&self) {
        *self.st() = RouteState::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navdata::NavDb;

    fn fpln() -> Fpln {
        Fpln::new(Arc::new(NavDb::demo()))
    }

    fn ids(fp: &Fpln) -> Vec<String> {
        fp.leg_window(0, 100)
            .map(|(_, rows)| {
                rows.iter()
                    .map(|r| {
                        if r.data.is_discon {
                            "---".to_string()
                        } else {
                            let leg = r.data.leg.as_ref().unwrap();
                            leg.main_fix
                                .as_ref()
                                .map(|f| f.id.clone())
                                .unwrap_or_else(|| leg.leg_type.label().to_string())
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn uid(fp: &Fpln, id: &str) -> String {
        fp.nav.find_fix(id, None, None).unwrap().awy_uid()
    }

    #[test]
    fn departure_runway_anchors_the_plan() {
        let fp = fpln();
        fp.set_departure("KSEA").unwrap();
        fp.set_arrival("KPDX").unwrap();
        fp.set_dep_rwy("16C").unwrap();
        assert_eq!(ids(&fp), vec!["RW16C"]);
        assert_eq!(fp.dep_rwy(), "16C");
        assert_eq!(
            fp.set_departure("EGLL"),
            Err(FplnError::NotFound("EGLL".to_string()))
        );
    }

    #[test]
    fn arrival_requires_departure() {
        let fp = fpln();
        assert!(matches!(
            fp.set_arrival("KPDX"),
            Err(FplnError::Incompatible(_))
        ));
    }

    #[test]
    fn sid_and_transition_join_without_gap() {
        let fp = fpln();
        fp.set_departure("KSEA").unwrap();
        fp.set_arrival("KPDX").unwrap();
        fp.set_dep_rwy("16C").unwrap();
        fp.set_procedure(ProcKind::Sid, "CHINS6").unwrap();
        fp.set_procedure_transition(ProcKind::Sid, "YKM").unwrap();

        let got = ids(&fp);
        assert_eq!(got, vec!["RW16C", "CA", "RADDY", "CHINS", "ELN", "YKM"]);
        assert_eq!(fp.selected_procedure(ProcKind::Sid), "CHINS6");
        assert_eq!(fp.selected_transition(ProcKind::Sid), "YKM");
    }

    #[test]
    fn unknown_procedure_is_not_found() {
        let fp = fpln();
        fp.set_departure("KSEA").unwrap();
        fp.set_dep_rwy("16C").unwrap();
        assert_eq!(
            fp.set_procedure(ProcKind::Sid, "NOPE1"),
            Err(FplnError::NotFound("NOPE1".to_string()))
        );
    }

    #[test]
    fn airway_entry_and_exit_commit_legs() {
        let fp = fpln();
        fp.set_departure("KSEA").unwrap();
        fp.set_arrival("KPDX").unwrap();
        fp.set_dep_rwy("16C").unwrap();
        fp.set_procedure(ProcKind::Sid, "CHINS6").unwrap();
        fp.set_procedure_transition(ProcKind::Sid, "YKM").unwrap();

        fp.add_airway(None, "V23").unwrap();
        fp.set_airway_exit(None, &uid(&fp, "LAKER")).unwrap();

        let got = ids(&fp);
        assert_eq!(
            got,
            vec!["RW16C", "CA", "RADDY", "CHINS", "ELN", "YKM", "BUFMN", "LAKER"]
        );
        // The airway entry merged with the transition's last fix.
        assert_eq!(got.iter().filter(|s| s.as_str() == "YKM").count(), 1);
    }

    #[test]
    fn airway_off_route_is_rejected() {
        let fp = fpln();
        fp.set_departure("KSEA").unwrap();
        fp.set_arrival("KPDX").unwrap();
        fp.set_dep_rwy("16C").unwrap();
        fp.set_procedure(ProcKind::Sid, "CHINS6").unwrap();
        // Route currently ends at CHINS, which V23 does not pass through.
        assert!(matches!(
            fp.add_airway(None, "V23"),
            Err(FplnError::NotFound(_))
        ));
    }

    #[test]
    fn approach_selection_builds_missed_approach() {
        let fp = fpln();
        fp.set_departure("KSEA").unwrap();
        fp.set_arrival("KPDX").unwrap();
        fp.set_dep_rwy("16C").unwrap();
        fp.set_procedure(ProcKind::Star, "HHOOD5").unwrap();
        fp.set_arr_rwy("28L").unwrap();
        fp.set_procedure(ProcKind::Approach, "I28L").unwrap();

        assert_eq!(fp.arr_rwy(), "28L");
        assert_eq!(fp.selected_procedure(ProcKind::Approach), "I28L");
        assert_eq!(fp.selected_procedure(ProcKind::Star), "HHOOD5");
        let (_, segs) = fp.seg_window(0, 50).unwrap();
        assert!(segs.iter().any(|s| s.data.name == MISSED_APPR_SEG_NAME));
        assert!(segs.iter().any(|s| s.data.name == "I28L"));
    }

    #[test]
    fn direct_to_drops_intermediate_legs_either_order() {
        let fp = fpln();
        fp.set_departure("KSEA").unwrap();
        fp.set_arrival("KPDX").unwrap();
        fp.set_dep_rwy("16C").unwrap();
        fp.set_procedure(ProcKind::Sid, "CHINS6").unwrap();
        fp.set_procedure_transition(ProcKind::Sid, "YKM").unwrap();

        let got = ids(&fp);
        let raddy = got.iter().position(|s| s == "RADDY").unwrap();
        let ykm = got.iter().position(|s| s == "YKM").unwrap();
        // Reversed argument order still runs front to back.
        let from = fp.leg_ref(ykm).unwrap();
        let to = fp.leg_ref(raddy).unwrap();
        fp.direct_to(from, to).unwrap();

        assert_eq!(ids(&fp), vec!["RW16C", "CA", "RADDY", "YKM"]);
    }

    #[test]
    fn direct_to_moves_the_active_leg_to_the_from_leg() {
        let fp = fpln();
        fp.set_departure("KSEA").unwrap();
        fp.set_arrival("KPDX").unwrap();
        fp.set_dep_rwy("16C").unwrap();
        fp.set_procedure(ProcKind::Sid, "CHINS6").unwrap();
        fp.set_procedure_transition(ProcKind::Sid, "YKM").unwrap();

        let got = ids(&fp);
        let chins = got.iter().position(|s| s == "CHINS").unwrap();
        fp.set_active_leg(fp.leg_ref(chins).unwrap()).unwrap();

        let raddy = got.iter().position(|s| s == "RADDY").unwrap();
        let ykm = got.iter().position(|s| s == "YKM").unwrap();
        fp.direct_to(fp.leg_ref(raddy).unwrap(), fp.leg_ref(ykm).unwrap())
            .unwrap();

        // The marker was inside the dropped span; it lands on the leg the
        // direct starts from, not its target.
        let act = fp.active_leg().unwrap();
        let (_, rows) = fp.leg_window(0, 100).unwrap();
        let act_fix = rows
            .iter()
            .find(|r| Some(r.slot) == act.node)
            .and_then(|r| r.data.leg.as_ref())
            .and_then(|l| l.main_fix.as_ref())
            .map(|f| f.id.clone());
        assert_eq!(act_fix.as_deref(), Some("RADDY"));
    }

    #[test]
    fn stale_references_are_rejected() {
        let fp = fpln();
        fp.set_departure("KSEA").unwrap();
        fp.set_arrival("KPDX").unwrap();
        fp.set_dep_rwy("16C").unwrap();
        fp.set_procedure(ProcKind::Sid, "CHINS6").unwrap();

        let r = fp.leg_ref(1).unwrap();
        fp.set_procedure_transition(ProcKind::Sid, "YKM").unwrap();
        assert_eq!(fp.delete_leg(r), Err(FplnError::InvalidReference));
        // A fresh reference works.
        let got = ids(&fp);
        let eln = got.iter().position(|s| s == "ELN").unwrap();
        fp.delete_leg(fp.leg_ref(eln).unwrap()).unwrap();
        assert!(ids(&fp).contains(&"---".to_string()));
    }

    #[test]
    fn active_leg_sequences_and_blocks_deletion() {
        let fp = fpln();
        fp.set_departure("KSEA").unwrap();
        fp.set_arrival("KPDX").unwrap();
        fp.set_dep_rwy("16C").unwrap();
        fp.set_procedure(ProcKind::Sid, "CHINS6").unwrap();

        let r = fp.leg_ref(1).unwrap();
        fp.set_active_leg(r).unwrap();
        assert_eq!(fp.delete_leg(r), Err(FplnError::InvalidReference));

        let next = fp.sequence().unwrap();
        assert_eq!(fp.active_leg(), Some(next));
        fp.sequence().unwrap();
        // Past the last leg the active leg clears.
        assert!(fp.sequence().is_none());
        assert!(fp.active_leg().is_none());
    }

    #[test]
    fn update_recomputes_once_per_version() {
        let fp = fpln();
        fp.set_departure("KSEA").unwrap();
        fp.set_arrival("KPDX").unwrap();
        fp.set_dep_rwy("16C").unwrap();
        fp.set_procedure(ProcKind::Sid, "CHINS6").unwrap();

        fp.update(0.0);
        let v = fp.version();
        let legs = fp.projected_legs(50);
        assert!(!legs.is_empty());
        // The display window caps the list, front first.
        let capped = fp.projected_legs(1);
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].path, legs[0].path);
        // Climb leg resolved to its altitude pseudo-fix.
        let (_, rows) = fp.leg_window(0, 10).unwrap();
        assert_eq!(
            rows[1].data.leg.as_ref().unwrap().main_fix.as_ref().unwrap().id,
            "(1100)"
        );
        fp.update(0.0);
        assert_eq!(fp.version(), v);
    }

    #[test]
    fn copy_preserves_route_and_selection() {
        let src = fpln();
        src.set_departure("KSEA").unwrap();
        src.set_arrival("KPDX").unwrap();
        src.set_dep_rwy("16C").unwrap();
        src.set_procedure(ProcKind::Sid, "CHINS6").unwrap();

        let dst = fpln();
        dst.copy_from(&src);
        assert_eq!(ids(&dst), ids(&src));
        assert_eq!(dst.selected_procedure(ProcKind::Sid), "CHINS6");
        assert_eq!(dst.departure(), Some("KSEA".to_string()));

        // Edits to the copy leave the source alone.
        let got = ids(&dst);
        let raddy = got.iter().position(|s| s == "RADDY").unwrap();
        dst.delete_leg(dst.leg_ref(raddy).unwrap()).unwrap();
        assert!(!ids(&dst).contains(&"RADDY".to_string()));
        assert!(ids(&src).contains(&"RADDY".to_string()));
    }
}
