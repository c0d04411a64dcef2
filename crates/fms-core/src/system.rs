//! Active/standby route management: one committed plan the guidance flies
//! and a scratch plan edits accumulate on until executed.

use crate::error::{FplnError, Result};
use crate::geometry::GeometryConfig;
use crate::navdata::NavDataProvider;
use crate::router::Fpln;
use std::sync::Arc;
use tracing::info;

/// Index of the committed (active) route.
pub const ACT_RTE_IDX: usize = 0;

/// The set of routes the system manages: slot 0 holds the committed plan,
/// the rest are standby scratchpads.
pub struct RouteSystem {
    routes: Vec<Arc<Fpln>>,
    /// Standby route currently selected for editing.
    sel_rte_idx: usize,
    /// Version of the selected standby at the last execute; a drift means
    /// unexecuted modifications exist.
    exec_version: u64,
}

impl RouteSystem {
    /// `n_standby` standby routes alongside the active one.
    pub fn new(nav: Arc<dyn NavDataProvider>, cfg: GeometryConfig, n_standby: usize) -> RouteSystem {
        let n_standby = n_standby.max(1);
        let routes = (0..n_standby + 1)
            .map(|_| Arc::new(Fpln::with_config(nav.clone(), cfg.clone())))
            .collect();
        RouteSystem {
            routes,
            sel_rte_idx: 1,
            exec_version: 0,
        }
    }

    pub fn n_routes(&self) -> usize {
        self.routes.len()
    }

    /// The committed route guidance flies.
    pub fn active(&self) -> &Arc<Fpln> {
        &self.routes[ACT_RTE_IDX]
    }

    /// The standby route edits go to.
    pub fn standby(&self) -> &Arc<Fpln> {
        &self.routes[self.sel_rte_idx]
    }

    pub fn selected_index(&self) -> usize {
        self.sel_rte_idx
    }

    pub fn select(&mut self, idx: usize) -> Result<()> {
        if idx == ACT_RTE_IDX || idx >= self.routes.len() {
            return Err(FplnError::InvalidReference);
        }
        self.sel_rte_idx = idx;
        self.exec_version = self.routes[idx].version();
        Ok(())
    }

    /// True when the standby carries edits not yet executed.
    pub fn exec_pending(&self) -> bool {
        self.standby().version() != self.exec_version
    }

    /// A route can be activated once it runs between two airports.
    pub fn can_execute(&self) -> bool {
        let sb = self.standby();
        sb.departure().is_some() && sb.arrival().is_some()
    }

    /// Commit the standby: the active route becomes a structural copy of it.
    pub fn execute(&mut self) -> Result<()> {
        if !self.can_execute() {
            return Err(FplnError::Incompatible(
                "route needs departure and arrival airports".to_string(),
            ));
        }
        info!(rte = self.sel_rte_idx, "execute route");
        self.routes[ACT_RTE_IDX].copy_from(&self.routes[self.sel_rte_idx]);
        self.exec_version = self.standby().version();
        Ok(())
    }

    /// Discard standby edits by copying the active route back over them.
    pub fn erase(&mut self) {
        info!(rte = self.sel_rte_idx, "erase standby edits");
        self.routes[self.sel_rte_idx].copy_from(&self.routes[ACT_RTE_IDX]);
        self.exec_version = self.standby().version();
    }

    /// Run the geometry pass over every route that changed.
    pub fn update(&self, hdg_trk_diff_deg: f64) {
        for rte in &self.routes {
            rte.update(hdg_trk_diff_deg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navdata::{NavDb, ProcKind};

    fn system() -> RouteSystem {
        RouteSystem::new(Arc::new(NavDb::demo()), GeometryConfig::default(), 2)
    }

    fn build_route(fp: &Fpln) {
        fp.set_departure("KSEA").unwrap();
        fp.set_arrival("KPDX").unwrap();
        fp.set_dep_rwy("16C").unwrap();
        fp.set_procedure(ProcKind::Sid, "CHINS6").unwrap();
    }

    #[test]
    fn execute_copies_standby_to_active() {
        let mut sys = system();
        build_route(sys.standby());
        assert!(sys.exec_pending());
        assert_eq!(sys.active().leg_count(), 0);

        sys.execute().unwrap();
        assert!(!sys.exec_pending());
        assert_eq!(sys.active().leg_count(), sys.standby().leg_count());
        assert_eq!(sys.active().selected_procedure(ProcKind::Sid), "CHINS6");
    }

    #[test]
    fn execute_requires_both_airports() {
        let mut sys = system();
        sys.standby().set_departure("KSEA").unwrap();
        assert!(!sys.can_execute());
        assert!(matches!(sys.execute(), Err(FplnError::Incompatible(_))));
    }

    #[test]
    fn erase_restores_committed_route() {
        let mut sys = system();
        build_route(sys.standby());
        sys.execute().unwrap();

        let (_, rows) = sys.standby().leg_window(0, 10).unwrap();
        let raddy = rows
            .iter()
            .position(|r| {
                r.data
                    .leg
                    .as_ref()
                    .and_then(|l| l.main_fix.as_ref())
                    .map(|f| f.id == "RADDY")
                    .unwrap_or(false)
            })
            .unwrap();
        sys.standby()
            .delete_leg(sys.standby().leg_ref(raddy).unwrap())
            .unwrap();
        assert!(sys.exec_pending());
        assert_ne!(sys.active().leg_count(), sys.standby().leg_count());

        sys.erase();
        assert!(!sys.exec_pending());
        assert_eq!(sys.active().leg_count(), sys.standby().leg_count());
    }

    #[test]
    fn selecting_the_active_slot_is_refused() {
        let mut sys = system();
        assert_eq!(sys.select(ACT_RTE_IDX), Err(FplnError::InvalidReference));
        assert_eq!(sys.select(99), Err(FplnError::InvalidReference));
        sys.select(2).unwrap();
        assert_eq!(sys.selected_index(), 2);
    }
}
