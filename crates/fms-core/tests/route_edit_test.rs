//! End-to-end route editing through the public API: building a complete
//! route, repairing discontinuities, and round-tripping the route file.

use fms_core::models::MISSED_APPR_SEG_NAME;
use fms_core::{
    Fpln, GeometryConfig, NavDataProvider, NavDb, ProcKind, RouteSystem, SnapshotRef,
};
use std::sync::Arc;

fn nav() -> Arc<NavDb> {
    Arc::new(NavDb::demo())
}

fn fix_ids(fp: &Fpln) -> Vec<String> {
    fp.leg_window(0, 200)
        .map(|(_, rows)| {
            rows.iter()
                .map(|r| {
                    if r.data.is_discon {
                        "---".to_string()
                    } else {
                        r.data
                            .leg
                            .as_ref()
                            .and_then(|l| l.main_fix.as_ref())
                            .map(|f| f.id.clone())
                            .unwrap_or_default()
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// KSEA 16C CHINS6.YKM, V23 to LAKER, HHOOD5 into the I28L at KPDX.
fn build_full_route(fp: &Fpln, nav: &Arc<NavDb>) {
    fp.set_departure("KSEA").unwrap();
    fp.set_arrival("KPDX").unwrap();
    fp.set_dep_rwy("16C").unwrap();
    fp.set_procedure(ProcKind::Sid, "CHINS6").unwrap();
    fp.set_procedure_transition(ProcKind::Sid, "YKM").unwrap();
    fp.add_airway(None, "V23").unwrap();
    let laker = nav.find_fix("LAKER", None, None).unwrap();
    fp.set_airway_exit(None, &laker.awy_uid()).unwrap();
    fp.set_procedure(ProcKind::Star, "HHOOD5").unwrap();
    fp.set_arr_rwy("28L").unwrap();
    fp.set_procedure(ProcKind::Approach, "I28L").unwrap();
}

#[test]
fn full_route_has_every_phase() {
    let nav = nav();
    let fp = Fpln::new(nav.clone());
    build_full_route(&fp, &nav);

    let ids = fix_ids(&fp);
    for fix in ["RW16C", "RADDY", "CHINS", "YKM", "BUFMN", "LAKER"] {
        assert!(ids.contains(&fix.to_string()), "{fix} missing from {ids:?}");
    }
    let (_, segs) = fp.seg_window(0, 100).unwrap();
    assert!(segs.iter().any(|s| s.data.name == "V23"));
    assert!(segs.iter().any(|s| s.data.name == "HHOOD5"));
    assert!(segs.iter().any(|s| s.data.name == MISSED_APPR_SEG_NAME));
    assert_eq!(fp.selected_procedure(ProcKind::Approach), "I28L");
}

#[test]
fn direct_to_repairs_a_deleted_leg() {
    let nav = nav();
    let fp = Fpln::new(nav.clone());
    build_full_route(&fp, &nav);

    let ids = fix_ids(&fp);
    let eln = ids.iter().position(|s| s == "ELN").unwrap();
    fp.delete_leg(fp.leg_ref(eln).unwrap()).unwrap();
    assert!(fix_ids(&fp).contains(&"---".to_string()));

    let ids = fix_ids(&fp);
    let raddy = ids.iter().position(|s| s == "RADDY").unwrap();
    let ykm = ids.iter().position(|s| s == "YKM").unwrap();
    fp.direct_to(fp.leg_ref(raddy).unwrap(), fp.leg_ref(ykm).unwrap())
        .unwrap();

    let ids = fix_ids(&fp);
    assert!(!ids.contains(&"---".to_string()), "gap survived: {ids:?}");
    assert!(!ids.contains(&"CHINS".to_string()));
    assert!(ids.contains(&"YKM".to_string()));
    assert!(ids.contains(&"LAKER".to_string()));
}

#[test]
fn insert_direct_appends_at_the_tail() {
    let nav = nav();
    let fp = Fpln::new(nav.clone());
    fp.set_departure("KSEA").unwrap();
    fp.set_arrival("KPDX").unwrap();
    fp.set_dep_rwy("16C").unwrap();
    fp.set_procedure(ProcKind::Sid, "CHINS6").unwrap();

    let eln = nav.find_fix("ELN", None, None).unwrap();
    let tail = SnapshotRef {
        node: None,
        version: fp.version(),
    };
    fp.insert_direct(eln, tail).unwrap();
    assert_eq!(fix_ids(&fp).last().map(String::as_str), Some("ELN"));

    // A stale tail reference is refused like any other.
    assert!(fp
        .insert_direct(nav.find_fix("YKM", None, None).unwrap(), tail)
        .is_err());
}

#[test]
fn geometry_pass_leaves_no_unresolved_legs() {
    let nav = nav();
    let fp = Fpln::new(nav.clone());
    build_full_route(&fp, &nav);
    fp.update(0.0);

    let (_, rows) = fp.leg_window(0, 200).unwrap();
    for row in rows.iter().filter(|r| !r.data.is_discon) {
        let p = &row.data.path;
        if !p.is_finite {
            continue;
        }
        assert!(p.start.lat_deg().is_finite() && p.end.lat_deg().is_finite());
        assert!(p.true_trk_deg.is_finite());
    }
    let proj = fp.projected_legs(200);
    assert!(!proj.is_empty());
    assert!(fp.projected_legs(3).len() <= 3);

    // Nothing changed, so a second pass is a no-op.
    let v = fp.version();
    fp.update(0.0);
    assert_eq!(fp.version(), v);
}

#[test]
fn export_import_round_trip_preserves_the_route() {
    let nav = nav();
    let src = Fpln::new(nav.clone());
    build_full_route(&src, &nav);

    let path = std::env::temp_dir().join("fms_route_edit_roundtrip.fms");
    src.export_fms(&path).unwrap();

    let dst = Fpln::new(nav.clone());
    dst.load_fms(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(dst.departure(), src.departure());
    assert_eq!(dst.arrival(), src.arrival());
    assert_eq!(dst.dep_rwy(), src.dep_rwy());
    assert_eq!(dst.arr_rwy(), src.arr_rwy());
    for kind in [ProcKind::Sid, ProcKind::Star, ProcKind::Approach] {
        assert_eq!(dst.selected_procedure(kind), src.selected_procedure(kind));
    }
    assert_eq!(fix_ids(&dst), fix_ids(&src));
}

#[test]
fn executed_route_survives_standby_abuse() {
    let nav = nav();
    let mut sys = RouteSystem::new(nav.clone(), GeometryConfig::default(), 1);
    build_full_route(sys.standby(), &nav);
    sys.execute().unwrap();
    let committed = fix_ids(sys.active());

    // Wreck the standby, then erase it back.
    sys.standby().set_departure("KPDX").unwrap();
    assert!(sys.exec_pending());
    sys.erase();
    assert!(!sys.exec_pending());
    assert_eq!(fix_ids(sys.standby()), committed);
    assert_eq!(fix_ids(sys.active()), committed);
}
