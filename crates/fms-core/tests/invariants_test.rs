//! Random-operation soak test: whatever sequence of edits the route takes,
//! the structural invariants of the leg and segment lists must hold.

use fms_core::{
    Fpln, NavDataProvider, NavDb, ProcKind, LEG_POOL_CAP, SEG_POOL_CAP,
};
use rand::Rng;
use std::sync::Arc;

const FIX_IDS: &[&str] = &["RADDY", "CHINS", "ELN", "YKM", "BUFMN", "LAKER"];

/// Structural checks every edit must preserve, using only the public
/// windows: leg/segment counts within pool bounds, back-pointers
/// consistent, discontinuities flanked by real legs after an update.
fn check_structure(fp: &Fpln, after_update: bool) {
    let legs = fp
        .leg_window(0, LEG_POOL_CAP)
        .map(|(_, rows)| rows)
        .unwrap_or_default();
    let segs = fp
        .seg_window(0, SEG_POOL_CAP)
        .map(|(_, rows)| rows)
        .unwrap_or_default();
    assert_eq!(legs.len(), fp.leg_count());
    assert_eq!(segs.len(), fp.seg_count());
    assert!(legs.len() <= LEG_POOL_CAP);
    assert!(segs.len() <= SEG_POOL_CAP);

    // Every leg belongs to a live segment, and every non-placeholder
    // segment ends on a live leg that points back at it.
    for leg in &legs {
        assert!(
            segs.iter().any(|s| s.slot == leg.data.seg),
            "leg {} owned by dead segment {}",
            leg.slot,
            leg.data.seg
        );
    }
    for seg in &segs {
        if let Some(end) = seg.data.end {
            let owner = legs
                .iter()
                .find(|l| l.slot == end)
                .unwrap_or_else(|| panic!("segment {} ends on dead leg {end}", seg.slot));
            assert_eq!(owner.data.seg, seg.slot);
        }
    }

    if after_update {
        for (i, leg) in legs.iter().enumerate() {
            if !leg.data.is_discon {
                continue;
            }
            assert!(i > 0 && i + 1 < legs.len(), "gap at route boundary");
            assert!(!legs[i - 1].data.is_discon, "adjacent gaps at {i}");
            assert!(!legs[i + 1].data.is_discon, "adjacent gaps at {i}");
        }
    }
}

#[test]
fn random_edits_never_break_the_plan() {
    let nav: Arc<NavDb> = Arc::new(NavDb::demo());
    let mut rng = rand::rng();

    for _ in 0..20 {
        let fp = Fpln::new(nav.clone());
        fp.set_departure("KSEA").unwrap();
        fp.set_arrival("KPDX").unwrap();
        fp.set_dep_rwy("16C").unwrap();
        let mut last_version = fp.version();

        for _ in 0..60 {
            match rng.random_range(0..9) {
                0 => {
                    let _ = fp.set_procedure(ProcKind::Sid, "CHINS6");
                }
                1 => {
                    let _ = fp.set_procedure_transition(ProcKind::Sid, "YKM");
                }
                2 => {
                    let _ = fp.set_procedure(ProcKind::Star, "HHOOD5");
                }
                3 => {
                    let _ = fp.set_arr_rwy("28L");
                }
                4 => {
                    // Delete a random leg.
                    let n = fp.leg_count();
                    if n > 0 {
                        if let Some(r) = fp.leg_ref(rng.random_range(0..n)) {
                            let _ = fp.delete_leg(r);
                        }
                    }
                }
                5 => {
                    // Direct between two random legs.
                    let n = fp.leg_count();
                    if n > 1 {
                        let a = fp.leg_ref(rng.random_range(0..n));
                        let b = fp.leg_ref(rng.random_range(0..n));
                        if let (Some(a), Some(b)) = (a, b) {
                            let _ = fp.direct_to(a, b);
                        }
                    }
                }
                6 => {
                    // Insert a named fix before a random leg.
                    let id = FIX_IDS[rng.random_range(0..FIX_IDS.len())];
                    let fix = nav.find_fix(id, None, None).unwrap();
                    let n = fp.leg_count();
                    if n > 0 {
                        if let Some(r) = fp.leg_ref(rng.random_range(0..n)) {
                            let _ = fp.insert_direct(fix, r);
                        }
                    }
                }
                7 => {
                    let n = fp.leg_count();
                    if n > 0 {
                        if let Some(r) = fp.leg_ref(rng.random_range(0..n)) {
                            let _ = fp.set_active_leg(r);
                        }
                    }
                    let _ = fp.sequence();
                }
                _ => {
                    fp.update(0.0);
                }
            }

            let v = fp.version();
            assert!(v >= last_version, "version went backwards");
            last_version = v;
            check_structure(&fp, false);
        }

        fp.update(0.0);
        check_structure(&fp, true);

        // A second pass over an unchanged route does nothing.
        let v = fp.version();
        fp.update(0.0);
        assert_eq!(fp.version(), v);
        check_structure(&fp, true);
    }
}

#[test]
fn pool_exhaustion_is_a_clean_error() {
    let nav: Arc<NavDb> = Arc::new(NavDb::demo());
    let fp = Fpln::new(nav.clone());
    fp.set_departure("KSEA").unwrap();
    fp.set_arrival("KPDX").unwrap();
    fp.set_dep_rwy("16C").unwrap();

    let fix = nav.find_fix("ELN", None, None).unwrap();
    let mut inserted = 1usize;
    loop {
        let tail = fms_core::SnapshotRef {
            node: None,
            version: fp.version(),
        };
        // Alternate fixes so the duplicate-neighbor check never fires.
        let mut f = fix.clone();
        f.id = format!("P{inserted:03}");
        match fp.insert_direct(f, tail) {
            Ok(()) => inserted += 1,
            Err(e) => {
                assert_eq!(e, fms_core::FplnError::Exhausted);
                break;
            }
        }
        assert!(inserted <= LEG_POOL_CAP, "pool never filled");
    }

    // The full plan is still coherent and still editable.
    check_structure(&fp, false);
    let n = fp.leg_count();
    fp.delete_leg(fp.leg_ref(n - 1).unwrap()).unwrap();
    assert_eq!(fp.leg_count(), n - 1);
}
