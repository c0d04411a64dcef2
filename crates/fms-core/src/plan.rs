//! Segment-aware leg storage: the two coupled lists underlying a flight plan.
//!
//! A plan is a leg list partitioned into segments. The segment list carries
//! one node per named run of legs; each segment records the slot of its last
//! leg and each leg points back at its owning segment. Every mutation keeps
//! four things consistent at once: both chains, the back-pointers, the
//! segment end markers and the per-category reference table.
//!
//! All primitives here are infallible by construction. Pool exhaustion is a
//! silent no-op that leaves the plan untouched; the route layer on top turns
//! unsatisfied edits into errors.

use crate::arena::{List, HEAD, TAIL};
use crate::models::{
    cat_rank, CategoryRef, Leg, LegNode, SegCategory, Segment, SnapshotRef,
    DCT_LEG_NAME, DISCON_SEG_NAME, LEG_POOL_CAP, SEG_POOL_CAP,
};
use tracing::debug;

/// One row of a leg-window snapshot: the slot it was copied from plus the
/// copied payload.
#[derive(Debug, Clone)]
pub struct LegRow {
    pub slot: usize,
    pub data: LegNode,
}

#[derive(Debug, Clone)]
pub struct SegRow {
    pub slot: usize,
    pub data: Segment,
}

/// The reference table has one row per category plus row 0 for the head
/// sentinel, so rank lookups by [`cat_rank`] index it directly.
const N_REFS: usize = SegCategory::COUNT + 1;

#[derive(Debug)]
pub struct PlanState {
    pub legs: List<LegNode>,
    pub segs: List<Segment>,
    refs: [CategoryRef; N_REFS],
}

impl PlanState {
    pub fn new() -> Self {
        let leg_head = LegNode {
            seg: HEAD,
            ..LegNode::default()
        };
        let leg_tail = LegNode {
            seg: TAIL,
            ..LegNode::default()
        };
        let seg_head = Segment {
            end: Some(HEAD),
            ..Segment::default()
        };
        let seg_tail = Segment {
            end: Some(TAIL),
            ..Segment::default()
        };

        let mut refs: [CategoryRef; N_REFS] = Default::default();
        refs[0].segment = Some(HEAD);

        Self {
            legs: List::new(LEG_POOL_CAP, leg_head, leg_tail),
            segs: List::new(SEG_POOL_CAP, seg_head, seg_tail),
            refs,
        }
    }

    /// Current version of the plan. Stamped on every mutation.
    pub fn version(&self) -> u64 {
        self.legs.version()
    }

    pub fn bump(&mut self) {
        self.legs.bump();
        self.segs.bump();
    }

    pub fn category_ref(&self, cat: SegCategory) -> &CategoryRef {
        &self.refs[cat_rank(Some(cat)) as usize]
    }

    pub fn set_ref_name(&mut self, cat: SegCategory, name: &str) {
        self.refs[cat_rank(Some(cat)) as usize].name = name.to_string();
    }

    pub fn clear_ref(&mut self, cat: SegCategory) {
        self.refs[cat_rank(Some(cat)) as usize] = CategoryRef::default();
    }

    fn ref_slot(&self, cat: Option<SegCategory>) -> Option<usize> {
        self.refs[cat_rank(cat) as usize].segment
    }

    fn set_ref_slot(&mut self, cat: Option<SegCategory>, slot: Option<usize>) {
        self.refs[cat_rank(cat) as usize].segment = slot;
    }

    /// A segment slot is about to be freed; no ref row may keep addressing
    /// it, whatever category the row belongs to.
    fn clear_refs_to(&mut self, seg: usize) {
        for row in self.refs.iter_mut().skip(1) {
            if row.segment == Some(seg) {
                row.segment = None;
            }
        }
    }

    // ---- snapshots and references ----

    /// Copy of `len` leg rows starting at list position `start`, together
    /// with the version they were captured at. `None` when `start` is past
    /// the end.
    pub fn leg_window(&self, start: usize, len: usize) -> Option<(u64, Vec<LegRow>)> {
        if start >= self.legs.len() {
            return None;
        }
        let mut out = Vec::new();
        let mut slot = self.legs.nth(start)?;
        for _ in 0..len {
            if slot == TAIL {
                break;
            }
            out.push(LegRow {
                slot,
                data: self.legs.get(slot).clone(),
            });
            slot = self.legs.next(slot);
        }
        Some((self.legs.version(), out))
    }

    pub fn seg_window(&self, start: usize, len: usize) -> Option<(u64, Vec<SegRow>)> {
        if start >= self.segs.len() {
            return None;
        }
        let mut out = Vec::new();
        let mut slot = self.segs.nth(start)?;
        for _ in 0..len {
            if slot == TAIL {
                break;
            }
            out.push(SegRow {
                slot,
                data: self.segs.get(slot).clone(),
            });
            slot = self.segs.next(slot);
        }
        Some((self.segs.version(), out))
    }

    /// Resolve a caller-held leg reference against the current plan.
    /// `None` node addresses the tail. Returns the live slot, or `None` when
    /// the reference is stale or dangling.
    pub fn resolve_leg_ref(&self, r: SnapshotRef) -> Option<usize> {
        if r.version != self.legs.version() {
            return None;
        }
        match r.node {
            None => Some(TAIL),
            Some(slot) => self.legs.is_live(slot).then_some(slot),
        }
    }

    pub fn resolve_seg_ref(&self, r: SnapshotRef) -> Option<usize> {
        if r.version != self.segs.version() {
            return None;
        }
        match r.node {
            None => Some(TAIL),
            Some(slot) => self.segs.is_live(slot).then_some(slot),
        }
    }

    /// Structural copy: both chains are replicated slot for slot, so stored
    /// slot indices stay meaningful on the copy. Versions are stamped fresh.
    pub fn copy_from(&mut self, other: &PlanState) {
        self.legs.clone_slots_from(&other.legs);
        self.segs.clone_slots_from(&other.segs);
        self.refs = other.refs.clone();
    }

    // ---- mutation primitives ----

    fn same_fix(a: &Option<Leg>, b: &Leg) -> bool {
        a.as_ref().map(|l| l.same_fix(b)).unwrap_or(false)
    }

    /// Last committed leg at or before `seg` in route order. Placeholder
    /// segments (no end yet) are skipped backwards.
    pub(crate) fn end_before(&self, seg: usize) -> usize {
        let mut cur = seg;
        loop {
            if let Some(end) = self.segs.get(cur).end {
                return end;
            }
            cur = self.segs.prev(cur);
        }
    }

    fn insert_leg_before(&mut self, next: usize, data: LegNode) {
        debug_assert!(next != TAIL || !data.is_discon);
        // Exhaustion is silent; the plan stays as it was.
        let _ = self.legs.insert_before(data, next);
    }

    /// Remove all legs strictly between `start` and `end`, dropping every
    /// segment that loses all of its legs and trimming the end marker of a
    /// segment that loses only its tail. The reference table follows any
    /// dropped segment that was referenced.
    pub fn delete_between(&mut self, start: usize, end: usize) {
        let mut curr = self.legs.next(start);

        while curr != end {
            let next = self.legs.next(curr);
            let curr_seg = self.legs.get(curr).seg;
            let next_seg = self.legs.get(next).seg;
            let start_seg = self.legs.get(start).seg;

            if curr_seg != next_seg && curr_seg != start_seg {
                // Segment entirely inside the range; drop it.
                let cat = self.segs.get(curr_seg).category;
                if self.ref_slot(cat) == Some(curr_seg) {
                    let prev_seg = self.segs.prev(curr_seg);
                    if self.segs.get(prev_seg).category != cat {
                        self.refs[cat_rank(cat) as usize] = CategoryRef::default();
                    } else {
                        self.set_ref_slot(cat, Some(prev_seg));
                    }
                }
                self.clear_refs_to(curr_seg);
                self.segs.unlink(curr_seg);
            } else if curr_seg != next_seg {
                // Segment loses its tail; it now ends at `start`.
                self.segs.get_mut(curr_seg).end = Some(start);
            }

            self.legs.unlink(curr);
            curr = next;
        }

        // Drop segments still chained strictly between start's and end's.
        let mut seg = self.legs.get(start).seg;
        let end_seg = self.legs.get(end).seg;
        let mut next = self.segs.next(seg);
        while seg != end_seg {
            seg = next;
            if seg != end_seg {
                next = self.segs.next(seg);
                self.clear_refs_to(seg);
                self.segs.unlink(seg);
            }
        }
    }

    /// Delete the legs between `start` and `end` and re-split whatever
    /// segment the cut landed in.
    pub fn delete_range(&mut self, start: usize, end: usize) {
        self.delete_between(start, end);
        if end != TAIL {
            self.subdivide(start, end);
        }
        self.bump();
    }

    /// Remove a whole segment. With `leave_seg` the segment survives as a
    /// direct holding only its last leg whenever a named segment follows;
    /// `add_disc` marks the cut with a discontinuity; `ignore_tail` forces
    /// the leave behavior even at the end of the route.
    pub fn delete_segment(
        &mut self,
        seg: usize,
        leave_seg: bool,
        mut add_disc: bool,
        ignore_tail: bool,
    ) {
        if self.segs.get(seg).end.is_none() {
            self.clear_refs_to(seg);
            self.segs.unlink(seg);
            self.bump();
            return;
        }

        debug!(seg, leave_seg, add_disc, "deleting segment");
        let start = self.end_before(self.segs.prev(seg));
        let next_seg = self.segs.next(seg);
        let seg_end = self.segs.get(seg).end.unwrap();

        let end;
        let keep = next_seg != TAIL
            && !self.segs.get(next_seg).is_direct
            && !self.segs.get(next_seg).is_discon
            && leave_seg;
        if keep || ignore_tail {
            end = seg_end;
            let s = self.segs.get_mut(seg);
            s.is_direct = true;
            s.name = DCT_LEG_NAME.to_string();
        } else {
            end = self.legs.next(seg_end);
            add_disc = false;
        }
        self.delete_between(start, end);

        if add_disc {
            self.add_discon(seg);
        }

        self.bump();
    }

    /// Drop every segment of `cat` reachable backwards from its reference.
    pub fn delete_ref(&mut self, cat: SegCategory) {
        let Some(mut seg) = self.ref_slot(Some(cat)) else {
            return;
        };
        while seg != HEAD && self.segs.get(seg).category == Some(cat) {
            let prev = self.segs.prev(seg);
            self.delete_segment(seg, true, false, false);
            seg = prev;
        }
    }

    /// Insert a new segment holding `legs` immediately before segment
    /// `next`. Returns the new segment's slot, `None` on exhaustion or an
    /// empty leg set.
    pub fn add_segment(
        &mut self,
        legs: &[Leg],
        cat: SegCategory,
        name: &str,
        next: usize,
        is_direct: bool,
    ) -> Option<usize> {
        if legs.is_empty() {
            return None;
        }
        let prev = self.segs.prev(next);
        let anchor = self.end_before(prev);
        let next_leg = self.legs.next(anchor);

        let seg_add = self.segs.insert_before(
            Segment {
                name: name.to_string(),
                category: Some(cat),
                is_direct,
                is_discon: false,
                end: None,
            },
            next,
        )?;

        for leg in legs {
            self.insert_leg_before(
                next_leg,
                LegNode {
                    leg: Some(leg.clone()),
                    is_discon: false,
                    path: Default::default(),
                    seg: seg_add,
                },
            );
        }
        let end = self.legs.prev(next_leg);
        if end == anchor {
            // Leg pool ran dry before anything landed; back the segment out.
            self.segs.unlink(seg_add);
            return None;
        }
        self.segs.get_mut(seg_add).end = Some(end);

        let prev_cat = self.segs.get(prev).category;
        let next_cat = self.segs.get(next).category;
        if prev_cat != next_cat && Some(cat) != next_cat {
            self.set_ref_slot(Some(cat), Some(seg_add));
        }

        self.bump();
        Some(seg_add)
    }

    /// Insert a discontinuity segment (one blank leg) before `next`, unless
    /// one already borders the insertion point.
    pub fn add_discon(&mut self, next: usize) {
        let prev = self.segs.prev(next);
        if self.segs.get(prev).is_discon || self.segs.get(next).is_discon {
            return;
        }
        let anchor = self.end_before(prev);
        let next_leg = self.legs.next(anchor);
        let prev_cat = self.segs.get(prev).category;

        let Some(seg_add) = self.segs.insert_before(
            Segment {
                name: DISCON_SEG_NAME.to_string(),
                category: prev_cat,
                is_direct: false,
                is_discon: true,
                end: None,
            },
            next,
        ) else {
            return;
        };
        self.insert_leg_before(
            next_leg,
            LegNode {
                leg: None,
                is_discon: true,
                path: Default::default(),
                seg: seg_add,
            },
        );
        let end = self.legs.prev(next_leg);
        if end == anchor {
            self.segs.unlink(seg_add);
            return;
        }
        self.segs.get_mut(seg_add).end = Some(end);

        if self.ref_slot(prev_cat) == Some(prev) {
            self.set_ref_slot(prev_cat, Some(seg_add));
        }

        self.bump();
    }

    /// Splice a procedure into the route: `start` stitches the new run to
    /// what precedes it (as a one-leg direct where needed), `legs` forms the
    /// named segment proper. With `next` given the insertion point is forced;
    /// otherwise it is derived from the reference table, replacing any
    /// previous selection of the same category.
    pub fn add_legs(
        &mut self,
        start: Leg,
        legs: &[Leg],
        cat: SegCategory,
        name: &str,
        next: Option<usize>,
    ) {
        let (ins_seg, next_seg) = match next {
            None => self.get_insert_seg(cat),
            Some(n) => {
                let next_seg = match self.ref_slot(Some(cat)) {
                    None => n,
                    Some(t) => self.segs.next(t),
                };
                (n, next_seg)
            }
        };

        let stitch = [start.clone()];
        let mut legs_add: Vec<Leg> = Vec::new();

        let before = self.segs.prev(ins_seg);
        if before != HEAD && self.segs.get(before).category != Some(SegCategory::DepRwy) {
            let mut merge_tgt = before;
            if self.segs.get(merge_tgt).is_discon {
                merge_tgt = self.segs.prev(merge_tgt);
            }

            self.add_segment(&stitch, cat, DCT_LEG_NAME, ins_seg, true);

            if merge_tgt != HEAD {
                self.merge_seg(merge_tgt);
            }
            legs_add.extend_from_slice(legs);
        } else if cat != SegCategory::DepRwy && cat != SegCategory::Sid {
            self.add_segment(&stitch, cat, DCT_LEG_NAME, ins_seg, true);
            legs_add.extend_from_slice(legs);
        } else {
            legs_add.push(start);
            legs_add.extend_from_slice(legs);
        }

        self.add_segment(&legs_add, cat, name, ins_seg, false);
        let tgt = self.segs.prev(next_seg);
        self.set_ref_slot(Some(cat), Some(tgt));
        self.merge_seg(self.segs.prev(ins_seg));
    }

    /// Insert a one-leg direct before `next_leg`, splitting the segment the
    /// insertion lands in. No-op before any departure runway exists, or when
    /// the new leg duplicates either neighbor.
    pub fn add_direct_leg(&mut self, leg: Leg, next_leg: usize) {
        if self.ref_slot(Some(SegCategory::DepRwy)).is_none() {
            return;
        }
        let prev_leg = self.legs.prev(next_leg);

        let prev_cat = self.segs.get(self.legs.get(prev_leg).seg).category;
        let next_cat = self.segs.get(self.legs.get(next_leg).seg).category;

        let mut dir_cat = SegCategory::Enroute;
        for cat in [next_cat, prev_cat].into_iter().flatten() {
            if cat > dir_cat {
                dir_cat = cat;
            }
        }

        let mut tgt_seg = Some(self.legs.get(next_leg).seg);
        if next_leg != TAIL {
            tgt_seg = self.subdivide(prev_leg, next_leg);
            self.bump();
        }

        let prev_dup = Self::same_fix(&self.legs.get(prev_leg).leg, &leg);
        let next_dup = Self::same_fix(&self.legs.get(next_leg).leg, &leg);

        if let Some(tgt) = tgt_seg {
            if !prev_dup && !next_dup {
                self.add_segment(&[leg], dir_cat, DCT_LEG_NAME, tgt, true);
                if next_leg != TAIL {
                    self.add_discon(tgt);
                }
            }
        }
    }

    /// Delete one leg, leaving a discontinuity at the cut when the route
    /// continues past it. Refuses discontinuity legs.
    pub fn delete_singl_leg(&mut self, leg: usize) -> bool {
        if self.legs.get(leg).is_discon {
            return false;
        }
        let prev_leg = self.legs.prev(leg);
        let next_leg = self.legs.next(leg);

        self.delete_range(prev_leg, next_leg);

        if next_leg != TAIL {
            self.add_discon(self.legs.get(next_leg).seg);
        }
        true
    }

    /// Clear the plan. With `leave_dep_rwy` everything up to and including
    /// the departure-runway segment survives.
    pub fn reset(&mut self, leave_dep_rwy: bool) {
        debug!(leave_dep_rwy, "plan reset");
        let mut seg_start = HEAD;
        if leave_dep_rwy {
            if let Some(s) = self.ref_slot(Some(SegCategory::DepRwy)) {
                seg_start = s;
            }
        }

        let leg_start = self.end_before(seg_start);
        self.delete_between(leg_start, TAIL);

        // Placeholder segments hold no legs, so the sweep above misses them.
        let mut seg = seg_start;
        while seg != TAIL {
            let next = self.segs.next(seg);
            if self.segs.get(seg).end.is_none() {
                self.clear_refs_to(seg);
                self.segs.unlink(seg);
            }
            seg = next;
        }
        self.bump();
    }

    /// Where legs of `cat` should go: the segment to insert before, plus the
    /// segment bounding the run from the far side. Any existing selection of
    /// a procedural category is deleted first; enroute recurs instead.
    fn get_insert_seg(&mut self, cat: SegCategory) -> (usize, usize) {
        match self.ref_slot(Some(cat)) {
            Some(curr0) if cat != SegCategory::Enroute => {
                let mut curr = curr0;
                let mut prev = self.segs.prev(curr);
                let mut ins_seg = self.segs.next(curr);
                let next_seg = ins_seg;

                while curr != HEAD
                    && (self.segs.get(curr).category == Some(cat)
                        || self.segs.get(curr).is_discon)
                {
                    self.delete_segment(curr, true, false, false);
                    curr = prev;
                    prev = self.segs.prev(curr);
                }
                // A direct left behind at the old selection's end still
                // carries this category; insert before it, not after.
                while self.segs.get(self.segs.prev(ins_seg)).category == Some(cat) {
                    ins_seg = self.segs.prev(ins_seg);
                }
                self.set_ref_slot(Some(cat), None);
                (ins_seg, next_seg)
            }
            Some(curr) => {
                let ins_seg = self.segs.next(curr);
                (ins_seg, ins_seg)
            }
            None => {
                // Fall back to the nearest earlier category; row 0 (the head
                // sentinel) always resolves.
                let mut ridx = cat_rank(Some(cat)) as usize;
                let mut ins_seg = self.segs.next(HEAD);
                while ridx > 0 {
                    ridx -= 1;
                    if let Some(s) = self.refs[ridx].segment {
                        ins_seg = self.segs.next(s);
                        break;
                    }
                }
                (ins_seg, ins_seg)
            }
        }
    }

    /// Collapse the seam after `tgt`: looking past at most one discontinuity
    /// to at most one direct, drop the direct (and the discontinuity) when it
    /// duplicates `tgt`'s last fix, otherwise mark the seam with a
    /// discontinuity. Open-ended legs never get a discontinuity after them.
    pub fn merge_seg(&mut self, tgt: usize) {
        let mut curr = self.segs.next(tgt);
        let mut next_disc = None;
        let mut next_dir = None;

        let mut i = 1i32;
        while i + 1 != 0 && curr != TAIL {
            if i == 1 && self.segs.get(curr).is_discon {
                next_disc = Some(curr);
            } else {
                if self.segs.get(curr).is_direct {
                    next_dir = Some(curr);
                }
                break;
            }
            curr = self.segs.next(curr);
            i -= 1;
        }

        let Some(dir) = next_dir else {
            return;
        };
        let (Some(tgt_leg), Some(dct_leg)) =
            (self.segs.get(tgt).end, self.segs.get(dir).end)
        else {
            return;
        };

        let tgt_data = self.legs.get(tgt_leg).leg.clone();
        let open_ended = tgt_data
            .as_ref()
            .map(|l| l.leg_type.is_vector())
            .unwrap_or(false);
        let dup = match (&tgt_data, &self.legs.get(dct_leg).leg) {
            (Some(a), Some(b)) => a.same_fix(b),
            _ => false,
        };

        if dup {
            self.delete_segment(dir, false, false, false);
            if let Some(disc) = next_disc {
                self.delete_segment(disc, false, false, false);
            }
        } else if next_disc.is_none() && !open_ended {
            self.add_discon(curr);
        }
    }

    /// Split the segment containing the `prev_leg`/`next_leg` boundary so an
    /// insertion can land between two segments. Returns the segment the
    /// insertion should go before, `None` on pool exhaustion.
    pub fn subdivide(&mut self, prev_leg: usize, next_leg: usize) -> Option<usize> {
        let prev_seg = self.legs.get(prev_leg).seg;
        let orig_next_seg = self.legs.get(next_leg).seg;

        // Distance from each side of the cut to the enclosing segment's
        // boundary, capped at 2. Zero means the cut already sits on one.
        let mut dist_l = 0;
        let mut prev_check = prev_leg;
        while self.legs.get(prev_check).seg == orig_next_seg && dist_l < 2 {
            prev_check = self.legs.prev(prev_check);
            dist_l += 1;
        }
        let mut dist_r = 0;
        let mut next_check = next_leg;
        while self.legs.get(next_check).seg == prev_seg && dist_r < 2 {
            next_check = self.legs.next(next_check);
            dist_r += 1;
        }

        let mut next_seg = orig_next_seg;
        if dist_l != 0 {
            let mut data = self.segs.get(prev_seg).clone();
            data.end = Some(prev_leg);
            if dist_l == 1 {
                data.is_direct = true;
                data.name = DCT_LEG_NAME.to_string();
            }
            if let Some(seg_add) = self.segs.insert_before(data, prev_seg) {
                // The first half takes every leg up to the cut.
                let mut cur = prev_leg;
                loop {
                    self.legs.get_mut(cur).seg = seg_add;
                    let p = self.legs.prev(cur);
                    if p == HEAD || self.legs.get(p).seg != prev_seg {
                        break;
                    }
                    cur = p;
                }
                if dist_r == 1 {
                    let s = self.segs.get_mut(prev_seg);
                    s.is_direct = true;
                    s.name = DCT_LEG_NAME.to_string();
                }
                next_seg = prev_seg;
            }
        }

        // The second half opens on a direct so later merges see a seam.
        if next_seg != TAIL
            && !self.segs.get(next_seg).is_direct
            && !self.segs.get(next_seg).is_discon
        {
            let cat = self.segs.get(next_seg).category;
            let seg_add = self.segs.insert_before(
                Segment {
                    name: DCT_LEG_NAME.to_string(),
                    category: cat,
                    is_direct: true,
                    is_discon: false,
                    end: Some(next_leg),
                },
                next_seg,
            )?;
            self.legs.get_mut(next_leg).seg = seg_add;

            if self.segs.get(next_seg).end == Some(next_leg) {
                if self.ref_slot(cat) == Some(next_seg) {
                    self.set_ref_slot(cat, Some(seg_add));
                }
                self.clear_refs_to(next_seg);
                self.segs.unlink(next_seg);
            }
            return Some(seg_add);
        }

        Some(next_seg)
    }
}

impl Default for PlanState {
    fn default() -> Self {
        Self::new()
    }
}
