//! Core data model: ARINC-424 style legs, segments and snapshot types.

use crate::spatial::GeoPoint;
use serde::{Deserialize, Serialize};

/// Capacity of the leg pool. Route growth past this is silently refused.
pub const LEG_POOL_CAP: usize = 200;
/// Capacity of the segment pool.
pub const SEG_POOL_CAP: usize = 100;

pub const DISCON_SEG_NAME: &str = "DISCONTINUITY";
pub const DCT_LEG_NAME: &str = "DCT";
pub const MISSED_APPR_SEG_NAME: &str = "MISSED APPRCH";
pub const INTC_LEG_NAME: &str = "(INTC)";
pub const NONE_TRANS: &str = "NONE";

/// ARINC-424 path terminator: how a leg's geometry is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathTerm {
    /// Initial fix
    IF,
    /// Track to fix
    TF,
    /// Course to fix
    CF,
    /// Direct to fix
    DF,
    /// Fix to altitude
    FA,
    /// Track from fix for distance
    FC,
    /// Track from fix to DME distance
    FD,
    /// From fix to manual termination
    FM,
    /// Course to altitude
    CA,
    /// Course to DME distance
    CD,
    /// Course to intercept
    CI,
    /// Course to radial
    CR,
    /// Arc to fix
    AF,
    /// Constant radius arc
    RF,
    /// Heading to altitude
    VA,
    /// Heading to DME distance
    VD,
    /// Heading to intercept
    VI,
    /// Heading to manual termination
    VM,
    /// Heading to radial
    VR,
    /// Procedure turn
    PI,
    /// Hold to altitude
    HA,
    /// Hold to fix
    HF,
    /// Hold to manual termination
    HM,
}

impl PathTerm {
    pub fn label(&self) -> &'static str {
        match self {
            PathTerm::IF => "IF",
            PathTerm::TF => "TF",
            PathTerm::CF => "CF",
            PathTerm::DF => "DF",
            PathTerm::FA => "FA",
            PathTerm::FC => "FC",
            PathTerm::FD => "FD",
            PathTerm::FM => "FM",
            PathTerm::CA => "CA",
            PathTerm::CD => "CD",
            PathTerm::CI => "CI",
            PathTerm::CR => "CR",
            PathTerm::AF => "AF",
            PathTerm::RF => "RF",
            PathTerm::VA => "VA",
            PathTerm::VD => "VD",
            PathTerm::VI => "VI",
            PathTerm::VM => "VM",
            PathTerm::VR => "VR",
            PathTerm::PI => "PI",
            PathTerm::HA => "HA",
            PathTerm::HF => "HF",
            PathTerm::HM => "HM",
        }
    }

    /// Legs after which a bare fix must join as CF rather than DF.
    pub fn not_followed_by_df(&self) -> bool {
        matches!(
            self,
            PathTerm::AF | PathTerm::CI | PathTerm::PI | PathTerm::RF | PathTerm::VI
        )
    }

    /// Leg types that may terminate an intercept (CI/VI) leg.
    pub fn ends_intercept(&self) -> bool {
        matches!(
            self,
            PathTerm::AF
                | PathTerm::CF
                | PathTerm::FA
                | PathTerm::FC
                | PathTerm::FD
                | PathTerm::FM
                | PathTerm::IF
        )
    }

    /// Leg types whose start may be offset onto them by a turn.
    pub fn is_turn_offsettable(&self) -> bool {
        matches!(
            self,
            PathTerm::DF
                | PathTerm::CI
                | PathTerm::CA
                | PathTerm::CD
                | PathTerm::CR
                | PathTerm::VA
                | PathTerm::VI
                | PathTerm::VR
                | PathTerm::VD
        )
    }

    /// Leg types with supported geometry (others pass through unresolved).
    pub fn has_geometry(&self) -> bool {
        matches!(
            self,
            PathTerm::IF
                | PathTerm::DF
                | PathTerm::TF
                | PathTerm::CF
                | PathTerm::VA
                | PathTerm::CA
                | PathTerm::FA
                | PathTerm::FC
                | PathTerm::VI
                | PathTerm::CI
                | PathTerm::FD
                | PathTerm::CD
                | PathTerm::VD
        )
    }

    /// Heading legs with a manual termination; the route may legally end open.
    pub fn is_vector(&self) -> bool {
        matches!(self, PathTerm::FM | PathTerm::VM)
    }

    /// Heading (as opposed to course/track) legs.
    pub fn is_heading(&self) -> bool {
        matches!(
            self,
            PathTerm::VA | PathTerm::VD | PathTerm::VI | PathTerm::VM | PathTerm::VR
        )
    }
}

/// Navaid class of a fix, with the route-file integer codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixKind {
    Airport,
    Ndb,
    Vhf,
    #[default]
    Waypoint,
    Runway,
}

impl FixKind {
    /// Integer type code used by the persisted route format.
    pub fn type_code(&self) -> u8 {
        match self {
            FixKind::Airport => 1,
            FixKind::Ndb => 2,
            FixKind::Vhf => 3,
            FixKind::Waypoint | FixKind::Runway => 11,
        }
    }

    pub fn from_type_code(code: u8) -> Option<FixKind> {
        match code {
            1 => Some(FixKind::Airport),
            2 => Some(FixKind::Ndb),
            3 => Some(FixKind::Vhf),
            11 => Some(FixKind::Waypoint),
            _ => None,
        }
    }
}

/// A named point the plan can reference: waypoint, navaid, runway or airport.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Fix {
    pub id: String,
    pub pos: GeoPoint,
    #[serde(default)]
    pub kind: FixKind,
}

impl Fix {
    /// Identifier used to look the fix up in the airway database.
    pub fn awy_uid(&self) -> String {
        format!(
            "{}_{:.0}_{:.0}",
            self.id,
            self.pos.lat_deg().round(),
            self.pos.lon_deg().round()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnDir {
    Left,
    Right,
    #[default]
    Either,
}

/// Altitude constraint mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AltMode {
    #[default]
    None,
    At,
    AtOrAbove,
    AtOrBelow,
    /// Between `alt2_ft` (lower) and `alt1_ft` (upper).
    Within,
}

/// Speed constraint mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpdMode {
    #[default]
    None,
    At,
    AtOrBelow,
}

/// One ARINC-424 leg record as fetched from a procedure or airway database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub leg_type: PathTerm,
    #[serde(default)]
    pub main_fix: Option<Fix>,
    /// Recommended navaid for DME/radial terminated legs.
    #[serde(default)]
    pub ref_navaid: Option<Fix>,
    #[serde(default)]
    pub ref_radial_deg: f64,
    /// Outbound course, degrees; magnetic unless `outbd_crs_true`.
    #[serde(default)]
    pub outbd_crs_deg: f64,
    #[serde(default)]
    pub outbd_crs_true: bool,
    /// Outbound distance (nm) or time (min) per `outbd_dist_as_time`.
    #[serde(default)]
    pub outbd_dist_time: f64,
    #[serde(default)]
    pub outbd_dist_as_time: bool,
    #[serde(default)]
    pub turn_dir: TurnDir,
    #[serde(default)]
    pub alt_desc: AltMode,
    #[serde(default)]
    pub alt1_ft: f64,
    #[serde(default)]
    pub alt2_ft: f64,
    #[serde(default)]
    pub spd_desc: SpdMode,
    #[serde(default)]
    pub spd_kts: f64,
    /// Required navigation performance, nm. 0 inherits the phase default.
    #[serde(default)]
    pub rnp_nm: f64,
    /// Magnetic variation at the leg, degrees (east positive).
    #[serde(default)]
    pub mag_var_deg: f64,
}

impl Default for Leg {
    fn default() -> Self {
        Self {
            leg_type: PathTerm::TF,
            main_fix: None,
            ref_navaid: None,
            ref_radial_deg: 0.0,
            outbd_crs_deg: 0.0,
            outbd_crs_true: false,
            outbd_dist_time: 0.0,
            outbd_dist_as_time: false,
            turn_dir: TurnDir::Either,
            alt_desc: AltMode::None,
            alt1_ft: 0.0,
            alt2_ft: 0.0,
            spd_desc: SpdMode::None,
            spd_kts: 0.0,
            rnp_nm: 0.0,
            mag_var_deg: 0.0,
        }
    }
}

impl Leg {
    /// Plain track-to-fix leg, the shape of every enroute/direct edit.
    pub fn tf_to(fix: Fix) -> Leg {
        Leg {
            leg_type: PathTerm::TF,
            main_fix: Some(fix),
            ..Leg::default()
        }
    }

    /// True when both legs terminate at the same main fix.
    pub fn same_fix(&self, other: &Leg) -> bool {
        match (&self.main_fix, &other.main_fix) {
            (Some(a), Some(b)) => a.id == b.id && a.pos == b.pos,
            _ => false,
        }
    }

    /// Outbound course as a true bearing in radians.
    pub fn outbd_crs_true_rad(&self) -> f64 {
        let mut crs = self.outbd_crs_deg;
        if !self.outbd_crs_true {
            crs += self.mag_var_deg;
        }
        crs.to_radians()
    }
}

/// Derived, flyable geometry of a leg. Recomputed by the geometry pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LegPath {
    pub start: GeoPoint,
    pub end: GeoPoint,
    pub true_trk_deg: f64,
    /// Turn radius in nm; -1 marks geometry not yet resolved.
    pub turn_rad_nm: f64,
    pub is_arc: bool,
    pub is_finite: bool,
    /// Entirely consumed by the surrounding turn anticipation.
    pub is_bypassed: bool,
    /// Turn offset onto this leg is inhibited (turns of 90 degrees or more).
    pub is_to_inhibited: bool,
    pub has_disc: bool,
    pub is_rwy: bool,
}

impl Default for LegPath {
    fn default() -> Self {
        Self {
            start: GeoPoint::default(),
            end: GeoPoint::default(),
            true_trk_deg: 0.0,
            turn_rad_nm: -1.0,
            is_arc: false,
            is_finite: false,
            is_bypassed: false,
            is_to_inhibited: false,
            has_disc: false,
            is_rwy: false,
        }
    }
}

/// A leg as stored in the leg list: the database record plus derived state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegNode {
    pub leg: Option<Leg>,
    pub is_discon: bool,
    pub path: LegPath,
    /// Arena slot of the owning segment.
    pub seg: usize,
}

/// Procedural category of a segment, in route order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SegCategory {
    DepRwy,
    Sid,
    SidTrans,
    Enroute,
    StarTrans,
    Star,
    ApproachTrans,
    Approach,
}

impl SegCategory {
    pub const COUNT: usize = 8;

    pub fn idx(self) -> usize {
        self as usize
    }

    pub fn from_idx(idx: usize) -> Option<SegCategory> {
        match idx {
            0 => Some(SegCategory::DepRwy),
            1 => Some(SegCategory::Sid),
            2 => Some(SegCategory::SidTrans),
            3 => Some(SegCategory::Enroute),
            4 => Some(SegCategory::StarTrans),
            5 => Some(SegCategory::Star),
            6 => Some(SegCategory::ApproachTrans),
            7 => Some(SegCategory::Approach),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SegCategory::DepRwy => "DEP RWY",
            SegCategory::Sid => "SID",
            SegCategory::SidTrans => "SID TRANS",
            SegCategory::Enroute => "ENROUTE",
            SegCategory::StarTrans => "STAR TRANS",
            SegCategory::Star => "STAR",
            SegCategory::ApproachTrans => "APPR TRANS",
            SegCategory::Approach => "APPR",
        }
    }
}

/// Rank used for ordering comparisons; sentinels (no category) rank lowest.
pub fn cat_rank(cat: Option<SegCategory>) -> u8 {
    match cat {
        None => 0,
        Some(c) => c as u8 + 1,
    }
}

/// A named run of legs sharing one procedural category.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Segment {
    pub name: String,
    /// `None` only on the list sentinels.
    pub category: Option<SegCategory>,
    /// Zero-length placeholder keeping the route connected.
    pub is_direct: bool,
    pub is_discon: bool,
    /// Arena slot of the segment's last leg; `None` marks an empty
    /// placeholder still awaiting legs.
    pub end: Option<usize>,
}

/// One slot of the category ref table: the segment currently representing a
/// procedural category, plus its display name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryRef {
    pub name: String,
    pub segment: Option<usize>,
}

/// A caller-held reference into a list snapshot: an arena slot plus the list
/// version it was captured at. Mutating calls reject it once stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRef {
    /// `None` addresses the list tail (append position).
    pub node: Option<usize>,
    pub version: u64,
}

/// Geometry handed to map displays: one flyable leg plus its terminating fix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectedLeg {
    pub path: LegPath,
    pub end_fix: Option<Fix>,
}
