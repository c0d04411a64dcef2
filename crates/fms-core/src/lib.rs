pub mod arena;
pub mod error;
mod fms_file;
pub mod geometry;
pub mod models;
pub mod navdata;
pub mod plan;
pub mod router;
pub mod spatial;
pub mod system;

pub use error::{FplnError, Result};
pub use geometry::{GeometryConfig, RunwayContext};
pub use models::{
    AltMode, CategoryRef, Fix, FixKind, Leg, LegNode, LegPath, PathTerm, ProjectedLeg,
    SegCategory, Segment, SnapshotRef, SpdMode, TurnDir, LEG_POOL_CAP, SEG_POOL_CAP,
};
pub use navdata::{
    appr_runway, normalize_rwy_id, AirportData, AirportRecord, DataCycle, NavDataProvider,
    NavDb, ProcKind, Procedure, RunwayData,
};
pub use plan::{LegRow, PlanState, SegRow};
pub use router::Fpln;
pub use spatial::GeoPoint;
pub use system::{RouteSystem, ACT_RTE_IDX};
