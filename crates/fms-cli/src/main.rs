//! Command line front end for the route engine: inspect, validate and
//! normalize `.fms` route files, and query the navigation database.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fms_core::{Fpln, NavDataProvider, NavDb, ProcKind, LEG_POOL_CAP, SEG_POOL_CAP};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Navigation database JSON; the built-in demo database when omitted
    #[arg(long, global = true)]
    navdata: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Load a route file and print its legs and segments
    Show {
        file: PathBuf,
        /// Also print the computed leg geometry
        #[arg(long)]
        geometry: bool,
        /// Dump the leg list as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Load a route file and report whether it is flyable
    Check { file: PathBuf },
    /// Load a route file and write it back out in canonical form
    Normalize { input: PathBuf, output: PathBuf },
    /// List runways and procedures for an airport
    Procedures {
        icao: String,
        /// Only procedures serving this runway
        #[arg(long)]
        runway: Option<String>,
    },
    /// Print the database cycle and its validity window
    Cycle,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let nav: Arc<dyn NavDataProvider> = match &args.navdata {
        Some(path) => Arc::new(
            NavDb::load(path).with_context(|| format!("loading navdata {}", path.display()))?,
        ),
        None => Arc::new(NavDb::demo()),
    };

    match args.cmd {
        Cmd::Show { file, geometry, json } => show(nav, &file, geometry, json),
        Cmd::Check { file } => check(nav, &file),
        Cmd::Normalize { input, output } => normalize(nav, &input, &output),
        Cmd::Procedures { icao, runway } => procedures(nav, &icao, runway.as_deref()),
        Cmd::Cycle => {
            let cyc = nav.data_cycle();
            println!("cycle {} ({} .. {})", cyc.cycle, cyc.valid_from, cyc.valid_to);
            if !cyc.is_current(chrono::Utc::now().date_naive()) {
                println!("warning: cycle is out of date");
            }
            Ok(())
        }
    }
}

fn load_route(nav: Arc<dyn NavDataProvider>, file: &PathBuf) -> Result<Fpln> {
    let fp = Fpln::new(nav);
    fp.load_fms(file)
        .with_context(|| format!("loading route {}", file.display()))?;
    fp.update(0.0);
    Ok(fp)
}

fn show(nav: Arc<dyn NavDataProvider>, file: &PathBuf, geometry: bool, json: bool) -> Result<()> {
    let fp = load_route(nav, file)?;

    if json {
        let rows = fp
            .leg_window(0, LEG_POOL_CAP)
            .map(|(_, rows)| rows.into_iter().map(|r| r.data).collect::<Vec<_>>())
            .unwrap_or_default();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!(
        "{} {} -> {} {}",
        fp.departure().unwrap_or_default(),
        fp.dep_rwy(),
        fp.arrival().unwrap_or_default(),
        fp.arr_rwy(),
    );
    for (kind, tag) in [
        (ProcKind::Sid, "SID"),
        (ProcKind::Star, "STAR"),
        (ProcKind::Approach, "APP"),
    ] {
        let name = fp.selected_procedure(kind);
        if name.is_empty() {
            continue;
        }
        let trans = fp.selected_transition(kind);
        if trans.is_empty() {
            println!("{tag:5} {name}");
        } else {
            println!("{tag:5} {name} / {trans}");
        }
    }

    println!("\nsegments:");
    let (_, segs) = fp.seg_window(0, SEG_POOL_CAP).context("route is empty")?;
    for row in &segs {
        let cat = row.data.category.map(|c| c.label()).unwrap_or("-");
        let flag = if row.data.is_discon {
            " (discontinuity)"
        } else if row.data.is_direct {
            " (direct)"
        } else {
            ""
        };
        println!("  {:12} {}{}", cat, row.data.name, flag);
    }

    println!("\nlegs:");
    let (_, legs) = fp.leg_window(0, LEG_POOL_CAP).context("route is empty")?;
    for (i, row) in legs.iter().enumerate() {
        if row.data.is_discon {
            println!("  {i:3} ---- ROUTE DISCONTINUITY ----");
            continue;
        }
        let Some(leg) = row.data.leg.as_ref() else {
            continue;
        };
        let fix = leg.main_fix.as_ref().map(|f| f.id.as_str()).unwrap_or("");
        print!("  {i:3} {:2} {:10}", leg.leg_type.label(), fix);
        if geometry && row.data.path.is_finite {
            let p = &row.data.path;
            print!(
                "  {:06.1}T {:6.1}nm",
                p.true_trk_deg,
                p.start.gc_dist_nm(p.end)
            );
            if p.is_bypassed {
                print!("  bypassed");
            }
        }
        println!();
    }
    Ok(())
}

fn check(nav: Arc<dyn NavDataProvider>, file: &PathBuf) -> Result<()> {
    let fp = load_route(nav, file)?;
    let legs = fp.leg_count();
    let gaps = fp
        .leg_window(0, LEG_POOL_CAP)
        .map(|(_, rows)| rows.iter().filter(|r| r.data.is_discon).count())
        .unwrap_or(0);
    println!("{legs} legs, {} segments, {gaps} discontinuities", fp.seg_count());
    if gaps > 0 {
        anyhow::bail!("route has discontinuities");
    }
    println!("ok");
    Ok(())
}

fn normalize(nav: Arc<dyn NavDataProvider>, input: &PathBuf, output: &PathBuf) -> Result<()> {
    let fp = load_route(nav, input)?;
    fp.export_fms(output)
        .with_context(|| format!("writing {}", output.display()))?;
    println!("wrote {}", output.display());
    Ok(())
}

fn procedures(nav: Arc<dyn NavDataProvider>, icao: &str, runway: Option<&str>) -> Result<()> {
    if nav.airport(icao).is_none() {
        anyhow::bail!("airport {icao} not in database");
    }
    let rwys = nav.runways(icao);
    println!(
        "runways: {}",
        rwys.iter().map(|r| r.id.as_str()).collect::<Vec<_>>().join(" ")
    );
    for (kind, tag) in [
        (ProcKind::Sid, "SID"),
        (ProcKind::Star, "STAR"),
        (ProcKind::Approach, "APP"),
    ] {
        let mut names = nav.proc_names(icao, kind);
        if let Some(rwy) = runway {
            let rwy = rwy.trim_start_matches("RW");
            names.retain(|n| nav.proc_serves_rwy(icao, kind, n, rwy));
        }
        if names.is_empty() {
            continue;
        }
        println!("{tag}:");
        for name in names {
            let trans = nav.proc_transitions(icao, kind, &name);
            if trans.is_empty() {
                println!("  {name}");
            } else {
                println!("  {name}  [{}]", trans.join(" "));
            }
        }
    }
    Ok(())
}
