use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use roofscan::browser::BrowserSession;
use roofscan::connectors::connector_for;
use roofscan::debug::set_debug;
use roofscan::exports::load_parcels_from_csv;
use roofscan::jurisdictions::{
    detect_system_from_url, infer_display_name_from_url, JurisdictionStore,
};
use roofscan::parcels::fetch_parcels_in_polygon;
use roofscan::scanner::{run_scan, ScanOptions, ScanSession};
use roofscan::tui::ScanTui;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "roofscan")]
#[command(about = "Find roofs 20+ years old through municipal permit portals")]
struct Args {
    /// Directory for the jurisdiction registry and CSV exports
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a list of addresses against one jurisdiction's permit portal
    Scan {
        /// CSV of addresses to scan (needs an 'address' column)
        input: PathBuf,

        /// Jurisdiction id (see `jurisdictions list`)
        #[arg(long)]
        jurisdiction: u32,

        /// Base delay between addresses in seconds
        #[arg(long, default_value_t = 1.0)]
        delay: f64,

        /// Shorter waits and floors; riskier on slow portals
        #[arg(long)]
        fast: bool,

        /// Scan at most this many addresses
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Manage the jurisdiction registry
    Jurisdictions {
        #[command(subcommand)]
        action: JurisdictionAction,
    },

    /// Discover addresses inside a polygon from OpenStreetMap
    Parcels {
        /// JSON file with polygon vertices as [[lat, lng], ...]
        polygon: PathBuf,

        /// Maximum number of addresses to collect
        #[arg(long, default_value_t = 80)]
        limit: usize,

        /// Where to write the address CSV
        #[arg(long, default_value = "parcels.csv")]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum JurisdictionAction {
    /// List active jurisdictions for a state
    List {
        #[arg(long, default_value = "FL")]
        state: String,
    },

    /// Register a portal by URL; the system is detected from the URL
    Add {
        url: String,

        #[arg(long, default_value = "FL")]
        state: String,

        /// Display name; inferred from the URL host when omitted
        #[arg(long)]
        name: Option<String>,
    },

    /// Remove a jurisdiction by id
    Remove { id: u32 },
}

fn main() -> Result<()> {
    let args = Args::parse();
    set_debug(args.debug);

    let store = JurisdictionStore::new(&args.data_dir);
    store.seed_default()?;

    match args.command {
        Command::Scan {
            input,
            jurisdiction,
            delay,
            fast,
            limit,
        } => cmd_scan(&args.data_dir, &store, &input, jurisdiction, delay, fast, limit),
        Command::Jurisdictions { action } => cmd_jurisdictions(&store, action),
        Command::Parcels {
            polygon,
            limit,
            output,
        } => cmd_parcels(&polygon, limit, &output),
    }
}

fn cmd_scan(
    data_dir: &std::path::Path,
    store: &JurisdictionStore,
    input: &std::path::Path,
    jurisdiction_id: u32,
    delay: f64,
    fast: bool,
    limit: Option<usize>,
) -> Result<()> {
    let jurisdiction = store
        .get_by_id(jurisdiction_id)?
        .with_context(|| format!("No jurisdiction with id {}", jurisdiction_id))?;

    let mut parcels = load_parcels_from_csv(input)?;
    if let Some(limit) = limit {
        parcels.truncate(limit);
    }
    if parcels.is_empty() {
        anyhow::bail!("No usable addresses in {:?}", input);
    }

    let browser = BrowserSession::new();
    let connector = connector_for(&jurisdiction, &browser, fast)?;
    println!(
        "Using {} connector for {} ({})",
        connector.name(),
        jurisdiction.name,
        jurisdiction.state
    );

    let session = ScanSession::new();
    let mut tui = ScanTui::new();
    let options = ScanOptions {
        delay_seconds: delay,
        fast_mode: fast,
        out_dir: data_dir.to_path_buf(),
    };

    let outputs = run_scan(
        &session,
        connector.as_ref(),
        &jurisdiction.name,
        &parcels,
        &options,
        Some(&mut tui),
    )?;

    let status = session.status();
    println!(
        "Scanned {}/{} addresses, {} leads 20y+",
        status.done, status.total, status.good
    );
    println!("All rows:   {}", outputs.all_csv.display());
    println!("Good leads: {}", outputs.good_csv.display());
    Ok(())
}

fn cmd_jurisdictions(store: &JurisdictionStore, action: JurisdictionAction) -> Result<()> {
    match action {
        JurisdictionAction::List { state } => {
            let items = store.list_active(&state)?;
            if items.is_empty() {
                println!("No active jurisdictions for {}", state.to_uppercase());
                return Ok(());
            }
            for j in items {
                println!("{:>4}  {:<24} {:<8} {}", j.id, j.name, j.system, j.portal_url);
            }
        }
        JurisdictionAction::Add { url, state, name } => {
            let (system, canonical_url) = detect_system_from_url(&url)?;
            let name = name.unwrap_or_else(|| infer_display_name_from_url(&canonical_url));
            let j = store.add_jurisdiction(&state, &name, system, &canonical_url)?;
            println!("Added #{}: {} ({}) via {}", j.id, j.name, j.state, j.system);
        }
        JurisdictionAction::Remove { id } => {
            if store.delete_jurisdiction(id)? {
                println!("Removed jurisdiction #{}", id);
            } else {
                println!("No jurisdiction with id {}", id);
            }
        }
    }
    Ok(())
}

fn cmd_parcels(polygon_path: &std::path::Path, limit: usize, output: &std::path::Path) -> Result<()> {
    let content = fs::read_to_string(polygon_path)
        .with_context(|| format!("Failed to read polygon file {:?}", polygon_path))?;
    let latlngs: Vec<(f64, f64)> =
        serde_json::from_str(&content).context("Polygon file must be [[lat, lng], ...]")?;

    let parcels = fetch_parcels_in_polygon(&latlngs, limit)?;
    println!("Found {} addresses", parcels.len());

    let mut writer = csv::Writer::from_path(output)
        .with_context(|| format!("Failed to create {:?}", output))?;
    writer.write_record(["address", "owner", "mailing_address", "phone"])?;
    for p in &parcels {
        writer.write_record([&p.address, &p.owner, &p.mailing_address, &p.phone])?;
    }
    writer.flush()?;
    println!("Wrote {}", output.display());
    Ok(())
}
