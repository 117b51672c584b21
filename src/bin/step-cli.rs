use clap::{Parser, Subcommand};
use colored::*;
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, ContentArrangement, Table};
use rusqlite::Connection;
use stepcore::config::{load_config, Config};
use stepcore::events::SqliteEventLog;
use stepcore::ledger::SqliteLedger;
use stepcore::lookup::point_to_triangle;
use stepcore::mesh::TriangleId;
use stepcore::pipeline::Pipeline;
use stepcore::polygon::polygon_of;
use stepcore::scoring::MockAttestationVerifier;
use stepcore::store::{BoundingBox, SqliteTriangleStore, TriangleStore};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Parser)]
#[command(author, version, about = "STEP mesh and proof-validation core CLI", long_about = None)]
struct Cli {
    /// Path to config.toml; falls back to defaults if omitted or missing.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolves a (lat, lon) to the triangle id that contains it
    TriangleAt {
        lat: f64,
        lon: f64,
        #[arg(long, default_value_t = 10)]
        level: u8,
    },
    /// Lists triangles at a level whose centroid falls inside a bounding box
    SearchBbox {
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
        #[arg(long, default_value_t = 10)]
        level: u8,
        #[arg(long)]
        max: Option<usize>,
    },
    /// Lists triangles at a level that have at least one click and are not exhausted/subdivided
    ActiveTriangles {
        #[arg(long, default_value_t = 10)]
        level: u8,
        #[arg(long)]
        max: Option<usize>,
    },
    /// Shows the current record for a single triangle id
    State { triangle_id: String },
    /// Submits a single proof payload (JSON file) through the validation pipeline
    Submit {
        /// Path to a file containing a STEP-PROOF-v1 or STEP-PROOF-v2 JSON payload
        payload_path: String,
    },
}

fn load_cfg(path: Option<&str>) -> Config {
    match path {
        Some(p) => load_config(p).unwrap_or_else(|e| {
            eprintln!("{}", format!("warning: failed to load config at {}: {}", p, e).yellow());
            Config::default()
        }),
        None => Config::default(),
    }
}

fn open_store(cfg: &Config) -> Box<dyn TriangleStore> {
    let conn = Connection::open(&cfg.database.path).expect("failed to open database");
    Box::new(SqliteTriangleStore::open(conn).expect("failed to initialize triangle store"))
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}

fn run_triangle_at(cfg: &Config, lat: f64, lon: f64, level: u8) {
    match point_to_triangle(lat, lon, level) {
        Ok(id) => print_triangle_id(&id, cfg),
        Err(e) => eprintln!("{}", format!("error: {}", e).red()),
    }
}

fn print_triangle_id(id: &TriangleId, cfg: &Config) {
    let geom = polygon_of(id);
    let store = open_store(cfg);
    let record = store.get(&id.encode()).ok().flatten();

    println!("{}", "Triangle".bright_cyan().bold());
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Field").add_attribute(Attribute::Bold),
            Cell::new("Value").add_attribute(Attribute::Bold),
        ]);
    table.add_row(vec!["id".to_string(), id.encode()]);
    table.add_row(vec!["face".to_string(), id.face.to_string()]);
    table.add_row(vec!["level".to_string(), id.level.to_string()]);
    table.add_row(vec![
        "centroid".to_string(),
        format!("{:.6}, {:.6}", geom.centroid.coordinates[1], geom.centroid.coordinates[0]),
    ]);
    if let Some(t) = &record {
        table.add_row(vec!["state".to_string(), format!("{:?}", t.state)]);
        table.add_row(vec!["clicks".to_string(), t.clicks.to_string()]);
    } else {
        table.add_row(vec!["state".to_string(), "not yet materialized".to_string()]);
    }
    println!("{table}");
}

fn run_search_bbox(
    cfg: &Config,
    min_lon: f64,
    min_lat: f64,
    max_lon: f64,
    max_lat: f64,
    level: u8,
    max: Option<usize>,
) {
    let store = open_store(cfg);
    let bbox = BoundingBox {
        min_lon,
        min_lat,
        max_lon,
        max_lat,
    };
    let max = max.unwrap_or(cfg.mesh.max_bbox_results);
    match store.query_bbox(bbox, level, max) {
        Ok(triangles) => print_triangle_table(&triangles),
        Err(e) => eprintln!("{}", format!("error: {}", e).red()),
    }
}

fn run_active_triangles(cfg: &Config, level: u8, max: Option<usize>) {
    let store = open_store(cfg);
    let max = max.unwrap_or(cfg.mesh.max_bbox_results);
    match store.query_active(level, max) {
        Ok(triangles) => print_triangle_table(&triangles),
        Err(e) => eprintln!("{}", format!("error: {}", e).red()),
    }
}

fn print_triangle_table(triangles: &[stepcore::triangle::Triangle]) {
    if triangles.is_empty() {
        println!("{}", "No triangles matched.".yellow());
        return;
    }
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Id").add_attribute(Attribute::Bold),
            Cell::new("Level").add_attribute(Attribute::Bold),
            Cell::new("State").add_attribute(Attribute::Bold),
            Cell::new("Clicks").add_attribute(Attribute::Bold),
        ]);
    for t in triangles {
        table.add_row(vec![
            t.id.clone(),
            t.level.to_string(),
            format!("{:?}", t.state),
            t.clicks.to_string(),
        ]);
    }
    println!("{table}");
    println!("{}", format!("{} triangle(s)", triangles.len()).bright_blue());
}

fn run_state(cfg: &Config, triangle_id: &str) {
    let store = open_store(cfg);
    match store.get(triangle_id) {
        Ok(Some(t)) => print_triangle_table(std::slice::from_ref(&t)),
        Ok(None) => println!("{}", "Triangle not found.".yellow()),
        Err(e) => eprintln!("{}", format!("error: {}", e).red()),
    }
}

fn run_submit(cfg: Config, payload_path: &str) {
    let raw = match std::fs::read_to_string(payload_path) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("{}", format!("error: failed to read {}: {}", payload_path, e).red());
            return;
        }
    };

    let conn = Connection::open(&cfg.database.path).expect("failed to open database");
    let store: std::sync::Arc<dyn TriangleStore> =
        std::sync::Arc::new(SqliteTriangleStore::open(conn).expect("failed to initialize triangle store"));
    let conn = Connection::open(&cfg.database.path).expect("failed to open database");
    let events = Box::new(SqliteEventLog::open(conn).expect("failed to initialize event log"));
    let conn = Connection::open(&cfg.database.path).expect("failed to open database");
    let ledger = Box::new(SqliteLedger::open(conn).expect("failed to initialize ledger"));
    let attestation = Box::new(MockAttestationVerifier);

    let pipeline = Pipeline::new(cfg, store, events, ledger, attestation);
    let response = pipeline.submit(&raw, now_ms());

    let body = serde_json::to_string_pretty(&response).expect("response always serializes");
    if response.ok {
        println!("{}", "accepted".bright_green().bold());
    } else {
        println!("{}", "rejected".red().bold());
    }
    println!("{}", body);
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let cfg = load_cfg(cli.config.as_deref());

    match cli.command {
        Commands::TriangleAt { lat, lon, level } => run_triangle_at(&cfg, lat, lon, level),
        Commands::SearchBbox {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
            level,
            max,
        } => run_search_bbox(&cfg, min_lon, min_lat, max_lon, max_lat, level, max),
        Commands::ActiveTriangles { level, max } => run_active_triangles(&cfg, level, max),
        Commands::State { triangle_id } => run_state(&cfg, &triangle_id),
        Commands::Submit { payload_path } => run_submit(cfg, &payload_path),
    }
}
