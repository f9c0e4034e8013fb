use std::env;
use std::io;

use log::info;

use geomap::{ColumnConfig, CrosswalkStore, GeoSystem, InvalidCodePolicy, MeasureTable, MegacountyConfig, MissingPolicy, Resolution};


static DATE_COLUMN: &'static str = "timestamp";
static DEFAULT_TABLES: &'static str = "./static";
static DEFAULT_THRESHOLD: f64 = 100.;
static DEFAULT_WINDOW: u32 = 7;
static CONSERVATION_TOLERANCE: f64 = 1e-3;


fn usage(argv0: &str) -> String {
	format!("usage: {} MEASURES.csv[.gz] SOURCE-SYSTEM RESOLUTION ADDITIVE[,ADDITIVE...] [THRESHOLD WINDOW]", argv0)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
	env_logger::init();

	let argv: Vec<String> = env::args().collect();
	if argv.len() != 5 && argv.len() != 7 {
		return Err(usage(&argv[0]).into())
	}
	let datafile = &argv[1];
	let system = argv[2].parse::<GeoSystem>()?;
	let resolution = argv[3].parse::<Resolution>()?;
	let additive: Vec<&str> = argv[4].split(',').map(|s| { s.trim() }).filter(|s| { !s.is_empty() }).collect();
	let (threshold, window) = match argv.get(5..7) {
		Some([threshold, window]) => (threshold.parse::<f64>()?, window.parse::<u32>()?),
		_ => (DEFAULT_THRESHOLD, DEFAULT_WINDOW),
	};

	// the geo column is named after the system the codes are in
	let columns = ColumnConfig::new(system.name(), DATE_COLUMN, &additive);
	// the last additive column is the denominator
	let threshold_column = match additive.last() {
		Some(name) => *name,
		None => return Err(usage(&argv[0]).into()),
	};
	let megacounty = MegacountyConfig::new(threshold, window, threshold_column).checked(CONSERVATION_TOLERANCE);

	let tables = env::var("GEOMAP_TABLES").unwrap_or(DEFAULT_TABLES.into());
	let store = CrosswalkStore::from_dir(&tables);

	eprintln!("loading measures ...");
	let table = {
		let r = geomap::magic_open(datafile)?;
		MeasureTable::read_csv(&mut *geomap::default_output(), r, system, &columns, InvalidCodePolicy::Drop)?
	};
	info!("read {} rows for {} geos", table.len(), table.geos().len());

	eprintln!("mapping to {} ...", resolution);
	let result = geomap::geo_reindex(&store, &table, resolution, &columns, &megacounty, MissingPolicy::Propagate, None)?;

	let stdout = io::stdout();
	result.write_csv(stdout.lock(), DATE_COLUMN)?;
	Ok(())
}
