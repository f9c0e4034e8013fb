use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use log::debug;

use enum_map::EnumMap;

use super::crosswalk::{read_links, read_states, Crosswalk, CrosswalkEntry, StateInfo, Table};
use super::error::{Error, Result};
use super::geo::{to_state_code, GeoCode, GeoSystem};
use super::ioutil::{find_table_file, magic_open};


/// Where the raw crosswalk tables come from.
pub trait TableSource: Send + Sync {
	/// Open the CSV text of `table`. Fails with `DataUnavailable` if the
	/// table does not exist in this source.
	fn open<'a>(&'a self, table: Table) -> Result<Box<dyn io::Read + 'a>>;
}


/// Tables stored as `<name>.csv` or `<name>.csv.gz` in one directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
	root: PathBuf,
}

impl DirectorySource {
	pub fn new<P: AsRef<Path>>(root: P) -> Self {
		Self{root: root.as_ref().to_path_buf()}
	}
}

impl TableSource for DirectorySource {
	fn open<'a>(&'a self, table: Table) -> Result<Box<dyn io::Read + 'a>> {
		let path = match find_table_file(&self.root, table.name()) {
			Some(p) => p,
			None => return Err(Error::DataUnavailable{
				table,
				reason: format!("no {}.csv or {}.csv.gz in {}", table.name(), table.name(), self.root.display()),
			}),
		};
		match magic_open(&path) {
			Ok(r) => Ok(r),
			Err(e) => Err(Error::DataUnavailable{
				table,
				reason: format!("{}: {}", path.display(), e),
			}),
		}
	}
}


/// Tables held in memory as CSV text.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
	tables: EnumMap<Table, Option<String>>,
}

impl StaticSource {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with<S: Into<String>>(mut self, table: Table, csv: S) -> Self {
		self.insert(table, csv);
		self
	}

	pub fn insert<S: Into<String>>(&mut self, table: Table, csv: S) {
		self.tables[table] = Some(csv.into());
	}
}

impl TableSource for StaticSource {
	fn open<'a>(&'a self, table: Table) -> Result<Box<dyn io::Read + 'a>> {
		match &self.tables[table] {
			Some(text) => Ok(Box::new(text.as_bytes())),
			None => Err(Error::DataUnavailable{
				table,
				reason: "not provided".into(),
			}),
		}
	}
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hop {
	Link(GeoSystem, GeoSystem),
	StatePrefix,
}

/// The hops needed to get from one system to another, or `None` if there
/// is no way to do it without disaggregating.
fn plan(from: GeoSystem, to: GeoSystem) -> Option<Vec<Hop>> {
	use GeoSystem::*;

	let mut result = Vec::new();
	let mut at = from;
	while at != to {
		let (hop, next) = match (at, to) {
			(Zip, _) => (Hop::Link(Zip, Fips), Fips),
			(Fips, Msa) | (Fips, Hrr) => (Hop::Link(Fips, to), to),
			(Fips, _) => (Hop::StatePrefix, StateCode),
			(StateCode, StateId) | (StateCode, StateName) | (StateCode, Hhs) | (StateCode, Nation) => (Hop::Link(StateCode, to), to),
			(StateId, _) | (StateName, _) => (Hop::Link(at, StateCode), StateCode),
			_ => return None,
		};
		result.push(hop);
		at = next;
	}
	Some(result)
}


#[derive(Debug, Clone)]
enum Step {
	Table(Arc<Crosswalk>),
	// the crosswalk only serves as the set of known state codes
	StatePrefix(Arc<Crosswalk>),
}

/// A chain of crosswalks leading from one system to another. Weights
/// multiply along the chain.
#[derive(Debug, Clone)]
pub struct Route {
	from: GeoSystem,
	to: GeoSystem,
	steps: Vec<Step>,
}

impl Route {
	#[inline(always)]
	pub fn from(&self) -> GeoSystem {
		self.from
	}

	#[inline(always)]
	pub fn to(&self) -> GeoSystem {
		self.to
	}

	pub fn is_identity(&self) -> bool {
		self.steps.is_empty()
	}

	pub fn is_many_to_one(&self) -> bool {
		self.steps.iter().all(|step| match step {
			Step::Table(cw) => cw.is_many_to_one(),
			Step::StatePrefix(_) => true,
		})
	}

	/// Targets of `code` with their weights, ordered by target. Empty if the
	/// code has no mapping.
	pub fn resolve(&self, code: &GeoCode) -> Vec<(GeoCode, f64)> {
		let mut current = vec![(code.clone(), 1.0)];
		for step in self.steps.iter() {
			let mut next: BTreeMap<GeoCode, f64> = BTreeMap::new();
			for (c, w) in current.into_iter() {
				match step {
					Step::Table(cw) => {
						if let Some(links) = cw.get(&c) {
							for (target, lw) in links.iter() {
								*next.entry(target.clone()).or_insert(0.0) += w * lw;
							}
						}
					},
					Step::StatePrefix(known) => {
						let state = to_state_code(&c);
						if known.contains(&state) {
							*next.entry(state).or_insert(0.0) += w;
						}
					},
				}
			}
			current = next.into_iter().collect();
			if current.is_empty() {
				break
			}
		}
		current
	}
}


type CrosswalkCache = EnumMap<GeoSystem, EnumMap<GeoSystem, Option<Arc<Crosswalk>>>>;

/// Loads crosswalk tables from a [`TableSource`] on first use and keeps
/// them for the lifetime of the store. Safe to share between threads.
pub struct CrosswalkStore {
	source: Box<dyn TableSource>,
	cache: RwLock<CrosswalkCache>,
	states: RwLock<Option<Arc<Vec<StateInfo>>>>,
}

impl CrosswalkStore {
	pub fn new<S: TableSource + 'static>(source: S) -> Self {
		Self{
			source: Box::new(source),
			cache: RwLock::new(EnumMap::default()),
			states: RwLock::new(None),
		}
	}

	pub fn from_dir<P: AsRef<Path>>(root: P) -> Self {
		Self::new(DirectorySource::new(root))
	}

	fn states(&self) -> Result<Arc<Vec<StateInfo>>> {
		if let Some(states) = &*self.states.read().unwrap_or_else(|e| e.into_inner()) {
			return Ok(states.clone())
		}
		let loaded = Arc::new(read_states(self.source.open(Table::StateCodes)?)?);
		debug!("loaded {} states from {}", loaded.len(), Table::StateCodes);
		let mut guard = self.states.write().unwrap_or_else(|e| e.into_inner());
		Ok(guard.get_or_insert(loaded).clone())
	}

	fn build(&self, from: GeoSystem, to: GeoSystem) -> Result<Crosswalk> {
		use GeoSystem::*;

		let table = match (from, to) {
			(Zip, Fips) => Table::ZipFips,
			(Fips, Msa) => Table::FipsMsa,
			(Fips, Hrr) => Table::FipsHrr,
			(StateCode, Hhs) => Table::StateHhs,
			(StateCode, StateId) | (StateCode, StateName) | (StateCode, Nation)
				| (StateId, StateCode) | (StateName, StateCode) => {
				let states = self.states()?;
				let project = |info: &StateInfo, system: GeoSystem| match system {
					StateCode => info.code.clone(),
					StateId => info.id.clone(),
					StateName => info.name.clone(),
					_ => GeoCode::nation(),
				};
				let entries = states.iter().map(|info| CrosswalkEntry{
					source: project(info, from),
					target: project(info, to),
					weight: 1.0,
				});
				return Crosswalk::from_entries(Table::StateCodes, from, to, entries)
			},
			_ => return Err(Error::UnsupportedConversion{from, to}),
		};
		let entries = read_links(table, self.source.open(table)?)?;
		Crosswalk::from_entries(table, from, to, entries)
	}

	/// The crosswalk backing a directly tabulated pair of systems.
	pub fn load(&self, from: GeoSystem, to: GeoSystem) -> Result<Arc<Crosswalk>> {
		if let Some(cw) = &self.cache.read().unwrap_or_else(|e| e.into_inner())[from][to] {
			return Ok(cw.clone())
		}
		let cw = Arc::new(self.build(from, to)?);
		debug!("loaded crosswalk {} -> {} with {} sources", from, to, cw.len());
		let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
		Ok(cache[from][to].get_or_insert(cw).clone())
	}

	/// Load every table the source provides the pairs for. Meant to be
	/// called once at startup so that later calls never touch the source.
	pub fn preload(&self) -> Result<()> {
		use GeoSystem::*;

		let pairs = [
			(Zip, Fips),
			(Fips, Msa),
			(Fips, Hrr),
			(StateCode, Hhs),
			(StateCode, StateId),
			(StateCode, StateName),
			(StateCode, Nation),
			(StateId, StateCode),
			(StateName, StateCode),
		];
		for (from, to) in pairs.iter() {
			self.load(*from, *to)?;
		}
		Ok(())
	}

	pub fn route(&self, from: GeoSystem, to: GeoSystem) -> Result<Route> {
		let hops = match plan(from, to) {
			Some(hops) => hops,
			None => return Err(Error::UnsupportedConversion{from, to}),
		};
		let mut steps = Vec::with_capacity(hops.len());
		for hop in hops.into_iter() {
			steps.push(match hop {
				Hop::Link(a, b) => Step::Table(self.load(a, b)?),
				Hop::StatePrefix => Step::StatePrefix(self.load(GeoSystem::StateCode, GeoSystem::StateId)?),
			});
		}
		Ok(Route{from, to, steps})
	}

	/// Single-valued lookup of `code` in another system. `Ok(None)` if the
	/// code has no mapping; an error if the conversion can fan out.
	pub fn resolve(&self, code: &GeoCode, from: GeoSystem, to: GeoSystem) -> Result<Option<GeoCode>> {
		let route = self.route(from, to)?;
		if !route.is_many_to_one() {
			return Err(Error::NotManyToOne{from, to})
		}
		Ok(route.resolve(code).into_iter().next().map(|(target, _)| target))
	}

	/// Every code known in `system`.
	pub fn known_codes(&self, system: GeoSystem) -> Result<BTreeSet<GeoCode>> {
		use GeoSystem::*;

		Ok(match system {
			Zip => self.load(Zip, Fips)?.sources().cloned().collect(),
			Fips => {
				// counties appear in several link tables; use whichever exist
				let mut result = BTreeSet::new();
				let mut available = 0usize;
				let mut unavailable = None;
				for table in Table::all().iter() {
					let (from, to) = match table.systems() {
						Some((from, to)) if from == Fips || to == Fips => (from, to),
						_ => continue,
					};
					match self.load(from, to) {
						Ok(cw) if from == Fips => result.extend(cw.sources().cloned()),
						Ok(cw) => result.extend(cw.targets()),
						Err(e @ Error::DataUnavailable{..}) => {
							debug!("skipping {} for county codes: {}", table, e);
							unavailable = Some(e);
							continue;
						},
						Err(e) => return Err(e),
					}
					available += 1;
				}
				match unavailable {
					Some(e) if available == 0 => return Err(e),
					_ => result,
				}
			},
			StateCode => self.load(StateCode, StateId)?.sources().cloned().collect(),
			StateId | StateName => self.load(StateCode, system)?.targets(),
			Msa => self.load(Fips, Msa)?.targets(),
			Hrr => self.load(Fips, Hrr)?.targets(),
			Hhs => self.load(StateCode, Hhs)?.targets(),
			Nation => {
				let mut result = BTreeSet::new();
				result.insert(GeoCode::nation());
				result
			},
		})
	}
}


#[cfg(test)]
mod tests {
	use super::*;
	use crate::geo::normalize;

	fn store() -> CrosswalkStore {
		CrosswalkStore::new(StaticSource::new()
			.with(Table::ZipFips, "zip,fips,weight\n45140,39025,0.5\n45140,39061,0.5\n95616,06113,1\n95618,06113,0.9\n95618,06067,0.1\n")
			.with(Table::FipsMsa, "fips,msa\n06113,40900\n06067,40900\n")
			.with(Table::FipsHrr, "fips,hrr,weight\n06113,391,1\n")
			.with(Table::StateCodes, "st_code,state_id,state_name\n06,ca,California\n39,oh,Ohio\n")
			.with(Table::StateHhs, "state_code,hhs\n06,9\n39,5\n"))
	}

	fn code(raw: &str, system: GeoSystem) -> GeoCode {
		normalize(raw, system).unwrap()
	}

	#[test]
	fn plans_routes() {
		use GeoSystem::*;
		assert_eq!(plan(Fips, Fips), Some(vec![]));
		assert_eq!(plan(Zip, Msa), Some(vec![Hop::Link(Zip, Fips), Hop::Link(Fips, Msa)]));
		assert_eq!(plan(Fips, Hhs), Some(vec![Hop::StatePrefix, Hop::Link(StateCode, Hhs)]));
		assert_eq!(plan(StateId, StateName), Some(vec![Hop::Link(StateId, StateCode), Hop::Link(StateCode, StateName)]));
		assert_eq!(plan(StateId, Fips), None);
		assert_eq!(plan(Msa, StateId), None);
		assert_eq!(plan(Fips, Zip), None);
	}

	#[test]
	fn caches_loaded_tables() {
		let store = store();
		let a = store.load(GeoSystem::Zip, GeoSystem::Fips).unwrap();
		let b = store.load(GeoSystem::Zip, GeoSystem::Fips).unwrap();
		assert!(Arc::ptr_eq(&a, &b));
	}

	#[test]
	fn missing_table_is_unavailable() {
		let store = CrosswalkStore::new(StaticSource::new());
		match store.load(GeoSystem::Zip, GeoSystem::Fips) {
			Err(Error::DataUnavailable{table: Table::ZipFips, ..}) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match store.route(GeoSystem::StateCode, GeoSystem::Fips) {
			Err(Error::UnsupportedConversion{..}) => (),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn resolves_through_prefix() {
		let store = store();
		let got = store.resolve(&code("6113", GeoSystem::Fips), GeoSystem::Fips, GeoSystem::StateId).unwrap();
		assert_eq!(got, Some(code("CA", GeoSystem::StateId)));
		let got = store.resolve(&code("39061", GeoSystem::Fips), GeoSystem::Fips, GeoSystem::Hhs).unwrap();
		assert_eq!(got, Some(code("5", GeoSystem::Hhs)));
		let got = store.resolve(&code("98633", GeoSystem::Fips), GeoSystem::Fips, GeoSystem::StateId).unwrap();
		assert_eq!(got, None);
		let got = store.resolve(&code("ca", GeoSystem::StateId), GeoSystem::StateId, GeoSystem::StateName).unwrap();
		assert_eq!(got, Some(code("California", GeoSystem::StateName)));
	}

	#[test]
	fn state_names_ignore_case() {
		let store = store();
		let got = store.resolve(&code(" california", GeoSystem::StateName), GeoSystem::StateName, GeoSystem::StateId).unwrap();
		assert_eq!(got, Some(code("ca", GeoSystem::StateId)));
		let got = store.resolve(&code("OHIO", GeoSystem::StateName), GeoSystem::StateName, GeoSystem::Hhs).unwrap();
		assert_eq!(got, Some(code("5", GeoSystem::Hhs)));
		let got = store.resolve(&code("Ohioo", GeoSystem::StateName), GeoSystem::StateName, GeoSystem::StateId).unwrap();
		assert_eq!(got, None);
	}

	#[test]
	fn identity_route_has_no_steps() {
		let store = CrosswalkStore::new(StaticSource::new());
		let route = store.route(GeoSystem::Fips, GeoSystem::Fips).unwrap();
		assert!(route.is_identity());
		assert_eq!(route.resolve(&code("1123", GeoSystem::Fips)), vec![(code("01123", GeoSystem::Fips), 1.0)]);
		assert!(!store.route(GeoSystem::Zip, GeoSystem::Zip).unwrap().resolve(&code("95616", GeoSystem::Zip)).is_empty());
	}

	#[test]
	fn county_codes_from_available_tables() {
		let store = CrosswalkStore::new(StaticSource::new()
			.with(Table::FipsHrr, "fips,hrr,weight\n06113,391,1\n39061,180,1\n"));
		let codes: Vec<String> = store.known_codes(GeoSystem::Fips).unwrap().iter().map(|c| { c.as_str().to_string() }).collect();
		assert_eq!(codes, vec!["06113".to_string(), "39061".to_string()]);

		let empty = CrosswalkStore::new(StaticSource::new());
		match empty.known_codes(GeoSystem::Fips) {
			Err(Error::DataUnavailable{..}) => (),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn resolve_refuses_fan_out() {
		let store = store();
		match store.resolve(&code("45140", GeoSystem::Zip), GeoSystem::Zip, GeoSystem::Fips) {
			Err(Error::NotManyToOne{..}) => (),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn route_merges_converging_paths() {
		let store = store();
		let route = store.route(GeoSystem::Zip, GeoSystem::StateId).unwrap();
		let targets = route.resolve(&code("95618", GeoSystem::Zip));
		assert_eq!(targets.len(), 1);
		assert_eq!(targets[0].0.as_str(), "ca");
		assert!((targets[0].1 - 1.0).abs() < 1e-12);

		let route = store.route(GeoSystem::Zip, GeoSystem::Fips).unwrap();
		let targets = route.resolve(&code("45140", GeoSystem::Zip));
		assert_eq!(targets.len(), 2);
		assert!(route.resolve(&code("10001", GeoSystem::Zip)).is_empty());
	}

	#[test]
	fn lists_known_codes() {
		let store = store();
		assert_eq!(store.known_codes(GeoSystem::Zip).unwrap().len(), 3);
		assert_eq!(store.known_codes(GeoSystem::Fips).unwrap().len(), 4);
		assert_eq!(store.known_codes(GeoSystem::StateId).unwrap().len(), 2);
		assert_eq!(store.known_codes(GeoSystem::Nation).unwrap().len(), 1);
		store.preload().unwrap();
	}
}
