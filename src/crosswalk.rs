use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};

use enum_map::{Enum};

use super::error::{Error, IntegrityProblem, Result};
use super::geo::{normalize, GeoCode, GeoSystem};


/// Tolerance on the per-source weight sum of a crosswalk.
pub static WEIGHT_TOLERANCE: f64 = 1e-6;


/// Static reference tables a crosswalk store knows how to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Enum)]
#[serde(rename_all = "snake_case")]
pub enum Table {
	ZipFips,
	FipsMsa,
	FipsHrr,
	StateCodes,
	StateHhs,
}

struct LinkLayout {
	source: &'static [&'static str],
	source_system: GeoSystem,
	target: &'static [&'static str],
	target_system: GeoSystem,
}

impl Table {
	/// File stem of the table (`<name>.csv` or `<name>.csv.gz`).
	pub fn name(&self) -> &'static str {
		match self {
			Self::ZipFips => "zip_fips",
			Self::FipsMsa => "fips_msa",
			Self::FipsHrr => "fips_hrr",
			Self::StateCodes => "state_codes",
			Self::StateHhs => "state_hhs",
		}
	}

	pub fn all() -> [Table; 5] {
		[
			Self::ZipFips,
			Self::FipsMsa,
			Self::FipsHrr,
			Self::StateCodes,
			Self::StateHhs,
		]
	}

	fn link_layout(&self) -> Option<LinkLayout> {
		match self {
			Self::ZipFips => Some(LinkLayout{
				source: &["zip"],
				source_system: GeoSystem::Zip,
				target: &["fips"],
				target_system: GeoSystem::Fips,
			}),
			Self::FipsMsa => Some(LinkLayout{
				source: &["fips"],
				source_system: GeoSystem::Fips,
				target: &["msa"],
				target_system: GeoSystem::Msa,
			}),
			Self::FipsHrr => Some(LinkLayout{
				source: &["fips"],
				source_system: GeoSystem::Fips,
				target: &["hrr"],
				target_system: GeoSystem::Hrr,
			}),
			Self::StateHhs => Some(LinkLayout{
				source: &["state_code", "st_code"],
				source_system: GeoSystem::StateCode,
				target: &["hhs"],
				target_system: GeoSystem::Hhs,
			}),
			Self::StateCodes => None,
		}
	}

	/// Source and target system of a link table. `None` for the state code
	/// table, which is a three-way bijection rather than a link list.
	pub fn systems(&self) -> Option<(GeoSystem, GeoSystem)> {
		self.link_layout().map(|l| (l.source_system, l.target_system))
	}
}

impl fmt::Display for Table {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.write_str(self.name())
	}
}


fn integrity(table: Table, problem: IntegrityProblem) -> Error {
	Error::CrosswalkIntegrity{table, problem}
}


#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrosswalkEntry {
	pub source: GeoCode,
	pub target: GeoCode,
	pub weight: f64,
}


/// Immutable, validated mapping between two coordinate systems.
#[derive(Debug, Clone)]
pub struct Crosswalk {
	from: GeoSystem,
	to: GeoSystem,
	links: HashMap<GeoCode, Vec<(GeoCode, f64)>>,
	many_to_one: bool,
}

impl Crosswalk {
	/// Build a crosswalk, summing duplicate (source, target) pairs.
	///
	/// Every weight must lie in (0, 1] and the weights of each source must
	/// sum to 1 within [`WEIGHT_TOLERANCE`]; anything else would create or
	/// lose mass during aggregation and fails with `CrosswalkIntegrity`.
	pub fn from_entries<I: IntoIterator<Item = CrosswalkEntry>>(
		table: Table,
		from: GeoSystem,
		to: GeoSystem,
		entries: I,
	) -> Result<Self> {
		let mut links: HashMap<GeoCode, Vec<(GeoCode, f64)>> = HashMap::new();
		for CrosswalkEntry{source, target, weight} in entries {
			if !(weight > 0.0 && weight <= 1.0 + WEIGHT_TOLERANCE) {
				return Err(integrity(table, IntegrityProblem::WeightRange{
					source: source.as_str().into(),
					target: target.as_str().into(),
					weight,
				}))
			}
			let targets = links.entry(source).or_insert_with(Vec::new);
			match targets.iter_mut().find(|link| link.0 == target) {
				Some(link) => link.1 += weight,
				None => targets.push((target, weight)),
			}
		}

		let mut many_to_one = true;
		for (source, targets) in links.iter_mut() {
			targets.sort_by(|a, b| a.0.cmp(&b.0));
			let sum: f64 = targets.iter().map(|link| link.1).sum();
			if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
				return Err(integrity(table, IntegrityProblem::WeightSum{
					source: source.as_str().into(),
					sum,
				}))
			}
			if targets.len() > 1 {
				many_to_one = false;
			}
		}

		Ok(Self{
			from,
			to,
			links,
			many_to_one,
		})
	}

	#[inline(always)]
	pub fn from(&self) -> GeoSystem {
		self.from
	}

	#[inline(always)]
	pub fn to(&self) -> GeoSystem {
		self.to
	}

	pub fn len(&self) -> usize {
		self.links.len()
	}

	pub fn is_empty(&self) -> bool {
		self.links.is_empty()
	}

	/// True if every source maps to exactly one target.
	pub fn is_many_to_one(&self) -> bool {
		self.many_to_one
	}

	/// Links of `source`. State names are matched regardless of case.
	pub fn get(&self, source: &GeoCode) -> Option<&[(GeoCode, f64)]> {
		if let Some(links) = self.links.get(source) {
			return Some(&links[..])
		}
		if self.from != GeoSystem::StateName {
			return None
		}
		self.links.iter()
			.find(|(name, _)| { name.as_str().eq_ignore_ascii_case(source.as_str()) })
			.map(|(_, links)| &links[..])
	}

	pub fn contains(&self, source: &GeoCode) -> bool {
		self.links.contains_key(source)
	}

	pub fn weight_sum(&self, source: &GeoCode) -> Option<f64> {
		Some(self.links.get(source)?.iter().map(|link| link.1).sum())
	}

	pub fn sources(&self) -> std::collections::hash_map::Keys<'_, GeoCode, Vec<(GeoCode, f64)>> {
		self.links.keys()
	}

	pub fn targets(&self) -> BTreeSet<GeoCode> {
		self.links.values().flat_map(|v| v.iter().map(|link| link.0.clone())).collect()
	}

	/// All entries, ordered by source and target.
	pub fn entries(&self) -> Vec<CrosswalkEntry> {
		let mut result: Vec<CrosswalkEntry> = self.links.iter().flat_map(|(source, targets)| {
			targets.iter().map(move |(target, weight)| CrosswalkEntry{
				source: source.clone(),
				target: target.clone(),
				weight: *weight,
			})
		}).collect();
		result.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));
		result
	}
}


/// Read the rows of a link table. Headers are matched case-insensitively;
/// a missing `weight` column means every link has weight 1.
pub fn read_links<R: io::Read>(table: Table, r: R) -> Result<Vec<CrosswalkEntry>> {
	let layout = match table.link_layout() {
		Some(l) => l,
		None => return Err(integrity(table, IntegrityProblem::MissingColumn("source"))),
	};
	let mut r = csv::Reader::from_reader(r);
	let headers = r.headers()?.clone();
	let column = |names: &[&'static str]| -> Result<usize> {
		headers.iter()
			.position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
			.ok_or_else(|| integrity(table, IntegrityProblem::MissingColumn(names[0])))
	};
	let source_i = column(layout.source)?;
	let target_i = column(layout.target)?;
	let weight_i = headers.iter().position(|h| h.trim().eq_ignore_ascii_case("weight"));

	let mut result = Vec::new();
	for row in r.records() {
		let rec = row?;
		let field = |i: usize| rec.get(i).unwrap_or("");
		let source = normalize(field(source_i), layout.source_system)
			.map_err(|e| integrity(table, IntegrityProblem::Code(e)))?;
		let target = normalize(field(target_i), layout.target_system)
			.map_err(|e| integrity(table, IntegrityProblem::Code(e)))?;
		let weight = match weight_i {
			Some(i) => {
				let raw = field(i).trim();
				raw.parse::<f64>().map_err(|_| integrity(table, IntegrityProblem::BadWeight(raw.into())))?
			},
			None => 1.0,
		};
		result.push(CrosswalkEntry{source, target, weight});
	}
	Ok(result)
}


#[derive(Debug, Clone, Deserialize)]
struct RawStateRow {
	#[serde(alias = "st_code")]
	state_code: String,
	state_id: String,
	state_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateInfo {
	pub code: GeoCode,
	pub id: GeoCode,
	pub name: GeoCode,
}

pub fn read_states<R: io::Read>(r: R) -> Result<Vec<StateInfo>> {
	let table = Table::StateCodes;
	let mut r = csv::Reader::from_reader(r);
	let mut result = Vec::new();
	for row in r.deserialize() {
		let rec: RawStateRow = row?;
		let code = |raw: &str, system| normalize(raw, system).map_err(|e| integrity(table, IntegrityProblem::Code(e)));
		result.push(StateInfo{
			code: code(&rec.state_code, GeoSystem::StateCode)?,
			id: code(&rec.state_id, GeoSystem::StateId)?,
			name: code(&rec.state_name, GeoSystem::StateName)?,
		});
	}
	Ok(result)
}
