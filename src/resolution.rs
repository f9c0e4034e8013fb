use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use chrono::NaiveDate;

use super::aggregate::aggregate;
use super::config::{ColumnConfig, MegacountyConfig, MissingPolicy};
use super::error::Result;
use super::geo::GeoSystem;
use super::measure::MeasureTable;
use super::megacounty::merge;
use super::store::CrosswalkStore;


/// Geographic level an indicator is reported at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
	County,
	State,
	Msa,
	Hrr,
	Hhs,
	Nation,
}

impl Resolution {
	pub fn name(&self) -> &'static str {
		match self {
			Self::County => "county",
			Self::State => "state",
			Self::Msa => "msa",
			Self::Hrr => "hrr",
			Self::Hhs => "hhs",
			Self::Nation => "nation",
		}
	}

	/// System the codes of this level are expressed in.
	pub fn system(&self) -> GeoSystem {
		match self {
			Self::County => GeoSystem::Fips,
			Self::State => GeoSystem::StateId,
			Self::Msa => GeoSystem::Msa,
			Self::Hrr => GeoSystem::Hrr,
			Self::Hhs => GeoSystem::Hhs,
			Self::Nation => GeoSystem::Nation,
		}
	}

	pub fn all() -> [Resolution; 6] {
		[
			Self::County,
			Self::State,
			Self::Msa,
			Self::Hrr,
			Self::Hhs,
			Self::Nation,
		]
	}
}

impl fmt::Display for Resolution {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.write_str(self.name())
	}
}

#[derive(Debug, Clone)]
pub struct UnknownResolution(pub String);

impl fmt::Display for UnknownResolution {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		write!(f, "{:?} is invalid, pick one of county, state, msa, hrr, hhs, nation", self.0)
	}
}

impl std::error::Error for UnknownResolution {}

impl FromStr for Resolution {
	type Err = UnknownResolution;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		let s = s.trim();
		for resolution in Self::all().iter() {
			if s.eq_ignore_ascii_case(resolution.name()) {
				return Ok(*resolution)
			}
		}
		Err(UnknownResolution(s.into()))
	}
}


/// Map a table to `resolution` and fill in every (geo, date) pair.
///
/// Counties go through the megacounty merge, all other levels are plain
/// aggregations. The result covers every day of `dates` (or of the
/// aggregated table's own date range) for every geo present after mapping,
/// with zero in place of absent or missing values.
pub fn geo_reindex(
	store: &CrosswalkStore,
	table: &MeasureTable,
	resolution: Resolution,
	columns: &ColumnConfig,
	megacounty: &MegacountyConfig,
	missing: MissingPolicy,
	dates: Option<(NaiveDate, NaiveDate)>,
) -> Result<MeasureTable> {
	let mapped = match resolution {
		Resolution::County => {
			let counties = aggregate(store, table, GeoSystem::Fips, columns, missing)?;
			merge(&counties, columns, megacounty, missing)?
		},
		_ => aggregate(store, table, resolution.system(), columns, missing)?,
	};
	let (start, last) = match dates.or_else(|| { mapped.date_range() }) {
		Some(range) => range,
		None => return Ok(mapped),
	};
	let mut result = mapped.reindexed(start, last);
	result.fill_missing();
	Ok(result)
}


#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_names() {
		assert_eq!("county".parse::<Resolution>().unwrap(), Resolution::County);
		assert_eq!(" HHS".parse::<Resolution>().unwrap(), Resolution::Hhs);
		assert!("hss".parse::<Resolution>().is_err());
		for resolution in Resolution::all().iter() {
			assert_eq!(resolution.to_string().parse::<Resolution>().unwrap(), *resolution);
		}
		assert_eq!(Resolution::State.system(), GeoSystem::StateId);
	}
}
