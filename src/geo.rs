use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use smartstring::alias::{String as SmartString};

use enum_map::{Enum};


pub static NATION_CODE: &'static str = "us";
static MEGACOUNTY_SUFFIX: &'static str = "000";


/// Coordinate system a [`GeoCode`] lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Enum)]
#[serde(rename_all = "snake_case")]
pub enum GeoSystem {
	Zip,
	Fips,
	StateCode,
	StateId,
	StateName,
	Msa,
	Hrr,
	Hhs,
	Nation,
}

impl GeoSystem {
	pub fn name(&self) -> &'static str {
		match self {
			Self::Zip => "zip",
			Self::Fips => "fips",
			Self::StateCode => "state_code",
			Self::StateId => "state_id",
			Self::StateName => "state_name",
			Self::Msa => "msa",
			Self::Hrr => "hrr",
			Self::Hhs => "hhs",
			Self::Nation => "nation",
		}
	}

	/// Fixed width of the zero-padded numeric form, if the system has one.
	pub fn width(&self) -> Option<usize> {
		match self {
			Self::Zip | Self::Fips | Self::Msa => Some(5),
			Self::StateCode => Some(2),
			_ => None,
		}
	}

	pub fn is_numeric(&self) -> bool {
		match self {
			Self::StateId | Self::StateName | Self::Nation => false,
			_ => true,
		}
	}

	pub fn all() -> [GeoSystem; 9] {
		[
			Self::Zip,
			Self::Fips,
			Self::StateCode,
			Self::StateId,
			Self::StateName,
			Self::Msa,
			Self::Hrr,
			Self::Hhs,
			Self::Nation,
		]
	}
}

impl fmt::Display for GeoSystem {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.write_str(self.name())
	}
}

#[derive(Debug, Clone)]
pub struct UnknownGeoSystem(pub String);

impl fmt::Display for UnknownGeoSystem {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		write!(f, "unknown geographic system {:?}", self.0)
	}
}

impl std::error::Error for UnknownGeoSystem {}

impl FromStr for GeoSystem {
	type Err = UnknownGeoSystem;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		for system in Self::all().iter() {
			if s.eq_ignore_ascii_case(system.name()) {
				return Ok(*system)
			}
		}
		match s.to_ascii_lowercase().as_str() {
			"county" => Ok(Self::Fips),
			"state" => Ok(Self::StateId),
			"st_code" => Ok(Self::StateCode),
			_ => Err(UnknownGeoSystem(s.into())),
		}
	}
}


/// A code that could not be coerced into the canonical form of its system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidCode {
	pub value: SmartString,
	pub system: GeoSystem,
}

impl fmt::Display for InvalidCode {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		write!(f, "{:?} is not a valid {} code", self.value, self.system)
	}
}

impl std::error::Error for InvalidCode {}


/// Canonical, fixed-width string form of a geographic identifier.
///
/// Codes are only ever built through [`normalize`] (or derived from other
/// canonical codes), so two codes of the same system compare equal iff they
/// denote the same place.
#[repr(transparent)]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeoCode(SmartString);

impl GeoCode {
	pub fn as_str(&self) -> &str {
		self.0.as_str()
	}

	pub fn nation() -> Self {
		Self(NATION_CODE.into())
	}

	/// Synthetic county code which collects all merged counties of a state.
	pub fn megacounty(state_code: &GeoCode) -> Self {
		let mut s = state_code.0.clone();
		s.push_str(MEGACOUNTY_SUFFIX);
		Self(s)
	}

	pub fn is_megacounty(&self) -> bool {
		self.0.len() == 5 && self.0.ends_with(MEGACOUNTY_SUFFIX)
	}
}

impl Deref for GeoCode {
	type Target = str;

	fn deref(&self) -> &Self::Target {
		self.0.as_str()
	}
}

impl AsRef<str> for GeoCode {
	fn as_ref(&self) -> &str {
		self.0.as_str()
	}
}

impl fmt::Display for GeoCode {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.write_str(&self.0)
	}
}


fn parse_numeric(s: &str) -> Option<u64> {
	// "1123.0" is what spreadsheet exports make of integer columns with gaps
	let digits = match s.split_once('.') {
		Some((int, frac)) if !frac.is_empty() && frac.bytes().all(|b| b == b'0') => int,
		Some(_) => return None,
		None => s,
	};
	if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
		return None
	}
	digits.parse::<u64>().ok()
}

fn format_numeric(value: u64, system: GeoSystem) -> Option<GeoCode> {
	match system.width() {
		Some(width) => {
			if value >= 10u64.pow(width as u32) {
				return None
			}
			Some(GeoCode(format!("{:0width$}", value, width = width).into()))
		},
		None => {
			if value == 0 {
				return None
			}
			Some(GeoCode(format!("{}", value).into()))
		},
	}
}

/// Coerce a raw code into the canonical form of `system`.
///
/// Numeric systems accept integers with or without leading zeros (and
/// integral floats such as `"1123.0"`); county, ZIP and MSA codes come out
/// zero-padded to five digits, state codes to two. State ids are two
/// letters, canonically lowercase.
pub fn normalize(raw: &str, system: GeoSystem) -> Result<GeoCode, InvalidCode> {
	let s = raw.trim();
	let invalid = || InvalidCode{value: raw.into(), system};
	match system {
		GeoSystem::StateId => {
			if s.len() == 2 && s.bytes().all(|b| b.is_ascii_alphabetic()) {
				Ok(GeoCode(s.to_ascii_lowercase().into()))
			} else {
				Err(invalid())
			}
		},
		GeoSystem::StateName => {
			if s.is_empty() {
				Err(invalid())
			} else {
				Ok(GeoCode(s.into()))
			}
		},
		GeoSystem::Nation => {
			if s.eq_ignore_ascii_case(NATION_CODE) {
				Ok(GeoCode::nation())
			} else {
				Err(invalid())
			}
		},
		_ => {
			let value = parse_numeric(s).ok_or_else(invalid)?;
			format_numeric(value, system).ok_or_else(invalid)
		},
	}
}

pub fn normalize_int(value: i64, system: GeoSystem) -> Result<GeoCode, InvalidCode> {
	let invalid = || InvalidCode{value: format!("{}", value).into(), system};
	if value < 0 || !system.is_numeric() {
		return Err(invalid())
	}
	format_numeric(value as u64, system).ok_or_else(invalid)
}

/// State code prefix of a county code. Codes shorter than two characters
/// are returned whole.
pub fn to_state_code(county: &GeoCode) -> GeoCode {
	let s = county.as_str();
	match s.char_indices().nth(2) {
		Some((end, _)) => GeoCode(s[..end].into()),
		None => county.clone(),
	}
}


#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pads_integer_fips() {
		assert_eq!(normalize("1123", GeoSystem::Fips).unwrap().as_str(), "01123");
		assert_eq!(normalize_int(1123, GeoSystem::Fips).unwrap().as_str(), "01123");
		assert_eq!(normalize(" 18181 ", GeoSystem::Fips).unwrap().as_str(), "18181");
		assert_eq!(normalize("1123.0", GeoSystem::Fips).unwrap().as_str(), "01123");
		assert_eq!(normalize("6", GeoSystem::StateCode).unwrap().as_str(), "06");
	}

	#[test]
	fn rejects_garbage() {
		assert!(normalize("", GeoSystem::Fips).is_err());
		assert!(normalize("12a45", GeoSystem::Zip).is_err());
		assert!(normalize("123456", GeoSystem::Fips).is_err());
		assert!(normalize("1123.5", GeoSystem::Fips).is_err());
		assert!(normalize("-1", GeoSystem::Fips).is_err());
		assert!(normalize_int(-5, GeoSystem::Fips).is_err());
		assert!(normalize_int(100, GeoSystem::StateCode).is_err());
		assert!(normalize("0", GeoSystem::Hhs).is_err());
		assert!(normalize("ind", GeoSystem::StateId).is_err());
		assert!(normalize("usa", GeoSystem::Nation).is_err());
		assert!(normalize_int(5, GeoSystem::StateId).is_err());
	}

	#[test]
	fn normalize_is_idempotent() {
		let cases = [
			("1123", GeoSystem::Fips),
			("001123", GeoSystem::Fips),
			("95616", GeoSystem::Zip),
			("IN", GeoSystem::StateId),
			("007", GeoSystem::Hhs),
			("10180", GeoSystem::Msa),
			("US", GeoSystem::Nation),
			(" Indiana ", GeoSystem::StateName),
		];
		for (raw, system) in cases.iter() {
			let once = normalize(raw, *system).unwrap();
			let twice = normalize(&once, *system).unwrap();
			assert_eq!(once, twice);
		}
		assert_eq!(normalize("007", GeoSystem::Hhs).unwrap().as_str(), "7");
		assert_eq!(normalize("IN", GeoSystem::StateId).unwrap().as_str(), "in");
	}

	#[test]
	fn state_prefix() {
		for raw in ["01123", "18181", "72005", "98633"].iter() {
			let code = normalize(raw, GeoSystem::Fips).unwrap();
			assert_eq!(to_state_code(&code).as_str(), &raw[..2]);
		}
	}

	#[test]
	fn megacounty_codes() {
		let st = normalize("1", GeoSystem::StateCode).unwrap();
		let mega = GeoCode::megacounty(&st);
		assert_eq!(mega.as_str(), "01000");
		assert!(mega.is_megacounty());
		assert!(!normalize("1001", GeoSystem::Fips).unwrap().is_megacounty());
		assert_eq!(to_state_code(&mega), st);
	}

	#[test]
	fn parses_system_names() {
		assert_eq!("fips".parse::<GeoSystem>().unwrap(), GeoSystem::Fips);
		assert_eq!("county".parse::<GeoSystem>().unwrap(), GeoSystem::Fips);
		assert_eq!("State_ID".parse::<GeoSystem>().unwrap(), GeoSystem::StateId);
		assert!("galaxy".parse::<GeoSystem>().is_err());
	}
}
