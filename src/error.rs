use std::fmt;
use std::io;

use chrono::NaiveDate;

use smartstring::alias::{String as SmartString};

use super::crosswalk::Table;
use super::geo::{GeoSystem, InvalidCode};


#[derive(Debug)]
pub enum ColumnError {
	Unknown(SmartString),
	Duplicate(SmartString),
	NotAdditive{column: SmartString, operand: SmartString},
	Empty,
	Width{expected: usize, got: usize},
}

impl fmt::Display for ColumnError {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::Unknown(name) => write!(f, "unknown column {:?}", name),
			Self::Duplicate(name) => write!(f, "column {:?} configured more than once", name),
			Self::NotAdditive{column, operand} => write!(f, "ratio column {:?} refers to {:?}, which is not an additive column", column, operand),
			Self::Empty => f.write_str("no measure columns configured"),
			Self::Width{expected, got} => write!(f, "row has {} values for {} columns", got, expected),
		}
	}
}


#[derive(Debug)]
pub enum IntegrityProblem {
	WeightSum{source: SmartString, sum: f64},
	WeightRange{source: SmartString, target: SmartString, weight: f64},
	Code(InvalidCode),
	BadWeight(String),
	MissingColumn(&'static str),
}

impl fmt::Display for IntegrityProblem {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::WeightSum{source, sum} => write!(f, "weights of {} sum to {} instead of 1", source, sum),
			Self::WeightRange{source, target, weight} => write!(f, "weight {} of {} -> {} is outside of (0, 1]", weight, source, target),
			Self::Code(e) => fmt::Display::fmt(e, f),
			Self::BadWeight(raw) => write!(f, "weight {:?} is not a number", raw),
			Self::MissingColumn(name) => write!(f, "missing column {:?}", name),
		}
	}
}


#[derive(Debug)]
pub enum Error {
	DataUnavailable{table: Table, reason: String},
	CrosswalkIntegrity{table: Table, problem: IntegrityProblem},
	InvalidCodeFormat(InvalidCode),
	InvalidDate(String),
	InvalidValue{column: SmartString, value: String},
	UnsupportedConversion{from: GeoSystem, to: GeoSystem},
	NotManyToOne{from: GeoSystem, to: GeoSystem},
	Column(ColumnError),
	ConservationViolation{column: SmartString, date: NaiveDate, expected: f64, actual: f64},
	Csv(csv::Error),
	Io(io::Error),
}

impl fmt::Display for Error {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::DataUnavailable{table, reason} => write!(f, "crosswalk table {} unavailable: {}", table, reason),
			Self::CrosswalkIntegrity{table, problem} => write!(f, "crosswalk table {} is corrupt: {}", table, problem),
			Self::InvalidCodeFormat(e) => fmt::Display::fmt(e, f),
			Self::InvalidDate(value) => write!(f, "{:?} is not a date", value),
			Self::InvalidValue{column, value} => write!(f, "{:?} in column {:?} is not a number", value, column),
			Self::UnsupportedConversion{from, to} => write!(f, "no conversion from {} to {}", from, to),
			Self::NotManyToOne{from, to} => write!(f, "conversion from {} to {} is not single-valued", from, to),
			Self::Column(e) => fmt::Display::fmt(e, f),
			Self::ConservationViolation{column, date, expected, actual} => write!(f, "{} on {} not conserved: expected total {}, got {}", column, date, expected, actual),
			Self::Csv(e) => fmt::Display::fmt(e, f),
			Self::Io(e) => fmt::Display::fmt(e, f),
		}
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Self::Csv(e) => Some(e),
			Self::Io(e) => Some(e),
			Self::InvalidCodeFormat(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for Error {
	fn from(other: io::Error) -> Self {
		Self::Io(other)
	}
}

impl From<csv::Error> for Error {
	fn from(other: csv::Error) -> Self {
		Self::Csv(other)
	}
}

impl From<InvalidCode> for Error {
	fn from(other: InvalidCode) -> Self {
		Self::InvalidCodeFormat(other)
	}
}

impl From<ColumnError> for Error {
	fn from(other: ColumnError) -> Self {
		Self::Column(other)
	}
}

pub type Result<T> = std::result::Result<T, Error>;
