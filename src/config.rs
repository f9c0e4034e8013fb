use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use smartstring::alias::{String as SmartString};

use super::error::{ColumnError, Result};


/// What to do with a row whose geographic code cannot be normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidCodePolicy {
	/// Drop the row and log a warning.
	Drop,
	/// Fail the whole batch.
	Abort,
}

impl Default for InvalidCodePolicy {
	fn default() -> Self {
		Self::Drop
	}
}


/// How missing (NaN) contributions combine when rows are summed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
	/// Any missing contribution makes the sum missing.
	Propagate,
	/// Missing contributions are left out; a sum without any present
	/// contribution stays missing.
	Skip,
}

impl Default for MissingPolicy {
	fn default() -> Self {
		Self::Propagate
	}
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum NonAdditiveRule {
	/// Recomputed from two aggregated additive columns.
	Ratio{numerator: SmartString, denominator: SmartString},
	/// Averaged with the crosswalk weights. This is an approximation.
	WeightedMean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonAdditiveColumn {
	pub name: SmartString,
	#[serde(flatten)]
	pub rule: NonAdditiveRule,
}


/// Names of the columns of a measure table and how each one aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnConfig {
	pub geo_column: SmartString,
	pub date_column: SmartString,
	#[serde(default)]
	pub additive: Vec<SmartString>,
	#[serde(default)]
	pub non_additive: Vec<NonAdditiveColumn>,
}

impl ColumnConfig {
	pub fn new(geo_column: &str, date_column: &str, additive: &[&str]) -> Self {
		Self{
			geo_column: geo_column.into(),
			date_column: date_column.into(),
			additive: additive.iter().map(|name| { (*name).into() }).collect(),
			non_additive: Vec::new(),
		}
	}

	pub fn with_ratio(mut self, name: &str, numerator: &str, denominator: &str) -> Self {
		self.non_additive.push(NonAdditiveColumn{
			name: name.into(),
			rule: NonAdditiveRule::Ratio{
				numerator: numerator.into(),
				denominator: denominator.into(),
			},
		});
		self
	}

	pub fn with_weighted_mean(mut self, name: &str) -> Self {
		self.non_additive.push(NonAdditiveColumn{
			name: name.into(),
			rule: NonAdditiveRule::WeightedMean,
		});
		self
	}

	/// Measure columns which have to be present in an input table.
	///
	/// Ratio columns are recomputed and therefore never read.
	pub fn input_columns(&self) -> Vec<SmartString> {
		let mut result = self.additive.clone();
		for column in self.non_additive.iter() {
			if let NonAdditiveRule::WeightedMean = column.rule {
				result.push(column.name.clone());
			}
		}
		result
	}

	/// Output columns in order: additive columns, then non-additive ones.
	pub fn output_columns(&self) -> Vec<SmartString> {
		self.additive.iter().cloned().chain(self.non_additive.iter().map(|c| { c.name.clone() })).collect()
	}

	/// Check the configuration against the columns of an input table.
	pub fn validate(&self, columns: &[SmartString]) -> Result<ColumnLayout> {
		if self.additive.is_empty() && self.non_additive.is_empty() {
			return Err(ColumnError::Empty.into())
		}
		let mut seen = HashSet::new();
		for name in self.output_columns() {
			if name == self.geo_column || name == self.date_column || !seen.insert(name.clone()) {
				return Err(ColumnError::Duplicate(name).into())
			}
		}

		let find = |name: &SmartString| -> Result<usize> {
			match columns.iter().position(|c| { c == name }) {
				Some(i) => Ok(i),
				None => Err(ColumnError::Unknown(name.clone()).into()),
			}
		};
		let additive_position = |column: &SmartString, operand: &SmartString| -> Result<usize> {
			match self.additive.iter().position(|c| { c == operand }) {
				Some(i) => Ok(i),
				None => Err(ColumnError::NotAdditive{
					column: column.clone(),
					operand: operand.clone(),
				}.into()),
			}
		};

		let mut additive = Vec::with_capacity(self.additive.len());
		for name in self.additive.iter() {
			additive.push(find(name)?);
		}
		let mut derived = Vec::with_capacity(self.non_additive.len());
		for column in self.non_additive.iter() {
			derived.push(match &column.rule {
				NonAdditiveRule::Ratio{numerator, denominator} => Derived::Ratio{
					numerator: additive_position(&column.name, numerator)?,
					denominator: additive_position(&column.name, denominator)?,
				},
				NonAdditiveRule::WeightedMean => Derived::WeightedMean{
					input: find(&column.name)?,
				},
			});
		}

		Ok(ColumnLayout{
			names: self.output_columns(),
			additive,
			derived,
		})
	}
}


#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Derived {
	/// Positions among the additive output columns.
	Ratio{numerator: usize, denominator: usize},
	/// Position in the input table.
	WeightedMean{input: usize},
}

/// A [`ColumnConfig`] resolved against the columns of one input table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnLayout {
	pub(crate) names: Vec<SmartString>,
	pub(crate) additive: Vec<usize>,
	pub(crate) derived: Vec<Derived>,
}

impl ColumnLayout {
	pub fn names(&self) -> &[SmartString] {
		&self.names
	}

	/// Names of the additive output columns.
	pub fn additive_names(&self) -> &[SmartString] {
		&self.names[..self.additive.len()]
	}
}


/// Parameters of the megacounty merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MegacountyConfig {
	/// Counties whose trailing average reaches this value are kept.
	pub threshold: f64,
	/// Length of the trailing window in days, including the current day.
	pub window_days: u32,
	/// Column the trailing average is computed on, typically the denominator.
	pub threshold_column: SmartString,
	/// Relative tolerance for the conservation check, if it should run.
	#[serde(default)]
	pub tolerance: Option<f64>,
}

impl MegacountyConfig {
	pub fn new(threshold: f64, window_days: u32, threshold_column: &str) -> Self {
		Self{
			threshold,
			window_days,
			threshold_column: threshold_column.into(),
			tolerance: None,
		}
	}

	pub fn checked(mut self, tolerance: f64) -> Self {
		self.tolerance = Some(tolerance);
		self
	}
}


#[cfg(test)]
mod tests {
	use super::*;

	use super::super::error::Error;

	fn columns(names: &[&str]) -> Vec<SmartString> {
		names.iter().map(|n| { (*n).into() }).collect()
	}

	#[test]
	fn resolves_layout() {
		let config = ColumnConfig::new("zip", "timestamp", &["count", "total"])
			.with_ratio("rate", "count", "total")
			.with_weighted_mean("age");
		let layout = config.validate(&columns(&["age", "total", "count"])).unwrap();
		assert_eq!(layout.names(), &columns(&["count", "total", "rate", "age"])[..]);
		assert_eq!(layout.additive, vec![2, 1]);
		assert_eq!(layout.derived, vec![
			Derived::Ratio{numerator: 0, denominator: 1},
			Derived::WeightedMean{input: 0},
		]);
		assert_eq!(layout.additive_names(), &columns(&["count", "total"])[..]);
		assert_eq!(config.input_columns(), columns(&["count", "total", "age"]));
	}

	#[test]
	fn rejects_bad_configs() {
		let cols = columns(&["count", "total"]);
		match ColumnConfig::new("zip", "date", &[]).validate(&cols) {
			Err(Error::Column(ColumnError::Empty)) => (),
			other => panic!("unexpected result: {:?}", other),
		}
		match ColumnConfig::new("zip", "date", &["count", "count"]).validate(&cols) {
			Err(Error::Column(ColumnError::Duplicate(name))) => assert_eq!(name.as_str(), "count"),
			other => panic!("unexpected result: {:?}", other),
		}
		match ColumnConfig::new("zip", "date", &["deaths"]).validate(&cols) {
			Err(Error::Column(ColumnError::Unknown(name))) => assert_eq!(name.as_str(), "deaths"),
			other => panic!("unexpected result: {:?}", other),
		}
		let ratio_of_rate = ColumnConfig::new("zip", "date", &["count"]).with_ratio("rate", "count", "total");
		match ratio_of_rate.validate(&cols) {
			Err(Error::Column(ColumnError::NotAdditive{operand, ..})) => assert_eq!(operand.as_str(), "total"),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn policies_default() {
		assert_eq!(InvalidCodePolicy::default(), InvalidCodePolicy::Drop);
		assert_eq!(MissingPolicy::default(), MissingPolicy::Propagate);
	}
}
