use std::collections::HashMap;

use log::{debug, info};

use chrono::NaiveDate;

use super::config::{ColumnConfig, ColumnLayout, Derived, MissingPolicy};
use super::error::Result;
use super::geo::{GeoCode, GeoSystem};
use super::measure::{MeasureRow, MeasureTable};
use super::store::{CrosswalkStore, Route};


/// One input row matched against one crosswalk link.
#[derive(Debug, Clone, PartialEq)]
pub struct FannedRow {
	pub source: GeoCode,
	pub target: GeoCode,
	pub date: NaiveDate,
	pub weight: f64,
	/// Input columns; additive ones are scaled by `weight`.
	pub values: Vec<f64>,
}


#[derive(Debug, Clone, Copy, Default)]
struct Sum {
	total: f64,
	present: bool,
	missing: bool,
}

impl Sum {
	fn add(&mut self, v: f64) {
		if v.is_nan() {
			self.missing = true;
		} else {
			self.total += v;
			self.present = true;
		}
	}

	fn value(&self, policy: MissingPolicy) -> f64 {
		match policy {
			MissingPolicy::Propagate if self.missing => f64::NAN,
			MissingPolicy::Skip if !self.present && self.missing => f64::NAN,
			_ => self.total,
		}
	}
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
	if denominator == 0. {
		f64::NAN
	} else {
		numerator / denominator
	}
}


/// Running sums of one output group.
#[derive(Debug, Clone)]
pub(crate) struct Accumulator {
	sums: Vec<Sum>,
	// (sum of weight times value, sum of weights) per derived column
	means: Vec<(Sum, Sum)>,
}

impl Accumulator {
	pub(crate) fn new(layout: &ColumnLayout) -> Self {
		Self{
			sums: vec![Sum::default(); layout.additive.len()],
			means: vec![(Sum::default(), Sum::default()); layout.derived.len()],
		}
	}

	/// Add an input row with all its columns unscaled.
	pub(crate) fn add(&mut self, layout: &ColumnLayout, values: &[f64], weight: f64, policy: MissingPolicy) {
		for (sum, input) in self.sums.iter_mut().zip(layout.additive.iter()) {
			sum.add(values[*input] * weight);
		}
		for ((num, den), derived) in self.means.iter_mut().zip(layout.derived.iter()) {
			if let Derived::WeightedMean{input} = derived {
				let v = values[*input];
				if v.is_nan() {
					if policy == MissingPolicy::Propagate {
						num.add(v);
					}
				} else {
					num.add(v * weight);
					den.add(weight);
				}
			}
		}
	}

	pub(crate) fn finish(&self, layout: &ColumnLayout, policy: MissingPolicy) -> Vec<f64> {
		let additive: Vec<f64> = self.sums.iter().map(|sum| { sum.value(policy) }).collect();
		let mut result = additive.clone();
		for ((num, den), derived) in self.means.iter().zip(layout.derived.iter()) {
			result.push(match derived {
				Derived::Ratio{numerator, denominator} => ratio(additive[*numerator], additive[*denominator]),
				Derived::WeightedMean{..} => ratio(num.value(MissingPolicy::Propagate), den.total),
			});
		}
		result
	}
}


/// Memoized route resolution per distinct source code.
struct Resolver<'r> {
	route: &'r Route,
	cache: HashMap<GeoCode, Vec<(GeoCode, f64)>>,
}

impl<'r> Resolver<'r> {
	fn new(route: &'r Route) -> Self {
		Self{
			route,
			cache: HashMap::new(),
		}
	}

	fn get(&mut self, code: &GeoCode) -> &[(GeoCode, f64)] {
		let route = self.route;
		self.cache.entry(code.clone()).or_insert_with(|| { route.resolve(code) })
	}
}


/// Join every row against the crosswalk route from the table's system to
/// `to`, producing one row per matching link.
///
/// Rows whose code has no link are left out.
pub fn fan_out(store: &CrosswalkStore, table: &MeasureTable, to: GeoSystem, config: &ColumnConfig) -> Result<Vec<FannedRow>> {
	let layout = config.validate(table.columns())?;
	let route = store.route(table.system(), to)?;
	let mut resolver = Resolver::new(&route);
	let mut result = Vec::new();
	for row in table.rows() {
		for (target, weight) in resolver.get(&row.geo) {
			let mut values = row.values.clone();
			for input in layout.additive.iter() {
				values[*input] *= *weight;
			}
			result.push(FannedRow{
				source: row.geo.clone(),
				target: target.clone(),
				date: row.date,
				weight: *weight,
				values,
			});
		}
	}
	Ok(result)
}


/// Re-key `table` to the system `to` and sum per (target, date).
///
/// Additive columns are scaled by the crosswalk weight of each link before
/// summing. Ratio columns are recomputed from the aggregated additive
/// columns and weighted means are averaged with the link weights. Rows
/// whose code cannot be mapped are dropped. The output is sorted by
/// (geo, date) and holds the columns of `config` in output order.
pub fn aggregate(
	store: &CrosswalkStore,
	table: &MeasureTable,
	to: GeoSystem,
	config: &ColumnConfig,
	missing: MissingPolicy,
) -> Result<MeasureTable> {
	let layout = config.validate(table.columns())?;
	let route = store.route(table.system(), to)?;
	if route.is_identity() {
		debug!("{} rows already keyed by {}, grouping only", table.len(), to);
	}
	let mut resolver = Resolver::new(&route);
	let mut groups: HashMap<(GeoCode, NaiveDate), Accumulator> = HashMap::new();
	let mut unmapped = 0usize;
	for row in table.rows() {
		let targets = resolver.get(&row.geo);
		if targets.is_empty() {
			unmapped += 1;
			continue;
		}
		for (target, weight) in targets {
			groups.entry((target.clone(), row.date))
				.or_insert_with(|| { Accumulator::new(&layout) })
				.add(&layout, &row.values, *weight, missing);
		}
	}
	if unmapped > 0 {
		info!("{} of {} rows could not be mapped from {} to {}", unmapped, table.len(), table.system(), to);
	}

	let mut result = MeasureTable::new(to, layout.names.clone());
	let mut keys: Vec<_> = groups.into_iter().collect();
	keys.sort_by(|a, b| { (a.0).cmp(&b.0) });
	for ((geo, date), acc) in keys {
		result.push(MeasureRow{
			geo,
			date,
			values: acc.finish(&layout, missing),
		});
	}
	debug!("aggregated {} {} rows into {} {} rows", table.len(), table.system(), result.len(), to);
	Ok(result)
}


#[cfg(test)]
mod tests {
	use super::*;

	use super::super::config::InvalidCodePolicy;
	use super::super::store::StaticSource;
	use super::super::crosswalk::Table;

	fn d(day: u32) -> NaiveDate {
		NaiveDate::from_ymd(2020, 6, day)
	}

	fn store() -> CrosswalkStore {
		CrosswalkStore::new(StaticSource::new()
			.with(Table::ZipFips, "zip,fips,weight\n45140,39025,0.25\n45140,39061,0.75\n95616,06113,1\n")
			.with(Table::StateCodes, "state_code,state_id,state_name\n06,ca,California\n39,oh,Ohio\n")
		)
	}

	fn table(rows: Vec<(&str, NaiveDate, Vec<f64>)>) -> MeasureTable {
		MeasureTable::from_raw(GeoSystem::Zip, vec!["count".into(), "total".into(), "age".into()], rows, InvalidCodePolicy::Abort).unwrap()
	}

	#[test]
	fn fans_out_with_weights() {
		let config = ColumnConfig::new("zip", "date", &["count"]).with_weighted_mean("age");
		let input = table(vec![
			("45140", d(1), vec![8., 100., 40.]),
			("99999", d(1), vec![1., 1., 1.]),
		]);
		let rows = fan_out(&store(), &input, GeoSystem::Fips, &config).unwrap();
		assert_eq!(rows.len(), 2);
		assert_eq!(rows[0].target.as_str(), "39025");
		assert_eq!(rows[0].weight, 0.25);
		assert_eq!(rows[0].values, vec![2., 100., 40.]);
		assert_eq!(rows[1].values, vec![6., 100., 40.]);
	}

	#[test]
	fn recomputes_non_additive_columns() {
		let config = ColumnConfig::new("zip", "date", &["count", "total"])
			.with_ratio("rate", "count", "total")
			.with_weighted_mean("age");
		let input = table(vec![
			("45140", d(1), vec![8., 100., 40.]),
			("95616", d(1), vec![1., 0., 20.]),
		]);
		let out = aggregate(&store(), &input, GeoSystem::StateId, &config, MissingPolicy::Propagate).unwrap();
		assert_eq!(out.columns().len(), 4);
		let ca = out.find("ca", d(1)).unwrap();
		assert_eq!(ca.values[..2], [1., 0.]);
		assert!(ca.values[2].is_nan());
		assert_eq!(ca.values[3], 20.);
		let oh = out.find("oh", d(1)).unwrap();
		assert_eq!(oh.values, vec![8., 100., 0.08, 40.]);
	}

	#[test]
	fn missing_values_follow_policy() {
		let config = ColumnConfig::new("zip", "date", &["count", "total"]);
		let input = table(vec![
			("95616", d(1), vec![f64::NAN, 3., 0.]),
			("45140", d(1), vec![4., f64::NAN, 0.]),
		]);
		let out = aggregate(&store(), &input, GeoSystem::Nation, &config, MissingPolicy::Propagate).unwrap();
		assert_eq!(out.len(), 1);
		assert!(out.rows()[0].values[0].is_nan());
		assert!(out.rows()[0].values[1].is_nan());

		let out = aggregate(&store(), &input, GeoSystem::Nation, &config, MissingPolicy::Skip).unwrap();
		assert_eq!(out.rows()[0].values, vec![4., 3.]);

		let input = table(vec![("95616", d(1), vec![f64::NAN, 3., 0.])]);
		let out = aggregate(&store(), &input, GeoSystem::Fips, &config, MissingPolicy::Skip).unwrap();
		assert!(out.rows()[0].values[0].is_nan());
	}

	#[test]
	fn drops_unmapped_rows() {
		let config = ColumnConfig::new("zip", "date", &["count"]);
		let input = table(vec![
			("12345", d(1), vec![5., 0., 0.]),
			("95616", d(2), vec![1., 0., 0.]),
		]);
		let out = aggregate(&store(), &input, GeoSystem::Fips, &config, MissingPolicy::Propagate).unwrap();
		assert_eq!(out.len(), 1);
		assert_eq!(out.rows()[0].geo.as_str(), "06113");
		assert_eq!(out.rows()[0].date, d(2));
	}
}
