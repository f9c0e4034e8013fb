use std::collections::BTreeMap;

use log::{debug, trace};

use chrono::NaiveDate;

use rayon::prelude::*;

use smartstring::alias::{String as SmartString};

use super::aggregate::Accumulator;
use super::config::{ColumnConfig, ColumnLayout, MegacountyConfig, MissingPolicy};
use super::error::{ColumnError, Error, Result};
use super::geo::{to_state_code, GeoCode, GeoSystem};
use super::measure::{MeasureRow, MeasureTable};
use super::timeseries::{FGauge, Panel};


struct StateMerge<'p> {
	panel: &'p Panel,
	averages: &'p FGauge<GeoCode>,
	layout: &'p ColumnLayout,
	days: &'p [(usize, NaiveDate)],
	threshold: f64,
	missing: MissingPolicy,
}

impl<'p> StateMerge<'p> {
	fn run(&self, state: &GeoCode, counties: &[&GeoCode]) -> Vec<MeasureRow> {
		let mega = GeoCode::megacounty(state);
		let mut rows = Vec::new();
		let mut merged: Vec<Option<Accumulator>> = vec![None; self.days.len()];
		let mut nmerged = 0usize;
		for county in counties.iter() {
			for (slot, (i, date)) in self.days.iter().enumerate() {
				let values = self.panel.values(county, *i);
				let average = self.averages.get_value(county, *i).unwrap_or(0.);
				if average >= self.threshold && **county != mega {
					let mut acc = Accumulator::new(self.layout);
					acc.add(self.layout, &values, 1.0, self.missing);
					rows.push(MeasureRow{
						geo: (*county).clone(),
						date: *date,
						values: acc.finish(self.layout, self.missing),
					});
				} else {
					nmerged += 1;
					merged[slot].get_or_insert_with(|| { Accumulator::new(self.layout) })
						.add(self.layout, &values, 1.0, self.missing);
				}
			}
		}
		trace!("state {}: {} county-days kept, {} merged into {}", state, rows.len(), nmerged, mega);
		for (acc, (_, date)) in merged.into_iter().zip(self.days.iter()) {
			if let Some(acc) = acc {
				rows.push(MeasureRow{
					geo: mega.clone(),
					date: *date,
					values: acc.finish(self.layout, self.missing),
				});
			}
		}
		rows
	}
}


/// Merge counties with too little data into one megacounty per state.
///
/// The table is first reindexed over its full date range so that trailing
/// windows span calendar days. Output rows are only emitted for dates the
/// input has rows for. On each such date, a county is kept if the trailing average of the threshold column over
/// `window_days` days reaches the threshold; all other counties of the
/// state are summed into the state's megacounty row for that date. Missing
/// values count as zero for the average. States are processed in
/// parallel; the output is sorted by (geo, date).
pub fn merge(
	table: &MeasureTable,
	columns: &ColumnConfig,
	config: &MegacountyConfig,
	missing: MissingPolicy,
) -> Result<MeasureTable> {
	if table.system() != GeoSystem::Fips {
		return Err(Error::UnsupportedConversion{from: table.system(), to: GeoSystem::Fips})
	}
	let layout = columns.validate(table.columns())?;
	let threshold_index = match table.column_index(&config.threshold_column) {
		Some(i) => i,
		None => return Err(ColumnError::Unknown(config.threshold_column.clone()).into()),
	};

	let mut result = MeasureTable::new(GeoSystem::Fips, layout.names.clone());
	let (start, last) = match table.date_range() {
		Some(range) => range,
		None => return Ok(result),
	};
	let panel = Panel::from_table(table, start, last);
	let averages = {
		let mut ts = panel.column(threshold_index).clone();
		ts.fill_missing();
		ts.window_means(config.window_days as usize)
	};
	let days: Vec<(usize, NaiveDate)> = table.dates().into_iter()
		.filter_map(|date| { Some((panel.column(threshold_index).date_index(date)?, date)) })
		.collect();

	let mut states: BTreeMap<GeoCode, Vec<&GeoCode>> = BTreeMap::new();
	for county in panel.geos() {
		states.entry(to_state_code(county)).or_insert_with(Vec::new).push(county);
	}
	let states: Vec<_> = states.into_iter().collect();

	let job = StateMerge{
		panel: &panel,
		averages: &averages,
		layout: &layout,
		days: &days,
		threshold: config.threshold,
		missing,
	};
	let rows: Vec<Vec<MeasureRow>> = states.par_iter()
		.map(|(state, counties)| { job.run(state, counties) })
		.collect();
	for row in rows.into_iter().flatten() {
		result.push(row);
	}
	result.sort();
	debug!("merged {} counties over {} days into {} rows", panel.geos().len(), days.len(), result.len());

	if let Some(tolerance) = config.tolerance {
		check_conservation(table, &result, layout.additive_names(), tolerance)?;
	}
	Ok(result)
}


/// Compare per-date totals of `columns` between two tables.
///
/// Totals match if they differ by at most `tolerance` relative to the
/// input total (or absolutely, for totals below one). Dates on which the
/// input total is missing are not checked.
pub fn check_conservation(
	input: &MeasureTable,
	output: &MeasureTable,
	columns: &[SmartString],
	tolerance: f64,
) -> Result<()> {
	for column in columns.iter() {
		let index = |table: &MeasureTable| -> Result<usize> {
			match table.column_index(column) {
				Some(i) => Ok(i),
				None => Err(ColumnError::Unknown(column.clone()).into()),
			}
		};
		let expected_totals = input.totals_by_date(index(input)?);
		let actual_totals = output.totals_by_date(index(output)?);
		let dates = expected_totals.keys().chain(actual_totals.keys());
		for date in dates {
			let expected = expected_totals.get(date).copied().unwrap_or(0.);
			let actual = actual_totals.get(date).copied().unwrap_or(0.);
			if expected.is_nan() {
				continue;
			}
			if !((expected - actual).abs() <= tolerance * expected.abs().max(1.)) {
				return Err(Error::ConservationViolation{
					column: column.clone(),
					date: *date,
					expected,
					actual,
				})
			}
		}
	}
	Ok(())
}


#[cfg(test)]
mod tests {
	use super::*;

	use super::super::config::InvalidCodePolicy;

	fn d(day: u32) -> NaiveDate {
		NaiveDate::from_ymd(2020, 4, day)
	}

	fn columns() -> ColumnConfig {
		ColumnConfig::new("fips", "date", &["count", "total"])
	}

	fn table(rows: Vec<(&str, NaiveDate, Vec<f64>)>) -> MeasureTable {
		MeasureTable::from_raw(GeoSystem::Fips, vec!["count".into(), "total".into()], rows, InvalidCodePolicy::Abort).unwrap()
	}

	#[test]
	fn window_decides_per_date() {
		// 01001 has a burst on day 2 which keeps it above 10 for three days
		let input = table(vec![
			("01001", d(1), vec![0., 0.]),
			("01001", d(2), vec![3., 30.]),
			("01001", d(5), vec![1., 1.]),
			("01003", d(1), vec![1., 2.]),
		]);
		let config = MegacountyConfig::new(10., 3, "total").checked(1e-9);
		let out = merge(&input, &columns(), &config, MissingPolicy::Propagate).unwrap();
		let kept: Vec<NaiveDate> = out.rows().iter().filter(|r| { r.geo.as_str() == "01001" }).map(|r| { r.date }).collect();
		assert_eq!(kept, vec![d(2)]);
		assert_eq!(out.find("01000", d(1)).unwrap().values, vec![1., 2.]);
		assert_eq!(out.find("01000", d(2)).unwrap().values, vec![0., 0.]);
		assert_eq!(out.find("01000", d(5)).unwrap().values, vec![1., 1.]);
		assert!(out.find("01003", d(1)).is_none());
		assert_eq!(out.len(), 1 + 3);
		assert_eq!(out.dates(), input.dates());
	}

	#[test]
	fn no_rows_on_dates_without_input() {
		let input = table(vec![
			("01001", d(1), vec![4., 4.]),
			("01003", d(1), vec![1., 1.]),
			("01001", d(5), vec![2., 2.]),
			("01003", d(5), vec![3., 3.]),
		]);
		let config = MegacountyConfig::new(10., 1, "total").checked(1e-9);
		let out = merge(&input, &columns(), &config, MissingPolicy::Propagate).unwrap();
		assert_eq!(out.dates(), input.dates());
		assert_eq!(out.len(), 2);
		assert_eq!(out.find("01000", d(1)).unwrap().values, vec![5., 5.]);
		assert_eq!(out.find("01000", d(5)).unwrap().values, vec![5., 5.]);
		assert!(out.find("01000", d(3)).is_none());
	}

	#[test]
	fn input_megacounty_code_folds_into_merged_row() {
		let input = table(vec![
			("01000", d(1), vec![5., 100.]),
			("01003", d(1), vec![1., 2.]),
		]);
		let config = MegacountyConfig::new(10., 1, "total");
		let out = merge(&input, &columns(), &config, MissingPolicy::Propagate).unwrap();
		assert_eq!(out.len(), 1);
		assert_eq!(out.rows()[0].values, vec![6., 102.]);
	}

	#[test]
	fn missing_threshold_column_is_an_error() {
		let input = table(vec![("01001", d(1), vec![0., 0.])]);
		let config = MegacountyConfig::new(10., 1, "population");
		match merge(&input, &columns(), &config, MissingPolicy::Propagate) {
			Err(Error::Column(ColumnError::Unknown(name))) => assert_eq!(name.as_str(), "population"),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn detects_lost_mass() {
		let input = table(vec![("01001", d(1), vec![10., 20.])]);
		let output = table(vec![("01001", d(1), vec![10., 19.])]);
		let names = columns().additive;
		match check_conservation(&input, &output, &names, 1e-3) {
			Err(Error::ConservationViolation{column, date, ..}) => {
				assert_eq!(column.as_str(), "total");
				assert_eq!(date, d(1));
			},
			other => panic!("unexpected result: {:?}", other),
		}
		assert!(check_conservation(&input, &input, &names, 0.).is_ok());
	}
}
