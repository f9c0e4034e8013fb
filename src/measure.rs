use std::collections::{BTreeMap, BTreeSet};
use std::io;

use log::{info, warn};

use chrono::NaiveDate;

use smartstring::alias::{String as SmartString};

use super::config::{ColumnConfig, InvalidCodePolicy};
use super::error::{ColumnError, Error, Result};
use super::geo::{normalize, GeoCode, GeoSystem};
use super::progress::{CountMeter, ProgressSink};
use super::timeseries::Panel;


static PROGRESS_STEP: usize = 100000;


#[derive(Debug, Clone, PartialEq)]
pub struct MeasureRow {
	pub geo: GeoCode,
	pub date: NaiveDate,
	/// One value per column of the owning table; NaN marks a missing value.
	pub values: Vec<f64>,
}


/// Rows of (geo, date, measures) in one geographic system.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureTable {
	system: GeoSystem,
	columns: Vec<SmartString>,
	rows: Vec<MeasureRow>,
}

impl MeasureTable {
	pub fn new(system: GeoSystem, columns: Vec<SmartString>) -> Self {
		Self{
			system,
			columns,
			rows: Vec::new(),
		}
	}

	/// Build a table from raw codes, normalizing each one.
	///
	/// Rows with codes that cannot be normalized are handled according to
	/// `policy`.
	pub fn from_raw<S: AsRef<str>, I: IntoIterator<Item = (S, NaiveDate, Vec<f64>)>>(
		system: GeoSystem,
		columns: Vec<SmartString>,
		rows: I,
		policy: InvalidCodePolicy,
	) -> Result<Self> {
		let mut result = Self::new(system, columns);
		let mut dropped = 0usize;
		for (raw, date, values) in rows {
			match result.push_raw(raw.as_ref(), date, values, policy)? {
				true => (),
				false => dropped += 1,
			}
		}
		if dropped > 0 {
			info!("dropped {} of {} rows with invalid {} codes", dropped, dropped + result.len(), system);
		}
		Ok(result)
	}

	fn push_raw(&mut self, raw: &str, date: NaiveDate, values: Vec<f64>, policy: InvalidCodePolicy) -> Result<bool> {
		if values.len() != self.columns.len() {
			return Err(ColumnError::Width{expected: self.columns.len(), got: values.len()}.into())
		}
		match normalize(raw, self.system) {
			Ok(geo) => {
				self.push(MeasureRow{geo, date, values});
				Ok(true)
			},
			Err(e) => match policy {
				InvalidCodePolicy::Drop => {
					warn!("dropping row for {}: {}", date, e);
					Ok(false)
				},
				InvalidCodePolicy::Abort => Err(e.into()),
			},
		}
	}

	pub fn push(&mut self, row: MeasureRow) {
		assert_eq!(row.values.len(), self.columns.len());
		self.rows.push(row);
	}

	pub fn system(&self) -> GeoSystem {
		self.system
	}

	pub fn columns(&self) -> &[SmartString] {
		&self.columns
	}

	pub fn column_index(&self, name: &str) -> Option<usize> {
		self.columns.iter().position(|c| { c.as_str() == name })
	}

	pub fn rows(&self) -> &[MeasureRow] {
		&self.rows
	}

	pub fn len(&self) -> usize {
		self.rows.len()
	}

	pub fn is_empty(&self) -> bool {
		self.rows.is_empty()
	}

	/// Sort rows by (geo, date).
	pub fn sort(&mut self) {
		self.rows.sort_by(|a, b| { (&a.geo, a.date).cmp(&(&b.geo, b.date)) });
	}

	pub fn geos(&self) -> BTreeSet<&GeoCode> {
		self.rows.iter().map(|row| { &row.geo }).collect()
	}

	pub fn dates(&self) -> BTreeSet<NaiveDate> {
		self.rows.iter().map(|row| { row.date }).collect()
	}

	/// First and last date present in the table.
	pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
		let dates = self.dates();
		Some((*dates.iter().next()?, *dates.iter().next_back()?))
	}

	pub fn find(&self, geo: &str, date: NaiveDate) -> Option<&MeasureRow> {
		self.rows.iter().find(|row| { row.geo.as_str() == geo && row.date == date })
	}

	/// Sum of a column over all rows.
	pub fn column_total(&self, column: usize) -> f64 {
		self.rows.iter().map(|row| { row.values[column] }).sum()
	}

	/// Sum of a column per date.
	pub fn totals_by_date(&self, column: usize) -> BTreeMap<NaiveDate, f64> {
		let mut result = BTreeMap::new();
		for row in self.rows.iter() {
			*result.entry(row.date).or_insert(0.) += row.values[column];
		}
		result
	}

	/// Replace missing values with zero.
	pub fn fill_missing(&mut self) {
		for row in self.rows.iter_mut() {
			for v in row.values.iter_mut() {
				if v.is_nan() {
					*v = 0.;
				}
			}
		}
	}

	/// Every known geo on every day of `[start, last]`.
	///
	/// Pairs without a row are filled with zero, duplicate rows are summed
	/// and rows outside of the range are dropped. The result is sorted.
	pub fn reindexed(&self, start: NaiveDate, last: NaiveDate) -> MeasureTable {
		if last < start {
			return Self::new(self.system, self.columns.clone())
		}
		Panel::from_table(self, start, last).to_table(self.system)
	}

	/// Read a header-driven CSV file.
	///
	/// The geo, date and input measure columns named by `config` must be
	/// present; any other columns are ignored. Empty cells and `NA`/`nan`
	/// are read as missing values.
	pub fn read_csv<R: io::Read, S: ProgressSink + ?Sized>(
		progress: &mut S,
		r: R,
		system: GeoSystem,
		config: &ColumnConfig,
		policy: InvalidCodePolicy,
	) -> Result<Self> {
		let mut r = csv::Reader::from_reader(r);
		let headers = r.headers()?.clone();
		let find = |name: &SmartString| -> Result<usize> {
			match headers.iter().position(|h| { h.trim() == name.as_str() }) {
				Some(i) => Ok(i),
				None => Err(ColumnError::Unknown(name.clone()).into()),
			}
		};
		let geo_index = find(&config.geo_column)?;
		let date_index = find(&config.date_column)?;
		let columns = config.input_columns();
		let mut indices = Vec::with_capacity(columns.len());
		for name in columns.iter() {
			indices.push(find(name)?);
		}

		let mut result = Self::new(system, columns);
		let mut meter = CountMeter::new(progress, PROGRESS_STEP);
		let mut dropped = 0usize;
		let mut record = csv::StringRecord::new();
		while r.read_record(&mut record)? {
			meter.tick();
			let raw = record.get(geo_index).unwrap_or("");
			let date = parse_date(record.get(date_index).unwrap_or(""))?;
			let mut values = Vec::with_capacity(indices.len());
			for (name, i) in result.columns.iter().zip(indices.iter()) {
				values.push(parse_value(name, record.get(*i).unwrap_or(""))?);
			}
			if !result.push_raw(raw, date, values, policy)? {
				dropped += 1;
			}
		}
		let total = meter.finish();
		if dropped > 0 {
			info!("dropped {} of {} rows with invalid {} codes", dropped, total, system);
		}
		Ok(result)
	}

	/// Write the table as CSV with a `geo_id` column, the date column and
	/// the measure columns. Missing values become empty cells.
	pub fn write_csv<W: io::Write>(&self, w: W, date_column: &str) -> Result<()> {
		let mut w = csv::Writer::from_writer(w);
		let mut header: Vec<&str> = vec!["geo_id", date_column];
		header.extend(self.columns.iter().map(|c| { c.as_str() }));
		w.write_record(&header)?;
		let mut record: Vec<String> = Vec::with_capacity(header.len());
		for row in self.rows.iter() {
			record.clear();
			record.push(row.geo.to_string());
			record.push(row.date.format("%Y-%m-%d").to_string());
			for v in row.values.iter() {
				record.push(if v.is_nan() {
					String::new()
				} else {
					format!("{}", v)
				});
			}
			w.write_record(&record)?;
		}
		w.flush()?;
		Ok(())
	}
}


/// Parse a date cell: ISO dates, dates with slashes and full timestamps,
/// which are truncated to the date.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
	let trimmed = s.trim();
	let head = match trimmed.get(..10) {
		Some(head) => head,
		None => return Err(Error::InvalidDate(s.into())),
	};
	if trimmed.len() > 10 {
		match trimmed.as_bytes()[10] {
			b'T' | b' ' => (),
			_ => return Err(Error::InvalidDate(s.into())),
		}
	}
	let head = head.replace("/", "-");
	head.parse::<NaiveDate>().map_err(|_| { Error::InvalidDate(s.into()) })
}

fn parse_value(column: &SmartString, s: &str) -> Result<f64> {
	let s = s.trim();
	if s.is_empty() || s.eq_ignore_ascii_case("na") || s.eq_ignore_ascii_case("nan") {
		return Ok(f64::NAN)
	}
	s.parse::<f64>().map_err(|_| { Error::InvalidValue{
		column: column.clone(),
		value: s.into(),
	}})
}
