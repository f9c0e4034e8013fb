use std::collections::HashMap;
use std::hash::Hash;

use num_traits::Zero;

use chrono::NaiveDate;

use smartstring::alias::{String as SmartString};

use super::geo::{GeoCode, GeoSystem};
use super::measure::{MeasureRow, MeasureTable};


pub trait TimeSeriesKey: Hash + Eq + Clone + std::fmt::Debug {}
impl<T: Hash + Eq + Clone + std::fmt::Debug> TimeSeriesKey for T {}


/// Dense per-key daily series over a fixed date range.
#[derive(Debug, Clone)]
pub struct TimeSeries<T: Hash + Eq, V: Copy> {
	start: NaiveDate,
	keys: HashMap<T, usize>,
	time_series: Vec<Vec<V>>,
	len: usize,
}

impl<T: Hash + Eq, V: Copy> TimeSeries<T, V> {
	/// Series covering `start` up to and including `last`.
	pub fn new(start: NaiveDate, last: NaiveDate) -> Self {
		let len = (last - start).num_days() + 1;
		assert!(len >= 0);
		let len = len as usize;
		Self{
			start,
			len,
			keys: HashMap::new(),
			time_series: Vec::new(),
		}
	}

	#[inline(always)]
	pub fn date_index(&self, other: NaiveDate) -> Option<usize> {
		let days = (other - self.start).num_days();
		if days < 0 || days as usize >= self.len {
			return None
		}
		return Some(days as usize)
	}

	#[inline(always)]
	pub fn index_date(&self, i: i64) -> Option<NaiveDate> {
		if i < 0 || i as usize >= self.len {
			return None
		}
		return Some(self.start + chrono::Duration::days(i))
	}

	#[inline(always)]
	pub fn len(&self) -> usize {
		self.len
	}
}

impl<T: TimeSeriesKey, V: Copy + Zero> TimeSeries<T, V> {
	pub fn get_or_create(&mut self, k: T) -> &mut [V] {
		let index = self.get_index_or_create(k);
		&mut self.time_series[index][..]
	}

	pub fn get_index_or_create(&mut self, k: T) -> usize {
		match self.keys.get(&k) {
			Some(v) => *v,
			None => {
				let v = self.time_series.len();
				let mut vec = Vec::with_capacity(self.len);
				vec.resize(self.len, V::zero());
				self.time_series.push(vec);
				self.keys.insert(k, v);
				v
			},
		}
	}

	pub fn get_index(&self, k: &T) -> Option<usize> {
		Some(*self.keys.get(k)?)
	}

	pub fn get(&self, k: &T) -> Option<&[V]> {
		let index = self.get_index(k)?;
		Some(&self.time_series[index][..])
	}

	pub fn get_value(&self, k: &T, i: usize) -> Option<V> {
		if i >= self.len {
			return None
		}
		self.get(k).and_then(|v| { Some(v[i]) })
	}

	pub fn keys(&self) -> std::collections::hash_map::Keys<'_, T, usize> {
		self.keys.keys()
	}
}

impl<T: TimeSeriesKey> TimeSeries<T, f64> {
	/// Replace missing values with zero.
	pub fn fill_missing(&mut self) {
		for vec in self.time_series.iter_mut() {
			for v in vec.iter_mut() {
				if v.is_nan() {
					*v = 0.;
				}
			}
		}
	}

	/// Trailing sums over `window` days ending at each index.
	///
	/// Windows reaching before the start of the series are clipped to it.
	pub fn window_sums(&self, window: usize) -> Self {
		let window = window.max(1);
		let mut result = self.clone();
		for (dst, src) in result.time_series.iter_mut().zip(self.time_series.iter()) {
			for i in 0..src.len() {
				let lo = (i + 1).saturating_sub(window);
				// summed directly so exact averages compare exactly against thresholds
				dst[i] = src[lo..=i].iter().sum();
			}
		}
		result
	}

	/// Trailing averages over `window` days, dividing by the number of
	/// window days inside the series.
	pub fn window_means(&self, window: usize) -> Self {
		let window = window.max(1);
		let mut result = self.window_sums(window);
		for vec in result.time_series.iter_mut() {
			for (i, v) in vec.iter_mut().enumerate() {
				*v /= (i + 1).min(window) as f64;
			}
		}
		result
	}
}


pub type FGauge<T> = TimeSeries<T, f64>;


/// All columns of a measure table as dense daily series.
///
/// Building a panel fills every (geo, day) pair inside the range with zero,
/// drops rows outside the range and sums duplicate rows.
#[derive(Debug, Clone)]
pub struct Panel {
	columns: Vec<SmartString>,
	series: Vec<FGauge<GeoCode>>,
}

impl Panel {
	pub fn from_table(table: &MeasureTable, start: NaiveDate, last: NaiveDate) -> Self {
		let mut series: Vec<FGauge<GeoCode>> = table.columns().iter().map(|_| { FGauge::new(start, last) }).collect();
		let mut geos: Vec<&GeoCode> = table.rows().iter().map(|row| { &row.geo }).collect();
		geos.sort();
		geos.dedup();
		for ts in series.iter_mut() {
			for geo in geos.iter() {
				ts.get_index_or_create((*geo).clone());
			}
		}
		for row in table.rows() {
			for (ts, v) in series.iter_mut().zip(row.values.iter()) {
				let i = match ts.date_index(row.date) {
					Some(i) => i,
					None => continue,
				};
				ts.get_or_create(row.geo.clone())[i] += *v;
			}
		}
		Self{
			columns: table.columns().to_vec(),
			series,
		}
	}

	pub fn columns(&self) -> &[SmartString] {
		&self.columns
	}

	pub fn column(&self, i: usize) -> &FGauge<GeoCode> {
		&self.series[i]
	}

	/// Number of days covered.
	pub fn len(&self) -> usize {
		match self.series.first() {
			Some(ts) => ts.len(),
			None => 0,
		}
	}

	pub fn index_date(&self, i: usize) -> Option<NaiveDate> {
		self.series.first()?.index_date(i as i64)
	}

	/// Geographic keys, sorted.
	pub fn geos(&self) -> Vec<&GeoCode> {
		let mut result: Vec<&GeoCode> = match self.series.first() {
			Some(ts) => ts.keys().collect(),
			None => Vec::new(),
		};
		result.sort();
		result
	}

	/// Values of all columns for `geo` on day `i`.
	pub fn values(&self, geo: &GeoCode, i: usize) -> Vec<f64> {
		self.series.iter().map(|ts| { ts.get_value(geo, i).unwrap_or(0.) }).collect()
	}

	pub fn to_table(&self, system: GeoSystem) -> MeasureTable {
		let mut result = MeasureTable::new(system, self.columns.clone());
		for geo in self.geos() {
			for i in 0..self.len() {
				let date = match self.index_date(i) {
					Some(date) => date,
					None => continue,
				};
				result.push(MeasureRow{
					geo: geo.clone(),
					date,
					values: self.values(geo, i),
				});
			}
		}
		result
	}
}


#[cfg(test)]
mod tests {
	use super::*;

	fn d(day: u32) -> NaiveDate {
		NaiveDate::from_ymd(2020, 3, day)
	}

	#[test]
	fn covers_range_inclusive() {
		let ts = FGauge::<u32>::new(d(1), d(3));
		assert_eq!(ts.len(), 3);
		assert_eq!(ts.date_index(d(3)), Some(2));
		assert_eq!(ts.date_index(d(4)), None);
		assert_eq!(ts.index_date(0), Some(d(1)));
	}

	#[test]
	fn trailing_windows_clip_at_start() {
		let mut ts = FGauge::<u32>::new(d(1), d(4));
		ts.get_or_create(1).copy_from_slice(&[2., 4., 6., 8.]);
		let sums = ts.window_sums(3);
		assert_eq!(sums.get(&1).unwrap(), &[2., 6., 12., 18.]);
		let means = ts.window_means(3);
		assert_eq!(means.get(&1).unwrap(), &[2., 3., 4., 6.]);
	}

	#[test]
	fn missing_values_fill_with_zero() {
		let mut ts = FGauge::<u32>::new(d(1), d(3));
		ts.get_or_create(7).copy_from_slice(&[1., f64::NAN, 2.]);
		ts.fill_missing();
		assert_eq!(ts.get(&7).unwrap(), &[1., 0., 2.]);
		assert_eq!(ts.get_value(&8, 0), None);
	}
}
