use std::io;
use std::io::Write;
use std::time;

use log::debug;


pub trait ProgressSink {
	fn update(&mut self, inow: usize);
	fn finish(&mut self, inow: usize);
}


/// Rate meter drawn on a terminal line.
pub struct TerminalMeter {
	t0: time::Instant,
	tprev: time::Instant,
	iprev: usize,
}

impl TerminalMeter {
	pub fn start() -> Self {
		let now = time::Instant::now();
		Self{
			t0: now,
			tprev: now,
			iprev: 0,
		}
	}
}

impl ProgressSink for TerminalMeter {
	fn update(&mut self, inow: usize) {
		let now = time::Instant::now();
		let dt = (now - self.tprev).as_secs_f64();
		let rate = (inow.saturating_sub(self.iprev)) as f64 / dt;
		let mut out = io::stderr();
		// a broken terminal is no reason to abort the computation
		let _ = write!(out, "{:12} [{:10.2}/s]\r", inow, rate);
		let _ = out.flush();
		self.iprev = inow;
		self.tprev = now;
	}

	fn finish(&mut self, inow: usize) {
		let dt = (time::Instant::now() - self.t0).as_secs_f64();
		let rate = inow as f64 / dt;
		let _ = writeln!(io::stderr(), "{:12} [{:10.2}/s]", inow, rate);
	}
}


/// Sink for non-interactive runs: only logs the final count.
pub struct LogSink;

impl ProgressSink for LogSink {
	fn update(&mut self, _inow: usize) {}

	fn finish(&mut self, inow: usize) {
		debug!("processed {} rows", inow);
	}
}


pub fn default_output() -> Box<dyn ProgressSink> {
	if isatty::stderr_isatty() {
		Box::new(TerminalMeter::start())
	} else {
		Box::new(LogSink)
	}
}


/// Counts rows and forwards to a sink every `step` rows.
pub struct CountMeter<'s, S: ProgressSink + ?Sized> {
	sink: &'s mut S,
	step: usize,
	n: usize,
}

impl<'s, S: ProgressSink + ?Sized> CountMeter<'s, S> {
	pub fn new(sink: &'s mut S, step: usize) -> Self {
		Self{
			sink,
			step: step.max(1),
			n: 0,
		}
	}

	pub fn tick(&mut self) {
		self.n += 1;
		if self.n % self.step == 0 {
			self.sink.update(self.n);
		}
	}

	pub fn count(&self) -> usize {
		self.n
	}

	pub fn finish(self) -> usize {
		self.sink.finish(self.n);
		self.n
	}
}
