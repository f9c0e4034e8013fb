use std::io;
use std::io::{BufReader, Read};
use std::fs;
use std::path::{Path, PathBuf};

use flate2;


fn is_gzip(path: &Path) -> bool {
	match path.extension() {
		Some(x) => x == "gz",
		None => false,
	}
}

/// Open a table file, decompressing on the fly if its name ends in `.gz`.
pub fn magic_open<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn Read + Send>> {
	let path = path.as_ref();
	let f = BufReader::new(fs::File::open(path)?);
	if is_gzip(path) {
		Ok(Box::new(flate2::read::GzDecoder::new(f)))
	} else {
		Ok(Box::new(f))
	}
}

/// First existing file among `<stem>.csv` and `<stem>.csv.gz` in `dir`.
pub fn find_table_file(dir: &Path, stem: &str) -> Option<PathBuf> {
	for suffix in ["csv", "csv.gz"].iter() {
		let candidate = dir.join(format!("{}.{}", stem, suffix));
		if candidate.is_file() {
			return Some(candidate)
		}
	}
	None
}
