//! `.cor` GPS sidecar written next to RAMAC/MALA acquisitions.
//!
//! One fix per line, whitespace separated:
//! `trace date time lat N|S long E|W elevation unit [quality]`.

use std::fs;
use std::path::Path;

use chrono::{NaiveDateTime, TimeZone, Utc};
use ndarray::Array1;

use crate::dataset::Geolocation;
use crate::prelude::{RadarError, RadarResult};

#[derive(Debug, Clone, PartialEq)]
pub struct CorRecord {
    /// One-based trace number the fix belongs to.
    pub trace: usize,
    pub time: NaiveDateTime,
    pub lat: f64,
    pub long: f64,
    pub elev: f64,
}

impl CorRecord {
    /// Unix time of the fix, assuming the logger wrote UTC.
    pub fn unix_time(&self) -> f64 {
        let utc = Utc.from_utc_datetime(&self.time);
        utc.timestamp() as f64 + f64::from(utc.timestamp_subsec_nanos()) * 1e-9
    }
}

pub fn read_cor(path: &Path) -> RadarResult<Vec<CorRecord>> {
    let text = fs::read_to_string(path).map_err(|e| RadarError::io(path, e))?;
    parse_cor(&text).map_err(|e| match e {
        RadarError::Format(msg) => RadarError::Format(format!("{}: {msg}", path.display())),
        other => other,
    })
}

pub fn parse_cor(text: &str) -> RadarResult<Vec<CorRecord>> {
    let mut records = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        records.push(parse_line(line).map_err(|msg| {
            RadarError::Format(format!("GPS sidecar line {}: {msg}", lineno + 1))
        })?);
    }
    records.sort_by_key(|record| record.trace);
    Ok(records)
}

fn parse_line(line: &str) -> Result<CorRecord, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 8 {
        return Err(format!("expected at least 8 fields, found {}", fields.len()));
    }
    let number = |index: usize| -> Result<f64, String> {
        fields[index]
            .parse::<f64>()
            .map_err(|_| format!("'{}' is not a number", fields[index]))
    };
    let trace = fields[0]
        .parse::<usize>()
        .map_err(|_| format!("'{}' is not a trace number", fields[0]))?;
    let stamp = format!("{} {}", fields[1], fields[2]);
    let time = NaiveDateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S%.f")
        .map_err(|e| format!("bad timestamp '{stamp}': {e}"))?;
    let lat = match fields[4] {
        "N" | "n" => number(3)?,
        "S" | "s" => -number(3)?,
        other => return Err(format!("bad latitude hemisphere '{other}'")),
    };
    let long = match fields[6] {
        "E" | "e" => number(5)?,
        "W" | "w" => -number(5)?,
        other => return Err(format!("bad longitude hemisphere '{other}'")),
    };
    Ok(CorRecord {
        trace,
        time,
        lat,
        long,
        elev: number(7)?,
    })
}

pub fn render_cor(records: &[CorRecord]) -> String {
    let mut out = String::new();
    for record in records {
        let (lat, ns) = if record.lat < 0.0 { (-record.lat, 'S') } else { (record.lat, 'N') };
        let (long, ew) = if record.long < 0.0 { (-record.long, 'W') } else { (record.long, 'E') };
        out.push_str(&format!(
            "{}\t{}\t{lat:.7}\t{ns}\t{long:.7}\t{ew}\t{:.2}\tM\t1.00\n",
            record.trace,
            record.time.format("%Y-%m-%d\t%H:%M:%S%.3f"),
            record.elev,
        ));
    }
    out
}

/// Per-trace positions by linear interpolation over trace number, held
/// constant outside the logged span. `records` must be sorted and non-empty.
pub fn geolocate(records: &[CorRecord], tnum: usize) -> Geolocation {
    let traces: Vec<f64> = records.iter().map(|r| r.trace as f64).collect();
    let interp = |pick: fn(&CorRecord) -> f64| -> Array1<f64> {
        let values: Vec<f64> = records.iter().map(pick).collect();
        Array1::from_shape_fn(tnum, |i| interpolate(&traces, &values, (i + 1) as f64))
    };
    Geolocation {
        lat: interp(|r| r.lat),
        long: interp(|r| r.long),
        elev: interp(|r| r.elev),
    }
}

fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let last = xs.len() - 1;
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[last] {
        return ys[last];
    }
    let upper = xs.partition_point(|&v| v < x);
    let lower = upper - 1;
    let span = xs[upper] - xs[lower];
    if span == 0.0 {
        return ys[upper];
    }
    ys[lower] + (ys[upper] - ys[lower]) * (x - xs[lower]) / span
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "1\t2017-08-24\t16:28:45.000\t78.8793300\tN\t16.3838800\tE\t66.90\tM\t1.20\n\
                          \n\
                          5\t2017-08-24\t16:28:49.500\t78.8793700\tN\t16.3838000\tW\t70.90\tM\t1.20\n";

    #[test]
    fn parses_hemispheres_and_fractional_seconds() {
        let records = parse_cor(SAMPLE).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].trace, 1);
        assert!((records[1].long + 16.3838).abs() < 1e-9);
        assert!((records[1].unix_time() - records[0].unix_time() - 4.5).abs() < 1e-6);
    }

    #[test]
    fn interpolates_between_fixes_and_clamps_outside() {
        let records = parse_cor(SAMPLE).unwrap();
        let geo = geolocate(&records, 6);
        assert_eq!(geo.elev.len(), 6);
        assert!((geo.elev[0] - 66.9).abs() < 1e-9);
        assert!((geo.elev[2] - 68.9).abs() < 1e-9);
        assert!((geo.elev[5] - 70.9).abs() < 1e-9);
    }

    #[test]
    fn rendered_records_parse_back() {
        let records = parse_cor(SAMPLE).unwrap();
        let again = parse_cor(&render_cor(&records)).unwrap();
        assert_eq!(again.len(), records.len());
        assert_eq!(again[1].time, records[1].time);
        assert!((again[0].lat - records[0].lat).abs() < 1e-7);
    }

    #[test]
    fn malformed_line_is_a_format_error() {
        let err = parse_cor("1\t2017-08-24\t16:28:45\tnorth\tN\t16.0\tE\t1.0\tM\n").unwrap_err();
        assert!(matches!(err, RadarError::Format(_)));
    }
}
