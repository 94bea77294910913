//! `:WAV:PRE?` response parsing.
//!
//! The preamble is ten comma-separated numeric fields:
//! `format,type,points,count,xincrement,xorigin,xreference,yincrement,yorigin,yreference`.

use crate::error::PreambleError;
use std::str::FromStr;

const FIELD_NAMES: [&str; 10] = [
    "format",
    "type",
    "points",
    "count",
    "xincrement",
    "xorigin",
    "xreference",
    "yincrement",
    "yorigin",
    "yreference",
];

const FS_PER_SECOND: f64 = 1e15;

/// Waveform scaling and size metadata for the selected source channel.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformPreamble {
    /// Transfer format (0 = BYTE, 1 = WORD, 2 = ASC)
    pub format: i32,
    /// Acquisition type (0 = NORM, 1 = MAX, 2 = RAW)
    pub kind: i32,
    /// Number of points in the waveform record
    pub points: usize,
    /// Average count (1 unless averaging)
    pub count: i32,
    /// Seconds between samples
    pub x_increment: f64,
    /// Time of the first sample relative to the trigger
    pub x_origin: f64,
    /// Reference sample index on the time axis
    pub x_reference: f64,
    /// Volts per ADC code
    pub y_increment: f64,
    /// Vertical offset in ADC codes
    pub y_origin: f64,
    /// Vertical reference in ADC codes
    pub y_reference: f64,
}

impl WaveformPreamble {
    /// Sample interval rounded to whole femtoseconds.
    pub fn femtoseconds_per_sample(&self) -> u64 {
        (self.x_increment * FS_PER_SECOND).round() as u64
    }

    /// Reject a preamble whose record cannot fit in the payload buffer.
    pub fn check_capacity(&self, capacity: usize) -> Result<(), PreambleError> {
        if self.points > capacity {
            return Err(PreambleError::PointsExceedCapacity {
                points: self.points,
                capacity,
            });
        }
        Ok(())
    }
}

fn field<T: FromStr>(fields: &[&str], index: usize) -> Result<T, PreambleError> {
    fields[index]
        .parse()
        .map_err(|_| PreambleError::InvalidField {
            field: FIELD_NAMES[index],
            value: fields[index].to_string(),
        })
}

impl FromStr for WaveformPreamble {
    type Err = PreambleError;

    fn from_str(response: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = response.trim().split(',').map(str::trim).collect();
        if fields.len() != FIELD_NAMES.len() {
            return Err(PreambleError::FieldCount {
                expected: FIELD_NAMES.len(),
                found: fields.len(),
            });
        }

        let preamble = Self {
            format: field(&fields, 0)?,
            kind: field(&fields, 1)?,
            points: field(&fields, 2)?,
            count: field(&fields, 3)?,
            x_increment: field(&fields, 4)?,
            x_origin: field(&fields, 5)?,
            x_reference: field(&fields, 6)?,
            y_increment: field(&fields, 7)?,
            y_origin: field(&fields, 8)?,
            y_reference: field(&fields, 9)?,
        };

        if !(preamble.x_increment.is_finite() && preamble.x_increment > 0.0) {
            return Err(PreambleError::NonPositiveInterval(preamble.x_increment));
        }

        Ok(preamble)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reference_preamble() {
        let preamble: WaveformPreamble = "0,1,1000,0,1.0e-9,0.0,0.0,0.04,0.0,0.0".parse().unwrap();

        assert_eq!(preamble.points, 1000);
        assert_eq!(preamble.x_increment, 1.0e-9);
        assert_eq!(preamble.y_increment, 0.04);
        assert_eq!(preamble.femtoseconds_per_sample(), 1_000_000);
    }

    #[test]
    fn parses_instrument_formatting() {
        let preamble: WaveformPreamble =
            "0,2,25000000,1,8.000000e-10,-1.000000e-02,0,4.132813e-03,0,122\n"
                .parse()
                .unwrap();

        assert_eq!(preamble.kind, 2);
        assert_eq!(preamble.points, 25_000_000);
        assert_eq!(preamble.x_origin, -1.0e-2);
        assert_eq!(preamble.y_reference, 122.0);
        assert_eq!(preamble.femtoseconds_per_sample(), 800_000);
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = "0,1,1000".parse::<WaveformPreamble>().unwrap_err();
        assert_eq!(
            err,
            PreambleError::FieldCount {
                expected: 10,
                found: 3
            }
        );
    }

    #[test]
    fn rejects_malformed_numbers() {
        let err = "0,1,lots,0,1.0e-9,0.0,0.0,0.04,0.0,0.0"
            .parse::<WaveformPreamble>()
            .unwrap_err();
        assert_eq!(
            err,
            PreambleError::InvalidField {
                field: "points",
                value: "lots".into()
            }
        );

        let err = "0,1,-5,0,1.0e-9,0.0,0.0,0.04,0.0,0.0"
            .parse::<WaveformPreamble>()
            .unwrap_err();
        assert!(matches!(
            err,
            PreambleError::InvalidField {
                field: "points",
                ..
            }
        ));
    }

    #[test]
    fn rejects_non_positive_interval() {
        let err = "0,1,1000,0,0,0.0,0.0,0.04,0.0,0.0"
            .parse::<WaveformPreamble>()
            .unwrap_err();
        assert_eq!(err, PreambleError::NonPositiveInterval(0.0));
    }

    #[test]
    fn capacity_check() {
        let preamble: WaveformPreamble = "0,1,1000,0,1.0e-9,0.0,0.0,0.04,0.0,0.0".parse().unwrap();
        assert!(preamble.check_capacity(1000).is_ok());
        assert_eq!(
            preamble.check_capacity(999),
            Err(PreambleError::PointsExceedCapacity {
                points: 1000,
                capacity: 999
            })
        );
    }
}
