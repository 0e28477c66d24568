// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Coordinate 4-tuples and their textual forms.
//!
//! Coordinates are plain structs inside the crate. Text only appears at the
//! file boundary, where three forms are in use:
//!
//! - input coordinate `"<batch>,<row>,<col>,<channel_in>"`
//! - weight coordinate `"<filter>,<kernel_row>,<kernel_col>,<channel_in>"`
//!   (underscore-separated inside file and pattern names)
//! - output position `"<batch>_<row>_<col>_<filter>"`

use std::fmt;
use std::str::FromStr;

/// Location of one value of the input tensor (NHWC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputCoord {
    pub batch: usize,
    pub row: usize,
    pub col: usize,
    pub channel: usize,
}

/// Location of one kernel value (OHWI).
///
/// The same tuple is what the flat weight index decodes to, where the fields
/// are called `(channels_out, height, width, filters)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WeightCoord {
    pub filter: usize,
    pub row: usize,
    pub col: usize,
    pub channel: usize,
}

/// Location of one output value, used to key the pairs file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputPosition {
    pub batch: usize,
    pub row: usize,
    pub col: usize,
    pub filter: usize,
}

impl InputCoord {
    pub fn new(batch: usize, row: usize, col: usize, channel: usize) -> Self {
        InputCoord { batch, row, col, channel }
    }

    /// Same location under another batch convention.
    pub fn with_batch(self, batch: usize) -> Self {
        InputCoord { batch, ..self }
    }

    pub fn to_array(self) -> [usize; 4] {
        [self.batch, self.row, self.col, self.channel]
    }
}

impl WeightCoord {
    pub fn new(filter: usize, row: usize, col: usize, channel: usize) -> Self {
        WeightCoord { filter, row, col, channel }
    }

    pub fn to_array(self) -> [usize; 4] {
        [self.filter, self.row, self.col, self.channel]
    }

    /// `<filter>_<row>_<col>_<channel>`, the form embedded in file and
    /// pattern names.
    pub fn underscored(&self) -> String {
        format!("{}_{}_{}_{}", self.filter, self.row, self.col, self.channel)
    }

    /// Build from four already-split decimal fields.
    pub fn from_fields(fields: &[&str]) -> Option<Self> {
        let [f, r, c, ch] = parse_four(fields)?;
        Some(WeightCoord::new(f, r, c, ch))
    }
}

impl OutputPosition {
    pub fn new(batch: usize, row: usize, col: usize, filter: usize) -> Self {
        OutputPosition { batch, row, col, filter }
    }
}

fn parse_four(fields: &[&str]) -> Option<[usize; 4]> {
    if fields.len() != 4 {
        return None;
    }
    let mut out = [0usize; 4];
    for (slot, field) in out.iter_mut().zip(fields) {
        *slot = field.trim().parse().ok()?;
    }
    Some(out)
}

/// Error returned when a coordinate string does not have four decimal fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordParseError(pub String);

impl fmt::Display for CoordParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed coordinate `{}`", self.0)
    }
}

impl std::error::Error for CoordParseError {}

impl fmt::Display for InputCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.batch, self.row, self.col, self.channel)
    }
}

impl fmt::Display for WeightCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.filter, self.row, self.col, self.channel)
    }
}

impl fmt::Display for OutputPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}_{}", self.batch, self.row, self.col, self.filter)
    }
}

impl FromStr for InputCoord {
    type Err = CoordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').collect();
        let [b, r, c, ch] = parse_four(&fields).ok_or_else(|| CoordParseError(s.to_string()))?;
        Ok(InputCoord::new(b, r, c, ch))
    }
}

impl FromStr for WeightCoord {
    type Err = CoordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').collect();
        WeightCoord::from_fields(&fields).ok_or_else(|| CoordParseError(s.to_string()))
    }
}

impl FromStr for OutputPosition {
    type Err = CoordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split('_').collect();
        let [b, r, c, f] = parse_four(&fields).ok_or_else(|| CoordParseError(s.to_string()))?;
        Ok(OutputPosition::new(b, r, c, f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_forms() {
        assert_eq!(InputCoord::new(1, 2, 3, 0).to_string(), "1,2,3,0");
        assert_eq!(WeightCoord::new(5, 4, 3, 0).to_string(), "5,4,3,0");
        assert_eq!(WeightCoord::new(5, 4, 3, 0).underscored(), "5_4_3_0");
        assert_eq!(OutputPosition::new(1, 27, 0, 5).to_string(), "1_27_0_5");
    }

    #[test]
    fn test_parse() {
        assert_eq!("1,12,7,0".parse::<InputCoord>(), Ok(InputCoord::new(1, 12, 7, 0)));
        assert_eq!("0, 1, 2, 3".parse::<WeightCoord>(), Ok(WeightCoord::new(0, 1, 2, 3)));
        assert_eq!("1_2_3_4".parse::<OutputPosition>(), Ok(OutputPosition::new(1, 2, 3, 4)));
        assert!("1,2,3".parse::<InputCoord>().is_err());
        assert!("1,2,3,x".parse::<WeightCoord>().is_err());
        assert!("1,2,3,-1".parse::<WeightCoord>().is_err());
    }

    #[test]
    fn test_with_batch() {
        let c = InputCoord::new(0, 4, 5, 2).with_batch(1);
        assert_eq!(c.to_array(), [1, 4, 5, 2]);
    }
}
