use {
    crate::error::PyramidError,
    serde::{Deserialize, Serialize},
    std::{fmt, str::FromStr},
};

/// One resolution stage of the 3D-ResNet backbone, shallow (`X1`) to deep (`X4`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FeatureLevel {
    X1,
    X2,
    X3,
    X4,
}

impl FeatureLevel {
    pub const ALL: [FeatureLevel; 4] = [
        FeatureLevel::X1,
        FeatureLevel::X2,
        FeatureLevel::X3,
        FeatureLevel::X4,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FeatureLevel::X1 => "x1",
            FeatureLevel::X2 => "x2",
            FeatureLevel::X3 => "x3",
            FeatureLevel::X4 => "x4",
        }
    }

    /// 0 for `x1`, 3 for `x4`.
    pub fn depth(&self) -> usize {
        *self as usize
    }

    /// Native channel width of the 4-stage bottleneck backbone.
    pub fn channels(&self) -> usize {
        256 << self.depth()
    }

    /// Extent of this level for a clip of `video_frames` frames of `video_size`² pixels.
    ///
    /// `x1` sits at (T/2, S/4, S/4); every deeper stage halves all three axes.
    pub fn reference_extent(&self, video_frames: usize, video_size: usize) -> Extent {
        let mut extent = Extent::new(video_frames / 2, video_size / 4, video_size / 4);
        for _ in 0..self.depth() {
            extent = Extent::new(extent.time / 2, extent.height / 2, extent.width / 2);
        }
        extent
    }

    /// Pooling pyramid used when a level has no explicit `spp` entry.
    pub fn default_spec(&self) -> PyramidLevelSpec {
        let time = match self {
            FeatureLevel::X1 | FeatureLevel::X2 => vec![1, 2, 4],
            FeatureLevel::X3 => vec![1, 1, 2],
            FeatureLevel::X4 => vec![1, 1, 1],
        };
        PyramidLevelSpec {
            time,
            height: vec![1, 2, 3],
            width: vec![1, 2, 3],
        }
    }
}

impl fmt::Display for FeatureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FeatureLevel {
    type Err = PyramidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "x1" => Ok(FeatureLevel::X1),
            "x2" => Ok(FeatureLevel::X2),
            "x3" => Ok(FeatureLevel::X3),
            "x4" => Ok(FeatureLevel::X4),
            other => Err(PyramidError::config(
                "levels",
                format!("unknown feature level '{other}' (expected x1..x4)"),
            )),
        }
    }
}

impl TryFrom<String> for FeatureLevel {
    type Error = PyramidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FeatureLevel> for String {
    fn from(level: FeatureLevel) -> Self {
        level.name().to_string()
    }
}

/// Temporal and spatial size of a feature map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub time: usize,
    pub height: usize,
    pub width: usize,
}

impl Extent {
    pub fn new(time: usize, height: usize, width: usize) -> Self {
        Self {
            time,
            height,
            width,
        }
    }

    pub fn as_array(&self) -> [usize; 3] {
        [self.time, self.height, self.width]
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.time, self.height, self.width)
    }
}

/// Bin counts per axis for every entry of a level's pooling pyramid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyramidLevelSpec {
    pub time: Vec<usize>,
    pub height: Vec<usize>,
    pub width: Vec<usize>,
}

impl PyramidLevelSpec {
    /// Single-entry pyramid with one bin per axis, i.e. global pooling.
    pub fn global() -> Self {
        Self::uniform(&[(1, 1, 1)])
    }

    pub fn uniform(entries: &[(usize, usize, usize)]) -> Self {
        Self {
            time: entries.iter().map(|e| e.0).collect(),
            height: entries.iter().map(|e| e.1).collect(),
            width: entries.iter().map(|e| e.2).collect(),
        }
    }

    pub fn entries(&self) -> usize {
        self.time.len()
    }

    /// Bins of entry `j` as `(time, height, width)`.
    pub fn bins(&self, j: usize) -> Extent {
        Extent::new(self.time[j], self.height[j], self.width[j])
    }

    pub fn cells(&self, j: usize) -> usize {
        self.time[j] * self.height[j] * self.width[j]
    }

    /// Pooled descriptor width of every entry for `channels` input channels.
    pub fn entry_widths(&self, channels: usize) -> Vec<usize> {
        (0..self.entries()).map(|j| self.cells(j) * channels).collect()
    }

    /// Check the structural invariants; `key` prefixes every error.
    pub fn validate(&self, key: &str) -> Result<(), PyramidError> {
        if self.time.is_empty() {
            return Err(PyramidError::config(key, "pyramid needs at least one entry"));
        }
        if self.height.len() != self.time.len() || self.width.len() != self.time.len() {
            return Err(PyramidError::config(
                key,
                format!(
                    "bin lists differ in length (time {}, height {}, width {})",
                    self.time.len(),
                    self.height.len(),
                    self.width.len()
                ),
            ));
        }
        for (axis, bins) in [("time", &self.time), ("height", &self.height), ("width", &self.width)] {
            if let Some(j) = bins.iter().position(|&b| b == 0) {
                return Err(PyramidError::config(
                    format!("{key}.{axis}"),
                    format!("entry {j} has zero bins"),
                ));
            }
        }
        Ok(())
    }

    /// Reject entries with more bins than `extent` can fill.
    pub fn validate_against(&self, key: &str, extent: Extent) -> Result<(), PyramidError> {
        let limits = extent.as_array();
        for (a, (axis, bins)) in [("time", &self.time), ("height", &self.height), ("width", &self.width)]
            .into_iter()
            .enumerate()
        {
            if let Some(j) = bins.iter().position(|&b| b > limits[a]) {
                return Err(PyramidError::config(
                    format!("{key}.{axis}"),
                    format!(
                        "entry {j} asks for {} bins but the minimum supported extent is {}",
                        bins[j], limits[a]
                    ),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_table() {
        let channels: Vec<_> = FeatureLevel::ALL.iter().map(|l| l.channels()).collect();
        assert_eq!(channels, vec![256, 512, 1024, 2048]);
    }

    #[test]
    fn test_reference_extents_halve_per_level() {
        assert_eq!(FeatureLevel::X1.reference_extent(16, 128), Extent::new(8, 32, 32));
        assert_eq!(FeatureLevel::X2.reference_extent(16, 128), Extent::new(4, 16, 16));
        assert_eq!(FeatureLevel::X3.reference_extent(16, 128), Extent::new(2, 8, 8));
        assert_eq!(FeatureLevel::X4.reference_extent(16, 128), Extent::new(1, 4, 4));
    }

    #[test]
    fn test_deeper_levels_never_grow() {
        for pair in FeatureLevel::ALL.windows(2) {
            let shallow = pair[0].reference_extent(32, 224);
            let deep = pair[1].reference_extent(32, 224);
            assert!(deep.time <= shallow.time);
            assert!(deep.height <= shallow.height);
            assert!(deep.width <= shallow.width);
        }
    }

    #[test]
    fn test_parse_level_names() {
        assert_eq!("x3".parse::<FeatureLevel>().unwrap(), FeatureLevel::X3);
        assert!(matches!(
            "x5".parse::<FeatureLevel>(),
            Err(PyramidError::Config { ref key, .. }) if key == "levels"
        ));
    }

    #[test]
    fn test_default_specs_fit_reference_input() {
        for level in FeatureLevel::ALL {
            let spec = level.default_spec();
            spec.validate("spp").unwrap();
            spec.validate_against("spp", level.reference_extent(16, 128)).unwrap();
        }
    }

    #[test]
    fn test_spec_rejects_unequal_lengths() {
        let spec = PyramidLevelSpec {
            time: vec![1, 1],
            height: vec![1, 2, 3],
            width: vec![1, 2, 3],
        };
        assert!(matches!(spec.validate("spp.x2"), Err(PyramidError::Config { ref key, .. }) if key == "spp.x2"));
    }

    #[test]
    fn test_spec_rejects_zero_bins() {
        let spec = PyramidLevelSpec::uniform(&[(1, 0, 1)]);
        assert!(matches!(
            spec.validate("spp.x1"),
            Err(PyramidError::Config { ref key, .. }) if key == "spp.x1.height"
        ));
    }

    #[test]
    fn test_spec_rejects_bins_above_extent() {
        let spec = PyramidLevelSpec::uniform(&[(1, 1, 1), (2, 5, 5)]);
        let err = spec.validate_against("spp.x4", Extent::new(1, 4, 4)).unwrap_err();
        assert!(matches!(err, PyramidError::Config { ref key, .. } if key == "spp.x4.time"));
    }

    #[test]
    fn test_entry_widths() {
        let spec = FeatureLevel::X4.default_spec();
        assert_eq!(spec.entry_widths(8), vec![8, 32, 72]);
    }
}
