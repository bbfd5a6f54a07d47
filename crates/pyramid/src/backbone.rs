use {
    crate::{error::PyramidError, level::FeatureLevel},
    candle_core::Tensor,
    serde::{Deserialize, Serialize},
    std::{collections::BTreeMap, fmt, str::FromStr},
};

/// Backbone output keyed by level, each tensor shaped (batch, channel, T, H, W).
pub type FeatureMap = BTreeMap<FeatureLevel, Tensor>;

/// Anything that turns a video batch into per-level feature maps.
pub trait FeatureExtractor {
    fn features(&self, video: &Tensor) -> candle_core::Result<FeatureMap>;
}

/// Which stages a backbone variant emits.
///
/// `X2`..`X4` are truncated networks that stop after that stage and emit only
/// its output; `All` keeps every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackboneMode {
    X2,
    X3,
    X4,
    #[default]
    All,
}

impl BackboneMode {
    pub fn name(&self) -> &'static str {
        match self {
            BackboneMode::X2 => "x2",
            BackboneMode::X3 => "x3",
            BackboneMode::X4 => "x4",
            BackboneMode::All => "all",
        }
    }

    pub fn levels(&self) -> &'static [FeatureLevel] {
        match self {
            BackboneMode::X2 => &[FeatureLevel::X2],
            BackboneMode::X3 => &[FeatureLevel::X3],
            BackboneMode::X4 => &[FeatureLevel::X4],
            BackboneMode::All => &FeatureLevel::ALL,
        }
    }

    pub fn emits(&self, level: FeatureLevel) -> bool {
        self.levels().contains(&level)
    }

    /// Keep the levels this variant emits, failing on any that are missing.
    pub fn select(&self, mut features: FeatureMap) -> Result<FeatureMap, PyramidError> {
        let mut selected = FeatureMap::new();
        for &level in self.levels() {
            let tensor = features.remove(&level).ok_or_else(|| {
                PyramidError::shape(level.name(), format!("backbone mode {} did not produce {level}", self.name()))
            })?;
            selected.insert(level, tensor);
        }
        Ok(selected)
    }
}

impl fmt::Display for BackboneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackboneMode {
    type Err = PyramidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "x2" => Ok(BackboneMode::X2),
            "x3" => Ok(BackboneMode::X3),
            "x4" => Ok(BackboneMode::X4),
            "all" => Ok(BackboneMode::All),
            other => Err(PyramidError::config(
                "backbone",
                format!("unknown backbone mode '{other}' (expected x2, x3, x4 or all)"),
            )),
        }
    }
}

impl TryFrom<String> for BackboneMode {
    type Error = PyramidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackboneMode> for String {
    fn from(mode: BackboneMode) -> Self {
        mode.name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn map(levels: &[FeatureLevel]) -> FeatureMap {
        levels
            .iter()
            .map(|&l| (l, Tensor::zeros((1, 1, 1, 1, 1), DType::F32, &Device::Cpu).unwrap()))
            .collect()
    }

    #[test]
    fn test_select_drops_unused_levels() {
        let selected = BackboneMode::X3.select(map(&FeatureLevel::ALL)).unwrap();
        assert_eq!(selected.keys().copied().collect::<Vec<_>>(), vec![FeatureLevel::X3]);
    }

    #[test]
    fn test_select_reports_missing_level() {
        let err = BackboneMode::All.select(map(&[FeatureLevel::X1, FeatureLevel::X2])).unwrap_err();
        assert!(matches!(err, PyramidError::Shape { ref branch, .. } if branch == "x3"));
    }

    #[test]
    fn test_emits() {
        assert!(BackboneMode::All.emits(FeatureLevel::X1));
        assert!(!BackboneMode::X4.emits(FeatureLevel::X1));
        assert_eq!("all".parse::<BackboneMode>().unwrap(), BackboneMode::default());
    }
}
