use {
    crate::{
        backbone::FeatureMap,
        blocks::Conv3d,
        error::PyramidError,
        level::FeatureLevel,
        registry::Registry,
    },
    candle_core::Module,
    candle_nn::VarBuilder,
};

/// Per-level 1x1x1 convolution from the backbone width to `conv_size`.
#[derive(Debug)]
pub struct LevelProjector {
    convs: Registry<FeatureLevel, Conv3d>,
    width: usize,
}

impl LevelProjector {
    pub fn load(vb: VarBuilder, levels: &[FeatureLevel], width: usize) -> Result<Self, PyramidError> {
        let convs = Registry::build(levels.iter().copied(), |level| {
            Conv3d::load(vb.pp(format!("first_convs.{level}")), level.channels(), width, 1)
        })?;
        Ok(Self { convs, width })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Project every configured level; extra levels in `features` are ignored.
    pub fn forward(&self, features: &FeatureMap) -> Result<FeatureMap, PyramidError> {
        let mut projected = FeatureMap::new();
        for (level, conv) in self.convs.iter() {
            let xs = features
                .get(level)
                .ok_or_else(|| PyramidError::shape(level.name(), "level missing from backbone output"))?;
            let dims = xs.dims();
            if dims.len() != 5 {
                return Err(PyramidError::shape(
                    level.name(),
                    format!("expected (batch, channel, T, H, W), got {dims:?}"),
                ));
            }
            if dims[1] != level.channels() {
                return Err(PyramidError::shape(
                    level.name(),
                    format!("expected {} channels, got {}", level.channels(), dims[1]),
                ));
            }
            projected.insert(*level, conv.forward(xs)?);
        }
        Ok(projected)
    }
}
