use {
    crate::{
        backbone::{FeatureExtractor, FeatureMap},
        blocks::FcStack,
        config::PyramidConfig,
        error::PyramidError,
        fusion::FusionAggregator,
        head::PerLevelHead,
        layout::{Branch, HeadKey, Layout},
        level::{Extent, FeatureLevel},
        pathway::PathwayPropagator,
        pool::SpatialPyramidPool,
        projector::LevelProjector,
        registry::Registry,
    },
    candle_core::{DType, Device, ModuleT, Tensor},
    candle_nn::VarBuilder,
    std::{fmt, path::Path},
};

/// Forward-pass stages, in order. `Propagated` is skipped in flat mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Projected,
    Propagated,
    Pooled,
    HeadSplit,
    Fused,
    Final,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Projected => "projected",
            Stage::Propagated => "propagated",
            Stage::Pooled => "pooled",
            Stage::HeadSplit => "head-split",
            Stage::Fused => "fused",
            Stage::Final => "final",
        };
        write!(f, "{name}")
    }
}

/// Final prediction plus one auxiliary prediction per head.
#[derive(Debug, Clone)]
pub struct PyramidOutput {
    /// (batch, output_size)
    pub prediction: Tensor,
    /// (batch, output_size) per head, in head order. Not detached.
    pub auxiliary: Registry<HeadKey, Tensor>,
}

/// Multi-scale feature pyramid fusion head.
///
/// Wires projection, pathway propagation, spatial pyramid pooling, per-head
/// fully-connected stacks, fusion and the final regressor according to a
/// [`PyramidConfig`]. Every width is fixed when the model is built; forward
/// only checks that the backbone output matches.
#[derive(Debug)]
pub struct Pyramid {
    config: PyramidConfig,
    layout: Layout,
    projector: LevelProjector,
    propagator: Option<PathwayPropagator>,
    pools: Registry<FeatureLevel, SpatialPyramidPool>,
    heads: Registry<HeadKey, PerLevelHead>,
    fusion: FusionAggregator,
    final_fc: FcStack,
}

impl Pyramid {
    pub fn load(vb: VarBuilder, config: &PyramidConfig) -> Result<Self, PyramidError> {
        let layout = Layout::new(config)?;

        let projector = LevelProjector::load(vb.clone(), &layout.levels, config.conv_size)?;

        let propagator = if layout.is_pyramid() {
            Some(PathwayPropagator::load(
                vb.clone(),
                &layout.pathways,
                &layout.levels,
                config.conv_size,
                config.smooth_entry,
            )?)
        } else {
            None
        };

        let pools = Registry::build(layout.levels.iter().copied(), |level| {
            let spec = layout
                .spec(*level)
                .cloned()
                .ok_or_else(|| PyramidError::config("levels", format!("no pyramid for {level}")))?;
            SpatialPyramidPool::new(spec, config.pooling_mode, config.softpool)
        })?;

        let heads = Registry::build(layout.heads.iter().map(|h| h.key), |key| {
            let spec = layout
                .heads
                .iter()
                .find(|h| h.key == *key)
                .ok_or_else(|| PyramidError::config("levels", format!("no head layout for {key}")))?;
            let vb = vb.pp(format!("fcs.{}.level_{}", key.branch, key.entry));
            Ok::<_, PyramidError>(PerLevelHead::load(vb, spec.input_width, &spec.fc, config.output_size)?)
        })?;

        let widths: Vec<(HeadKey, usize)> = heads.iter().map(|(k, h)| (*k, h.embedding_width())).collect();
        let fusion = FusionAggregator::new(layout.fusion, &widths)?;
        if fusion.output_width() != layout.fusion_width {
            return Err(PyramidError::config(
                "fusion",
                format!(
                    "fused width {} does not match the derived width {}",
                    fusion.output_width(),
                    layout.fusion_width
                ),
            ));
        }

        let final_fc = FcStack::load(
            vb.pp("final_fc"),
            fusion.output_width(),
            &config.fc,
            config.fc.num_layers,
            config.output_size,
        )?;

        base::log_info!(
            "pyramid: levels [{}], pathways [{}], {} branches, {} heads, {} fusion width {}",
            layout.levels.iter().map(|l| l.name()).collect::<Vec<_>>().join(","),
            layout.pathways.iter().map(|p| p.name()).collect::<Vec<_>>().join(","),
            layout.branches.len(),
            layout.heads.len(),
            layout.fusion,
            layout.fusion_width
        );

        Ok(Self {
            config: config.clone(),
            layout,
            projector,
            propagator,
            pools,
            heads,
            fusion,
            final_fc,
        })
    }

    /// Load weights from a safetensors checkpoint.
    pub fn from_safetensors(
        path: impl AsRef<Path>,
        config: &PyramidConfig,
        device: &Device,
    ) -> Result<Self, PyramidError> {
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path.as_ref()], DType::F32, device)? };
        Self::load(vb, config)
    }

    pub fn config(&self) -> &PyramidConfig {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn branches(&self) -> &[Branch] {
        &self.layout.branches
    }

    pub fn head_keys(&self) -> impl Iterator<Item = &HeadKey> {
        self.heads.keys()
    }

    /// Input width of the final regressor.
    pub fn fusion_width(&self) -> usize {
        self.fusion.output_width()
    }

    /// Evaluation-mode forward pass.
    pub fn forward(&self, features: &FeatureMap) -> Result<PyramidOutput, PyramidError> {
        self.forward_t(features, false)
    }

    /// Run a backbone on `video` and feed its selected levels through the head.
    pub fn forward_video<B: FeatureExtractor>(
        &self,
        backbone: &B,
        video: &Tensor,
        train: bool,
    ) -> Result<PyramidOutput, PyramidError> {
        let features = self.config.backbone.select(backbone.features(video)?)?;
        self.forward_t(&features, train)
    }

    pub fn forward_t(&self, features: &FeatureMap, train: bool) -> Result<PyramidOutput, PyramidError> {
        let projected = self.projector.forward(features)?;
        base::log_debug!("{}: {} levels", Stage::Projected, projected.len());

        let streams = match &self.propagator {
            Some(propagator) => {
                let streams = propagator.forward(&projected, &self.layout.branches)?;
                base::log_debug!("{}: {} branches", Stage::Propagated, streams.len());
                streams
            }
            None => {
                let flat = projected.into_iter().map(|(level, xs)| (Branch::flat(level), xs)).collect();
                Registry::complete(&self.layout.branches, flat)?
            }
        };

        let mut pooled = Vec::with_capacity(self.heads.len());
        for (branch, xs) in streams.iter() {
            let pool = self
                .pools
                .get(&branch.level)
                .ok_or_else(|| PyramidError::shape(branch.to_string(), "no pooling pyramid for level"))?;
            let (_b, _c, t, h, w) = xs.dims5()?;
            let extent = Extent::new(t, h, w);
            if !pool.fits(extent) {
                return Err(PyramidError::shape(
                    branch.to_string(),
                    format!("extent {extent} is smaller than the pooling pyramid of {}", branch.level),
                ));
            }
            for (entry, descriptor) in pool.forward(xs)?.into_iter().enumerate() {
                pooled.push((HeadKey { branch: *branch, entry }, descriptor));
            }
        }
        base::log_debug!("{}: {} descriptors", Stage::Pooled, pooled.len());

        let mut embeddings = Vec::with_capacity(pooled.len());
        let mut auxiliary = Vec::with_capacity(pooled.len());
        for (key, descriptor) in pooled {
            let head = self
                .heads
                .get(&key)
                .ok_or_else(|| PyramidError::shape(key.to_string(), "no head for pooled descriptor"))?;
            let out = head.forward_t(&descriptor, train)?;
            embeddings.push((key, out.embedding));
            auxiliary.push((key, out.auxiliary));
        }
        let keys: Vec<HeadKey> = self.heads.keys().copied().collect();
        let embeddings = Registry::complete(&keys, embeddings)?;
        let auxiliary = Registry::complete(&keys, auxiliary)?;
        base::log_debug!("{}: {} embeddings", Stage::HeadSplit, embeddings.len());

        let fused = self.fusion.forward(&embeddings)?;
        base::log_debug!("{}: {:?}", Stage::Fused, fused.dims());

        let prediction = self.final_fc.forward_t(&fused, train)?;
        base::log_debug!("{}: {:?}", Stage::Final, prediction.dims());

        Ok(PyramidOutput { prediction, auxiliary })
    }
}
