use {
    crate::{
        backbone::FeatureMap,
        blocks::{Conv3d, resample_nearest3d},
        config::Pathway,
        error::PyramidError,
        layout::Branch,
        level::{Extent, FeatureLevel},
        registry::Registry,
    },
    candle_core::{Module, Tensor},
    candle_nn::VarBuilder,
};

/// Top-down / bottom-up resample-and-add propagation across levels.
///
/// Along each pathway the first level passes through as is; every later level
/// receives the previous output resampled to its own extent, adds it to its
/// projection and runs a 3x3x3 smoothing conv owned by that (pathway, level).
/// With `smooth_entry` the first level is smoothed as well.
#[derive(Debug)]
pub struct PathwayPropagator {
    pathways: Vec<Pathway>,
    levels: Vec<FeatureLevel>,
    smooths: Registry<Branch, Conv3d>,
    smooth_entry: bool,
}

impl PathwayPropagator {
    pub fn load(
        vb: VarBuilder,
        pathways: &[Pathway],
        levels: &[FeatureLevel],
        width: usize,
        smooth_entry: bool,
    ) -> Result<Self, PyramidError> {
        let smoothed = pathways.iter().flat_map(|&pathway| {
            pathway
                .traversal(levels)
                .into_iter()
                .enumerate()
                .filter(move |(i, _)| *i > 0 || smooth_entry)
                .map(move |(_, level)| Branch::on(pathway, level))
        });
        let smooths = Registry::build(smoothed, |branch| {
            Conv3d::load(vb.pp(format!("smooths.{branch}")), width, width, 3)
        })?;
        Ok(Self {
            pathways: pathways.to_vec(),
            levels: levels.to_vec(),
            smooths,
            smooth_entry,
        })
    }

    pub fn smooth_entry(&self) -> bool {
        self.smooth_entry
    }

    /// Branches that own a smoothing conv, in construction order.
    pub fn smoothed_branches(&self) -> impl Iterator<Item = &Branch> {
        self.smooths.keys()
    }

    fn smooth(&self, branch: &Branch, xs: &Tensor) -> Result<Tensor, PyramidError> {
        let conv = self
            .smooths
            .get(branch)
            .ok_or_else(|| PyramidError::shape(branch.to_string(), "no smoothing conv for branch"))?;
        Ok(conv.forward(xs)?)
    }

    /// Run every pathway over `projected`, returning one tensor per branch in
    /// `branches` order.
    pub fn forward(&self, projected: &FeatureMap, branches: &[Branch]) -> Result<Registry<Branch, Tensor>, PyramidError> {
        let mut outputs = Vec::with_capacity(self.pathways.len() * self.levels.len());
        for &pathway in &self.pathways {
            let mut previous: Option<Tensor> = None;
            for (i, level) in pathway.traversal(&self.levels).into_iter().enumerate() {
                let branch = Branch::on(pathway, level);
                let xs = projected
                    .get(&level)
                    .ok_or_else(|| PyramidError::shape(branch.to_string(), "projected level missing"))?;
                let ys = match previous {
                    Some(prev) => {
                        let (_b, _c, t, h, w) = xs.dims5()?;
                        let merged = (resample_nearest3d(&prev, Extent::new(t, h, w))? + xs)?;
                        self.smooth(&branch, &merged)?
                    }
                    None if self.smooth_entry => self.smooth(&branch, xs)?,
                    None => xs.clone(),
                };
                base::log_debug!("pathway {branch} step {i}: {:?}", ys.dims());
                previous = Some(ys.clone());
                outputs.push((branch, ys));
            }
        }
        Registry::complete(branches, outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn projected(device: &Device) -> FeatureMap {
        let mut map = FeatureMap::new();
        map.insert(FeatureLevel::X1, Tensor::randn(0f32, 1.0, (1, 4, 4, 8, 8), device).unwrap());
        map.insert(FeatureLevel::X2, Tensor::randn(0f32, 1.0, (1, 4, 2, 4, 4), device).unwrap());
        map.insert(FeatureLevel::X3, Tensor::randn(0f32, 1.0, (1, 4, 1, 3, 3), device).unwrap());
        map
    }

    fn branches(pathways: &[Pathway], levels: &[FeatureLevel]) -> Vec<Branch> {
        pathways
            .iter()
            .flat_map(|&p| levels.iter().map(move |&l| Branch::on(p, l)))
            .collect()
    }

    #[test]
    fn test_outputs_keep_native_extent() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let levels = [FeatureLevel::X1, FeatureLevel::X2, FeatureLevel::X3];
        let pathways = [Pathway::TopDown, Pathway::BottomUp];

        let propagator = PathwayPropagator::load(vb, &pathways, &levels, 4, false).unwrap();
        let inputs = projected(&device);
        let outputs = propagator.forward(&inputs, &branches(&pathways, &levels)).unwrap();

        assert_eq!(outputs.len(), 6);
        for (branch, ys) in outputs.iter() {
            assert_eq!(ys.dims(), inputs[&branch.level].dims(), "branch {branch}");
        }
    }

    #[test]
    fn test_entry_level_passes_through() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let levels = [FeatureLevel::X1, FeatureLevel::X2, FeatureLevel::X3];

        let propagator = PathwayPropagator::load(vb, &[Pathway::TopDown], &levels, 4, false).unwrap();
        let inputs = projected(&device);
        let outputs = propagator
            .forward(&inputs, &branches(&[Pathway::TopDown], &levels))
            .unwrap();

        let entry = outputs.get(&Branch::on(Pathway::TopDown, FeatureLevel::X3)).unwrap();
        let diff = (entry - &inputs[&FeatureLevel::X3])
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert_eq!(diff, 0.0);
    }

    #[test]
    fn test_smooth_convs_skip_entry_level() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let levels = [FeatureLevel::X1, FeatureLevel::X2, FeatureLevel::X3];

        let propagator = PathwayPropagator::load(vb, &[Pathway::TopDown, Pathway::BottomUp], &levels, 4, false).unwrap();
        let names: Vec<_> = propagator.smoothed_branches().map(|b| b.to_string()).collect();
        assert_eq!(
            names,
            vec!["topdown_x2", "topdown_x1", "bottomup_x2", "bottomup_x3"]
        );
    }

    #[test]
    fn test_smooth_entry_adds_entry_convs() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let levels = [FeatureLevel::X1, FeatureLevel::X2];

        let propagator = PathwayPropagator::load(vb, &[Pathway::BottomUp], &levels, 4, true).unwrap();
        assert!(propagator.smooth_entry());
        assert_eq!(propagator.smoothed_branches().count(), 2);

        let inputs = projected(&device);
        let outputs = propagator
            .forward(&inputs, &branches(&[Pathway::BottomUp], &levels))
            .unwrap();
        assert_eq!(outputs.get(&Branch::on(Pathway::BottomUp, FeatureLevel::X1)).unwrap().dims(), &[1, 4, 4, 8, 8]);
    }
}
