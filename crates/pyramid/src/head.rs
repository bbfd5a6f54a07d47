use {
    crate::{
        blocks::{FcBlock, FcStack},
        config::FcConfig,
    },
    candle_core::{ModuleT, Result, Tensor},
    candle_nn::VarBuilder,
};

/// Fully-connected head of one (branch, pyramid entry) pair.
///
/// The stack is split after the first block's activation: `trunk` produces the
/// embedding that goes to fusion, `aux` continues from the same activation
/// (dropout, remaining blocks, output projection) to the auxiliary
/// prediction. Parameters under `aux` never influence the embedding.
#[derive(Debug)]
pub struct PerLevelHead {
    trunk: FcBlock,
    aux: FcStack,
    embedding_width: usize,
}

/// Embedding kept for fusion plus the auxiliary prediction.
#[derive(Debug, Clone)]
pub struct HeadOutput {
    pub embedding: Tensor,
    pub auxiliary: Tensor,
}

impl PerLevelHead {
    pub fn load(vb: VarBuilder, in_dim: usize, fc: &FcConfig, out_dim: usize) -> Result<Self> {
        if fc.num_layers == 0 {
            candle_core::bail!("a per-level head needs at least one hidden block");
        }
        let trunk = FcBlock::load(vb.pp("trunk"), in_dim, fc.layer_hidden, fc)?;
        let aux = FcStack::load(vb.pp("aux"), fc.layer_hidden, fc, fc.num_layers - 1, out_dim)?;
        Ok(Self {
            trunk,
            aux,
            embedding_width: fc.layer_hidden,
        })
    }

    pub fn embedding_width(&self) -> usize {
        self.embedding_width
    }

    pub fn embed(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        self.trunk.embed(xs, train)
    }

    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<HeadOutput> {
        let embedding = self.trunk.embed(xs, train)?;
        let auxiliary = self
            .trunk
            .dropout(&embedding, train)?
            .apply_t(&self.aux, train)?;
        Ok(HeadOutput { embedding, auxiliary })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn fc(num_layers: usize) -> FcConfig {
        FcConfig {
            num_layers,
            layer_hidden: 16,
            ..FcConfig::default()
        }
    }

    #[test]
    fn test_head_split_widths() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let head = PerLevelHead::load(vb.pp("head"), 72, &fc(2), 10).unwrap();
        let input = Tensor::randn(0f32, 1.0, (4, 72), &device).unwrap();
        let out = head.forward_t(&input, false).unwrap();
        assert_eq!(out.embedding.dims(), &[4, 16]);
        assert_eq!(out.auxiliary.dims(), &[4, 10]);
        assert_eq!(head.embedding_width(), 16);
    }

    #[test]
    fn test_single_block_head_projects_embedding() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let head = PerLevelHead::load(vb.pp("head"), 8, &fc(1), 3).unwrap();
        let input = Tensor::randn(0f32, 1.0, (2, 8), &device).unwrap();
        let out = head.forward_t(&input, true).unwrap();
        assert_eq!(out.auxiliary.dims(), &[2, 3]);
    }

    #[test]
    fn test_head_rejects_zero_layers() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        assert!(PerLevelHead::load(vb, 8, &fc(0), 3).is_err());
    }

    #[test]
    fn test_embedding_ignores_aux_weights() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let head = PerLevelHead::load(vb.pp("head"), 8, &fc(2), 3).unwrap();
        let input = Tensor::randn(0f32, 1.0, (2, 8), &device).unwrap();
        let before = head.forward_t(&input, false).unwrap();

        for (name, var) in varmap.data().lock().unwrap().iter() {
            if name.starts_with("head.aux.") {
                var.set(&Tensor::randn(0f32, 1.0, var.dims(), &device).unwrap()).unwrap();
            }
        }
        let after = head.forward_t(&input, false).unwrap();

        let diff = (&before.embedding - &after.embedding)
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert_eq!(diff, 0.0);
        let aux_diff = (&before.auxiliary - &after.auxiliary)
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(aux_diff > 0.0);
    }
}
