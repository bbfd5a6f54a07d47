// Building blocks shared by the pyramid head: 3D convolution on top of
// candle's 2D kernels, nearest-neighbour resampling and fully-connected stacks.

use {
    crate::{
        config::{Activation, FcConfig},
        level::Extent,
    },
    candle_core::{Module, ModuleT, Result, Tensor},
    candle_nn::{batch_norm, init::Init, linear, BatchNorm, Dropout, Linear, VarBuilder},
};

impl Module for Activation {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Activation::Relu => xs.relu(),
            Activation::Sigmoid => candle_nn::ops::sigmoid(xs),
            Activation::Tanh => xs.tanh(),
            Activation::LeakyRelu => candle_nn::ops::leaky_relu(xs, 0.01),
            Activation::Elu => xs.elu(1.0),
        }
    }
}

/// Cubic 3D convolution with stride 1 and same padding.
///
/// Weights are laid out (out, in, k, k, k). The temporal axis is unrolled into
/// `k` 2D convolutions over (batch·time) frames whose results are summed.
#[derive(Debug)]
pub struct Conv3d {
    weight: Tensor,
    bias: Tensor,
    kernel: usize,
}

impl Conv3d {
    pub fn load(vb: VarBuilder, in_channels: usize, out_channels: usize, kernel: usize) -> Result<Self> {
        if kernel % 2 == 0 {
            candle_core::bail!("conv3d kernel must be odd for same padding, got {kernel}");
        }
        let weight = vb.get_with_hints(
            (out_channels, in_channels, kernel, kernel, kernel),
            "weight",
            candle_nn::init::DEFAULT_KAIMING_NORMAL,
        )?;
        let bound = 1.0 / ((in_channels * kernel * kernel * kernel) as f64).sqrt();
        let bias = vb.get_with_hints(out_channels, "bias", Init::Uniform { lo: -bound, up: bound })?;
        Ok(Self { weight, bias, kernel })
    }

    pub fn out_channels(&self) -> Result<usize> {
        self.weight.dim(0)
    }
}

impl Module for Conv3d {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (b, c, t, h, w) = xs.dims5()?;
        let out = self.weight.dim(0)?;
        let bias = self.bias.reshape((1, out, 1, 1, 1))?;

        if self.kernel == 1 {
            // Pointwise: fold time into height and run one 1x1 conv2d.
            let kernel = self.weight.reshape((out, c, 1, 1))?;
            let ys = xs.reshape((b, c, t * h, w))?.conv2d(&kernel, 0, 1, 1, 1)?;
            return ys.reshape((b, out, t, h, w))?.broadcast_add(&bias);
        }

        let pad = self.kernel / 2;
        let padded = xs.pad_with_zeros(2, pad, pad)?;
        let mut acc: Option<Tensor> = None;
        for dt in 0..self.kernel {
            let frames = padded
                .narrow(2, dt, t)?
                .permute((0, 2, 1, 3, 4))?
                .contiguous()?
                .reshape((b * t, c, h, w))?;
            let kernel = self.weight.narrow(2, dt, 1)?.squeeze(2)?.contiguous()?;
            let ys = frames.conv2d(&kernel, pad, 1, 1, 1)?;
            acc = Some(match acc {
                Some(sum) => (sum + ys)?,
                None => ys,
            });
        }
        let Some(ys) = acc else {
            candle_core::bail!("conv3d with an empty kernel");
        };
        ys.reshape((b, t, out, h, w))?
            .permute((0, 2, 1, 3, 4))?
            .broadcast_add(&bias)
    }
}

/// Source index read by each of `dst` output positions (floor of `i·src/dst`).
pub fn nearest_indices(src: usize, dst: usize) -> Vec<u32> {
    (0..dst)
        .map(|i| ((i * src) / dst).min(src.saturating_sub(1)) as u32)
        .collect()
}

/// Nearest-neighbour resampling of a (B, C, T, H, W) tensor to `target`.
pub fn resample_nearest3d(xs: &Tensor, target: Extent) -> Result<Tensor> {
    let (_b, _c, t, h, w) = xs.dims5()?;
    let mut ys = xs.clone();
    for (dim, src, dst) in [(2, t, target.time), (3, h, target.height), (4, w, target.width)] {
        if src == dst {
            continue;
        }
        if src == 0 || dst == 0 {
            candle_core::bail!("cannot resample axis {dim} from {src} to {dst}");
        }
        let index = Tensor::from_vec(nearest_indices(src, dst), dst, xs.device())?;
        ys = ys.index_select(&index, dim)?;
    }
    Ok(ys)
}

/// `Linear → [BatchNorm] → activation → Dropout`.
#[derive(Debug)]
pub struct FcBlock {
    linear: Linear,
    bn: Option<BatchNorm>,
    activation: Activation,
    dropout: Dropout,
}

impl FcBlock {
    pub fn load(vb: VarBuilder, in_dim: usize, out_dim: usize, fc: &FcConfig) -> Result<Self> {
        let linear = linear(in_dim, out_dim, vb.pp("linear"))?;
        let bn = if fc.batch_norm {
            Some(batch_norm(out_dim, 1e-5, vb.pp("bn"))?)
        } else {
            None
        };
        Ok(Self {
            linear,
            bn,
            activation: fc.activation,
            dropout: Dropout::new(fc.dropout_rate),
        })
    }

    /// Everything up to and including the activation.
    pub fn embed(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let xs = xs.apply(&self.linear)?;
        let xs = match &self.bn {
            Some(bn) => xs.apply_t(bn, train)?,
            None => xs,
        };
        xs.apply(&self.activation)
    }

    pub fn dropout(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        xs.apply_t(&self.dropout, train)
    }
}

impl ModuleT for FcBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let xs = self.embed(xs, train)?;
        self.dropout(&xs, train)
    }
}

/// `blocks` × [`FcBlock`] of width `fc.layer_hidden`, then a linear projection.
#[derive(Debug)]
pub struct FcStack {
    blocks: Vec<FcBlock>,
    output: Linear,
}

impl FcStack {
    pub fn load(vb: VarBuilder, in_dim: usize, fc: &FcConfig, blocks: usize, out_dim: usize) -> Result<Self> {
        let mut layers = Vec::with_capacity(blocks);
        let mut width = in_dim;
        for i in 0..blocks {
            layers.push(FcBlock::load(vb.pp(format!("blocks.{i}")), width, fc.layer_hidden, fc)?);
            width = fc.layer_hidden;
        }
        let output = linear(width, out_dim, vb.pp("out"))?;
        Ok(Self {
            blocks: layers,
            output,
        })
    }
}

impl ModuleT for FcStack {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let mut xs = xs.clone();
        for block in &self.blocks {
            xs = xs.apply_t(block, train)?;
        }
        xs.apply(&self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};

    #[test]
    fn test_conv3d_pointwise_keeps_extent() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let conv = Conv3d::load(vb.pp("conv"), 16, 4, 1).unwrap();
        let input = Tensor::randn(0f32, 1.0, (2, 16, 3, 5, 7), &device).unwrap();
        let output = conv.forward(&input).unwrap();
        assert_eq!(output.dims(), &[2, 4, 3, 5, 7]);
    }

    #[test]
    fn test_conv3d_same_padding_keeps_extent() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let conv = Conv3d::load(vb.pp("smooth"), 4, 4, 3).unwrap();
        let input = Tensor::randn(0f32, 1.0, (1, 4, 1, 6, 6), &device).unwrap();
        let output = conv.forward(&input).unwrap();
        assert_eq!(output.dims(), &[1, 4, 1, 6, 6]);
    }

    #[test]
    fn test_conv3d_rejects_even_kernel() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        assert!(Conv3d::load(vb.pp("conv"), 4, 4, 2).is_err());
    }

    #[test]
    fn test_conv3d_matches_direct_sum() {
        // Single channel, all-ones kernel: every output is the sum of its
        // zero-padded 3x3x3 neighbourhood plus the bias.
        let device = Device::Cpu;
        let conv = Conv3d {
            weight: Tensor::ones((1, 1, 3, 3, 3), DType::F32, &device).unwrap(),
            bias: Tensor::zeros(1, DType::F32, &device).unwrap(),
            kernel: 3,
        };
        let input = Tensor::ones((1, 1, 3, 3, 3), DType::F32, &device).unwrap();
        let output = conv.forward(&input).unwrap();
        let values = output.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        // Centre sees all 27 voxels, a corner sees 8.
        assert_eq!(values[13], 27.0);
        assert_eq!(values[0], 8.0);
    }

    #[test]
    fn test_nearest_indices() {
        assert_eq!(nearest_indices(2, 4), vec![0, 0, 1, 1]);
        assert_eq!(nearest_indices(3, 7), vec![0, 0, 0, 1, 1, 2, 2]);
        assert_eq!(nearest_indices(4, 2), vec![0, 2]);
    }

    #[test]
    fn test_resample_matches_target_extent() {
        let device = Device::Cpu;
        let input = Tensor::randn(0f32, 1.0, (2, 3, 1, 4, 4), &device).unwrap();
        let output = resample_nearest3d(&input, Extent::new(2, 7, 8)).unwrap();
        assert_eq!(output.dims(), &[2, 3, 2, 7, 8]);
    }

    #[test]
    fn test_resample_repeats_values() {
        let device = Device::Cpu;
        let input = Tensor::new(&[1f32, 2.0], &device)
            .unwrap()
            .reshape((1, 1, 1, 1, 2))
            .unwrap();
        let output = resample_nearest3d(&input, Extent::new(1, 1, 4)).unwrap();
        let values = output.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(values, vec![1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn test_fc_stack_output_shape() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let fc = FcConfig {
            num_layers: 2,
            layer_hidden: 16,
            batch_norm: true,
            ..FcConfig::default()
        };
        let stack = FcStack::load(vb.pp("fc"), 40, &fc, fc.num_layers, 5).unwrap();
        let input = Tensor::randn(0f32, 1.0, (3, 40), &device).unwrap();
        let output = stack.forward_t(&input, false).unwrap();
        assert_eq!(output.dims(), &[3, 5]);
    }

    #[test]
    fn test_fc_stack_without_blocks_is_linear() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let stack = FcStack::load(vb.pp("fc"), 12, &FcConfig::default(), 0, 3).unwrap();
        let input = Tensor::zeros((2, 12), DType::F32, &device).unwrap();
        assert_eq!(stack.forward_t(&input, false).unwrap().dims(), &[2, 3]);
    }

    #[test]
    fn test_activations() {
        let device = Device::Cpu;
        let xs = Tensor::new(&[-1f32, 0.0, 2.0], &device).unwrap();
        let relu = Activation::Relu.forward(&xs).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(relu, vec![0.0, 0.0, 2.0]);
        let sigmoid = Activation::Sigmoid.forward(&xs).unwrap().to_vec1::<f32>().unwrap();
        assert!((sigmoid[1] - 0.5).abs() < 1e-6);
        let tanh = Activation::Tanh.forward(&xs).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(tanh[1], 0.0);
        let leaky = Activation::LeakyRelu.forward(&xs).unwrap().to_vec1::<f32>().unwrap();
        assert!((leaky[0] + 0.01).abs() < 1e-6);
        let elu = Activation::Elu.forward(&xs).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(elu[2], 2.0);
    }
}
