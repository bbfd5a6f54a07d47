use {
    crate::{
        config::PoolMode,
        error::PyramidError,
        level::{Extent, PyramidLevelSpec},
    },
    candle_core::{Result, Tensor},
};

/// Split an axis of `extent` positions into `bins` contiguous partitions.
///
/// Partition `i` is `[floor(i·E/n), floor((i+1)·E/n))`, returned as
/// `(start, len)`. The partitions are disjoint, cover the axis exactly once and
/// are all non-empty when `extent >= bins`.
pub fn partitions(extent: usize, bins: usize) -> Vec<(usize, usize)> {
    (0..bins)
        .map(|i| {
            let start = i * extent / bins;
            let end = (i + 1) * extent / bins;
            (start, end - start)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reduction {
    Max,
    Avg,
    /// Softmax-weighted average of each bin.
    Soft,
}

impl Reduction {
    /// Reduce (B, C, N) to (B, C).
    fn reduce(&self, cell: &Tensor) -> Result<Tensor> {
        match self {
            Reduction::Max => cell.max(2),
            Reduction::Avg => cell.mean(2),
            Reduction::Soft => {
                let weights = candle_nn::ops::softmax(cell, 2)?;
                (weights * cell)?.sum(2)
            }
        }
    }
}

/// Spatial pyramid pooling over (time, height, width).
///
/// Each pyramid entry `j` pools every channel into
/// `time[j] × height[j] × width[j]` adaptive bins and flattens the result to
/// (batch, bins·channels), channel-major. Output widths depend only on the
/// spec and the channel count, never on the input extent.
#[derive(Debug, Clone)]
pub struct SpatialPyramidPool {
    spec: PyramidLevelSpec,
    reduction: Reduction,
}

impl SpatialPyramidPool {
    pub fn new(spec: PyramidLevelSpec, mode: PoolMode, soft: bool) -> std::result::Result<Self, PyramidError> {
        spec.validate("spp")?;
        let reduction = match (mode, soft) {
            (_, true) => Reduction::Soft,
            (PoolMode::Max, false) => Reduction::Max,
            (PoolMode::Avg, false) => Reduction::Avg,
        };
        Ok(Self { spec, reduction })
    }

    pub fn spec(&self) -> &PyramidLevelSpec {
        &self.spec
    }

    pub fn entries(&self) -> usize {
        self.spec.entries()
    }

    /// Total descriptor width over all entries.
    pub fn output_width(&self, channels: usize) -> usize {
        self.spec.entry_widths(channels).iter().sum()
    }

    /// Whether every entry has at least one position per bin on `extent`.
    pub fn fits(&self, extent: Extent) -> bool {
        let limits = extent.as_array();
        (0..self.entries()).all(|j| {
            self.spec
                .bins(j)
                .as_array()
                .iter()
                .zip(limits)
                .all(|(&bins, limit)| bins <= limit)
        })
    }

    /// Pool `xs` (B, C, T, H, W) into one (B, bins·C) tensor per entry.
    pub fn forward(&self, xs: &Tensor) -> Result<Vec<Tensor>> {
        let (_b, _c, t, h, w) = xs.dims5()?;
        if !self.fits(Extent::new(t, h, w)) {
            candle_core::bail!("extent {t}x{h}x{w} is smaller than the pooling pyramid");
        }
        (0..self.entries())
            .map(|j| self.pool_entry(xs, self.spec.bins(j), Extent::new(t, h, w)))
            .collect()
    }

    fn pool_entry(&self, xs: &Tensor, bins: Extent, extent: Extent) -> Result<Tensor> {
        let mut cells = Vec::with_capacity(bins.time * bins.height * bins.width);
        for (ts, tl) in partitions(extent.time, bins.time) {
            let xt = xs.narrow(2, ts, tl)?;
            for (hs, hl) in partitions(extent.height, bins.height) {
                let xh = xt.narrow(3, hs, hl)?;
                for (ws, wl) in partitions(extent.width, bins.width) {
                    let cell = xh.narrow(4, ws, wl)?.flatten_from(2)?;
                    cells.push(self.reduction.reduce(&cell)?);
                }
            }
        }
        Tensor::stack(&cells, 2)?.flatten_from(1)
    }
}
