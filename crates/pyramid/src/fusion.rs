use {
    crate::{
        config::FusionMode,
        error::PyramidError,
        layout::{Branch, HeadKey},
        registry::Registry,
    },
    candle_core::{Result, Tensor},
};

/// Combines per-head embeddings into the final regressor input.
///
/// Head order is fixed at construction (pathway-major, then level, then
/// pyramid entry) and is the concatenation order for `concat`/`avgconcat`.
#[derive(Debug, Clone)]
pub struct FusionAggregator {
    mode: FusionMode,
    groups: Vec<(Branch, Vec<HeadKey>)>,
    layer_hidden: usize,
    width: usize,
}

impl FusionAggregator {
    /// `heads` pairs every head with its embedding width.
    pub fn new(mode: FusionMode, heads: &[(HeadKey, usize)]) -> std::result::Result<Self, PyramidError> {
        let Some(&(_, layer_hidden)) = heads.first() else {
            return Err(PyramidError::config("levels", "fusion needs at least one head"));
        };
        if let Some((key, width)) = heads.iter().find(|(_, w)| *w != layer_hidden) {
            return Err(PyramidError::config(
                format!("level_fc.{}.layer_hidden", key.branch.level),
                format!("head {key} embeds to {width} but the first head embeds to {layer_hidden}"),
            ));
        }
        let mut groups: Vec<(Branch, Vec<HeadKey>)> = Vec::new();
        for (key, _) in heads {
            match groups.iter_mut().find(|(branch, _)| *branch == key.branch) {
                Some((_, keys)) => keys.push(*key),
                None => groups.push((key.branch, vec![*key])),
            }
        }
        let width = match mode {
            FusionMode::Concat => layer_hidden * heads.len(),
            FusionMode::Avg => layer_hidden,
            FusionMode::AvgConcat => layer_hidden * groups.len(),
        };
        Ok(Self {
            mode,
            groups,
            layer_hidden,
            width,
        })
    }

    pub fn mode(&self) -> FusionMode {
        self.mode
    }

    pub fn layer_hidden(&self) -> usize {
        self.layer_hidden
    }

    /// Width of the fused vector.
    pub fn output_width(&self) -> usize {
        self.width
    }

    fn lookup<'a>(embeddings: &'a Registry<HeadKey, Tensor>, key: &HeadKey) -> Result<&'a Tensor> {
        embeddings
            .get(key)
            .ok_or_else(|| candle_core::Error::Msg(format!("missing embedding for head {key}")))
    }

    pub fn forward(&self, embeddings: &Registry<HeadKey, Tensor>) -> Result<Tensor> {
        match self.mode {
            FusionMode::Concat => {
                let mut all = Vec::new();
                for (_, keys) in &self.groups {
                    for key in keys {
                        all.push(Self::lookup(embeddings, key)?);
                    }
                }
                Tensor::cat(&all, 1)
            }
            FusionMode::Avg => {
                let mut all = Vec::new();
                for (_, keys) in &self.groups {
                    for key in keys {
                        all.push(Self::lookup(embeddings, key)?);
                    }
                }
                Tensor::stack(&all, 2)?.mean(2)
            }
            FusionMode::AvgConcat => {
                let mut per_branch = Vec::with_capacity(self.groups.len());
                for (_, keys) in &self.groups {
                    let entries = keys
                        .iter()
                        .map(|key| Self::lookup(embeddings, key))
                        .collect::<Result<Vec<_>>>()?;
                    per_branch.push(Tensor::stack(&entries, 2)?.mean(2)?);
                }
                Tensor::cat(&per_branch, 1)
            }
        }
    }
}
