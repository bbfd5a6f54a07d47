use {
    crate::{
        backbone::BackboneMode,
        error::PyramidError,
        level::{FeatureLevel, PyramidLevelSpec},
    },
    serde::{Deserialize, Serialize},
    std::{collections::BTreeMap, fmt, path::Path, str::FromStr},
};

/// Direction in which information is propagated across levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Pathway {
    /// Deep to shallow.
    TopDown,
    /// Shallow to deep.
    BottomUp,
}

impl Pathway {
    pub fn name(&self) -> &'static str {
        match self {
            Pathway::TopDown => "topdown",
            Pathway::BottomUp => "bottomup",
        }
    }

    /// Order in which `levels` (sorted shallow to deep) are visited.
    pub fn traversal(&self, levels: &[FeatureLevel]) -> Vec<FeatureLevel> {
        match self {
            Pathway::TopDown => levels.iter().rev().copied().collect(),
            Pathway::BottomUp => levels.to_vec(),
        }
    }
}

impl fmt::Display for Pathway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Pathway {
    type Err = PyramidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "topdown" => Ok(Pathway::TopDown),
            "bottomup" => Ok(Pathway::BottomUp),
            other => Err(PyramidError::config(
                "pathways",
                format!("unsupported pathway '{other}' (expected topdown, bottomup or none)"),
            )),
        }
    }
}

impl TryFrom<String> for Pathway {
    type Error = PyramidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Pathway> for String {
    fn from(pathway: Pathway) -> Self {
        pathway.name().to_string()
    }
}

/// How per-head embeddings are combined before the final regressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FusionMode {
    Concat,
    Avg,
    AvgConcat,
}

impl FusionMode {
    pub fn name(&self) -> &'static str {
        match self {
            FusionMode::Concat => "concat",
            FusionMode::Avg => "avg",
            FusionMode::AvgConcat => "avgconcat",
        }
    }

    /// Fused width for a uniform layout of `pathways × levels` branches with
    /// `entries` pyramid entries each. `pathways` is 1 in flat mode.
    pub fn output_width(&self, layer_hidden: usize, pathways: usize, levels: usize, entries: usize) -> usize {
        match self {
            FusionMode::Concat => layer_hidden * pathways * levels * entries,
            FusionMode::Avg => layer_hidden,
            FusionMode::AvgConcat => layer_hidden * pathways * levels,
        }
    }
}

impl fmt::Display for FusionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FusionMode {
    type Err = PyramidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "concat" => Ok(FusionMode::Concat),
            "avg" => Ok(FusionMode::Avg),
            "avgconcat" => Ok(FusionMode::AvgConcat),
            other => Err(PyramidError::config(
                "fusion",
                format!("unsupported fusion mode '{other}' (expected concat, avg or avgconcat)"),
            )),
        }
    }
}

impl TryFrom<String> for FusionMode {
    type Error = PyramidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FusionMode> for String {
    fn from(mode: FusionMode) -> Self {
        mode.name().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PoolMode {
    Max,
    Avg,
}

impl PoolMode {
    pub fn name(&self) -> &'static str {
        match self {
            PoolMode::Max => "max",
            PoolMode::Avg => "avg",
        }
    }
}

impl FromStr for PoolMode {
    type Err = PyramidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "max" => Ok(PoolMode::Max),
            "avg" => Ok(PoolMode::Avg),
            other => Err(PyramidError::config(
                "pooling_mode",
                format!("unsupported pooling mode '{other}' (expected max or avg)"),
            )),
        }
    }
}

impl TryFrom<String> for PoolMode {
    type Error = PyramidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PoolMode> for String {
    fn from(mode: PoolMode) -> Self {
        mode.name().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Activation {
    Relu,
    Sigmoid,
    Tanh,
    LeakyRelu,
    Elu,
}

impl Activation {
    pub fn name(&self) -> &'static str {
        match self {
            Activation::Relu => "relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
            Activation::LeakyRelu => "leakyrelu",
            Activation::Elu => "elu",
        }
    }
}

impl FromStr for Activation {
    type Err = PyramidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "relu" => Ok(Activation::Relu),
            "sigmoid" => Ok(Activation::Sigmoid),
            "tanh" => Ok(Activation::Tanh),
            "leakyrelu" => Ok(Activation::LeakyRelu),
            "elu" => Ok(Activation::Elu),
            other => Err(PyramidError::config(
                "fc.activation",
                format!("unsupported activation '{other}'"),
            )),
        }
    }
}

impl TryFrom<String> for Activation {
    type Error = PyramidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Activation> for String {
    fn from(activation: Activation) -> Self {
        activation.name().to_string()
    }
}

/// Shape of a fully-connected stack: `num_layers` blocks of
/// `Linear → [BatchNorm] → activation → Dropout`, then a linear projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FcConfig {
    pub num_layers: usize,
    pub layer_hidden: usize,
    pub activation: Activation,
    #[serde(default)]
    pub dropout_rate: f32,
    #[serde(default)]
    pub batch_norm: bool,
}

impl Default for FcConfig {
    fn default() -> Self {
        Self {
            num_layers: 2,
            layer_hidden: 2048,
            activation: Activation::Relu,
            dropout_rate: 0.0,
            batch_norm: false,
        }
    }
}

impl FcConfig {
    pub(crate) fn validate(&self, key: &str) -> Result<(), PyramidError> {
        if self.num_layers == 0 {
            return Err(PyramidError::config(
                format!("{key}.num_layers"),
                "at least one hidden block is required to split embedding and auxiliary output",
            ));
        }
        if self.layer_hidden == 0 {
            return Err(PyramidError::config(format!("{key}.layer_hidden"), "must be positive"));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(PyramidError::config(
                format!("{key}.dropout_rate"),
                format!("{} is outside [0, 1)", self.dropout_rate),
            ));
        }
        Ok(())
    }
}

fn default_fusion() -> FusionMode {
    FusionMode::Concat
}

fn default_pooling_mode() -> PoolMode {
    PoolMode::Avg
}

fn default_conv_size() -> usize {
    256
}

fn default_video_frames() -> usize {
    16
}

fn default_video_size() -> usize {
    128
}

/// Run configuration of the pyramid fusion head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PyramidConfig {
    #[serde(default)]
    pub backbone: BackboneMode,
    pub levels: Vec<FeatureLevel>,
    #[serde(default)]
    pub pathways: Vec<Pathway>,
    #[serde(default = "default_fusion")]
    pub fusion: FusionMode,
    #[serde(default = "default_pooling_mode")]
    pub pooling_mode: PoolMode,
    #[serde(default)]
    pub softpool: bool,
    /// Also smooth the first level of every pathway traversal.
    #[serde(default)]
    pub smooth_entry: bool,
    #[serde(default = "default_conv_size")]
    pub conv_size: usize,
    /// Frame count of the smallest clip the model must accept.
    #[serde(default = "default_video_frames")]
    pub video_frames: usize,
    /// Frame side of the smallest clip the model must accept.
    #[serde(default = "default_video_size")]
    pub video_size: usize,
    #[serde(default)]
    pub spp: BTreeMap<FeatureLevel, PyramidLevelSpec>,
    #[serde(default)]
    pub fc: FcConfig,
    /// Per-level overrides of `fc` for the branch heads.
    #[serde(default)]
    pub level_fc: BTreeMap<FeatureLevel, FcConfig>,
    pub output_size: usize,
}

impl PyramidConfig {
    /// All four levels, top-down pathway, concat fusion, default pyramids.
    pub fn full_pyramid(output_size: usize) -> Self {
        Self {
            backbone: BackboneMode::All,
            levels: FeatureLevel::ALL.to_vec(),
            pathways: vec![Pathway::TopDown],
            fusion: FusionMode::Concat,
            pooling_mode: PoolMode::Avg,
            softpool: false,
            smooth_entry: false,
            conv_size: default_conv_size(),
            video_frames: default_video_frames(),
            video_size: default_video_size(),
            spp: BTreeMap::new(),
            fc: FcConfig::default(),
            level_fc: BTreeMap::new(),
            output_size,
        }
    }

    /// One level, no pathway: the flat readout baseline.
    pub fn single_level(level: FeatureLevel, output_size: usize) -> Self {
        Self {
            levels: vec![level],
            pathways: Vec::new(),
            ..Self::full_pyramid(output_size)
        }
    }

    pub fn from_json(json: &str) -> Result<Self, PyramidError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PyramidError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, PyramidError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Pooling pyramid for `level`, falling back to [`FeatureLevel::default_spec`].
    pub fn spec(&self, level: FeatureLevel) -> PyramidLevelSpec {
        self.spp.get(&level).cloned().unwrap_or_else(|| level.default_spec())
    }

    /// Fully-connected config of the heads attached to `level`.
    pub fn head_fc(&self, level: FeatureLevel) -> &FcConfig {
        self.level_fc.get(&level).unwrap_or(&self.fc)
    }
}

/// Parse a comma-separated level list such as `"x1,x2,x3,x4"`.
pub fn parse_levels(s: &str) -> Result<Vec<FeatureLevel>, PyramidError> {
    s.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// Parse a comma-separated pathway list; `"none"` (or empty) means no pathway.
pub fn parse_pathways(s: &str) -> Result<Vec<Pathway>, PyramidError> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty() && *part != "none")
        .map(str::parse)
        .collect()
}
