use {
    crate::{
        config::{FcConfig, FusionMode, Pathway, PyramidConfig},
        error::PyramidError,
        level::{FeatureLevel, PyramidLevelSpec},
    },
    std::fmt,
};

/// A pooled and headed feature stream: one level, optionally on a pathway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Branch {
    pub pathway: Option<Pathway>,
    pub level: FeatureLevel,
}

impl Branch {
    pub fn flat(level: FeatureLevel) -> Self {
        Self { pathway: None, level }
    }

    pub fn on(pathway: Pathway, level: FeatureLevel) -> Self {
        Self {
            pathway: Some(pathway),
            level,
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pathway {
            Some(pathway) => write!(f, "{}_{}", pathway, self.level),
            None => write!(f, "{}", self.level),
        }
    }
}

/// One head: a branch pooled at one pyramid entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeadKey {
    pub branch: Branch,
    pub entry: usize,
}

impl fmt::Display for HeadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/level_{}", self.branch, self.entry)
    }
}

/// Structural quantities derived from a [`PyramidConfig`] before any weight exists.
#[derive(Debug, Clone)]
pub struct Layout {
    pub levels: Vec<FeatureLevel>,
    /// Empty in flat mode.
    pub pathways: Vec<Pathway>,
    pub branches: Vec<Branch>,
    pub specs: Vec<(FeatureLevel, PyramidLevelSpec)>,
    pub heads: Vec<HeadSpec>,
    pub fusion: FusionMode,
    pub layer_hidden: usize,
    pub fusion_width: usize,
}

/// Input width and fc shape of one head.
#[derive(Debug, Clone)]
pub struct HeadSpec {
    pub key: HeadKey,
    pub input_width: usize,
    pub fc: FcConfig,
}

impl Layout {
    pub fn new(config: &PyramidConfig) -> Result<Self, PyramidError> {
        if config.levels.is_empty() {
            return Err(PyramidError::config("levels", "at least one level is required"));
        }
        let mut levels = config.levels.clone();
        levels.sort();
        levels.dedup();
        if let Some(level) = levels.iter().find(|l| !config.backbone.emits(**l)) {
            return Err(PyramidError::config(
                "levels",
                format!("backbone mode {} does not emit {level}", config.backbone),
            ));
        }
        if config.conv_size == 0 {
            return Err(PyramidError::config("conv_size", "must be positive"));
        }
        if config.output_size == 0 {
            return Err(PyramidError::config("output_size", "must be positive"));
        }
        config.fc.validate("fc")?;

        let mut pathways: Vec<Pathway> = Vec::new();
        for &pathway in &config.pathways {
            if !pathways.contains(&pathway) {
                pathways.push(pathway);
            }
        }
        if levels.len() == 1 && !pathways.is_empty() {
            base::log_warn!(
                "pathways [{}] ignored: only {} is configured",
                pathways.iter().map(|p| p.name()).collect::<Vec<_>>().join(","),
                levels[0]
            );
            pathways.clear();
        }

        let mut specs = Vec::with_capacity(levels.len());
        for &level in &levels {
            let key = format!("spp.{level}");
            let spec = config.spec(level);
            spec.validate(&key)?;
            let extent = level.reference_extent(config.video_frames, config.video_size);
            if extent.as_array().contains(&0) {
                let key = if extent.time == 0 { "video_frames" } else { "video_size" };
                return Err(PyramidError::config(
                    key,
                    format!(
                        "a {}-frame {}px clip leaves {level} with an empty extent {extent}",
                        config.video_frames, config.video_size
                    ),
                ));
            }
            spec.validate_against(&key, extent)?;
            specs.push((level, spec));
        }

        let branches: Vec<Branch> = if pathways.is_empty() {
            levels.iter().map(|&l| Branch::flat(l)).collect()
        } else {
            pathways
                .iter()
                .flat_map(|&p| levels.iter().map(move |&l| Branch::on(p, l)))
                .collect()
        };

        let layer_hidden = config.fc.layer_hidden;
        let mut heads = Vec::new();
        for branch in &branches {
            let fc = config.head_fc(branch.level);
            let key = if config.level_fc.contains_key(&branch.level) {
                format!("level_fc.{}", branch.level)
            } else {
                "fc".to_string()
            };
            fc.validate(&key)?;
            if fc.layer_hidden != layer_hidden {
                return Err(PyramidError::config(
                    format!("{key}.layer_hidden"),
                    format!(
                        "branch {branch} uses width {} but fusion requires {layer_hidden} on every branch",
                        fc.layer_hidden
                    ),
                ));
            }
            let spec = &specs
                .iter()
                .find(|(l, _)| *l == branch.level)
                .ok_or_else(|| PyramidError::config("levels", format!("no pyramid for {}", branch.level)))?
                .1;
            for (entry, width) in spec.entry_widths(config.conv_size).into_iter().enumerate() {
                heads.push(HeadSpec {
                    key: HeadKey { branch: *branch, entry },
                    input_width: width,
                    fc: fc.clone(),
                });
            }
        }

        let fusion_width = match config.fusion {
            FusionMode::Concat => layer_hidden * heads.len(),
            FusionMode::Avg => layer_hidden,
            FusionMode::AvgConcat => layer_hidden * branches.len(),
        };

        Ok(Self {
            levels,
            pathways,
            branches,
            specs,
            heads,
            fusion: config.fusion,
            layer_hidden,
            fusion_width,
        })
    }

    pub fn is_pyramid(&self) -> bool {
        !self.pathways.is_empty()
    }

    pub fn spec(&self, level: FeatureLevel) -> Option<&PyramidLevelSpec> {
        self.specs.iter().find(|(l, _)| *l == level).map(|(_, s)| s)
    }

    pub fn head_keys(&self) -> Vec<HeadKey> {
        self.heads.iter().map(|h| h.key).collect()
    }
}
