pub mod backbone;
pub mod blocks;
pub mod config;
pub mod error;
pub mod fusion;
pub mod head;
pub mod layout;
pub mod level;
pub mod model;
pub mod pathway;
pub mod pool;
pub mod projector;
pub mod registry;

pub use {
    backbone::{BackboneMode, FeatureExtractor, FeatureMap},
    config::{Activation, FcConfig, FusionMode, Pathway, PoolMode, PyramidConfig, parse_levels, parse_pathways},
    error::PyramidError,
    layout::{Branch, HeadKey, Layout},
    level::{Extent, FeatureLevel, PyramidLevelSpec},
    model::{Pyramid, PyramidOutput, Stage},
    registry::Registry,
};
