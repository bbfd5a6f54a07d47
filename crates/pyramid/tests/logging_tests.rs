use base::{Level, MemoryLogger};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use pyramid::{FcConfig, FeatureLevel, FeatureMap, Pathway, Pyramid, PyramidConfig};

// One test per binary: the logger is process-wide.
#[test]
fn test_construction_and_forward_are_logged() {
    let logger = MemoryLogger::new();
    base::install(Box::new(logger.clone()));
    base::set_max_level(Level::Debug);

    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

    let mut single = PyramidConfig::single_level(FeatureLevel::X4, 4);
    single.pathways = vec![Pathway::TopDown];
    single.conv_size = 4;
    single.fc = FcConfig {
        num_layers: 1,
        layer_hidden: 8,
        ..FcConfig::default()
    };
    let model = Pyramid::load(vb.pp("single"), &single).unwrap();
    assert!(logger.contains(Level::Warn, "pathways [topdown] ignored"));
    assert!(logger.contains(Level::Info, "levels [x4]"));

    let mut features = FeatureMap::new();
    features.insert(
        FeatureLevel::X4,
        Tensor::randn(0f32, 1.0, (1, 2048, 1, 4, 4), &device).unwrap(),
    );
    model.forward(&features).unwrap();

    for stage in ["projected", "pooled", "head-split", "fused", "final"] {
        assert!(logger.contains(Level::Debug, stage), "missing stage {stage}");
    }
    assert!(!logger.contains(Level::Debug, "propagated"));

    base::set_max_level(Level::Info);
    let before = logger.lines().len();
    model.forward(&features).unwrap();
    assert_eq!(logger.lines().len(), before);
}
