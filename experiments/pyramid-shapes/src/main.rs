use {
    base::*,
    candle_core::{DType, Device, Tensor},
    candle_nn::{VarBuilder, VarMap},
    pyramid::*,
};

const BATCH: usize = 2;

fn usage(program: &str) -> ! {
    eprintln!("Usage: {program} [config.json] [--scales 1,2] [--log-level debug] [--log-dir dir]");
    std::process::exit(1);
}

fn preset() -> PyramidConfig {
    let mut config = PyramidConfig::full_pyramid(128);
    config.conv_size = 32;
    config.fc.layer_hidden = 64;
    config
}

/// Random backbone output for a clip `scale` times the minimum supported side.
fn synthetic_features(config: &PyramidConfig, scale: usize, device: &Device) -> Result<FeatureMap, PyramidError> {
    let mut features = FeatureMap::new();
    for &level in &config.levels {
        let extent = level.reference_extent(config.video_frames, config.video_size * scale);
        let shape = (BATCH, level.channels(), extent.time, extent.height, extent.width);
        features.insert(level, Tensor::randn(0f32, 1.0, shape, device)?);
    }
    Ok(features)
}

fn main() -> Result<(), PyramidError> {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut scales = vec![1, 2];
    let mut log_level = Level::Info;
    let mut log_dir = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--scales" | "--log-level" | "--log-dir" if i + 1 >= args.len() => usage(&args[0]),
            "--scales" => {
                scales = args[i + 1]
                    .split(',')
                    .map(|s| s.trim().parse::<usize>())
                    .collect::<Result<_, _>>()
                    .unwrap_or_else(|_| usage(&args[0]));
                i += 1;
            }
            "--log-level" => {
                log_level = args[i + 1].parse().unwrap_or_else(|_| usage(&args[0]));
                i += 1;
            }
            "--log-dir" => {
                log_dir = Some(args[i + 1].clone());
                i += 1;
            }
            "-h" | "--help" => usage(&args[0]),
            path => config_path = Some(path.to_string()),
        }
        i += 1;
    }

    match log_dir {
        Some(dir) => {
            if let Err(e) = base::init_file_logger(dir, "pyramid-shapes") {
                eprintln!("cannot open log file: {e}");
                std::process::exit(1);
            }
        }
        None => base::init_stdout_logger(),
    }
    base::set_max_level(log_level);

    let config = match &config_path {
        Some(path) => PyramidConfig::from_file(path)?,
        None => preset(),
    };
    log_info!("config:\n{}", config.to_json()?);

    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = Pyramid::load(vb, &config)?;
    log_info!(
        "{} parameters in {} tensors, fusion width {}",
        varmap.all_vars().iter().map(|v| v.elem_count()).sum::<usize>(),
        varmap.all_vars().len(),
        model.fusion_width()
    );

    for scale in scales.into_iter().filter(|&s| s > 0) {
        let features = synthetic_features(&config, scale, &device)?;
        for (level, tensor) in &features {
            log_debug!("scale {scale} {level}: {:?}", tensor.dims());
        }
        let output = model.forward(&features)?;
        log_info!(
            "scale {scale} ({}px): prediction {:?}, {} auxiliary outputs",
            config.video_size * scale,
            output.prediction.dims(),
            output.auxiliary.len()
        );
        for (key, aux) in output.auxiliary.iter() {
            log_debug!("  {key}: {:?}", aux.dims());
        }
    }
    Ok(())
}
