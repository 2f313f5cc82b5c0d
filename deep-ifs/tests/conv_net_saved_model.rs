//! Exercises the [ConvNet] wrapper against the saved pipeline model.
//!
//! These tests need the saved tensorflow model under
//! `tf_model/saved/conv_net_4x108x84_512`, which is produced by the python
//! model-build step. The manifest therefore declares `test = false`; run
//! explicitly with `cargo test --test conv_net_saved_model`.

use anyhow::Result;
use rand::prelude::*;

use deep_ifs::extraction::conv_net::{ConvNet, ConvNetConfig, CONV_NET_4x108x84_512_PATH};
use ifs::prelude::{FeatureExtractor, Observation};

fn random_observation(rng: &mut ThreadRng) -> Observation {
    let dims = [4, 108, 84];
    let data = (0..dims.iter().product::<usize>())
        .map(|_| rng.gen::<u8>())
        .collect();
    Observation::new(dims, data).unwrap()
}

fn load_model() -> Result<ConvNet> {
    ConvNet::load_model(&CONV_NET_4x108x84_512_PATH, ConvNetConfig::default())
}

#[test]
fn test_load_model() -> Result<()> {
    load_model()?;
    Ok(())
}

#[test]
fn test_features_have_encoding_dim_length() -> Result<()> {
    let model = load_model()?;
    let state = random_observation(&mut thread_rng());
    let features = model.features(&state)?;
    assert_eq!(features.len(), model.config().encoding_dim);
    assert!(features.iter().all(|f| f.is_finite()));
    Ok(())
}

#[test]
fn test_predict_returns_target_size_per_sample() -> Result<()> {
    let model = load_model()?;
    let mut rng = thread_rng();
    let batch: Vec<Observation> = (0..4).map(|_| random_observation(&mut rng)).collect();
    let predictions = model.predict(&batch)?;
    assert_eq!(predictions.len(), 4);
    for row in &predictions {
        assert_eq!(row.len(), model.config().target_size);
        assert!(row.iter().all(|v| v.is_finite()));
    }
    Ok(())
}

#[test]
fn test_fit_reports_a_finite_loss() -> Result<()> {
    let model = load_model()?;
    let mut rng = thread_rng();
    let batch: Vec<Observation> = (0..6).map(|_| random_observation(&mut rng)).collect();
    let targets: Vec<Vec<f32>> = (0..6).map(|_| vec![rng.gen_range(0.0..1.0)]).collect();
    let loss = model.fit(&batch, &targets)?;
    assert!(loss.is_finite());
    Ok(())
}

#[test]
fn test_save_and_reload_preserves_predictions() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut rng = thread_rng();
    let state = random_observation(&mut rng);

    let model = load_model()?;
    let before = model.predict(std::slice::from_ref(&state))?;
    let weights = model.save(dir.path(), None, "_roundtrip")?;

    // perturb the weights with one training step, then restore
    let batch: Vec<Observation> = (0..6).map(|_| random_observation(&mut rng)).collect();
    let targets: Vec<Vec<f32>> = (0..6).map(|_| vec![rng.gen_range(0.0..1.0)]).collect();
    model.fit(&batch, &targets)?;

    model.load_weights(&weights)?;
    let after = model.predict(std::slice::from_ref(&state))?;
    for (b, a) in before[0].iter().zip(after[0].iter()) {
        assert!((b - a).abs() < 1e-4, "prediction changed after reload: {b} vs {a}");
    }
    Ok(())
}
