//! Forward passes of the message-passing model on synthetic jets.
//!
//! ```sh
//! RUST_LOG=debug cargo run -p jetgraph-nn --example nmp_demo
//! ```

use anyhow::Result;
use candle_core::Device;
use candle_nn::VarMap;
use jetgraph_nn::{GraphBatch, GraphGen, HybridConfig, Nmp, NmpConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// A jet of `n` particles as `(p, eta, phi, E, E/E_jet, pT, theta)` rows.
fn synthetic_jet(rng: &mut StdRng, n: usize) -> Vec<Vec<f32>> {
    let axis_eta: f32 = rng.random_range(-1.5..1.5);
    let axis_phi: f32 = rng.random_range(-3.0..3.0);
    let energies: Vec<f32> = (0..n).map(|_| rng.random_range(1.0..50.0)).collect();
    let total: f32 = energies.iter().sum();

    energies
        .iter()
        .map(|&e| {
            let eta = axis_eta + rng.random_range(-0.4..0.4);
            let phi = axis_phi + rng.random_range(-0.4..0.4);
            let pt = e / eta.cosh();
            let theta = 2.0 * (-eta).exp().atan();
            vec![e, eta, phi, e, e / total, pt, theta]
        })
        .collect()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let device = Device::Cpu;
    let mut rng = StdRng::seed_from_u64(7);
    let jets: Vec<Vec<Vec<f32>>> = [12, 5, 9, 20]
        .iter()
        .map(|&n| synthetic_jet(&mut rng, n))
        .collect();
    let batch = GraphBatch::from_graphs(&jets, &device)?;
    info!(
        jets = batch.batch_size(),
        max_particles = batch.max_nodes(),
        "built batch"
    );

    for adjacency in ["learned", "physics", "hybrid", "ones"] {
        let config = NmpConfig::default()
            .with_hidden(32)
            .with_adjacency(adjacency)
            .with_readout("clf")
            .with_hybrid(HybridConfig {
                learned_tradeoff: true,
                ..Default::default()
            });
        let varmap = VarMap::new();
        let model = Nmp::from_varmap(config, &varmap, &device)?;
        let out = model.forward(&batch)?;
        let probabilities = out.prediction.flatten_all()?.to_vec1::<f32>()?;
        info!(adjacency, ?probabilities, "classified jets");
    }

    let config = NmpConfig::default()
        .with_hidden(16)
        .with_iters(4)
        .with_variable_depth(true);
    let varmap = VarMap::new();
    let mut model = Nmp::from_varmap(config.clone(), &varmap, &device)?;
    for step in 0..3 {
        let out = model.forward_train(&batch)?;
        let loss = out.prediction.sqr()?.mean_all()?.to_scalar::<f32>()?;
        info!(step, loss, "variable-depth forward");
    }

    let varmap = VarMap::new();
    let vb = candle_nn::VarBuilder::from_varmap(&varmap, candle_core::DType::F32, &device);
    let generator = GraphGen::new(&config, vb)?;
    let generated = generator.forward(&batch)?;
    info!(shape = ?generated.dims(), "generated adjacency");

    Ok(())
}
