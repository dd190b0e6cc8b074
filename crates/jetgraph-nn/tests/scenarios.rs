//! End-to-end behaviour on small hand-built batches.

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use jetgraph_nn::adjacency::HybridAdjacency;
use jetgraph_nn::conv::AdjacencySource;
use jetgraph_nn::{
    Activation, Adjacency, AdjacencyMatrix, Aggregation, ComponentKind, Depth, Embedding, Error,
    GraphBatch, GraphReadout, HybridConfig, LearnedConfig, MessagePassing, Nmp, NmpConfig,
    PhysicsConfig, Positional, Readout, UpdateKind,
};

fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
    (a - b)
        .unwrap()
        .abs()
        .unwrap()
        .flatten_all()
        .unwrap()
        .max(0)
        .unwrap()
        .to_scalar::<f32>()
        .unwrap()
}

/// Graph A: three nodes of ones. Graph B: one node.
fn two_graphs(first_feature: f32) -> Vec<Vec<Vec<f32>>> {
    let mut a = vec![vec![1.0f32; 7]; 3];
    a[0][0] = first_feature;
    let b = vec![vec![0.5f32, -1.0, 0.2, 0.0, 2.0, 1.5, 0.3]];
    vec![a, b]
}

#[test]
fn mean_readout_uses_valid_rows_only() {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let config = NmpConfig::default()
        .with_hidden(4)
        .with_iters(0)
        .with_readout("simple");
    let model = Nmp::from_varmap(config.clone(), &varmap, &device).unwrap();

    let batch = GraphBatch::from_graphs(&two_graphs(1.0), &device).unwrap();
    assert_eq!(batch.max_nodes(), 3);
    let out = model.forward(&batch).unwrap().prediction;

    // Same parameters, looked up by name in the shared VarMap.
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let embedding = Embedding::new(
        7,
        4,
        1,
        Activation::Tanh,
        Positional::Off,
        vb.pp("embedding"),
    )
    .unwrap();
    let readout = Readout::from_key("simple", 4, 1, &config, vb.pp("readout")).unwrap();

    let h = embedding.forward(batch.features(), None).unwrap();
    let graph_a = readout.reduce(&h.narrow(0, 0, 1).unwrap(), None).unwrap();
    let graph_b = readout
        .reduce(&h.narrow(0, 1, 1).unwrap().narrow(1, 0, 1).unwrap(), None)
        .unwrap();
    let expected = Tensor::cat(&[&graph_a, &graph_b], 0).unwrap();

    assert!(max_abs_diff(&out, &expected) < 1e-6);
}

#[test]
fn perturbing_one_graph_changes_only_that_graph() {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let config = NmpConfig::default()
        .with_hidden(4)
        .with_iters(0)
        .with_readout("simple");
    let model = Nmp::from_varmap(config, &varmap, &device).unwrap();

    let base = GraphBatch::from_graphs(&two_graphs(1.0), &device).unwrap();
    let nudged = GraphBatch::from_graphs(&two_graphs(1.5), &device).unwrap();

    let before = model.forward(&base).unwrap().prediction.to_vec2::<f32>().unwrap();
    let after = model.forward(&nudged).unwrap().prediction.to_vec2::<f32>().unwrap();
    let again = model.forward(&nudged).unwrap().prediction.to_vec2::<f32>().unwrap();

    assert_eq!(before[1], after[1]);
    assert_ne!(before[0], after[0]);
    // reproducible delta
    assert_eq!(after[0][0] - before[0][0], again[0][0] - before[0][0]);
}

#[test]
fn bogus_adjacency_key_is_rejected() {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let config = NmpConfig::default().with_adjacency("bogus");
    let err = Nmp::from_varmap(config, &varmap, &device).unwrap_err();
    assert!(matches!(
        err,
        Error::UnknownVariant {
            kind: ComponentKind::Adjacency,
            ..
        }
    ));
    assert!(err.to_string().contains("bogus"));

    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let err = Adjacency::from_key("bogus", 7, &NmpConfig::default(), vb).unwrap_err();
    assert!(err.to_string().contains("bogus"));
}

#[test]
fn zero_iterations_return_embedding() {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let embedding = Embedding::new(
        7,
        5,
        2,
        Activation::Relu,
        Positional::Fixed,
        vb.pp("embedding"),
    )
    .unwrap();
    let mp = MessagePassing::new(
        5,
        0,
        false,
        Aggregation::Sum,
        UpdateKind::Gru,
        Activation::Tanh,
        vb.pp("mp"),
    )
    .unwrap();

    let batch = GraphBatch::from_graphs(&two_graphs(1.0), &device).unwrap();
    let h = embedding.forward(batch.features(), batch.mask()).unwrap();
    let a = batch.mask().unwrap().pairs().clone();
    let (out, _) = mp
        .run(h.clone(), AdjacencySource::Fixed(a), batch.mask(), Depth::Full)
        .unwrap();
    assert_eq!(out.to_vec3::<f32>().unwrap(), h.to_vec3::<f32>().unwrap());
}

#[test]
fn hybrid_reduces_to_its_components() {
    let device = Device::Cpu;
    let jets = vec![
        vec![
            vec![10.0f32, 0.1, 0.2, 10.0, 0.3, 4.0, 0.5],
            vec![8.0, -0.3, 1.1, 8.0, 0.2, 2.0, 0.6],
            vec![3.0, 0.7, -2.9, 3.0, 0.1, 1.0, 0.7],
        ],
        vec![vec![5.0, 0.0, 3.0, 5.0, 1.0, 5.0, 0.2]],
    ];
    let batch = GraphBatch::from_graphs(&jets, &device).unwrap();
    let learned = LearnedConfig {
        dim: Some(4),
        ..Default::default()
    };

    for (raw, physics_side) in [(40.0, true), (-40.0, false)] {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let hybrid = HybridConfig {
            physics_component: raw,
            learned_tradeoff: true,
            matrix_activation: "none".to_string(),
        };
        let adj =
            HybridAdjacency::new(7, &hybrid, &learned, &PhysicsConfig::default(), vb).unwrap();

        let mixed = adj.compute(batch.features(), batch.mask()).unwrap();
        let target = if physics_side {
            adj.physics().compute(batch.features(), batch.mask()).unwrap()
        } else {
            adj.learned().compute(batch.features(), batch.mask()).unwrap()
        };
        assert!(max_abs_diff(&mixed, &target) < 1e-6);
    }
}

#[test]
fn steep_physics_kernel_stays_finite_under_padding() {
    let device = Device::Cpu;
    let jets = vec![
        vec![
            vec![10.0f32, 0.1, 0.2, 10.0, 0.6, 4.0, 0.5],
            vec![8.0, -0.3, 0.5, 8.0, 0.4, 2.0, 0.6],
        ],
        vec![vec![5.0, 0.0, 3.0, 5.0, 1.0, 5.0, 0.2]],
    ];
    let batch = GraphBatch::from_graphs(&jets, &device).unwrap();
    let physics = PhysicsConfig {
        alpha: -4.0,
        ..Default::default()
    };

    for adjacency in ["physics", "hybrid"] {
        let varmap = VarMap::new();
        let config = NmpConfig::default()
            .with_hidden(6)
            .with_iters(2)
            .with_adjacency(adjacency)
            .with_physics(physics.clone());
        let model = Nmp::from_varmap(config, &varmap, &device).unwrap();
        let out = model.forward(&batch).unwrap();

        let a = out.adjacency.unwrap().to_vec3::<f32>().unwrap();
        assert_eq!(a[1][1], vec![0.0, 0.0], "{adjacency}");
        assert_eq!(a[1][0][1], 0.0, "{adjacency}");
        let prediction = out.prediction.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(prediction.iter().all(|v| v.is_finite()), "{adjacency}: {prediction:?}");
    }
}

#[test]
fn truncated_depth_cuts_gradient_to_embedding() {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let config = NmpConfig::default()
        .with_hidden(6)
        .with_iters(3)
        .with_tied(true);
    let model = Nmp::from_varmap(config, &varmap, &device).unwrap();
    let batch = GraphBatch::from_graphs(&two_graphs(1.0), &device).unwrap();

    let embedding_weight = varmap
        .data()
        .lock()
        .unwrap()
        .get("embedding.layers.0.weight")
        .cloned()
        .unwrap();
    let mp_weight = varmap
        .data()
        .lock()
        .unwrap()
        .get("mp.layer.message.weight")
        .cloned()
        .unwrap();

    let full = model.forward_with_depth(&batch, Depth::Full).unwrap();
    let grads = full.prediction.sum_all().unwrap().backward().unwrap();
    assert!(grads.get(embedding_weight.as_tensor()).is_some());

    let cut = model
        .forward_with_depth(&batch, Depth::Truncated { detached: 1 })
        .unwrap();
    let grads = cut.prediction.sum_all().unwrap().backward().unwrap();
    assert!(grads.get(embedding_weight.as_tensor()).is_none());
    assert!(grads.get(mp_weight.as_tensor()).is_some());

    // same forward values either way
    assert!(max_abs_diff(&full.prediction, &cut.prediction) < 1e-6);
}
