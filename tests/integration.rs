//! Integration tests for lotto_nn
//!
//! These tests verify the end-to-end functionality of the library.

use approx::assert_relative_eq;
use ndarray::{array, Array1};
use rand::prelude::*;
use tempfile::tempdir;

use lotto_nn::prelude::*;

/// Draw history where each draw shifts the previous one by one number
fn cyclic_draws(total_numbers: usize, per_draw: usize, count: usize) -> Vec<Vec<usize>> {
    (0..count)
        .map(|d| {
            (0..per_draw)
                .map(|k| (d + k * 3) % total_numbers + 1)
                .collect()
        })
        .collect()
}

fn small_config(total_numbers: usize, window: usize) -> Config {
    let mut config = Config::default();
    config.data.total_numbers = total_numbers;
    config.data.numbers_per_draw = 2;
    config.data.window = window;
    config.network.learning_rate = 0.01;
    config.network.seed = Some(42);
    config.network.positive_prior = Some(2.0 / total_numbers as f64);
    config.layers = vec![
        LayerSpec::dense("hidden", LayerType::Hidden, 16, ActivationType::Tanh)
            .with_init(WeightInit::Xavier),
        LayerSpec::dense("output", LayerType::Output, total_numbers, ActivationType::Sigmoid)
            .with_init(WeightInit::Xavier),
    ];
    for spec in &mut config.layers {
        spec.l1_lambda = 0.0;
        spec.l2_lambda = 0.0;
    }
    config.training = TrainingConfig {
        epochs: 60,
        batch_size: 4,
        shuffle: true,
        seed: Some(42),
        checkpoint_every: 0,
        checkpoint_path: None,
    };
    config
}

#[test]
fn test_full_pipeline_on_encoded_draws() {
    let total_numbers = 10;
    let config = small_config(total_numbers, 2);
    let encoder = DrawWindowEncoder::new(total_numbers, config.data.window).unwrap();
    let draws = cyclic_draws(total_numbers, 2, 40);

    let dataset = Dataset::new(encoder.encode_samples(&draws).unwrap()).unwrap();
    assert_eq!(dataset.len(), 38);
    assert_eq!(dataset.input_width(), 20);

    let mut network = config.build_network(dataset.input_width()).unwrap();
    let before = Trainer::evaluate(&network, &dataset).unwrap();

    let mut trainer = Trainer::new(config.training.clone()).unwrap();
    let history = trainer.fit(&mut network, &dataset).unwrap();
    assert_eq!(history.epochs.len(), 60);

    let after = Trainer::evaluate(&network, &dataset).unwrap();
    assert!(after < before, "loss went from {} to {}", before, after);

    let input = encoder.latest_input(&draws).unwrap();
    let output = network.predict(&input).unwrap();
    assert_eq!(output.len(), total_numbers);
    assert!(output.iter().all(|p| *p > 0.0 && *p < 1.0));
}

#[test]
fn test_checkpoint_resumes_exactly() {
    let config = small_config(6, 1);
    let encoder = DrawWindowEncoder::new(6, 1).unwrap();
    let dataset = Dataset::new(encoder.encode_samples(&cyclic_draws(6, 2, 12)).unwrap()).unwrap();
    let (inputs, targets) = dataset.to_arrays();

    let mut network = config.build_network(dataset.input_width()).unwrap();
    for epoch in 1..=5 {
        network.train_batch(epoch, &inputs, &targets).unwrap();
    }

    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    network.save(&path).unwrap();
    let mut restored = NeuralNetwork::load(&path).unwrap();
    assert_eq!(restored.epoch, 5);

    // Same predictions right after restore
    assert_eq!(
        network.predict_batch(&inputs).unwrap(),
        restored.predict_batch(&inputs).unwrap()
    );

    // Adam state travels with the checkpoint, so further steps match bit for bit
    for epoch in 6..=8 {
        let a = network.train_batch(epoch, &inputs, &targets).unwrap();
        let b = restored.train_batch(epoch, &inputs, &targets).unwrap();
        assert_eq!(a.loss, b.loss);
    }
    for (a, b) in network.layers().iter().zip(restored.layers()) {
        let (a, b) = (a.as_dense().unwrap(), b.as_dense().unwrap());
        assert_eq!(a.weights, b.weights);
        assert_eq!(a.biases, b.biases);
    }
}

#[test]
fn test_trainer_resume_from_checkpoint_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("runs").join("model.json");

    let mut config = small_config(6, 1);
    config.training.epochs = 3;
    config.training.checkpoint_every = 1;
    config.training.checkpoint_path = Some(path.clone());

    let encoder = DrawWindowEncoder::new(6, 1).unwrap();
    let dataset = Dataset::new(encoder.encode_samples(&cyclic_draws(6, 2, 12)).unwrap()).unwrap();

    let mut network = config.build_network(dataset.input_width()).unwrap();
    Trainer::new(config.training.clone())
        .unwrap()
        .fit(&mut network, &dataset)
        .unwrap();

    let mut restored = NeuralNetwork::load(&path).unwrap();
    assert_eq!(restored.epoch, 3);

    config.training.epochs = 5;
    let history = Trainer::new(config.training.clone())
        .unwrap()
        .fit(&mut restored, &dataset)
        .unwrap();
    assert_eq!(history.epochs.first().map(|e| e.epoch), Some(4));
    assert_eq!(NeuralNetwork::load(&path).unwrap().epoch, 5);
}

#[test]
fn test_single_neuron_scenario() {
    let mut layer = DenseLayer::new(
        "neuron",
        LayerType::Output,
        array![[2.0]],
        array![0.0],
        ActivationType::ReLU,
    )
    .unwrap();

    assert_eq!(layer.forward(&array![3.0]).unwrap(), array![6.0]);
    let prev_delta = layer.backward(&array![1.0]).unwrap();
    assert_eq!(prev_delta, array![2.0]);
    assert_eq!(layer.accumulated_weights(), &array![[3.0]]);
    assert_eq!(layer.accumulated_biases(), &array![1.0]);
}

#[test]
fn test_adam_update_approaches_learning_rate() {
    let lr = 0.01;
    let layer = DenseLayer::new(
        "neuron",
        LayerType::Output,
        array![[10.0]],
        array![0.0],
        ActivationType::ReLU,
    )
    .unwrap()
    .with_learning_rate(lr);
    let mut layers = vec![Layer::from(layer)];
    let mut optimizer = Optimizer::Adam(Adam::new());

    let mut last_delta = 0.0;
    for _ in 0..200 {
        let before = layers[0].as_dense().unwrap().weights[[0, 0]];
        layers[0].forward(&array![1.0]).unwrap();
        layers[0].backward(&array![1.0]).unwrap();
        optimizer.step(&mut layers, GradientClipping::None);
        last_delta = before - layers[0].as_dense().unwrap().weights[[0, 0]];
    }
    assert_relative_eq!(last_delta, lr, epsilon = 1e-6);
}

#[test]
fn test_softmax_network_outputs_distribution() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut network = NeuralNetwork::new(
        LossFunction::CategoricalCrossEntropy,
        Optimizer::from_type(OptimizerType::SGD),
        RegularizationType::L1,
    )
    .with_learning_rate(0.1);
    network
        .add_layers([
            DenseLayer::with_init("hidden", LayerType::Hidden, 6, 4, ActivationType::LeakyReLU, WeightInit::He, &mut rng)
                .unwrap()
                .with_regularization(1e-4, 0.0),
            DenseLayer::with_init("output", LayerType::Output, 3, 6, ActivationType::Softmax, WeightInit::Xavier, &mut rng)
                .unwrap()
                .with_regularization(1e-4, 0.0),
        ])
        .unwrap();

    let input = Array1::from(vec![0.2, -0.4, 1.0, 0.0]);
    let target = array![0.0, 1.0, 0.0];
    let first = network.train(1, &input, &target).unwrap().loss;
    let mut last = first;
    for epoch in 2..=200 {
        last = network.train(epoch, &input, &target).unwrap().loss;
    }
    assert!(last < first);

    let output = network.predict(&input).unwrap();
    assert_relative_eq!(output.sum(), 1.0, epsilon = 1e-9);
    assert!(output[1] > output[0] && output[1] > output[2]);
}

#[test]
fn test_misconfigured_networks_fail_fast() {
    let mut config = small_config(6, 1);
    config.layers.push(LayerSpec::dense(
        "second_output",
        LayerType::Output,
        6,
        ActivationType::Sigmoid,
    ));
    assert!(matches!(
        config.build_network(6),
        Err(NnError::InvalidTopology(_))
    ));

    let mut config = small_config(6, 1);
    config.network.positive_prior = Some(1.5);
    assert!(matches!(
        config.build_network(6),
        Err(NnError::InvalidParameter(_))
    ));
}
