use bdcn::config::{DatasetRegistry, InferConfig, TrainConfig};
use bdcn::infer::forward_all;
use bdcn::model::{copy_weights, load_weights, read_named_tensors, save_weights};
use bdcn::train::Trainer;
use bdcn::{BdcnError, EdgeModel, ScriptedModel};
use tch::{CModule, Device, Tensor};

use test_utils::*;

#[test]
fn save_and_load_weights() {
    let dir = TmpDir::create("weights");
    let path = dir.join("net.pth");
    let src = ToyEdgeNet::new();
    save_weights(&src, &path).unwrap();
    let dst = ToyEdgeNet::new();
    let missing = load_weights(&dst, &path, false).unwrap();
    assert!(missing.is_empty());
    for ((n1, t1), (n2, t2)) in src.named_parameters().iter().zip(dst.named_parameters().iter()) {
        assert_eq!(n1, n2);
        assert_eq!(vec_f64_from(t1), vec_f64_from(t2));
    }
}

#[test]
fn python_state_dicts() {
    let dir = TmpDir::create("state-dict");
    let path = dir.join("vgg16.pth");
    let weight: Vec<f32> = (0..108).map(|i| i as f32 * 0.01).collect();
    write_state_dict(
        &path,
        &[
            ("conv1_1.weight", vec![4, 3, 3, 3], weight.clone()),
            ("conv1_1.bias", vec![4], vec![1., 2., 3., 4.]),
            ("bn1.running_mean", vec![2], vec![0., 0.]),
        ],
    );
    let named = read_named_tensors(&path, Device::Cpu).unwrap();
    assert_eq!(named.len(), 3);

    let net = ToyEdgeNet::new();
    let missing = load_weights(&net, &path, true).unwrap();
    assert_eq!(missing, ["fuse.bias", "fuse.weight", "score_dsn1.bias", "score_dsn1.weight"]);
    let params = net.named_parameters();
    assert_eq!(params[0].0, "conv1_1.bias");
    assert_eq!(vec_f64_from(&params[0].1), [1., 2., 3., 4.]);
    assert_eq!(params[1].1.size(), [4, 3, 3, 3]);
    assert_close(f64_from(&params[1].1.get(1).get(2).get(0).get(1)), 0.46);

    assert!(matches!(load_weights(&net, &path, false), Err(BdcnError::MissingParameter(_))));
}

#[test]
fn unreadable_weight_files() {
    let dir = TmpDir::create("weights-garbage");
    let path = dir.join("net.pth");
    std::fs::write(&path, b"not a weight file").unwrap();
    assert!(matches!(read_named_tensors(&path, Device::Cpu), Err(BdcnError::Checkpoint { .. })));
}

#[test]
fn partial_loads_report_missing_names() {
    let net = ToyEdgeNet::new();
    let backbone = vec![
        ("conv1_1.weight".to_string(), Tensor::ones([4, 3, 3, 3], tch::kind::FLOAT_CPU)),
        ("conv1_1.bias".to_string(), Tensor::ones([4], tch::kind::FLOAT_CPU)),
    ];
    let copies = backbone.iter().map(|(n, t)| (n.clone(), t.copy())).collect();
    let missing = copy_weights(&net, copies, true).unwrap();
    assert_eq!(missing, ["fuse.bias", "fuse.weight", "score_dsn1.bias", "score_dsn1.weight"]);
    let (_, bias) = net.named_parameters().into_iter().next().unwrap();
    assert_eq!(vec_f64_from(&bias), [1.; 4]);

    match copy_weights(&net, backbone, false) {
        Err(BdcnError::MissingParameter(name)) => assert_eq!(name, "fuse.bias"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn mismatched_shapes_are_rejected() {
    let net = ToyEdgeNet::new();
    let named = vec![("fuse.weight".to_string(), Tensor::ones([2], tch::kind::FLOAT_CPU))];
    assert!(matches!(copy_weights(&net, named, true), Err(BdcnError::Shape(_))));
}

#[test]
fn fused_is_the_last_output() {
    let net = ToyEdgeNet::new();
    let xs = Tensor::randn([1, 3, 5, 7], tch::kind::FLOAT_CPU);
    let outputs = net.forward_t(&xs, false).unwrap();
    let fused = net.fused(&xs).unwrap();
    assert_eq!(fused.size(), [1, 1, 5, 7]);
    assert_eq!(vec_f64_from(&fused), vec_f64_from(&outputs[1]));
}

// Halves the first input channel. Tracing records the closure's tensors as
// constants, so the module has no parameters.
fn traced_edge_module() -> CModule {
    let mut closure = |inputs: &[Tensor]| vec![inputs[0].narrow(1, 0, 1) * 0.5];
    let example = [Tensor::zeros([1, 3, 4, 4], tch::kind::FLOAT_CPU)];
    CModule::create_by_tracing("EdgeModule", "forward", &example, &mut closure).unwrap()
}

#[test]
fn scripted_model_from_a_saved_module() {
    let dir = TmpDir::create("scripted");
    let path = dir.join("edge.pt");
    traced_edge_module().save(&path).unwrap();
    let model = ScriptedModel::load(&path, Device::Cpu).unwrap();
    assert!(model.named_parameters().is_empty());

    let xs = Tensor::randn([1, 3, 5, 6], tch::kind::FLOAT_CPU);
    let outputs = model.forward_t(&xs, false).unwrap();
    assert_eq!(outputs.len(), 1);
    let expected = xs.narrow(1, 0, 1) * 0.5;
    assert_eq!(outputs[0].size(), [1, 1, 5, 6]);
    assert_eq!(vec_f64_from(&model.fused(&xs).unwrap()), vec_f64_from(&expected));
}

#[test]
fn scripted_model_inference() {
    let dir = TmpDir::create("scripted-infer");
    write_rgb(dir.join("a.png"), 6, 5);
    write_rgb(dir.join("b.jpg"), 4, 4);
    let mut model = ScriptedModel::new(traced_edge_module()).unwrap();
    let registry = DatasetRegistry::builtin();
    let cfg = InferConfig::new(dir.path(), registry.test("nyudv2").unwrap(), Device::Cpu);
    let summary = forward_all(&mut model, &cfg).unwrap();
    assert_eq!(summary.processed, ["a.png", "b.jpg"]);
    let edges = image::open(dir.join("bdcn").join("a.png")).unwrap();
    assert_eq!((edges.width(), edges.height()), (6, 5));
}

#[test]
fn a_model_without_parameters_cannot_be_trained() {
    let dir = TmpDir::create("scripted-train");
    let mut model = ScriptedModel::new(traced_edge_module()).unwrap();
    let cfg = TrainConfig { param_dir: dir.path().to_path_buf(), ..TrainConfig::default() };
    assert!(matches!(Trainer::new(&mut model, cfg), Err(BdcnError::Config(_))));
}
