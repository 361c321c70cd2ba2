use bdcn::nn::{build_param_groups, Role, Rule};
use bdcn::EdgeModel;
use tch::Tensor;

use test_utils::*;

#[test]
fn groups_of_a_network() {
    let net = ToyEdgeNet::new();
    let groups = build_param_groups(&net.named_parameters(), 1e-3, 2e-4);
    let summary: Vec<(&str, Rule, Role)> =
        groups.iter().map(|g| (g.name.as_str(), g.rule, g.role)).collect();
    assert_eq!(
        summary,
        [
            ("conv1_1.bias", Rule::Backbone, Role::Bias),
            ("conv1_1.weight", Rule::Backbone, Role::Weight),
            ("fuse.bias", Rule::Other, Role::Bias),
            ("fuse.weight", Rule::Other, Role::Weight),
            ("score_dsn1.bias", Rule::ScoreDsn, Role::Bias),
            ("score_dsn1.weight", Rule::ScoreDsn, Role::Weight),
        ]
    );
    let rates: Vec<(f64, f64)> = groups.iter().map(|g| (g.lr, g.weight_decay)).collect();
    let expected = [(2e-3, 0.), (1e-3, 2e-4), (2e-6, 0.), (1e-6, 2e-4), (2e-5, 0.), (1e-5, 2e-4)];
    for ((lr, wd), (e_lr, e_wd)) in rates.into_iter().zip(expected) {
        assert_close(lr, e_lr);
        assert_close(wd, e_wd);
    }
}

#[test]
fn groups_share_storage_with_the_network() {
    let net = ToyEdgeNet::new();
    let groups = build_param_groups(&net.named_parameters(), 1e-3, 2e-4);
    let mut param = groups[0].param.shallow_clone();
    tch::no_grad(|| param.fill_(42.));
    let (_, bias) = net.named_parameters().into_iter().next().unwrap();
    assert_eq!(vec_f64_from(&bias), [42.; 4]);
}

#[test]
fn names_without_role_are_skipped() {
    let named = vec![
        ("conv5_2.weight".to_string(), Tensor::zeros([2], tch::kind::FLOAT_CPU)),
        ("bn.running_mean".to_string(), Tensor::zeros([2], tch::kind::FLOAT_CPU)),
        ("upsample_2.weight".to_string(), Tensor::zeros([2], tch::kind::FLOAT_CPU)),
    ];
    let groups = build_param_groups(&named, 1e-6, 2e-4);
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].rule, Rule::Backbone5);
    assert_close(groups[0].lr, 1e-4);
    assert_eq!(groups[1].rule, Rule::Upsample);
    assert_eq!((groups[1].lr, groups[1].weight_decay), (0., 0.));
}
