use bdcn::nn::{GroupedSgd, ParamGroup, Role, Rule, Sgd};
use tch::Tensor;

use test_utils::*;

fn group(name: &str, value: f32, lr: f64, weight_decay: f64) -> ParamGroup {
    ParamGroup {
        name: name.to_string(),
        param: Tensor::from_slice(&[value]).set_requires_grad(true),
        rule: Rule::Other,
        role: Role::Weight,
        lr,
        weight_decay,
    }
}

fn backward(opt: &GroupedSgd) {
    // d/dp (2 * p) = 2
    let loss = opt.groups()[0].param.sum(tch::Kind::Float) * 2.;
    loss.backward();
}

#[test]
fn momentum_updates() {
    let mut opt = GroupedSgd::new(vec![group("a.weight", 1., 0.1, 0.)], Sgd { momentum: 0.9 });
    opt.zero_grad();
    backward(&opt);
    opt.step().unwrap();
    assert_close(f64_from(&opt.groups()[0].param), 0.8);
    assert_close(f64_from(&opt.buffers()[0]), 2.);
    opt.zero_grad();
    backward(&opt);
    opt.step().unwrap();
    assert_close(f64_from(&opt.buffers()[0]), 3.8);
    assert_close(f64_from(&opt.groups()[0].param), 0.42);
}

#[test]
fn weight_decay_is_per_group() {
    let groups = vec![group("a.weight", 1., 0.1, 0.5), group("b.weight", 1., 0.1, 0.)];
    let mut opt = GroupedSgd::new(groups, Sgd::default());
    opt.zero_grad();
    let loss = opt.groups()[0].param.sum(tch::Kind::Float) * 2.
        + opt.groups()[1].param.sum(tch::Kind::Float) * 2.;
    loss.backward();
    opt.step().unwrap();
    assert_close(f64_from(&opt.groups()[0].param), 0.75);
    assert_close(f64_from(&opt.groups()[1].param), 0.8);
}

#[test]
fn parameters_without_gradient_are_left_alone() {
    let groups = vec![group("a.weight", 1., 0.1, 0.), group("b.weight", 3., 0.1, 0.5)];
    let mut opt = GroupedSgd::new(groups, Sgd::default());
    opt.zero_grad();
    backward(&opt);
    opt.step().unwrap();
    assert_close(f64_from(&opt.groups()[1].param), 3.);
}

#[test]
fn lr_scaling_is_cumulative() {
    let groups = vec![group("a.weight", 1., 0.1, 0.), group("b.bias", 1., 0.2, 0.)];
    let mut opt = GroupedSgd::new(groups, Sgd::default());
    opt.scale_lr(0.1);
    opt.scale_lr(0.1);
    assert_close(opt.groups()[0].lr, 1e-3);
    assert_close(opt.groups()[1].lr, 2e-3);
    assert_close(opt.first_lr().unwrap(), 1e-3);
}

#[test]
fn restore_by_name() {
    let mut opt = GroupedSgd::new(vec![group("a.weight", 1., 0.1, 0.)], Sgd::default());
    let saved = Tensor::from_slice(&[5f32]);
    opt.restore(|name| if name == "a.weight" { Some((0.01, &saved)) } else { None }).unwrap();
    assert_close(opt.groups()[0].lr, 0.01);
    assert_close(f64_from(&opt.buffers()[0]), 5.);

    let wrong = Tensor::from_slice(&[5f32, 6.]);
    assert!(opt.restore(|_| Some((0.01, &wrong))).is_err());
    assert!(opt.restore(|_| None).is_err());
}
