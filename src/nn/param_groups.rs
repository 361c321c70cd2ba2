//! Per-parameter learning-rate and weight-decay groups.
//!
//! Every named parameter of the network is matched against an ordered list of
//! naming rules. The first rule that matches decides the multipliers applied to
//! the base learning rate and weight decay, with distinct values for weights and
//! biases.
use lazy_static::lazy_static;
use regex::Regex;
use tch::Tensor;

/// The naming rules, in priority order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Rule {
    /// Side-output reduction convolutions, `conv[1-5]_[1-3]_down`.
    DownConv,
    /// Backbone stages one to four, `*conv[1-4]_[1-3]`.
    Backbone,
    /// Fifth backbone stage, `*conv5_[1-3]`.
    Backbone5,
    /// Side-output score layers, `score_dsn[1-5]`.
    ScoreDsn,
    /// Fixed bilinear upsampling layers, `upsample_[248](_5)?`.
    Upsample,
    /// Multi-scale block convolutions, `*msblock[1-5]_[1-3].conv`.
    MsBlock,
    /// Anything else.
    Other,
}

/// Whether a parameter is a layer weight or a layer bias.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Weight,
    Bias,
}

impl Role {
    /// Weights take precedence when a name contains both substrings.
    pub fn of_name(name: &str) -> Option<Role> {
        if name.contains("weight") {
            Some(Role::Weight)
        } else if name.contains("bias") {
            Some(Role::Bias)
        } else {
            None
        }
    }
}

/// Learning-rate and weight-decay multipliers for one role.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Multipliers {
    pub lr: f64,
    pub decay: f64,
}

/// Multipliers of a rule for weights and biases.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RuleRates {
    pub weight: Multipliers,
    pub bias: Multipliers,
}

impl RuleRates {
    const fn new(weight_lr: f64, weight_decay: f64, bias_lr: f64, bias_decay: f64) -> Self {
        RuleRates {
            weight: Multipliers { lr: weight_lr, decay: weight_decay },
            bias: Multipliers { lr: bias_lr, decay: bias_decay },
        }
    }

    pub fn for_role(&self, role: Role) -> Multipliers {
        match role {
            Role::Weight => self.weight,
            Role::Bias => self.bias,
        }
    }
}

const DEFAULT_RATES: RuleRates = RuleRates::new(0.001, 1., 0.002, 0.);

// Patterns are anchored at the start of the name only, a leading `.*` lets a
// rule match anywhere.
const RULE_TABLE: [(Rule, &str, RuleRates); 6] = [
    (Rule::DownConv, r"^conv[1-5]_[1-3]_down", RuleRates::new(0.1, 1., 0.2, 0.)),
    (Rule::Backbone, r"^.*conv[1-4]_[1-3]", RuleRates::new(1., 1., 2., 0.)),
    (Rule::Backbone5, r"^.*conv5_[1-3]", RuleRates::new(100., 1., 200., 0.)),
    (Rule::ScoreDsn, r"^score_dsn[1-5]", RuleRates::new(0.01, 1., 0.02, 0.)),
    (Rule::Upsample, r"^upsample_[248](_5)?", RuleRates::new(0., 0., 0., 0.)),
    (Rule::MsBlock, r"^.*msblock[1-5]_[1-3]\.conv", RuleRates::new(1., 1., 2., 0.)),
];

lazy_static! {
    static ref RULES: Vec<(Rule, Regex, RuleRates)> = RULE_TABLE
        .iter()
        .map(|(rule, pattern, rates)| (*rule, Regex::new(pattern).unwrap(), *rates))
        .collect();
}

/// Returns the first rule matching a parameter name together with its rates.
pub fn classify(name: &str) -> (Rule, RuleRates) {
    RULES
        .iter()
        .find(|(_, re, _)| re.is_match(name))
        .map(|(rule, _, rates)| (*rule, *rates))
        .unwrap_or((Rule::Other, DEFAULT_RATES))
}

/// Resolves the multipliers for a parameter name, `None` when the name is neither
/// a weight nor a bias.
pub fn multipliers(name: &str) -> Option<(Rule, Role, Multipliers)> {
    let role = Role::of_name(name)?;
    let (rule, rates) = classify(name);
    Some((rule, role, rates.for_role(role)))
}

/// A parameter together with its own learning rate and weight decay.
#[derive(Debug)]
pub struct ParamGroup {
    pub name: String,
    pub param: Tensor,
    pub rule: Rule,
    pub role: Role,
    pub lr: f64,
    pub weight_decay: f64,
}

/// Builds one group per weight or bias parameter, preserving the parameter order.
pub fn build_param_groups(
    named_parameters: &[(String, Tensor)],
    base_lr: f64,
    weight_decay: f64,
) -> Vec<ParamGroup> {
    named_parameters
        .iter()
        .filter_map(|(name, param)| {
            let (rule, role, m) = multipliers(name)?;
            Some(ParamGroup {
                name: name.clone(),
                param: param.shallow_clone(),
                rule,
                role,
                lr: base_lr * m.lr,
                weight_decay: weight_decay * m.decay,
            })
        })
        .collect()
}
