//! The edge-detection network as seen by the drivers.
//!
//! The network itself is not defined here: it is loaded from a TorchScript module
//! exported with the PyTorch python api. Any other implementation of
//! [`EdgeModel`] can be trained and run by the same drivers.
use crate::error::{BdcnError, Result};
use std::collections::HashMap;
use tch::{no_grad, CModule, Device, IValue, Tensor};

/// A network producing a list of edge logit maps, side outputs first and the
/// fused output last.
pub trait EdgeModel {
    /// Runs the network on a `(batch, 3, h, w)` tensor.
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Vec<Tensor>>;

    /// The trainable parameters with their dotted names, sharing storage with the
    /// network.
    fn named_parameters(&self) -> Vec<(String, Tensor)>;

    /// Switches to training mode.
    fn set_train(&mut self);

    /// Switches to evaluation mode.
    fn set_eval(&mut self);

    /// Runs the network and returns the fused output only.
    fn fused(&self, xs: &Tensor) -> Result<Tensor> {
        self.forward_t(xs, false)?
            .pop()
            .ok_or_else(|| BdcnError::ModelOutput("no output tensor".to_string()))
    }
}

/// A TorchScript module wrapped as an [`EdgeModel`].
pub struct ScriptedModel {
    module: CModule,
    parameters: Vec<(String, Tensor)>,
}

impl ScriptedModel {
    pub fn new(module: CModule) -> Result<ScriptedModel> {
        let parameters = module.named_parameters()?;
        Ok(ScriptedModel { module, parameters })
    }

    /// Loads a TorchScript module on the given device.
    pub fn load<T: AsRef<std::path::Path>>(path: T, device: Device) -> Result<ScriptedModel> {
        Self::new(CModule::load_on_device(path, device)?)
    }
}

fn tensors_of_ivalue(value: IValue) -> Result<Vec<Tensor>> {
    match value {
        IValue::Tensor(t) => Ok(vec![t]),
        IValue::TensorList(ts) => Ok(ts),
        IValue::Tuple(vs) | IValue::GenericList(vs) => {
            let mut ts = vec![];
            for v in vs {
                ts.extend(tensors_of_ivalue(v)?);
            }
            Ok(ts)
        }
        other => Err(BdcnError::ModelOutput(format!("{other:?}"))),
    }
}

impl EdgeModel for ScriptedModel {
    fn forward_t(&self, xs: &Tensor, _train: bool) -> Result<Vec<Tensor>> {
        let outputs = self.module.forward_is(&[IValue::Tensor(xs.shallow_clone())])?;
        tensors_of_ivalue(outputs)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        self.parameters.iter().map(|(name, t)| (name.clone(), t.shallow_clone())).collect()
    }

    fn set_train(&mut self) {
        self.module.set_train()
    }

    fn set_eval(&mut self) {
        self.module.set_eval()
    }
}

/// Saves the parameters of a model as named tensors.
pub fn save_weights<M: EdgeModel + ?Sized, T: AsRef<std::path::Path>>(
    model: &M,
    path: T,
) -> Result<()> {
    let named = model.named_parameters();
    Tensor::save_multi(named.as_slice(), path)?;
    Ok(())
}

/// Copies named tensors into the parameters with the same name.
///
/// Returns the names of the model parameters that were not provided. When
/// `partial` is false, a missing name is an error.
pub fn copy_weights<M: EdgeModel + ?Sized>(
    model: &M,
    named: Vec<(String, Tensor)>,
    partial: bool,
) -> Result<Vec<String>> {
    let mut named: HashMap<String, Tensor> = named.into_iter().collect();
    let mut missing = vec![];
    for (name, mut param) in model.named_parameters() {
        match named.remove(&name) {
            Some(src) => {
                if src.size() != param.size() {
                    return Err(BdcnError::Shape(format!(
                        "{name}: expected {:?}, got {:?}",
                        param.size(),
                        src.size()
                    )));
                }
                no_grad(|| param.f_copy_(&src))?
            }
            None if partial => missing.push(name),
            None => return Err(BdcnError::MissingParameter(name)),
        }
    }
    Ok(missing)
}

/// Reads named tensors either from a libtorch archive, as written by
/// [`save_weights`], or from a state dict saved in python with `torch.save`.
pub fn read_named_tensors<T: AsRef<std::path::Path>>(
    path: T,
    device: Device,
) -> Result<Vec<(String, Tensor)>> {
    let path = path.as_ref();
    let archive_err = match Tensor::load_multi_with_device(path, device) {
        Ok(named) => return Ok(named),
        Err(err) => err,
    };
    match Tensor::loadz_multi_with_device(path, device) {
        Ok(named) => {
            tracing::debug!("{}: read as a python state dict", path.display());
            Ok(named)
        }
        Err(state_dict_err) => Err(BdcnError::checkpoint(
            path,
            format!("not a libtorch archive ({archive_err}) nor a state dict ({state_dict_err})"),
        )),
    }
}

/// Loads weights saved by [`save_weights`] or by `torch.save(model.state_dict())`
/// into a model.
pub fn load_weights<M: EdgeModel + ?Sized, T: AsRef<std::path::Path>>(
    model: &M,
    path: T,
    partial: bool,
) -> Result<Vec<String>> {
    let path = path.as_ref();
    let device = model.named_parameters().first().map_or(Device::Cpu, |(_, t)| t.device());
    let named = read_named_tensors(path, device)?;
    let missing = copy_weights(model, named, partial)?;
    if !missing.is_empty() {
        tracing::warn!(
            "{}: {} parameters not found: {:?}",
            path.display(),
            missing.len(),
            missing
        );
    }
    Ok(missing)
}
