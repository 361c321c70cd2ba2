//! Dataset tables and driver configuration.
//!
//! The dataset tables are built once at startup, optionally extended from a json
//! file, and passed explicitly to the drivers.
use crate::error::{BdcnError, Result};
use crate::nn::LossWeights;
use crate::vision::dataset::SampleConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tch::Device;

/// Per-channel mean of the ImageNet images in BGR order.
pub const MEAN_BGR: [f64; 3] = [104.00699, 116.66877, 122.67892];

/// Where a dataset lives and how its samples are normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub data_root: PathBuf,
    /// List file relative to `data_root`, `{k}` is replaced by the split index.
    pub data_lst: String,
    #[serde(default = "default_mean_bgr")]
    pub mean_bgr: [f64; 3],
    #[serde(default)]
    pub yita: Option<f64>,
}

fn default_mean_bgr() -> [f64; 3] {
    MEAN_BGR
}

impl DatasetConfig {
    fn new(data_root: &str, data_lst: &str, yita: Option<f64>) -> Self {
        DatasetConfig {
            data_root: data_root.into(),
            data_lst: data_lst.to_string(),
            mean_bgr: MEAN_BGR,
            yita,
        }
    }

    /// The list file name for split `k`.
    pub fn list_name(&self, k: usize) -> String {
        self.data_lst.replace("{k}", &k.to_string())
    }
}

/// The known training and test datasets, keyed by name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatasetRegistry {
    #[serde(default)]
    pub train: BTreeMap<String, DatasetConfig>,
    #[serde(default)]
    pub test: BTreeMap<String, DatasetConfig>,
}

impl DatasetRegistry {
    pub fn builtin() -> Self {
        let mut train = BTreeMap::new();
        train.insert(
            "bsds500".to_string(),
            DatasetConfig::new("data/HED-BSDS_PASCAL", "bsds_pascal_train_pair_r.lst", Some(0.5)),
        );
        train.insert(
            "nyudv2".to_string(),
            DatasetConfig::new("data/NYUDv2", "train_pair.lst", Some(0.5)),
        );
        train.insert(
            "nyudv2_hha".to_string(),
            DatasetConfig::new("data/NYUDv2", "hha_train_pair.lst", Some(0.5)),
        );
        train.insert(
            "multicue".to_string(),
            DatasetConfig::new("data/multicue", "train_pair_{k}.lst", Some(0.3)),
        );
        let mut test = BTreeMap::new();
        test.insert("bsds500".to_string(), DatasetConfig::new("data/HED-BSDS", "test.lst", None));
        test.insert("nyudv2".to_string(), DatasetConfig::new("data/NYUDv2", "test.lst", None));
        test.insert(
            "nyudv2_hha".to_string(),
            DatasetConfig::new("data/NYUDv2", "hha_test.lst", None),
        );
        test.insert(
            "multicue".to_string(),
            DatasetConfig::new("data/multicue", "test_{k}.lst", None),
        );
        DatasetRegistry { train, test }
    }

    /// The builtin tables, with the entries of `path` added or replacing builtin ones.
    pub fn with_overrides<T: AsRef<Path>>(path: T) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let overrides: DatasetRegistry = serde_json::from_str(&content)?;
        let mut registry = Self::builtin();
        registry.train.extend(overrides.train);
        registry.test.extend(overrides.test);
        Ok(registry)
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::with_overrides(path),
            None => Ok(Self::builtin()),
        }
    }

    fn lookup<'a>(
        table: &'a BTreeMap<String, DatasetConfig>,
        name: &str,
    ) -> Result<&'a DatasetConfig> {
        table.get(name).ok_or_else(|| {
            BdcnError::UnknownDataset(name.to_string(), table.keys().cloned().collect())
        })
    }

    pub fn train(&self, name: &str) -> Result<&DatasetConfig> {
        Self::lookup(&self.train, name)
    }

    pub fn test(&self, name: &str) -> Result<&DatasetConfig> {
        Self::lookup(&self.test, name)
    }
}

/// Resolves the torch device from the cuda flag and gpu index.
pub fn select_device(cuda: bool, gpu: usize) -> Result<Device> {
    if !cuda {
        return Ok(Device::Cpu);
    }
    if !tch::Cuda::is_available() {
        return Err(BdcnError::Config("cuda requested but not available".to_string()));
    }
    let count = tch::Cuda::device_count() as usize;
    if gpu >= count {
        return Err(BdcnError::Config(format!("gpu {gpu} requested, {count} available")));
    }
    Ok(Device::Cuda(gpu))
}

/// Everything the training driver needs once the model is built.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub param_dir: PathBuf,
    pub base_lr: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub max_iter: i64,
    pub iter_size: i64,
    pub batch_size: i64,
    pub average_loss: usize,
    pub snapshots: i64,
    pub step_size: i64,
    pub gamma: f64,
    pub display: i64,
    pub loss: LossWeights,
    pub resume: Option<PathBuf>,
    pub device: Device,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            param_dir: PathBuf::from("params"),
            base_lr: 1e-6,
            momentum: 0.9,
            weight_decay: 2e-4,
            max_iter: 40000,
            iter_size: 10,
            batch_size: 1,
            average_loss: 50,
            snapshots: 1000,
            step_size: 10000,
            gamma: 0.1,
            display: 20,
            loss: LossWeights::default(),
            resume: None,
            device: Device::Cpu,
        }
    }
}

impl TrainConfig {
    /// Rejects intervals that would make the loop misbehave.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_iter", self.max_iter),
            ("iter_size", self.iter_size),
            ("batch_size", self.batch_size),
            ("snapshots", self.snapshots),
            ("step_size", self.step_size),
            ("display", self.display),
        ];
        for (name, value) in positive {
            if value <= 0 {
                return Err(BdcnError::Config(format!("{name} must be positive, got {value}")));
            }
        }
        if self.average_loss == 0 {
            return Err(BdcnError::Config("average_loss must be positive".to_string()));
        }
        Ok(())
    }
}

/// Sample decoding for a training dataset, `yita` overriding the dataset value.
pub fn sample_config(
    dataset: &DatasetConfig,
    yita: Option<f64>,
    crop_size: Option<i64>,
    crop_padding: i64,
) -> Result<SampleConfig> {
    let yita = yita
        .or(dataset.yita)
        .ok_or_else(|| BdcnError::Config("no yita given for this dataset".to_string()))?;
    if let Some(size) = crop_size.filter(|&size| size <= 0) {
        return Err(BdcnError::Config(format!("crop_size must be positive, got {size}")));
    }
    if crop_padding < 0 {
        return Err(BdcnError::Config(format!(
            "crop_padding must not be negative, got {crop_padding}"
        )));
    }
    Ok(SampleConfig { mean_bgr: dataset.mean_bgr, yita, crop_size, crop_padding })
}

/// Everything the inference driver needs once the model is built.
#[derive(Debug, Clone)]
pub struct InferConfig {
    pub input_dir: PathBuf,
    pub res_dir: String,
    pub list_name: String,
    pub extensions: Vec<String>,
    pub mean_bgr: [f64; 3],
    pub device: Device,
}

impl InferConfig {
    pub fn new<T: AsRef<Path>>(input_dir: T, dataset: &DatasetConfig, device: Device) -> Self {
        InferConfig {
            input_dir: input_dir.as_ref().to_path_buf(),
            res_dir: "bdcn".to_string(),
            list_name: crate::vision::manifest::DEFAULT_LIST_NAME.to_string(),
            extensions: crate::vision::manifest::DEFAULT_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            mean_bgr: dataset.mean_bgr,
            device,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_dataset_is_a_config_error() {
        let registry = DatasetRegistry::builtin();
        assert!(registry.train("bsds500").is_ok());
        match registry.train("pascal") {
            Err(BdcnError::UnknownDataset(name, known)) => {
                assert_eq!(name, "pascal");
                assert!(known.contains(&"nyudv2".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn multicue_split() {
        let registry = DatasetRegistry::builtin();
        assert_eq!(registry.train("multicue").unwrap().list_name(2), "train_pair_2.lst");
        assert_eq!(registry.test("multicue").unwrap().list_name(1), "test_1.lst");
    }

    #[test]
    fn overrides_from_json() {
        let json =
            r#"{"train": {"toy": {"data_root": "toy", "data_lst": "pairs.lst", "yita": 0.4}}}"#;
        let overrides: DatasetRegistry = serde_json::from_str(json).unwrap();
        let toy = &overrides.train["toy"];
        assert_eq!(toy.mean_bgr, MEAN_BGR);
        assert_eq!(sample_config(toy, None, None, 0).unwrap().yita, 0.4);
        assert_eq!(sample_config(toy, Some(0.7), None, 0).unwrap().yita, 0.7);
        assert!(overrides.test.is_empty());
    }

    #[test]
    fn crop_values_are_checked() {
        let registry = DatasetRegistry::builtin();
        let bsds = registry.train("bsds500").unwrap();
        assert!(sample_config(bsds, None, Some(320), 10).is_ok());
        assert!(sample_config(bsds, None, None, 0).is_ok());
        assert!(sample_config(bsds, None, Some(0), 10).is_err());
        assert!(sample_config(bsds, None, Some(-4), 10).is_err());
        assert!(sample_config(bsds, None, Some(320), -1).is_err());
    }

    #[test]
    fn intervals_must_be_positive() {
        assert!(TrainConfig::default().validate().is_ok());
        let cfg = TrainConfig { step_size: 0, ..TrainConfig::default() };
        assert!(cfg.validate().is_err());
        let cfg = TrainConfig { batch_size: -1, ..TrainConfig::default() };
        assert!(cfg.validate().is_err());
    }
}
