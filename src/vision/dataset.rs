//! Image and ground-truth pairs used for training.
use super::image::{load_bgr, load_gray};
use crate::error::{BdcnError, Result};
use rand::Rng;
use std::path::{Path, PathBuf};
use tch::Tensor;

/// An image and its edge annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairEntry {
    pub image: PathBuf,
    pub label: PathBuf,
}

/// Reads a list file with one `image_path label_path` pair per line, both relative
/// to `root`.
pub fn read_pair_list<T: AsRef<Path>>(root: T, list: &str) -> Result<Vec<PairEntry>> {
    let root = root.as_ref();
    let list_path = root.join(list);
    let content = std::fs::read_to_string(&list_path)?;
    let mut entries = vec![];
    for (index, line) in content.lines().enumerate() {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (None, _) => continue,
            (Some(image), Some(label)) => {
                entries.push(PairEntry { image: root.join(image), label: root.join(label) })
            }
            (Some(_), None) => {
                return Err(BdcnError::Config(format!(
                    "{}:{}: expected an image and a label path",
                    list_path.display(),
                    index + 1
                )))
            }
        }
    }
    if entries.is_empty() {
        return Err(BdcnError::EmptyDataset(list_path.display().to_string()));
    }
    Ok(entries)
}

/// How samples are decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleConfig {
    pub mean_bgr: [f64; 3],
    /// Annotations at or above this value, once scaled to [0, 1], are edges.
    pub yita: f64,
    pub crop_size: Option<i64>,
    pub crop_padding: i64,
}

/// Scales an annotation to [0, 1] and sets every value at or above `yita` to 1.
///
/// Values strictly between 0 and `yita` are kept as is and are ignored by the loss.
pub fn threshold_label(gray: &Tensor, yita: f64) -> Tensor {
    let gt = gray / 255.;
    let edges = gt.ge(yita);
    gt.masked_fill(&edges, 1.)
}

/// Takes the same random `size x size` window from an image and its label,
/// staying `padding` pixels away from the borders when the image is large enough.
pub fn random_crop_pair(
    img: &Tensor,
    gt: &Tensor,
    size: i64,
    padding: i64,
) -> Result<(Tensor, Tensor)> {
    let (h, w) = match gt.size().as_slice() {
        &[_, h, w] => (h, w),
        s => return Err(BdcnError::Shape(format!("expected a CxHxW label, got {s:?}"))),
    };
    if size <= 0 || padding < 0 {
        return Err(BdcnError::Shape(format!("invalid crop of {size} with padding {padding}")));
    }
    if size > h || size > w {
        return Err(BdcnError::Shape(format!("crop of {size} does not fit in {h}x{w}")));
    }
    let padding = if size <= h - 2 * padding && size <= w - 2 * padding { padding } else { 0 };
    let mut rng = rand::thread_rng();
    let i = rng.gen_range(padding..=h - padding - size);
    let j = rng.gen_range(padding..=w - padding - size);
    let crop = |t: &Tensor| t.narrow(1, i, size).narrow(2, j, size);
    Ok((crop(img), crop(gt)))
}

/// Decodes a training sample: a [3, h, w] mean-subtracted BGR image and a
/// [1, h, w] label.
pub fn load_sample(entry: &PairEntry, cfg: &SampleConfig) -> Result<(Tensor, Tensor)> {
    let img = load_bgr(&entry.image, cfg.mean_bgr)?;
    let gt = threshold_label(&load_gray(&entry.label)?, cfg.yita);
    if img.size()[1..] != gt.size()[1..] {
        return Err(BdcnError::Shape(format!(
            "{} is {:?} but {} is {:?}",
            entry.image.display(),
            img.size(),
            entry.label.display(),
            gt.size()
        )));
    }
    match cfg.crop_size {
        Some(size) => random_crop_pair(&img, &gt, size, cfg.crop_padding),
        None => Ok((img, gt)),
    }
}
