//! On-disk SARS transition datasets and the feature-space datasets derived
//! from them.
//!
//! A dataset is a folder of `batch_*.jsonl` files with one JSON encoded
//! transition per line. Batches are enumerated in file-name order and
//! streamed line by line, so a dataset never has to fit into memory at once.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::prelude::{ActionValue, FeatureExtractor, Observation};

/// One (state, action, reward, next-state, absorbing) tuple.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SarsTransition {
    pub state: Observation,
    pub action: ActionValue,
    pub reward: f64,
    pub next_state: Observation,
    pub absorbing: bool,
}

/// A SARS dataset folder.
pub struct SarsDataset {
    dir: PathBuf,
    files: Vec<PathBuf>,
}

impl SarsDataset {
    /// Opens a dataset folder. Fails when the folder holds no batch files.
    pub fn open(dir: &Path) -> Result<Self> {
        let pattern = dir.join("batch_*.jsonl");
        let mut files = glob::glob(pattern.to_str().context("dataset path should be valid UTF-8")?)?
            .collect::<Result<Vec<_>, _>>()?;
        files.sort();
        ensure!(
            !files.is_empty(),
            "no batch files found under {}",
            dir.display()
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn n_batch_files(&self) -> usize {
        self.files.len()
    }

    /// Number of transitions over all batch files (one disk pass).
    pub fn len_samples(&self) -> Result<usize> {
        let mut n = 0;
        for file in &self.files {
            let reader = BufReader::new(File::open(file)?);
            for line in reader.lines() {
                if !line?.trim().is_empty() {
                    n += 1;
                }
            }
        }
        Ok(n)
    }

    /// Streams all transitions in batch-file order.
    pub fn stream(&self) -> SarsStream {
        SarsStream {
            files: self.files.clone().into_iter(),
            lines: None,
        }
    }

    /// Writes one batch file into `dir`, creating the folder when needed.
    pub fn write_batch(dir: &Path, index: usize, transitions: &[SarsTransition]) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("batch_{index:05}.jsonl"));
        let mut writer = BufWriter::new(File::create(&path)?);
        for transition in transitions {
            serde_json::to_writer(&mut writer, transition)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(path)
    }
}

/// Streaming iterator over the transitions of a [SarsDataset].
pub struct SarsStream {
    files: std::vec::IntoIter<PathBuf>,
    lines: Option<Lines<BufReader<File>>>,
}

impl Iterator for SarsStream {
    type Item = Result<SarsTransition>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(lines) = self.lines.as_mut() {
                match lines.next() {
                    Some(Ok(line)) if line.trim().is_empty() => continue,
                    Some(Ok(line)) => {
                        return Some(serde_json::from_str(&line).map_err(Into::into))
                    }
                    Some(Err(err)) => return Some(Err(err.into())),
                    None => self.lines = None,
                }
            }
            match self.files.next() {
                Some(file) => match File::open(&file) {
                    Ok(f) => self.lines = Some(BufReader::new(f).lines()),
                    Err(err) => {
                        return Some(
                            Err(err).context(format!("cannot open batch file {}", file.display())),
                        )
                    }
                },
                None => return None,
            }
        }
    }
}

/// The feature/action matrix paired with the reward column — the input of
/// the feature selection step.
///
/// Every FA row is a state feature vector with the action appended as the
/// trailing column.
#[derive(Debug, Serialize, Deserialize)]
pub struct FarArrays {
    pub fa: Array2<f64>,
    pub r: Array1<f64>,
}

impl FarArrays {
    /// Feature column count excluding the trailing action column.
    pub fn n_state_features(&self) -> usize {
        self.fa.ncols() - 1
    }

    /// Caches the arrays at `path` as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(
            File::create(path)
                .with_context(|| format!("cannot write FA/R cache to {}", path.display()))?,
        );
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Loads arrays cached by [Self::save].
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(
            File::open(path)
                .with_context(|| format!("cannot read FA/R cache from {}", path.display()))?,
        );
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Streams `dataset` through `extractor` and assembles the FA matrix and the
/// reward vector R.
pub fn build_far<F: FeatureExtractor>(extractor: &F, dataset: &SarsDataset) -> Result<FarArrays> {
    let n_cols = extractor.feature_count() + 1;
    let mut fa = Vec::new();
    let mut r = Vec::new();
    for transition in dataset.stream() {
        let transition = transition?;
        let features = extractor.features(&transition.state)?;
        ensure!(
            features.len() + 1 == n_cols,
            "extractor returned {} features, expected {}",
            features.len(),
            n_cols - 1
        );
        fa.extend(features.iter().map(|&f| f as f64));
        fa.push(transition.action as f64);
        r.push(transition.reward);
    }
    ensure!(
        !r.is_empty(),
        "dataset under {} contains no transitions",
        dataset.dir().display()
    );
    let n_rows = r.len();
    Ok(FarArrays {
        fa: Array2::from_shape_vec((n_rows, n_cols), fa)?,
        r: Array1::from_vec(r),
    })
}

/// One transition projected into feature space.
#[derive(Clone, Debug)]
pub struct FeatureTransition {
    pub features: Vec<f64>,
    pub action: ActionValue,
    pub reward: f64,
    pub next_features: Vec<f64>,
    pub absorbing: bool,
}

/// Feature-space transitions, the training input of the FQI estimator.
pub struct FeatureDataset {
    state_dim: usize,
    transitions: Vec<FeatureTransition>,
}

impl FeatureDataset {
    pub fn new(state_dim: usize, transitions: Vec<FeatureTransition>) -> Result<Self> {
        for transition in &transitions {
            ensure!(
                transition.features.len() == state_dim
                    && transition.next_features.len() == state_dim,
                "feature transition dimensions do not match state_dim {state_dim}"
            );
        }
        Ok(Self {
            state_dim,
            transitions,
        })
    }

    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    pub fn transitions(&self) -> &[FeatureTransition] {
        &self.transitions
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}

/// Streams `dataset` through `extractor` into feature-space transitions.
///
/// When a support mask is given, both state and next-state feature vectors
/// are projected to the selected subset.
pub fn build_feature_dataset<F: FeatureExtractor>(
    extractor: &F,
    dataset: &SarsDataset,
    support: Option<&[bool]>,
) -> Result<FeatureDataset> {
    let state_dim = match support {
        Some(mask) => mask.iter().filter(|&&keep| keep).count(),
        None => extractor.feature_count(),
    };
    let project = |state: &Observation| -> Result<Vec<f64>> {
        let features = match support {
            Some(mask) => extractor.supported_features(state, mask)?,
            None => extractor.features(state)?,
        };
        Ok(features.into_iter().map(f64::from).collect())
    };

    let mut transitions = Vec::new();
    for transition in dataset.stream() {
        let transition = transition?;
        transitions.push(FeatureTransition {
            features: project(&transition.state)?,
            action: transition.action,
            reward: transition.reward,
            next_features: project(&transition.next_state)?,
            absorbing: transition.absorbing,
        });
    }
    FeatureDataset::new(state_dim, transitions)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FirstPixels(usize);

    impl FeatureExtractor for FirstPixels {
        fn feature_count(&self) -> usize {
            self.0
        }

        fn features(&self, state: &Observation) -> Result<Vec<f32>> {
            Ok(state.data()[..self.0].iter().map(|&v| v as f32).collect())
        }
    }

    fn transition(seed: u8, absorbing: bool) -> SarsTransition {
        let dims = [1, 2, 2];
        SarsTransition {
            state: Observation::new(dims, vec![seed, seed + 1, seed + 2, seed + 3]).unwrap(),
            action: seed % 4,
            reward: seed as f64 / 2.0,
            next_state: Observation::new(dims, vec![seed + 4, seed + 5, seed + 6, seed + 7]).unwrap(),
            absorbing,
        }
    }

    #[test]
    fn test_write_and_stream_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let first: Vec<SarsTransition> = (0..4).map(|i| transition(i, false)).collect();
        let second: Vec<SarsTransition> = (4..6).map(|i| transition(i, i == 5)).collect();
        SarsDataset::write_batch(dir.path(), 0, &first).unwrap();
        SarsDataset::write_batch(dir.path(), 1, &second).unwrap();

        let dataset = SarsDataset::open(dir.path()).unwrap();
        assert_eq!(dataset.n_batch_files(), 2);
        assert_eq!(dataset.len_samples().unwrap(), 6);

        let streamed: Vec<SarsTransition> =
            dataset.stream().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(streamed.len(), 6);
        assert_eq!(streamed[0].state, first[0].state);
        assert_eq!(streamed[5].absorbing, true);
    }

    #[test]
    fn test_open_fails_on_empty_folder() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SarsDataset::open(dir.path()).is_err());
    }

    #[test]
    fn test_build_far_shape_and_action_column() {
        let dir = tempfile::tempdir().unwrap();
        let transitions: Vec<SarsTransition> = (0..5).map(|i| transition(i, false)).collect();
        SarsDataset::write_batch(dir.path(), 0, &transitions).unwrap();
        let dataset = SarsDataset::open(dir.path()).unwrap();

        let extractor = FirstPixels(3);
        let far = build_far(&extractor, &dataset).unwrap();

        // state features plus the trailing action column
        assert_eq!(far.fa.ncols(), extractor.feature_count() + 1);
        assert_eq!(far.fa.nrows(), 5);
        assert_eq!(far.n_state_features(), 3);
        for (row, transition) in far.fa.rows().into_iter().zip(&transitions) {
            assert_eq!(row[3], transition.action as f64);
        }
        assert_eq!(far.r.len(), 5);
    }

    #[test]
    fn test_far_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let transitions: Vec<SarsTransition> = (0..5).map(|i| transition(i, false)).collect();
        SarsDataset::write_batch(dir.path(), 0, &transitions).unwrap();
        let dataset = SarsDataset::open(dir.path()).unwrap();
        let far = build_far(&FirstPixels(3), &dataset).unwrap();

        let cache = dir.path().join("FA_R.json");
        far.save(&cache).unwrap();
        let restored = FarArrays::load(&cache).unwrap();
        assert_eq!(far.fa, restored.fa);
        assert_eq!(far.r, restored.r);
    }

    #[test]
    fn test_build_feature_dataset_with_support() {
        let dir = tempfile::tempdir().unwrap();
        let transitions: Vec<SarsTransition> = (0..4).map(|i| transition(i, false)).collect();
        SarsDataset::write_batch(dir.path(), 0, &transitions).unwrap();
        let dataset = SarsDataset::open(dir.path()).unwrap();

        let full = build_feature_dataset(&FirstPixels(3), &dataset, None).unwrap();
        assert_eq!(full.state_dim(), 3);
        assert_eq!(full.len(), 4);

        let masked =
            build_feature_dataset(&FirstPixels(3), &dataset, Some(&[true, false, true])).unwrap();
        assert_eq!(masked.state_dim(), 2);
        assert_eq!(masked.transitions()[0].features.len(), 2);
        assert_eq!(masked.transitions()[0].next_features.len(), 2);
    }
}
