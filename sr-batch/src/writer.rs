use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use bytemuck::cast_slice;
use safetensors::tensor::{Dtype, TensorView};
use serde::{Deserialize, Serialize};

use crate::batch::TrainingBatch;
use crate::schema::{
    BATCH_FORMAT_VERSION, T_ACTIONS, T_ADVANTAGES, T_LOG_PIS, T_OBS_PREFIX, T_PI_LOGITS,
    T_RAW_DEVS, T_RAW_VALUES, T_SKIP_MASK, T_VALUES,
};
use crate::BatchError;

/// Sidecar written next to every batch file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMeta {
    pub format_version: u32,
    pub protocol_version: u32,
    /// Kernel that produced the observations.
    pub obs_schema_id: String,
    pub obs_components: Vec<ObsComponentMeta>,
    pub rows: usize,
    pub window: usize,
    pub envs: usize,
    pub num_actions: usize,
    pub has_pi_logits: bool,
    pub config_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObsComponentMeta {
    pub label: String,
    pub shape: Vec<usize>,
    pub dtype: String,
}

#[derive(Debug, Clone)]
pub struct BatchWriterConfig {
    pub out_dir: PathBuf,
    pub obs_schema_id: String,
    pub config_hash: Option<String>,
}

pub struct BatchWriter {
    cfg: BatchWriterConfig,
    batch_idx: u64,
}

impl BatchWriter {
    /// Opens `out_dir`, removing stale temporaries and continuing after the highest existing index.
    pub fn new(cfg: BatchWriterConfig) -> Result<Self, BatchError> {
        fs::create_dir_all(&cfg.out_dir)?;
        cleanup_tmp_files(&cfg.out_dir)?;
        let batch_idx = next_batch_index(&cfg.out_dir)?;
        Ok(Self { cfg, batch_idx })
    }

    pub fn next_index(&self) -> u64 {
        self.batch_idx
    }

    pub fn out_dir(&self) -> &Path {
        &self.cfg.out_dir
    }

    /// Writes one batch and its meta, each via tmp + rename. Returns the tensor file path.
    pub fn write(&mut self, batch: &TrainingBatch) -> Result<PathBuf, BatchError> {
        let n = batch.rows();
        if n == 0 {
            return Err(BatchError::Shape("empty batch".to_string()));
        }

        let mut tensors: BTreeMap<String, TensorView<'_>> = BTreeMap::new();
        for o in &batch.obs {
            let mut shape = Vec::with_capacity(o.shape.len() + 1);
            shape.push(n);
            shape.extend_from_slice(&o.shape);
            tensors.insert(
                format!("{T_OBS_PREFIX}{}", o.label),
                TensorView::new(st_dtype(o.data.dtype()), shape, o.data.as_bytes())?,
            );
        }
        tensors.insert(
            T_ACTIONS.to_string(),
            TensorView::new(Dtype::I32, vec![n], cast_slice(&batch.actions))?,
        );
        tensors.insert(
            T_LOG_PIS.to_string(),
            TensorView::new(Dtype::F32, vec![n], cast_slice(&batch.log_pis))?,
        );
        tensors.insert(
            T_SKIP_MASK.to_string(),
            TensorView::new(Dtype::U8, vec![n], &batch.skip_mask)?,
        );
        tensors.insert(
            T_VALUES.to_string(),
            TensorView::new(Dtype::F32, vec![n], cast_slice(&batch.values))?,
        );
        tensors.insert(
            T_ADVANTAGES.to_string(),
            TensorView::new(Dtype::F32, vec![n], cast_slice(&batch.advantages))?,
        );
        tensors.insert(
            T_RAW_DEVS.to_string(),
            TensorView::new(Dtype::F32, vec![n], cast_slice(&batch.raw_devs))?,
        );
        tensors.insert(
            T_RAW_VALUES.to_string(),
            TensorView::new(Dtype::F32, vec![n], cast_slice(&batch.raw_values))?,
        );
        if let Some(logits) = &batch.pi_logits {
            tensors.insert(
                T_PI_LOGITS.to_string(),
                TensorView::new(Dtype::F32, vec![n, batch.num_actions], cast_slice(logits))?,
            );
        }

        let final_st = self.safetensors_path(self.batch_idx);
        let tmp_st = tmp_path(&final_st);
        let final_meta = self.meta_path(self.batch_idx);
        let tmp_meta = tmp_path(&final_meta);

        let st_bytes = safetensors::serialize(&tensors, &None)?;
        fs::write(&tmp_st, st_bytes)?;
        fs::rename(&tmp_st, &final_st)?;

        let meta = BatchMeta {
            format_version: BATCH_FORMAT_VERSION,
            protocol_version: sr_proto::PROTOCOL_VERSION,
            obs_schema_id: self.cfg.obs_schema_id.clone(),
            obs_components: batch
                .obs
                .iter()
                .map(|o| ObsComponentMeta {
                    label: o.label.clone(),
                    shape: o.shape.clone(),
                    dtype: dtype_name(o.data.dtype()).to_string(),
                })
                .collect(),
            rows: n,
            window: batch.window,
            envs: batch.envs,
            num_actions: batch.num_actions,
            has_pi_logits: batch.pi_logits.is_some(),
            config_hash: self.cfg.config_hash.clone(),
        };
        fs::write(&tmp_meta, serde_json::to_vec_pretty(&meta)?)?;
        fs::rename(&tmp_meta, &final_meta)?;

        self.batch_idx += 1;
        Ok(final_st)
    }

    fn safetensors_path(&self, idx: u64) -> PathBuf {
        self.cfg.out_dir.join(format!("batch_{idx:06}.safetensors"))
    }

    fn meta_path(&self, idx: u64) -> PathBuf {
        self.cfg.out_dir.join(format!("batch_{idx:06}.meta.json"))
    }
}

fn tmp_path(p: &Path) -> PathBuf {
    let mut s = p.as_os_str().to_os_string();
    s.push(".tmp");
    PathBuf::from(s)
}

fn st_dtype(d: sr_shm::Dtype) -> Dtype {
    match d {
        sr_shm::Dtype::F32 => Dtype::F32,
        sr_shm::Dtype::I32 => Dtype::I32,
        sr_shm::Dtype::U8 => Dtype::U8,
    }
}

fn dtype_name(d: sr_shm::Dtype) -> &'static str {
    match d {
        sr_shm::Dtype::F32 => "f32",
        sr_shm::Dtype::I32 => "i32",
        sr_shm::Dtype::U8 => "u8",
    }
}

fn next_batch_index(dir: &Path) -> Result<u64, BatchError> {
    let mut next = 0u64;
    for entry in fs::read_dir(dir)? {
        let p = entry?.path();
        let Some(name) = p.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        let idx = name
            .strip_prefix("batch_")
            .and_then(|s| s.strip_suffix(".safetensors"))
            .and_then(|s| s.parse::<u64>().ok());
        if let Some(i) = idx {
            next = next.max(i + 1);
        }
    }
    Ok(next)
}

/// Removes partially written batch files left by an interrupted run.
pub fn cleanup_tmp_files(dir: &Path) -> Result<(), BatchError> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let e = entry?;
        let p = e.path();
        if let Some(name) = p.file_name().and_then(|s| s.to_str()) {
            if name.ends_with(".safetensors.tmp") || name.ends_with(".meta.json.tmp") {
                let _ = fs::remove_file(&p);
            }
        }
    }
    Ok(())
}
