use std::fs;

use safetensors::SafeTensors;
use sr_advantage::AdvantageTrace;
use sr_shm::{Dtype, ObsComponentDesc};

use crate::{
    BatchError, BatchMeta, BatchWriter, BatchWriterConfig, ObsData, RolloutBuffers,
    TrainingBatch,
};

fn obs_layout() -> Vec<ObsComponentDesc> {
    vec![
        ObsComponentDesc::new("board", &[2, 3], Dtype::F32),
        ObsComponentDesc::new("meta_int", &[2], Dtype::I32),
    ]
}

fn buffers(window: usize, envs: usize, keep_logits: bool) -> RolloutBuffers {
    let mut b = RolloutBuffers::new(window, envs, 4, &obs_layout(), keep_logits);
    for r in 0..b.rows() {
        b.actions[r] = r as u32;
        b.log_pis[r] = -(r as f32);
        b.values[r] = [r as f32, 10.0 + r as f32];
        b.devs[r] = 0.5;
    }
    if let ObsData::F32(v) = &mut b.obs[0].data {
        for (i, x) in v.iter_mut().enumerate() {
            *x = i as f32;
        }
    }
    b
}

fn trace(rows: usize) -> AdvantageTrace {
    AdvantageTrace {
        advantages: (0..rows).map(|r| [100.0 + r as f32, 1.0]).collect(),
        raw_devs: vec![0.25; rows],
        raw_values: (0..rows).map(|r| 11.0 + r as f32).collect(),
        skip_mask: (0..rows).map(|r| (r % 2) as u8).collect(),
    }
}

fn writer(out: &std::path::Path) -> BatchWriter {
    BatchWriter::new(BatchWriterConfig {
        out_dir: out.to_path_buf(),
        obs_schema_id: "stacker".to_string(),
        config_hash: Some("abc".to_string()),
    })
    .unwrap()
}

#[test]
fn assemble_takes_channel_zero_and_keeps_row_order() {
    let b = TrainingBatch::assemble(buffers(3, 2, false), trace(6)).unwrap();
    assert_eq!(b.rows(), 6);
    assert_eq!(b.row(2, 1), 5);
    assert_eq!(b.actions, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(b.values[4], 4.0);
    assert_eq!(b.advantages[4], 104.0);
    assert_eq!(b.raw_values[4], 15.0);
    assert_eq!(b.skip_mask, vec![0, 1, 0, 1, 0, 1]);
    assert!(b.pi_logits.is_none());
}

#[test]
fn assemble_rejects_short_trace() {
    let err = TrainingBatch::assemble(buffers(3, 2, false), trace(5)).unwrap_err();
    assert!(matches!(err, BatchError::Shape(_)));
}

#[test]
fn writer_writes_expected_tensors_and_meta() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("batches");
    let mut w = writer(&out);
    let batch = TrainingBatch::assemble(buffers(3, 2, true), trace(6)).unwrap();
    let path = w.write(&batch).unwrap();

    assert_eq!(path, out.join("batch_000000.safetensors"));
    let bytes = fs::read(&path).unwrap();
    let st = SafeTensors::deserialize(&bytes).unwrap();
    assert_eq!(st.tensor("obs.board").unwrap().shape(), &[6, 2, 3]);
    assert_eq!(st.tensor("obs.meta_int").unwrap().shape(), &[6, 2]);
    assert_eq!(st.tensor("actions").unwrap().shape(), &[6]);
    assert_eq!(st.tensor("skip_mask").unwrap().data(), &[0u8, 1, 0, 1, 0, 1]);
    assert_eq!(st.tensor("pi_logits").unwrap().shape(), &[6, 4]);

    let adv: Vec<f32> = st
        .tensor("advantages")
        .unwrap()
        .data()
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    assert_eq!(adv, batch.advantages);

    let meta: BatchMeta =
        serde_json::from_slice(&fs::read(out.join("batch_000000.meta.json")).unwrap()).unwrap();
    assert_eq!(meta.rows, 6);
    assert_eq!(meta.window, 3);
    assert_eq!(meta.envs, 2);
    assert_eq!(meta.obs_schema_id, "stacker");
    assert_eq!(meta.config_hash.as_deref(), Some("abc"));
    assert_eq!(meta.protocol_version, sr_proto::PROTOCOL_VERSION);
    assert!(meta.has_pi_logits);
    assert_eq!(meta.obs_components[1].dtype, "i32");
}

#[test]
fn writer_omits_logits_when_not_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let mut w = writer(dir.path());
    let batch = TrainingBatch::assemble(buffers(1, 2, false), trace(2)).unwrap();
    let path = w.write(&batch).unwrap();
    let bytes = fs::read(path).unwrap();
    let st = SafeTensors::deserialize(&bytes).unwrap();
    assert!(st.tensor("pi_logits").is_err());
}

#[test]
fn writer_resumes_index_in_existing_dir() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("batches");
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join("batch_000003.safetensors"), b"stub").unwrap();
    fs::write(out.join("batch_000003.meta.json"), b"{}").unwrap();

    let mut w = writer(&out);
    assert_eq!(w.next_index(), 4);
    let batch = TrainingBatch::assemble(buffers(1, 1, false), trace(1)).unwrap();
    w.write(&batch).unwrap();
    assert!(out.join("batch_000004.safetensors").exists());
    assert!(out.join("batch_000004.meta.json").exists());
    assert_eq!(w.next_index(), 5);
}

#[test]
fn opening_removes_stale_tmp_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("batch_000000.safetensors.tmp"), b"partial").unwrap();
    fs::write(dir.path().join("batch_000000.meta.json.tmp"), b"partial").unwrap();
    let w = writer(dir.path());
    assert_eq!(w.next_index(), 0);
    assert!(!dir.path().join("batch_000000.safetensors.tmp").exists());
    assert!(!dir.path().join("batch_000000.meta.json.tmp").exists());
}
