use crate::{Dtype, ObsComponentDesc, RegionLayout, RowMut, SharedRegion, ShmBlock, ShmError};

fn layout() -> RegionLayout {
    RegionLayout::new(
        4,
        3,
        vec![
            ObsComponentDesc::new("board", &[2, 5], Dtype::F32),
            ObsComponentDesc::new("meta_int", &[2], Dtype::I32),
        ],
    )
}

#[test]
fn attacher_sees_owner_writes() {
    let mut owner = SharedRegion::create(&layout()).unwrap();
    assert!(owner.is_owner());
    let mut worker = SharedRegion::attach(&owner.descs()).unwrap();
    assert!(!worker.is_owner());

    {
        let mut rows = worker.obs_rows_mut(2).unwrap();
        assert_eq!(rows.len(), 2);
        match &mut rows[0] {
            RowMut::F32(r) => {
                assert_eq!(r.len(), 10);
                r.fill(1.5);
            }
            other => panic!("unexpected row {other:?}"),
        }
        match &mut rows[1] {
            RowMut::I32(r) => r.copy_from_slice(&[3, 4]),
            other => panic!("unexpected row {other:?}"),
        }
    }
    worker.write_step(2, 1, [1.0, 2.0, 0.5, -1.0], [1, 0]).unwrap();

    let board: &[f32] = owner.obs_rows(0, 2..3).unwrap();
    assert!(board.iter().all(|&v| v == 1.5));
    let untouched: &[f32] = owner.obs_rows(0, 0..2).unwrap();
    assert!(untouched.iter().all(|&v| v == 0.0));
    assert_eq!(owner.obs_rows::<i32>(1, 2..3).unwrap(), &[3, 4]);
    assert_eq!(owner.reward_at(2, 1).unwrap(), [1.0, 2.0, 0.5, -1.0]);
    assert_eq!(owner.flags_at(2, 1).unwrap(), [1, 0]);
    assert_eq!(owner.flags_at(2, 0).unwrap(), [0, 0]);

    worker.release().unwrap();
    owner.release().unwrap();
}

#[test]
fn dtype_mismatch_is_rejected() {
    let region = SharedRegion::create(&layout()).unwrap();
    let err = region.obs_rows::<i32>(0, 0..1).unwrap_err();
    assert!(matches!(err, ShmError::Dtype { .. }));
    assert!(region.block::<f32>("rewards").is_ok());
    assert!(matches!(
        region.block::<u8>("nope"),
        Err(ShmError::Layout(_))
    ));
}

#[test]
fn out_of_range_cells_are_rejected() {
    let mut region = SharedRegion::create(&layout()).unwrap();
    assert!(region.write_step(4, 0, [0.0; 4], [0; 2]).is_err());
    assert!(region.write_step(0, 3, [0.0; 4], [0; 2]).is_err());
    assert!(region.obs_rows::<f32>(0, 3..5).is_err());
}

#[test]
fn owner_release_unlinks_names() {
    let mut owner = SharedRegion::create(&layout()).unwrap();
    let descs = owner.descs();
    owner.release().unwrap();
    // Idempotent.
    owner.release().unwrap();
    let err = ShmBlock::attach(descs[0].clone()).unwrap_err();
    assert!(matches!(err, ShmError::Open { .. }));
}

#[test]
fn drop_unlinks_names() {
    let descs = SharedRegion::create(&layout()).unwrap().descs();
    assert!(SharedRegion::attach(&descs).is_err());
}

#[test]
fn attacher_release_keeps_segments() {
    let owner = SharedRegion::create(&layout()).unwrap();
    let mut a = SharedRegion::attach(&owner.descs()).unwrap();
    a.release().unwrap();
    let b = SharedRegion::attach(&owner.descs());
    assert!(b.is_ok());
}

#[test]
fn names_are_unique_per_region() {
    let a = SharedRegion::create(&layout()).unwrap();
    let b = SharedRegion::create(&layout()).unwrap();
    assert_ne!(a.descs()[0].name, b.descs()[0].name);
    assert!(a.descs()[0].name.starts_with("/sr-"));
}
