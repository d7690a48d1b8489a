use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use sr_core::{GameParams, Scenario, WorkerSlot};
use sr_curriculum::CurriculumManager;
use sr_proto::{read_reply, write_command, write_init, Command, Reply, WorkerInit, PROTOCOL_VERSION};
use sr_shm::{ObsComponentDesc, RegionLayout, RowMut, SharedRegion};
use sr_sim::{kernel_by_name, Reward, SimError, SimulationKernel, OVER_REWARD};

use crate::{run_worker, GameEnv, Phase, Worker, WorkerError};

const WINDOW: usize = 4;

fn region(total_envs: usize) -> SharedRegion {
    let spec = kernel_by_name("stacker", 0).unwrap().obs_spec();
    SharedRegion::create(&RegionLayout::new(total_envs, WINDOW, spec)).unwrap()
}

fn init(region: &SharedRegion, start: usize, end: usize) -> WorkerInit {
    WorkerInit {
        protocol_version: PROTOCOL_VERSION,
        worker: 1,
        slot: WorkerSlot {
            worker: 1,
            start,
            end,
        },
        seed: 17,
        kernel: "stacker".into(),
        board_file: None,
        chunk_records: 8,
        blocks: region.descs(),
    }
}

#[test]
fn reset_writes_only_own_rows() {
    let owner = region(6);
    let mut w = Worker::from_init(&init(&owner, 3, 6)).unwrap();
    assert_eq!(w.handle(Command::Reset).unwrap(), Some(Reply::Ack));

    let meta: &[f32] = owner.obs_rows(1, 0..6).unwrap();
    for (env, row) in meta.chunks(16).enumerate() {
        let sum: f32 = row.iter().sum();
        if env < 3 {
            assert_eq!(sum, 0.0, "env {env} written outside slot");
        } else {
            assert!(sum >= 2.0, "env {env} missing observation");
        }
    }
}

#[test]
fn step_writes_its_timestep_cell() {
    let owner = region(6);
    let mut w = Worker::from_init(&init(&owner, 3, 6)).unwrap();
    w.handle(Command::Reset).unwrap();
    let reply = w
        .handle(Command::Step {
            t: 2,
            actions: vec![0, 5, 9],
            epoch: 1,
        })
        .unwrap();
    assert!(matches!(reply, Some(Reply::Episodes(_))));
    for env in 0..6 {
        for t in 0..WINDOW {
            let r = owner.reward_at(env, t).unwrap();
            if env >= 3 && t == 2 {
                assert_eq!(r[3], OVER_REWARD);
            } else {
                assert_eq!(r, [0.0; 4], "env {env} t {t}");
            }
        }
    }
}

#[test]
fn malformed_steps_are_errors() {
    let owner = region(2);
    let mut w = Worker::from_init(&init(&owner, 0, 2)).unwrap();
    w.handle(Command::Reset).unwrap();
    let err = w
        .handle(Command::Step {
            t: 0,
            actions: vec![0],
            epoch: 0,
        })
        .unwrap_err();
    assert!(matches!(err, WorkerError::ActionCount { got: 1, expected: 2 }));
    let err = w
        .handle(Command::Step {
            t: WINDOW as u32,
            actions: vec![0, 0],
            epoch: 0,
        })
        .unwrap_err();
    assert!(matches!(err, WorkerError::Timestep { .. }));
}

#[test]
fn bad_init_is_rejected() {
    let owner = region(2);
    assert!(matches!(
        Worker::from_init(&init(&owner, 1, 3)),
        Err(WorkerError::SlotOutOfRange { .. })
    ));
    let mut i = init(&owner, 0, 2);
    i.kernel = "nope".into();
    assert!(matches!(
        Worker::from_init(&i),
        Err(WorkerError::Sim(SimError::UnknownKernel(_)))
    ));
}

#[test]
fn episodes_finish_reset_and_feed_curriculum() {
    let owner = region(3);
    let mut w = Worker::from_init(&init(&owner, 0, 3)).unwrap();
    w.handle(Command::Reset).unwrap();

    let mut records = Vec::new();
    for step in 0..200u32 {
        let t = step % WINDOW as u32;
        let Some(Reply::Episodes(recs)) = w
            .handle(Command::Step {
                t,
                actions: vec![0, 0, 0],
                epoch: 0,
            })
            .unwrap()
        else {
            panic!("step must reply with episodes");
        };
        if !recs.is_empty() {
            let done = (0..3)
                .filter(|&e| owner.flags_at(e, t as usize).unwrap()[0] == 1)
                .count();
            assert_eq!(done, recs.len());
        }
        records.extend(recs);
    }
    assert!(!records.is_empty());
    assert!(records.iter().all(|r| r.is_over && !r.is_short && r.pieces > 0));
    assert!(w.envs().iter().all(|e| e.phase() == Phase::Running));
    assert!(w.manager().counts().iter().sum::<u64>() > 0);

    assert_eq!(
        w.handle(Command::SetParam(GameParams {
            burn_over_multiplier: 0.0,
            board_ratio: -0.5,
            short_ratio: 0.0,
        }))
        .unwrap(),
        None
    );
    assert!(w.manager().counts().iter().all(|&c| c == 0));
    assert_eq!(w.manager().params().board_ratio, 0.5);
}

#[test]
fn serves_over_socket_until_close() {
    let owner = region(2);
    let (mut coord, mut child) = UnixStream::pair().unwrap();
    let handle = thread::spawn(move || {
        let mut r = child.try_clone().unwrap();
        run_worker(&mut r, &mut child)
    });

    write_init(&mut coord, &init(&owner, 0, 2)).unwrap();
    write_command(&mut coord, &Command::Reset).unwrap();
    assert_eq!(read_reply(&mut coord).unwrap(), Reply::Ack);
    write_command(
        &mut coord,
        &Command::Step {
            t: 0,
            actions: vec![1, 2],
            epoch: 0,
        },
    )
    .unwrap();
    assert!(matches!(read_reply(&mut coord).unwrap(), Reply::Episodes(_)));
    write_command(&mut coord, &Command::Close).unwrap();
    handle.join().unwrap().unwrap();

    // The worker detached; the owner's names are still live.
    assert!(SharedRegion::attach(&owner.descs()).is_ok());
    assert!(read_reply(&mut coord).unwrap_err().is_disconnect());
}

#[test]
fn worker_fails_when_step_breaks_protocol() {
    let owner = region(2);
    let (mut coord, mut child) = UnixStream::pair().unwrap();
    let handle = thread::spawn(move || {
        let mut r = child.try_clone().unwrap();
        run_worker(&mut r, &mut child)
    });
    write_init(&mut coord, &init(&owner, 0, 2)).unwrap();
    write_command(
        &mut coord,
        &Command::Step {
            t: 0,
            actions: vec![1],
            epoch: 0,
        },
    )
    .unwrap();
    assert!(handle.join().unwrap().is_err());
    assert!(read_reply(&mut coord).unwrap_err().is_disconnect());
}

/// Kernel replaying a fixed script of `(over, run_lines, clean)` per step.
struct Scripted {
    frames: Vec<(bool, u32, bool)>,
    pos: usize,
    resets: Arc<AtomicU32>,
}

impl Scripted {
    fn frame(&self) -> (bool, u32, bool) {
        match self.pos {
            0 => (false, 0, false),
            p => self.frames[(p - 1).min(self.frames.len() - 1)],
        }
    }
}

impl SimulationKernel for Scripted {
    fn obs_spec(&self) -> Vec<ObsComponentDesc> {
        Vec::new()
    }

    fn num_actions(&self) -> usize {
        1
    }

    fn reset(&mut self, _scenario: &Scenario) -> Result<(), SimError> {
        self.pos = 0;
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reset_random(&mut self) {
        self.pos = 0;
    }

    fn step(&mut self, _action: u32) -> Reward {
        self.pos += 1;
        Reward {
            reward: 0.5,
            raw_reward: 0.25,
            live_prob: 1.0,
            over_reward: -1.0,
        }
    }

    fn is_over(&self) -> bool {
        self.frame().0
    }

    fn run_lines(&self) -> u32 {
        self.frame().1
    }

    fn run_pieces(&self) -> u32 {
        self.pos as u32
    }

    fn run_score(&self) -> u64 {
        100 * self.pos as u64
    }

    fn board_is_clean(&self) -> bool {
        self.frame().2
    }

    fn write_observation(&self, _rows: &mut [RowMut<'_>]) -> Result<(), SimError> {
        Ok(())
    }
}

fn scripted_env(frames: Vec<(bool, u32, bool)>) -> (GameEnv, Arc<AtomicU32>) {
    let resets = Arc::new(AtomicU32::new(0));
    let env = GameEnv::new(Box::new(Scripted {
        frames,
        pos: 0,
        resets: resets.clone(),
    }));
    (env, resets)
}

fn scenario(manager: &mut CurriculumManager, is_short: bool) -> Scenario {
    let mut s = manager.next_scenario().unwrap();
    s.is_short = is_short;
    s
}

#[test]
fn soft_finish_is_reported_one_step_late() {
    let mut m = CurriculumManager::new(None, 8, 1);
    let (mut env, resets) = scripted_env(vec![(false, 2, false), (false, 6, true), (false, 7, false)]);
    env.start(scenario(&mut m, true)).unwrap();

    let a = env.step(0, &mut m).unwrap();
    assert_eq!(a.flags, [0, 0]);
    // Soft condition met here, but only latched.
    let b = env.step(0, &mut m).unwrap();
    assert_eq!(b.flags, [0, 0]);
    assert!(b.finished.is_none());

    let c = env.step(0, &mut m).unwrap();
    assert_eq!(c.flags, [1, 1]);
    assert_eq!(c.reward, [0.5, 0.25, 1.0, -1.0]);
    let rec = c.finished.unwrap();
    assert!(rec.is_short && !rec.is_over);
    assert_eq!((rec.lines, rec.pieces, rec.score), (7, 3, 300));
    assert_eq!(rec.reward, 1.5);

    assert_eq!(resets.load(Ordering::SeqCst), 2);
    assert_eq!(env.phase(), Phase::Running);
    assert!(!env.scenario().unwrap().is_short);
    assert_eq!(m.piece_counters().0, 3);
}

#[test]
fn long_episode_ignores_soft_condition() {
    let mut m = CurriculumManager::new(None, 8, 1);
    let (mut env, resets) = scripted_env(vec![(false, 6, true), (false, 6, true), (false, 6, true)]);
    env.start(scenario(&mut m, false)).unwrap();
    for _ in 0..3 {
        let out = env.step(0, &mut m).unwrap();
        assert_eq!(out.flags, [0, 0]);
        assert!(out.finished.is_none());
    }
    assert_eq!(resets.load(Ordering::SeqCst), 1);
}

#[test]
fn game_over_is_reported_on_the_same_step() {
    let mut m = CurriculumManager::new(None, 8, 1);
    let (mut env, resets) = scripted_env(vec![(false, 0, false), (true, 1, false)]);
    env.start(scenario(&mut m, true)).unwrap();
    assert_eq!(env.step(0, &mut m).unwrap().flags, [0, 0]);
    let out = env.step(0, &mut m).unwrap();
    assert_eq!(out.flags, [1, 0]);
    let rec = out.finished.unwrap();
    assert!(rec.is_over && rec.is_short);
    assert_eq!(resets.load(Ordering::SeqCst), 2);
    // Fresh episode after the auto-reset.
    assert_eq!(env.step(0, &mut m).unwrap().flags, [0, 0]);
}
