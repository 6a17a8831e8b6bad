//! Device integration tests
//!
//! Drive a `Device` against the recording mock and check what the processor
//! actually receives. The randomised test replays every batch against a small
//! model of the device to prove config writes never land on memory that a
//! running program still reads.

extern crate alloc;

use alloc::vec::Vec;
use gridline_core::check_all_invariants;
use gridline_dispatch::command::bytes_to_words;
use gridline_dispatch::{
    decode_commands, DecodedCommand, Device, DeviceConfig, DispatchMetrics, Program, Trace,
    TraceId,
};
use gridline_hal::{ConfigRegion, CoreType, SocDescriptor, TestHal};
use gridline_hal_mock::MockProcessor;

// ============================================================================
// Helpers
// ============================================================================

fn one_lane(size: u32) -> SocDescriptor {
    SocDescriptor::new().with_core(CoreType::Worker, ConfigRegion::new(0, size))
}

fn batch_commands(batch: &[u8]) -> Vec<DecodedCommand> {
    decode_commands(&bytes_to_words(batch)).unwrap()
}

fn last_batch(dev: &Device<MockProcessor>) -> Vec<DecodedCommand> {
    let batches = dev.processor().batches();
    batch_commands(batches.last().unwrap())
}

/// Deterministic pseudo-random source
struct Lcg(u64);

impl Lcg {
    fn below(&mut self, bound: u32) -> u32 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1);
        ((self.0 >> 33) as u32) % bound
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_sixth_launch_waits_for_first() {
    let mut dev = Device::new(MockProcessor::new(), &one_lane(1024), DeviceConfig::default()).unwrap();

    for id in 1..=5 {
        let program = Program::new(id, 1).with_config(0, &[0; 200]).with_active_cores(1);
        dev.enqueue_program(0, &program).unwrap();
        assert!(!matches!(last_batch(&dev)[0], DecodedCommand::Wait { .. }));
    }
    assert_eq!(dev.queue().last_slot_address(0), 800);

    let program = Program::new(6, 1).with_config(0, &[0; 200]).with_active_cores(1);
    dev.enqueue_program(0, &program).unwrap();
    assert_eq!(
        last_batch(&dev),
        alloc::vec![
            DecodedCommand::Wait {
                count: 1,
                clear: false
            },
            DecodedCommand::WriteConfig {
                core_type: CoreType::Worker,
                address: 0,
                bytes: alloc::vec![0; 200],
            },
            DecodedCommand::Go {
                program_id: 6,
                config_bases: alloc::vec![0],
            },
        ]
    );
    assert_eq!(dev.metrics().sync_points, 1);
    assert_eq!(dev.metrics().launches, 6);
    assert!(dev.processor().has_log_containing("[kca] program 6 waits for 1 workers"));
    assert!(check_all_invariants(dev.queue().config_allocator()).is_empty());
}

#[test]
fn test_unused_core_type_gets_no_config_write() {
    let mut dev = Device::new(
        MockProcessor::new(),
        &SocDescriptor::two_lane(),
        DeviceConfig::default(),
    )
    .unwrap();
    let program = Program::new(1, 2).with_config(1, &[1; 8]).with_active_cores(1);
    dev.enqueue_program(0, &program).unwrap();

    let cmds = last_batch(&dev);
    assert_eq!(cmds.len(), 2);
    assert!(matches!(
        cmds[0],
        DecodedCommand::WriteConfig {
            core_type: CoreType::ActiveEth,
            address: 0x0003_0000,
            ..
        }
    ));
    let lane0 = dev.queue().config_allocator().lane(0);
    assert_eq!(lane0.next_address(), 0x4000);
}

#[test]
fn test_capture_then_replay_twice() {
    let mut dev = Device::new(MockProcessor::new(), &one_lane(4096), DeviceConfig::default()).unwrap();

    dev.begin_trace_capture(0, TraceId(1)).unwrap();
    for id in 0..3 {
        let program = Program::new(id, 1).with_config(0, &[id as u8; 64]).with_active_cores(2);
        dev.enqueue_program(0, &program).unwrap();
    }
    dev.end_trace_capture(0).unwrap();
    let trace = dev.trace(TraceId(1)).unwrap().clone();
    assert_eq!(trace.num_completion_worker_cores, 6);
    assert_eq!(dev.processor().launch_count(), 0);

    dev.replay_trace(0, TraceId(1)).unwrap();
    dev.replay_trace(0, TraceId(1)).unwrap();

    let batches = dev.processor().batches();
    let second = batch_commands(&batches[batches.len() - 1]);
    // Second replay drains the first one before reusing the same config.
    assert_eq!(
        second[0],
        DecodedCommand::Wait {
            count: 6,
            clear: true
        }
    );
    assert_eq!(
        second[1],
        DecodedCommand::ExecTrace {
            trace_id: 1,
            words: trace.commands.clone(),
        }
    );
    assert_eq!(dev.processor().launch_count(), 2);
    assert_eq!(dev.metrics().traces_replayed, 2);

    // Captured config addresses restart at the base like a fresh session.
    let captured = decode_commands(&trace.commands).unwrap();
    assert!(matches!(
        captured[0],
        DecodedCommand::WriteConfig { address: 0, .. }
    ));
}

#[test]
fn test_trace_and_metrics_survive_json() {
    let mut dev = Device::new(MockProcessor::new(), &one_lane(1024), DeviceConfig::default()).unwrap();
    dev.begin_trace_capture(0, TraceId(3)).unwrap();
    dev.enqueue_program(0, &Program::new(1, 1).with_config(0, &[5; 4]).with_active_cores(1))
        .unwrap();
    dev.end_trace_capture(0).unwrap();

    let trace = dev.trace(TraceId(3)).unwrap();
    let json = serde_json::to_string(trace).unwrap();
    let back: Trace = serde_json::from_str(&json).unwrap();
    assert_eq!(&back, trace);

    let json = serde_json::to_string(dev.metrics()).unwrap();
    let metrics: DispatchMetrics = serde_json::from_str(&json).unwrap();
    assert_eq!(metrics.words_captured, trace.word_count() as u64);
}

#[test]
fn test_runs_against_discarding_processor() {
    let mut dev = Device::new(TestHal::new(), &SocDescriptor::two_lane(), DeviceConfig::with_queues(2))
        .unwrap();
    let program = Program::new(1, 2).with_config(0, &[0; 32]).with_active_cores(8);
    for _ in 0..20 {
        dev.enqueue_program(1, &program).unwrap();
    }
    dev.finish(1).unwrap();
    assert_eq!(dev.expected_workers_completed(), 160);
    assert_eq!(dev.metrics().commands_pushed, 20);
}

// ============================================================================
// Randomised end-to-end check
// ============================================================================

/// Live config ranges on the modelled device: `(start, end, token)`
struct DeviceModel {
    completed: u32,
    live: Vec<(u32, u32, u32)>,
}

impl DeviceModel {
    fn complete(&mut self, count: u32) {
        self.completed = self.completed.max(count);
        let completed = self.completed;
        self.live.retain(|&(_, _, token)| token > completed);
    }

    fn apply(&mut self, batch: &[DecodedCommand], token: u32) {
        for cmd in batch {
            match cmd {
                DecodedCommand::Wait { count, .. } => self.complete(*count),
                DecodedCommand::WriteConfig { address, bytes, .. } => {
                    let end = address + bytes.len() as u32;
                    for &(start, live_end, live_token) in &self.live {
                        assert!(
                            end <= start || *address >= live_end,
                            "config write {:#x}..{:#x} clobbers live {:#x}..{:#x} (token {}, completed {})",
                            address,
                            end,
                            start,
                            live_end,
                            live_token,
                            self.completed
                        );
                    }
                    self.live.push((*address, end, token));
                }
                _ => {}
            }
        }
    }
}

#[test]
fn test_random_launches_never_clobber_live_config() {
    for seed in [3u64, 17, 2024] {
        let mut rng = Lcg(seed);
        let soc = SocDescriptor::new()
            .with_core(CoreType::Worker, ConfigRegion::new(0x1000, 2000))
            .with_core(CoreType::ActiveEth, ConfigRegion::new(0x8000, 512));
        let mut dev = Device::new(MockProcessor::new(), &soc, DeviceConfig::default()).unwrap();
        let mut model = DeviceModel {
            completed: 0,
            live: Vec::new(),
        };

        for id in 0..400 {
            let worker = alloc::vec![0u8; rng.below(600) as usize];
            let eth = alloc::vec![0u8; if rng.below(3) == 0 { rng.below(200) as usize } else { 0 }];
            let program = Program::new(id, 2)
                .with_config(0, &worker)
                .with_config(1, &eth)
                .with_active_cores(1 + rng.below(4));

            dev.processor().clear_calls();
            dev.enqueue_program(0, &program).unwrap();
            let token = dev.expected_workers_completed();
            model.apply(&last_batch(&dev), token);

            let violations = check_all_invariants(dev.queue().config_allocator());
            assert!(violations.is_empty(), "seed {} step {}: {:?}", seed, id, violations);

            // The device finishes some work in the background.
            if rng.below(4) == 0 {
                let done = model.completed + rng.below(token - model.completed + 1);
                model.complete(done);
                dev.notify_workers_completed(done);
            }
        }
    }
}
