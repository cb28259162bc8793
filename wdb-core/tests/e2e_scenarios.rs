use std::thread;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use wdb_core::regs::CHECKPOINT_RESUMED;
use wdb_core::rpc::ModeInfo;
use wdb_core::sim::{SimStep, SimTarget};
use wdb_core::{
    AgentConfig, AgentEvent, AgentMode, AgentModes, BringUp, CommInterface, CommMode, RegSetData, RegSetType,
    RegisterFile, Reply, Request, TargetEvent, WdbError,
};

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

fn target(initial_mode: BringUp) -> SimTarget {
    let config = AgentConfig { notify_poll_timeout_ms: 50, initial_mode, ..AgentConfig::default() };
    let target = SimTarget::new(config);
    target.agent.bring_up();
    target
}

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + REPLY_TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "Timeout waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Wait until the system runs again and the suspending context has unlocked
/// interrupts and restarted the clock.
fn wait_resumed(target: &SimTarget) {
    wait_until("system resume", || {
        !target.cpu.is_external() && !target.cpu.interrupts_locked() && target.cpu.clock_running()
    });
}

fn call(target: &SimTarget, request: Request) -> Reply {
    target.host.call(request, REPLY_TIMEOUT).expect("Target did not reply")
}

fn system_regs(pc: u64) -> RegisterFile {
    let mut regs = RegisterFile { sp: 0x0020_0000, pc, status: 0x2300, ..RegisterFile::default() };
    for (i, gpr) in regs.gpr.iter_mut().enumerate() {
        *gpr = 0x1000 + i as u64;
    }
    regs
}

#[test]
fn test_scenario_task_mode_request_and_notify() {
    let target = target(BringUp::Task);
    assert_eq!(target.agent.available_modes(), AgentModes::TASK);
    assert!(target.agent.task_id().is_some());

    assert_eq!(call(&target, Request::Connect), Reply::Ok);
    assert_eq!(
        call(&target, Request::ModeGet),
        Reply::Mode(ModeInfo { mode: AgentMode::Task, available: 1, extern_running: false })
    );
    assert_eq!(call(&target, Request::ModeSet(2)), Reply::from(WdbError::NotSupported("agent mode not available")));
    // The system runs, so its registers cannot be read.
    assert_eq!(call(&target, Request::RegsGet(RegSetType::Iu)), Reply::from(WdbError::NotExternal));

    target.agent.post_event(TargetEvent::Text("hello".into()));
    assert!(target.host.wait_notify(REPLY_TIMEOUT));
    assert_eq!(call(&target, Request::EventGet), Reply::Event(Some(TargetEvent::Text("hello".into()))));
    assert_eq!(call(&target, Request::EventGet), Reply::Event(None));
    assert_eq!(target.cpu.suspensions(), 0);
}

#[test]
fn test_scenario_first_packet_suspends_external_only_agent() {
    let target = target(BringUp::Extern);
    assert_eq!(target.agent.mode(), AgentMode::Extern);
    assert!(target.link.has_hook());

    let system = system_regs(0x4000);
    target.cpu.set_live_registers(system);
    target.fpu.lock().unwrap()[0] = 0xaa;
    target.trace.clear();

    // The first packet suspends the system and the external agent answers it.
    assert_eq!(call(&target, Request::Connect), Reply::Ok);
    assert!(target.agent.is_extern_running());
    assert!(target.agent.is_now_external());
    assert!(target.cpu.is_external());

    let mut expected = system;
    expected.set_return_value(CHECKPOINT_RESUMED);
    assert_eq!(target.agent.system_registers(), Some(expected));
    assert_eq!(call(&target, Request::RegsGet(RegSetType::Iu)), Reply::Regs(RegSetData::Iu(expected)));

    let Reply::Regs(RegSetData::Raw(fpu)) = call(&target, Request::RegsGet(RegSetType::Fpu)) else {
        panic!("FPU registers expected");
    };
    assert_eq!(fpu[0], 0xaa);
    assert_eq!(
        call(&target, Request::RegsSet(RegSetType::Fpu, RegSetData::Raw(vec![0x55]))),
        Reply::Ok
    );
    assert_eq!(
        call(&target, Request::RegsGet(RegSetType::Vector)),
        Reply::from(WdbError::NotFound(RegSetType::Vector))
    );

    assert_eq!(call(&target, Request::ContextContinue), Reply::Ok);
    wait_resumed(&target);
    assert!(!target.agent.is_extern_running());
    assert_eq!(target.fpu.lock().unwrap()[0], 0x55);
    assert_eq!(target.cpu.live_registers(), expected);

    assert_eq!(
        target.trace.steps(),
        vec![
            SimStep::ClockDisabled,
            SimStep::ExternEnter,
            SimStep::CommMode(CommMode::Poll),
            SimStep::FpuSaved,
            SimStep::AgentLoaded { sp: 0x1000 },
            SimStep::ExternExit,
            SimStep::FpuLoaded,
            SimStep::SystemLoaded { pc: 0x4000 },
            SimStep::ClockEnabled,
        ]
    );

    // Without a task agent the link stays polled, and the next packet
    // suspends the system again.
    assert_eq!(call(&target, Request::Ping), Reply::Pong);
    assert_eq!(target.cpu.suspensions(), 2);
    assert_eq!(call(&target, Request::ContextContinue), Reply::Ok);
    wait_resumed(&target);
}

#[test]
fn test_scenario_dormant_notify_excursion() {
    let target = target(BringUp::Bimodal);
    assert_eq!(target.agent.available_modes(), AgentModes::all());
    assert_eq!(target.agent.mode(), AgentMode::Task);

    // Served by the task agent; afterwards packets trigger suspension.
    assert_eq!(call(&target, Request::Connect), Reply::Ok);
    assert_eq!(call(&target, Request::ModeSet(2)), Reply::Ok);
    assert_eq!(target.agent.mode(), AgentMode::Extern);
    assert!(!target.agent.is_extern_running());

    let system = system_regs(0x7000);
    target.cpu.set_live_registers(system);
    target.trace.clear();

    target.agent.post_event(TargetEvent::Breakpoint { task: 7, pc: 0x7000 });

    // The excursion is complete when post_event returns.
    assert!(!target.agent.is_extern_running());
    assert!(!target.cpu.interrupts_locked());
    assert!(target.host.wait_notify(REPLY_TIMEOUT));
    assert_eq!(
        target.trace.steps(),
        vec![
            SimStep::ClockDisabled,
            SimStep::ExternEnter,
            SimStep::CommMode(CommMode::Poll),
            SimStep::FpuSaved,
            SimStep::AgentLoaded { sp: 0x1000 },
            SimStep::NotifySent { from_task: false },
            SimStep::CommMode(CommMode::Interrupt),
            SimStep::ExternExit,
            SimStep::FpuLoaded,
            SimStep::SystemLoaded { pc: 0x7000 },
            SimStep::ClockEnabled,
        ]
    );

    let mut expected = system;
    expected.set_return_value(CHECKPOINT_RESUMED);
    assert_eq!(target.cpu.live_registers(), expected);
    assert_eq!(target.agent.events().len(), 1);
}

#[test]
fn test_scenario_one_shot_drain_resumes_once() {
    let target = target(BringUp::Bimodal);
    assert_eq!(call(&target, Request::Connect), Reply::Ok);
    assert_eq!(call(&target, Request::ModeSet(2)), Reply::Ok);

    target.agent.post_event(TargetEvent::Text("pending".into()));
    assert!(target.host.wait_notify(REPLY_TIMEOUT));
    assert_eq!(target.cpu.suspensions(), 1);

    // Enter external mode with one event pending.
    assert_eq!(
        call(&target, Request::ModeGet),
        Reply::Mode(ModeInfo { mode: AgentMode::Extern, available: 3, extern_running: true })
    );
    assert_eq!(call(&target, Request::ModeSet(1)), Reply::Ok);
    assert!(target.agent.one_shot());
    assert!(!target.link.has_hook());
    target.trace.clear();

    // Still parked while the event is pending.
    thread::sleep(Duration::from_millis(120));
    assert!(target.agent.is_extern_running());

    assert_eq!(call(&target, Request::EventGet), Reply::Event(Some(TargetEvent::Text("pending".into()))));
    wait_resumed(&target);
    assert!(!target.agent.one_shot());
    assert_eq!(target.link.mode(), CommMode::Interrupt);

    // Back in task mode: the task agent answers without a suspension.
    assert_eq!(call(&target, Request::Ping), Reply::Pong);
    thread::sleep(Duration::from_millis(120));
    let resumes = target.trace.steps().iter().filter(|s| matches!(s, SimStep::SystemLoaded { .. })).count();
    assert_eq!(resumes, 1);
    assert_eq!(target.cpu.suspensions(), 2);
}

#[test]
fn test_task_agent_not_scheduled_while_external_agent_runs() {
    let target = target(BringUp::Bimodal);
    assert_eq!(call(&target, Request::Connect), Reply::Ok);
    assert_eq!(call(&target, Request::ModeSet(2)), Reply::Ok);
    target.agent.post_event(TargetEvent::Text("a".into()));
    assert!(target.host.wait_notify(REPLY_TIMEOUT));

    // The next packet suspends the system; hand control back to task mode
    // while an event is still pending.
    assert_eq!(call(&target, Request::Ping), Reply::Pong);
    assert!(target.agent.is_extern_running());
    assert_eq!(call(&target, Request::ModeSet(1)), Reply::Ok);
    target.trace.clear();

    // Wakes the task agent, which must stay off the CPU.
    target.agent.post_event(TargetEvent::Text("b".into()));
    thread::sleep(Duration::from_millis(300));
    assert!(target.agent.is_extern_running());
    assert!(target.cpu.is_external());
    let steps = target.trace.steps();
    assert!(!steps.contains(&SimStep::NotifySent { from_task: true }));
    assert!(steps.contains(&SimStep::NotifySent { from_task: false }));

    assert_eq!(call(&target, Request::EventGet), Reply::Event(Some(TargetEvent::Text("a".into()))));
    assert_eq!(call(&target, Request::EventGet), Reply::Event(Some(TargetEvent::Text("b".into()))));
    wait_resumed(&target);

    // Once the system runs again the task agent serves the link.
    assert_eq!(call(&target, Request::Ping), Reply::Pong);
    assert_eq!(target.cpu.suspensions(), 2);
}

#[test]
fn test_unaddressable_extern_stack_leaves_task_mode_only() {
    let config = AgentConfig {
        initial_mode: BringUp::Bimodal,
        extern_stack_base: u64::MAX,
        ..AgentConfig::default()
    };
    let target = SimTarget::new(config);

    assert_eq!(target.agent.bring_up(), AgentModes::TASK);
    assert_eq!(target.agent.mode(), AgentMode::Task);
    assert!(!target.link.has_hook());
}

#[test]
fn test_trap_suspend_resume_round_trip() {
    let target = target(BringUp::Extern);
    let original = system_regs(0x9000);
    *target.fpu.lock().unwrap() = [1, 2, 3, 4, 5, 6, 7, 8];

    let agent = target.agent.clone();
    let cpu = target.cpu.clone();
    let system = thread::spawn(move || {
        cpu.trap(original, |regs| {
            let _ = agent.suspend_system(&regs, None);
        })
    });

    wait_until("external agent", || target.cpu.is_external());
    assert_eq!(call(&target, Request::RegsGet(RegSetType::Iu)), Reply::Regs(RegSetData::Iu(original)));
    assert_eq!(call(&target, Request::ContextContinue), Reply::Ok);

    let resumed = system.join().unwrap();
    assert_eq!(resumed, Some(original));
    assert_eq!(*target.fpu.lock().unwrap(), [1, 2, 3, 4, 5, 6, 7, 8]);
    wait_resumed(&target);
}

#[test]
fn test_repeated_dormant_notifies_do_not_overlap() {
    let target = target(BringUp::Extern);
    assert_eq!(call(&target, Request::Connect), Reply::Ok);
    assert_eq!(call(&target, Request::ContextContinue), Reply::Ok);
    wait_resumed(&target);
    target.trace.clear();

    for i in 0..3 {
        target.agent.post_event(TargetEvent::Text(format!("event {i}")));
        assert!(!target.agent.is_extern_running());
        assert!(target.host.wait_notify(REPLY_TIMEOUT));
    }
    assert_eq!(target.cpu.suspensions(), 4);

    // Every suspension is followed by its resume before the next begins.
    let transitions: Vec<_> = target
        .trace
        .steps()
        .into_iter()
        .filter(|s| matches!(s, SimStep::AgentLoaded { .. } | SimStep::SystemLoaded { .. }))
        .collect();
    assert_eq!(transitions.len(), 6);
    for pair in transitions.chunks(2) {
        assert!(matches!(pair, [SimStep::AgentLoaded { .. }, SimStep::SystemLoaded { .. }]));
    }
}

#[test]
fn test_failed_task_resume_deletes_task() {
    let config = AgentConfig { initial_mode: BringUp::Bimodal, ..AgentConfig::default() };
    let target = SimTarget::new(config);
    target.runtime.fail_next_resume();

    assert_eq!(target.agent.bring_up(), AgentModes::EXTERN);
    assert_eq!(target.agent.mode(), AgentMode::Extern);
    assert_eq!(target.runtime.deleted_tasks(), 1);
    assert_eq!(target.runtime.live_tasks(), 0);
    assert_eq!(target.agent.task_id(), None);
}

#[test]
fn test_failed_task_create_reports_resource_error() {
    let target = SimTarget::new(AgentConfig::default());
    target.runtime.fail_next_create();

    let err = target.agent.init_task(3, 0, None, 0x2000).unwrap_err();
    assert!(matches!(err, WdbError::Resource(_)));
    assert!(!target.agent.runs_tasking());
}

#[tokio::test]
async fn test_monitor_reports_excursion() {
    let target = target(BringUp::Extern);
    let mut events = target.agent.subscribe();
    target.cpu.set_live_registers(system_regs(0x4400));

    assert_eq!(call(&target, Request::Connect), Reply::Ok);
    assert_eq!(call(&target, Request::ContextContinue), Reply::Ok);

    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("Timeout waiting for suspend event")
        .expect("Monitor closed");
    assert_eq!(event, AgentEvent::SystemSuspended { pc: 0x4400 });

    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("Timeout waiting for resume event")
        .expect("Monitor closed");
    assert_eq!(event, AgentEvent::SystemResumed { pc: 0x4400 });
}
