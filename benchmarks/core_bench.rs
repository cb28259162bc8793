use criterion::{black_box, criterion_group, criterion_main, Criterion};
use wdb_core::regs::{RegSetRegistry, RegSetType, RegisterSet};
use wdb_core::rpc::{dispatch, Request};
use wdb_core::sim::SimTarget;
use wdb_core::{AgentConfig, AgentModes, EventQueue, TargetEvent};

struct Scratch {
    kind: RegSetType,
    regs: Vec<u8>,
}

impl RegisterSet for Scratch {
    fn reg_set_type(&self) -> RegSetType {
        self.kind
    }
    fn save(&mut self) {}
    fn load(&mut self) {}
    fn get(&self) -> Vec<u8> {
        self.regs.clone()
    }
    fn set(&mut self, data: &[u8]) {
        self.regs.clear();
        self.regs.extend_from_slice(data);
    }
}

fn bench_event_queue(c: &mut Criterion) {
    let queue = EventQueue::new();
    c.bench_function("event_post_pop", |b| {
        b.iter(|| {
            queue.post(TargetEvent::Breakpoint { task: 1, pc: 0x0800_1234 });
            black_box(queue.pop())
        })
    });
}

fn bench_registry_lookup(c: &mut Criterion) {
    let mut registry = RegSetRegistry::new();
    for unit in 0..8 {
        registry.add(Box::new(Scratch { kind: RegSetType::Coprocessor(unit), regs: vec![unit; 16] }));
    }
    registry.add(Box::new(Scratch { kind: RegSetType::Vector, regs: vec![0; 512] }));

    c.bench_function("registry_get_last", |b| {
        b.iter(|| black_box(registry.get(black_box(RegSetType::Vector))))
    });
    c.bench_function("registry_save_load_all", |b| {
        b.iter(|| {
            registry.save_all();
            registry.load_all();
        })
    });
}

fn bench_dispatch(c: &mut Criterion) {
    let target = SimTarget::new(AgentConfig::default());
    if let Err(e) = target.agent.init_extern(0x1000) {
        panic!("external agent: {e}");
    }
    if let Err(e) = target.agent.set_mode(AgentModes::EXTERN) {
        panic!("set mode: {e}");
    }
    c.bench_function("dispatch_mode_get", |b| {
        b.iter(|| black_box(dispatch(&target.agent, Request::ModeGet)))
    });
}

criterion_group!(benches, bench_event_queue, bench_registry_lookup, bench_dispatch);
criterion_main!(benches);
