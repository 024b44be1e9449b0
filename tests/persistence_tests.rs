//! Saving boards to project files and restoring them mid-run.

mod mocks;

use mocks::*;
use rusty_board::component::ComponentDescriptor;
use rusty_board::engine::{Engine, EngineState};
use rusty_board::library::ComponentLibrary;
use rusty_board::pin::PinValue;
use rusty_board::system_config::{SystemConfig, SystemFactory};
use rusty_board::systems::{build_demo_board, countdown_program};

fn round_trip(engine: &Engine) -> Engine {
    let json = SystemConfig::capture(engine, "board").to_json().unwrap();
    let config = SystemConfig::from_json(&json).unwrap();
    SystemFactory::new().create(&config).unwrap()
}

fn assert_same_future(original: &mut Engine, restored: &mut Engine, ticks: u64) {
    for _ in 0..ticks {
        let a = original.step(1);
        let b = restored.step(1);
        assert_eq!(a.is_ok(), b.is_ok());
        assert_eq!(original.snapshot(), restored.snapshot());
    }
}

#[test]
fn test_demo_board_restores_mid_program() {
    let mut engine = Engine::default();
    build_demo_board(&mut engine, &countdown_program(5)).unwrap();
    engine.step(13).unwrap();

    let mut restored = round_trip(&engine);
    assert_eq!(restored.snapshot(), engine.snapshot());
    assert_eq!(restored.tick(), 13);
    assert_eq!(restored.state(), EngineState::Paused);

    let nets: Vec<_> = engine.connections().nets().cloned().collect();
    let restored_nets: Vec<_> = restored.connections().nets().cloned().collect();
    assert_eq!(nets, restored_nets);

    assert_same_future(&mut engine, &mut restored, 40);
}

#[test]
fn test_pending_delayed_writes_survive() {
    let mut engine = Engine::default();
    let clock = engine
        .create_component(ComponentDescriptor::new("CLOCK", "clock").with_property("period", 2))
        .unwrap();
    let ff = engine
        .create_component(ComponentDescriptor::new("FF", "toggle_flip_flop").with_delay(3))
        .unwrap();
    engine.connect_by_name((clock, "CLK"), (ff, "CLK")).unwrap();
    engine.step(2).unwrap();
    assert!(engine.stats().delayed_writes > 0);

    let mut restored = round_trip(&engine);
    assert_eq!(restored.stats().delayed_writes, engine.stats().delayed_writes);
    assert_same_future(&mut engine, &mut restored, 12);
    assert_eq!(restored.read(ff, "Q").unwrap(), engine.read(ff, "Q").unwrap());
}

#[test]
fn test_stimulus_survives() {
    let mut engine = Engine::default();
    let clock = engine
        .create_component(ComponentDescriptor::new("CLOCK", "clock").with_property("period", 4))
        .unwrap();
    let ff = engine
        .create_component(ComponentDescriptor::new("FF", "d_flip_flop").with_property("width", 8))
        .unwrap();
    engine.connect_by_name((clock, "CLK"), (ff, "CLK")).unwrap();
    let d = engine.pin_id(ff, "D").unwrap();

    engine.stimulate(d, PinValue::Driven(0x42)).unwrap();
    engine.step(1).unwrap();
    // Queued but not yet committed.
    engine.stimulate(d, PinValue::Driven(0x99)).unwrap();

    let mut restored = round_trip(&engine);
    assert_eq!(restored.read_pin(d).unwrap(), PinValue::Driven(0x42));
    assert_same_future(&mut engine, &mut restored, 8);
    assert_eq!(restored.read(ff, "Q").unwrap(), PinValue::Driven(0x99));
}

#[test]
fn test_halted_engine_stays_halted() {
    let mut library = ComponentLibrary::new();
    library.register("counter", |_| Ok(Box::new(MockCounter { limit: Some(1) })));

    let mut engine = Engine::with_library(Default::default(), library.clone());
    let clock = engine
        .create_component(ComponentDescriptor::new("CLOCK", "clock").with_property("period", 2))
        .unwrap();
    let counter = engine
        .create_component(ComponentDescriptor::new("COUNTER", "counter"))
        .unwrap();
    engine.connect_by_name((clock, "CLK"), (counter, "CLK")).unwrap();
    assert!(engine.step(10).is_err());

    let json = SystemConfig::capture(&engine, "faulty").to_json().unwrap();
    let config = SystemConfig::from_json(&json).unwrap();
    let mut restored = SystemFactory::with_library(library).create(&config).unwrap();

    assert_eq!(restored.state(), EngineState::Halted);
    assert_eq!(restored.fault(), engine.fault());
    assert!(restored.step(1).is_err());

    restored.reset();
    assert_eq!(restored.state(), EngineState::Idle);
    restored.step(2).unwrap();
    assert_eq!(restored.read(counter, "COUNT").unwrap(), PinValue::Driven(1));
}

#[test]
fn test_unknown_model_without_library_entry_fails() {
    let mut library = ComponentLibrary::new();
    library.register("counter", |_| Ok(Box::new(MockCounter { limit: None })));
    let mut engine = Engine::with_library(Default::default(), library);
    engine
        .create_component(ComponentDescriptor::new("COUNTER", "counter"))
        .unwrap();

    let config = SystemConfig::capture(&engine, "custom");
    assert!(SystemFactory::new().create(&config).is_err());
}

#[test]
fn test_project_file_on_disk() {
    let mut engine = Engine::default();
    let board = build_demo_board(&mut engine, &countdown_program(3)).unwrap();
    engine.step(9).unwrap();

    let path = std::env::temp_dir().join(format!("rusty_board_{}.json", std::process::id()));
    SystemConfig::capture(&engine, "demo").save_json(&path).unwrap();

    let config = SystemConfig::load_json(&path).unwrap();
    let info = config.info();
    assert_eq!(info.name, "demo");
    assert_eq!(info.component_count, 5);
    assert_eq!(info.saved_tick, Some(9));

    let mut restored = SystemFactory::new().create_from_json(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_same_future(&mut engine, &mut restored, 30);
    assert_eq!(
        restored.read(board.cpu, "HALT").unwrap(),
        engine.read(board.cpu, "HALT").unwrap()
    );
}

#[test]
fn test_missing_project_file_reports_path() {
    let err = SystemConfig::load_json("/nonexistent/board.json").unwrap_err();
    assert!(err.to_string().contains("/nonexistent/board.json"));
}
